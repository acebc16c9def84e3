use crate::catalog::{minute_of_day, DatedTree, MinuteKey, MINUTES_PER_DAY};
use crate::config::KeogramConfig;
use crate::fsio;
use crate::imaging::{png, KeogramRenderer};
use crate::prelude::{PipelineStage, StageError, StageMetadata, StageOutput, StageResult};
use crate::processing::feed::LiveFeed;
use crate::telemetry::{LogManager, MetricsRecorder};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use image::{Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fs;
use std::path::PathBuf;

/// Value of a minute that has not been reached yet.
pub const INITIAL: Rgb<u8> = Rgb([255, 255, 255]);
/// Value of an elapsed minute with no usable column.
pub const BLANK: Rgb<u8> = Rgb([0, 0, 0]);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeogramPhase {
    Fresh,
    Accumulating,
}

/// Counts from one `advance` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Advance {
    pub copied: usize,
    pub blanked: usize,
}

/// Anything that can look up the column recorded for a minute.
pub trait ColumnSource {
    /// `None` when the minute has no usable column.
    fn column(&self, key: MinuteKey) -> Option<RgbImage>;
}

/// A day-long raster, one column per minute, row 0 at the southern horizon.
#[derive(Debug, Clone, PartialEq)]
pub struct Keogram {
    date: NaiveDate,
    raster: RgbImage,
    last_minute: Option<usize>,
}

impl Keogram {
    pub fn fresh(date: NaiveDate, height: u32) -> Self {
        Self {
            date,
            raster: RgbImage::from_pixel(MINUTES_PER_DAY as u32, height, INITIAL),
            last_minute: None,
        }
    }

    pub fn from_parts(
        date: NaiveDate,
        raster: RgbImage,
        last_minute: Option<usize>,
    ) -> StageResult<Self> {
        if raster.width() != MINUTES_PER_DAY as u32 {
            return Err(StageError::State(format!(
                "raster for {} is {} columns wide",
                date,
                raster.width()
            )));
        }
        if last_minute.is_some_and(|m| m >= MINUTES_PER_DAY) {
            return Err(StageError::State(format!(
                "progress for {} is past the end of the day",
                date
            )));
        }
        Ok(Self {
            date,
            raster,
            last_minute,
        })
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn raster(&self) -> &RgbImage {
        &self.raster
    }

    pub fn height(&self) -> u32 {
        self.raster.height()
    }

    pub fn last_minute(&self) -> Option<usize> {
        self.last_minute
    }

    pub fn phase(&self) -> KeogramPhase {
        match self.last_minute {
            None => KeogramPhase::Fresh,
            Some(_) => KeogramPhase::Accumulating,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.last_minute == Some(MINUTES_PER_DAY - 1)
    }

    /// Fills every minute after `last_minute` that has elapsed at `now`.
    pub fn advance(&mut self, columns: &dyn ColumnSource, now: NaiveDateTime) -> Advance {
        self.advance_through(columns, elapsed_minutes(self.date, now))
    }

    /// Fills minutes `last_minute + 1 .. until`. Examined minutes are never
    /// revisited, even when they were blanked.
    pub fn advance_through(&mut self, columns: &dyn ColumnSource, until: usize) -> Advance {
        let until = until.min(MINUTES_PER_DAY);
        let start = self.last_minute.map_or(0, |m| m + 1);
        let mut counts = Advance::default();
        for minute in start..until {
            let column = MinuteKey::from_minute_of_day(self.date, minute)
                .and_then(|key| columns.column(key))
                .filter(|column| column.dimensions() == (1, self.raster.height()));
            let x = minute as u32;
            match column {
                Some(column) => {
                    for (y, pixel) in column.pixels().enumerate() {
                        self.raster.put_pixel(x, y as u32, *pixel);
                    }
                    counts.copied += 1;
                }
                None => {
                    for y in 0..self.raster.height() {
                        self.raster.put_pixel(x, y, BLANK);
                    }
                    counts.blanked += 1;
                }
            }
        }
        if until > start {
            self.last_minute = Some(until - 1);
        }
        counts
    }
}

/// Number of minutes of `date` that have fully elapsed at `now`.
pub fn elapsed_minutes(date: NaiveDate, now: NaiveDateTime) -> usize {
    match now.date().cmp(&date) {
        Ordering::Less => 0,
        Ordering::Equal => minute_of_day(now),
        Ordering::Greater => MINUTES_PER_DAY,
    }
}

/// EmissionColumn files in a dated tree.
pub struct ColumnTree {
    tree: DatedTree,
    prefix: String,
    height: u32,
    logger: LogManager,
}

impl ColumnTree {
    pub fn new(tree: DatedTree, prefix: impl Into<String>, height: u32) -> Self {
        Self {
            tree,
            prefix: prefix.into(),
            height,
            logger: LogManager::new("assembler"),
        }
    }

    pub fn tree(&self) -> &DatedTree {
        &self.tree
    }
}

impl ColumnSource for ColumnTree {
    fn column(&self, key: MinuteKey) -> Option<RgbImage> {
        let path = self.tree.minute_path(&self.prefix, key);
        if !path.exists() {
            self.logger.detail(&format!("no column for {}", key));
            return None;
        }
        match png::read_rgb8(&path) {
            Ok(column) if column.dimensions() == (1, self.height) => Some(column),
            Ok(column) => {
                self.logger.warn(&format!(
                    "column {} is {:?}, expected (1, {})",
                    path.display(),
                    column.dimensions(),
                    self.height
                ));
                None
            }
            Err(err) => {
                self.logger.warn(&format!("ignoring column: {}", err));
                None
            }
        }
    }
}

/// Progress record persisted next to the raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub date: NaiveDate,
    pub last_minute: Option<usize>,
}

/// Per-day files of the assembler: the annotated render, the lossless raster
/// and the progress record.
#[derive(Debug, Clone)]
pub struct KeogramStore {
    tree: DatedTree,
    prefix: String,
}

impl KeogramStore {
    pub fn new(tree: DatedTree, prefix: impl Into<String>) -> Self {
        Self {
            tree,
            prefix: prefix.into(),
        }
    }

    pub fn tree(&self) -> &DatedTree {
        &self.tree
    }

    fn stem(&self, date: NaiveDate) -> String {
        format!("keogram-{}-{}", self.prefix, date.format("%Y%m%d"))
    }

    pub fn render_path(&self, date: NaiveDate) -> PathBuf {
        self.tree.day_dir(date).join(format!("{}.png", self.stem(date)))
    }

    pub fn raster_path(&self, date: NaiveDate) -> PathBuf {
        self.tree
            .day_dir(date)
            .join(format!("{}-raster.png", self.stem(date)))
    }

    pub fn progress_path(&self, date: NaiveDate) -> PathBuf {
        self.tree.day_dir(date).join(format!("{}.json", self.stem(date)))
    }

    /// Persists raster then progress; a crash between the two leaves a
    /// progress record that is behind the raster, never ahead of it.
    pub fn save(&self, keogram: &Keogram) -> StageResult<()> {
        let date = keogram.date();
        png::write_rgb8(&self.raster_path(date), keogram.raster())?;
        let record = ProgressRecord {
            date,
            last_minute: keogram.last_minute(),
        };
        let path = self.progress_path(date);
        let bytes = serde_json::to_vec_pretty(&record)
            .map_err(|e| StageError::State(format!("{}: {}", path.display(), e)))?;
        fsio::write_bytes_atomic(&path, &bytes)
    }

    pub fn write_render(&self, date: NaiveDate, image: &RgbImage) -> StageResult<PathBuf> {
        let path = self.render_path(date);
        png::write_rgb8(&path, image)?;
        Ok(path)
    }

    /// Loads the persisted keogram for `date`, `Ok(None)` when none exists.
    ///
    /// Without a progress record every minute elapsed at `now` is taken as
    /// already filled.
    pub fn load(
        &self,
        date: NaiveDate,
        height: u32,
        now: NaiveDateTime,
    ) -> StageResult<Option<Keogram>> {
        let raster_path = self.raster_path(date);
        if !raster_path.exists() {
            return Ok(None);
        }
        let raster = png::read_rgb8(&raster_path)?;
        if raster.height() != height {
            return Err(StageError::Shape {
                path: raster_path,
                expected: format!("{} rows", height),
                found: format!("{} rows", raster.height()),
            });
        }

        let progress_path = self.progress_path(date);
        let last_minute = if progress_path.exists() {
            let bytes = fs::read(&progress_path).map_err(|e| StageError::io(&progress_path, e))?;
            let record: ProgressRecord = serde_json::from_slice(&bytes)
                .map_err(|e| StageError::State(format!("{}: {}", progress_path.display(), e)))?;
            if record.date != date {
                return Err(StageError::State(format!(
                    "{} records {} instead of {}",
                    progress_path.display(),
                    record.date,
                    date
                )));
            }
            record.last_minute
        } else {
            elapsed_minutes(date, now).checked_sub(1)
        };
        Keogram::from_parts(date, raster, last_minute).map(Some)
    }
}

/// Lays EmissionColumns into the current day's keogram and re-renders it.
pub struct KeogramAssembler {
    columns: ColumnTree,
    store: KeogramStore,
    config: KeogramConfig,
    renderer: KeogramRenderer,
    current: Option<Keogram>,
    feed: Option<LiveFeed>,
    logger: LogManager,
    metrics: MetricsRecorder,
}

impl KeogramAssembler {
    pub fn new(
        columns: DatedTree,
        keograms: DatedTree,
        prefix: impl Into<String>,
        config: KeogramConfig,
    ) -> Self {
        let prefix = prefix.into();
        Self {
            columns: ColumnTree::new(columns, prefix.clone(), config.column_height),
            store: KeogramStore::new(keograms, prefix),
            renderer: KeogramRenderer::new(),
            config,
            current: None,
            feed: None,
            logger: LogManager::new("assembler"),
            metrics: MetricsRecorder::new(),
        }
    }

    pub fn with_feed(mut self, feed: LiveFeed) -> Self {
        self.feed = Some(feed);
        self
    }

    pub fn store(&self) -> &KeogramStore {
        &self.store
    }

    pub fn current(&self) -> Option<&Keogram> {
        self.current.as_ref()
    }

    fn load_or_fresh(&self, date: NaiveDate, now: NaiveDateTime) -> Keogram {
        match self.store.load(date, self.config.column_height, now) {
            Ok(Some(keogram)) => {
                self.logger.record(&format!(
                    "resumed keogram {} at minute {:?}",
                    date,
                    keogram.last_minute()
                ));
                keogram
            }
            Ok(None) => Keogram::fresh(date, self.config.column_height),
            Err(err) => {
                self.logger
                    .warn(&format!("starting {} fresh: {}", date, err));
                Keogram::fresh(date, self.config.column_height)
            }
        }
    }

    /// The instant the keogram has caught up to: `settle_minutes` behind
    /// `now`, so the newest minutes wait for their columns.
    pub fn settled(&self, now: NaiveDateTime) -> NaiveDateTime {
        now - Duration::minutes(self.config.settle_minutes as i64)
    }

    /// Picks the keogram to work on after a start. Shortly after midnight an
    /// unfinished prior day takes precedence over today.
    pub fn restore(&self, now: NaiveDateTime) -> Keogram {
        let today = now.date();
        let settled = self.settled(now);
        if minute_of_day(now) < self.config.rollover_window_minutes {
            if let Some(yesterday) = today.checked_sub_signed(Duration::days(1)) {
                match self.store.load(yesterday, self.config.column_height, settled) {
                    Ok(Some(previous)) if !previous.is_complete() => {
                        self.logger.record(&format!(
                            "finishing {} from minute {:?}",
                            yesterday,
                            previous.last_minute()
                        ));
                        return previous;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        self.logger
                            .warn(&format!("cannot finish {}: {}", yesterday, err));
                    }
                }
            }
        }
        self.load_or_fresh(today, settled)
    }

    fn title(&self, date: NaiveDate) -> String {
        format!("{} {}", self.config.title, date.format("%Y-%m-%d"))
    }

    /// Saves the raster and progress, then writes and mirrors the render.
    pub fn persist(&self, keogram: &Keogram) -> StageResult<PathBuf> {
        self.store.save(keogram)?;
        let image = self
            .renderer
            .render(keogram.raster(), &self.title(keogram.date()))?;
        let path = self.store.write_render(keogram.date(), &image)?;
        if let Some(feed) = &self.feed {
            if let Err(err) = feed.mirror(&path) {
                self.logger.warn(&format!("keogram feed not updated: {}", err));
            }
        }
        Ok(path)
    }

    fn advance_and_persist(
        &self,
        keogram: &mut Keogram,
        now: NaiveDateTime,
    ) -> StageResult<PathBuf> {
        let counts = keogram.advance(&self.columns, now);
        for _ in 0..counts.copied {
            self.metrics.record_processed();
        }
        for _ in 0..counts.blanked {
            self.metrics.record_skipped();
        }
        if counts.copied + counts.blanked > 0 {
            self.logger.detail(&format!(
                "{}: {} column(s) copied, {} blank, through minute {:?}",
                keogram.date(),
                counts.copied,
                counts.blanked,
                keogram.last_minute()
            ));
        }
        self.persist(keogram)
    }

    fn cycle(&self, keogram: &mut Keogram, now: NaiveDateTime) -> StageResult<Vec<PathBuf>> {
        let settled = self.settled(now);
        let mut written = Vec::new();
        if keogram.date() > now.date() {
            self.logger.warn(&format!(
                "clock is behind keogram {}; reloading {}",
                keogram.date(),
                now.date()
            ));
            *keogram = self.load_or_fresh(now.date(), settled);
        } else if keogram.date() < settled.date() {
            written.push(self.advance_and_persist(keogram, settled)?);
            self.logger.record(&format!("closed keogram {}", keogram.date()));
            *keogram = self.load_or_fresh(settled.date(), settled);
        }
        written.push(self.advance_and_persist(keogram, settled)?);
        Ok(written)
    }

    /// Assembles and renders the complete keogram of a past `date` from
    /// scratch, examining all of its minutes.
    pub fn rebuild_day(&self, date: NaiveDate) -> StageResult<PathBuf> {
        let mut keogram = Keogram::fresh(date, self.config.column_height);
        let counts = keogram.advance_through(&self.columns, MINUTES_PER_DAY);
        let path = self.persist(&keogram)?;
        self.logger.record(&format!(
            "rebuilt keogram {}: {} column(s), {} blank",
            date, counts.copied, counts.blanked
        ));
        Ok(path)
    }
}

impl PipelineStage for KeogramAssembler {
    fn name(&self) -> &'static str {
        self.logger.stage()
    }

    fn initialize(&mut self, now: NaiveDateTime) -> StageResult<()> {
        self.config.validate()?;
        let root = self.store.tree().root();
        fs::create_dir_all(root).map_err(|e| StageError::io(root, e))?;
        self.current = Some(self.restore(now));
        Ok(())
    }

    fn execute(&mut self, now: NaiveDateTime) -> StageResult<StageOutput> {
        let before = self.metrics.snapshot();
        let mut keogram = match self.current.take() {
            Some(keogram) => keogram,
            None => self.restore(now),
        };
        let outcome = self.cycle(&mut keogram, now);
        let notes = vec![format!(
            "keogram {} through minute {:?}",
            keogram.date(),
            keogram.last_minute()
        )];
        self.current = Some(keogram);
        let written = outcome?;
        let cycle = self.metrics.snapshot().since(&before);
        Ok(StageOutput {
            written,
            metadata: StageMetadata {
                processed: cycle.processed,
                skipped: cycle.skipped,
                failed: cycle.failed,
                notes,
            },
        })
    }

    fn cleanup(&mut self) {
        self.current = None;
    }
}
