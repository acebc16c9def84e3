use crate::catalog::{minute_of_day, DatedTree, Ledger, MinuteKey};
use crate::config::{ExtractorConfig, LineAxis};
use crate::imaging::png;
use crate::math::{median_filter_3x3, subtract_background};
use crate::prelude::{PipelineStage, StageError, StageMetadata, StageOutput, StageResult};
use crate::telemetry::{LogManager, MetricsRecorder};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use image::imageops::{self, FilterType};
use image::{Rgb, Rgb32FImage, RgbImage};
use ndarray::{s, Array1, Array2, Axis};
use std::fs;
use std::path::{Path, PathBuf};

const FULL_SCALE: f32 = 65535.0;
const BAND_HALF_WIDTH: usize = 1;

/// One minute's trace: `height` rows by one column, south horizon in row 0.
#[derive(Debug, Clone, PartialEq)]
pub struct EmissionColumn {
    pub minute: MinuteKey,
    pub pixels: RgbImage,
}

/// Converts a 16-bit averaged frame into an RGB emission column.
pub fn column_from_frame(frame: &Array2<u16>, config: &ExtractorConfig) -> StageResult<RgbImage> {
    let mut counts = median_filter_3x3(&frame.mapv(f32::from));
    subtract_background(&mut counts, config.background_patch);

    // lay the frame out as (line axis, spatial axis)
    let counts = match config.line_axis {
        LineAxis::Rows => counts.view(),
        LineAxis::Columns => counts.t(),
    };
    let (line_extent, spatial_extent) = counts.dim();
    let fov = config.fov;
    if fov.end > spatial_extent || fov.start >= fov.end {
        return Err(StageError::Shape {
            path: PathBuf::new(),
            expected: format!("field of view {}..{}", fov.start, fov.end),
            found: format!("spatial extent {spatial_extent}"),
        });
    }

    let mut profiles = Vec::with_capacity(3);
    for (channel, centre) in config.lines.centres().into_iter().enumerate() {
        if centre >= line_extent {
            return Err(StageError::Shape {
                path: PathBuf::new(),
                expected: format!("emission line at {centre}"),
                found: format!("line extent {line_extent}"),
            });
        }
        let low = centre.saturating_sub(BAND_HALF_WIDTH);
        let high = (centre + BAND_HALF_WIDTH + 1).min(line_extent);
        let band = counts.slice(s![low..high, fov.start..fov.end]);
        let profile: Array1<f32> = band
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(fov.end - fov.start));
        let scale = config.channel_scale[channel];
        profiles.push(profile.mapv(|v| (v * scale / FULL_SCALE).clamp(0.0, 1.0)));
    }

    let length = (fov.end - fov.start) as u32;
    let trace = Rgb32FImage::from_fn(1, length, |_, y| {
        let y = y as usize;
        Rgb([profiles[0][y], profiles[1][y], profiles[2][y]])
    });
    let trace = if length == config.column_height {
        trace
    } else {
        imageops::resize(&trace, 1, config.column_height, FilterType::Lanczos3)
    };

    Ok(RgbImage::from_fn(1, config.column_height, |x, y| {
        let Rgb(values) = *trace.get_pixel(x, y);
        Rgb(values.map(|v| (v.clamp(0.0, 1.0) * 255.0) as u8))
    }))
}

/// Turns each AveragedFrame into an EmissionColumn file under the same dated
/// layout.
pub struct EmissionExtractor {
    averaged: DatedTree,
    columns: DatedTree,
    prefix: String,
    config: ExtractorConfig,
    ledger: Ledger,
    current_day: Option<NaiveDate>,
    logger: LogManager,
    metrics: MetricsRecorder,
}

impl EmissionExtractor {
    pub fn new(
        averaged: DatedTree,
        columns: DatedTree,
        prefix: impl Into<String>,
        config: ExtractorConfig,
    ) -> Self {
        Self {
            averaged,
            columns,
            prefix: prefix.into(),
            config,
            ledger: Ledger::new(),
            current_day: None,
            logger: LogManager::new("extractor"),
            metrics: MetricsRecorder::new(),
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn column_path(&self, key: MinuteKey) -> PathBuf {
        self.columns.minute_path(&self.prefix, key)
    }

    /// Decodes and reduces one AveragedFrame. Any failure means the frame is
    /// unusable; the caller decides whether to retry.
    pub fn extract_column(&self, path: &Path) -> StageResult<RgbImage> {
        let frame = png::read_gray16(path)?;
        column_from_frame(&frame, &self.config).map_err(|err| match err {
            StageError::Shape {
                expected, found, ..
            } => StageError::Shape {
                path: path.to_path_buf(),
                expected,
                found,
            },
            other => other,
        })
    }

    /// Dates whose averaged directories are scanned at `now`.
    pub fn scan_dates(&self, now: NaiveDateTime) -> Vec<NaiveDate> {
        let today = now.date();
        let mut dates = Vec::with_capacity(2);
        if minute_of_day(now) < self.config.rollover_window_minutes {
            if let Some(yesterday) = today.checked_sub_signed(Duration::days(1)) {
                dates.push(yesterday);
            }
        }
        dates.push(today);
        dates
    }

    /// Extracts every new minute found in the scanned dates.
    pub fn extract_pending(&mut self, now: NaiveDateTime) -> StageResult<Vec<EmissionColumn>> {
        let today = now.date();
        if self.current_day != Some(today) {
            if let Some(yesterday) = today.checked_sub_signed(Duration::days(1)) {
                self.ledger.retain_from(yesterday);
            }
            self.current_day = Some(today);
        }

        let mut extracted = Vec::new();
        for date in self.scan_dates(now) {
            let (frames, rejected) = self.averaged.list_day(date)?;
            for path in rejected {
                self.logger
                    .detail(&format!("ignoring {}", path.display()));
            }
            for (name, path) in frames {
                let key = name.minute();
                if self.ledger.contains(&key) {
                    continue;
                }
                if self.column_path(key).exists() {
                    self.ledger.insert(key);
                    continue;
                }
                if let Some(column) = self.process_minute(key, &path) {
                    extracted.push(column);
                }
            }
        }

        Ok(extracted)
    }

    fn process_minute(&mut self, key: MinuteKey, path: &Path) -> Option<EmissionColumn> {
        let pixels = match self.extract_column(path) {
            Ok(pixels) => pixels,
            Err(err) => {
                // a corrupt averaged frame never heals; do not retry it
                self.ledger.insert(key);
                self.metrics.record_failed();
                self.logger.warn(&format!("no column for {}: {}", key, err));
                return None;
            }
        };
        let target = self.column_path(key);
        if let Err(err) = png::write_rgb8(&target, &pixels) {
            self.metrics.record_failed();
            self.logger
                .error(&format!("column {} not written: {}", key, err));
            return None;
        }
        self.ledger.insert(key);
        self.metrics.record_processed();
        self.logger.detail(&format!("wrote {}", target.display()));
        Some(EmissionColumn {
            minute: key,
            pixels,
        })
    }

    /// Re-extracts every AveragedFrame of `date`, overwriting existing columns.
    pub fn reprocess_day(&mut self, date: NaiveDate) -> StageResult<Vec<PathBuf>> {
        let (frames, _) = self.averaged.list_day(date)?;
        let mut written = Vec::with_capacity(frames.len());
        for (name, path) in frames {
            let key = name.minute();
            match self.extract_column(&path) {
                Ok(pixels) => {
                    let target = self.column_path(key);
                    png::write_rgb8(&target, &pixels)?;
                    self.ledger.insert(key);
                    written.push(target);
                }
                Err(err) => {
                    self.metrics.record_failed();
                    self.logger.warn(&format!("no column for {}: {}", key, err));
                }
            }
        }
        self.logger.record(&format!(
            "rebuilt {} column(s) for {}",
            written.len(),
            date
        ));
        Ok(written)
    }
}

impl PipelineStage for EmissionExtractor {
    fn name(&self) -> &'static str {
        self.logger.stage()
    }

    fn initialize(&mut self, _now: NaiveDateTime) -> StageResult<()> {
        self.config.validate()?;
        for dir in [self.averaged.root(), self.columns.root()] {
            fs::create_dir_all(dir).map_err(|e| StageError::io(dir, e))?;
        }
        Ok(())
    }

    fn execute(&mut self, now: NaiveDateTime) -> StageResult<StageOutput> {
        let before = self.metrics.snapshot();
        let columns = self.extract_pending(now)?;
        let cycle = self.metrics.snapshot().since(&before);
        Ok(StageOutput {
            written: columns
                .iter()
                .map(|column| self.column_path(column.minute))
                .collect(),
            metadata: StageMetadata {
                processed: cycle.processed,
                skipped: cycle.skipped,
                failed: cycle.failed,
                notes: Vec::new(),
            },
        })
    }

    fn cleanup(&mut self) {
        self.ledger.clear();
        self.current_day = None;
    }
}
