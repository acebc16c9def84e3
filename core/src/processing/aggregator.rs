use crate::catalog::{bucket_frames, classify, DatedTree, Ledger, MinuteKey, StagedFrame};
use crate::config::AggregatorConfig;
use crate::fsio;
use crate::imaging::png;
use crate::prelude::{PipelineStage, StageError, StageMetadata, StageOutput, StageResult};
use crate::processing::feed::LiveFeed;
use crate::telemetry::{LogManager, MetricsRecorder};
use chrono::{Duration, NaiveDateTime};
use ndarray::{Array2, Zip};
use std::fs;
use std::path::PathBuf;

/// One written per-minute mean frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AveragedFrame {
    pub minute: MinuteKey,
    pub frame_count: usize,
    pub path: PathBuf,
}

/// Buckets staged frames per UTC minute and writes one mean frame per closed
/// bucket, archiving the raw inputs.
///
/// A minute counts as processed once its AveragedFrame exists on disk; the
/// in-memory ledger only caches that fact.
pub struct MinuteAggregator {
    staging: PathBuf,
    archive: DatedTree,
    output: DatedTree,
    prefix: String,
    config: AggregatorConfig,
    ledger: Ledger,
    feed: Option<LiveFeed>,
    logger: LogManager,
    metrics: MetricsRecorder,
}

impl MinuteAggregator {
    pub fn new(
        staging: impl Into<PathBuf>,
        archive: DatedTree,
        output: DatedTree,
        prefix: impl Into<String>,
        config: AggregatorConfig,
    ) -> Self {
        Self {
            staging: staging.into(),
            archive,
            output,
            prefix: prefix.into(),
            config,
            ledger: Ledger::new(),
            feed: None,
            logger: LogManager::new("aggregator"),
            metrics: MetricsRecorder::new(),
        }
    }

    pub fn with_feed(mut self, feed: LiveFeed) -> Self {
        self.feed = Some(feed);
        self
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn metrics(&self) -> &MetricsRecorder {
        &self.metrics
    }

    pub fn output_path(&self, key: MinuteKey) -> PathBuf {
        self.output.minute_path(&self.prefix, key)
    }

    /// Averages every closed, not yet processed bucket found in staging.
    pub fn aggregate(&mut self, now: NaiveDateTime) -> StageResult<Vec<AveragedFrame>> {
        let (frames, rejected) = classify(fsio::walk_files(&self.staging)?);
        for path in rejected {
            self.logger
                .warn(&format!("ignoring unrecognised file {}", path.display()));
            self.metrics.record_skipped();
        }

        let close = self.config.close;
        let mut written = Vec::new();
        for (key, bucket) in bucket_frames(frames) {
            if !close.is_closed(key, now) {
                continue;
            }

            if self.ledger.contains(&key) || self.output_path(key).exists() {
                self.ledger.insert(key);
                self.logger.warn(&format!(
                    "minute {} already averaged; archiving {} late frame(s)",
                    key,
                    bucket.len()
                ));
                self.archive_frames(&bucket);
                continue;
            }

            match self.average_bucket(key, &bucket) {
                Ok(Some(frame)) => written.push(frame),
                Ok(None) => {}
                Err(err) => {
                    self.metrics.record_failed();
                    self.logger
                        .error(&format!("minute {} not averaged: {}", key, err));
                }
            }
        }

        if let Some(horizon) = now.date().checked_sub_signed(Duration::days(2)) {
            self.ledger.retain_from(horizon);
        }
        Ok(written)
    }

    fn average_bucket(
        &mut self,
        key: MinuteKey,
        bucket: &[StagedFrame],
    ) -> StageResult<Option<AveragedFrame>> {
        let limit = self.config.max_frames_per_bucket.unwrap_or(usize::MAX);
        let mut sum: Option<Array2<f64>> = None;
        let mut count = 0usize;

        for frame in bucket {
            if count == limit {
                break;
            }
            let pixels = match png::read_gray16(&frame.path) {
                Ok(pixels) => pixels,
                Err(err) => {
                    self.metrics.record_skipped();
                    self.logger.warn(&format!("skipping frame: {}", err));
                    continue;
                }
            };
            let acc = sum.get_or_insert_with(|| Array2::zeros(pixels.dim()));
            if acc.dim() != pixels.dim() {
                self.metrics.record_skipped();
                self.logger.warn(&format!(
                    "skipping frame {}: {:?} does not match {:?}",
                    frame.path.display(),
                    pixels.dim(),
                    acc.dim()
                ));
                continue;
            }
            Zip::from(acc)
                .and(&pixels)
                .for_each(|total, &value| *total += f64::from(value));
            count += 1;
        }

        let sum = match sum {
            Some(sum) if count > 0 => sum,
            _ => {
                self.logger.warn(&format!(
                    "minute {} has no readable frames out of {}; retrying next cycle",
                    key,
                    bucket.len()
                ));
                return Ok(None);
            }
        };

        let divisor = count as f64;
        let averaged = sum.mapv(|total| (total / divisor) as u16);
        let path = self.output_path(key);
        png::write_gray16(&path, &averaged)?;
        self.ledger.insert(key);
        self.metrics.record_processed();
        self.logger.record(&format!(
            "averaged {} frame(s) for {} into {}",
            count,
            key,
            path.display()
        ));

        self.archive_frames(bucket);
        if let Some(feed) = &self.feed {
            if let Err(err) = feed.mirror(&path) {
                self.logger.warn(&format!("frame feed not updated: {}", err));
            }
        }

        Ok(Some(AveragedFrame {
            minute: key,
            frame_count: count,
            path,
        }))
    }

    fn archive_frames(&self, bucket: &[StagedFrame]) {
        for frame in bucket {
            let target = self.archive.frame_path(&frame.name);
            if let Err(err) = fsio::move_file(&frame.path, &target) {
                self.metrics.record_failed();
                self.logger.warn(&format!("archive failed: {}", err));
            }
        }
    }
}

impl PipelineStage for MinuteAggregator {
    fn name(&self) -> &'static str {
        self.logger.stage()
    }

    fn initialize(&mut self, _now: NaiveDateTime) -> StageResult<()> {
        self.config.validate()?;
        for dir in [self.staging.as_path(), self.archive.root(), self.output.root()] {
            fs::create_dir_all(dir).map_err(|e| StageError::io(dir, e))?;
        }
        Ok(())
    }

    fn execute(&mut self, now: NaiveDateTime) -> StageResult<StageOutput> {
        let before = self.metrics.snapshot();
        let frames = self.aggregate(now)?;
        let cycle = self.metrics.snapshot().since(&before);
        Ok(StageOutput {
            written: frames.iter().map(|frame| frame.path.clone()).collect(),
            metadata: StageMetadata {
                processed: cycle.processed,
                skipped: cycle.skipped,
                failed: cycle.failed,
                notes: vec![format!("ledger {} minute(s)", self.ledger.len())],
            },
        })
    }

    fn cleanup(&mut self) {
        self.ledger.clear();
    }
}
