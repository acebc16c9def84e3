use crate::workflow::config::StationConfig;
use anyhow::Context;
use chrono::{NaiveDate, NaiveDateTime, Utc};
use clap::ValueEnum;
use keocore::processing::{EmissionExtractor, KeogramAssembler, LiveFeed, MinuteAggregator};
use keocore::schedule::Cadence;
use keocore::{PipelineStage, StageOutput};
use log::{error, info, warn};
use std::fmt;
use std::path::PathBuf;
use tokio::signal;
use tokio::task::JoinSet;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ValueEnum)]
pub enum StageKind {
    Aggregator,
    Extractor,
    Assembler,
}

impl StageKind {
    pub const ALL: [StageKind; 3] = [
        StageKind::Aggregator,
        StageKind::Extractor,
        StageKind::Assembler,
    ];
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StageKind::Aggregator => "aggregator",
            StageKind::Extractor => "extractor",
            StageKind::Assembler => "assembler",
        };
        f.write_str(name)
    }
}

type BoxedStage = Box<dyn PipelineStage + Send>;

fn utc_now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

/// Builds the stages of a station from its configuration and drives them.
#[derive(Clone)]
pub struct Runner {
    config: StationConfig,
}

impl Runner {
    pub fn new(config: StationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StationConfig {
        &self.config
    }

    pub fn aggregator(&self) -> MinuteAggregator {
        let paths = &self.config.paths;
        let stage = MinuteAggregator::new(
            paths.staging(),
            paths.archive(),
            paths.averaged(),
            self.config.naming.prefix.clone(),
            self.config.aggregator.clone(),
        );
        match paths.frame_feed() {
            Some(dir) => stage.with_feed(LiveFeed::new(dir)),
            None => stage,
        }
    }

    pub fn extractor(&self) -> EmissionExtractor {
        let paths = &self.config.paths;
        EmissionExtractor::new(
            paths.averaged(),
            paths.columns(),
            self.config.naming.prefix.clone(),
            self.config.extractor.clone(),
        )
    }

    pub fn assembler(&self) -> KeogramAssembler {
        let paths = &self.config.paths;
        let stage = KeogramAssembler::new(
            paths.columns(),
            paths.keograms(),
            self.config.naming.prefix.clone(),
            self.config.keogram.clone(),
        );
        match paths.keogram_feed() {
            Some(dir) => stage.with_feed(LiveFeed::new(dir)),
            None => stage,
        }
    }

    pub fn build_stage(&self, kind: StageKind) -> BoxedStage {
        match kind {
            StageKind::Aggregator => Box::new(self.aggregator()),
            StageKind::Extractor => Box::new(self.extractor()),
            StageKind::Assembler => Box::new(self.assembler()),
        }
    }

    pub fn cadence(&self, kind: StageKind) -> Cadence {
        match kind {
            StageKind::Aggregator => self.config.aggregator.cadence,
            StageKind::Extractor => self.config.extractor.cadence,
            StageKind::Assembler => self.config.keogram.cadence,
        }
    }

    /// Runs a single cycle of one stage at `now`.
    pub fn run_once(&self, kind: StageKind, now: NaiveDateTime) -> anyhow::Result<StageOutput> {
        let mut stage = self.build_stage(kind);
        stage
            .initialize(now)
            .with_context(|| format!("initializing {kind} stage"))?;
        let output = stage
            .execute(now)
            .with_context(|| format!("executing {kind} stage"));
        stage.cleanup();
        let output = output?;
        info!("[{}] {}", kind, output.summary());
        Ok(output)
    }

    /// Re-extracts every averaged frame of `date` and renders its full keogram.
    pub fn rebuild(&self, date: NaiveDate) -> anyhow::Result<PathBuf> {
        let mut extractor = self.extractor();
        extractor
            .initialize(utc_now())
            .context("initializing extractor stage")?;
        let columns = extractor
            .reprocess_day(date)
            .with_context(|| format!("re-extracting columns for {date}"))?;
        let path = self
            .assembler()
            .rebuild_day(date)
            .with_context(|| format!("assembling keogram for {date}"))?;
        info!(
            "rebuilt {} from {} column(s) into {}",
            date,
            columns.len(),
            path.display()
        );
        Ok(path)
    }

    /// Builds, initializes and spawns the loop of one stage.
    fn spawn_stage(
        &self,
        loops: &mut JoinSet<StageKind>,
        kind: StageKind,
        now: NaiveDateTime,
    ) -> anyhow::Result<()> {
        let mut stage = self.build_stage(kind);
        stage
            .initialize(now)
            .with_context(|| format!("initializing {kind} stage"))?;
        loops.spawn(stage_loop(kind, stage, self.cadence(kind)));
        info!("[{}] started, every {}s", kind, self.cadence(kind).period_seconds);
        Ok(())
    }

    /// Hosts the selected stage loops until Ctrl+C. A loop that ends is
    /// restarted from freshly restored state.
    pub async fn serve(&self, kinds: &[StageKind]) -> anyhow::Result<()> {
        let mut loops = JoinSet::new();
        let now = utc_now();
        for &kind in kinds {
            self.spawn_stage(&mut loops, kind, now)?;
        }

        let shutdown = signal::ctrl_c();
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                signal = &mut shutdown => {
                    signal.context("awaiting Ctrl+C to exit")?;
                    info!("shutting down {} stage loop(s)", loops.len());
                    break;
                }
                Some(finished) = loops.join_next() => match finished {
                    Ok(kind) => {
                        if let Err(err) = self.restart(&mut loops, kind) {
                            error!("[{}] not restarted: {:#}", kind, err);
                        }
                    }
                    Err(err) => error!("stage loop ended unexpectedly: {}", err),
                },
            }
        }
        loops.shutdown().await;
        Ok(())
    }

    fn restart(&self, loops: &mut JoinSet<StageKind>, kind: StageKind) -> anyhow::Result<()> {
        warn!("[{}] loop ended; restarting", kind);
        self.spawn_stage(loops, kind, utc_now())
    }
}

/// Poll loop of one stage. Each cycle runs on the blocking pool so slow
/// decodes in one stage do not hold up the others. Returns when a cycle
/// panics, handing the kind back for a restart.
async fn stage_loop(kind: StageKind, stage: BoxedStage, cadence: Cadence) -> StageKind {
    let mut slot = Some(stage);
    loop {
        let Some(mut stage) = slot.take() else {
            return kind;
        };
        let now = utc_now();
        let joined = tokio::task::spawn_blocking(move || {
            let result = stage.execute(now);
            (stage, result)
        })
        .await;

        match joined {
            Ok((stage, result)) => {
                match result {
                    Ok(output) => info!("[{}] {}", kind, output.summary()),
                    Err(err) => warn!("[{}] cycle failed: {}", kind, err),
                }
                slot = Some(stage);
            }
            Err(err) => {
                error!("[{}] cycle aborted: {}", kind, err);
                return kind;
            }
        }

        tokio::time::sleep(cadence.delay_until_next(utc_now())).await;
    }
}
