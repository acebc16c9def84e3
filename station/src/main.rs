use anyhow::Context;
use chrono::{Duration, NaiveDate, NaiveDateTime, Timelike, Utc};
use clap::{Parser, Subcommand};
use generator::frames::write_frames;
use log::info;
use std::path::PathBuf;
use tokio::runtime::Builder as TokioBuilder;
use workflow::config::StationConfig;
use workflow::runner::{Runner, StageKind};

mod generator;
mod workflow;

#[derive(Parser)]
#[command(author, version, about = "Spectrograph keogram pipeline driver")]
struct Args {
    /// Load the station config from YAML
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Override the data root directory
    #[arg(long, global = true)]
    root: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run stage loops until Ctrl+C (all stages unless some are named)
    Run {
        #[arg(long = "stage", value_enum)]
        stages: Vec<StageKind>,
    },
    /// Run one cycle of one stage
    Once {
        #[arg(long, value_enum)]
        stage: StageKind,
        /// UTC instant to run at, e.g. 2024-01-01T12:01:05 (defaults to now)
        #[arg(long)]
        now: Option<NaiveDateTime>,
    },
    /// Rebuild columns and the keogram of a past UTC date
    Rebuild {
        #[arg(long)]
        date: NaiveDate,
    },
    /// Write synthetic frames into the staging directory
    Synthesize {
        #[arg(long, default_value_t = 4)]
        count: usize,
        /// First capture instant (defaults to the start of the current minute)
        #[arg(long)]
        start: Option<NaiveDateTime>,
        /// Seconds between frames
        #[arg(long, default_value_t = 10)]
        interval: i64,
        #[arg(long)]
        seed: Option<u64>,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => StationConfig::load(path)?,
        None => StationConfig::default(),
    };
    if let Some(root) = args.root {
        config = config.with_root(root);
    }
    config.validate().context("validating station config")?;
    let runner = Runner::new(config);

    match args.command {
        Command::Run { stages } => {
            let stages = if stages.is_empty() {
                StageKind::ALL.to_vec()
            } else {
                stages
            };
            let runtime = TokioBuilder::new_multi_thread()
                .enable_all()
                .build()
                .context("creating runtime for stage loops")?;
            runtime.block_on(runner.serve(&stages))?;
        }
        Command::Once { stage, now } => {
            let now = now.unwrap_or_else(|| Utc::now().naive_utc());
            let output = runner.run_once(stage, now)?;
            for path in &output.written {
                println!("{}", path.display());
            }
        }
        Command::Rebuild { date } => {
            let path = runner.rebuild(date)?;
            println!("{}", path.display());
        }
        Command::Synthesize {
            count,
            start,
            interval,
            seed,
        } => {
            let start = match start {
                Some(start) => start,
                None => Utc::now()
                    .naive_utc()
                    .with_second(0)
                    .and_then(|t| t.with_nanosecond(0))
                    .context("truncating current time to the minute")?,
            };
            let mut synthetic = runner.config().synthetic.clone();
            if let Some(seed) = seed {
                synthetic.seed = seed;
            }
            let staging = runner.config().paths.staging();
            let written = write_frames(
                &synthetic,
                &staging,
                &runner.config().naming.prefix,
                start,
                count,
                Duration::seconds(interval),
            )?;
            info!("wrote {} synthetic frame(s) into {}", written.len(), staging.display());
        }
    }

    Ok(())
}
