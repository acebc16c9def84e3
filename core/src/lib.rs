//! Core of the spectrograph keogram pipeline.
//!
//! Staged frames are bucketed per UTC minute and averaged, each averaged frame
//! is reduced to a three-channel emission column, and the columns are laid out
//! into a day-long keogram. Stages only talk to each other through the
//! date-partitioned file tree described in [`catalog`].

pub mod catalog;
pub mod config;
pub mod fsio;
pub mod imaging;
pub mod math;
pub mod prelude;
pub mod processing;
pub mod schedule;
pub mod telemetry;

pub use prelude::{PipelineStage, StageError, StageOutput, StageResult};
