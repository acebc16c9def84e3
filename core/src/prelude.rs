use chrono::NaiveDateTime;
use std::path::PathBuf;

/// Common error type for stage execution.
#[derive(thiserror::Error, Debug)]
pub enum StageError {
    #[error("i/o failure on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("image failure on {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("unexpected shape for {path}: expected {expected}, found {found}")]
    Shape {
        path: PathBuf,
        expected: String,
        found: String,
    },
    #[error("unrecognised file name: {0}")]
    InvalidName(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("persisted state failure: {0}")]
    State(String),
    #[error("render failure: {0}")]
    Render(String),
}

impl StageError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StageError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn image(path: impl Into<PathBuf>, source: image::ImageError) -> Self {
        StageError::Image {
            path: path.into(),
            source,
        }
    }
}

pub type StageResult<T> = Result<T, StageError>;

/// Per-cycle counters attached to a stage output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageMetadata {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub notes: Vec<String>,
}

/// Output produced by one stage cycle.
#[derive(Debug, Clone, Default)]
pub struct StageOutput {
    pub written: Vec<PathBuf>,
    pub metadata: StageMetadata,
}

impl StageOutput {
    pub fn summary(&self) -> String {
        let mut line = format!(
            "wrote {} file(s), processed {}, skipped {}, failed {}",
            self.written.len(),
            self.metadata.processed,
            self.metadata.skipped,
            self.metadata.failed
        );
        for note in &self.metadata.notes {
            line.push_str("; ");
            line.push_str(note);
        }
        line
    }
}

/// A long-running pipeline stage driven by a poll loop.
///
/// `now` is always passed in explicitly (UTC) so that a cycle is a function of
/// the filesystem state and the wall clock handed to it.
pub trait PipelineStage {
    fn name(&self) -> &'static str;
    fn initialize(&mut self, now: NaiveDateTime) -> StageResult<()>;
    fn execute(&mut self, now: NaiveDateTime) -> StageResult<StageOutput>;
    fn cleanup(&mut self);
}
