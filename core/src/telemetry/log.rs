use log::{debug, error, info, warn};

/// Stage-scoped logger; every record is prefixed with the stage name.
#[derive(Debug, Clone, Copy)]
pub struct LogManager {
    stage: &'static str,
}

impl LogManager {
    pub fn new(stage: &'static str) -> Self {
        Self { stage }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn record(&self, message: &str) {
        info!("[{}] {}", self.stage, message);
    }

    pub fn detail(&self, message: &str) {
        debug!("[{}] {}", self.stage, message);
    }

    pub fn warn(&self, message: &str) {
        warn!("[{}] {}", self.stage, message);
    }

    pub fn error(&self, message: &str) {
        error!("[{}] {}", self.stage, message);
    }
}
