//! Tunables for each stage. Every field has a default so partial YAML files
//! deserialize cleanly.

use crate::catalog::{CloseRule, MINUTES_PER_DAY};
use crate::prelude::{StageError, StageResult};
use crate::schedule::Cadence;
use serde::{Deserialize, Serialize};

pub const DEFAULT_PREFIX: &str = "MISS2";
pub const DEFAULT_COLUMN_HEIGHT: u32 = 300;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AggregatorConfig {
    pub close: CloseRule,
    /// Only the earliest N frames of a bucket are averaged when set.
    pub max_frames_per_bucket: Option<usize>,
    pub cadence: Cadence,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            close: CloseRule::default(),
            max_frames_per_bucket: None,
            cadence: Cadence::every(30),
        }
    }
}

impl AggregatorConfig {
    pub fn validate(&self) -> StageResult<()> {
        if self.close.grace_seconds >= 60 {
            return Err(StageError::Config(format!(
                "grace_seconds must be below 60, got {}",
                self.close.grace_seconds
            )));
        }
        if self.max_frames_per_bucket == Some(0) {
            return Err(StageError::Config(
                "max_frames_per_bucket must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Which image axis the emission lines run along.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineAxis {
    /// Each line is a pixel row; the field of view is a column range.
    Rows,
    /// Each line is a pixel column; the field of view is a row range.
    Columns,
}

/// Centre positions of the three monitored lines, in output channel order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmissionLines {
    /// 630.0 nm
    pub red: usize,
    /// 557.7 nm
    pub green: usize,
    /// 427.8 nm
    pub blue: usize,
}

impl EmissionLines {
    pub fn centres(&self) -> [usize; 3] {
        [self.red, self.green, self.blue]
    }
}

/// Horizon-to-horizon crop along the spatial axis, `start..end`, south first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldOfView {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExtractorConfig {
    pub line_axis: LineAxis,
    pub lines: EmissionLines,
    pub fov: FieldOfView,
    /// Edge length of the dark top-left calibration patch.
    pub background_patch: usize,
    /// Red, green, blue gain applied before normalization.
    pub channel_scale: [f32; 3],
    pub column_height: u32,
    /// Minutes after midnight during which the previous day is still scanned.
    pub rollover_window_minutes: usize,
    pub cadence: Cadence,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            line_axis: LineAxis::Rows,
            lines: EmissionLines {
                red: 405,
                green: 300,
                blue: 120,
            },
            fov: FieldOfView {
                start: 125,
                end: 542,
            },
            background_patch: 30,
            channel_scale: [1.0, 1.0, 1.0],
            column_height: DEFAULT_COLUMN_HEIGHT,
            rollover_window_minutes: 15,
            cadence: Cadence::every(60),
        }
    }
}

impl ExtractorConfig {
    pub fn validate(&self) -> StageResult<()> {
        if self.fov.end <= self.fov.start {
            return Err(StageError::Config(format!(
                "field of view {}..{} is empty",
                self.fov.start, self.fov.end
            )));
        }
        if self.column_height == 0 {
            return Err(StageError::Config("column_height must be positive".into()));
        }
        if self.channel_scale.iter().any(|s| !s.is_finite() || *s < 0.0) {
            return Err(StageError::Config(
                "channel_scale entries must be finite and non-negative".into(),
            ));
        }
        if self.rollover_window_minutes > MINUTES_PER_DAY {
            return Err(StageError::Config(
                "rollover_window_minutes exceeds one day".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct KeogramConfig {
    pub title: String,
    pub column_height: u32,
    /// Minutes after midnight during which an unfinished prior day is resumed.
    pub rollover_window_minutes: usize,
    /// How far behind the clock the keogram runs, so a minute is only examined
    /// once its bucket has closed and its column has been extracted.
    pub settle_minutes: usize,
    pub cadence: Cadence,
}

impl Default for KeogramConfig {
    fn default() -> Self {
        Self {
            title: "Meridian Imaging Svalbard Spectrograph II (KHO/UNIS)".into(),
            column_height: DEFAULT_COLUMN_HEIGHT,
            rollover_window_minutes: 15,
            settle_minutes: 2,
            cadence: Cadence::every(300),
        }
    }
}

impl KeogramConfig {
    pub fn validate(&self) -> StageResult<()> {
        if self.column_height == 0 {
            return Err(StageError::Config("column_height must be positive".into()));
        }
        if self.rollover_window_minutes > MINUTES_PER_DAY {
            return Err(StageError::Config(
                "rollover_window_minutes exceeds one day".into(),
            ));
        }
        if self.settle_minutes > self.rollover_window_minutes {
            return Err(StageError::Config(format!(
                "settle_minutes {} is longer than rollover_window_minutes {}",
                self.settle_minutes, self.rollover_window_minutes
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        AggregatorConfig::default().validate().unwrap();
        ExtractorConfig::default().validate().unwrap();
        KeogramConfig::default().validate().unwrap();
    }

    #[test]
    fn empty_field_of_view_is_rejected() {
        let config = ExtractorConfig {
            fov: FieldOfView { start: 10, end: 10 },
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(StageError::Config(_))));
    }

    #[test]
    fn zero_frame_window_is_rejected() {
        let config = AggregatorConfig {
            max_frames_per_bucket: Some(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn settle_lag_must_fit_the_rollover_window() {
        let config = KeogramConfig {
            settle_minutes: 20,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(StageError::Config(_))));
    }
}
