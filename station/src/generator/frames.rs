use anyhow::Context;
use chrono::{Duration, NaiveDateTime};
use keocore::catalog::FrameName;
use keocore::imaging::png;
use ndarray::Array2;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;
use std::path::{Path, PathBuf};

/// One emission row painted into synthetic frames.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SyntheticLine {
    pub row: usize,
    pub peak: f32,
    /// Gaussian sigma across rows, in pixels.
    pub width: f32,
}

/// Configuration for generating synthetic spectrograph frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub width: usize,
    pub height: usize,
    pub background: f32,
    pub noise: f32,
    pub seed: u64,
    pub lines: Vec<SyntheticLine>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            width: 695,
            height: 520,
            background: 2000.0,
            noise: 150.0,
            seed: 0,
            lines: vec![
                SyntheticLine {
                    row: 405,
                    peak: 9000.0,
                    width: 2.5,
                },
                SyntheticLine {
                    row: 300,
                    peak: 20000.0,
                    width: 2.5,
                },
                SyntheticLine {
                    row: 120,
                    peak: 5000.0,
                    width: 2.5,
                },
            ],
        }
    }
}

/// Builds one frame. `phase` shifts the auroral arc across the slit so
/// consecutive frames differ.
pub fn build_frame(config: &GeneratorConfig, rng: &mut StdRng, phase: f32) -> anyhow::Result<Array2<u16>> {
    let rows = config.height.max(1);
    let cols = config.width.max(1);
    rows.checked_mul(cols)
        .context("overflow computing pixel count for generator")?;

    let frame = Array2::from_shape_fn((rows, cols), |(r, c)| {
        let along = c as f32 / cols as f32;
        let arc = 0.3 + 0.7 * (PI * (along + phase)).sin().abs();
        let lines: f32 = config
            .lines
            .iter()
            .map(|line| {
                let offset = r as f32 - line.row as f32;
                let sigma = line.width.max(0.1);
                line.peak * (-(offset * offset) / (2.0 * sigma * sigma)).exp()
            })
            .sum();
        let jitter = if config.noise > 0.0 {
            rng.gen_range(-config.noise..config.noise)
        } else {
            0.0
        };
        (config.background + lines * arc + jitter).clamp(0.0, 65535.0) as u16
    });
    Ok(frame)
}

/// Writes `count` frames into `staging`, `interval` apart starting at `start`,
/// named as the camera would name them.
pub fn write_frames(
    config: &GeneratorConfig,
    staging: &Path,
    prefix: &str,
    start: NaiveDateTime,
    count: usize,
    interval: Duration,
) -> anyhow::Result<Vec<PathBuf>> {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut written = Vec::with_capacity(count);
    for index in 0..count {
        let captured = start + interval * index as i32;
        let frame = build_frame(config, &mut rng, index as f32 / 240.0)?;
        let path = staging.join(FrameName::new(prefix, captured).file_name());
        png::write_gray16(&path, &frame)
            .with_context(|| format!("writing synthetic frame {}", path.display()))?;
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use keocore::config::ExtractorConfig;
    use keocore::processing::column_from_frame;
    use tempfile::TempDir;

    #[test]
    fn frames_are_bright_on_the_configured_rows() {
        let config = GeneratorConfig {
            noise: 0.0,
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(1);
        let frame = build_frame(&config, &mut rng, 0.0).unwrap();
        assert_eq!(frame.dim(), (520, 695));
        assert!(frame[[300, 347]] > frame[[200, 347]]);
        assert_eq!(frame[[10, 10]], 2000);
    }

    #[test]
    fn default_frames_feed_the_default_extractor() {
        let mut rng = StdRng::seed_from_u64(7);
        let frame = build_frame(&GeneratorConfig::default(), &mut rng, 0.0).unwrap();
        let column = column_from_frame(&frame, &ExtractorConfig::default()).unwrap();
        assert_eq!(column.dimensions(), (1, 300));
        // green line is the brightest in the default scene
        let centre = column.get_pixel(0, 150);
        assert!(centre[1] > centre[0] && centre[1] > centre[2]);
    }

    #[test]
    fn write_frames_is_deterministic_per_seed() {
        let dir = TempDir::new().unwrap();
        let start = NaiveDateTime::parse_from_str("20240101-120010", "%Y%m%d-%H%M%S").unwrap();
        let config = GeneratorConfig {
            width: 16,
            height: 16,
            lines: Vec::new(),
            seed: 42,
            ..Default::default()
        };
        let first = write_frames(&config, &dir.path().join("a"), "MISS2", start, 4, Duration::seconds(10)).unwrap();
        let second = write_frames(&config, &dir.path().join("b"), "MISS2", start, 4, Duration::seconds(10)).unwrap();
        assert_eq!(first.len(), 4);
        assert!(first[3].ends_with("MISS2-20240101-120040.png"));
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(png::read_gray16(a).unwrap(), png::read_gray16(b).unwrap());
        }
    }
}
