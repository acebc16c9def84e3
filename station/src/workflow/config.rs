use crate::generator::frames::GeneratorConfig;
use anyhow::Context;
use keocore::catalog::DatedTree;
use keocore::config::{AggregatorConfig, ExtractorConfig, KeogramConfig, DEFAULT_PREFIX};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Directory layout of a station. Unset directories default to fixed names
/// under `root`; relative overrides are resolved against `root` too.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub root: PathBuf,
    pub staging: Option<PathBuf>,
    pub archive: Option<PathBuf>,
    pub averaged: Option<PathBuf>,
    pub columns: Option<PathBuf>,
    pub keograms: Option<PathBuf>,
    pub keogram_feed: Option<PathBuf>,
    pub frame_feed: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data"),
            staging: None,
            archive: None,
            averaged: None,
            columns: None,
            keograms: None,
            keogram_feed: None,
            frame_feed: None,
        }
    }
}

impl PathsConfig {
    fn resolve(&self, configured: &Option<PathBuf>, default: &str) -> PathBuf {
        match configured {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => self.root.join(path),
            None => self.root.join(default),
        }
    }

    pub fn staging(&self) -> PathBuf {
        self.resolve(&self.staging, "staging")
    }

    pub fn archive(&self) -> DatedTree {
        DatedTree::new(self.resolve(&self.archive, "raw"))
    }

    pub fn averaged(&self) -> DatedTree {
        DatedTree::new(self.resolve(&self.averaged, "averaged"))
    }

    pub fn columns(&self) -> DatedTree {
        DatedTree::new(self.resolve(&self.columns, "columns"))
    }

    pub fn keograms(&self) -> DatedTree {
        DatedTree::new(self.resolve(&self.keograms, "keograms"))
    }

    pub fn keogram_feed(&self) -> Option<PathBuf> {
        self.keogram_feed
            .as_ref()
            .map(|_| self.resolve(&self.keogram_feed, "feed"))
    }

    pub fn frame_feed(&self) -> Option<PathBuf> {
        self.frame_feed
            .as_ref()
            .map(|_| self.resolve(&self.frame_feed, "feed"))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingConfig {
    pub prefix: String,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.into(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StationConfig {
    pub paths: PathsConfig,
    pub naming: NamingConfig,
    pub aggregator: AggregatorConfig,
    pub extractor: ExtractorConfig,
    pub keogram: KeogramConfig,
    pub synthetic: GeneratorConfig,
}

impl StationConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("reading station config {}", path_ref.display()))?;
        let config: StationConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing station config {}", path_ref.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_root(mut self, root: PathBuf) -> Self {
        self.paths.root = root;
        self
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.naming.prefix.is_empty() || self.naming.prefix.contains('/') {
            anyhow::bail!("invalid frame prefix {:?}", self.naming.prefix);
        }
        self.aggregator
            .validate()
            .context("validating aggregator section")?;
        self.extractor
            .validate()
            .context("validating extractor section")?;
        self.keogram.validate().context("validating keogram section")?;
        if self.extractor.column_height != self.keogram.column_height {
            anyhow::bail!(
                "extractor column_height {} differs from keogram column_height {}",
                self.extractor.column_height,
                self.keogram.column_height
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keocore::catalog::ClosePolicy;
    use keocore::config::LineAxis;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn default_layout_sits_under_root() {
        let cfg = StationConfig::default().with_root(PathBuf::from("/srv/miss2"));
        assert_eq!(cfg.paths.staging(), PathBuf::from("/srv/miss2/staging"));
        assert_eq!(cfg.paths.columns().root(), Path::new("/srv/miss2/columns"));
        assert_eq!(cfg.paths.keogram_feed(), None);
        cfg.validate().unwrap();
    }

    #[test]
    fn config_load_reads_partial_yaml() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(
            b"paths:\n  root: /srv/miss2\n  keogram_feed: web/keogram\n\
              aggregator:\n  close:\n    policy: next_minute\n  max_frames_per_bucket: 6\n\
              extractor:\n  line_axis: columns\n",
        )
        .unwrap();
        let path = temp.into_temp_path();
        let cfg = StationConfig::load(&path).unwrap();
        assert_eq!(cfg.aggregator.close.policy, ClosePolicy::NextMinute);
        assert_eq!(cfg.aggregator.close.grace_seconds, 30);
        assert_eq!(cfg.aggregator.max_frames_per_bucket, Some(6));
        assert_eq!(cfg.extractor.line_axis, LineAxis::Columns);
        assert_eq!(cfg.extractor.column_height, 300);
        assert_eq!(cfg.naming.prefix, "MISS2");
        assert_eq!(
            cfg.paths.keogram_feed(),
            Some(PathBuf::from("/srv/miss2/web/keogram"))
        );
    }

    #[test]
    fn mismatched_column_heights_are_rejected() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(b"keogram:\n  column_height: 200\n").unwrap();
        let path = temp.into_temp_path();
        assert!(StationConfig::load(&path).is_err());
    }
}
