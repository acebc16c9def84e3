use crate::catalog::stamp::{FrameName, MinuteKey};
use crate::fsio;
use crate::prelude::{StageError, StageResult};
use chrono::{Datelike, NaiveDate};
use std::fs;
use std::path::{Path, PathBuf};

/// A stage root partitioned as `YYYY/MM/DD/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatedTree {
    root: PathBuf,
}

impl DatedTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn day_dir(&self, date: NaiveDate) -> PathBuf {
        self.root
            .join(format!("{:04}", date.year()))
            .join(format!("{:02}", date.month()))
            .join(format!("{:02}", date.day()))
    }

    pub fn ensure_day_dir(&self, date: NaiveDate) -> StageResult<PathBuf> {
        let dir = self.day_dir(date);
        fs::create_dir_all(&dir).map_err(|e| StageError::io(&dir, e))?;
        Ok(dir)
    }

    pub fn minute_path(&self, prefix: &str, key: MinuteKey) -> PathBuf {
        self.day_dir(key.date()).join(key.file_name(prefix))
    }

    /// Path a raw frame takes once archived under its capture date.
    pub fn frame_path(&self, name: &FrameName) -> PathBuf {
        self.day_dir(name.captured.date()).join(name.file_name())
    }

    /// Recognised artifacts of one day, in capture order. Unrecognised names
    /// are returned separately so the caller can report them.
    pub fn list_day(&self, date: NaiveDate) -> StageResult<(Vec<(FrameName, PathBuf)>, Vec<PathBuf>)> {
        let mut named = Vec::new();
        let mut rejected = Vec::new();
        for path in fsio::list_files(&self.day_dir(date))? {
            if fsio::is_hidden(&path) {
                continue;
            }
            let parsed = path
                .file_name()
                .and_then(|name| name.to_str())
                .map(FrameName::parse);
            match parsed {
                Some(Ok(name)) => named.push((name, path)),
                _ => rejected.push(path),
            }
        }
        named.sort_by(|a, b| a.0.captured.cmp(&b.0.captured).then_with(|| a.1.cmp(&b.1)));
        Ok((named, rejected))
    }
}
