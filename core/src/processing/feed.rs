use crate::fsio;
use crate::prelude::{StageError, StageResult};
use std::fs;
use std::path::{Path, PathBuf};

/// A directory that always holds exactly the latest artifact of a stage, for
/// an external page to display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveFeed {
    dir: PathBuf,
}

impl LiveFeed {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Clears the feed directory and copies `latest` into it.
    pub fn mirror(&self, latest: &Path) -> StageResult<PathBuf> {
        let name = latest
            .file_name()
            .ok_or_else(|| StageError::InvalidName(latest.display().to_string()))?;
        fs::create_dir_all(&self.dir).map_err(|e| StageError::io(&self.dir, e))?;
        for stale in fsio::list_files(&self.dir)? {
            fs::remove_file(&stale).map_err(|e| StageError::io(&stale, e))?;
        }
        let target = self.dir.join(name);
        let bytes = fs::read(latest).map_err(|e| StageError::io(latest, e))?;
        fsio::write_bytes_atomic(&target, &bytes)?;
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn mirror_keeps_only_the_latest_file() {
        let dir = TempDir::new().unwrap();
        let feed = LiveFeed::new(dir.path().join("feed"));
        let first = dir.path().join("keogram-a.png");
        let second = dir.path().join("keogram-b.png");
        fs::write(&first, b"one").unwrap();
        fs::write(&second, b"two").unwrap();

        feed.mirror(&first).unwrap();
        let target = feed.mirror(&second).unwrap();

        assert_eq!(fsio::list_files(feed.dir()).unwrap(), vec![target.clone()]);
        assert_eq!(fs::read(target).unwrap(), b"two");
    }
}
