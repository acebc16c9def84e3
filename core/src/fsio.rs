//! Filesystem helpers shared by every stage.
//!
//! Stages coordinate only through the file tree, so every write goes to a
//! temporary file in the destination directory and is renamed into place once
//! flushed. Readers therefore never observe a partially written artifact.

use crate::prelude::{StageError, StageResult};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Writes `path` atomically; `fill` receives a buffered writer over the temp file.
pub fn write_atomic<F>(path: &Path, fill: F) -> StageResult<()>
where
    F: FnOnce(&mut BufWriter<&mut File>) -> StageResult<()>,
{
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|e| StageError::io(parent, e))?;

    let mut temp = NamedTempFile::new_in(parent).map_err(|e| StageError::io(parent, e))?;
    {
        let mut writer = BufWriter::new(temp.as_file_mut());
        fill(&mut writer)?;
        writer.flush().map_err(|e| StageError::io(path, e))?;
    }
    temp.as_file()
        .sync_all()
        .map_err(|e| StageError::io(path, e))?;
    temp.persist(path)
        .map_err(|e| StageError::io(path, e.error))?;
    Ok(())
}

pub fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> StageResult<()> {
    write_atomic(path, |writer| {
        writer
            .write_all(bytes)
            .map_err(|e| StageError::io(path, e))
    })
}

/// Moves a file, falling back to copy + remove when a rename is not possible
/// (for instance across mount points).
pub fn move_file(from: &Path, to: &Path) -> StageResult<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).map_err(|e| StageError::io(parent, e))?;
    }
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    fs::copy(from, to).map_err(|e| StageError::io(from, e))?;
    fs::remove_file(from).map_err(|e| StageError::io(from, e))
}

/// Lists every regular file under `root`, sorted by path. A missing root is empty.
pub fn walk_files(root: &Path) -> StageResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    if !root.exists() {
        return Ok(files);
    }
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let entries = fs::read_dir(&dir).map_err(|e| StageError::io(&dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| StageError::io(&dir, e))?;
            let file_type = entry.file_type().map_err(|e| StageError::io(entry.path(), e))?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file() {
                files.push(entry.path());
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Lists the regular files directly inside `dir`, sorted. A missing dir is empty.
pub fn list_files(dir: &Path) -> StageResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    if !dir.exists() {
        return Ok(files);
    }
    for entry in fs::read_dir(dir).map_err(|e| StageError::io(dir, e))? {
        let entry = entry.map_err(|e| StageError::io(dir, e))?;
        if entry
            .file_type()
            .map_err(|e| StageError::io(entry.path(), e))?
            .is_file()
        {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// True for names the stages never treat as artifacts (temp files, dotfiles).
pub fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map_or(true, |name| name.starts_with('.'))
}
