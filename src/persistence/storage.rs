//! Storage primitives.
//!
//! Thin wrappers over `std::fs` plus the crash-safe write protocol: write to
//! a sibling `~` temp file, fsync it, atomically rename it over the target,
//! and fsync the parent directory on both sides of the rename. The `~`
//! suffix is reserved for these temporaries; startup promotes a leftover
//! temp file when a crash struck between write and rename.

use crate::common::TEMP_SUFFIX;
use crate::errors::LigniteResult;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub fn exists(path: &Path) -> bool {
    path.exists()
}

pub fn read(path: &Path) -> LigniteResult<String> {
    Ok(fs::read_to_string(path)?)
}

pub fn write_file(path: &Path, data: &str) -> LigniteResult<()> {
    Ok(fs::write(path, data)?)
}

pub fn append_file(path: &Path, data: &str) -> LigniteResult<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(data.as_bytes())?;
    file.sync_all()?;
    Ok(())
}

pub fn rename(from: &Path, to: &Path) -> LigniteResult<()> {
    Ok(fs::rename(from, to)?)
}

pub fn unlink(path: &Path) -> LigniteResult<()> {
    Ok(fs::remove_file(path)?)
}

pub fn mkdirp(path: &Path) -> LigniteResult<()> {
    Ok(fs::create_dir_all(path)?)
}

/// Flushes a file or directory to disk.
///
/// Directory fsync is skipped on platforms that cannot open directories.
pub fn flush_to_storage(path: &Path) -> LigniteResult<()> {
    if cfg!(windows) && path.is_dir() {
        return Ok(());
    }
    let file = File::open(path)?;
    file.sync_all()?;
    Ok(())
}

/// The sibling temp file of `path`, named by appending the reserved suffix.
pub fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push(TEMP_SUFFIX);
    path.with_file_name(name)
}

/// Fully replaces `path` with `data`, surviving a crash at any step:
///
/// 1. fsync the parent directory
/// 2. fsync the target, if it exists
/// 3. write all data to the sibling temp file
/// 4. fsync the temp file
/// 5. rename the temp file over the target (atomic replace)
/// 6. fsync the parent directory again
pub fn crash_safe_write_file(path: &Path, data: &str) -> LigniteResult<()> {
    let temp = temp_path(path);

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            flush_to_storage(parent)?;
        }
    }
    if exists(path) {
        flush_to_storage(path)?;
    }
    write_file(&temp, data)?;
    flush_to_storage(&temp)?;
    rename(&temp, path)?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            flush_to_storage(parent)?;
        }
    }
    Ok(())
}

/// Makes sure the datafile exists and reflects the last completed write.
///
/// - the datafile exists: nothing to do
/// - only the temp file exists: a crash hit between write and rename, so
///   the temp file holds the full intended content and is promoted
/// - neither exists: an empty datafile is created
pub fn ensure_datafile_integrity(path: &Path) -> LigniteResult<()> {
    if exists(path) {
        return Ok(());
    }
    let temp = temp_path(path);
    if exists(&temp) {
        log::warn!(
            "Datafile {} missing, recovering from temp file",
            path.display()
        );
        return rename(&temp, path);
    }
    write_file(path, "")
}
