//! JSON file helpers shared by the directory, counters and status log

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

/// Serialize `value` to `path`, writing a temp file first and renaming it
/// into place so readers never observe a partial document.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }
    }

    let json = serde_json::to_vec_pretty(value).context("Failed to serialize document")?;

    let temp_path = path.with_extension("tmp");
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp_path)
        .with_context(|| format!("Failed to create temp file {:?}", temp_path))?;

    file.write_all(&json).context("Failed to write document")?;
    file.sync_all().context("Failed to sync document")?;

    std::fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to rename {:?} to {:?}", temp_path, path))?;

    Ok(())
}

/// Read a JSON document, returning `None` when the file does not exist
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }

    let mut file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    let mut data = Vec::new();
    file.read_to_end(&mut data)
        .with_context(|| format!("Failed to read {:?}", path))?;

    let value = serde_json::from_slice(&data)
        .with_context(|| format!("Failed to deserialize {:?}", path))?;
    Ok(Some(value))
}

/// Append one JSON document as a line to `path`
pub fn append_json_line<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }
    }

    let mut line = serde_json::to_vec(value).context("Failed to serialize record")?;
    line.push(b'\n');

    let mut file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .with_context(|| format!("Failed to open {:?} for append", path))?;
    file.write_all(&line)
        .with_context(|| format!("Failed to append to {:?}", path))?;

    Ok(())
}
