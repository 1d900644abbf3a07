//! Copy of the most recently imported roster so the next session can reload it.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LastImport {
    pub source_name: String,
    pub cached_name: String,
    pub cached_path: PathBuf,
    #[serde(with = "time::serde::rfc3339")]
    pub stored_at: OffsetDateTime,
}

/// Copy `source` into `cache_dir` and record where it went.
///
/// Earlier cached copies are removed so the directory only ever holds one.
///
/// # Errors
/// Returns an error when the copy or the metadata file cannot be written.
pub fn persist_last_import(source: &Path, cache_dir: &Path, metadata_path: &Path) -> Result<LastImport> {
    fs::create_dir_all(cache_dir)
        .with_context(|| format!("failed to create cache directory {}", cache_dir.display()))?;
    let source_name = source
        .file_name()
        .and_then(|name| name.to_str())
        .context("roster file name is not valid UTF-8")?
        .to_string();
    let cached_path = cache_dir.join(&source_name);

    for entry in fs::read_dir(cache_dir)
        .with_context(|| format!("failed to list cache directory {}", cache_dir.display()))?
    {
        let path = entry?.path();
        if path.is_file() && path != cached_path {
            fs::remove_file(&path)
                .with_context(|| format!("failed to remove stale cache file {}", path.display()))?;
        }
    }

    if source != cached_path {
        fs::copy(source, &cached_path).with_context(|| {
            format!("failed to copy {} into {}", source.display(), cached_path.display())
        })?;
    }

    let metadata = LastImport {
        cached_name: source_name.clone(),
        source_name,
        cached_path,
        stored_at: OffsetDateTime::now_utc(),
    };
    if let Some(parent) = metadata_path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create metadata directory {}", parent.display()))?;
    }
    let body = serde_json::to_string_pretty(&metadata).context("failed to encode cache metadata")?;
    fs::write(metadata_path, body)
        .with_context(|| format!("failed to write cache metadata {}", metadata_path.display()))?;
    info!(cached = %metadata.cached_path.display(), "cached last roster import");
    Ok(metadata)
}

/// Metadata of the cached roster, `None` when nothing usable is cached.
///
/// # Errors
/// Returns an error when the metadata file exists but cannot be read.
pub fn load_last_import(metadata_path: &Path) -> Result<Option<LastImport>> {
    if !metadata_path.exists() {
        return Ok(None);
    }
    let body = fs::read_to_string(metadata_path)
        .with_context(|| format!("failed to read cache metadata {}", metadata_path.display()))?;
    let metadata: LastImport = match serde_json::from_str(&body) {
        Ok(metadata) => metadata,
        Err(err) => {
            warn!(path = %metadata_path.display(), error = %err, "ignoring unreadable cache metadata");
            return Ok(None);
        }
    };
    if !metadata.cached_path.is_file() {
        warn!(path = %metadata.cached_path.display(), "cached roster file is gone");
        return Ok(None);
    }
    Ok(Some(metadata))
}
