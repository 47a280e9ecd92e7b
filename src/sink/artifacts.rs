//! Artifact storage
//!
//! Downloaded artifacts are moved out of the download directory into a
//! storage directory. When a public base URL is configured the returned
//! location is `{base_url}/{file_name}`, otherwise the stored path.

use crate::sink::{SinkError, SinkResult};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
    base_url: Option<String>,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>, base_url: Option<String>) -> Self {
        Self {
            dir: dir.into(),
            base_url: base_url.map(|url| url.trim_end_matches('/').to_string()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Moves `local_path` into the store and returns its location
    pub fn store(&self, local_path: &Path) -> SinkResult<String> {
        if !local_path.is_file() {
            return Err(SinkError::InvalidArtifact(format!(
                "{} is not a file",
                local_path.display()
            )));
        }

        let file_name = local_path
            .file_name()
            .ok_or_else(|| {
                SinkError::InvalidArtifact(format!("{} has no file name", local_path.display()))
            })?
            .to_owned();

        fs::create_dir_all(&self.dir)?;
        let destination = self.dir.join(&file_name);

        if fs::rename(local_path, &destination).is_err() {
            // rename fails across filesystems
            fs::copy(local_path, &destination)?;
            fs::remove_file(local_path)?;
        }

        tracing::debug!(
            "Stored artifact {} at {}",
            local_path.display(),
            destination.display()
        );

        Ok(match &self.base_url {
            Some(base) => format!("{}/{}", base, file_name.to_string_lossy()),
            None => destination.display().to_string(),
        })
    }
}
