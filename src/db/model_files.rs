use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    error::{AppError, AppResult},
    models::ModelArtifact,
};

const POINTER_FILE: &str = "registry.json";
const MODEL_PREFIX: &str = "model-v";
const MODEL_SUFFIX: &str = ".json";

/// Which persisted versions the registry is serving
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryPointer {
    pub active: u64,
    pub previous: Option<u64>,
}

/// Versioned model files on local disk
///
/// Each artifact lives in `model-v{version:08}.json`. Files are written to a
/// temporary name and renamed into place, so a reader never sees a partial file.
#[derive(Debug, Clone)]
pub struct ModelFileStore {
    dir: PathBuf,
}

impl ModelFileStore {
    pub async fn open(dir: impl Into<PathBuf>) -> AppResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| io_error("create model directory", &dir, e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn model_path(&self, version: u64) -> PathBuf {
        self.dir
            .join(format!("{}{:08}{}", MODEL_PREFIX, version, MODEL_SUFFIX))
    }

    pub async fn save(&self, artifact: &ModelArtifact) -> AppResult<PathBuf> {
        let bytes = serde_json::to_vec(artifact)
            .map_err(|e| AppError::Internal(format!("Model serialization error: {}", e)))?;
        let path = self.model_path(artifact.version);
        self.write_atomic(&path, &bytes).await?;

        tracing::info!(version = artifact.version, path = %path.display(), "Model file written");
        Ok(path)
    }

    pub async fn load(&self, version: u64) -> AppResult<ModelArtifact> {
        let path = self.model_path(version);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| io_error("read model file", &path, e))?;
        let artifact: ModelArtifact = serde_json::from_slice(&bytes).map_err(|e| {
            AppError::Internal(format!("Corrupt model file {}: {}", path.display(), e))
        })?;

        if artifact.version != version {
            return Err(AppError::Internal(format!(
                "Model file {} holds version {}",
                path.display(),
                artifact.version
            )));
        }
        Ok(artifact)
    }

    /// Persisted model versions in ascending order
    pub async fn versions(&self) -> AppResult<Vec<u64>> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| io_error("list model directory", &self.dir, e))?;

        let mut versions = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error("list model directory", &self.dir, e))?
        {
            let name = entry.file_name();
            if let Some(version) = name.to_str().and_then(parse_model_file_name) {
                versions.push(version);
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }

    pub async fn write_pointer(&self, pointer: RegistryPointer) -> AppResult<()> {
        let bytes = serde_json::to_vec(&pointer)
            .map_err(|e| AppError::Internal(format!("Pointer serialization error: {}", e)))?;
        self.write_atomic(&self.dir.join(POINTER_FILE), &bytes).await
    }

    pub async fn read_pointer(&self) -> AppResult<Option<RegistryPointer>> {
        let path = self.dir.join(POINTER_FILE);
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
                AppError::Internal(format!("Corrupt registry pointer {}: {}", path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error("read registry pointer", &path, e)),
        }
    }

    /// Loads the active and previous artifacts named by the pointer file, or
    /// the two highest persisted versions when there is no pointer.
    pub async fn restore(&self) -> AppResult<Option<(ModelArtifact, Option<ModelArtifact>)>> {
        let pointer = match self.read_pointer().await? {
            Some(pointer) => pointer,
            None => {
                let versions = self.versions().await?;
                let Some(&active) = versions.last() else {
                    return Ok(None);
                };
                let previous = versions.len().checked_sub(2).map(|i| versions[i]);
                RegistryPointer { active, previous }
            }
        };

        let active = self.load(pointer.active).await?;
        let previous = match pointer.previous {
            Some(version) => match self.load(version).await {
                Ok(artifact) => Some(artifact),
                Err(e) => {
                    tracing::warn!(version, error = %e, "Previous model could not be restored");
                    None
                }
            },
            None => None,
        };

        Ok(Some((active, previous)))
    }

    /// Removes every model file whose version is not in `keep`
    pub async fn prune(&self, keep: &[u64]) -> AppResult<usize> {
        let mut removed = 0;
        for version in self.versions().await? {
            if keep.contains(&version) {
                continue;
            }
            let path = self.model_path(version);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!(version, error = %e, "Failed to prune model file"),
            }
        }
        Ok(removed)
    }

    async fn write_atomic(&self, path: &Path, bytes: &[u8]) -> AppResult<()> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| AppError::Internal(format!("Invalid path {}", path.display())))?;
        let tmp = self.dir.join(format!(".{}.tmp", file_name));

        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| io_error("write", &tmp, e))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| io_error("rename", path, e))?;
        Ok(())
    }
}

fn parse_model_file_name(name: &str) -> Option<u64> {
    name.strip_prefix(MODEL_PREFIX)?
        .strip_suffix(MODEL_SUFFIX)?
        .parse()
        .ok()
}

fn io_error(action: &str, path: &Path, e: std::io::Error) -> AppError {
    AppError::Internal(format!("Failed to {} {}: {}", action, path.display(), e))
}
