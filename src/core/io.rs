use async_trait::async_trait;
use std::path::PathBuf;

use crate::core::error::HelperError;
use crate::utils::names::sanitize_file_name;

/// Destination of finished downloads: one call per saved file.
#[async_trait]
pub trait SaveTarget: Send + Sync {
    /// Persists `content` under `file_name` and returns the name actually used.
    async fn save_as(&self, file_name: &str, content: &[u8]) -> Result<String, HelperError>;
}

/// Writes downloads into a directory on the local filesystem.
pub struct FolderTarget {
    root: PathBuf,
}

impl FolderTarget {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl SaveTarget for FolderTarget {
    async fn save_as(&self, file_name: &str, content: &[u8]) -> Result<String, HelperError> {
        let safe_name = sanitize_file_name(file_name);
        let path = self.root.join(&safe_name);
        let to_error = |source| HelperError::Save {
            name: safe_name.clone(),
            source,
        };

        tokio::fs::create_dir_all(&self.root).await.map_err(to_error)?;

        // The final name only ever holds a complete file.
        let partial = self.root.join(format!("{}.part", safe_name));
        let written = match tokio::fs::write(&partial, content).await {
            Ok(()) => tokio::fs::rename(&partial, &path).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            if let Err(cleanup) = tokio::fs::remove_file(&partial).await {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    log::warn!("Could not remove {}: {}", partial.display(), cleanup);
                }
            }
            return Err(to_error(e));
        }

        log::info!("Saved {}", path.display());
        Ok(safe_name)
    }
}
