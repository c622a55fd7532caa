use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// URL prefix under which stored images are served.
pub const UPLOADS_ROUTE: &str = "/uploads";

const ALLOWED_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "gif", "webp"];

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("File type not allowed. Allowed types: .jpg, .jpeg, .png, .gif, .webp")]
    UnsupportedType,

    #[error("File too large. Maximum size: {max_mb}MB")]
    TooLarge { max_mb: usize },

    #[error("Uploaded file is empty")]
    Empty,

    #[error("Failed to store file: {0}")]
    Io(#[from] std::io::Error),
}

/// Local directory holding meter photographs.
#[derive(Debug, Clone)]
pub struct ImageStore {
    dir: PathBuf,
    max_bytes: usize,
}

impl ImageStore {
    pub fn new(dir: impl AsRef<Path>, max_bytes: usize) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            max_bytes,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Lower-cased extension of `filename` if it is an accepted image type.
    pub fn allowed_extension(filename: &str) -> Result<String, StorageError> {
        Path::new(filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .filter(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()))
            .ok_or(StorageError::UnsupportedType)
    }

    /// Writes the image under a fresh random name and returns its public URL.
    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    pub async fn save(&self, filename: &str, bytes: &[u8]) -> Result<String, StorageError> {
        let extension = Self::allowed_extension(filename)?;
        if bytes.is_empty() {
            return Err(StorageError::Empty);
        }
        if bytes.len() > self.max_bytes {
            return Err(StorageError::TooLarge {
                max_mb: self.max_bytes / (1024 * 1024),
            });
        }

        tokio::fs::create_dir_all(&self.dir).await?;
        let stored_name = format!("{}.{}", Uuid::new_v4(), extension);
        tokio::fs::write(self.dir.join(&stored_name), bytes).await?;

        debug!("Stored upload {} as {}", filename, stored_name);
        Ok(format!("{}/{}", UPLOADS_ROUTE, stored_name))
    }

    /// Deletes the file behind a URL returned by [`Self::save`]. Failures are
    /// logged and otherwise ignored.
    pub async fn remove(&self, url: &str) {
        let Some(name) = url
            .strip_prefix(UPLOADS_ROUTE)
            .map(|rest| rest.trim_start_matches('/'))
            .filter(|name| !name.is_empty() && !name.contains('/') && !name.contains(".."))
        else {
            warn!("Not removing image with unexpected url {}", url);
            return;
        };

        if let Err(e) = tokio::fs::remove_file(self.dir.join(name)).await {
            warn!("Failed to remove image {}: {}", url, e);
        }
    }
}
