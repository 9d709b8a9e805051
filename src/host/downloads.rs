use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::info;

use super::{ArtifactSink, HostError};

/// Number of `name (n).ext` variants tried before giving up
const MAX_UNIQUIFY_ATTEMPTS: u32 = 1000;

/// Saves artifacts into a downloads directory
///
/// Like a browser download shelf, a name that is already taken gets a
/// ` (1)`, ` (2)`, ... suffix instead of overwriting the earlier file.
pub struct LocalDownloads {
    dir: PathBuf,
}

impl LocalDownloads {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn candidate(filename: &str, attempt: u32) -> String {
        if attempt == 0 {
            return filename.to_string();
        }
        match filename.rsplit_once('.') {
            Some((stem, ext)) => format!("{} ({}).{}", stem, attempt, ext),
            None => format!("{} ({})", filename, attempt),
        }
    }
}

#[async_trait::async_trait]
impl ArtifactSink for LocalDownloads {
    async fn save(
        &self,
        filename: &str,
        mime_type: &str,
        data: &[u8],
    ) -> Result<String, HostError> {
        fs::create_dir_all(&self.dir).await?;

        for attempt in 0..MAX_UNIQUIFY_ATTEMPTS {
            let name = Self::candidate(filename, attempt);
            let path = self.dir.join(&name);

            let mut file = match OpenOptions::new().write(true).create_new(true).open(&path).await {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            };

            file.write_all(data).await?;
            file.flush().await?;

            info!("Downloaded {} ({}, {} bytes)", path.display(), mime_type, data.len());
            return Ok(name);
        }

        Err(HostError::Io(std::io::Error::new(
            ErrorKind::AlreadyExists,
            format!("no free file name for {}", filename),
        )))
    }
}
