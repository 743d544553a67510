//! Local file system source loader

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use url::Url;

use super::SourceLoader;
use crate::content::SourceData;
use crate::{Error, Result};

/// Loads manifests from files below a root directory
///
/// Relative and `/`-rooted URIs are both resolved below `root`;
/// `file://` URLs are read from their absolute path.
#[derive(Debug, Clone)]
pub struct FsSourceLoader {
    root: PathBuf,
}

impl FsSourceLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a URI onto a local path
    pub fn path_of(&self, uri: &str) -> Result<PathBuf> {
        if uri.starts_with("file:") {
            let url = Url::parse(uri).map_err(|e| Error::FileSystem {
                uri: uri.to_string(),
                reason: e.to_string(),
            })?;
            return url.to_file_path().map_err(|_| Error::FileSystem {
                uri: uri.to_string(),
                reason: "not a local file URL".to_string(),
            });
        }
        if uri.contains("://") {
            return Err(Error::FileSystem {
                uri: uri.to_string(),
                reason: "remote URIs are not served by the file system loader".to_string(),
            });
        }
        Ok(self.root.join(uri.trim_start_matches('/')))
    }
}

#[async_trait]
impl SourceLoader for FsSourceLoader {
    async fn request(&self, uri: &str, base: Option<&str>) -> Result<SourceData> {
        let path = self.path_of(uri)?;
        tracing::debug!(%uri, ?base, ?path, "Reading manifest");

        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::NotFound {
                    uri: uri.to_string(),
                });
            }
            Err(e) => {
                return Err(Error::FileSystem {
                    uri: uri.to_string(),
                    reason: e.to_string(),
                });
            }
        };
        if metadata.is_dir() {
            return Err(Error::FileSystem {
                uri: uri.to_string(),
                reason: "entry is a directory".to_string(),
            });
        }

        let body = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| Error::FileSystem {
                uri: uri.to_string(),
                reason: e.to_string(),
            })?;
        Ok(SourceData::text(body))
    }
}
