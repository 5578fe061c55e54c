//! Reading a file to send: its display name and its bytes.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Reasons a source file cannot be sent. All are caught before any hashing
/// or network work starts.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("no file selected")]
    NotSelected,
    #[error("file not found: {}", path.display())]
    NotFound { path: PathBuf },
    #[error("not a regular file: {}", path.display())]
    NotAFile { path: PathBuf },
    #[error("path has no file name: {}", path.display())]
    NoFileName { path: PathBuf },
    #[error("failed to read {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("file is empty: {}", path.display())]
    Empty { path: PathBuf },
    #[error("payload to send has no name")]
    MissingName,
    #[error("payload {name:?} is empty")]
    EmptyPayload { name: String },
}

/// A file loaded fully into memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl SourceFile {
    /// Read `path` into memory, named after its final path component.
    pub async fn read(path: &Path) -> Result<Self, SourceError> {
        if path.as_os_str().is_empty() {
            return Err(SourceError::NotSelected);
        }

        let metadata = match tokio::fs::metadata(path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SourceError::NotFound {
                    path: path.to_path_buf(),
                })
            }
            Err(source) => {
                return Err(SourceError::Unreadable {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        if !metadata.is_file() {
            return Err(SourceError::NotAFile {
                path: path.to_path_buf(),
            });
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| SourceError::NoFileName {
                path: path.to_path_buf(),
            })?;

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| SourceError::Unreadable {
                path: path.to_path_buf(),
                source,
            })?;

        if bytes.is_empty() {
            return Err(SourceError::Empty {
                path: path.to_path_buf(),
            });
        }

        tracing::debug!(file_name = %name, file_size = bytes.len(), "source file read");

        Ok(Self { name, bytes })
    }
}
