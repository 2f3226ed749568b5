//! Discovery File
//!
//! Plain-text file holding the listening port. Written at startup so client
//! processes can find a running instance, deleted on clean shutdown.
//!
//! Writes go to a sibling temporary file and are renamed into place, so a
//! reader never observes a partial port.

use std::io;
use std::path::{Path, PathBuf};

/// Discovery file errors.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// Filesystem operation failed.
    #[error("discovery file {path}: {source}")]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// File content is not a port number.
    #[error("discovery file {path} holds no valid port: {content:?}")]
    InvalidContent {
        /// File involved.
        path: PathBuf,
        /// What was read.
        content: String,
    },
}

/// Handle to the discovery file location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryFile {
    path: PathBuf,
}

impl DiscoveryFile {
    /// Discovery file at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Publish `port`, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the directory, temporary file or rename fails.
    pub fn write(&self, port: u16) -> Result<(), DiscoveryError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }

        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, port.to_string()).map_err(|source| DiscoveryError::Io {
            path: tmp.clone(),
            source,
        })?;
        std::fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))?;

        tracing::info!(path = %self.path.display(), port, "Discovery file written");
        Ok(())
    }

    /// Read the published port.
    ///
    /// Returns `Ok(None)` if no file exists.
    ///
    /// # Errors
    ///
    /// Returns `Io` on read failure and `InvalidContent` for a malformed file.
    pub fn read_port(&self) -> Result<Option<u16>, DiscoveryError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(e)),
        };

        content
            .trim()
            .parse::<u16>()
            .map(Some)
            .map_err(|_| DiscoveryError::InvalidContent {
                path: self.path.clone(),
                content,
            })
    }

    /// Delete the file. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns `Io` for failures other than the file being absent.
    pub fn remove(&self) -> Result<bool, DiscoveryError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::info!(path = %self.path.display(), "Discovery file removed");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(self.io_error(e)),
        }
    }

    fn io_error(&self, source: io::Error) -> DiscoveryError {
        DiscoveryError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_read_remove() {
        let dir = tempfile::tempdir().unwrap();
        let file = DiscoveryFile::new(dir.path().join("nested/data-service.port"));

        assert_eq!(file.read_port().unwrap(), None);

        file.write(17650).unwrap();
        assert_eq!(file.read_port().unwrap(), Some(17650));
        assert!(!file.path().with_extension("tmp").exists());

        file.write(4242).unwrap();
        assert_eq!(file.read_port().unwrap(), Some(4242));

        assert!(file.remove().unwrap());
        assert!(!file.remove().unwrap());
        assert_eq!(file.read_port().unwrap(), None);
    }

    #[test]
    fn malformed_content_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data-service.port");
        std::fs::write(&path, "not-a-port").unwrap();

        let err = DiscoveryFile::new(path).read_port().unwrap_err();
        assert!(matches!(err, DiscoveryError::InvalidContent { .. }));
    }

    #[test]
    fn tolerates_trailing_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data-service.port");
        std::fs::write(&path, "8080\n").unwrap();

        assert_eq!(DiscoveryFile::new(path).read_port().unwrap(), Some(8080));
    }
}
