//! Filesystem-backed firmware image storage

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;

use fwupdater_core::{Storage, StorageError};

/// Reads images from directories under a root path
///
/// Relative directories resolve against the root; absolute ones are used as is.
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, directory: &Path, name: &str) -> PathBuf {
        self.root.join(directory).join(name)
    }
}

impl Storage for FsStorage {
    fn file_exists(&self, directory: &Path, name: &str) -> bool {
        self.resolve(directory, name).is_file()
    }

    fn read_file(&self, directory: &Path, name: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.resolve(directory, name);
        match std::fs::read(&path) {
            Ok(data) => {
                debug!(path = %path.display(), bytes = data.len(), "Read firmware image");
                Ok(data)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StorageError::NotFound(name.to_string()))
            }
            Err(source) => Err(StorageError::Io {
                name: name.to_string(),
                source,
            }),
        }
    }
}
