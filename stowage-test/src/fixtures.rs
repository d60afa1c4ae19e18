//! Payload fixtures.

use std::fs;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tempfile::TempDir;

/// Size of the sample image used in the upload scenarios.
pub const IMAGE_SIZE: usize = 32201;

/// Returns `len` bytes of deterministic, non-repeating-looking content.
///
/// Byte `i` is derived from its offset, so a slice of the payload can be compared against the
/// same range of a fresh payload.
pub fn payload(len: usize) -> Bytes {
    (0..len)
        .map(|i| (i.wrapping_mul(31) ^ (i >> 8)) as u8)
        .collect::<Vec<_>>()
        .into()
}

/// A temporary directory holding fixture files.
///
/// The directory is removed on drop.
#[derive(Debug)]
pub struct Fixtures {
    dir: TempDir,
}

impl Fixtures {
    /// Creates an empty fixture directory.
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    /// The root of the fixture directory.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Writes a file of [`payload`] bytes and returns its path.
    pub fn file(&self, name: &str, len: usize) -> PathBuf {
        let path = self.dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, payload(len)).unwrap();
        path
    }

    /// Writes the sample image and returns its path.
    pub fn image(&self) -> PathBuf {
        self.file("image.jpg", IMAGE_SIZE)
    }
}

impl Default for Fixtures {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_is_deterministic() {
        assert_eq!(payload(4096), payload(4096));
        assert_eq!(payload(4096).slice(100..200), payload(200).slice(100..));
    }

    #[test]
    fn writes_files() {
        let fixtures = Fixtures::new();
        let path = fixtures.image();
        assert_eq!(fs::metadata(path).unwrap().len(), IMAGE_SIZE as u64);
    }
}
