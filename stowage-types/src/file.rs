//! Listing entries.

use serde::{Deserialize, Serialize};

/// A file reported by a listing: its key within the bucket and its size in bytes.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileEntry {
    /// Key of the file, relative to the bucket.
    pub path: String,
    /// Size in bytes.
    pub size: u64,
}

impl FileEntry {
    /// Creates a new entry.
    pub fn new(path: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            size,
        }
    }
}

impl From<(String, u64)> for FileEntry {
    fn from((path, size): (String, u64)) -> Self {
        Self { path, size }
    }
}
