use std::fmt::Debug;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use stowage_types::{FileEntry, StreamRange};

use crate::PayloadStream;
use crate::error::{StorageError, StorageResult};
use crate::options::{
    AddFileOptions, CreateBucketOptions, PresignedUpload, PublicUrlOptions, SignedUrlOptions,
    UploadUrlOptions,
};

/// User agent string used for outgoing requests.
pub const USER_AGENT: &str = concat!("stowage/", env!("CARGO_PKG_VERSION"));

/// A type-erased [`Backend`] instance.
pub type BoxedBackend = Box<dyn Backend>;

/// Provider-specific storage operations.
///
/// Backends only implement the raw calls. Name validation, bucket selection, configuration errors,
/// and the idempotency rules of the public API live in [`Adapter`](crate::Adapter), which is the
/// only caller of this trait.
///
/// Operations that address a missing bucket or file return [`StorageError::NotFound`].
#[async_trait::async_trait]
pub trait Backend: Debug + Send + Sync + 'static {
    /// The backend name, used for diagnostics.
    fn name(&self) -> &'static str;

    /// Lists the names of all buckets visible with the configured credentials.
    async fn list_buckets(&self) -> StorageResult<Vec<String>>;

    /// Creates a new bucket.
    async fn create_bucket(&self, bucket: &str, options: &CreateBucketOptions)
    -> StorageResult<()>;

    /// Returns whether the bucket exists.
    async fn bucket_exists(&self, bucket: &str) -> StorageResult<bool>;

    /// Returns whether the bucket's objects can be read anonymously.
    async fn bucket_is_public(&self, bucket: &str) -> StorageResult<bool>;

    /// Removes every file and every version of a file from the bucket.
    async fn clear_bucket(&self, bucket: &str) -> StorageResult<()> {
        for file in self.list_files(bucket, None, None).await? {
            match self.delete_file(bucket, &file.path, true).await {
                Err(err) if err.is_not_found() => (),
                result => result?,
            }
        }
        Ok(())
    }

    /// Deletes an empty bucket.
    async fn delete_bucket(&self, bucket: &str) -> StorageResult<()>;

    /// Lists files in the bucket, optionally restricted to keys starting with `prefix`.
    async fn list_files(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        max: Option<usize>,
    ) -> StorageResult<Vec<FileEntry>>;

    /// Stores a file, replacing the current version if one exists.
    async fn put_file(
        &self,
        bucket: &str,
        key: &str,
        stream: PayloadStream,
        options: &AddFileOptions,
    ) -> StorageResult<()>;

    /// Streams the given inclusive byte range of a file.
    async fn get_file(
        &self,
        bucket: &str,
        key: &str,
        range: StreamRange,
    ) -> StorageResult<PayloadStream>;

    /// Deletes all versions of a file, or only the latest one.
    async fn delete_file(&self, bucket: &str, key: &str, all_versions: bool) -> StorageResult<()>;

    /// Returns the size of a file in bytes.
    async fn size_of(&self, bucket: &str, key: &str) -> StorageResult<u64>;

    /// Returns whether a file exists.
    async fn file_exists(&self, bucket: &str, key: &str) -> StorageResult<bool> {
        match self.size_of(bucket, key).await {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Returns the unauthenticated URL of a file. Does not check whether the bucket is public.
    async fn public_url(
        &self,
        bucket: &str,
        key: &str,
        options: &PublicUrlOptions,
    ) -> StorageResult<String>;

    /// Returns a time-limited download URL.
    async fn signed_url(
        &self,
        bucket: &str,
        key: &str,
        options: &SignedUrlOptions,
    ) -> StorageResult<String>;

    /// Returns a time-limited upload URL.
    async fn presigned_upload_url(
        &self,
        bucket: &str,
        key: &str,
        options: &UploadUrlOptions,
    ) -> StorageResult<PresignedUpload>;
}

/// The error for a missing bucket.
pub fn bucket_not_found(bucket: &str) -> StorageError {
    StorageError::not_found(format!("Could not find bucket {bucket}"))
}

/// The error for a missing file.
pub fn file_not_found(bucket: &str, key: &str) -> StorageError {
    StorageError::not_found(format!("Could not find file {key} in bucket {bucket}"))
}

/// Characters that are kept unescaped in URL components (RFC 3986 unreserved).
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Like [`COMPONENT`], but keeps path separators.
const PATH: &AsciiSet = &COMPONENT.remove(b'/');

/// Percent-encodes a single URL component, including slashes.
pub fn encode_component(value: &str) -> String {
    utf8_percent_encode(value, COMPONENT).to_string()
}

/// Percent-encodes an object key for use in a URL path, keeping slashes.
pub fn encode_path(value: &str) -> String {
    utf8_percent_encode(value, PATH).to_string()
}

/// Creates a reqwest client with required defaults.
#[cfg(feature = "gcs")]
pub fn reqwest_client() -> StorageResult<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .map_err(|cause| StorageError::backend("failed to build HTTP client", cause))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_keys() {
        assert_eq!(encode_path("photos/2024/a b+c.jpg"), "photos/2024/a%20b%2Bc.jpg");
        assert_eq!(encode_component("photos/a b.jpg"), "photos%2Fa%20b.jpg");
        assert_eq!(encode_component("a-b_c.d~e"), "a-b_c.d~e");
    }
}
