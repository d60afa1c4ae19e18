//! The storage facade.

use std::path::PathBuf;

use bytes::Bytes;
use stowage_types::{ConfigInput, FileEntry, StreamRange};

use crate::PayloadStream;
use crate::adapter::{Adapter, FileSource};
use crate::error::StorageResult;
use crate::options::{
    AddFileOptions, CreateBucketOptions, PresignedUpload, PublicUrlOptions, SignedUrlOptions,
    UploadUrlOptions,
};

/// High-level entry point that owns the active [`Adapter`].
///
/// Every operation forwards to the adapter. [`switch_provider`](Self::switch_provider) replaces it
/// with an adapter for a different configuration, dropping the old one along with its selected
/// bucket.
#[derive(Debug)]
pub struct Storage {
    adapter: Adapter,
}

impl Storage {
    /// Creates a facade for the provider described by `input`.
    ///
    /// Like [`Adapter::new`], this never fails.
    pub async fn new(input: impl Into<ConfigInput>) -> Self {
        Self::from_adapter(Adapter::new(input).await)
    }

    /// Wraps an existing adapter.
    pub fn from_adapter(adapter: Adapter) -> Self {
        Self { adapter }
    }

    /// Replaces the active adapter with one for a new configuration.
    pub async fn switch_provider(&mut self, input: impl Into<ConfigInput>) {
        let adapter = Adapter::new(input).await;
        tracing::debug!(
            from = self.adapter.provider(),
            to = adapter.provider(),
            "switching storage provider"
        );
        self.adapter = adapter;
    }

    /// The active adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    /// The active adapter, mutably.
    pub fn adapter_mut(&mut self) -> &mut Adapter {
        &mut self.adapter
    }

    /// See [`Adapter::provider`].
    pub fn provider(&self) -> &str {
        self.adapter.provider()
    }

    /// See [`Adapter::config_error`].
    pub fn config_error(&self) -> Option<&str> {
        self.adapter.config_error()
    }

    /// See [`Adapter::create_bucket`].
    pub async fn create_bucket(
        &self,
        bucket: Option<&str>,
        options: &CreateBucketOptions,
    ) -> StorageResult<()> {
        self.adapter.create_bucket(bucket, options).await
    }

    /// See [`Adapter::clear_bucket`].
    pub async fn clear_bucket(&self, bucket: Option<&str>) -> StorageResult<()> {
        self.adapter.clear_bucket(bucket).await
    }

    /// See [`Adapter::delete_bucket`].
    pub async fn delete_bucket(&mut self, bucket: Option<&str>) -> StorageResult<()> {
        self.adapter.delete_bucket(bucket).await
    }

    /// See [`Adapter::list_buckets`].
    pub async fn list_buckets(&self) -> StorageResult<Vec<String>> {
        self.adapter.list_buckets().await
    }

    /// See [`Adapter::bucket_exists`].
    pub async fn bucket_exists(&self, bucket: Option<&str>) -> StorageResult<bool> {
        self.adapter.bucket_exists(bucket).await
    }

    /// See [`Adapter::bucket_is_public`].
    pub async fn bucket_is_public(&self, bucket: Option<&str>) -> StorageResult<bool> {
        self.adapter.bucket_is_public(bucket).await
    }

    /// See [`Adapter::select_bucket`].
    pub fn select_bucket(&mut self, bucket: Option<&str>) -> StorageResult<()> {
        self.adapter.select_bucket(bucket)
    }

    /// See [`Adapter::selected_bucket`].
    pub fn selected_bucket(&self) -> Option<&str> {
        self.adapter.selected_bucket()
    }

    /// See [`Adapter::add_file`].
    pub async fn add_file(
        &self,
        source: FileSource,
        target: Option<&str>,
        options: &AddFileOptions,
    ) -> StorageResult<()> {
        self.adapter.add_file(source, target, options).await
    }

    /// See [`Adapter::add_file_from_path`].
    pub async fn add_file_from_path(
        &self,
        path: impl Into<PathBuf>,
        target: &str,
        options: &AddFileOptions,
    ) -> StorageResult<()> {
        self.adapter.add_file_from_path(path, target, options).await
    }

    /// See [`Adapter::add_file_from_buffer`].
    pub async fn add_file_from_buffer(
        &self,
        buffer: impl Into<Bytes>,
        target: &str,
        options: &AddFileOptions,
    ) -> StorageResult<()> {
        self.adapter
            .add_file_from_buffer(buffer, target, options)
            .await
    }

    /// See [`Adapter::add_file_from_stream`].
    pub async fn add_file_from_stream(
        &self,
        stream: PayloadStream,
        target: &str,
        options: &AddFileOptions,
    ) -> StorageResult<()> {
        self.adapter
            .add_file_from_stream(stream, target, options)
            .await
    }

    /// See [`Adapter::get_file_as_stream`].
    pub async fn get_file_as_stream(
        &self,
        bucket: Option<&str>,
        name: Option<&str>,
        range: StreamRange,
    ) -> StorageResult<PayloadStream> {
        self.adapter.get_file_as_stream(bucket, name, range).await
    }

    /// See [`Adapter::get_file_as_bytes`].
    pub async fn get_file_as_bytes(
        &self,
        bucket: Option<&str>,
        name: Option<&str>,
        range: StreamRange,
    ) -> StorageResult<Bytes> {
        self.adapter.get_file_as_bytes(bucket, name, range).await
    }

    /// See [`Adapter::get_public_url`].
    pub async fn get_public_url(
        &self,
        bucket: Option<&str>,
        name: Option<&str>,
        options: &PublicUrlOptions,
    ) -> StorageResult<String> {
        self.adapter.get_public_url(bucket, name, options).await
    }

    /// See [`Adapter::get_signed_url`].
    pub async fn get_signed_url(
        &self,
        bucket: Option<&str>,
        name: Option<&str>,
        options: &SignedUrlOptions,
    ) -> StorageResult<String> {
        self.adapter.get_signed_url(bucket, name, options).await
    }

    /// See [`Adapter::get_presigned_upload_url`].
    pub async fn get_presigned_upload_url(
        &self,
        bucket: Option<&str>,
        name: Option<&str>,
        options: &UploadUrlOptions,
    ) -> StorageResult<PresignedUpload> {
        self.adapter
            .get_presigned_upload_url(bucket, name, options)
            .await
    }

    /// See [`Adapter::remove_file`].
    pub async fn remove_file(
        &self,
        bucket: Option<&str>,
        name: Option<&str>,
        all_versions: bool,
    ) -> StorageResult<()> {
        self.adapter.remove_file(bucket, name, all_versions).await
    }

    /// See [`Adapter::list_files`].
    pub async fn list_files(
        &self,
        bucket: Option<&str>,
        max: Option<usize>,
    ) -> StorageResult<Vec<FileEntry>> {
        self.adapter.list_files(bucket, max).await
    }

    /// See [`Adapter::list_files_with_prefix`].
    pub async fn list_files_with_prefix(
        &self,
        bucket: Option<&str>,
        prefix: Option<&str>,
        max: Option<usize>,
    ) -> StorageResult<Vec<FileEntry>> {
        self.adapter
            .list_files_with_prefix(bucket, prefix, max)
            .await
    }

    /// See [`Adapter::size_of`].
    pub async fn size_of(&self, bucket: Option<&str>, name: Option<&str>) -> StorageResult<u64> {
        self.adapter.size_of(bucket, name).await
    }

    /// See [`Adapter::file_exists`].
    pub async fn file_exists(
        &self,
        bucket: Option<&str>,
        name: Option<&str>,
    ) -> StorageResult<bool> {
        self.adapter.file_exists(bucket, name).await
    }
}
