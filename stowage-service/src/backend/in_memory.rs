//! In-memory backend.
//!
//! This provides a [`Backend`](super::common::Backend) backed by a map of buckets, removing the
//! need for filesystem tempdir management in tests and serving as an ephemeral store. Buckets can
//! keep every version of a file. The backend is [`Clone`] so tests can hold a handle for direct
//! inspection while the adapter owns a boxed copy.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use stowage_types::{Configuration, FileEntry, StreamRange};

use super::common::{Backend, bucket_not_found, encode_path, file_not_found};
use crate::PayloadStream;
use crate::error::StorageResult;
use crate::options::{
    AddFileOptions, CreateBucketOptions, PresignedUpload, PublicUrlOptions, SignedUrlOptions,
    UploadUrlOptions,
};
use crate::stream;

#[derive(Debug, Clone)]
struct StoredFile {
    contents: Bytes,
    content_type: Option<String>,
    metadata: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct Bucket {
    public: bool,
    versioning: bool,
    /// All versions of each file, oldest first.
    files: BTreeMap<String, Vec<StoredFile>>,
}

type Store = BTreeMap<String, Bucket>;

/// A process-local backend.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    store: Arc<Mutex<Store>>,
    calls: Arc<AtomicUsize>,
    versioning: bool,
}

impl InMemoryBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend from the `versioning` option.
    pub fn from_config(config: &Configuration) -> StorageResult<Self> {
        Ok(Self {
            versioning: config.get_bool("versioning")?.unwrap_or(false),
            ..Self::default()
        })
    }

    /// Enables versioning for all buckets created from now on.
    pub fn with_versioning(mut self, versioning: bool) -> Self {
        self.versioning = versioning;
        self
    }

    /// Returns the number of [`Backend`] operations invoked so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    /// Returns the number of stored versions of a file.
    pub fn versions(&self, bucket: &str, key: &str) -> usize {
        let store = self.store.lock().unwrap();
        store
            .get(bucket)
            .and_then(|bucket| bucket.files.get(key))
            .map_or(0, Vec::len)
    }

    /// Returns the content type and metadata stored with the latest version of a file.
    pub fn stored_metadata(
        &self,
        bucket: &str,
        key: &str,
    ) -> Option<(Option<String>, BTreeMap<String, String>)> {
        let store = self.store.lock().unwrap();
        let file = store.get(bucket)?.files.get(key)?.last()?;
        Some((file.content_type.clone(), file.metadata.clone()))
    }

    /// Counts the call and locks the store.
    fn enter(&self) -> MutexGuard<'_, Store> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.store.lock().unwrap()
    }

    fn url(bucket: &str, key: &str) -> String {
        format!("memory://{bucket}/{}", encode_path(key))
    }
}

fn bucket_mut<'a>(store: &'a mut Store, name: &str) -> StorageResult<&'a mut Bucket> {
    store.get_mut(name).ok_or_else(|| bucket_not_found(name))
}

fn latest<'a>(store: &'a Store, bucket: &str, key: &str) -> StorageResult<&'a StoredFile> {
    store
        .get(bucket)
        .ok_or_else(|| bucket_not_found(bucket))?
        .files
        .get(key)
        .and_then(|versions| versions.last())
        .ok_or_else(|| file_not_found(bucket, key))
}

#[async_trait::async_trait]
impl Backend for InMemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn list_buckets(&self) -> StorageResult<Vec<String>> {
        Ok(self.enter().keys().cloned().collect())
    }

    async fn create_bucket(
        &self,
        bucket: &str,
        options: &CreateBucketOptions,
    ) -> StorageResult<()> {
        let mut store = self.enter();
        let entry = store.entry(bucket.to_owned()).or_default();
        entry.public |= options.public;
        entry.versioning |= options.versioning || self.versioning;
        Ok(())
    }

    async fn bucket_exists(&self, bucket: &str) -> StorageResult<bool> {
        Ok(self.enter().contains_key(bucket))
    }

    async fn bucket_is_public(&self, bucket: &str) -> StorageResult<bool> {
        let store = self.enter();
        let bucket = store.get(bucket).ok_or_else(|| bucket_not_found(bucket))?;
        Ok(bucket.public)
    }

    async fn clear_bucket(&self, bucket: &str) -> StorageResult<()> {
        bucket_mut(&mut self.enter(), bucket)?.files.clear();
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> StorageResult<()> {
        self.enter()
            .remove(bucket)
            .map(drop)
            .ok_or_else(|| bucket_not_found(bucket))
    }

    async fn list_files(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        max: Option<usize>,
    ) -> StorageResult<Vec<FileEntry>> {
        let store = self.enter();
        let bucket = store.get(bucket).ok_or_else(|| bucket_not_found(bucket))?;

        let files = bucket
            .files
            .iter()
            .filter(|(key, _)| prefix.is_none_or(|prefix| key.starts_with(prefix)))
            .filter_map(|(key, versions)| {
                let latest = versions.last()?;
                Some(FileEntry::new(key.clone(), latest.contents.len() as u64))
            })
            .take(max.unwrap_or(usize::MAX))
            .collect();

        Ok(files)
    }

    async fn put_file(
        &self,
        bucket: &str,
        key: &str,
        stream: PayloadStream,
        options: &AddFileOptions,
    ) -> StorageResult<()> {
        let contents = stream::collect(stream).await?;
        let file = StoredFile {
            contents,
            content_type: options.content_type.clone(),
            metadata: options.metadata.clone(),
        };

        let mut store = self.enter();
        let bucket = bucket_mut(&mut store, bucket)?;
        let versions = bucket.files.entry(key.to_owned()).or_default();
        if !bucket.versioning {
            versions.clear();
        }
        versions.push(file);

        Ok(())
    }

    async fn get_file(
        &self,
        bucket: &str,
        key: &str,
        range: StreamRange,
    ) -> StorageResult<PayloadStream> {
        let contents = latest(&self.enter(), bucket, key)?.contents.clone();
        let range = range.apply(contents.len() as u64);
        Ok(stream::once(
            contents.slice(range.start as usize..range.end as usize),
        ))
    }

    async fn delete_file(&self, bucket: &str, key: &str, all_versions: bool) -> StorageResult<()> {
        let mut store = self.enter();
        let files = &mut bucket_mut(&mut store, bucket)?.files;
        let versions = files
            .get_mut(key)
            .ok_or_else(|| file_not_found(bucket, key))?;

        if !all_versions {
            versions.pop();
        }
        if all_versions || versions.is_empty() {
            files.remove(key);
        }

        Ok(())
    }

    async fn size_of(&self, bucket: &str, key: &str) -> StorageResult<u64> {
        Ok(latest(&self.enter(), bucket, key)?.contents.len() as u64)
    }

    async fn public_url(
        &self,
        bucket: &str,
        key: &str,
        _options: &PublicUrlOptions,
    ) -> StorageResult<String> {
        self.enter();
        Ok(Self::url(bucket, key))
    }

    async fn signed_url(
        &self,
        bucket: &str,
        key: &str,
        options: &SignedUrlOptions,
    ) -> StorageResult<String> {
        self.enter();
        Ok(format!(
            "{}?expires={}",
            Self::url(bucket, key),
            options.expires_in.as_secs()
        ))
    }

    async fn presigned_upload_url(
        &self,
        bucket: &str,
        key: &str,
        options: &UploadUrlOptions,
    ) -> StorageResult<PresignedUpload> {
        self.enter();
        Ok(PresignedUpload::put(format!(
            "{}?expires={}",
            Self::url(bucket, key),
            options.expires_in.as_secs()
        )))
    }
}
