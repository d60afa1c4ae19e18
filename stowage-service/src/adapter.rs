//! The provider-independent half of every storage operation.
//!
//! An [`Adapter`] binds one [`Backend`] to its [`Configuration`] and implements the rules every
//! provider shares:
//!
//! - A configuration error found during construction is kept and returned from every operation
//!   before the backend is touched.
//! - Bucket and file names are validated before the backend is called.
//! - The configured default bucket is created on first use.
//! - Destructive operations are idempotent: removing what does not exist succeeds.

use std::fmt;
use std::path::PathBuf;

use bytes::Bytes;
use futures_util::StreamExt;
use stowage_types::{ConfigInput, Configuration, FileEntry, StreamRange};
use tokio::sync::OnceCell;
use tokio_util::io::ReaderStream;

use crate::PayloadStream;
use crate::backend::{Backend, BoxedBackend};
use crate::error::{StorageError, StorageResult};
use crate::options::{
    AddFileOptions, CreateBucketOptions, PresignedUpload, PublicUrlOptions, SignedUrlOptions,
    UploadUrlOptions,
};
use crate::registry;
use crate::stream;

/// Names that are rejected although they are not blank.
const RESERVED_NAMES: &[&str] = &["null", "undefined"];

/// Checks a bucket or file name.
///
/// Rejects absent and blank names and the literal strings `null` and `undefined`, which typically
/// leak in from untyped callers.
pub fn validate_name(name: Option<&str>) -> StorageResult<&str> {
    let Some(name) = name else {
        return Err(StorageError::validation("No name provided"));
    };

    if name.trim().is_empty() {
        return Err(StorageError::validation("Name must not be empty"));
    }
    if RESERVED_NAMES.contains(&name) {
        return Err(StorageError::validation(format!(
            "{name:?} is not a valid name"
        )));
    }

    Ok(name)
}

/// Where the contents of a new file come from.
pub enum FileSource {
    /// A file on the local filesystem.
    Path(PathBuf),
    /// An in-memory buffer.
    Buffer(Bytes),
    /// A stream of chunks.
    Stream(PayloadStream),
}

impl fmt::Debug for FileSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Self::Buffer(bytes) => f.debug_tuple("Buffer").field(&bytes.len()).finish(),
            Self::Stream(_) => f.debug_tuple("Stream").finish_non_exhaustive(),
        }
    }
}

impl FileSource {
    async fn into_stream(self) -> StorageResult<PayloadStream> {
        Ok(match self {
            Self::Path(path) => {
                let file = tokio::fs::File::open(&path).await.map_err(|err| {
                    StorageError::validation(format!(
                        "Could not read {}: {err}",
                        path.display()
                    ))
                })?;
                ReaderStream::new(file).boxed()
            }
            Self::Buffer(bytes) => stream::once(bytes),
            Self::Stream(stream) => stream,
        })
    }
}

impl From<PathBuf> for FileSource {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl From<Bytes> for FileSource {
    fn from(bytes: Bytes) -> Self {
        Self::Buffer(bytes)
    }
}

impl From<Vec<u8>> for FileSource {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Buffer(bytes.into())
    }
}

impl From<PayloadStream> for FileSource {
    fn from(stream: PayloadStream) -> Self {
        Self::Stream(stream)
    }
}

#[derive(Debug)]
enum State {
    /// Construction failed, every operation returns this message.
    Invalid(String),
    Ready {
        config: Configuration,
        backend: BoxedBackend,
    },
}

/// A storage provider bound to its configuration.
#[derive(Debug)]
pub struct Adapter {
    provider: String,
    state: State,
    selected_bucket: Option<String>,
    initialized: OnceCell<()>,
}

impl Adapter {
    /// Creates an adapter from a connection string or configuration.
    ///
    /// This never fails. Errors in the configuration are returned from every operation instead.
    pub async fn new(input: impl Into<ConfigInput>) -> Self {
        let input = input.into();
        let provider = input.provider_hint();

        match Self::connect(input).await {
            Ok((config, backend)) => Self::ready(config, backend),
            Err(err) => {
                tracing::warn!(provider, error = %err, "invalid storage configuration");
                Self {
                    provider,
                    state: State::Invalid(err.to_string()),
                    selected_bucket: None,
                    initialized: OnceCell::new(),
                }
            }
        }
    }

    /// Creates an adapter around an existing backend.
    pub fn from_backend(config: Configuration, backend: impl Backend) -> Self {
        Self::ready(config, Box::new(backend))
    }

    async fn connect(input: ConfigInput) -> StorageResult<(Configuration, BoxedBackend)> {
        let config = input.resolve()?;
        let backend = registry::create(&config).await?;
        Ok((config, backend))
    }

    fn ready(config: Configuration, backend: BoxedBackend) -> Self {
        Self {
            provider: config.provider().to_owned(),
            selected_bucket: config.bucket().map(str::to_owned),
            state: State::Ready { config, backend },
            initialized: OnceCell::new(),
        }
    }

    /// The provider id, as far as it could be determined.
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// The configuration, unless construction failed.
    pub fn config(&self) -> Option<&Configuration> {
        match &self.state {
            State::Ready { config, .. } => Some(config),
            State::Invalid(_) => None,
        }
    }

    /// The configuration error recorded during construction.
    pub fn config_error(&self) -> Option<&str> {
        match &self.state {
            State::Invalid(message) => Some(message),
            State::Ready { .. } => None,
        }
    }

    /// The name of the backend, unless construction failed.
    pub fn backend_name(&self) -> Option<&'static str> {
        match &self.state {
            State::Ready { backend, .. } => Some(backend.name()),
            State::Invalid(_) => None,
        }
    }

    /// The currently selected bucket.
    pub fn selected_bucket(&self) -> Option<&str> {
        self.selected_bucket.as_deref()
    }

    /// Selects the bucket used when an operation does not name one.
    ///
    /// The bucket is not checked for existence. `None` or a blank name clears the selection.
    pub fn select_bucket(&mut self, bucket: Option<&str>) -> StorageResult<()> {
        self.check()?;

        self.selected_bucket = match bucket {
            Some(name) if !name.trim().is_empty() => Some(validate_name(Some(name))?.to_owned()),
            _ => None,
        };
        Ok(())
    }

    fn check(&self) -> StorageResult<()> {
        match &self.state {
            State::Invalid(message) => Err(StorageError::config(message.clone())),
            State::Ready { .. } => Ok(()),
        }
    }

    /// Returns the backend, initializing the adapter on first use.
    async fn backend(&self) -> StorageResult<&dyn Backend> {
        let (config, backend) = match &self.state {
            State::Invalid(message) => return Err(StorageError::config(message.clone())),
            State::Ready { config, backend } => (config, backend.as_ref()),
        };

        self.initialized
            .get_or_try_init(|| initialize(config, backend))
            .await?;
        Ok(backend)
    }

    fn resolve_bucket<'a>(&'a self, bucket: Option<&'a str>) -> StorageResult<&'a str> {
        match bucket {
            Some(bucket) => validate_name(Some(bucket)),
            None => self.selected_bucket.as_deref().ok_or_else(|| {
                StorageError::validation("No bucket provided and no bucket selected")
            }),
        }
    }

    /// Creates a bucket. Creating a bucket that exists succeeds.
    #[tracing::instrument(level = "trace", fields(provider = %self.provider, ?bucket), skip_all)]
    pub async fn create_bucket(
        &self,
        bucket: Option<&str>,
        options: &CreateBucketOptions,
    ) -> StorageResult<()> {
        self.check()?;
        let bucket = validate_name(bucket)?;
        let backend = self.backend().await?;

        if backend.bucket_exists(bucket).await? {
            tracing::debug!("bucket already exists");
            return Ok(());
        }
        backend.create_bucket(bucket, options).await
    }

    /// Removes every file from a bucket. Clearing a missing bucket succeeds.
    #[tracing::instrument(level = "trace", fields(provider = %self.provider, ?bucket), skip_all)]
    pub async fn clear_bucket(&self, bucket: Option<&str>) -> StorageResult<()> {
        self.check()?;
        let bucket = self.resolve_bucket(bucket)?;
        let backend = self.backend().await?;

        match backend.clear_bucket(bucket).await {
            Err(err) if err.is_not_found() => Ok(()),
            result => result,
        }
    }

    /// Clears and deletes a bucket. Deleting a missing bucket succeeds.
    ///
    /// If the bucket was selected, the selection is cleared.
    #[tracing::instrument(level = "trace", fields(provider = %self.provider, ?bucket), skip_all)]
    pub async fn delete_bucket(&mut self, bucket: Option<&str>) -> StorageResult<()> {
        self.check()?;
        let bucket = self.resolve_bucket(bucket)?.to_owned();
        let backend = self.backend().await?;

        if backend.bucket_exists(&bucket).await? {
            // A failed clear leaves the bucket in place.
            match backend.clear_bucket(&bucket).await {
                Err(err) if err.is_not_found() => (),
                result => result?,
            }
            match backend.delete_bucket(&bucket).await {
                Err(err) if err.is_not_found() => (),
                result => result?,
            }
        }

        if self.selected_bucket.as_deref() == Some(bucket.as_str()) {
            self.selected_bucket = None;
        }
        Ok(())
    }

    /// Lists all buckets.
    #[tracing::instrument(level = "trace", fields(provider = %self.provider), skip_all)]
    pub async fn list_buckets(&self) -> StorageResult<Vec<String>> {
        self.backend().await?.list_buckets().await
    }

    /// Returns whether a bucket exists.
    pub async fn bucket_exists(&self, bucket: Option<&str>) -> StorageResult<bool> {
        self.check()?;
        let bucket = validate_name(bucket)?;
        self.backend().await?.bucket_exists(bucket).await
    }

    /// Returns whether the files of a bucket can be read without credentials.
    pub async fn bucket_is_public(&self, bucket: Option<&str>) -> StorageResult<bool> {
        self.check()?;
        let bucket = validate_name(bucket)?;
        self.backend().await?.bucket_is_public(bucket).await
    }

    /// Uploads a file to `options.bucket` or the selected bucket.
    #[tracing::instrument(level = "trace", fields(provider = %self.provider, ?target), skip_all)]
    pub async fn add_file(
        &self,
        source: FileSource,
        target: Option<&str>,
        options: &AddFileOptions,
    ) -> StorageResult<()> {
        self.check()?;
        let bucket = self.resolve_bucket(options.bucket.as_deref())?;
        let target = validate_name(target)?;
        let stream = source.into_stream().await?;

        self.backend()
            .await?
            .put_file(bucket, target, stream, options)
            .await
    }

    /// Uploads a local file.
    pub async fn add_file_from_path(
        &self,
        path: impl Into<PathBuf>,
        target: &str,
        options: &AddFileOptions,
    ) -> StorageResult<()> {
        self.add_file(FileSource::Path(path.into()), Some(target), options)
            .await
    }

    /// Uploads the contents of a buffer.
    pub async fn add_file_from_buffer(
        &self,
        buffer: impl Into<Bytes>,
        target: &str,
        options: &AddFileOptions,
    ) -> StorageResult<()> {
        self.add_file(FileSource::Buffer(buffer.into()), Some(target), options)
            .await
    }

    /// Uploads the contents of a stream.
    pub async fn add_file_from_stream(
        &self,
        stream: PayloadStream,
        target: &str,
        options: &AddFileOptions,
    ) -> StorageResult<()> {
        self.add_file(FileSource::Stream(stream), Some(target), options)
            .await
    }

    /// Streams a file or an inclusive byte range of it.
    #[tracing::instrument(level = "trace", fields(provider = %self.provider, ?bucket, ?name, %range), skip_all)]
    pub async fn get_file_as_stream(
        &self,
        bucket: Option<&str>,
        name: Option<&str>,
        range: StreamRange,
    ) -> StorageResult<PayloadStream> {
        self.check()?;
        let bucket = self.resolve_bucket(bucket)?;
        let name = validate_name(name)?;
        range.validate()?;

        self.backend().await?.get_file(bucket, name, range).await
    }

    /// Reads a file or an inclusive byte range of it into memory.
    pub async fn get_file_as_bytes(
        &self,
        bucket: Option<&str>,
        name: Option<&str>,
        range: StreamRange,
    ) -> StorageResult<Bytes> {
        let stream = self.get_file_as_stream(bucket, name, range).await?;
        Ok(stream::collect(stream).await?)
    }

    /// Returns the URL of a file in a public bucket.
    ///
    /// Fails if the bucket is not public, unless `skip_public_check` is set.
    pub async fn get_public_url(
        &self,
        bucket: Option<&str>,
        name: Option<&str>,
        options: &PublicUrlOptions,
    ) -> StorageResult<String> {
        self.check()?;
        let bucket = self.resolve_bucket(bucket)?;
        let name = validate_name(name)?;
        let backend = self.backend().await?;

        if !options.skip_public_check && !backend.bucket_is_public(bucket).await? {
            return Err(StorageError::validation(format!(
                "Bucket {bucket} is not public"
            )));
        }
        backend.public_url(bucket, name, options).await
    }

    /// Returns a time-limited download URL that works on private buckets.
    pub async fn get_signed_url(
        &self,
        bucket: Option<&str>,
        name: Option<&str>,
        options: &SignedUrlOptions,
    ) -> StorageResult<String> {
        self.check()?;
        let bucket = self.resolve_bucket(bucket)?;
        let name = validate_name(name)?;
        self.backend().await?.signed_url(bucket, name, options).await
    }

    /// Returns a time-limited upload URL.
    pub async fn get_presigned_upload_url(
        &self,
        bucket: Option<&str>,
        name: Option<&str>,
        options: &UploadUrlOptions,
    ) -> StorageResult<PresignedUpload> {
        self.check()?;
        let bucket = self.resolve_bucket(bucket)?;
        let name = validate_name(name)?;
        self.backend()
            .await?
            .presigned_upload_url(bucket, name, options)
            .await
    }

    /// Removes a file, with all its versions unless `all_versions` is `false`.
    ///
    /// Removing a file that does not exist succeeds.
    #[tracing::instrument(level = "trace", fields(provider = %self.provider, ?bucket, ?name), skip_all)]
    pub async fn remove_file(
        &self,
        bucket: Option<&str>,
        name: Option<&str>,
        all_versions: bool,
    ) -> StorageResult<()> {
        self.check()?;
        let bucket = self.resolve_bucket(bucket)?;
        let name = validate_name(name)?;
        let backend = self.backend().await?;

        match backend.delete_file(bucket, name, all_versions).await {
            Err(err) if err.is_not_found() => {
                tracing::debug!("file does not exist");
                Ok(())
            }
            result => result,
        }
    }

    /// Lists up to `max` files of a bucket.
    pub async fn list_files(
        &self,
        bucket: Option<&str>,
        max: Option<usize>,
    ) -> StorageResult<Vec<FileEntry>> {
        self.list_files_with_prefix(bucket, None, max).await
    }

    /// Lists up to `max` files of a bucket whose names start with `prefix`.
    #[tracing::instrument(level = "trace", fields(provider = %self.provider, ?bucket, ?prefix), skip_all)]
    pub async fn list_files_with_prefix(
        &self,
        bucket: Option<&str>,
        prefix: Option<&str>,
        max: Option<usize>,
    ) -> StorageResult<Vec<FileEntry>> {
        self.check()?;
        let bucket = self.resolve_bucket(bucket)?;
        let prefix = prefix.filter(|prefix| !prefix.is_empty());
        self.backend()
            .await?
            .list_files(bucket, prefix, max)
            .await
    }

    /// Returns the size of a file in bytes.
    pub async fn size_of(&self, bucket: Option<&str>, name: Option<&str>) -> StorageResult<u64> {
        self.check()?;
        let bucket = self.resolve_bucket(bucket)?;
        let name = validate_name(name)?;
        self.backend().await?.size_of(bucket, name).await
    }

    /// Returns whether a file exists. A missing bucket reads as `false`.
    pub async fn file_exists(
        &self,
        bucket: Option<&str>,
        name: Option<&str>,
    ) -> StorageResult<bool> {
        self.check()?;
        let bucket = self.resolve_bucket(bucket)?;
        let name = validate_name(name)?;

        match self.backend().await?.file_exists(bucket, name).await {
            Err(err) if err.is_not_found() => Ok(false),
            result => result,
        }
    }
}

/// Creates the configured bucket if it does not exist yet.
async fn initialize(config: &Configuration, backend: &dyn Backend) -> StorageResult<()> {
    let Some(bucket) = config.bucket() else {
        return Ok(());
    };

    let bucket = validate_name(Some(bucket))?;
    if !backend.bucket_exists(bucket).await? {
        tracing::info!(bucket, "creating configured bucket");
        backend
            .create_bucket(bucket, &CreateBucketOptions::default())
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::ErrorKind;
    use crate::backend::InMemoryBackend;

    use super::*;

    fn memory() -> (InMemoryBackend, Adapter) {
        let backend = InMemoryBackend::new();
        let adapter = Adapter::from_backend(Configuration::new("memory"), backend.clone());
        (backend, adapter)
    }

    /// A backend with one bucket whose files cannot be removed.
    #[derive(Debug, Clone, Default)]
    struct UndeletableFiles {
        deleted_buckets: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl Backend for UndeletableFiles {
        fn name(&self) -> &'static str {
            "undeletable"
        }

        async fn list_buckets(&self) -> StorageResult<Vec<String>> {
            Ok(vec!["b".to_owned()])
        }

        async fn create_bucket(
            &self,
            _bucket: &str,
            _options: &CreateBucketOptions,
        ) -> StorageResult<()> {
            Ok(())
        }

        async fn bucket_exists(&self, bucket: &str) -> StorageResult<bool> {
            Ok(bucket == "b")
        }

        async fn bucket_is_public(&self, _bucket: &str) -> StorageResult<bool> {
            Ok(false)
        }

        async fn clear_bucket(&self, _bucket: &str) -> StorageResult<()> {
            Err(StorageError::backend("failed to delete objects", "access denied"))
        }

        async fn delete_bucket(&self, _bucket: &str) -> StorageResult<()> {
            self.deleted_buckets.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        async fn list_files(
            &self,
            _bucket: &str,
            _prefix: Option<&str>,
            _max: Option<usize>,
        ) -> StorageResult<Vec<FileEntry>> {
            Ok(vec![FileEntry::new("locked.txt", 6)])
        }

        async fn put_file(
            &self,
            _bucket: &str,
            _key: &str,
            _stream: PayloadStream,
            _options: &AddFileOptions,
        ) -> StorageResult<()> {
            Err(StorageError::unsupported("read only"))
        }

        async fn get_file(
            &self,
            _bucket: &str,
            _key: &str,
            _range: StreamRange,
        ) -> StorageResult<PayloadStream> {
            Err(StorageError::unsupported("not readable"))
        }

        async fn delete_file(
            &self,
            _bucket: &str,
            _key: &str,
            _all_versions: bool,
        ) -> StorageResult<()> {
            Err(StorageError::backend("failed to delete object", "access denied"))
        }

        async fn size_of(&self, _bucket: &str, _key: &str) -> StorageResult<u64> {
            Ok(6)
        }

        async fn public_url(
            &self,
            _bucket: &str,
            _key: &str,
            _options: &PublicUrlOptions,
        ) -> StorageResult<String> {
            Err(StorageError::unsupported("no public urls"))
        }

        async fn signed_url(
            &self,
            _bucket: &str,
            _key: &str,
            _options: &SignedUrlOptions,
        ) -> StorageResult<String> {
            Err(StorageError::unsupported("no signed urls"))
        }

        async fn presigned_upload_url(
            &self,
            _bucket: &str,
            _key: &str,
            _options: &UploadUrlOptions,
        ) -> StorageResult<PresignedUpload> {
            Err(StorageError::unsupported("no upload urls"))
        }
    }

    #[tokio::test]
    async fn failed_clear_keeps_bucket() {
        let backend = UndeletableFiles::default();
        let mut adapter = Adapter::from_backend(Configuration::new("memory"), backend.clone());
        adapter.select_bucket(Some("b")).unwrap();

        let err = adapter.delete_bucket(None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Backend);
        assert_eq!(err.to_string(), "failed to delete objects: access denied");

        assert_eq!(backend.deleted_buckets.load(Ordering::Relaxed), 0);
        assert_eq!(adapter.selected_bucket(), Some("b"));
        assert!(adapter.bucket_exists(Some("b")).await.unwrap());
    }

    #[test]
    fn validates_names() {
        assert_eq!(validate_name(Some("photos")).unwrap(), "photos");
        assert_eq!(validate_name(Some("null values")).unwrap(), "null values");

        for name in [None, Some(""), Some("  "), Some("null"), Some("undefined")] {
            let err = validate_name(name).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation, "{name:?}");
        }
    }

    #[tokio::test]
    async fn invalid_config_is_sticky() {
        let mut adapter = Adapter::new("no such provider://").await;
        let message = adapter.config_error().unwrap().to_owned();
        assert!(adapter.config().is_none());

        let err = adapter.list_buckets().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(err.to_string(), message);

        // The configuration error wins over validation errors.
        let err = adapter.create_bucket(None, &Default::default()).await.unwrap_err();
        assert_eq!(err.to_string(), message);
        let err = adapter.select_bucket(Some("b")).unwrap_err();
        assert_eq!(err.to_string(), message);
        let err = adapter.delete_bucket(None).await.unwrap_err();
        assert_eq!(err.to_string(), message);
    }

    #[tokio::test]
    async fn unknown_provider() {
        let adapter = Adapter::new("azure://key@bucket").await;
        assert_eq!(adapter.provider(), "azure");
        assert!(adapter.config_error().unwrap().contains("Unknown provider"));
        assert_eq!(adapter.backend_name(), None);
    }

    #[tokio::test]
    async fn validation_precedes_backend() {
        let (backend, adapter) = memory();

        for name in [None, Some(""), Some("undefined"), Some("null")] {
            let err = adapter.create_bucket(name, &Default::default()).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation);
        }
        let err = adapter.list_files(None, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn creating_existing_bucket_succeeds() {
        let (_backend, adapter) = memory();
        adapter.create_bucket(Some("b"), &Default::default()).await.unwrap();
        adapter.create_bucket(Some("b"), &Default::default()).await.unwrap();
        assert_eq!(adapter.list_buckets().await.unwrap(), ["b"]);
    }

    #[tokio::test]
    async fn creates_configured_bucket() {
        let backend = InMemoryBackend::new();
        let config = Configuration::new("memory").with("bucket", "media");
        let adapter = Adapter::from_backend(config, backend.clone());
        assert_eq!(adapter.selected_bucket(), Some("media"));
        assert_eq!(backend.calls(), 0);

        adapter.list_buckets().await.unwrap();
        assert!(backend.bucket_exists("media").await.unwrap());

        // Initialization runs once.
        let calls = backend.calls();
        adapter.list_buckets().await.unwrap();
        assert_eq!(backend.calls(), calls + 1);
    }

    #[tokio::test]
    async fn selects_buckets() {
        let (_backend, mut adapter) = memory();
        adapter.create_bucket(Some("b"), &Default::default()).await.unwrap();

        adapter.select_bucket(Some("b")).unwrap();
        assert_eq!(adapter.selected_bucket(), Some("b"));
        adapter
            .add_file_from_buffer("hello", "greeting.txt", &Default::default())
            .await
            .unwrap();
        assert_eq!(adapter.size_of(None, Some("greeting.txt")).await.unwrap(), 5);

        let err = adapter.select_bucket(Some("undefined")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(adapter.selected_bucket(), Some("b"));

        adapter.select_bucket(Some(" ")).unwrap();
        assert_eq!(adapter.selected_bucket(), None);

        adapter.select_bucket(Some("b")).unwrap();
        adapter.delete_bucket(None).await.unwrap();
        assert_eq!(adapter.selected_bucket(), None);
        assert!(!adapter.bucket_exists(Some("b")).await.unwrap());
    }

    #[tokio::test]
    async fn destructive_operations_are_idempotent() {
        let (_backend, mut adapter) = memory();
        adapter.create_bucket(Some("b"), &Default::default()).await.unwrap();

        for _ in 0..2 {
            adapter.remove_file(Some("b"), Some("missing"), true).await.unwrap();
        }
        adapter.clear_bucket(Some("gone")).await.unwrap();
        adapter.delete_bucket(Some("gone")).await.unwrap();
    }

    #[tokio::test]
    async fn read_paths_report_missing_files() {
        let (_backend, adapter) = memory();
        adapter.create_bucket(Some("b"), &Default::default()).await.unwrap();

        let err = adapter.size_of(Some("b"), Some("missing")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let Err(err) = adapter
            .get_file_as_stream(Some("b"), Some("missing"), StreamRange::FULL)
            .await
        else {
            panic!("streamed a missing file");
        };
        assert_eq!(err.kind(), ErrorKind::NotFound);

        assert!(!adapter.file_exists(Some("b"), Some("missing")).await.unwrap());
        assert!(!adapter.file_exists(Some("gone"), Some("missing")).await.unwrap());
    }

    #[tokio::test]
    async fn rejects_inverted_ranges() {
        let (backend, adapter) = memory();
        let range = StreamRange {
            start: Some(10),
            end: Some(5),
        };

        let Err(err) = adapter.get_file_as_stream(Some("b"), Some("f"), range).await else {
            panic!("accepted an inverted range");
        };
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn public_url_requires_public_bucket() {
        let (_backend, adapter) = memory();
        adapter.create_bucket(Some("private"), &Default::default()).await.unwrap();
        let public = CreateBucketOptions {
            public: true,
            ..Default::default()
        };
        adapter.create_bucket(Some("public"), &public).await.unwrap();

        let err = adapter
            .get_public_url(Some("private"), Some("a.txt"), &Default::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.to_string(), "Bucket private is not public");

        let skip = PublicUrlOptions {
            skip_public_check: true,
            ..Default::default()
        };
        let url = adapter
            .get_public_url(Some("private"), Some("a.txt"), &skip)
            .await
            .unwrap();
        assert_eq!(url, "memory://private/a.txt");

        let url = adapter
            .get_public_url(Some("public"), Some("a.txt"), &Default::default())
            .await
            .unwrap();
        assert_eq!(url, "memory://public/a.txt");
    }

    #[tokio::test]
    async fn signed_urls_default_to_one_week() {
        let (_backend, adapter) = memory();
        let url = adapter
            .get_signed_url(Some("b"), Some("a.txt"), &Default::default())
            .await
            .unwrap();
        assert_eq!(url, "memory://b/a.txt?expires=604800");
    }

    #[tokio::test]
    async fn missing_source_file_is_reported() {
        let (backend, adapter) = memory();
        let options = AddFileOptions {
            bucket: Some("b".into()),
            ..Default::default()
        };

        let err = adapter
            .add_file_from_path("/nonexistent/source.bin", "target.bin", &options)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(backend.calls(), 0);
    }
}
