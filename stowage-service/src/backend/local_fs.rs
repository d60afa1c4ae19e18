//! Buckets as directories on the local filesystem.

use std::io::{ErrorKind, SeekFrom};
use std::path::{Component, Path, PathBuf};
use std::pin::pin;

use futures_util::StreamExt;
use stowage_types::{Configuration, FileEntry, StreamRange};
use tokio::fs::{DirBuilder, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufWriter};
use tokio_util::io::{ReaderStream, StreamReader};

use super::common::{Backend, bucket_not_found, file_not_found};
use crate::PayloadStream;
use crate::error::{StorageError, StorageResult};
use crate::options::{
    AddFileOptions, CreateBucketOptions, PresignedUpload, PublicUrlOptions, SignedUrlOptions,
    UploadUrlOptions,
};

/// File name prefix of uploads in progress. Such files are never listed.
const PARTIAL_PREFIX: &str = ".stowage-partial-";

/// Directory mode used when none is configured.
const DEFAULT_MODE: u32 = 0o777;

/// Stores every bucket as a directory below a root directory.
///
/// Buckets are always public: the public URL of a file is its path on disk.
#[derive(Debug)]
pub struct LocalFs {
    directory: PathBuf,
    mode: u32,
}

impl LocalFs {
    /// Creates a backend rooted at `directory`.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            mode: DEFAULT_MODE,
        }
    }

    /// Sets the permission bits of created directories.
    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    /// Creates a backend from the `directory` (or principal) and `mode` options.
    pub fn from_config(config: &Configuration) -> StorageResult<Self> {
        let directory = config
            .get_str("directory")
            .or_else(|| config.principal())
            .ok_or_else(|| {
                StorageError::config("local storage requires a `directory` to store buckets in")
            })?;

        let mode = match config.get_string("mode") {
            Some(mode) => u32::from_str_radix(mode.trim(), 8).map_err(|_| {
                StorageError::config(format!(
                    "invalid value `{mode}` for option `mode`: expected an octal number"
                ))
            })?,
            None => DEFAULT_MODE,
        };

        Ok(Self::new(directory).with_mode(mode))
    }

    /// The root directory.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn bucket_path(&self, bucket: &str) -> StorageResult<PathBuf> {
        let mut components = Path::new(bucket).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.directory.join(bucket)),
            _ => Err(StorageError::validation(format!(
                "Invalid bucket name {bucket}: must be a single path segment"
            ))),
        }
    }

    fn file_path(&self, bucket: &str, key: &str) -> StorageResult<PathBuf> {
        let relative = Path::new(key);
        let escapes = relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_) | Component::CurDir));
        if escapes || key.starts_with('/') {
            return Err(StorageError::validation(format!(
                "Invalid file name {key}: must be a relative path inside the bucket"
            )));
        }

        Ok(self.bucket_path(bucket)?.join(relative))
    }

    async fn create_dir(&self, path: &Path) -> std::io::Result<()> {
        let mut builder = DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        builder.mode(self.mode);
        builder.create(path).await
    }

    async fn ensure_bucket(&self, bucket: &str) -> StorageResult<PathBuf> {
        let path = self.bucket_path(bucket)?;
        match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_dir() => Ok(path),
            Ok(_) => Err(bucket_not_found(bucket)),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(bucket_not_found(bucket)),
            Err(err) => Err(err.into()),
        }
    }

    fn display_path(&self, bucket: &str, key: &str, without_directory: bool) -> StorageResult<String> {
        if without_directory {
            return Ok(format!("{bucket}/{key}"));
        }

        let path = std::path::absolute(self.file_path(bucket, key)?)?;
        Ok(path.to_string_lossy().into_owned())
    }
}

#[async_trait::async_trait]
impl Backend for LocalFs {
    fn name(&self) -> &'static str {
        "local"
    }

    #[tracing::instrument(level = "trace", skip_all)]
    async fn list_buckets(&self) -> StorageResult<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.directory).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut buckets = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                buckets.push(entry.file_name().to_string_lossy().into_owned());
            }
        }

        buckets.sort();
        Ok(buckets)
    }

    #[tracing::instrument(level = "trace", fields(?bucket), skip_all)]
    async fn create_bucket(
        &self,
        bucket: &str,
        options: &CreateBucketOptions,
    ) -> StorageResult<()> {
        if options.versioning {
            tracing::warn!(bucket, "local storage does not support versioning, ignoring");
        }

        let path = self.bucket_path(bucket)?;
        self.create_dir(&path).await?;
        Ok(())
    }

    async fn bucket_exists(&self, bucket: &str) -> StorageResult<bool> {
        match self.ensure_bucket(bucket).await {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn bucket_is_public(&self, bucket: &str) -> StorageResult<bool> {
        self.ensure_bucket(bucket).await?;
        Ok(true)
    }

    #[tracing::instrument(level = "trace", fields(?bucket), skip_all)]
    async fn clear_bucket(&self, bucket: &str) -> StorageResult<()> {
        let path = self.ensure_bucket(bucket).await?;
        let mut entries = tokio::fs::read_dir(&path).await?;

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                tokio::fs::remove_dir_all(entry.path()).await?;
            } else {
                tokio::fs::remove_file(entry.path()).await?;
            }
        }

        Ok(())
    }

    #[tracing::instrument(level = "trace", fields(?bucket), skip_all)]
    async fn delete_bucket(&self, bucket: &str) -> StorageResult<()> {
        let path = self.ensure_bucket(bucket).await?;
        tokio::fs::remove_dir_all(path).await?;
        Ok(())
    }

    #[tracing::instrument(level = "trace", fields(?bucket, ?prefix), skip_all)]
    async fn list_files(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        max: Option<usize>,
    ) -> StorageResult<Vec<FileEntry>> {
        let root = self.ensure_bucket(bucket).await?;

        let mut files = Vec::new();
        let mut pending = vec![root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let metadata = entry.metadata().await?;
                if metadata.is_dir() {
                    pending.push(entry.path());
                    continue;
                }

                if entry.file_name().to_string_lossy().starts_with(PARTIAL_PREFIX) {
                    continue;
                }

                let path = entry.path();
                let Ok(relative) = path.strip_prefix(&root) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|component| component.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");

                if prefix.is_none_or(|prefix| key.starts_with(prefix)) {
                    files.push(FileEntry::new(key, metadata.len()));
                }
            }
        }

        files.sort_by(|a, b| a.path.cmp(&b.path));
        if let Some(max) = max {
            files.truncate(max);
        }
        Ok(files)
    }

    #[tracing::instrument(level = "trace", fields(?bucket, ?key), skip_all)]
    async fn put_file(
        &self,
        bucket: &str,
        key: &str,
        stream: PayloadStream,
        _options: &AddFileOptions,
    ) -> StorageResult<()> {
        tracing::debug!("Writing to local_fs backend");
        let bucket_path = self.ensure_bucket(bucket).await?;
        let path = self.file_path(bucket, key)?;
        let dir = path.parent().unwrap_or(&bucket_path);
        self.create_dir(dir).await?;

        // The upload goes to a sibling file first, so a failed stream leaves the previous
        // contents in place. Dropping `partial` removes the file.
        let mut builder = tempfile::Builder::new();
        builder.prefix(PARTIAL_PREFIX);
        #[cfg(unix)]
        builder.permissions(std::os::unix::fs::PermissionsExt::from_mode(0o666));
        let (file, partial) = builder.tempfile_in(dir)?.into_parts();

        let mut reader = pin!(StreamReader::new(stream));
        let mut writer = BufWriter::new(tokio::fs::File::from_std(file));

        tokio::io::copy(&mut reader, &mut writer).await?;
        writer.flush().await?;
        writer.into_inner().sync_data().await?;

        tokio::fs::rename(&partial, &path).await?;
        Ok(())
    }

    #[tracing::instrument(level = "trace", fields(?bucket, ?key, %range), skip_all)]
    async fn get_file(
        &self,
        bucket: &str,
        key: &str,
        range: StreamRange,
    ) -> StorageResult<PayloadStream> {
        tracing::debug!("Reading from local_fs backend");
        let path = self.file_path(bucket, key)?;
        let mut file = match OpenOptions::new().read(true).open(path).await {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(file_not_found(bucket, key));
            }
            Err(err) => return Err(err.into()),
        };

        if range.offset() > 0 {
            file.seek(SeekFrom::Start(range.offset())).await?;
        }

        let stream = match range.requested_len() {
            Some(len) => ReaderStream::new(file.take(len)).boxed(),
            None => ReaderStream::new(file).boxed(),
        };
        Ok(stream)
    }

    #[tracing::instrument(level = "trace", fields(?bucket, ?key), skip_all)]
    async fn delete_file(&self, bucket: &str, key: &str, _all_versions: bool) -> StorageResult<()> {
        tracing::debug!("Deleting from local_fs backend");
        let path = self.file_path(bucket, key)?;
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(file_not_found(bucket, key)),
            Err(err) => Err(err.into()),
        }
    }

    async fn size_of(&self, bucket: &str, key: &str) -> StorageResult<u64> {
        let path = self.file_path(bucket, key)?;
        match tokio::fs::metadata(path).await {
            Ok(metadata) if metadata.is_file() => Ok(metadata.len()),
            Ok(_) => Err(file_not_found(bucket, key)),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(file_not_found(bucket, key)),
            Err(err) => Err(err.into()),
        }
    }

    async fn public_url(
        &self,
        bucket: &str,
        key: &str,
        options: &PublicUrlOptions,
    ) -> StorageResult<String> {
        self.display_path(bucket, key, options.without_directory)
    }

    async fn signed_url(
        &self,
        bucket: &str,
        key: &str,
        _options: &SignedUrlOptions,
    ) -> StorageResult<String> {
        tracing::debug!("local storage has no signed URLs, returning the file path");
        self.display_path(bucket, key, false)
    }

    async fn presigned_upload_url(
        &self,
        bucket: &str,
        key: &str,
        _options: &UploadUrlOptions,
    ) -> StorageResult<PresignedUpload> {
        tracing::debug!("local storage has no upload URLs, returning the file path");
        Ok(PresignedUpload::put(self.display_path(bucket, key, false)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{collect, once};

    fn backend(dir: &Path) -> LocalFs {
        LocalFs::new(dir)
    }

    #[tokio::test]
    async fn stores_files() {
        let tempdir = tempfile::tempdir().unwrap();
        let backend = backend(tempdir.path());
        backend
            .create_bucket("bucket", &Default::default())
            .await
            .unwrap();

        backend
            .put_file("bucket", "nested/oh.txt", once("oh hai!"), &Default::default())
            .await
            .unwrap();

        let stream = backend
            .get_file("bucket", "nested/oh.txt", StreamRange::FULL)
            .await
            .unwrap();
        assert_eq!(collect(stream).await.unwrap().as_ref(), b"oh hai!");

        let files = backend.list_files("bucket", None, None).await.unwrap();
        assert_eq!(files, vec![FileEntry::new("nested/oh.txt", 7)]);
    }

    #[tokio::test]
    async fn overwrites_files() {
        let tempdir = tempfile::tempdir().unwrap();
        let backend = backend(tempdir.path());
        backend.create_bucket("b", &Default::default()).await.unwrap();

        backend
            .put_file("b", "f", once("a longer first version"), &Default::default())
            .await
            .unwrap();
        backend
            .put_file("b", "f", once("short"), &Default::default())
            .await
            .unwrap();

        assert_eq!(backend.size_of("b", "f").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn failed_overwrite_keeps_previous_contents() {
        let tempdir = tempfile::tempdir().unwrap();
        let backend = backend(tempdir.path());
        backend.create_bucket("b", &Default::default()).await.unwrap();
        backend
            .put_file("b", "f", once("original contents"), &Default::default())
            .await
            .unwrap();

        let chunks = vec![
            Ok(bytes::Bytes::from_static(b"par")),
            Err(std::io::Error::other("connection reset")),
        ];
        let stream = futures_util::stream::iter(chunks).boxed();
        let result = backend.put_file("b", "f", stream, &Default::default()).await;
        assert!(result.is_err());

        let stream = backend.get_file("b", "f", StreamRange::FULL).await.unwrap();
        assert_eq!(collect(stream).await.unwrap().as_ref(), b"original contents");

        let files = backend.list_files("b", None, None).await.unwrap();
        assert_eq!(files, vec![FileEntry::new("f", 17)]);

        let leftovers = std::fs::read_dir(tempdir.path().join("b")).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[tokio::test]
    async fn reads_ranges() {
        let tempdir = tempfile::tempdir().unwrap();
        let backend = backend(tempdir.path());
        backend.create_bucket("b", &Default::default()).await.unwrap();
        backend
            .put_file("b", "digits", once("0123456789"), &Default::default())
            .await
            .unwrap();

        let cases = [
            (StreamRange::new(Some(2), Some(4)), &b"234"[..]),
            (StreamRange::new(Some(7), None), b"789"),
            (StreamRange::new(None, Some(1)), b"01"),
            (StreamRange::new(Some(8), Some(100)), b"89"),
        ];
        for (range, expected) in cases {
            let stream = backend.get_file("b", "digits", range.unwrap()).await.unwrap();
            assert_eq!(collect(stream).await.unwrap().as_ref(), expected);
        }
    }

    #[tokio::test]
    async fn rejects_escaping_keys() {
        let tempdir = tempfile::tempdir().unwrap();
        let backend = backend(tempdir.path());

        for key in ["../escape", "/etc/passwd", "a/../../b"] {
            let err = backend.size_of("b", key).await.unwrap_err();
            assert_eq!(err.kind(), crate::ErrorKind::Validation, "{key}");
        }

        let err = backend.bucket_exists("../b").await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn missing_files() {
        let tempdir = tempfile::tempdir().unwrap();
        let backend = backend(tempdir.path());
        backend.create_bucket("b", &Default::default()).await.unwrap();

        assert!(backend.size_of("b", "nope").await.unwrap_err().is_not_found());
        assert!(backend.delete_file("b", "nope", true).await.unwrap_err().is_not_found());
        assert!(!backend.file_exists("b", "nope").await.unwrap());
        assert!(backend.list_files("other", None, None).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn public_urls_are_paths() {
        let tempdir = tempfile::tempdir().unwrap();
        let backend = backend(tempdir.path());

        let url = backend
            .public_url("b", "img.png", &Default::default())
            .await
            .unwrap();
        assert!(url.ends_with("img.png"));
        assert!(url.starts_with(&*tempdir.path().to_string_lossy()));

        let options = PublicUrlOptions {
            without_directory: true,
            ..Default::default()
        };
        let url = backend.public_url("b", "img.png", &options).await.unwrap();
        assert_eq!(url, "b/img.png");
    }

    #[test]
    fn parses_mode() {
        let config = Configuration::parse("local://data?mode=750").unwrap();
        let backend = LocalFs::from_config(&config).unwrap();
        assert_eq!(backend.mode, 0o750);
        assert_eq!(backend.directory(), Path::new("data"));

        let config = Configuration::new("local")
            .with("directory", "/srv/files")
            .with("mode", "rwx");
        assert!(LocalFs::from_config(&config).is_err());

        assert!(LocalFs::from_config(&Configuration::new("local")).is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn applies_mode() {
        use std::os::unix::fs::PermissionsExt;

        let tempdir = tempfile::tempdir().unwrap();
        let backend = LocalFs::new(tempdir.path()).with_mode(0o700);
        backend.create_bucket("b", &Default::default()).await.unwrap();

        let metadata = std::fs::metadata(tempdir.path().join("b")).unwrap();
        assert_eq!(metadata.permissions().mode() & 0o777, 0o700);
    }
}
