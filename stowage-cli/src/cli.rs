//! Argument parsing and command dispatch.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Result, bail};
use argh::FromArgs;
use secrecy::ExposeSecret;
use stowage_service::options::{
    AddFileOptions, CreateBucketOptions, PublicUrlOptions, SignedUrlOptions, UploadCondition,
    UploadUrlOptions,
};
use stowage_service::{Storage, StorageResult, StreamRange, registry};
use tokio::io::AsyncWriteExt;
use tokio_util::io::StreamReader;

use crate::config::Config;
use crate::observability;
use crate::output::{done, emit};

/// Command line access to object storage providers.
#[derive(Debug, FromArgs)]
struct Args {
    /// path to the YAML configuration file
    #[argh(option, short = 'c')]
    pub config: Option<PathBuf>,

    /// connection string of the storage provider, overrides the configuration
    #[argh(option, short = 's')]
    pub storage: Option<String>,

    #[argh(subcommand)]
    pub command: Command,
}

#[derive(Debug, FromArgs)]
#[argh(subcommand)]
enum Command {
    Providers(ProvidersCommand),
    Version(VersionCommand),
    Buckets(BucketsCommand),
    CreateBucket(CreateBucketCommand),
    ClearBucket(ClearBucketCommand),
    DeleteBucket(DeleteBucketCommand),
    BucketExists(BucketExistsCommand),
    BucketIsPublic(BucketIsPublicCommand),
    Files(FilesCommand),
    Upload(UploadCommand),
    Download(DownloadCommand),
    Remove(RemoveCommand),
    Size(SizeCommand),
    Exists(ExistsCommand),
    PublicUrl(PublicUrlCommand),
    SignedUrl(SignedUrlCommand),
    UploadUrl(UploadUrlCommand),
}

/// list the providers compiled into this binary
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "providers")]
struct ProvidersCommand {}

/// print the stowage version
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "version")]
struct VersionCommand {}

/// list all buckets
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "buckets")]
struct BucketsCommand {}

/// create a bucket
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "create-bucket")]
struct CreateBucketCommand {
    /// name of the bucket
    #[argh(positional)]
    name: String,

    /// allow anonymous reads
    #[argh(switch)]
    public: bool,

    /// keep previous versions of files
    #[argh(switch)]
    versioning: bool,
}

/// remove all files from a bucket
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "clear-bucket")]
struct ClearBucketCommand {
    /// name of the bucket, defaults to the configured bucket
    #[argh(positional)]
    name: Option<String>,
}

/// clear and delete a bucket
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "delete-bucket")]
struct DeleteBucketCommand {
    /// name of the bucket, defaults to the configured bucket
    #[argh(positional)]
    name: Option<String>,
}

/// check whether a bucket exists
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "bucket-exists")]
struct BucketExistsCommand {
    /// name of the bucket
    #[argh(positional)]
    name: String,
}

/// check whether a bucket allows anonymous reads
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "bucket-is-public")]
struct BucketIsPublicCommand {
    /// name of the bucket
    #[argh(positional)]
    name: String,
}

/// list files in a bucket
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "files")]
struct FilesCommand {
    /// bucket to list, defaults to the configured bucket
    #[argh(option)]
    bucket: Option<String>,

    /// only list files starting with this prefix
    #[argh(option)]
    prefix: Option<String>,

    /// maximum number of files to list
    #[argh(option)]
    max: Option<usize>,
}

/// upload a local file
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "upload")]
struct UploadCommand {
    /// path of the local file
    #[argh(positional)]
    source: PathBuf,

    /// name of the file in the bucket
    #[argh(positional)]
    target: String,

    /// target bucket, defaults to the configured bucket
    #[argh(option)]
    bucket: Option<String>,

    /// MIME type of the file
    #[argh(option)]
    content_type: Option<String>,
}

/// download a file or a byte range of it
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "download")]
struct DownloadCommand {
    /// name of the file in the bucket
    #[argh(positional)]
    name: String,

    /// local path to write to
    #[argh(positional)]
    destination: PathBuf,

    /// source bucket, defaults to the configured bucket
    #[argh(option)]
    bucket: Option<String>,

    /// first byte to read
    #[argh(option)]
    start: Option<u64>,

    /// last byte to read, inclusive
    #[argh(option)]
    end: Option<u64>,
}

/// remove a file
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "remove")]
struct RemoveCommand {
    /// name of the file in the bucket
    #[argh(positional)]
    name: String,

    /// bucket of the file, defaults to the configured bucket
    #[argh(option)]
    bucket: Option<String>,

    /// only remove the latest version
    #[argh(switch)]
    latest_only: bool,
}

/// print the size of a file in bytes
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "size")]
struct SizeCommand {
    /// name of the file in the bucket
    #[argh(positional)]
    name: String,

    /// bucket of the file, defaults to the configured bucket
    #[argh(option)]
    bucket: Option<String>,
}

/// check whether a file exists
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "exists")]
struct ExistsCommand {
    /// name of the file in the bucket
    #[argh(positional)]
    name: String,

    /// bucket of the file, defaults to the configured bucket
    #[argh(option)]
    bucket: Option<String>,
}

/// print the public URL of a file
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "public-url")]
struct PublicUrlCommand {
    /// name of the file in the bucket
    #[argh(positional)]
    name: String,

    /// bucket of the file, defaults to the configured bucket
    #[argh(option)]
    bucket: Option<String>,

    /// do not check that the bucket is public
    #[argh(switch)]
    skip_check: bool,
}

/// print a signed download URL
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "signed-url")]
struct SignedUrlCommand {
    /// name of the file in the bucket
    #[argh(positional)]
    name: String,

    /// bucket of the file, defaults to the configured bucket
    #[argh(option)]
    bucket: Option<String>,

    /// lifetime of the URL, such as `1h` or `2days`
    #[argh(option)]
    expires: Option<humantime::Duration>,
}

/// print a presigned upload URL
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "upload-url")]
struct UploadUrlCommand {
    /// name of the file in the bucket
    #[argh(positional)]
    name: String,

    /// bucket of the file, defaults to the configured bucket
    #[argh(option)]
    bucket: Option<String>,

    /// lifetime of the URL, such as `15m`
    #[argh(option)]
    expires: Option<humantime::Duration>,

    /// MIME type the upload must declare
    #[argh(option)]
    content_type: Option<String>,

    /// maximum size of the upload in bytes
    #[argh(option)]
    max_size: Option<u64>,
}

/// Parses the arguments and runs the command.
pub fn execute() -> Result<ExitCode> {
    let args: Args = argh::from_env();

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(storage) = &args.storage {
        config.set_storage(storage);
    }

    observability::init_tracing(&config);
    tracing::debug!(?config);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("main-rt")
        .enable_all()
        .build()?;

    runtime.block_on(run(args.command, &config))
}

/// Opens the configured storage provider.
async fn connect(config: &Config) -> Result<Storage> {
    let Some(storage) = &config.storage else {
        bail!("no storage configured, pass --storage or set STOWAGE__STORAGE");
    };
    Ok(Storage::new(storage.expose_secret().as_str()).await)
}

async fn run(command: Command, config: &Config) -> Result<ExitCode> {
    match command {
        Command::Providers(_) => emit(Ok(registry::available_providers())),
        Command::Version(_) => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(ExitCode::SUCCESS)
        }
        Command::Buckets(BucketsCommand {}) => {
            let storage = connect(config).await?;
            emit(storage.list_buckets().await)
        }
        Command::CreateBucket(cmd) => {
            let storage = connect(config).await?;
            let options = CreateBucketOptions {
                public: cmd.public,
                versioning: cmd.versioning,
            };
            done(storage.create_bucket(Some(&cmd.name), &options).await)
        }
        Command::ClearBucket(cmd) => {
            let storage = connect(config).await?;
            done(storage.clear_bucket(cmd.name.as_deref()).await)
        }
        Command::DeleteBucket(cmd) => {
            let mut storage = connect(config).await?;
            done(storage.delete_bucket(cmd.name.as_deref()).await)
        }
        Command::BucketExists(cmd) => {
            let storage = connect(config).await?;
            emit(storage.bucket_exists(Some(&cmd.name)).await)
        }
        Command::BucketIsPublic(cmd) => {
            let storage = connect(config).await?;
            emit(storage.bucket_is_public(Some(&cmd.name)).await)
        }
        Command::Files(cmd) => {
            let storage = connect(config).await?;
            emit(
                storage
                    .list_files_with_prefix(cmd.bucket.as_deref(), cmd.prefix.as_deref(), cmd.max)
                    .await,
            )
        }
        Command::Upload(cmd) => {
            let storage = connect(config).await?;
            let options = AddFileOptions {
                bucket: cmd.bucket,
                content_type: cmd.content_type,
                ..Default::default()
            };
            done(
                storage
                    .add_file_from_path(cmd.source, &cmd.target, &options)
                    .await,
            )
        }
        Command::Download(cmd) => {
            let storage = connect(config).await?;
            emit(download(&storage, cmd).await)
        }
        Command::Remove(cmd) => {
            let storage = connect(config).await?;
            done(
                storage
                    .remove_file(cmd.bucket.as_deref(), Some(&cmd.name), !cmd.latest_only)
                    .await,
            )
        }
        Command::Size(cmd) => {
            let storage = connect(config).await?;
            emit(storage.size_of(cmd.bucket.as_deref(), Some(&cmd.name)).await)
        }
        Command::Exists(cmd) => {
            let storage = connect(config).await?;
            emit(storage.file_exists(cmd.bucket.as_deref(), Some(&cmd.name)).await)
        }
        Command::PublicUrl(cmd) => {
            let storage = connect(config).await?;
            let options = PublicUrlOptions {
                skip_public_check: cmd.skip_check,
                ..Default::default()
            };
            emit(
                storage
                    .get_public_url(cmd.bucket.as_deref(), Some(&cmd.name), &options)
                    .await,
            )
        }
        Command::SignedUrl(cmd) => {
            let storage = connect(config).await?;
            let options = SignedUrlOptions {
                expires_in: cmd.expires.map_or(config.signed_url_expiry, Into::into),
                ..Default::default()
            };
            emit(
                storage
                    .get_signed_url(cmd.bucket.as_deref(), Some(&cmd.name), &options)
                    .await,
            )
        }
        Command::UploadUrl(cmd) => {
            let storage = connect(config).await?;
            let options = UploadUrlOptions {
                expires_in: cmd.expires.map_or(config.upload_url_expiry, Into::into),
                content_type: cmd.content_type,
                conditions: cmd
                    .max_size
                    .map(|max| UploadCondition::ContentLengthRange { min: 0, max })
                    .into_iter()
                    .collect(),
            };
            emit(
                storage
                    .get_presigned_upload_url(cmd.bucket.as_deref(), Some(&cmd.name), &options)
                    .await,
            )
        }
    }
}

/// Writes a file to disk and returns the number of bytes written.
async fn download(storage: &Storage, cmd: DownloadCommand) -> StorageResult<u64> {
    let range = StreamRange::new(cmd.start, cmd.end)?;
    let stream = storage
        .get_file_as_stream(cmd.bucket.as_deref(), Some(&cmd.name), range)
        .await?;

    let mut reader = StreamReader::new(stream);
    let mut file = tokio::fs::File::create(&cmd.destination).await?;
    let written = tokio::io::copy(&mut reader, &mut file).await?;
    file.flush().await?;

    tracing::debug!(written, destination = %cmd.destination.display(), "downloaded file");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::from_args(&["stowage"], args).unwrap()
    }

    #[test]
    fn parses_global_options() {
        let args = parse(&["-s", "memory://@media", "buckets"]);
        assert_eq!(args.storage.as_deref(), Some("memory://@media"));
        assert!(matches!(args.command, Command::Buckets(_)));
    }

    #[test]
    fn parses_download_range() {
        let args = parse(&["download", "image.jpg", "out.jpg", "--start", "0", "--end", "2000"]);
        let Command::Download(cmd) = args.command else {
            panic!("expected download command");
        };
        assert_eq!(cmd.name, "image.jpg");
        assert_eq!(cmd.start, Some(0));
        assert_eq!(cmd.end, Some(2000));
        assert_eq!(cmd.bucket, None);
    }

    #[test]
    fn parses_expiry() {
        let args = parse(&["signed-url", "a.txt", "--expires", "2h"]);
        let Command::SignedUrl(cmd) = args.command else {
            panic!("expected signed-url command");
        };
        let expires: std::time::Duration = cmd.expires.unwrap().into();
        assert_eq!(expires.as_secs(), 7200);
    }

    #[tokio::test]
    async fn only_storage_commands_need_storage() {
        let config = Config::default();

        let code = run(parse(&["providers"]).command, &config).await.unwrap();
        assert_eq!(code, ExitCode::SUCCESS);

        let err = run(parse(&["buckets"]).command, &config).await.unwrap_err();
        assert!(err.to_string().contains("no storage configured"), "{err}");
    }

    #[tokio::test]
    async fn runs_against_configured_storage() {
        let mut config = Config::default();
        config.set_storage("memory://@media");

        let code = run(parse(&["bucket-exists", "media"]).command, &config).await.unwrap();
        assert_eq!(code, ExitCode::SUCCESS);

        let code = run(parse(&["size", "missing.txt"]).command, &config).await.unwrap();
        assert_eq!(code, ExitCode::FAILURE);
    }

    #[tokio::test]
    async fn downloads_ranges() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new("memory://@media").await;
        storage
            .add_file_from_buffer("0123456789", "digits.txt", &Default::default())
            .await
            .unwrap();

        let destination = dir.path().join("digits.txt");
        let cmd = DownloadCommand {
            name: "digits.txt".into(),
            destination: destination.clone(),
            bucket: None,
            start: Some(2),
            end: Some(4),
        };
        assert_eq!(download(&storage, cmd).await.unwrap(), 3);
        assert_eq!(std::fs::read(destination).unwrap(), b"234");
    }
}
