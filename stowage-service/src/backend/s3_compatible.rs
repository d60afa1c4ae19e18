//! Amazon S3 and S3-compatible services.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{Credentials, Region, RequestChecksumCalculation};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    BucketCannedAcl, BucketLocationConstraint, BucketVersioningStatus, CompletedMultipartUpload,
    CompletedPart, CreateBucketConfiguration, Delete, ObjectIdentifier, VersioningConfiguration,
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use futures_util::{StreamExt, TryStreamExt};
use hmac::{Hmac, Mac};
use serde_json::{Map, Value, json};
use sha2::Sha256;
use stowage_types::{Configuration, FileEntry, StreamRange};
use tokio_util::io::ReaderStream;

use super::common::{Backend, bucket_not_found, encode_path, file_not_found};
use crate::PayloadStream;
use crate::error::{StorageError, StorageResult};
use crate::options::{
    AddFileOptions, CreateBucketOptions, PresignedUpload, PublicUrlOptions, SignedUrlOptions,
    UploadCondition, UploadMethod, UploadUrlOptions,
};

/// Region used when none is configured.
const DEFAULT_REGION: &str = "us-east-1";

/// Size of the parts of a multipart upload. Smaller files are uploaded in one request.
const PART_SIZE: usize = 8 * 1024 * 1024;

/// Maximum number of keys in a single `DeleteObjects` request.
const DELETE_BATCH: usize = 1000;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

type HmacSha256 = Hmac<Sha256>;

/// The S3-compatible services with provider-specific defaults and capabilities.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum S3Flavor {
    /// Amazon S3.
    Aws,
    /// A MinIO deployment. Requires an endpoint and uses path-style addressing.
    Minio,
    /// Cloudflare R2. Has no versioning and no bucket policies.
    CloudflareR2,
    /// Backblaze B2 through its S3-compatible API.
    Backblaze,
}

impl S3Flavor {
    /// The provider identifier.
    pub fn id(self) -> &'static str {
        match self {
            Self::Aws => "s3",
            Self::Minio => "minio",
            Self::CloudflareR2 => "r2",
            Self::Backblaze => "b2",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Aws => "Amazon S3",
            Self::Minio => "MinIO",
            Self::CloudflareR2 => "Cloudflare R2",
            Self::Backblaze => "Backblaze B2",
        }
    }
}

#[derive(Clone)]
struct StaticCredentials {
    access_key: String,
    secret_key: String,
    session_token: Option<String>,
}

impl fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("access_key", &self.access_key)
            .finish_non_exhaustive()
    }
}

/// One version of an object, or a delete marker.
#[derive(Debug)]
struct Version {
    key: String,
    version_id: Option<String>,
    is_latest: bool,
    is_delete_marker: bool,
}

/// A backend for Amazon S3 and services that speak its API.
pub struct S3Compatible {
    flavor: S3Flavor,
    client: Client,
    region: String,
    endpoint: Option<String>,
    public_domain: Option<String>,
    credentials: Option<StaticCredentials>,
}

impl fmt::Debug for S3Compatible {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Compatible")
            .field("flavor", &self.flavor)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl S3Compatible {
    /// Creates a client for the given flavor from its configuration.
    ///
    /// Credentials are read from `access_key_id` and `secret_access_key`, falling back to the
    /// principal and secret of the connection string. Amazon S3 also accepts the ambient AWS
    /// credential chain when none are given.
    pub async fn from_config(flavor: S3Flavor, config: &Configuration) -> StorageResult<Self> {
        let access_key = config
            .get_str("access_key_id")
            .or_else(|| config.principal());
        let secret_key = config
            .get_str("secret_access_key")
            .or_else(|| config.secret());

        let credentials = match (access_key, secret_key) {
            (Some(access_key), Some(secret_key)) => Some(StaticCredentials {
                access_key: access_key.to_owned(),
                secret_key: secret_key.to_owned(),
                session_token: config.get_str("session_token").map(str::to_owned),
            }),
            (None, None) if flavor == S3Flavor::Aws => None,
            _ => {
                return Err(StorageError::config(format!(
                    "{} requires an access key id and a secret access key",
                    flavor.label()
                )));
            }
        };

        let endpoint = config
            .endpoint()
            .map(|endpoint| endpoint.trim_end_matches('/').to_owned());
        let (region, endpoint) = match flavor {
            S3Flavor::Aws => (config.region().unwrap_or(DEFAULT_REGION).to_owned(), endpoint),
            S3Flavor::Minio => {
                let endpoint = endpoint
                    .ok_or_else(|| StorageError::config("MinIO requires an `endpoint`"))?;
                let region = config.region().unwrap_or(DEFAULT_REGION).to_owned();
                (region, Some(endpoint))
            }
            S3Flavor::CloudflareR2 => {
                let endpoint = match (endpoint, config.get_str("account_id")) {
                    (Some(endpoint), _) => endpoint,
                    (None, Some(account)) => format!("https://{account}.r2.cloudflarestorage.com"),
                    (None, None) => {
                        return Err(StorageError::config(
                            "Cloudflare R2 requires an `account_id` or an `endpoint`",
                        ));
                    }
                };
                ("auto".to_owned(), Some(endpoint))
            }
            S3Flavor::Backblaze => {
                let region = config.region().ok_or_else(|| {
                    StorageError::config("Backblaze B2 requires a `region`, such as `us-west-004`")
                })?;
                let endpoint =
                    endpoint.unwrap_or_else(|| format!("https://s3.{region}.backblazeb2.com"));
                (region.to_owned(), Some(endpoint))
            }
        };

        let path_style = config
            .get_bool("force_path_style")?
            .unwrap_or(flavor == S3Flavor::Minio);

        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region.clone()));
        if let Some(credentials) = &credentials {
            loader = loader.credentials_provider(Credentials::new(
                &credentials.access_key,
                &credentials.secret_key,
                credentials.session_token.clone(),
                None,
                "stowage",
            ));
        }
        let shared = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared).force_path_style(path_style);
        if let Some(endpoint) = &endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        if flavor != S3Flavor::Aws {
            builder = builder.request_checksum_calculation(RequestChecksumCalculation::WhenRequired);
        }

        tracing::debug!(provider = flavor.id(), %region, ?endpoint, "created S3 client");

        Ok(Self {
            flavor,
            client: Client::from_conf(builder.build()),
            region,
            endpoint,
            public_domain: config.get_str("public_domain").map(str::to_owned),
            credentials,
        })
    }

    fn sdk_error<E>(&self, err: SdkError<E>, action: &str) -> StorageError
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        StorageError::backend(
            format!("{}: failed to {action}", self.flavor.label()),
            DisplayErrorContext(&err).to_string(),
        )
    }

    fn bucket_error<E>(&self, err: SdkError<E>, action: &str, bucket: &str) -> StorageError
    where
        E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    {
        if is_missing(&err) {
            bucket_not_found(bucket)
        } else {
            self.sdk_error(err, action)
        }
    }

    fn file_error<E>(&self, err: SdkError<E>, action: &str, bucket: &str, key: &str) -> StorageError
    where
        E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    {
        if err.code() == Some("NoSuchBucket") {
            bucket_not_found(bucket)
        } else if is_missing(&err) {
            file_not_found(bucket, key)
        } else {
            self.sdk_error(err, action)
        }
    }

    fn presigning(expires_in: std::time::Duration) -> StorageResult<PresigningConfig> {
        PresigningConfig::expires_in(expires_in)
            .map_err(|err| StorageError::validation(format!("invalid URL expiry: {err}")))
    }

    fn object_url(&self, bucket: &str, key: &str) -> StorageResult<String> {
        let key = encode_path(key);

        if self.flavor == S3Flavor::CloudflareR2 {
            let domain = self.public_domain.as_deref().ok_or_else(|| {
                StorageError::unsupported(
                    "Cloudflare R2 serves public files from a custom domain, configure `public_domain`",
                )
            })?;
            let domain = domain.trim_end_matches('/');
            return Ok(if domain.contains("://") {
                format!("{domain}/{key}")
            } else {
                format!("https://{domain}/{key}")
            });
        }

        Ok(match &self.endpoint {
            Some(endpoint) => format!("{endpoint}/{bucket}/{key}"),
            None => format!("https://{bucket}.s3.{}.amazonaws.com/{key}", self.region),
        })
    }

    async fn make_public(&self, bucket: &str) -> StorageResult<()> {
        if self.flavor == S3Flavor::Aws {
            self.client
                .delete_public_access_block()
                .bucket(bucket)
                .send()
                .await
                .map_err(|err| self.bucket_error(err, "remove the public access block", bucket))?;
        }

        self.client
            .put_bucket_policy()
            .bucket(bucket)
            .policy(public_read_policy(bucket))
            .send()
            .await
            .map_err(|err| self.bucket_error(err, "set the bucket policy", bucket))?;

        Ok(())
    }

    async fn list_versions(&self, bucket: &str, key: Option<&str>) -> StorageResult<Vec<Version>> {
        let mut versions = Vec::new();
        let mut key_marker = None;
        let mut version_marker = None;

        loop {
            let output = self
                .client
                .list_object_versions()
                .bucket(bucket)
                .set_prefix(key.map(str::to_owned))
                .set_key_marker(key_marker.take())
                .set_version_id_marker(version_marker.take())
                .send()
                .await
                .map_err(|err| self.bucket_error(err, "list object versions", bucket))?;

            for version in output.versions() {
                if let Some(name) = version.key() {
                    versions.push(Version {
                        key: name.to_owned(),
                        version_id: version.version_id().map(str::to_owned),
                        is_latest: version.is_latest().unwrap_or(false),
                        is_delete_marker: false,
                    });
                }
            }
            for marker in output.delete_markers() {
                if let Some(name) = marker.key() {
                    versions.push(Version {
                        key: name.to_owned(),
                        version_id: marker.version_id().map(str::to_owned),
                        is_latest: marker.is_latest().unwrap_or(false),
                        is_delete_marker: true,
                    });
                }
            }

            if !output.is_truncated().unwrap_or(false) {
                break;
            }
            key_marker = output.next_key_marker().map(str::to_owned);
            version_marker = output.next_version_id_marker().map(str::to_owned);
        }

        if let Some(key) = key {
            versions.retain(|version| version.key == key);
        }
        Ok(versions)
    }

    async fn list_keys(&self, bucket: &str) -> StorageResult<Vec<Version>> {
        let files = self.list_files(bucket, None, None).await?;
        Ok(files
            .into_iter()
            .map(|file| Version {
                key: file.path,
                version_id: None,
                is_latest: true,
                is_delete_marker: false,
            })
            .collect())
    }

    async fn delete_versions(&self, bucket: &str, versions: Vec<Version>) -> StorageResult<()> {
        for batch in versions.chunks(DELETE_BATCH) {
            let objects = batch
                .iter()
                .map(|version| {
                    ObjectIdentifier::builder()
                        .key(&version.key)
                        .set_version_id(version.version_id.clone())
                        .build()
                })
                .collect::<Result<Vec<_>, _>>()
                .map_err(|err| StorageError::backend("failed to build delete request", err))?;

            let delete = Delete::builder()
                .set_objects(Some(objects))
                .quiet(true)
                .build()
                .map_err(|err| StorageError::backend("failed to build delete request", err))?;

            let output = self
                .client
                .delete_objects()
                .bucket(bucket)
                .delete(delete)
                .send()
                .await
                .map_err(|err| self.bucket_error(err, "delete objects", bucket))?;

            if let Some(error) = output.errors().first() {
                return Err(StorageError::backend(
                    format!(
                        "{}: failed to delete {}",
                        self.flavor.label(),
                        error.key().unwrap_or_default()
                    ),
                    error.message().unwrap_or("unknown error").to_owned(),
                ));
            }
        }

        Ok(())
    }

    async fn put_single(
        &self,
        bucket: &str,
        key: &str,
        contents: Bytes,
        options: &AddFileOptions,
    ) -> StorageResult<()> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(contents))
            .set_content_type(options.content_type.clone())
            .set_metadata(user_metadata(options))
            .send()
            .await
            .map_err(|err| self.file_error(err, "upload", bucket, key))?;

        Ok(())
    }

    async fn put_multipart(
        &self,
        bucket: &str,
        key: &str,
        buffer: BytesMut,
        stream: PayloadStream,
        options: &AddFileOptions,
    ) -> StorageResult<()> {
        let upload = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .set_content_type(options.content_type.clone())
            .set_metadata(user_metadata(options))
            .send()
            .await
            .map_err(|err| self.file_error(err, "start a multipart upload of", bucket, key))?;

        let upload_id = upload
            .upload_id()
            .ok_or_else(|| {
                StorageError::backend("failed to start a multipart upload", "missing upload id")
            })?
            .to_owned();

        let parts = match self
            .upload_parts(bucket, key, &upload_id, buffer, stream)
            .await
        {
            Ok(parts) => parts,
            Err(err) => {
                let abort = self
                    .client
                    .abort_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await;
                if let Err(abort) = abort {
                    tracing::warn!(
                        error = %DisplayErrorContext(&abort),
                        "failed to abort multipart upload"
                    );
                }
                return Err(err);
            }
        };

        self.client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(&upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|err| self.file_error(err, "complete the multipart upload of", bucket, key))?;

        Ok(())
    }

    async fn upload_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        mut buffer: BytesMut,
        mut stream: PayloadStream,
    ) -> StorageResult<Vec<CompletedPart>> {
        let mut parts = Vec::new();
        let mut part_number = 1;

        loop {
            let mut done = false;
            while buffer.len() < PART_SIZE {
                match stream.try_next().await? {
                    Some(chunk) => buffer.extend_from_slice(&chunk),
                    None => {
                        done = true;
                        break;
                    }
                }
            }

            if !buffer.is_empty() {
                let body = buffer.split().freeze();
                let part = self
                    .client
                    .upload_part()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(upload_id)
                    .part_number(part_number)
                    .body(ByteStream::from(body))
                    .send()
                    .await
                    .map_err(|err| self.file_error(err, "upload a part of", bucket, key))?;

                parts.push(
                    CompletedPart::builder()
                        .set_e_tag(part.e_tag().map(str::to_owned))
                        .part_number(part_number)
                        .build(),
                );
                part_number += 1;
            }

            if done {
                return Ok(parts);
            }
        }
    }

    /// Builds a browser-based upload form signed with a SigV4 POST policy.
    fn post_policy(
        &self,
        bucket: &str,
        key: &str,
        credentials: &StaticCredentials,
        options: &UploadUrlOptions,
    ) -> StorageResult<PresignedUpload> {
        let now = Utc::now();
        let lifetime = chrono::Duration::from_std(options.expires_in)
            .map_err(|_| StorageError::validation("upload URL expiry is out of range"))?;
        let expiration = now + lifetime;
        let date = now.format("%Y%m%d").to_string();

        let mut fields = BTreeMap::from([
            ("key".to_owned(), key.to_owned()),
            ("x-amz-algorithm".to_owned(), ALGORITHM.to_owned()),
            (
                "x-amz-credential".to_owned(),
                format!(
                    "{}/{date}/{}/s3/aws4_request",
                    credentials.access_key, self.region
                ),
            ),
            (
                "x-amz-date".to_owned(),
                now.format("%Y%m%dT%H%M%SZ").to_string(),
            ),
        ]);
        if let Some(token) = &credentials.session_token {
            fields.insert("x-amz-security-token".to_owned(), token.clone());
        }
        if let Some(content_type) = &options.content_type {
            fields.insert("Content-Type".to_owned(), content_type.clone());
        }

        let mut conditions = vec![exact("bucket", bucket)];
        conditions.extend(fields.iter().map(|(name, value)| exact(name, value)));
        for condition in &options.conditions {
            match condition {
                UploadCondition::ContentLengthRange { min, max } => {
                    conditions.push(json!(["content-length-range", min, max]));
                }
                UploadCondition::StartsWith { field, prefix } => {
                    conditions.push(json!(["starts-with", format!("${field}"), prefix]));
                }
                UploadCondition::Equals { field, value } => {
                    conditions.push(exact(field, value));
                    fields.insert(field.clone(), value.clone());
                }
            }
        }

        let policy = json!({
            "expiration": expiration.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
            "conditions": conditions,
        });
        let policy = STANDARD.encode(policy.to_string());

        let signing_key = signing_key(&credentials.secret_key, &date, &self.region, "s3")?;
        let signature = hex::encode(hmac_sha256(&signing_key, policy.as_bytes())?);
        fields.insert("policy".to_owned(), policy);
        fields.insert("x-amz-signature".to_owned(), signature);

        let url = match &self.endpoint {
            Some(endpoint) => format!("{endpoint}/{bucket}"),
            None => format!("https://{bucket}.s3.{}.amazonaws.com", self.region),
        };

        Ok(PresignedUpload {
            url,
            method: UploadMethod::Post,
            fields,
        })
    }
}

#[async_trait::async_trait]
impl Backend for S3Compatible {
    fn name(&self) -> &'static str {
        self.flavor.id()
    }

    #[tracing::instrument(level = "trace", skip_all)]
    async fn list_buckets(&self) -> StorageResult<Vec<String>> {
        let output = self
            .client
            .list_buckets()
            .send()
            .await
            .map_err(|err| self.sdk_error(err, "list buckets"))?;

        Ok(output
            .buckets()
            .iter()
            .filter_map(|bucket| bucket.name())
            .map(str::to_owned)
            .collect())
    }

    #[tracing::instrument(level = "trace", fields(?bucket), skip_all)]
    async fn create_bucket(
        &self,
        bucket: &str,
        options: &CreateBucketOptions,
    ) -> StorageResult<()> {
        if options.public && self.flavor == S3Flavor::CloudflareR2 {
            return Err(StorageError::unsupported(
                "Cloudflare R2 buckets are made public through a custom domain, not on creation",
            ));
        }

        let mut request = self.client.create_bucket().bucket(bucket);
        if self.flavor == S3Flavor::Aws && self.region != DEFAULT_REGION {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }
        if options.public && self.flavor == S3Flavor::Backblaze {
            request = request.acl(BucketCannedAcl::PublicRead);
        }
        request
            .send()
            .await
            .map_err(|err| self.sdk_error(err, "create bucket"))?;

        if options.versioning {
            if self.flavor == S3Flavor::CloudflareR2 {
                tracing::warn!(bucket, "Cloudflare R2 does not support versioning, ignoring");
            } else {
                self.client
                    .put_bucket_versioning()
                    .bucket(bucket)
                    .versioning_configuration(
                        VersioningConfiguration::builder()
                            .status(BucketVersioningStatus::Enabled)
                            .build(),
                    )
                    .send()
                    .await
                    .map_err(|err| self.bucket_error(err, "enable versioning", bucket))?;
            }
        }

        if options.public && self.flavor != S3Flavor::Backblaze {
            self.make_public(bucket).await?;
        }

        Ok(())
    }

    async fn bucket_exists(&self, bucket: &str) -> StorageResult<bool> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(err) if is_missing(&err) => Ok(false),
            Err(err) => Err(self.sdk_error(err, "check bucket")),
        }
    }

    async fn bucket_is_public(&self, bucket: &str) -> StorageResult<bool> {
        match self.flavor {
            S3Flavor::Aws => {
                let result = self
                    .client
                    .get_bucket_policy_status()
                    .bucket(bucket)
                    .send()
                    .await;
                match result {
                    Ok(output) => Ok(output
                        .policy_status()
                        .and_then(|status| status.is_public())
                        .unwrap_or(false)),
                    Err(err) if err.code() == Some("NoSuchBucketPolicy") => Ok(false),
                    Err(err) => Err(self.bucket_error(err, "read the bucket policy status", bucket)),
                }
            }
            S3Flavor::Minio => {
                match self.client.get_bucket_policy().bucket(bucket).send().await {
                    Ok(output) => Ok(output.policy().is_some_and(policy_allows_public_read)),
                    Err(err) if err.code() == Some("NoSuchBucketPolicy") => Ok(false),
                    Err(err) => Err(self.bucket_error(err, "read the bucket policy", bucket)),
                }
            }
            S3Flavor::CloudflareR2 | S3Flavor::Backblaze => Err(StorageError::unsupported(format!(
                "{} cannot report whether a bucket is public",
                self.flavor.label()
            ))),
        }
    }

    #[tracing::instrument(level = "trace", fields(?bucket), skip_all)]
    async fn clear_bucket(&self, bucket: &str) -> StorageResult<()> {
        let versions = match self.flavor {
            S3Flavor::CloudflareR2 => self.list_keys(bucket).await?,
            _ => self.list_versions(bucket, None).await?,
        };
        self.delete_versions(bucket, versions).await
    }

    #[tracing::instrument(level = "trace", fields(?bucket), skip_all)]
    async fn delete_bucket(&self, bucket: &str) -> StorageResult<()> {
        self.client
            .delete_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|err| self.bucket_error(err, "delete bucket", bucket))?;
        Ok(())
    }

    #[tracing::instrument(level = "trace", fields(?bucket, ?prefix), skip_all)]
    async fn list_files(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        max: Option<usize>,
    ) -> StorageResult<Vec<FileEntry>> {
        let mut files = Vec::new();
        let mut token = None;

        loop {
            let remaining = max.map(|max| max.saturating_sub(files.len()));
            if remaining == Some(0) {
                break;
            }

            let output = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .set_prefix(prefix.map(str::to_owned))
                .set_max_keys(remaining.map(|remaining| remaining.min(1000) as i32))
                .set_continuation_token(token.take())
                .send()
                .await
                .map_err(|err| self.bucket_error(err, "list files", bucket))?;

            for object in output.contents() {
                if let Some(key) = object.key() {
                    let size = object.size().unwrap_or(0).max(0) as u64;
                    files.push(FileEntry::new(key, size));
                }
            }

            match output.next_continuation_token() {
                Some(next) if output.is_truncated().unwrap_or(false) => {
                    token = Some(next.to_owned());
                }
                _ => break,
            }
        }

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
        mut stream: PayloadStream,
        options: &AddFileOptions,
    ) -> StorageResult<()> {
        tracing::debug!("Writing to s3_compatible backend");

        let mut buffer = BytesMut::new();
        while buffer.len() < PART_SIZE {
            match stream.try_next().await? {
                Some(chunk) => buffer.extend_from_slice(&chunk),
                None => return self.put_single(bucket, key, buffer.freeze(), options).await,
            }
        }

        self.put_multipart(bucket, key, buffer, stream, options)
            .await
    }

    #[tracing::instrument(level = "trace", fields(?bucket, ?key, %range), skip_all)]
    async fn get_file(
        &self,
        bucket: &str,
        key: &str,
        range: StreamRange,
    ) -> StorageResult<PayloadStream> {
        tracing::debug!("Reading from s3_compatible backend");

        let result = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .set_range(range.to_http_header())
            .send()
            .await;

        let output = match result {
            Ok(output) => output,
            // The range starts after the end of the file.
            Err(err) if status_of(&err) == Some(416) => {
                return Ok(futures_util::stream::empty().boxed());
            }
            Err(err) => return Err(self.file_error(err, "read", bucket, key)),
        };

        Ok(ReaderStream::new(output.body.into_async_read()).boxed())
    }

    #[tracing::instrument(level = "trace", fields(?bucket, ?key), skip_all)]
    async fn delete_file(&self, bucket: &str, key: &str, all_versions: bool) -> StorageResult<()> {
        tracing::debug!("Deleting from s3_compatible backend");

        if self.flavor == S3Flavor::CloudflareR2 {
            self.client
                .delete_object()
                .bucket(bucket)
                .key(key)
                .send()
                .await
                .map_err(|err| self.file_error(err, "delete", bucket, key))?;
            return Ok(());
        }

        let versions = self.list_versions(bucket, Some(key)).await?;
        let targets: Vec<_> = if all_versions {
            versions
        } else {
            versions
                .into_iter()
                .filter(|version| version.is_latest && !version.is_delete_marker)
                .collect()
        };

        if targets.is_empty() {
            return Err(file_not_found(bucket, key));
        }
        self.delete_versions(bucket, targets).await
    }

    async fn size_of(&self, bucket: &str, key: &str) -> StorageResult<u64> {
        let output = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| self.file_error(err, "read the size of", bucket, key))?;

        Ok(output.content_length().unwrap_or(0).max(0) as u64)
    }

    async fn public_url(
        &self,
        bucket: &str,
        key: &str,
        _options: &PublicUrlOptions,
    ) -> StorageResult<String> {
        self.object_url(bucket, key)
    }

    async fn signed_url(
        &self,
        bucket: &str,
        key: &str,
        options: &SignedUrlOptions,
    ) -> StorageResult<String> {
        let request = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .set_response_content_disposition(options.content_disposition.clone())
            .presigned(Self::presigning(options.expires_in)?)
            .await
            .map_err(|err| self.file_error(err, "sign a download URL for", bucket, key))?;

        Ok(request.uri().to_owned())
    }

    async fn presigned_upload_url(
        &self,
        bucket: &str,
        key: &str,
        options: &UploadUrlOptions,
    ) -> StorageResult<PresignedUpload> {
        if !options.conditions.is_empty() {
            match (&self.credentials, self.flavor) {
                (Some(credentials), S3Flavor::Aws | S3Flavor::Minio) => {
                    return self.post_policy(bucket, key, credentials, options);
                }
                _ => tracing::warn!(
                    provider = self.flavor.id(),
                    "upload conditions need static credentials and POST support, \
                     falling back to a presigned PUT"
                ),
            }
        }

        let request = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .set_content_type(options.content_type.clone())
            .presigned(Self::presigning(options.expires_in)?)
            .await
            .map_err(|err| self.file_error(err, "sign an upload URL for", bucket, key))?;

        Ok(PresignedUpload::put(request.uri()))
    }
}

fn status_of<E>(err: &SdkError<E>) -> Option<u16> {
    err.raw_response()
        .map(|response| response.status().as_u16())
}

fn is_missing<E: ProvideErrorMetadata>(err: &SdkError<E>) -> bool {
    status_of(err) == Some(404)
        || matches!(
            err.code(),
            Some("NoSuchBucket" | "NoSuchKey" | "NotFound" | "NoSuchVersion")
        )
}

fn user_metadata(options: &AddFileOptions) -> Option<HashMap<String, String>> {
    if options.metadata.is_empty() {
        return None;
    }
    Some(
        options
            .metadata
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect(),
    )
}

fn public_read_policy(bucket: &str) -> String {
    json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Sid": "PublicRead",
            "Effect": "Allow",
            "Principal": "*",
            "Action": ["s3:GetObject"],
            "Resource": [format!("arn:aws:s3:::{bucket}/*")],
        }],
    })
    .to_string()
}

fn one_or_many(value: &Value) -> impl Iterator<Item = &str> {
    let values: Vec<&Value> = match value {
        Value::Array(values) => values.iter().collect(),
        other => vec![other],
    };
    values.into_iter().filter_map(Value::as_str)
}

/// Whether a bucket policy grants anonymous `GetObject`.
fn policy_allows_public_read(policy: &str) -> bool {
    let Ok(policy) = serde_json::from_str::<Value>(policy) else {
        return false;
    };

    let statements: Vec<&Value> = match &policy["Statement"] {
        Value::Array(statements) => statements.iter().collect(),
        statement @ Value::Object(_) => vec![statement],
        _ => Vec::new(),
    };

    statements.into_iter().any(|statement| {
        let principal = &statement["Principal"];
        let everyone = principal == "*" || one_or_many(&principal["AWS"]).any(|p| p == "*");

        statement["Effect"] == "Allow"
            && everyone
            && one_or_many(&statement["Action"])
                .any(|action| matches!(action, "s3:GetObject" | "s3:*" | "*"))
    })
}

fn exact(name: &str, value: &str) -> Value {
    let mut condition = Map::new();
    condition.insert(name.to_owned(), Value::String(value.to_owned()));
    Value::Object(condition)
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> StorageResult<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|_| StorageError::backend("failed to initialize HMAC", "invalid key length"))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Derives the SigV4 signing key for a day, region and service.
fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> StorageResult<Vec<u8>> {
    let key = hmac_sha256(format!("AWS4{secret}").as_bytes(), date.as_bytes())?;
    let key = hmac_sha256(&key, region.as_bytes())?;
    let key = hmac_sha256(&key, service.as_bytes())?;
    hmac_sha256(&key, b"aws4_request")
}
