//! Google Cloud Storage through its JSON API.

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use futures_util::{StreamExt, TryStreamExt};
use gcp_auth::{CustomServiceAccount, TokenProvider};
use reqwest::{Body, Method, RequestBuilder, Response, StatusCode, header};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use stowage_types::{Configuration, FileEntry, StreamRange};

use super::common::{
    Backend, bucket_not_found, encode_component, encode_path, file_not_found, reqwest_client,
};
use crate::PayloadStream;
use crate::error::{StorageError, StorageResult};
use crate::options::{
    AddFileOptions, CreateBucketOptions, PresignedUpload, PublicUrlOptions, SignedUrlOptions,
    UploadUrlOptions,
};

const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";
const SIGNING_HOST: &str = "storage.googleapis.com";
const IAM_CREDENTIALS: &str = "https://iamcredentials.googleapis.com/v1";
const SCOPES: &[&str] = &["https://www.googleapis.com/auth/cloud-platform"];
const SIGNING_ALGORITHM: &str = "GOOG4-RSA-SHA256";

/// Role granted to `allUsers` to make a bucket public.
const PUBLIC_ROLE: &str = "roles/storage.objectViewer";
const LEGACY_PUBLIC_ROLE: &str = "roles/storage.legacyObjectReader";
const ALL_USERS: &str = "allUsers";

/// Longest lifetime GCS accepts for a signed URL.
const MAX_SIGNED_URL_EXPIRY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Deserialize)]
struct KeyFile {
    project_id: Option<String>,
    client_email: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", bound(deserialize = "T: Deserialize<'de>"))]
struct ListPage<T> {
    #[serde(default)]
    items: Vec<T>,
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct BucketResource {
    name: String,
}

#[derive(Deserialize)]
struct ObjectResource {
    name: String,
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    generation: Option<String>,
}

impl ObjectResource {
    fn size(&self) -> u64 {
        self.size
            .as_deref()
            .and_then(|size| size.parse().ok())
            .unwrap_or(0)
    }
}

#[derive(Deserialize)]
struct IamPolicy {
    #[serde(default)]
    bindings: Vec<IamBinding>,
}

#[derive(Deserialize)]
struct IamBinding {
    role: String,
    #[serde(default)]
    members: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignBlobResponse {
    signed_blob: String,
}

/// A backend for Google Cloud Storage.
///
/// With an `endpoint`, requests go unauthenticated to an emulator such as `fake-gcs-server`.
pub struct Gcs {
    client: reqwest::Client,
    endpoint: String,
    token_provider: Option<Arc<dyn TokenProvider>>,
    project_id: Option<String>,
    client_email: Option<String>,
}

impl fmt::Debug for Gcs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gcs")
            .field("endpoint", &self.endpoint)
            .field("project_id", &self.project_id)
            .field("client_email", &self.client_email)
            .finish_non_exhaustive()
    }
}

impl Gcs {
    /// Creates a client from `key_file` (or the principal), `project_id`, `client_email`, and
    /// `endpoint`.
    ///
    /// Without a key file, the ambient credentials of the environment are used.
    pub async fn from_config(config: &Configuration) -> StorageResult<Self> {
        let client = reqwest_client()?;
        let mut project_id = config.get_str("project_id").map(str::to_owned);
        let mut client_email = config.get_str("client_email").map(str::to_owned);

        if let Some(endpoint) = config.endpoint() {
            tracing::debug!(endpoint, "using unauthenticated GCS endpoint");
            return Ok(Self {
                client,
                endpoint: endpoint.trim_end_matches('/').to_owned(),
                token_provider: None,
                project_id,
                client_email,
            });
        }

        let key_file = config.get_str("key_file").or_else(|| config.principal());
        let token_provider: Arc<dyn TokenProvider> = match key_file {
            Some(path) => {
                let contents = tokio::fs::read_to_string(path).await.map_err(|err| {
                    StorageError::config(format!("failed to read GCS key file {path}: {err}"))
                })?;
                let key: KeyFile = serde_json::from_str(&contents).map_err(|err| {
                    StorageError::config(format!("invalid GCS key file {path}: {err}"))
                })?;
                project_id = project_id.or(key.project_id);
                client_email = client_email.or(key.client_email);

                let account = CustomServiceAccount::from_json(&contents).map_err(|err| {
                    StorageError::config(format!("invalid GCS key file {path}: {err}"))
                })?;
                Arc::new(account)
            }
            None => gcp_auth::provider().await.map_err(|err| {
                StorageError::config(format!("failed to find GCP credentials: {err}"))
            })?,
        };

        if project_id.is_none() {
            project_id = token_provider
                .project_id()
                .await
                .ok()
                .map(|id| id.to_string());
        }

        Ok(Self {
            client,
            endpoint: DEFAULT_ENDPOINT.to_owned(),
            token_provider: Some(token_provider),
            project_id,
            client_email,
        })
    }

    fn project(&self) -> StorageResult<&str> {
        self.project_id.as_deref().ok_or_else(|| {
            StorageError::config("GCS requires a `project_id` to list or create buckets")
        })
    }

    fn bucket_url(&self, bucket: &str) -> String {
        format!("{}/storage/v1/b/{}", self.endpoint, encode_component(bucket))
    }

    fn object_url(&self, bucket: &str, key: &str) -> String {
        format!("{}/o/{}", self.bucket_url(bucket), encode_component(key))
    }

    async fn request(&self, method: Method, url: &str) -> StorageResult<RequestBuilder> {
        let builder = self.client.request(method, url);
        let Some(provider) = &self.token_provider else {
            return Ok(builder);
        };

        let token = provider
            .token(SCOPES)
            .await
            .map_err(|cause| StorageError::backend("failed to authenticate with GCP", cause))?;
        Ok(builder.bearer_auth(token.as_str()))
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        versions: bool,
        max: Option<usize>,
    ) -> StorageResult<Vec<ObjectResource>> {
        let url = format!("{}/o", self.bucket_url(bucket));
        let mut objects = Vec::new();
        let mut page_token = None;

        loop {
            let mut query = Vec::new();
            if let Some(prefix) = prefix {
                query.push(("prefix", prefix.to_owned()));
            }
            if versions {
                query.push(("versions", "true".to_owned()));
            }
            if let Some(max) = max {
                let remaining = max.saturating_sub(objects.len());
                if remaining == 0 {
                    break;
                }
                query.push(("maxResults", remaining.min(1000).to_string()));
            }
            if let Some(token) = page_token.take() {
                query.push(("pageToken", token));
            }

            let request = self.request(Method::GET, &url).await?.query(&query);
            let response = send(request, "list files", bucket_not_found(bucket)).await?;
            let page: ListPage<ObjectResource> = decode(response, "list files").await?;

            objects.extend(page.items);
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        if let Some(max) = max {
            objects.truncate(max);
        }
        Ok(objects)
    }

    async fn delete_generation(&self, bucket: &str, object: &ObjectResource) -> StorageResult<()> {
        let mut request = self
            .request(Method::DELETE, &self.object_url(bucket, &object.name))
            .await?;
        if let Some(generation) = &object.generation {
            request = request.query(&[("generation", generation)]);
        }

        match send(request, "delete", file_not_found(bucket, &object.name)).await {
            Err(err) if err.is_not_found() => Ok(()),
            result => result.map(drop),
        }
    }

    async fn iam_policy(&self, bucket: &str) -> StorageResult<Value> {
        let url = format!("{}/iam", self.bucket_url(bucket));
        let request = self.request(Method::GET, &url).await?;
        let response = send(request, "read the bucket IAM policy", bucket_not_found(bucket)).await?;
        decode(response, "read the bucket IAM policy").await
    }

    async fn grant_public_read(&self, bucket: &str) -> StorageResult<()> {
        let mut policy = self.iam_policy(bucket).await?;
        add_public_binding(&mut policy)?;

        let url = format!("{}/iam", self.bucket_url(bucket));
        let request = self.request(Method::PUT, &url).await?.json(&policy);
        send(request, "update the bucket IAM policy", bucket_not_found(bucket)).await?;
        Ok(())
    }

    /// Signs a URL with the service account through the IAM Credentials API.
    async fn sign(&self, signer: UrlSigner) -> StorageResult<String> {
        let url = format!(
            "{IAM_CREDENTIALS}/projects/-/serviceAccounts/{}:signBlob",
            encode_component(&signer.email)
        );
        let payload = STANDARD.encode(signer.string_to_sign());
        let request = self
            .request(Method::POST, &url)
            .await?
            .json(&json!({ "payload": payload }));

        let missing = StorageError::config(format!("unknown service account {}", signer.email));
        let response = send(request, "sign a URL", missing).await?;
        let response: SignBlobResponse = decode(response, "sign a URL").await?;

        let signature = STANDARD
            .decode(response.signed_blob)
            .map_err(|cause| StorageError::backend("GCS: invalid URL signature", cause))?;
        Ok(signer.url(&hex::encode(signature)))
    }

    fn signer(
        &self,
        method: &'static str,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> StorageResult<UrlSigner> {
        let email = match (&self.token_provider, &self.client_email) {
            (Some(_), Some(email)) => email,
            _ => {
                return Err(StorageError::unsupported(
                    "GCS signed URLs require service account credentials with a `client_email`",
                ));
            }
        };

        if expires_in > MAX_SIGNED_URL_EXPIRY {
            return Err(StorageError::validation(
                "GCS signed URLs expire after at most 7 days",
            ));
        }

        Ok(UrlSigner::new(
            method,
            bucket,
            key,
            email,
            Utc::now(),
            expires_in.as_secs(),
        ))
    }
}

#[async_trait::async_trait]
impl Backend for Gcs {
    fn name(&self) -> &'static str {
        "gcs"
    }

    #[tracing::instrument(level = "trace", skip_all)]
    async fn list_buckets(&self) -> StorageResult<Vec<String>> {
        let project = self.project()?;
        let url = format!("{}/storage/v1/b", self.endpoint);
        let mut names = Vec::new();
        let mut page_token = None;

        loop {
            let mut query = vec![("project", project.to_owned())];
            if let Some(token) = page_token.take() {
                query.push(("pageToken", token));
            }

            let request = self.request(Method::GET, &url).await?.query(&query);
            let missing = StorageError::config(format!("unknown project {project}"));
            let response = send(request, "list buckets", missing).await?;
            let page: ListPage<BucketResource> = decode(response, "list buckets").await?;

            names.extend(page.items.into_iter().map(|bucket| bucket.name));
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(names)
    }

    #[tracing::instrument(level = "trace", fields(?bucket), skip_all)]
    async fn create_bucket(
        &self,
        bucket: &str,
        options: &CreateBucketOptions,
    ) -> StorageResult<()> {
        let project = self.project()?;
        let url = format!("{}/storage/v1/b", self.endpoint);
        let body = json!({
            "name": bucket,
            "versioning": { "enabled": options.versioning },
        });

        let request = self
            .request(Method::POST, &url)
            .await?
            .query(&[("project", project)])
            .json(&body);
        let missing = StorageError::config(format!("unknown project {project}"));
        send(request, "create bucket", missing).await?;

        if options.public {
            self.grant_public_read(bucket).await?;
        }
        Ok(())
    }

    async fn bucket_exists(&self, bucket: &str) -> StorageResult<bool> {
        let request = self.request(Method::GET, &self.bucket_url(bucket)).await?;
        match send(request, "check bucket", bucket_not_found(bucket)).await {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn bucket_is_public(&self, bucket: &str) -> StorageResult<bool> {
        let policy: IamPolicy = serde_json::from_value(self.iam_policy(bucket).await?)
            .map_err(|cause| StorageError::backend("GCS: invalid IAM policy", cause))?;

        Ok(policy.bindings.iter().any(|binding| {
            matches!(binding.role.as_str(), PUBLIC_ROLE | LEGACY_PUBLIC_ROLE)
                && binding.members.iter().any(|member| member == ALL_USERS)
        }))
    }

    #[tracing::instrument(level = "trace", fields(?bucket), skip_all)]
    async fn clear_bucket(&self, bucket: &str) -> StorageResult<()> {
        for object in self.list_objects(bucket, None, true, None).await? {
            self.delete_generation(bucket, &object).await?;
        }
        Ok(())
    }

    #[tracing::instrument(level = "trace", fields(?bucket), skip_all)]
    async fn delete_bucket(&self, bucket: &str) -> StorageResult<()> {
        let request = self
            .request(Method::DELETE, &self.bucket_url(bucket))
            .await?;
        send(request, "delete bucket", bucket_not_found(bucket)).await?;
        Ok(())
    }

    #[tracing::instrument(level = "trace", fields(?bucket, ?prefix), skip_all)]
    async fn list_files(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        max: Option<usize>,
    ) -> StorageResult<Vec<FileEntry>> {
        let objects = self.list_objects(bucket, prefix, false, max).await?;
        Ok(objects
            .iter()
            .map(|object| FileEntry::new(object.name.clone(), object.size()))
            .collect())
    }

    #[tracing::instrument(level = "trace", fields(?bucket, ?key), skip_all)]
    async fn put_file(
        &self,
        bucket: &str,
        key: &str,
        stream: PayloadStream,
        options: &AddFileOptions,
    ) -> StorageResult<()> {
        tracing::debug!("Writing to gcs backend");

        let url = format!(
            "{}/upload/storage/v1/b/{}/o",
            self.endpoint,
            encode_component(bucket)
        );
        let content_type = options
            .content_type
            .as_deref()
            .unwrap_or("application/octet-stream");

        let request = self
            .request(Method::POST, &url)
            .await?
            .query(&[("uploadType", "media"), ("name", key)])
            .header(header::CONTENT_TYPE, content_type)
            .body(Body::wrap_stream(stream));
        send(request, "upload", bucket_not_found(bucket)).await?;

        if !options.metadata.is_empty() {
            let request = self
                .request(Method::PATCH, &self.object_url(bucket, key))
                .await?
                .json(&json!({ "metadata": options.metadata }));
            send(request, "set metadata", file_not_found(bucket, key)).await?;
        }

        Ok(())
    }

    #[tracing::instrument(level = "trace", fields(?bucket, ?key, %range), skip_all)]
    async fn get_file(
        &self,
        bucket: &str,
        key: &str,
        range: StreamRange,
    ) -> StorageResult<PayloadStream> {
        tracing::debug!("Reading from gcs backend");

        let mut request = self
            .request(Method::GET, &self.object_url(bucket, key))
            .await?
            .query(&[("alt", "media")]);
        if let Some(range) = range.to_http_header() {
            request = request.header(header::RANGE, range);
        }

        let response = request
            .send()
            .await
            .map_err(|cause| StorageError::backend("GCS: failed to read", cause))?;
        // The range starts after the end of the file.
        if response.status() == StatusCode::RANGE_NOT_SATISFIABLE {
            return Ok(futures_util::stream::empty().boxed());
        }
        let response = check(response, "read", file_not_found(bucket, key)).await?;

        let stream = response.bytes_stream().map_err(io::Error::other);
        Ok(stream.boxed())
    }

    #[tracing::instrument(level = "trace", fields(?bucket, ?key), skip_all)]
    async fn delete_file(&self, bucket: &str, key: &str, all_versions: bool) -> StorageResult<()> {
        tracing::debug!("Deleting from gcs backend");

        if !all_versions {
            let request = self
                .request(Method::DELETE, &self.object_url(bucket, key))
                .await?;
            send(request, "delete", file_not_found(bucket, key)).await?;
            return Ok(());
        }

        let generations: Vec<_> = self
            .list_objects(bucket, Some(key), true, None)
            .await?
            .into_iter()
            .filter(|object| object.name == key)
            .collect();
        if generations.is_empty() {
            return Err(file_not_found(bucket, key));
        }

        for object in &generations {
            self.delete_generation(bucket, object).await?;
        }
        Ok(())
    }

    async fn size_of(&self, bucket: &str, key: &str) -> StorageResult<u64> {
        let request = self
            .request(Method::GET, &self.object_url(bucket, key))
            .await?;
        let response = send(request, "read the size of", file_not_found(bucket, key)).await?;
        let object: ObjectResource = decode(response, "read the size of").await?;
        Ok(object.size())
    }

    async fn public_url(
        &self,
        bucket: &str,
        key: &str,
        _options: &PublicUrlOptions,
    ) -> StorageResult<String> {
        Ok(format!("{}/{bucket}/{}", self.endpoint, encode_path(key)))
    }

    async fn signed_url(
        &self,
        bucket: &str,
        key: &str,
        options: &SignedUrlOptions,
    ) -> StorageResult<String> {
        let mut signer = self.signer("GET", bucket, key, options.expires_in)?;
        if let Some(disposition) = &options.content_disposition {
            signer.param("response-content-disposition", disposition);
        }
        self.sign(signer).await
    }

    async fn presigned_upload_url(
        &self,
        bucket: &str,
        key: &str,
        options: &UploadUrlOptions,
    ) -> StorageResult<PresignedUpload> {
        if !options.conditions.is_empty() {
            tracing::warn!("GCS upload conditions are not supported, falling back to a signed PUT");
        }

        let mut signer = self.signer("PUT", bucket, key, options.expires_in)?;
        if let Some(content_type) = &options.content_type {
            signer.header("content-type", content_type);
        }
        Ok(PresignedUpload::put(self.sign(signer).await?))
    }
}

/// Sends a request, turning `404` into `missing` and other failures into backend errors.
/// Adds the binding that lets `allUsers` read objects to an IAM policy.
fn add_public_binding(policy: &mut Value) -> StorageResult<()> {
    let malformed = |cause: &str| {
        StorageError::backend("GCS: failed to make the bucket public", cause.to_owned())
    };

    let fields = policy
        .as_object_mut()
        .ok_or_else(|| malformed("the IAM policy is not an object"))?;
    let bindings = fields
        .entry("bindings")
        .or_insert_with(|| json!([]))
        .as_array_mut()
        .ok_or_else(|| malformed("the IAM policy bindings are not a list"))?;

    bindings.push(json!({"role": PUBLIC_ROLE, "members": [ALL_USERS]}));
    Ok(())
}

async fn send(request: RequestBuilder, action: &str, missing: StorageError) -> StorageResult<Response> {
    let response = request
        .send()
        .await
        .map_err(|cause| StorageError::backend(format!("GCS: failed to {action}"), cause))?;
    check(response, action, missing).await
}

async fn check(response: Response, action: &str, missing: StorageError) -> StorageResult<Response> {
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Err(missing);
    }
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|error| error["error"]["message"].as_str().map(str::to_owned))
        .unwrap_or(body);

    Err(StorageError::backend(
        format!("GCS: failed to {action}"),
        format!("{status}: {message}"),
    ))
}

async fn decode<T: DeserializeOwned>(response: Response, action: &str) -> StorageResult<T> {
    response
        .json()
        .await
        .map_err(|cause| StorageError::backend(format!("GCS: invalid response to {action}"), cause))
}

/// The parts of a V4 signed URL.
#[derive(Debug)]
struct UrlSigner {
    method: &'static str,
    path: String,
    email: String,
    timestamp: String,
    scope: String,
    query: BTreeMap<String, String>,
    headers: BTreeMap<String, String>,
}

impl UrlSigner {
    fn new(
        method: &'static str,
        bucket: &str,
        key: &str,
        email: &str,
        now: DateTime<Utc>,
        expires_in: u64,
    ) -> Self {
        let timestamp = now.format("%Y%m%dT%H%M%SZ").to_string();
        let scope = format!("{}/auto/storage/goog4_request", now.format("%Y%m%d"));

        let query = BTreeMap::from([
            ("X-Goog-Algorithm".to_owned(), SIGNING_ALGORITHM.to_owned()),
            ("X-Goog-Credential".to_owned(), format!("{email}/{scope}")),
            ("X-Goog-Date".to_owned(), timestamp.clone()),
            ("X-Goog-Expires".to_owned(), expires_in.to_string()),
        ]);
        let headers = BTreeMap::from([("host".to_owned(), SIGNING_HOST.to_owned())]);

        Self {
            method,
            path: format!("/{bucket}/{}", encode_path(key)),
            email: email.to_owned(),
            timestamp,
            scope,
            query,
            headers,
        }
    }

    fn param(&mut self, name: &str, value: &str) {
        self.query.insert(name.to_owned(), value.to_owned());
    }

    fn header(&mut self, name: &str, value: &str) {
        self.headers
            .insert(name.to_ascii_lowercase(), value.trim().to_owned());
    }

    fn signed_headers(&self) -> String {
        self.headers.keys().map(String::as_str).collect::<Vec<_>>().join(";")
    }

    fn canonical_query(&self) -> String {
        let mut query = self.query.clone();
        query.insert("X-Goog-SignedHeaders".to_owned(), self.signed_headers());

        query
            .iter()
            .map(|(name, value)| format!("{}={}", encode_component(name), encode_component(value)))
            .collect::<Vec<_>>()
            .join("&")
    }

    fn canonical_request(&self) -> String {
        let headers: String = self
            .headers
            .iter()
            .map(|(name, value)| format!("{name}:{value}\n"))
            .collect();

        format!(
            "{}\n{}\n{}\n{headers}\n{}\nUNSIGNED-PAYLOAD",
            self.method,
            self.path,
            self.canonical_query(),
            self.signed_headers(),
        )
    }

    fn string_to_sign(&self) -> String {
        let digest = Sha256::digest(self.canonical_request().as_bytes());
        format!(
            "{SIGNING_ALGORITHM}\n{}\n{}\n{}",
            self.timestamp,
            self.scope,
            hex::encode(digest)
        )
    }

    fn url(&self, signature: &str) -> String {
        format!(
            "https://{SIGNING_HOST}{}?{}&X-Goog-Signature={signature}",
            self.path,
            self.canonical_query()
        )
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn signer() -> UrlSigner {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        UrlSigner::new(
            "GET",
            "images",
            "2024/cat photo.jpg",
            "uploader@project.iam.gserviceaccount.com",
            now,
            3600,
        )
    }

    #[test]
    fn canonical_request() {
        let signer = signer();
        let expected = "GET\n\
            /images/2024/cat%20photo.jpg\n\
            X-Goog-Algorithm=GOOG4-RSA-SHA256\
            &X-Goog-Credential=uploader%40project.iam.gserviceaccount.com%2F20240301%2Fauto%2Fstorage%2Fgoog4_request\
            &X-Goog-Date=20240301T123000Z\
            &X-Goog-Expires=3600\
            &X-Goog-SignedHeaders=host\n\
            host:storage.googleapis.com\n\
            \n\
            host\n\
            UNSIGNED-PAYLOAD";
        assert_eq!(signer.canonical_request(), expected);
    }

    #[test]
    fn string_to_sign() {
        let signer = signer();
        let string_to_sign = signer.string_to_sign();
        let lines: Vec<_> = string_to_sign.lines().collect();

        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "GOOG4-RSA-SHA256");
        assert_eq!(lines[1], "20240301T123000Z");
        assert_eq!(lines[2], "20240301/auto/storage/goog4_request");
        assert_eq!(lines[3].len(), 64);
    }

    #[test]
    fn signs_additional_headers() {
        let mut signer = signer();
        signer.header("Content-Type", " image/jpeg ");
        signer.param("response-content-disposition", "attachment");

        let request = signer.canonical_request();
        assert!(request.contains("content-type:image/jpeg\nhost:storage.googleapis.com\n\ncontent-type;host\n"));
        assert!(request.contains("&X-Goog-SignedHeaders=content-type%3Bhost"));
        assert!(request.contains("response-content-disposition=attachment"));

        let url = signer.url("abcd");
        assert!(url.starts_with("https://storage.googleapis.com/images/2024/cat%20photo.jpg?"));
        assert!(url.ends_with("&X-Goog-Signature=abcd"));
    }

    #[tokio::test]
    async fn emulator_needs_no_credentials() {
        let config = Configuration::new("gcs").with("endpoint", "http://localhost:4443/");
        let backend = Gcs::from_config(&config).await.unwrap();

        let url = backend
            .public_url("bucket", "a b.txt", &Default::default())
            .await
            .unwrap();
        assert_eq!(url, "http://localhost:4443/bucket/a%20b.txt");

        let err = backend
            .signed_url("bucket", "a.txt", &Default::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Unsupported);

        let err = backend.list_buckets().await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn rejects_missing_key_file() {
        let config = Configuration::new("gcs").with("key_file", "/nonexistent/key.json");
        let err = Gcs::from_config(&config).await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Configuration);
    }

    #[test]
    fn adds_public_binding() {
        let mut policy = json!({"etag": "BwX"});
        add_public_binding(&mut policy).unwrap();
        assert_eq!(
            policy["bindings"],
            json!([{"role": PUBLIC_ROLE, "members": [ALL_USERS]}])
        );

        let mut policy = json!({"bindings": "roles/owner"});
        let err = add_public_binding(&mut policy).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Backend);
        assert_eq!(policy["bindings"], "roles/owner");
    }
}
