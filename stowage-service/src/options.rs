//! Per-operation options.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default lifetime of a signed download URL.
pub const DEFAULT_SIGNED_URL_EXPIRY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Default lifetime of a presigned upload URL.
pub const DEFAULT_UPLOAD_URL_EXPIRY: Duration = Duration::from_secs(60 * 60);

/// Options for creating a bucket.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateBucketOptions {
    /// Grant anonymous read access to the bucket's objects.
    pub public: bool,
    /// Enable object versioning.
    pub versioning: bool,
}

/// Options for uploading a file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddFileOptions {
    /// Target bucket, the selected bucket if absent.
    pub bucket: Option<String>,
    /// MIME type of the file.
    pub content_type: Option<String>,
    /// Custom metadata stored alongside the file.
    pub metadata: BTreeMap<String, String>,
}

/// Options for [`Adapter::get_public_url`](crate::Adapter::get_public_url).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicUrlOptions {
    /// Do not verify that the bucket is public.
    pub skip_public_check: bool,
    /// Local only: return the path relative to the storage directory.
    pub without_directory: bool,
}

/// Options for signed download URLs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedUrlOptions {
    /// How long the URL stays valid.
    pub expires_in: Duration,
    /// Value of the `Content-Disposition` header served with the download.
    pub content_disposition: Option<String>,
}

impl Default for SignedUrlOptions {
    fn default() -> Self {
        Self {
            expires_in: DEFAULT_SIGNED_URL_EXPIRY,
            content_disposition: None,
        }
    }
}

/// A constraint on a presigned upload.
///
/// Conditions are passed through to the provider. Providers without support for upload policies
/// ignore them and fall back to a plain presigned `PUT`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadCondition {
    /// The uploaded size must be within `min..=max` bytes.
    ContentLengthRange {
        /// Minimum size in bytes.
        min: u64,
        /// Maximum size in bytes.
        max: u64,
    },
    /// A form field must start with the given prefix.
    StartsWith {
        /// Field name, e.g. `Content-Type`.
        field: String,
        /// Required prefix.
        prefix: String,
    },
    /// A form field must have exactly the given value.
    Equals {
        /// Field name.
        field: String,
        /// Required value.
        value: String,
    },
}

/// Options for presigned upload URLs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadUrlOptions {
    /// How long the URL stays valid.
    pub expires_in: Duration,
    /// Content type the upload must declare.
    pub content_type: Option<String>,
    /// Additional constraints on the upload.
    pub conditions: Vec<UploadCondition>,
}

impl Default for UploadUrlOptions {
    fn default() -> Self {
        Self {
            expires_in: DEFAULT_UPLOAD_URL_EXPIRY,
            content_type: None,
            conditions: Vec::new(),
        }
    }
}

/// HTTP method to use with a [`PresignedUpload`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UploadMethod {
    /// Send the file as the request body.
    Put,
    /// Send a `multipart/form-data` request with [`PresignedUpload::fields`] and the file.
    Post,
}

/// A URL that allows a client to upload a file without credentials.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresignedUpload {
    /// Target URL.
    pub url: String,
    /// HTTP method to use.
    pub method: UploadMethod,
    /// Form fields to send with a `POST` upload. Empty for `PUT`.
    pub fields: BTreeMap<String, String>,
}

impl PresignedUpload {
    /// A presigned `PUT` upload.
    pub fn put(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: UploadMethod::Put,
            fields: BTreeMap::new(),
        }
    }
}
