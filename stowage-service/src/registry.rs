//! The provider registry.
//!
//! Maps provider ids to backend constructors. Providers that live behind a cargo feature stay
//! registered when the feature is disabled, so that asking for them produces an error naming the
//! missing feature instead of an unknown provider.

use std::fmt;

use futures_util::future::BoxFuture;
use stowage_types::Configuration;

use crate::backend::{BoxedBackend, InMemoryBackend, LocalFs};
use crate::error::{StorageError, StorageResult};

/// Creates a backend from a configuration.
pub type BackendFactory = for<'a> fn(&'a Configuration) -> BoxFuture<'a, StorageResult<BoxedBackend>>;

/// A registered provider.
pub struct Provider {
    /// The id used as scheme of connection strings.
    pub id: &'static str,
    /// The cargo feature of `stowage-service` the provider needs, if any.
    pub feature: Option<&'static str>,
    factory: Option<BackendFactory>,
}

impl Provider {
    /// Returns `true` if the provider was compiled in.
    pub fn is_available(&self) -> bool {
        self.factory.is_some()
    }

    /// Creates a backend for this provider.
    pub async fn create(&self, config: &Configuration) -> StorageResult<BoxedBackend> {
        let Some(factory) = self.factory else {
            return Err(self.unavailable());
        };

        tracing::debug!(provider = self.id, "creating backend");
        factory(config).await
    }

    fn unavailable(&self) -> StorageError {
        StorageError::config(format!(
            "Provider {} is not available, enable the `{}` feature of stowage-service",
            self.id,
            self.feature.unwrap_or_default()
        ))
    }
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("id", &self.id)
            .field("feature", &self.feature)
            .field("available", &self.is_available())
            .finish()
    }
}

fn local(config: &Configuration) -> BoxFuture<'_, StorageResult<BoxedBackend>> {
    Box::pin(async move { Ok(Box::new(LocalFs::from_config(config)?) as BoxedBackend) })
}

fn memory(config: &Configuration) -> BoxFuture<'_, StorageResult<BoxedBackend>> {
    Box::pin(async move { Ok(Box::new(InMemoryBackend::from_config(config)?) as BoxedBackend) })
}

#[cfg(feature = "s3")]
mod s3 {
    use super::*;
    use crate::backend::{S3Compatible, S3Flavor};

    async fn create(flavor: S3Flavor, config: &Configuration) -> StorageResult<BoxedBackend> {
        Ok(Box::new(S3Compatible::from_config(flavor, config).await?) as BoxedBackend)
    }

    pub fn aws(config: &Configuration) -> BoxFuture<'_, StorageResult<BoxedBackend>> {
        Box::pin(create(S3Flavor::Aws, config))
    }

    pub fn minio(config: &Configuration) -> BoxFuture<'_, StorageResult<BoxedBackend>> {
        Box::pin(create(S3Flavor::Minio, config))
    }

    pub fn r2(config: &Configuration) -> BoxFuture<'_, StorageResult<BoxedBackend>> {
        Box::pin(create(S3Flavor::CloudflareR2, config))
    }

    pub fn b2(config: &Configuration) -> BoxFuture<'_, StorageResult<BoxedBackend>> {
        Box::pin(create(S3Flavor::Backblaze, config))
    }
}

#[cfg(feature = "gcs")]
fn gcs(config: &Configuration) -> BoxFuture<'_, StorageResult<BoxedBackend>> {
    use crate::backend::Gcs;
    Box::pin(async move { Ok(Box::new(Gcs::from_config(config).await?) as BoxedBackend) })
}

#[cfg(feature = "s3")]
macro_rules! s3_factory {
    ($flavor:ident) => {
        Some(s3::$flavor as BackendFactory)
    };
}

#[cfg(not(feature = "s3"))]
macro_rules! s3_factory {
    ($flavor:ident) => {
        None
    };
}

#[cfg(feature = "gcs")]
const GCS: Option<BackendFactory> = Some(gcs as BackendFactory);
#[cfg(not(feature = "gcs"))]
const GCS: Option<BackendFactory> = None;

static PROVIDERS: &[Provider] = &[
    Provider {
        id: "local",
        feature: None,
        factory: Some(local as BackendFactory),
    },
    Provider {
        id: "memory",
        feature: None,
        factory: Some(memory as BackendFactory),
    },
    Provider {
        id: "s3",
        feature: Some("s3"),
        factory: s3_factory!(aws),
    },
    Provider {
        id: "minio",
        feature: Some("s3"),
        factory: s3_factory!(minio),
    },
    Provider {
        id: "r2",
        feature: Some("s3"),
        factory: s3_factory!(r2),
    },
    Provider {
        id: "b2",
        feature: Some("s3"),
        factory: s3_factory!(b2),
    },
    Provider {
        id: "gcs",
        feature: Some("gcs"),
        factory: GCS,
    },
];

/// Returns all registered providers, including those not compiled in.
pub fn providers() -> &'static [Provider] {
    PROVIDERS
}

/// Returns the ids of the providers that can be used.
pub fn available_providers() -> Vec<&'static str> {
    PROVIDERS
        .iter()
        .filter(|provider| provider.is_available())
        .map(|provider| provider.id)
        .collect()
}

/// Finds the provider for an id.
///
/// Unknown ids and providers whose feature is disabled are configuration errors.
pub fn lookup(id: &str) -> StorageResult<&'static Provider> {
    let provider = PROVIDERS
        .iter()
        .find(|provider| provider.id == id)
        .ok_or_else(|| {
            let known: Vec<_> = PROVIDERS.iter().map(|provider| provider.id).collect();
            StorageError::config(format!(
                "Unknown provider {id:?}, expected one of: {}",
                known.join(", ")
            ))
        })?;

    if !provider.is_available() {
        return Err(provider.unavailable());
    }
    Ok(provider)
}

/// Creates the backend for the provider named in the configuration.
pub async fn create(config: &Configuration) -> StorageResult<BoxedBackend> {
    lookup(config.provider())?.create(config).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn unknown_provider_lists_known_ids() {
        let err = lookup("azure").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);

        let message = err.to_string();
        assert!(message.contains("\"azure\""), "{message}");
        for provider in providers() {
            assert!(message.contains(provider.id), "{message}");
        }
    }

    #[test]
    fn builtin_providers_are_available() {
        let available = available_providers();
        assert!(available.contains(&"local"));
        assert!(available.contains(&"memory"));
        assert_eq!(cfg!(feature = "s3"), available.contains(&"minio"));
        assert_eq!(cfg!(feature = "gcs"), available.contains(&"gcs"));
    }

    #[test]
    fn ids_are_unique() {
        let mut ids: Vec<_> = providers().iter().map(|provider| provider.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), providers().len());
    }

    #[tokio::test]
    async fn creates_backends() {
        let backend = create(&Configuration::new("memory")).await.unwrap();
        assert_eq!(backend.name(), "memory");

        let dir = tempfile::tempdir().unwrap();
        let config = Configuration::new("local").with("directory", dir.path().to_str().unwrap());
        let backend = create(&config).await.unwrap();
        assert_eq!(backend.name(), "local");
    }

    #[tokio::test]
    async fn construction_errors_are_config_errors() {
        let err = create(&Configuration::new("local")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[cfg(not(feature = "gcs"))]
    #[test]
    fn disabled_provider_names_feature() {
        let err = lookup("gcs").unwrap_err();
        assert!(err.to_string().contains("`gcs` feature"));
    }
}
