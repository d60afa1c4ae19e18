//! Provider backends.
//!
//! Each backend talks to one kind of storage. They are created through the
//! [`registry`](crate::registry) from a [`Configuration`](stowage_types::Configuration).

mod common;
#[cfg(feature = "gcs")]
mod gcs;
mod in_memory;
mod local_fs;
#[cfg(feature = "s3")]
mod s3_compatible;

pub use common::{Backend, BoxedBackend, USER_AGENT};
#[cfg(feature = "gcs")]
pub use gcs::Gcs;
pub use in_memory::InMemoryBackend;
pub use local_fs::LocalFs;
#[cfg(feature = "s3")]
pub use s3_compatible::{S3Compatible, S3Flavor};
