//! Shared types for the stowage storage abstraction.
//!
//! This crate holds everything that describes *what* to talk to without doing any I/O: the
//! [`Configuration`] bag handed to a provider, the [`ConnectionString`] grammar that produces it,
//! and small value types such as [`StreamRange`] and [`FileEntry`] that cross the adapter
//! boundary.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod config;
pub mod file;
pub mod range;
pub mod url;

pub use config::{ConfigInput, ConfigValue, Configuration, OptionError};
pub use file::FileEntry;
pub use range::{InvalidRangeError, StreamRange};
pub use url::{ConnectionString, ParseError};
