//! The `stowage` command line tool.
//!
//! This builds on top of [`stowage_service`] and exposes every storage operation as a
//! subcommand. Each command prints a single JSON envelope, `{"value": ..., "error": null}` on
//! success or `{"value": null, "error": "...", "kind": "..."}` on failure.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod cli;
pub mod config;
pub mod observability;
pub mod output;
