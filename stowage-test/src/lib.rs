//! Test utilities for stowage.
//!
//! This crate provides utilities to facilitate testing of stowage and its providers. See the
//! modules for all available utilities.

pub mod fixtures;
pub mod tracing;
