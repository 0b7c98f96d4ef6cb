//! Shared test utilities for content-ops.
//!
//! This crate provides:
//! - Proptest generators for paths, URLs and headers
//! - Canned content server responses
//! - Wiremock helpers for the content server endpoints

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod mocks;

pub use generators::*;
