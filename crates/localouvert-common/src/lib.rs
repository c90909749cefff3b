//! LocalOuvert Common Library
//!
//! Shared pieces of the LocalOuvert ingestion tools: error type, logging
//! setup, configuration loading and the hashing helpers that derive
//! artifact keys from source urls.

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod checksum;
pub mod config;
pub mod error;
pub mod logging;

pub use checksum::url_hash;
pub use error::{LocalOuvertError, Result};
