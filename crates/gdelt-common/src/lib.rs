//! GDELT Loader Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling, logging setup and checksum helpers for the loader
//! workspace members.
//!
//! # Example
//!
//! ```no_run
//! use gdelt_common::checksum::ensure_md5;
//! use gdelt_common::Result;
//!
//! fn check(archive: &[u8], published_md5: &str) -> Result<()> {
//!     ensure_md5(archive, published_md5, "20150218230000.export.CSV.zip")
//! }
//! ```

pub mod checksum;
pub mod error;
pub mod logging;

pub use error::{GdeltError, Result};
