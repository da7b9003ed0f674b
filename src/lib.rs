//! `archive-host` opens, lists and extracts archives through a dynamically loaded
//! 7-Zip-compatible engine module (such as p7zip's `7z.so`).
//!
//! All format parsing and decompression happens inside the engine. This crate hosts it:
//! it reads the engine's format table, detects formats from signature bytes, hands the
//! engine memory-backed streams and callbacks, and rebuilds a directory tree from the
//! engine's flat entry list.
//!
//! # Example
//! ```rust,no_run
//! use archive_host::{Archive, Result};
//!
//! fn main() -> Result<()> {
//!     archive_host::initialize("/usr/lib/p7zip/7z.so")?;
//!     let mut archive = Archive::new();
//!     archive.open_path("some_archive.7z", None, None)?;
//!     for item in archive.list_directory("")? {
//!         println!("{} dir={} size={}", item.path, item.is_dir, item.size);
//!     }
//!     let content = archive.read_path_to_vec("docs/readme.txt", None)?;
//!     println!("content={content:?}");
//!     archive_host::uninitialize();
//!     Ok(())
//! }
//! ```
//! # Features
//! * `p7zip-vtable` (default) - Lays out interface vtables with the two virtual-destructor
//!   slots p7zip-style engines on Unix expect after `Release`.
//!

mod adapters;
mod archive_reader;
mod com;
mod engine;
pub mod error;
mod sevenzip;

pub use crate::archive_reader::*;
pub use engine::{
    FormatDescriptor, add_codec, formats, initialize, last_error, supported_formats, uninitialize,
};
pub use error::*;
pub use sevenzip::{FileTime, Guid};
