//! # Orbit Core Utilities
//!
//! Filesystem helpers shared by discovery, installation and the links file.
pub mod fs;

pub use fs::{copy_dir_recursive, is_ignored_entry, parse_links};
