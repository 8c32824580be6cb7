//! Concrete implementations of the backend traits.

pub mod checksum;
pub mod console;
pub mod format;
pub mod linux;
pub mod raw_image;
pub mod simulated;
pub mod tree_archive;

pub use checksum::{Blake3Manifest, MANIFEST_NAME};
pub use console::ConsoleReporter;
pub use format::Formatter;
pub use linux::SystemMounts;
pub use raw_image::BlockImage;
pub use tree_archive::TreeArchive;
