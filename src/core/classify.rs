use std::path::Path;

use crate::core::volume::Volume;
use crate::error::{Error, Result};

/// Filesystem types that are flat block regions with no file tree.
pub const RAW_FS_TYPES: &[&str] = &["mtd", "bml", "emmc"];

/// How a partition is backed up and restored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Bit-for-bit image of the whole device.
    Raw,
    /// File-level archive of the mounted tree.
    Tree,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Tree => "tree",
        }
    }
}

pub fn is_raw_fs_type(fs_type: &str) -> bool {
    RAW_FS_TYPES.contains(&fs_type)
}

/// Pick the backup strategy for a volume from its filesystem type.
pub fn classify(volume: &Volume) -> Strategy {
    if is_raw_fs_type(&volume.fs_type) {
        Strategy::Raw
    } else {
        Strategy::Tree
    }
}

/// [`classify`] for a registry lookup that may have come back empty.
pub fn classify_lookup(path: &Path, volume: Option<&Volume>) -> Result<Strategy> {
    volume
        .map(classify)
        .ok_or_else(|| Error::MissingVolume(path.to_path_buf()))
}
