//! Static mount table (`/etc/fstab`) generation from the volume registry.

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::core::classify::is_raw_fs_type;
use crate::core::volume::VolumeRegistry;

/// Mount points written to the table, in order. `/boot` is only written when
/// it is not a raw partition.
const MOUNT_POINTS: &[&str] = &["/boot", "/cache", "/data", "/datadata", "/system", "/sdcard", "/sd-ext"];

/// Filesystem type that must never be relabelled `auto`: it would be
/// auto-detected as vfat.
const NO_AUTO_FS_TYPE: &str = "rfs";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FstabEntry {
    pub device: PathBuf,
    pub mount_point: PathBuf,
    pub fs_label: String,
}

impl fmt::Display for FstabEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} rw",
            self.device.display(),
            self.mount_point.display(),
            self.fs_label
        )
    }
}

pub struct FstabGenerator<'a> {
    registry: &'a dyn VolumeRegistry,
    by_name_dir: PathBuf,
}

impl<'a> FstabGenerator<'a> {
    pub fn new(registry: &'a dyn VolumeRegistry, by_name_dir: &Path) -> Self {
        Self {
            registry,
            by_name_dir: by_name_dir.to_path_buf(),
        }
    }

    pub fn entries(&self) -> Vec<FstabEntry> {
        MOUNT_POINTS
            .iter()
            .filter_map(|mount_point| self.entry(Path::new(mount_point)))
            .collect()
    }

    fn entry(&self, mount_point: &Path) -> Option<FstabEntry> {
        let Some(volume) = self
            .registry
            .lookup(mount_point)
            .filter(|v| v.mount_point == mount_point)
        else {
            if mount_point != Path::new("/datadata") {
                warn!(mount_point = %mount_point.display(), "No volume info during fstab generation");
            }
            return None;
        };

        if mount_point == Path::new("/boot") && is_raw_fs_type(&volume.fs_type) {
            return None;
        }

        let fs_label = if volume.fs_type2.is_some() && volume.fs_type != NO_AUTO_FS_TYPE {
            "auto".to_string()
        } else {
            volume.fs_type.clone()
        };

        Some(FstabEntry {
            device: volume.resolve_device(&self.by_name_dir),
            mount_point: mount_point.to_path_buf(),
            fs_label,
        })
    }

    /// Write the table to `path` and make sure an `mtab` exists beside it.
    pub fn write(&self, path: &Path) -> std::io::Result<usize> {
        let entries = self.entries();

        let mut file = std::fs::File::create(path)?;
        for entry in &entries {
            writeln!(file, "{}", entry)?;
        }
        file.sync_all()?;

        if let Some(parent) = path.parent() {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(parent.join("mtab"))?;
        }

        info!(path = %path.display(), entries = entries.len(), "Completed writing fstab");
        Ok(entries.len())
    }
}
