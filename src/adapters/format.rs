//! Destructive reinitialization of volumes ahead of a restore.

use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info, warn};

use crate::adapters::raw_image::BUFFER_SIZE;
use crate::core::backends::{BackendResult, FormatBackend, MountManager};
use crate::core::classify::is_raw_fs_type;
use crate::core::volume::{Volume, VolumeRegistry};
use crate::error::BackendError;

const EXT_FS_TYPES: [&str; 3] = ["ext2", "ext3", "ext4"];

pub struct Formatter<'a> {
    registry: &'a dyn VolumeRegistry,
    mounts: &'a dyn MountManager,
    by_name_dir: PathBuf,
    mke2fs: PathBuf,
}

impl<'a> Formatter<'a> {
    pub fn new(
        registry: &'a dyn VolumeRegistry,
        mounts: &'a dyn MountManager,
        by_name_dir: &Path,
    ) -> Self {
        Self {
            registry,
            mounts,
            by_name_dir: by_name_dir.to_path_buf(),
            mke2fs: PathBuf::from("mke2fs"),
        }
    }

    /// Use a specific `mke2fs` binary instead of the one on `PATH`.
    pub fn with_mke2fs(mut self, path: impl Into<PathBuf>) -> Self {
        self.mke2fs = path.into();
        self
    }

    fn make_ext_fs(&self, volume: &Volume, device: &Path) -> BackendResult {
        self.mounts.ensure_unmounted(&volume.mount_point)?;

        info!(device = %device.display(), fs_type = %volume.fs_type, "Creating filesystem");
        let status = Command::new(&self.mke2fs)
            .args(["-q", "-F", "-t", volume.fs_type.as_str()])
            .arg(device)
            .status()
            .map_err(|e| BackendError::io(format!("failed to run {}", self.mke2fs.display()), e))?;

        if !status.success() {
            return Err(BackendError::with_status(
                status.code().unwrap_or(1),
                format!("mke2fs failed on {}", device.display()),
            ));
        }
        Ok(())
    }

    /// Mount the volume holding `dir` and delete everything inside `dir`.
    fn empty_mounted(&self, volume: &Volume, dir: &Path) -> BackendResult {
        self.mounts.ensure_mounted(&volume.mount_point)?;
        fs::create_dir_all(dir).map_err(|e| BackendError::io(dir.display(), e))?;
        let removed = empty_directory(dir)?;
        debug!(dir = %dir.display(), removed, "Emptied directory");
        Ok(())
    }
}

impl FormatBackend for Formatter<'_> {
    fn format(&self, target: &Path) -> BackendResult {
        let volume = self.registry.lookup(target).ok_or_else(|| {
            BackendError::with_status(
                libc::ENOENT,
                format!("no volume registered for {}", target.display()),
            )
        })?;

        // A directory below the mount point is wiped in place; the volume stays.
        if target != volume.mount_point {
            return self.empty_mounted(volume, target);
        }

        let device = volume.resolve_device(&self.by_name_dir);
        if volume.is_logical_device() || is_raw_fs_type(&volume.fs_type) {
            return zero_fill(&device);
        }

        if volume.mount_point == Path::new("/sd-ext") && !device.exists() {
            info!(device = %device.display(), "No sd-ext partition present, nothing to format");
            return Ok(());
        }

        if EXT_FS_TYPES.contains(&volume.fs_type.as_str()) {
            return self.make_ext_fs(volume, &device);
        }

        self.empty_mounted(volume, &volume.mount_point)?;
        if let Err(e) = self.mounts.ensure_unmounted(&volume.mount_point) {
            warn!(mount_point = %volume.mount_point.display(), error = %e, "Failed to unmount after format");
        }
        Ok(())
    }
}

/// Overwrite the whole device with zeros.
fn zero_fill(device: &Path) -> BackendResult {
    let mut file = OpenOptions::new()
        .write(true)
        .open(device)
        .map_err(|e| BackendError::io(format!("failed to open {}", device.display()), e))?;

    let mut remaining = file.seek(SeekFrom::End(0))?;
    file.seek(SeekFrom::Start(0))?;
    let size = remaining;

    let zeros = vec![0u8; BUFFER_SIZE];
    while remaining > 0 {
        let chunk = remaining.min(BUFFER_SIZE as u64) as usize;
        file.write_all(&zeros[..chunk])
            .map_err(|e| BackendError::io(format!("failed to erase {}", device.display()), e))?;
        remaining -= chunk as u64;
    }
    file.sync_all()?;

    info!(device = %device.display(), bytes = size, "Erased raw partition");
    Ok(())
}

/// Remove every entry in `dir`, hidden ones included. Returns the count.
fn empty_directory(dir: &Path) -> Result<usize, BackendError> {
    let mut removed = 0;
    for entry in fs::read_dir(dir).map_err(|e| BackendError::io(dir.display(), e))? {
        let path = entry?.path();
        let is_dir = path.symlink_metadata().is_ok_and(|m| m.is_dir());
        let result = if is_dir {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        result.map_err(|e| BackendError::io(format!("failed to remove {}", path.display()), e))?;
        removed += 1;
    }
    Ok(removed)
}
