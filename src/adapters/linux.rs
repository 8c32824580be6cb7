//! Mount management against the running kernel.

use std::path::{Path, PathBuf};

use nix::mount::{MntFlags, MsFlags, mount, umount2};
use tracing::{debug, info, warn};

use crate::core::backends::{BackendResult, MountManager};
use crate::core::classify::is_raw_fs_type;
use crate::core::volume::{Volume, VolumeRegistry};
use crate::error::BackendError;

/// Volumes of this type live in the initramfs and are always mounted.
const RAMDISK_FS_TYPE: &str = "ramdisk";

pub struct SystemMounts<'a> {
    registry: &'a dyn VolumeRegistry,
    by_name_dir: PathBuf,
    /// Kernel mount table, normally `/proc/mounts`.
    mounts_file: PathBuf,
}

impl<'a> SystemMounts<'a> {
    pub fn new(registry: &'a dyn VolumeRegistry, by_name_dir: &Path, mounts_file: &Path) -> Self {
        Self {
            registry,
            by_name_dir: by_name_dir.to_path_buf(),
            mounts_file: mounts_file.to_path_buf(),
        }
    }

    fn volume(&self, path: &Path) -> Result<&'a Volume, BackendError> {
        self.registry.lookup(path).ok_or_else(|| {
            BackendError::with_status(
                libc::ENOENT,
                format!("no volume registered for {}", path.display()),
            )
        })
    }

    fn mount_points(&self) -> Vec<PathBuf> {
        match std::fs::read_to_string(&self.mounts_file) {
            Ok(content) => parse_mount_points(&content),
            Err(e) => {
                warn!(file = %self.mounts_file.display(), error = %e, "Failed to read mount table");
                Vec::new()
            }
        }
    }

    fn try_mount(&self, device: &Path, mount_point: &Path, fs_type: &str) -> nix::Result<()> {
        debug!(
            device = %device.display(),
            mount_point = %mount_point.display(),
            fs_type,
            "Mounting"
        );
        mount(
            Some(device),
            mount_point,
            Some(fs_type),
            MsFlags::MS_NOATIME | MsFlags::MS_NODEV | MsFlags::MS_NODIRATIME,
            None::<&str>,
        )
    }
}

impl MountManager for SystemMounts<'_> {
    fn ensure_mounted(&self, path: &Path) -> BackendResult {
        let volume = self.volume(path)?;
        if volume.fs_type == RAMDISK_FS_TYPE || self.is_mounted(path) {
            return Ok(());
        }
        if is_raw_fs_type(&volume.fs_type) {
            return Err(BackendError::with_status(
                libc::EINVAL,
                format!("{} is a raw partition and can't be mounted", volume.mount_point.display()),
            ));
        }

        std::fs::create_dir_all(&volume.mount_point)
            .map_err(|e| BackendError::io(volume.mount_point.display(), e))?;

        let device = volume.resolve_device(&self.by_name_dir);
        let mut result = self.try_mount(&device, &volume.mount_point, &volume.fs_type);

        if result.is_err() {
            if let Some(fs_type2) = &volume.fs_type2 {
                result = self.try_mount(&device, &volume.mount_point, fs_type2);
            }
        }
        if result.is_err() {
            if let Some(device2) = &volume.device2 {
                result = self.try_mount(Path::new(device2), &volume.mount_point, &volume.fs_type);
            }
        }

        result.map_err(|e| {
            BackendError::with_status(
                e as i32,
                format!("failed to mount {}: {}", volume.mount_point.display(), e.desc()),
            )
        })?;
        info!(mount_point = %volume.mount_point.display(), "Mounted volume");
        Ok(())
    }

    fn ensure_unmounted(&self, path: &Path) -> BackendResult {
        let volume = self.volume(path)?;
        if volume.fs_type == RAMDISK_FS_TYPE || !self.is_mounted(path) {
            return Ok(());
        }

        umount2(volume.mount_point.as_path(), MntFlags::empty()).map_err(|e| {
            BackendError::with_status(
                e as i32,
                format!("failed to unmount {}: {}", volume.mount_point.display(), e.desc()),
            )
        })?;
        info!(mount_point = %volume.mount_point.display(), "Unmounted volume");
        Ok(())
    }

    fn is_mounted(&self, path: &Path) -> bool {
        let Ok(volume) = self.volume(path) else {
            return false;
        };
        if volume.fs_type == RAMDISK_FS_TYPE {
            return true;
        }
        self.mount_points().contains(&volume.mount_point)
    }
}

/// Extract the mount point column from a `/proc/mounts` style table.
fn parse_mount_points(content: &str) -> Vec<PathBuf> {
    content
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(|field| PathBuf::from(unescape_octal(field)))
        .collect()
}

/// The kernel escapes space, tab, newline and backslash as `\ooo`.
fn unescape_octal(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 4 <= bytes.len() {
            let escaped = std::str::from_utf8(&bytes[i + 1..i + 4])
                .ok()
                .and_then(|digits| u8::from_str_radix(digits, 8).ok());
            if let Some(value) = escaped {
                out.push(value);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
