use std::path::{Path, PathBuf};

/// A registered storage volume, as listed in the device's recovery volume table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    pub mount_point: PathBuf,
    pub fs_type: String,
    /// Device node path, or a logical partition name such as `boot`.
    pub device: String,
    /// Fallback device tried when mounting `device` fails.
    pub device2: Option<String>,
    /// Alternate filesystem type (e.g. an ext4 conversion of an rfs volume).
    pub fs_type2: Option<String>,
}

impl Volume {
    pub fn new(mount_point: impl Into<PathBuf>, fs_type: &str, device: &str) -> Self {
        Self {
            mount_point: mount_point.into(),
            fs_type: fs_type.to_string(),
            device: device.to_string(),
            device2: None,
            fs_type2: None,
        }
    }

    pub fn with_fs_type2(mut self, fs_type2: &str) -> Self {
        self.fs_type2 = Some(fs_type2.to_string());
        self
    }

    /// True when `device` is a logical partition name rather than a node path.
    pub fn is_logical_device(&self) -> bool {
        !self.device.starts_with('/')
    }

    /// Resolve the device to a concrete node path.
    ///
    /// Logical names resolve under `by_name_dir`, the directory of per-partition
    /// symlinks the kernel exposes (`/dev/block/by-name` on most devices).
    pub fn resolve_device(&self, by_name_dir: &Path) -> PathBuf {
        if self.is_logical_device() {
            by_name_dir.join(&self.device)
        } else {
            PathBuf::from(&self.device)
        }
    }

    /// Last component of the mount point, used to name backup artifacts.
    pub fn name(&self) -> String {
        basename(&self.mount_point)
    }
}

/// Read-only lookup of volumes by path.
pub trait VolumeRegistry {
    /// The volume whose mount point is the longest prefix of `path`.
    fn lookup(&self, path: &Path) -> Option<&Volume>;
}

/// In-memory volume table, usually loaded from `recovery.fstab`.
#[derive(Debug, Clone, Default)]
pub struct VolumeTable {
    volumes: Vec<Volume>,
}

impl VolumeTable {
    pub fn new(volumes: Vec<Volume>) -> Self {
        Self { volumes }
    }

    pub fn load(path: &Path) -> std::io::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::parse(&content))
    }

    /// Parse the whitespace separated table format:
    ///
    /// ```text
    /// # mount_point  fs_type  device                 [device2]  [fs_type2]
    /// /boot          mtd      boot
    /// /system        rfs      /dev/block/stl9        NULL       ext4
    /// ```
    ///
    /// Lines with fewer than three fields are ignored, as are `NULL` placeholders.
    pub fn parse(content: &str) -> Self {
        let volumes = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| {
                let mut fields = line.split_whitespace();
                let mount_point = fields.next()?;
                let fs_type = fields.next()?;
                let device = fields.next()?;
                let optional = |field: Option<&str>| {
                    field
                        .filter(|f| !f.eq_ignore_ascii_case("null"))
                        .map(str::to_string)
                };
                let device2 = optional(fields.next());
                let fs_type2 = optional(fields.next());

                Some(Volume {
                    mount_point: PathBuf::from(mount_point),
                    fs_type: fs_type.to_string(),
                    device: device.to_string(),
                    device2,
                    fs_type2,
                })
            })
            .collect();

        Self { volumes }
    }

    pub fn volumes(&self) -> &[Volume] {
        &self.volumes
    }
}

impl VolumeRegistry for VolumeTable {
    fn lookup(&self, path: &Path) -> Option<&Volume> {
        self.volumes
            .iter()
            .filter(|v| path.starts_with(&v.mount_point))
            .max_by_key(|v| v.mount_point.components().count())
    }
}

pub(crate) fn basename(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}
