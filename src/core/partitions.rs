//! The ordered set of logical partitions a backup or restore walks.
//!
//! Adding, removing or reordering a partition is an edit to [`PARTITIONS`];
//! the orchestrators only interpret the fields.

use std::path::{Path, PathBuf};

use crate::core::classify::Strategy;

/// Where a partition lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    /// A registered volume, by mount point.
    Volume(&'static str),
    /// A directory relative to the removable media root.
    Media(&'static str),
}

/// What it takes for a partition to be considered present on this device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// Must be registered. Absence fails a backup with `MissingVolume`.
    Required,
    /// Skipped when not registered.
    Optional,
    /// Registered and its device node exists.
    DeviceNode,
    /// The media directory exists.
    MediaDirectory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageName {
    /// `<basename(mount_point)>.img`
    Basename,
    /// `<basename(mount_point)>.<device serial>.img`
    WithSerial,
}

/// Restore behaviour when a selected raw partition has no image in the set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingImage {
    Fail,
    Warn(&'static str),
}

/// Which [`PartitionSelection`] flag governs the restore of a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionFlag {
    Boot,
    System,
    Data,
    Cache,
    SdExt,
    Secondary,
}

#[derive(Debug, Clone, Copy)]
pub struct PartitionSpec {
    pub name: &'static str,
    pub location: Location,
    pub presence: Presence,
    /// Forces a strategy instead of classifying the volume.
    pub strategy: Option<Strategy>,
    /// Leave tree partitions unmounted once the step is done.
    pub unmount_after: bool,
    /// Backup requires a trial mount to succeed, skipping otherwise.
    pub probe_mount: bool,
    pub skip_message: Option<&'static str>,
    pub unmountable_message: Option<&'static str>,
    pub image: ImageName,
    pub missing_image: MissingImage,
    /// `None` for partitions that are backed up but never restored.
    pub restore_flag: Option<SelectionFlag>,
}

impl PartitionSpec {
    const fn volume(name: &'static str, mount_point: &'static str) -> Self {
        Self {
            name,
            location: Location::Volume(mount_point),
            presence: Presence::Optional,
            strategy: None,
            unmount_after: true,
            probe_mount: false,
            skip_message: None,
            unmountable_message: None,
            image: ImageName::Basename,
            missing_image: MissingImage::Fail,
            restore_flag: None,
        }
    }

    /// Absolute path of the partition for this media root.
    pub fn path(&self, media_root: &Path) -> PathBuf {
        match self.location {
            Location::Volume(mount_point) => PathBuf::from(mount_point),
            Location::Media(relative) => media_root.join(relative),
        }
    }

    /// File name of this partition's artifact inside a backup set.
    pub fn image_file_name(&self, media_root: &Path, serial: &str) -> String {
        let base = crate::core::volume::basename(&self.path(media_root));
        match self.image {
            ImageName::Basename => format!("{}.img", base),
            ImageName::WithSerial => format!("{}.{}.img", base, serial),
        }
    }
}

pub static PARTITIONS: &[PartitionSpec] = &[
    PartitionSpec {
        restore_flag: Some(SelectionFlag::Boot),
        ..PartitionSpec::volume("boot", "/boot")
    },
    PartitionSpec::volume("recovery", "/recovery"),
    PartitionSpec {
        presence: Presence::DeviceNode,
        strategy: Some(Strategy::Raw),
        image: ImageName::WithSerial,
        missing_image: MissingImage::Warn(
            "WARNING: WiMAX partition exists, but the backup does not contain a WiMAX image.\n\
             You should create a new backup to protect your WiMAX keys.",
        ),
        restore_flag: Some(SelectionFlag::Secondary),
        ..PartitionSpec::volume("wimax", "/wimax")
    },
    PartitionSpec {
        restore_flag: Some(SelectionFlag::System),
        ..PartitionSpec::volume("system", "/system")
    },
    PartitionSpec {
        restore_flag: Some(SelectionFlag::Data),
        ..PartitionSpec::volume("data", "/data")
    },
    PartitionSpec {
        restore_flag: Some(SelectionFlag::Data),
        ..PartitionSpec::volume("datadata", "/datadata")
    },
    PartitionSpec {
        name: ".android_secure",
        location: Location::Media(".android_secure"),
        presence: Presence::MediaDirectory,
        strategy: Some(Strategy::Tree),
        unmount_after: false,
        skip_message: Some(
            "No .android_secure found. Skipping backup of applications on external storage.",
        ),
        restore_flag: Some(SelectionFlag::Data),
        ..PartitionSpec::volume(".android_secure", "")
    },
    PartitionSpec {
        presence: Presence::Required,
        unmount_after: false,
        restore_flag: Some(SelectionFlag::Cache),
        ..PartitionSpec::volume("cache", "/cache")
    },
    PartitionSpec {
        presence: Presence::DeviceNode,
        probe_mount: true,
        skip_message: Some("No sd-ext found. Skipping backup of sd-ext."),
        unmountable_message: Some(
            "Could not mount sd-ext. sd-ext backup may not be supported on this device. \
             Skipping backup of sd-ext.",
        ),
        restore_flag: Some(SelectionFlag::SdExt),
        ..PartitionSpec::volume("sd-ext", "/sd-ext")
    },
];

/// Which logical partitions a restore touches. Consumed by one restore call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PartitionSelection {
    pub boot: bool,
    pub system: bool,
    pub data: bool,
    pub cache: bool,
    pub sd_ext: bool,
    pub secondary: bool,
}

impl PartitionSelection {
    pub fn all() -> Self {
        Self {
            boot: true,
            system: true,
            data: true,
            cache: true,
            sd_ext: true,
            secondary: true,
        }
    }

    /// What `restore <directory>` selects: everything but the device-specific
    /// secondary partition.
    pub fn standard() -> Self {
        Self {
            secondary: false,
            ..Self::all()
        }
    }

    pub fn is_selected(&self, flag: SelectionFlag) -> bool {
        match flag {
            SelectionFlag::Boot => self.boot,
            SelectionFlag::System => self.system,
            SelectionFlag::Data => self.data,
            SelectionFlag::Cache => self.cache,
            SelectionFlag::SdExt => self.sd_ext,
            SelectionFlag::Secondary => self.secondary,
        }
    }
}
