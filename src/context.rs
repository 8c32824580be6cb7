use std::path::PathBuf;

use crate::config::AppConfig;
use crate::core::backends::{
    ChecksumTool, FormatBackend, MountManager, RawImageBackend, Reporter, TreeArchiveBackend,
};
use crate::core::markers::progress_hidden;
use crate::core::volume::VolumeRegistry;

/// Per-call switches for one backup or restore run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Mount point of the removable media holding backup sets.
    pub media_root: PathBuf,
    pub by_name_dir: PathBuf,
    /// Suppress per-file progress callbacks.
    pub hide_progress: bool,
    /// Marker file on the media that also suppresses them. Checked at each
    /// tree step, once the media is mounted.
    pub hide_progress_marker: Option<PathBuf>,
    /// Free space below this many MiB triggers a warning.
    pub min_free_mb: u64,
    /// Used to name the device-specific secondary partition's image.
    pub device_serial: String,
    /// Flush all filesystems when the run completes.
    pub sync: bool,
}

impl RunOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            media_root: config.media_root.clone(),
            by_name_dir: config.by_name_dir.clone(),
            hide_progress: false,
            hide_progress_marker: Some(config.hide_progress_marker()),
            min_free_mb: config.min_free_mb,
            device_serial: config.device_serial.clone(),
            sync: true,
        }
    }

    /// Whether per-file progress is suppressed right now.
    pub fn progress_hidden(&self) -> bool {
        self.hide_progress
            || self
                .hide_progress_marker
                .as_deref()
                .is_some_and(progress_hidden)
    }
}

/// Borrowed set of collaborators an orchestrator drives.
#[derive(Clone, Copy)]
pub struct Backends<'a> {
    pub registry: &'a dyn VolumeRegistry,
    pub mounts: &'a dyn MountManager,
    pub raw: &'a dyn RawImageBackend,
    pub tree: &'a dyn TreeArchiveBackend,
    pub format: &'a dyn FormatBackend,
    pub checksum: &'a dyn ChecksumTool,
    pub reporter: &'a dyn Reporter,
}
