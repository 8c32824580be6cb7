//! Pieces shared by the backup and restore orchestrators: step outcomes,
//! partition presence checks and the tree-step progress plumbing.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::context::{Backends, RunOptions};
use crate::core::backends::{ProgressCallback, Reporter, TreeArchiveBackend};
use crate::core::classify::{Strategy, classify};
use crate::core::partitions::{Location, PartitionSpec, Presence};
use crate::core::progress::{ProgressCounter, count_entries, report_entry};
use crate::core::volume::Volume;
use crate::error::{BackendError, Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No volume is registered at the partition's mount point.
    NotRegistered,
    /// Registered, but its device node does not exist on this device.
    DeviceMissing,
    /// The trial mount failed.
    Unmountable,
    /// The media directory does not exist.
    DirectoryMissing,
    /// The backup set holds no artifact for this partition.
    ArtifactMissing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Completed(Strategy),
    Skipped(SkipReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    pub partition: &'static str,
    pub outcome: StepOutcome,
}

/// Non-fatal conditions worth surfacing after a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advisory {
    /// The media had less free space than the configured threshold.
    SpaceWarning { free_mb: u64, threshold_mb: u64 },
    /// A present device-specific partition had no image to restore.
    MissingImage { partition: &'static str, path: PathBuf },
}

/// What a completed backup or restore did, partition by partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub directory: PathBuf,
    pub steps: Vec<StepRecord>,
    pub advisories: Vec<Advisory>,
}

impl Report {
    pub(crate) fn new(directory: &Path) -> Self {
        Self {
            directory: directory.to_path_buf(),
            steps: Vec::new(),
            advisories: Vec::new(),
        }
    }

    pub(crate) fn complete(&mut self, partition: &'static str, strategy: Strategy) {
        self.steps.push(StepRecord {
            partition,
            outcome: StepOutcome::Completed(strategy),
        });
    }

    pub(crate) fn skip(&mut self, partition: &'static str, reason: SkipReason) {
        self.steps.push(StepRecord {
            partition,
            outcome: StepOutcome::Skipped(reason),
        });
    }

    /// Names of partitions that were backed up or restored, in order.
    pub fn completed(&self) -> Vec<&'static str> {
        self.steps
            .iter()
            .filter(|s| matches!(s.outcome, StepOutcome::Completed(_)))
            .map(|s| s.partition)
            .collect()
    }

    pub fn skipped(&self) -> Vec<(&'static str, SkipReason)> {
        self.steps
            .iter()
            .filter_map(|s| match s.outcome {
                StepOutcome::Skipped(reason) => Some((s.partition, reason)),
                StepOutcome::Completed(_) => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Backup,
    Restore,
}

/// A partition that passed its presence checks.
pub(crate) struct Target<'a> {
    pub path: PathBuf,
    pub volume: Option<&'a Volume>,
    pub strategy: Strategy,
}

impl<'a> Target<'a> {
    /// The registered volume, required by every raw step.
    pub fn raw_volume(&self) -> Result<&'a Volume> {
        self.volume
            .ok_or_else(|| Error::MissingVolume(self.path.clone()))
    }
}

pub(crate) enum Resolved<'a> {
    Present(Target<'a>),
    Skip(SkipReason),
}

/// Apply a partition's presence rule against the registry and the filesystem.
pub(crate) fn resolve<'a>(
    spec: &PartitionSpec,
    backends: &Backends<'a>,
    options: &RunOptions,
    phase: Phase,
) -> Result<Resolved<'a>> {
    let path = spec.path(&options.media_root);
    let volume = match spec.location {
        // A partition is registered only when a volume sits exactly at its mount point.
        Location::Volume(_) => backends
            .registry
            .lookup(&path)
            .filter(|v| v.mount_point == path),
        Location::Media(_) => backends.registry.lookup(&path),
    };

    match spec.presence {
        Presence::Required if volume.is_none() => {
            if phase == Phase::Backup {
                return Err(Error::MissingVolume(path));
            }
            return Ok(Resolved::Skip(SkipReason::NotRegistered));
        }
        Presence::Optional | Presence::DeviceNode if volume.is_none() => {
            return Ok(Resolved::Skip(SkipReason::NotRegistered));
        }
        Presence::DeviceNode => {
            let device = volume
                .map(|v| v.resolve_device(&options.by_name_dir))
                .unwrap_or_default();
            if !device.exists() {
                debug!(partition = spec.name, device = %device.display(), "Device node missing");
                return Ok(Resolved::Skip(SkipReason::DeviceMissing));
            }
        }
        Presence::MediaDirectory if phase == Phase::Backup && !path.is_dir() => {
            return Ok(Resolved::Skip(SkipReason::DirectoryMissing));
        }
        _ => {}
    }

    let strategy = spec
        .strategy
        .or_else(|| volume.map(classify))
        .unwrap_or(Strategy::Tree);

    Ok(Resolved::Present(Target {
        path,
        volume,
        strategy,
    }))
}

/// Which way a tree step moves data.
pub(crate) enum TreeDirection<'p> {
    /// Archive the tree into the given file.
    Archive(&'p Path),
    /// Extract the given file into the tree.
    Extract(&'p Path),
}

/// Run one tree archive operation against `dir` with per-file progress.
///
/// Archiving sizes the progress bar by counting `dir` first; extraction has no
/// tree to count and runs with whatever total the caller left.
pub(crate) fn run_tree(
    tree: &dyn TreeArchiveBackend,
    reporter: &dyn Reporter,
    hide_progress: bool,
    dir: &Path,
    direction: TreeDirection<'_>,
) -> std::result::Result<(), BackendError> {
    let mut counter = ProgressCounter::new();
    if let TreeDirection::Archive(_) = direction {
        counter.reset(count_entries(dir));
    }
    reporter.reset_progress();

    let mut on_entry = |path: &Path| report_entry(&mut counter, reporter, path);
    let progress: Option<ProgressCallback<'_>> = if hide_progress {
        None
    } else {
        Some(&mut on_entry)
    };

    match direction {
        TreeDirection::Archive(dest) => tree.archive(dir, dest, progress),
        TreeDirection::Extract(src) => tree.unarchive(src, dir, progress),
    }
}

/// Best-effort unmount at the end of a step. A failure leaves the partition
/// mounted and is only logged.
pub(crate) fn release(backends: &Backends<'_>, partition: &str, path: &Path) {
    if let Err(e) = backends.mounts.ensure_unmounted(path) {
        warn!(partition, path = %path.display(), error = %e, "Failed to unmount after step");
    }
}

/// Flush every filesystem to stable storage.
pub(crate) fn flush(options: &RunOptions) {
    if options.sync {
        nix::unistd::sync();
    }
}
