//! In-memory collaborators that record every call, for tests and dry runs.
//!
//! `SimulatedDevice` plays registry, mount manager and every backend at once so
//! a test can assert on the exact order of calls an orchestrator made. Dumps
//! and archives write small placeholder files, so a backup set produced against
//! it can be fed straight into a restore.

use std::cell::RefCell;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::context::Backends;
use crate::core::backends::{
    BackendResult, ChecksumTool, FormatBackend, MountManager, ProgressCallback, RawImageBackend,
    Reporter, TreeArchiveBackend,
};
use crate::core::volume::{Volume, VolumeRegistry, VolumeTable};
use crate::error::BackendError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Mount(PathBuf),
    Unmount(PathBuf),
    Dump { device: PathBuf, dest: PathBuf },
    RestoreImage { device: PathBuf, src: PathBuf },
    Archive { dir: PathBuf, dest: PathBuf },
    Unarchive { src: PathBuf, dir: PathBuf },
    Format(PathBuf),
    Generate(PathBuf),
    Verify(PathBuf),
}

impl Call {
    /// Calls that change the contents of a partition.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Call::RestoreImage { .. } | Call::Unarchive { .. } | Call::Format(_)
        )
    }
}

pub struct SimulatedDevice {
    table: VolumeTable,
    mounted: RefCell<HashSet<PathBuf>>,
    unmountable: RefCell<HashSet<PathBuf>>,
    failures: RefCell<Vec<Call>>,
    calls: RefCell<Vec<Call>>,
    /// Entries each archive/unarchive reports through the progress callback.
    entries_per_tree: usize,
}

impl SimulatedDevice {
    pub fn new(volumes: Vec<Volume>) -> Self {
        Self {
            table: VolumeTable::new(volumes),
            mounted: RefCell::new(HashSet::new()),
            unmountable: RefCell::new(HashSet::new()),
            failures: RefCell::new(Vec::new()),
            calls: RefCell::new(Vec::new()),
            entries_per_tree: 2,
        }
    }

    /// Make the given call fail with status 1 when it is made.
    pub fn fail_on(&self, call: Call) {
        self.failures.borrow_mut().push(call);
    }

    /// Make mounting the volume at `mount_point` fail.
    pub fn refuse_mount(&self, mount_point: impl Into<PathBuf>) {
        self.unmountable.borrow_mut().insert(mount_point.into());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.borrow_mut().clear();
    }

    pub fn backends<'a>(&'a self, reporter: &'a dyn Reporter) -> Backends<'a> {
        Backends {
            registry: self,
            mounts: self,
            raw: self,
            tree: self,
            format: self,
            checksum: self,
            reporter,
        }
    }

    fn record(&self, call: Call) -> BackendResult {
        let fails = self.failures.borrow().contains(&call);
        let message = format!("simulated failure: {:?}", call);
        self.calls.borrow_mut().push(call);
        if fails {
            return Err(BackendError::new(message));
        }
        Ok(())
    }

    fn mount_point_for(&self, path: &Path) -> Option<PathBuf> {
        self.table.lookup(path).map(|v| v.mount_point.clone())
    }

    fn emit_entries(&self, root: &Path, progress: Option<ProgressCallback<'_>>) {
        if let Some(callback) = progress {
            for i in 0..self.entries_per_tree {
                callback(&root.join(format!("entry-{}", i)));
            }
        }
    }
}

impl VolumeRegistry for SimulatedDevice {
    fn lookup(&self, path: &Path) -> Option<&Volume> {
        self.table.lookup(path)
    }
}

impl MountManager for SimulatedDevice {
    fn ensure_mounted(&self, path: &Path) -> BackendResult {
        let Some(mount_point) = self.mount_point_for(path) else {
            return Err(BackendError::new(format!(
                "no volume for {}",
                path.display()
            )));
        };
        if self.mounted.borrow().contains(&mount_point) {
            return Ok(());
        }
        self.record(Call::Mount(mount_point.clone()))?;
        if self.unmountable.borrow().contains(&mount_point) {
            return Err(BackendError::new(format!(
                "can't mount {}",
                mount_point.display()
            )));
        }
        self.mounted.borrow_mut().insert(mount_point);
        Ok(())
    }

    fn ensure_unmounted(&self, path: &Path) -> BackendResult {
        let Some(mount_point) = self.mount_point_for(path) else {
            return Ok(());
        };
        if !self.mounted.borrow().contains(&mount_point) {
            return Ok(());
        }
        self.record(Call::Unmount(mount_point.clone()))?;
        self.mounted.borrow_mut().remove(&mount_point);
        Ok(())
    }

    fn is_mounted(&self, path: &Path) -> bool {
        self.mount_point_for(path)
            .map(|mp| self.mounted.borrow().contains(&mp))
            .unwrap_or(false)
    }
}

impl RawImageBackend for SimulatedDevice {
    fn dump(&self, device: &Path, dest: &Path) -> BackendResult {
        self.record(Call::Dump {
            device: device.to_path_buf(),
            dest: dest.to_path_buf(),
        })?;
        std::fs::write(dest, device.to_string_lossy().as_bytes())?;
        Ok(())
    }

    fn restore(&self, device: &Path, src: &Path) -> BackendResult {
        self.record(Call::RestoreImage {
            device: device.to_path_buf(),
            src: src.to_path_buf(),
        })
    }
}

impl TreeArchiveBackend for SimulatedDevice {
    fn archive(
        &self,
        dir: &Path,
        dest: &Path,
        progress: Option<ProgressCallback<'_>>,
    ) -> BackendResult {
        self.record(Call::Archive {
            dir: dir.to_path_buf(),
            dest: dest.to_path_buf(),
        })?;
        self.emit_entries(dir, progress);
        std::fs::write(dest, dir.to_string_lossy().as_bytes())?;
        Ok(())
    }

    fn unarchive(
        &self,
        src: &Path,
        dir: &Path,
        progress: Option<ProgressCallback<'_>>,
    ) -> BackendResult {
        self.record(Call::Unarchive {
            src: src.to_path_buf(),
            dir: dir.to_path_buf(),
        })?;
        self.emit_entries(dir, progress);
        Ok(())
    }
}

impl FormatBackend for SimulatedDevice {
    fn format(&self, target: &Path) -> BackendResult {
        self.record(Call::Format(target.to_path_buf()))
    }
}

impl ChecksumTool for SimulatedDevice {
    fn generate(&self, dir: &Path) -> BackendResult {
        self.record(Call::Generate(dir.to_path_buf()))
    }

    fn verify(&self, dir: &Path) -> BackendResult {
        self.record(Call::Verify(dir.to_path_buf()))
    }
}

/// Reporter that keeps everything it was told.
#[derive(Default)]
pub struct RecordingReporter {
    lines: RefCell<Vec<String>>,
    progress: RefCell<Vec<f32>>,
    indeterminate: RefCell<u32>,
}

impl RecordingReporter {
    pub fn lines(&self) -> Vec<String> {
        self.lines.borrow().clone()
    }

    pub fn progress(&self) -> Vec<f32> {
        self.progress.borrow().clone()
    }

    pub fn indeterminate_count(&self) -> u32 {
        *self.indeterminate.borrow()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines.borrow().iter().any(|l| l.contains(needle))
    }
}

impl Reporter for RecordingReporter {
    fn print(&self, text: &str) {
        self.lines.borrow_mut().push(text.to_string());
    }

    fn set_progress(&self, fraction: f32) {
        self.progress.borrow_mut().push(fraction);
    }

    fn set_indeterminate(&self) {
        *self.indeterminate.borrow_mut() += 1;
    }

    fn reset_progress(&self) {}
}
