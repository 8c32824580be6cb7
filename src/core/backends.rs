//! Collaborator interfaces the orchestrators drive.
//!
//! Every operation blocks until it completes. The orchestrators call them from
//! a single thread, one partition at a time, so implementations are free to use
//! interior mutability without synchronisation.

use std::path::Path;

use crate::error::BackendError;

pub type BackendResult = std::result::Result<(), BackendError>;

/// Called once per archived or extracted entry with its path.
pub type ProgressCallback<'a> = &'a mut dyn FnMut(&Path);

pub trait MountManager {
    /// Mount the volume that owns `path`. Succeeds without change if it is
    /// already mounted.
    fn ensure_mounted(&self, path: &Path) -> BackendResult;

    /// Unmount the volume that owns `path`. Succeeds without change if it is
    /// not mounted.
    fn ensure_unmounted(&self, path: &Path) -> BackendResult;

    fn is_mounted(&self, path: &Path) -> bool;
}

pub trait RawImageBackend {
    /// Copy the whole device into `dest`.
    fn dump(&self, device: &Path, dest: &Path) -> BackendResult;

    /// Write the image at `src` back onto the device.
    fn restore(&self, device: &Path, src: &Path) -> BackendResult;
}

pub trait TreeArchiveBackend {
    /// Serialize the tree rooted at `dir` into `dest`.
    fn archive(&self, dir: &Path, dest: &Path, progress: Option<ProgressCallback<'_>>)
    -> BackendResult;

    /// Extract `src` into `dir`, which must already exist.
    fn unarchive(
        &self,
        src: &Path,
        dir: &Path,
        progress: Option<ProgressCallback<'_>>,
    ) -> BackendResult;
}

pub trait FormatBackend {
    /// Destroy the contents of the volume (or volume sub-path) at `target`.
    fn format(&self, target: &Path) -> BackendResult;
}

pub trait ChecksumTool {
    /// Write a manifest covering every artifact in `dir`.
    fn generate(&self, dir: &Path) -> BackendResult;

    /// Check every manifest entry in `dir` against the file on disk.
    fn verify(&self, dir: &Path) -> BackendResult;
}

/// User-facing status surface (console, recovery screen).
pub trait Reporter {
    fn print(&self, text: &str);

    /// Determinate progress, `0.0..=1.0`.
    fn set_progress(&self, fraction: f32);

    fn set_indeterminate(&self);

    fn reset_progress(&self);
}
