//! Marker files shared with the surrounding recovery flow.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::core::backends::{MountManager, Reporter};
use crate::core::volume::basename;

/// Directory on the media holding backup sets, markers and failure logs.
pub const MEDIA_DIR: &str = "partsnap";

/// Whether the user asked for per-file progress to be hidden.
pub fn progress_hidden(marker: &Path) -> bool {
    marker.exists()
}

/// Where a pending extended command lives and what to do with it.
#[derive(Debug, Clone)]
pub struct ExtendedCommand {
    /// Script queued by the booted system for the next recovery start.
    pub script: PathBuf,
    /// Directory the script is moved to before it runs.
    pub staging_dir: PathBuf,
    /// Marker the booted system leaves while a scripted run is pending.
    pub checkpoint_marker: PathBuf,
    pub media_root: PathBuf,
    /// How many one-second polls to wait for the media to mount.
    pub media_wait_secs: u32,
}

impl ExtendedCommand {
    pub fn is_pending(&self) -> bool {
        self.script.exists()
    }

    /// Move the pending script out of its queue location and return where it
    /// now lives.
    ///
    /// The original is removed first so a crash during evaluation does not
    /// replay the script on the next start. The checkpoint marker is removed
    /// once the media had its chance to come up. Returns `Ok(None)` when no
    /// script is pending.
    pub fn stage(
        &self,
        mounts: &dyn MountManager,
        reporter: &dyn Reporter,
    ) -> std::io::Result<Option<PathBuf>> {
        if !self.is_pending() {
            debug!(script = %self.script.display(), "No extended command pending");
            return Ok(None);
        }

        std::fs::create_dir_all(&self.staging_dir)?;
        let staged = self.staging_dir.join(basename(&self.script));
        std::fs::copy(&self.script, &staged)?;
        std::fs::remove_file(&self.script)?;
        info!(staged = %staged.display(), "Staged extended command");

        let mut mounted = false;
        for remaining in (1..=self.media_wait_secs).rev() {
            reporter.print(&format!("Waiting for media to mount ({}s)", remaining));
            if mounts.ensure_mounted(&self.media_root).is_ok() {
                reporter.print("Media mounted...");
                mounted = true;
                break;
            }
            thread::sleep(Duration::from_secs(1));
        }

        match std::fs::remove_file(&self.checkpoint_marker) {
            Ok(()) => debug!(marker = %self.checkpoint_marker.display(), "Removed checkpoint marker"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(marker = %self.checkpoint_marker.display(), error = %e, "Failed to remove checkpoint marker"),
        }

        if !mounted {
            reporter.print("Timed out waiting for media... continuing.");
        }

        Ok(Some(staged))
    }
}

/// The session log and where it is kept when a run fails.
#[derive(Debug, Clone)]
pub struct FailureLog {
    /// Log written during the run, usually in the staging directory.
    pub log: PathBuf,
    pub media_root: PathBuf,
}

impl FailureLog {
    pub fn destination(&self) -> PathBuf {
        self.media_root.join(MEDIA_DIR).join(basename(&self.log))
    }

    /// Copy the session log onto the media so it survives a reboot.
    ///
    /// Returns `Ok(None)` when the media cannot be mounted.
    pub fn preserve(
        &self,
        mounts: &dyn MountManager,
        reporter: &dyn Reporter,
    ) -> std::io::Result<Option<PathBuf>> {
        if let Err(e) = mounts.ensure_mounted(&self.media_root) {
            warn!(media = %self.media_root.display(), error = %e, "Media unavailable, log not copied");
            return Ok(None);
        }

        let dest = self.destination();
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(&self.log, &dest)?;
        reporter.print(&format!(
            "{} was copied to {}.",
            self.log.display(),
            dest.display()
        ));
        Ok(Some(dest))
    }
}
