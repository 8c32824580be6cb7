use std::path::Path;

use tracing::{error, info, warn};

use crate::context::{Backends, RunOptions};
use crate::core::classify::Strategy;
use crate::core::orchestrator::{
    Advisory, Phase, Report, Resolved, SkipReason, Target, TreeDirection, flush, release, resolve,
    run_tree,
};
use crate::core::partitions::{PARTITIONS, PartitionSpec};
use crate::error::{Error, Operation, Result};

/// Backs up every partition in [`PARTITIONS`] into one backup set.
pub struct BackupOrchestrator<'a> {
    backends: Backends<'a>,
    options: RunOptions,
}

impl<'a> BackupOrchestrator<'a> {
    pub fn new(backends: Backends<'a>, options: RunOptions) -> Self {
        Self { backends, options }
    }

    /// Back up into `target`, creating it if needed.
    ///
    /// Stops at the first failing step and returns its error unchanged.
    /// Artifacts written before the failure are left in place.
    pub fn backup(&self, target: &Path) -> Result<Report> {
        info!(target = %target.display(), "Starting backup");
        let result = self.run(target);
        if let Err(e) = &result {
            error!(error = %e, "Backup aborted");
            self.backends.reporter.print(&format!("Backup aborted: {}", e));
        }
        result
    }

    fn run(&self, target: &Path) -> Result<Report> {
        let reporter = self.backends.reporter;
        let media = &self.options.media_root;

        if let Err(e) = self.backends.mounts.ensure_mounted(media) {
            warn!(media = %media.display(), error = %e, "Removable media unavailable");
            return Err(Error::MediaUnavailable(media.clone()));
        }

        let mut report = Report::new(target);
        self.check_free_space(&mut report)?;

        std::fs::create_dir_all(target).map_err(|source| Error::Io {
            path: target.to_path_buf(),
            source,
        })?;

        for spec in PARTITIONS {
            self.backup_partition(spec, target, &mut report)?;
        }

        reporter.print("Generating checksums...");
        self.backends
            .checksum
            .generate(target)
            .map_err(|e| Error::backend("backup set", Operation::Checksum, e))?;

        flush(&self.options);
        reporter.reset_progress();
        reporter.print("\nBackup complete!");
        info!(
            target = %target.display(),
            partitions = report.completed().len(),
            "Backup complete"
        );
        Ok(report)
    }

    fn check_free_space(&self, report: &mut Report) -> Result<()> {
        let media = &self.options.media_root;
        let stats = nix::sys::statvfs::statvfs(media.as_path()).map_err(|e| {
            warn!(media = %media.display(), error = %e, "Unable to stat removable media");
            Error::MediaUnavailable(media.clone())
        })?;

        let free_bytes = stats.blocks_available() as u64 * stats.fragment_size() as u64;
        let free_mb = free_bytes / (1024 * 1024);
        self.backends
            .reporter
            .print(&format!("Free space on media: {}MB", free_mb));

        if free_mb < self.options.min_free_mb {
            warn!(free_mb, threshold_mb = self.options.min_free_mb, "Low free space");
            self.backends.reporter.print(
                "There may not be enough free space to complete the backup... continuing...",
            );
            report.advisories.push(Advisory::SpaceWarning {
                free_mb,
                threshold_mb: self.options.min_free_mb,
            });
        }
        Ok(())
    }

    fn backup_partition(
        &self,
        spec: &PartitionSpec,
        target_dir: &Path,
        report: &mut Report,
    ) -> Result<()> {
        let reporter = self.backends.reporter;

        let target = match resolve(spec, &self.backends, &self.options, Phase::Backup)? {
            Resolved::Present(target) => target,
            Resolved::Skip(reason) => {
                if let Some(message) = spec.skip_message {
                    reporter.print(message);
                }
                info!(partition = spec.name, ?reason, "Skipping partition");
                report.skip(spec.name, reason);
                return Ok(());
            }
        };

        if spec.probe_mount && self.backends.mounts.ensure_mounted(&target.path).is_err() {
            if let Some(message) = spec.unmountable_message {
                reporter.print(message);
            }
            info!(partition = spec.name, "Skipping unmountable partition");
            report.skip(spec.name, SkipReason::Unmountable);
            return Ok(());
        }

        let dest = target_dir.join(
            spec.image_file_name(&self.options.media_root, &self.options.device_serial),
        );
        info!(
            partition = spec.name,
            strategy = target.strategy.as_str(),
            dest = %dest.display(),
            "Backing up partition"
        );

        match target.strategy {
            Strategy::Raw => self.dump(spec, &target, &dest)?,
            Strategy::Tree => self.archive(spec, &target, &dest)?,
        }

        reporter.print(&format!("Backed up {}.", spec.name));
        report.complete(spec.name, target.strategy);
        Ok(())
    }

    fn dump(&self, spec: &PartitionSpec, target: &Target<'_>, dest: &Path) -> Result<()> {
        let volume = target.raw_volume()?;
        let device = volume.resolve_device(&self.options.by_name_dir);

        self.backends
            .reporter
            .print(&format!("Backing up {} image...", spec.name));
        self.backends
            .raw
            .dump(&device, dest)
            .map_err(|e| Error::backend(spec.name, Operation::Dump, e))
    }

    fn archive(&self, spec: &PartitionSpec, target: &Target<'_>, dest: &Path) -> Result<()> {
        let reporter = self.backends.reporter;
        reporter.print(&format!("Backing up {}...", spec.name));

        self.backends
            .mounts
            .ensure_mounted(&target.path)
            .map_err(|e| Error::backend(spec.name, Operation::Mount, e))?;

        let result = run_tree(
            self.backends.tree,
            reporter,
            self.options.progress_hidden(),
            &target.path,
            TreeDirection::Archive(dest),
        );

        if spec.unmount_after {
            release(&self.backends, spec.name, &target.path);
        }

        result.map_err(|e| Error::backend(spec.name, Operation::Archive, e))
    }
}
