use std::path::Path;

use tracing::{error, info, warn};

use crate::context::{Backends, RunOptions};
use crate::core::classify::Strategy;
use crate::core::orchestrator::{
    Advisory, Phase, Report, Resolved, SkipReason, Target, TreeDirection, flush, release, resolve,
    run_tree,
};
use crate::core::partitions::{MissingImage, PARTITIONS, PartitionSelection, PartitionSpec};
use crate::error::{BackendError, Error, Operation, Result};

/// Restores a caller-selected subset of partitions from one backup set.
pub struct RestoreOrchestrator<'a> {
    backends: Backends<'a>,
    options: RunOptions,
}

impl<'a> RestoreOrchestrator<'a> {
    pub fn new(backends: Backends<'a>, options: RunOptions) -> Self {
        Self { backends, options }
    }

    /// Restore the partitions `selection` names from the backup set at `source`.
    ///
    /// The manifest is verified before anything is touched. After that, the
    /// first failing step aborts the run; partitions already restored stay
    /// restored.
    pub fn restore(&self, source: &Path, selection: PartitionSelection) -> Result<Report> {
        info!(source = %source.display(), ?selection, "Starting restore");
        let result = self.run(source, selection);
        if let Err(e) = &result {
            error!(error = %e, "Restore aborted");
            self.backends.reporter.print(&format!("Restore aborted: {}", e));
        }
        result
    }

    fn run(&self, source: &Path, selection: PartitionSelection) -> Result<Report> {
        let reporter = self.backends.reporter;
        let media = &self.options.media_root;
        reporter.set_indeterminate();

        if let Err(e) = self.backends.mounts.ensure_mounted(media) {
            warn!(media = %media.display(), error = %e, "Removable media unavailable");
            return Err(Error::MediaUnavailable(media.clone()));
        }

        reporter.print("Checking checksums...");
        self.backends
            .checksum
            .verify(source)
            .map_err(|e| Error::IntegrityError {
                dir: source.to_path_buf(),
                reason: e.message,
            })?;

        let mut report = Report::new(source);
        for spec in PARTITIONS {
            let Some(flag) = spec.restore_flag else {
                continue;
            };
            if selection.is_selected(flag) {
                self.restore_partition(spec, source, &mut report)?;
            }
        }

        flush(&self.options);
        reporter.reset_progress();
        reporter.print("\nRestore complete!");
        info!(
            source = %source.display(),
            partitions = report.completed().len(),
            "Restore complete"
        );
        Ok(report)
    }

    fn restore_partition(
        &self,
        spec: &PartitionSpec,
        source: &Path,
        report: &mut Report,
    ) -> Result<()> {
        let target = match resolve(spec, &self.backends, &self.options, Phase::Restore)? {
            Resolved::Present(target) => target,
            Resolved::Skip(reason) => {
                info!(partition = spec.name, ?reason, "Skipping partition");
                report.skip(spec.name, reason);
                return Ok(());
            }
        };

        let image = source.join(
            spec.image_file_name(&self.options.media_root, &self.options.device_serial),
        );
        info!(
            partition = spec.name,
            strategy = target.strategy.as_str(),
            image = %image.display(),
            "Restoring partition"
        );

        let restored = match target.strategy {
            Strategy::Raw => self.write_image(spec, &target, &image, report)?,
            Strategy::Tree => self.extract(spec, &target, &image)?,
        };

        if restored {
            self.backends
                .reporter
                .print(&format!("Restored {}.", spec.name));
            report.complete(spec.name, target.strategy);
        } else {
            report.skip(spec.name, SkipReason::ArtifactMissing);
        }
        Ok(())
    }

    /// Raw restore. A missing image fails the run unless the partition is
    /// marked warn-only. Returns whether anything was written.
    fn write_image(
        &self,
        spec: &PartitionSpec,
        target: &Target<'_>,
        image: &Path,
        report: &mut Report,
    ) -> Result<bool> {
        let reporter = self.backends.reporter;
        let volume = target.raw_volume()?;

        if !image.exists() {
            match spec.missing_image {
                MissingImage::Warn(message) => {
                    warn!(partition = spec.name, image = %image.display(), "Image missing from backup set");
                    reporter.print(message);
                    report.advisories.push(Advisory::MissingImage {
                        partition: spec.name,
                        path: image.to_path_buf(),
                    });
                    return Ok(false);
                }
                MissingImage::Fail => {
                    return Err(Error::backend(
                        spec.name,
                        Operation::RestoreImage,
                        BackendError::with_status(
                            libc::ENOENT,
                            format!("{} not found", image.display()),
                        ),
                    ));
                }
            }
        }

        reporter.print(&format!("Erasing {} before restore...", spec.name));
        self.backends
            .format
            .format(&target.path)
            .map_err(|e| Error::backend(spec.name, Operation::Format, e))?;

        reporter.print(&format!("Restoring {} image...", spec.name));
        let device = volume.resolve_device(&self.options.by_name_dir);
        self.backends
            .raw
            .restore(&device, image)
            .map_err(|e| Error::backend(spec.name, Operation::RestoreImage, e))?;

        Ok(true)
    }

    /// Tree restore. A missing archive is skipped with a message. Returns
    /// whether anything was written.
    fn extract(&self, spec: &PartitionSpec, target: &Target<'_>, archive: &Path) -> Result<bool> {
        let reporter = self.backends.reporter;

        if !archive.exists() {
            reporter.print(&format!(
                "{} not found. Skipping restore of {}.",
                archive.file_name().unwrap_or_default().to_string_lossy(),
                target.path.display()
            ));
            return Ok(false);
        }

        if let Err(e) = std::fs::create_dir_all(&target.path) {
            warn!(path = %target.path.display(), error = %e, "Failed to create mount point");
        }

        reporter.print(&format!("Restoring {}...", spec.name));
        self.backends
            .format
            .format(&target.path)
            .map_err(|e| Error::backend(spec.name, Operation::Format, e))?;

        self.backends
            .mounts
            .ensure_mounted(&target.path)
            .map_err(|e| Error::backend(spec.name, Operation::Mount, e))?;

        run_tree(
            self.backends.tree,
            reporter,
            self.options.progress_hidden(),
            &target.path,
            TreeDirection::Extract(archive),
        )
        .map_err(|e| Error::backend(spec.name, Operation::Unarchive, e))?;

        if spec.unmount_after {
            release(&self.backends, spec.name, &target.path);
        }

        Ok(true)
    }
}
