use std::path::{Path, PathBuf};

use partsnap::adapters::simulated::{Call, RecordingReporter, SimulatedDevice};
use partsnap::config::AppConfig;
use partsnap::context::RunOptions;
use partsnap::core::{
    Advisory, BackupOrchestrator, PartitionSelection, RestoreOrchestrator, SkipReason, Strategy,
    StepOutcome, Volume,
};
use partsnap::error::{Error, Operation};
use tempfile::{TempDir, tempdir};

const BY_NAME: &str = "/dev/block/by-name";

struct Fixture {
    temp: TempDir,
    media: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let temp = tempdir().unwrap();
        let media = temp.path().join("sdcard");
        std::fs::create_dir_all(&media).unwrap();
        Self { temp, media }
    }

    fn options(&self) -> RunOptions {
        RunOptions {
            media_root: self.media.clone(),
            by_name_dir: PathBuf::from(BY_NAME),
            hide_progress: false,
            hide_progress_marker: None,
            min_free_mb: 0,
            device_serial: "HT9CSP800312".to_string(),
            sync: false,
        }
    }

    /// The volume set most devices ship: raw boot and recovery, tree system,
    /// data and cache, and the removable media.
    fn volumes(&self) -> Vec<Volume> {
        vec![
            Volume::new("/boot", "mtd", "boot"),
            Volume::new("/recovery", "mtd", "recovery"),
            Volume::new("/system", "yaffs2", "/dev/block/mtdblock3"),
            Volume::new("/data", "yaffs2", "/dev/block/mtdblock5"),
            Volume::new("/cache", "yaffs2", "/dev/block/mtdblock4"),
            Volume::new(&self.media, "vfat", "/dev/block/mmcblk0p1"),
        ]
    }

    /// A device node that exists, for partitions that need one.
    fn device_node(&self, name: &str) -> String {
        let path = self.temp.path().join(name);
        std::fs::write(&path, b"").unwrap();
        path.to_string_lossy().into_owned()
    }

    fn backup_dir(&self) -> PathBuf {
        self.temp.path().join("sdcard/partsnap/backup/2024-01-01.00.00.00")
    }

    /// A backup set containing the given artifacts.
    fn backup_set(&self, files: &[&str]) -> PathBuf {
        let dir = self.backup_dir();
        std::fs::create_dir_all(&dir).unwrap();
        for file in files {
            std::fs::write(dir.join(file), file.as_bytes()).unwrap();
        }
        dir
    }
}

fn image(dir: &Path, name: &str) -> PathBuf {
    dir.join(name)
}

#[test]
fn backup_visits_partitions_in_order() {
    let fx = Fixture::new();
    let device = SimulatedDevice::new(fx.volumes());
    let reporter = RecordingReporter::default();
    let target = fx.backup_dir();

    let report = BackupOrchestrator::new(device.backends(&reporter), fx.options())
        .backup(&target)
        .unwrap();

    assert_eq!(
        device.calls(),
        vec![
            Call::Mount(fx.media.clone()),
            Call::Dump {
                device: PathBuf::from(BY_NAME).join("boot"),
                dest: image(&target, "boot.img"),
            },
            Call::Dump {
                device: PathBuf::from(BY_NAME).join("recovery"),
                dest: image(&target, "recovery.img"),
            },
            Call::Mount("/system".into()),
            Call::Archive {
                dir: "/system".into(),
                dest: image(&target, "system.img"),
            },
            Call::Unmount("/system".into()),
            Call::Mount("/data".into()),
            Call::Archive {
                dir: "/data".into(),
                dest: image(&target, "data.img"),
            },
            Call::Unmount("/data".into()),
            Call::Mount("/cache".into()),
            Call::Archive {
                dir: "/cache".into(),
                dest: image(&target, "cache.img"),
            },
            Call::Generate(target.clone()),
        ]
    );

    assert_eq!(
        report.completed(),
        vec!["boot", "recovery", "system", "data", "cache"]
    );
    assert_eq!(
        report.skipped(),
        vec![
            ("wimax", SkipReason::NotRegistered),
            ("datadata", SkipReason::NotRegistered),
            (".android_secure", SkipReason::DirectoryMissing),
            ("sd-ext", SkipReason::NotRegistered),
        ]
    );
    assert!(reporter.contains("Backed up system."));
    assert!(reporter.contains("No sd-ext found. Skipping backup of sd-ext."));
    assert_eq!(reporter.lines().last().unwrap(), "\nBackup complete!");
    assert!(!reporter.progress().is_empty());
}

#[test]
fn backup_archives_android_secure_from_media() {
    let fx = Fixture::new();
    std::fs::create_dir(fx.media.join(".android_secure")).unwrap();
    let device = SimulatedDevice::new(fx.volumes());
    let reporter = RecordingReporter::default();
    let target = fx.backup_dir();

    let report = BackupOrchestrator::new(device.backends(&reporter), fx.options())
        .backup(&target)
        .unwrap();

    assert!(report.completed().contains(&".android_secure"));
    assert!(device.calls().contains(&Call::Archive {
        dir: fx.media.join(".android_secure"),
        dest: image(&target, ".android_secure.img"),
    }));
    // The media stays mounted: it holds the backup set.
    assert!(!device.calls().contains(&Call::Unmount(fx.media.clone())));
}

#[test]
fn backup_stops_at_first_failure() {
    let fx = Fixture::new();
    let device = SimulatedDevice::new(fx.volumes());
    let reporter = RecordingReporter::default();
    let target = fx.backup_dir();
    device.fail_on(Call::Archive {
        dir: "/system".into(),
        dest: image(&target, "system.img"),
    });

    let err = BackupOrchestrator::new(device.backends(&reporter), fx.options())
        .backup(&target)
        .unwrap_err();

    match &err {
        Error::BackendFailure {
            partition,
            operation,
            ..
        } => {
            assert_eq!(partition, "system");
            assert_eq!(*operation, Operation::Archive);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.exit_status(), 1);

    let calls = device.calls();
    assert_eq!(calls.last().unwrap(), &Call::Unmount("/system".into()));
    assert!(!calls.contains(&Call::Mount("/data".into())));
    assert!(!calls.iter().any(|c| matches!(c, Call::Generate(_))));
    assert!(reporter.contains("Backup aborted: error while archiving system"));
    // Artifacts written before the failure are kept.
    assert!(target.join("boot.img").exists());
}

#[test]
fn unregistered_system_and_data_are_skipped() {
    let fx = Fixture::new();
    let volumes = fx
        .volumes()
        .into_iter()
        .filter(|v| v.mount_point != Path::new("/system") && v.mount_point != Path::new("/data"))
        .collect();
    let device = SimulatedDevice::new(volumes);
    let reporter = RecordingReporter::default();

    let report = BackupOrchestrator::new(device.backends(&reporter), fx.options())
        .backup(&fx.backup_dir())
        .unwrap();

    assert_eq!(report.completed(), vec!["boot", "recovery", "cache"]);
    assert!(report.skipped().contains(&("system", SkipReason::NotRegistered)));
    assert!(report.skipped().contains(&("data", SkipReason::NotRegistered)));
    assert!(!device.calls().contains(&Call::Mount("/system".into())));
}

#[test]
fn backup_requires_cache() {
    let fx = Fixture::new();
    let volumes = fx
        .volumes()
        .into_iter()
        .filter(|v| v.mount_point != Path::new("/cache"))
        .collect();
    let device = SimulatedDevice::new(volumes);
    let reporter = RecordingReporter::default();

    let err = BackupOrchestrator::new(device.backends(&reporter), fx.options())
        .backup(&fx.backup_dir())
        .unwrap_err();

    assert!(matches!(err, Error::MissingVolume(ref p) if p == Path::new("/cache")));
    assert!(!device.calls().iter().any(|c| matches!(c, Call::Generate(_))));
}

#[test]
fn backup_without_media_touches_nothing() {
    let fx = Fixture::new();
    let device = SimulatedDevice::new(fx.volumes());
    device.refuse_mount(fx.media.clone());
    let reporter = RecordingReporter::default();
    let target = fx.backup_dir();

    let err = BackupOrchestrator::new(device.backends(&reporter), fx.options())
        .backup(&target)
        .unwrap_err();

    assert!(matches!(err, Error::MediaUnavailable(_)));
    assert_eq!(device.calls(), vec![Call::Mount(fx.media.clone())]);
    assert!(!target.exists());
}

#[test]
fn low_space_warns_but_continues() {
    let fx = Fixture::new();
    let device = SimulatedDevice::new(fx.volumes());
    let reporter = RecordingReporter::default();
    let options = RunOptions {
        min_free_mb: u64::MAX,
        ..fx.options()
    };

    let report = BackupOrchestrator::new(device.backends(&reporter), options)
        .backup(&fx.backup_dir())
        .unwrap();

    assert!(matches!(
        report.advisories.as_slice(),
        [Advisory::SpaceWarning { threshold_mb: u64::MAX, .. }]
    ));
    assert!(reporter.contains("There may not be enough free space"));
    assert!(reporter.contains("Free space on media: "));
}

#[test]
fn unmountable_sd_ext_is_skipped() {
    let fx = Fixture::new();
    let mut volumes = fx.volumes();
    volumes.push(Volume::new("/sd-ext", "ext4", &fx.device_node("mmcblk0p2")));
    let device = SimulatedDevice::new(volumes);
    device.refuse_mount("/sd-ext");
    let reporter = RecordingReporter::default();

    let report = BackupOrchestrator::new(device.backends(&reporter), fx.options())
        .backup(&fx.backup_dir())
        .unwrap();

    assert!(report.skipped().contains(&("sd-ext", SkipReason::Unmountable)));
    assert!(reporter.contains("Could not mount sd-ext."));
    assert!(!device.calls().iter().any(|c| matches!(c, Call::Archive { dir, .. } if dir == Path::new("/sd-ext"))));
}

#[test]
fn sd_ext_without_device_node_is_skipped() {
    let fx = Fixture::new();
    let mut volumes = fx.volumes();
    volumes.push(Volume::new("/sd-ext", "ext4", "/nonexistent/mmcblk0p2"));
    let device = SimulatedDevice::new(volumes);
    let reporter = RecordingReporter::default();

    let report = BackupOrchestrator::new(device.backends(&reporter), fx.options())
        .backup(&fx.backup_dir())
        .unwrap();

    assert!(report.skipped().contains(&("sd-ext", SkipReason::DeviceMissing)));
    assert!(!device.calls().contains(&Call::Mount("/sd-ext".into())));
}

#[test]
fn wimax_image_carries_device_serial() {
    let fx = Fixture::new();
    let mut volumes = fx.volumes();
    let node = fx.device_node("wimax");
    volumes.push(Volume::new("/wimax", "yaffs2", &node));
    let device = SimulatedDevice::new(volumes);
    let reporter = RecordingReporter::default();
    let target = fx.backup_dir();

    let report = BackupOrchestrator::new(device.backends(&reporter), fx.options())
        .backup(&target)
        .unwrap();

    // Forced raw even though the volume carries a tree filesystem.
    assert!(report.steps.iter().any(|s| s.partition == "wimax"
        && s.outcome == StepOutcome::Completed(Strategy::Raw)));
    assert!(device.calls().contains(&Call::Dump {
        device: PathBuf::from(node),
        dest: image(&target, "wimax.HT9CSP800312.img"),
    }));
}

#[test]
fn hidden_progress_reports_no_entries() {
    let fx = Fixture::new();
    let device = SimulatedDevice::new(fx.volumes());
    let reporter = RecordingReporter::default();
    let options = RunOptions {
        hide_progress: true,
        ..fx.options()
    };

    BackupOrchestrator::new(device.backends(&reporter), options)
        .backup(&fx.backup_dir())
        .unwrap();

    assert!(reporter.progress().is_empty());
    assert!(!reporter.contains("entry-0"));
}

#[test]
fn progress_marker_is_checked_once_media_is_up() {
    let fx = Fixture::new();
    let device = SimulatedDevice::new(fx.volumes());
    let reporter = RecordingReporter::default();
    let config = AppConfig {
        media_root: fx.media.clone(),
        ..AppConfig::default()
    };
    let options = RunOptions {
        sync: false,
        min_free_mb: 0,
        by_name_dir: PathBuf::from(BY_NAME),
        ..RunOptions::from_config(&config)
    };
    assert!(!options.progress_hidden());

    // The marker only becomes visible after the options were built, the way
    // it appears once the media is mounted.
    let marker = fx.media.join("partsnap/.hideprogress");
    std::fs::create_dir_all(marker.parent().unwrap()).unwrap();
    std::fs::write(&marker, b"").unwrap();

    BackupOrchestrator::new(device.backends(&reporter), options)
        .backup(&fx.backup_dir())
        .unwrap();

    assert!(reporter.progress().is_empty());
    assert!(!reporter.contains("entry-0"));
}

#[test]
fn failed_verification_blocks_every_write() {
    let fx = Fixture::new();
    let source = fx.backup_set(&["boot.img", "system.img", "data.img", "cache.img"]);
    let device = SimulatedDevice::new(fx.volumes());
    device.fail_on(Call::Verify(source.clone()));
    let reporter = RecordingReporter::default();

    let err = RestoreOrchestrator::new(device.backends(&reporter), fx.options())
        .restore(&source, PartitionSelection::all())
        .unwrap_err();

    assert!(matches!(err, Error::IntegrityError { .. }));
    assert_eq!(err.exit_status(), 1);
    assert!(!device.calls().iter().any(Call::is_mutating));
    assert!(reporter.contains("Checking checksums..."));
    assert!(reporter.contains("Restore aborted: checksum verification failed"));
}

#[test]
fn restore_only_touches_selected_partitions() {
    let fx = Fixture::new();
    let source = fx.backup_set(&["boot.img", "system.img", "data.img", "cache.img"]);
    let device = SimulatedDevice::new(fx.volumes());
    let reporter = RecordingReporter::default();
    let selection = PartitionSelection {
        system: true,
        ..PartitionSelection::default()
    };

    let report = RestoreOrchestrator::new(device.backends(&reporter), fx.options())
        .restore(&source, selection)
        .unwrap();

    assert_eq!(
        device.calls(),
        vec![
            Call::Mount(fx.media.clone()),
            Call::Verify(source.clone()),
            Call::Format("/system".into()),
            Call::Mount("/system".into()),
            Call::Unarchive {
                src: source.join("system.img"),
                dir: "/system".into(),
            },
            Call::Unmount("/system".into()),
        ]
    );
    assert_eq!(report.completed(), vec!["system"]);
    assert_eq!(reporter.indeterminate_count(), 1);
    assert_eq!(reporter.lines().last().unwrap(), "\nRestore complete!");
}

#[test]
fn restore_writes_raw_images_after_erasing() {
    let fx = Fixture::new();
    let source = fx.backup_set(&["boot.img"]);
    let device = SimulatedDevice::new(fx.volumes());
    let reporter = RecordingReporter::default();
    let selection = PartitionSelection {
        boot: true,
        ..PartitionSelection::default()
    };

    RestoreOrchestrator::new(device.backends(&reporter), fx.options())
        .restore(&source, selection)
        .unwrap();

    let calls = device.calls();
    assert_eq!(
        &calls[2..],
        &[
            Call::Format("/boot".into()),
            Call::RestoreImage {
                device: PathBuf::from(BY_NAME).join("boot"),
                src: source.join("boot.img"),
            },
        ]
    );
    assert!(reporter.contains("Erasing boot before restore..."));
    assert!(reporter.contains("Restored boot."));
}

#[test]
fn missing_raw_image_fails_before_erasing() {
    let fx = Fixture::new();
    let source = fx.backup_set(&["system.img", "data.img", "cache.img"]);
    let device = SimulatedDevice::new(fx.volumes());
    let reporter = RecordingReporter::default();

    let err = RestoreOrchestrator::new(device.backends(&reporter), fx.options())
        .restore(&source, PartitionSelection::standard())
        .unwrap_err();

    match &err {
        Error::BackendFailure {
            partition,
            operation,
            source,
        } => {
            assert_eq!(partition, "boot");
            assert_eq!(*operation, Operation::RestoreImage);
            assert_eq!(source.status, libc::ENOENT);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.exit_status(), libc::ENOENT);
    assert!(!device.calls().iter().any(Call::is_mutating));
}

#[test]
fn missing_tree_archive_is_skipped() {
    let fx = Fixture::new();
    let source = fx.backup_set(&["boot.img", "system.img", "cache.img"]);
    let device = SimulatedDevice::new(fx.volumes());
    let reporter = RecordingReporter::default();
    let selection = PartitionSelection {
        data: true,
        cache: true,
        ..PartitionSelection::default()
    };

    let report = RestoreOrchestrator::new(device.backends(&reporter), fx.options())
        .restore(&source, selection)
        .unwrap();

    assert!(report.skipped().contains(&("data", SkipReason::ArtifactMissing)));
    assert!(report.skipped().contains(&("datadata", SkipReason::NotRegistered)));
    assert!(report.skipped().contains(&(".android_secure", SkipReason::ArtifactMissing)));
    assert_eq!(report.completed(), vec!["cache"]);
    assert!(reporter.contains("data.img not found. Skipping restore of /data."));
    assert!(!device.calls().contains(&Call::Format("/data".into())));
}

#[test]
fn missing_wimax_image_only_warns() {
    let fx = Fixture::new();
    let source = fx.backup_set(&["boot.img", "system.img", "data.img", "cache.img"]);
    let mut volumes = fx.volumes();
    volumes.push(Volume::new("/wimax", "mtd", &fx.device_node("wimax")));
    let device = SimulatedDevice::new(volumes);
    let reporter = RecordingReporter::default();

    let report = RestoreOrchestrator::new(device.backends(&reporter), fx.options())
        .restore(&source, PartitionSelection::all())
        .unwrap();

    assert!(reporter.contains("WARNING: WiMAX partition exists"));
    assert!(report.skipped().contains(&("wimax", SkipReason::ArtifactMissing)));
    assert_eq!(
        report.advisories,
        vec![Advisory::MissingImage {
            partition: "wimax",
            path: source.join("wimax.HT9CSP800312.img"),
        }]
    );
    assert!(!device.calls().contains(&Call::Format("/wimax".into())));
    assert!(report.completed().contains(&"cache"));
}

#[test]
fn standard_restore_leaves_wimax_alone() {
    let fx = Fixture::new();
    let source = fx.backup_set(&[
        "boot.img",
        "system.img",
        "data.img",
        "cache.img",
        "wimax.HT9CSP800312.img",
    ]);
    let mut volumes = fx.volumes();
    volumes.push(Volume::new("/wimax", "mtd", &fx.device_node("wimax")));
    let device = SimulatedDevice::new(volumes);
    let reporter = RecordingReporter::default();

    let report = RestoreOrchestrator::new(device.backends(&reporter), fx.options())
        .restore(&source, PartitionSelection::standard())
        .unwrap();

    assert!(!report.steps.iter().any(|s| s.partition == "wimax"));
    assert!(!device.calls().contains(&Call::Format("/wimax".into())));
}

#[test]
fn restore_after_backup_reuses_mounts() {
    let fx = Fixture::new();
    let device = SimulatedDevice::new(fx.volumes());
    let reporter = RecordingReporter::default();
    let target = fx.backup_dir();

    BackupOrchestrator::new(device.backends(&reporter), fx.options())
        .backup(&target)
        .unwrap();
    device.clear_calls();

    let report = RestoreOrchestrator::new(device.backends(&reporter), fx.options())
        .restore(&target, PartitionSelection::standard())
        .unwrap();

    let calls = device.calls();
    // Media and cache were left mounted by the backup.
    assert!(!calls.contains(&Call::Mount(fx.media.clone())));
    assert!(!calls.contains(&Call::Mount("/cache".into())));
    assert_eq!(calls[0], Call::Verify(target.clone()));
    assert_eq!(
        report.completed(),
        vec!["boot", "system", "data", "cache"]
    );
}

#[test]
fn restore_stops_at_first_failure() {
    let fx = Fixture::new();
    let source = fx.backup_set(&["boot.img", "system.img", "data.img", "cache.img"]);
    let device = SimulatedDevice::new(fx.volumes());
    device.fail_on(Call::Format("/system".into()));
    let reporter = RecordingReporter::default();

    let err = RestoreOrchestrator::new(device.backends(&reporter), fx.options())
        .restore(&source, PartitionSelection::standard())
        .unwrap_err();

    assert!(matches!(
        err,
        Error::BackendFailure { operation: Operation::Format, ref partition, .. } if partition == "system"
    ));
    let calls = device.calls();
    assert_eq!(calls.last().unwrap(), &Call::Format("/system".into()));
    assert!(calls.iter().any(|c| matches!(c, Call::RestoreImage { .. })));
    assert!(!calls.contains(&Call::Format("/data".into())));
}
