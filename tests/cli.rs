//! The `partsnap` binary: usage errors and exit statuses.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use partsnap::adapters::Blake3Manifest;
use partsnap::core::ChecksumTool;
use tempfile::tempdir;

fn partsnap(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_partsnap"))
        .args(args)
        .output()
        .unwrap()
}

fn assert_usage(output: &Output) {
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Usage: partsnap backup"), "stderr: {stderr}");
    assert!(stderr.contains("Usage: partsnap restore <directory>"), "stderr: {stderr}");
}

#[test]
fn no_arguments_prints_usage() {
    assert_usage(&partsnap(&[]));
}

#[test]
fn restore_needs_a_directory() {
    assert_usage(&partsnap(&["restore"]));
}

#[test]
fn unknown_command_prints_usage() {
    assert_usage(&partsnap(&["frobnicate"]));
}

/// A device whose media is an always-mounted ramdisk and whose only other
/// volume is a raw boot partition.
fn device(root: &Path) -> Command {
    let media = root.join("sdcard");
    let table = root.join("recovery.fstab");
    fs::create_dir_all(&media).unwrap();
    fs::create_dir_all(root.join("tmp")).unwrap();
    fs::write(root.join("mounts"), "").unwrap();
    fs::write(
        &table,
        format!("{} ramdisk /dev/null\n/boot mtd boot\n", media.display()),
    )
    .unwrap();

    let mut command = Command::new(env!("CARGO_BIN_EXE_partsnap"));
    command
        .arg("--config")
        .arg(root.join("absent.toml"))
        .env("PARTSNAP_MEDIA_ROOT", &media)
        .env("PARTSNAP_VOLUME_TABLE", &table)
        .env("PARTSNAP_MOUNTS_FILE", root.join("mounts"))
        .env("PARTSNAP_BY_NAME_DIR", root.join("by-name"))
        .env("PARTSNAP_EXTENDED_COMMAND", root.join("extendedcommand"))
        .env("PARTSNAP_STAGING_DIR", root.join("tmp"));
    command
}

#[test]
fn backend_status_becomes_exit_status() {
    let temp = tempdir().unwrap();
    let set = temp.path().join("sdcard/partsnap/backup/2024-03-09.12.00.00");
    fs::create_dir_all(&set).unwrap();
    fs::write(set.join("system.img"), b"tree").unwrap();
    Blake3Manifest.generate(&set).unwrap();

    let output = device(temp.path())
        .arg("restore")
        .arg(&set)
        .output()
        .unwrap();

    // boot.img is missing from the set: ENOENT from the boot step.
    assert_eq!(output.status.code(), Some(2));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Restore aborted"), "stdout: {stdout}");

    let copied = temp.path().join("sdcard/partsnap/partsnap.log");
    assert!(copied.exists());
    assert!(fs::read_to_string(copied).unwrap().contains("Restore aborted"));
}

#[test]
fn tampered_set_exits_with_failure() {
    let temp = tempdir().unwrap();
    let set = temp.path().join("sdcard/partsnap/backup/2024-03-09.12.00.00");
    fs::create_dir_all(&set).unwrap();
    fs::write(set.join("boot.img"), b"kernel").unwrap();
    Blake3Manifest.generate(&set).unwrap();
    fs::write(set.join("boot.img"), b"kernel, patched").unwrap();

    let output = device(temp.path())
        .arg("restore")
        .arg(&set)
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Checking checksums..."), "stdout: {stdout}");
}
