//! File-level archive of a mounted partition.
//!
//! Layout: an 8 byte magic, then one record per entry. A record is a
//! little-endian `u32` header length, the JSON encoded [`EntryHeader`], and for
//! regular files exactly `size` bytes of content. Directories precede their
//! children, so extraction is a single forward pass. Paths are stored as raw
//! bytes because Linux file names need not be valid UTF-8.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Write};
use std::os::unix::fs::{MetadataExt, PermissionsExt, symlink};
use std::path::{Component, Path, PathBuf};

use filetime::FileTime;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::adapters::raw_image::BUFFER_SIZE;
use crate::core::backends::{BackendResult, ProgressCallback, TreeArchiveBackend};
use crate::error::BackendError;

const MAGIC: &[u8; 8] = b"PSTREE1\n";

/// Headers larger than this are treated as corruption.
const MAX_HEADER_LEN: u32 = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum EntryKind {
    Dir,
    File,
    Symlink,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EntryHeader {
    #[serde(with = "raw_path")]
    path: PathBuf,
    kind: EntryKind,
    mode: u32,
    mtime: i64,
    mtime_nanos: u32,
    #[serde(default)]
    size: u64,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "raw_path::option"
    )]
    target: Option<PathBuf>,
}

mod raw_path {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;
    use std::path::{Path, PathBuf};

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(path: &Path, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(path.as_os_str().as_bytes())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<PathBuf, D::Error> {
        let bytes = Vec::<u8>::deserialize(deserializer)?;
        Ok(PathBuf::from(OsStr::from_bytes(&bytes)))
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(
            path: &Option<PathBuf>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match path {
                Some(path) => serializer.serialize_some(path.as_os_str().as_bytes()),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<PathBuf>, D::Error> {
            let bytes = Option::<Vec<u8>>::deserialize(deserializer)?;
            Ok(bytes.map(|b| PathBuf::from(OsStr::from_bytes(&b))))
        }
    }
}

#[derive(Debug, Default)]
pub struct TreeArchive;

impl TreeArchiveBackend for TreeArchive {
    fn archive(
        &self,
        dir: &Path,
        dest: &Path,
        mut progress: Option<ProgressCallback<'_>>,
    ) -> BackendResult {
        let entries = scan(dir, dest)?;
        let file = File::create(dest).map_err(|e| BackendError::io(dest.display(), e))?;
        let mut writer = BufWriter::with_capacity(BUFFER_SIZE, file);
        writer.write_all(MAGIC)?;

        for (absolute, header) in &entries {
            write_header(&mut writer, header)?;
            if header.kind == EntryKind::File {
                let source =
                    File::open(absolute).map_err(|e| BackendError::io(absolute.display(), e))?;
                let copied = io::copy(&mut source.take(header.size), &mut writer)?;
                if copied != header.size {
                    return Err(BackendError::with_status(
                        libc::EIO,
                        format!("{} changed size while archiving", absolute.display()),
                    ));
                }
            }
            if let Some(callback) = progress.as_mut() {
                callback(absolute);
            }
        }

        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        info!(dir = %dir.display(), dest = %dest.display(), entries = entries.len(), "Archived tree");
        Ok(())
    }

    fn unarchive(
        &self,
        src: &Path,
        dir: &Path,
        mut progress: Option<ProgressCallback<'_>>,
    ) -> BackendResult {
        let file = File::open(src).map_err(|e| BackendError::io(src.display(), e))?;
        let mut reader = BufReader::with_capacity(BUFFER_SIZE, file);

        let mut magic = [0u8; 8];
        reader.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(corrupt(src, "not a tree archive"));
        }

        // Directory times are applied last; writing children would bump them.
        let mut directories: Vec<(PathBuf, EntryHeader)> = Vec::new();
        let mut count = 0usize;

        while let Some(header) = read_header(&mut reader, src)? {
            let relative = safe_relative(&header.path).ok_or_else(|| {
                corrupt(src, &format!("unsafe entry path {}", header.path.display()))
            })?;
            let target = dir.join(relative);

            match header.kind {
                EntryKind::Dir => {
                    fs::create_dir_all(&target)
                        .map_err(|e| BackendError::io(target.display(), e))?;
                    fs::set_permissions(&target, fs::Permissions::from_mode(header.mode))?;
                    directories.push((target.clone(), header));
                }
                EntryKind::File => {
                    extract_file(&mut reader, &target, &header, src)?;
                }
                EntryKind::Symlink => {
                    let link_target = header
                        .target
                        .as_ref()
                        .ok_or_else(|| corrupt(src, "symlink without target"))?;
                    if target.symlink_metadata().is_ok() {
                        fs::remove_file(&target)?;
                    }
                    symlink(link_target, &target)
                        .map_err(|e| BackendError::io(target.display(), e))?;
                    let mtime = FileTime::from_unix_time(header.mtime, header.mtime_nanos);
                    if let Err(e) = filetime::set_symlink_file_times(&target, mtime, mtime) {
                        debug!(path = %target.display(), error = %e, "Failed to set symlink times");
                    }
                }
            }

            count += 1;
            if let Some(callback) = progress.as_mut() {
                callback(&target);
            }
        }

        for (path, header) in directories.iter().rev() {
            let mtime = FileTime::from_unix_time(header.mtime, header.mtime_nanos);
            if let Err(e) = filetime::set_file_mtime(path, mtime) {
                debug!(path = %path.display(), error = %e, "Failed to set directory time");
            }
        }

        info!(src = %src.display(), dir = %dir.display(), entries = count, "Extracted tree");
        Ok(())
    }
}

/// Walk `root` depth first, parents before children. `skip` is never archived
/// (the archive being written may live inside the tree).
fn scan(root: &Path, skip: &Path) -> Result<Vec<(PathBuf, EntryHeader)>, BackendError> {
    let mut entries = Vec::new();
    scan_recursive(root, root, skip, &mut entries)?;
    Ok(entries)
}

fn scan_recursive(
    base: &Path,
    current: &Path,
    skip: &Path,
    entries: &mut Vec<(PathBuf, EntryHeader)>,
) -> Result<(), BackendError> {
    let mut children: Vec<_> = fs::read_dir(current)
        .map_err(|e| BackendError::io(format!("failed to read {}", current.display()), e))?
        .collect::<io::Result<_>>()?;
    children.sort_by_key(|entry| entry.file_name());

    for child in children {
        let path = child.path();
        if path == skip {
            continue;
        }
        let metadata = match path.symlink_metadata() {
            Ok(m) => m,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable entry");
                continue;
            }
        };

        let relative = path
            .strip_prefix(base)
            .map_err(|_| BackendError::new(format!("{} escaped {}", path.display(), base.display())))?
            .to_path_buf();
        let file_type = metadata.file_type();

        let (kind, size, target) = if file_type.is_dir() {
            (EntryKind::Dir, 0, None)
        } else if file_type.is_file() {
            (EntryKind::File, metadata.len(), None)
        } else if file_type.is_symlink() {
            (EntryKind::Symlink, 0, Some(fs::read_link(&path)?))
        } else {
            debug!(path = %path.display(), "Skipping special file");
            continue;
        };

        let header = EntryHeader {
            path: relative,
            kind,
            mode: metadata.mode() & 0o7777,
            mtime: metadata.mtime(),
            mtime_nanos: metadata.mtime_nsec() as u32,
            size,
            target,
        };
        entries.push((path.clone(), header));

        if kind == EntryKind::Dir {
            scan_recursive(base, &path, skip, entries)?;
        }
    }

    Ok(())
}

fn write_header(writer: &mut impl Write, header: &EntryHeader) -> Result<(), BackendError> {
    let encoded = serde_json::to_vec(header)
        .map_err(|e| BackendError::new(format!("failed to encode {}: {}", header.path.display(), e)))?;
    writer.write_all(&(encoded.len() as u32).to_le_bytes())?;
    writer.write_all(&encoded)?;
    Ok(())
}

/// Next header, or `None` at a clean end of archive.
fn read_header(reader: &mut impl Read, src: &Path) -> Result<Option<EntryHeader>, BackendError> {
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(len_bytes);
    if len > MAX_HEADER_LEN {
        return Err(corrupt(src, "oversized entry header"));
    }

    let mut encoded = vec![0u8; len as usize];
    reader
        .read_exact(&mut encoded)
        .map_err(|_| corrupt(src, "truncated entry header"))?;
    serde_json::from_slice(&encoded)
        .map(Some)
        .map_err(|e| corrupt(src, &format!("bad entry header: {}", e)))
}

fn extract_file(
    reader: &mut impl Read,
    target: &Path,
    header: &EntryHeader,
    src: &Path,
) -> Result<(), BackendError> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    if target.symlink_metadata().is_ok_and(|m| m.file_type().is_symlink()) {
        fs::remove_file(target)?;
    }

    let file = File::create(target).map_err(|e| BackendError::io(target.display(), e))?;
    let mut writer = BufWriter::with_capacity(BUFFER_SIZE, file);
    let copied = io::copy(&mut reader.take(header.size), &mut writer)?;
    if copied != header.size {
        return Err(corrupt(src, &format!("{} is truncated", header.path.display())));
    }
    writer.flush()?;
    drop(writer);

    fs::set_permissions(target, fs::Permissions::from_mode(header.mode))?;
    let mtime = FileTime::from_unix_time(header.mtime, header.mtime_nanos);
    if let Err(e) = filetime::set_file_times(target, mtime, mtime) {
        debug!(path = %target.display(), error = %e, "Failed to set file times");
    }
    Ok(())
}

/// Reject absolute paths and anything that climbs out of the extraction root.
fn safe_relative(path: &Path) -> Option<&Path> {
    let safe = path
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    (safe && !path.as_os_str().is_empty()).then_some(path)
}

fn corrupt(src: &Path, detail: &str) -> BackendError {
    BackendError::with_status(libc::EINVAL, format!("{}: {}", src.display(), detail))
}
