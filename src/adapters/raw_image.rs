use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;

use tracing::{debug, info};

use crate::core::backends::{BackendResult, RawImageBackend};
use crate::error::BackendError;

/// Buffer size for device I/O (128KB)
pub(crate) const BUFFER_SIZE: usize = 128 * 1024;

/// Streams whole block devices to and from image files.
pub struct BlockImage {
    /// Whether to fsync the written side once the copy completes.
    pub sync_writes: bool,
}

impl Default for BlockImage {
    fn default() -> Self {
        Self { sync_writes: true }
    }
}

impl RawImageBackend for BlockImage {
    fn dump(&self, device: &Path, dest: &Path) -> BackendResult {
        let source = File::open(device).map_err(|e| device_error("open", device, e))?;
        let output = File::create(dest).map_err(|e| BackendError::io(dest.display(), e))?;

        let bytes = stream(source, output, self.sync_writes, device)?;
        info!(device = %device.display(), dest = %dest.display(), bytes, "Dumped raw image");
        Ok(())
    }

    fn restore(&self, device: &Path, src: &Path) -> BackendResult {
        let input = File::open(src).map_err(|e| BackendError::io(src.display(), e))?;
        let target = OpenOptions::new()
            .write(true)
            .open(device)
            .map_err(|e| device_error("open", device, e))?;

        let bytes = stream(input, target, self.sync_writes, device)?;
        info!(device = %device.display(), src = %src.display(), bytes, "Restored raw image");
        Ok(())
    }
}

/// Copy everything from `reader` into `writer`, returning the byte count.
fn stream(reader: File, writer: File, sync: bool, device: &Path) -> Result<u64, BackendError> {
    let mut reader = BufReader::with_capacity(BUFFER_SIZE, reader);
    let mut writer = BufWriter::with_capacity(BUFFER_SIZE, writer);
    let mut buffer = vec![0u8; BUFFER_SIZE];
    let mut copied: u64 = 0;

    loop {
        let read = reader
            .read(&mut buffer)
            .map_err(|e| device_error("read", device, e))?;
        if read == 0 {
            break;
        }
        writer
            .write_all(&buffer[..read])
            .map_err(|e| device_error("write", device, e))?;
        copied += read as u64;
    }

    writer.flush().map_err(|e| device_error("flush", device, e))?;
    if sync {
        let inner = writer
            .into_inner()
            .map_err(|e| device_error("flush", device, e.into_error()))?;
        inner.sync_all().map_err(|e| device_error("sync", device, e))?;
    }

    debug!(device = %device.display(), bytes = copied, "Stream complete");
    Ok(copied)
}

fn device_error(action: &str, device: &Path, err: io::Error) -> BackendError {
    let context = if is_device_removed_error(&err) {
        format!("device {} disappeared during {}", device.display(), action)
    } else {
        format!("failed to {} {}", action, device.display())
    };
    BackendError::io(context, err)
}

/// Check if an I/O error indicates the device has gone away.
pub(crate) fn is_device_removed_error(error: &io::Error) -> bool {
    match error.kind() {
        ErrorKind::NotFound | ErrorKind::BrokenPipe | ErrorKind::NotConnected => true,
        _ => error.raw_os_error().is_some_and(|errno| {
            matches!(
                errno,
                libc::EIO | libc::ENODEV | libc::ENXIO | libc::ENOMEDIUM | libc::EMEDIUMTYPE
            )
        }),
    }
}
