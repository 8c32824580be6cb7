use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info};

use crate::adapters::raw_image::BUFFER_SIZE;
use crate::core::backends::{BackendResult, ChecksumTool};
use crate::error::BackendError;

/// Manifest written into every backup set.
pub const MANIFEST_NAME: &str = "manifest.b3";

/// Number of mismatches spelled out in a failure message.
const MAX_REPORTED: usize = 10;

static MANIFEST_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9a-f]{64})  (.+)$").expect("manifest line pattern is valid")
});

#[derive(Debug)]
struct Mismatch {
    name: String,
    reason: MismatchReason,
}

#[derive(Debug)]
enum MismatchReason {
    HashMismatch,
    Missing,
    Malformed,
}

impl MismatchReason {
    fn as_str(&self) -> &'static str {
        match self {
            Self::HashMismatch => "hash mismatch",
            Self::Missing => "missing from backup",
            Self::Malformed => "malformed manifest line",
        }
    }
}

/// BLAKE3 manifest over the top-level files of a backup set.
#[derive(Debug, Default)]
pub struct Blake3Manifest;

impl ChecksumTool for Blake3Manifest {
    fn generate(&self, dir: &Path) -> BackendResult {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .map_err(|e| BackendError::io(dir.display(), e))?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_ok_and(|t| t.is_file()))
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| name != MANIFEST_NAME)
            .collect();
        names.sort();

        let mut manifest = String::new();
        for name in &names {
            let hash = hash_file(&dir.join(name))?;
            manifest.push_str(&format!("{}  {}\n", hash.to_hex(), name));
        }

        let path = dir.join(MANIFEST_NAME);
        std::fs::write(&path, manifest).map_err(|e| BackendError::io(path.display(), e))?;
        info!(dir = %dir.display(), files = names.len(), "Wrote checksum manifest");
        Ok(())
    }

    fn verify(&self, dir: &Path) -> BackendResult {
        let path = dir.join(MANIFEST_NAME);
        let manifest = std::fs::read_to_string(&path)
            .map_err(|e| BackendError::io(format!("can't read {}", path.display()), e))?;

        let mut mismatches = Vec::new();
        let mut verified = 0usize;

        for line in manifest.lines().filter(|l| !l.trim().is_empty()) {
            let Some(caps) = MANIFEST_LINE.captures(line) else {
                mismatches.push(Mismatch {
                    name: line.to_string(),
                    reason: MismatchReason::Malformed,
                });
                continue;
            };
            let expected = &caps[1];
            let name = &caps[2];
            let file = dir.join(name);

            debug!(file = %file.display(), "Verifying file");
            if !file.is_file() {
                mismatches.push(Mismatch {
                    name: name.to_string(),
                    reason: MismatchReason::Missing,
                });
                continue;
            }

            match hash_file(&file) {
                Ok(actual) if actual.to_hex().as_str() == expected => verified += 1,
                Ok(_) => mismatches.push(Mismatch {
                    name: name.to_string(),
                    reason: MismatchReason::HashMismatch,
                }),
                Err(e) => {
                    debug!(file = %file.display(), error = %e, "Failed to hash file");
                    mismatches.push(Mismatch {
                        name: name.to_string(),
                        reason: MismatchReason::HashMismatch,
                    });
                }
            }
        }

        if !mismatches.is_empty() {
            info!(dir = %dir.display(), mismatches = mismatches.len(), "Verification failed");
            return Err(BackendError::new(format_mismatches(&mismatches)));
        }

        info!(dir = %dir.display(), files = verified, "Verification complete");
        Ok(())
    }
}

/// Hash a file in fixed-size chunks.
fn hash_file(path: &Path) -> Result<blake3::Hash, BackendError> {
    let file = File::open(path).map_err(|e| BackendError::io(path.display(), e))?;
    let mut reader = BufReader::with_capacity(BUFFER_SIZE, file);
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hasher.finalize())
}

fn format_mismatches(mismatches: &[Mismatch]) -> String {
    let mut msg = format!("{} file(s) did not match", mismatches.len());
    for m in mismatches.iter().take(MAX_REPORTED) {
        msg.push_str(&format!("\n  - {}: {}", m.name, m.reason.as_str()));
    }
    if mismatches.len() > MAX_REPORTED {
        msg.push_str(&format!("\n  ... and {} more", mismatches.len() - MAX_REPORTED));
    }
    msg
}
