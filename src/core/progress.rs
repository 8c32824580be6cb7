//! Per-file progress for tree archive operations.
//!
//! A tree step first counts the entries under its mount point, then feeds the
//! archive backend a callback that advances the counter once per entry. The
//! counter is reset at the start of each step and only moves forward within it.

use std::path::Path;

use crate::core::backends::Reporter;
use crate::core::volume::basename;

/// File names at least this long are not echoed, to keep the screen readable.
const MAX_ECHO_NAME_LEN: usize = 30;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressCounter {
    count: u64,
    total: u64,
}

impl ProgressCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new operation sized at `total` entries.
    pub fn reset(&mut self, total: u64) {
        self.count = 0;
        self.total = total;
    }

    pub fn advance(&mut self) {
        self.count = self.count.saturating_add(1);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// `count / total`, clamped to 1.0. `None` when no total is known.
    pub fn fraction(&self) -> Option<f32> {
        if self.total == 0 {
            return None;
        }
        Some((self.count as f64 / self.total as f64).min(1.0) as f32)
    }
}

/// Count the entries of the tree rooted at `dir`, `dir` itself included.
///
/// Unreadable sub-directories are counted but not descended into; the total
/// only sizes a progress bar.
pub fn count_entries(dir: &Path) -> u64 {
    let mut total = 1;
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let Ok(entries) = std::fs::read_dir(&current) else {
            continue;
        };
        for entry in entries.flatten() {
            total += 1;
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                pending.push(entry.path());
            }
        }
    }

    total
}

/// Advance `counter` for one entry and push the new state to the reporter.
pub fn report_entry(counter: &mut ProgressCounter, reporter: &dyn Reporter, path: &Path) {
    let name = basename(path);
    if name.len() < MAX_ECHO_NAME_LEN {
        reporter.print(&name);
    }
    counter.advance();
    if let Some(fraction) = counter.fraction() {
        reporter.set_progress(fraction);
    }
}
