pub mod backends;
pub mod backup;
pub mod classify;
pub mod fstab;
pub mod markers;
pub mod orchestrator;
pub mod partitions;
pub mod progress;
pub mod restore;
pub mod volume;

pub use backends::{
    ChecksumTool, FormatBackend, MountManager, ProgressCallback, RawImageBackend, Reporter,
    TreeArchiveBackend,
};
pub use backup::BackupOrchestrator;
pub use classify::{Strategy, classify};
pub use fstab::{FstabEntry, FstabGenerator};
pub use orchestrator::{Advisory, Report, SkipReason, StepOutcome, StepRecord};
pub use partitions::{PARTITIONS, PartitionSelection, PartitionSpec};
pub use progress::ProgressCounter;
pub use restore::RestoreOrchestrator;
pub use volume::{Volume, VolumeRegistry, VolumeTable};
