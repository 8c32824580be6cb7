use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::core::markers::{ExtendedCommand, FailureLog, MEDIA_DIR};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/partsnap/config.toml";
pub const ENV_PREFIX: &str = "PARTSNAP_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Mount point of the removable media.
    pub media_root: PathBuf,
    /// Timestamped backup sets are created under here. Defaults to
    /// `partsnap/backup` on the media.
    pub backup_root: Option<PathBuf>,
    /// recovery.fstab style volume table.
    pub volume_table: PathBuf,
    pub by_name_dir: PathBuf,
    pub mounts_file: PathBuf,
    pub hide_progress_marker: Option<PathBuf>,
    pub checkpoint_marker: Option<PathBuf>,
    pub extended_command: PathBuf,
    pub staging_dir: PathBuf,
    /// Session log. Defaults to `partsnap.log` in the staging directory.
    pub log_file: Option<PathBuf>,
    pub media_wait_secs: u32,
    pub min_free_mb: u64,
    pub device_serial: String,
    /// Regenerate an fstab here at startup.
    pub fstab_output: Option<PathBuf>,
    pub verbose: bool,
    pub json_logs: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            media_root: PathBuf::from("/sdcard"),
            backup_root: None,
            volume_table: PathBuf::from("/etc/recovery.fstab"),
            by_name_dir: PathBuf::from("/dev/block/by-name"),
            mounts_file: PathBuf::from("/proc/mounts"),
            hide_progress_marker: None,
            checkpoint_marker: None,
            extended_command: PathBuf::from("/cache/recovery/extendedcommand"),
            staging_dir: PathBuf::from("/tmp"),
            log_file: None,
            media_wait_secs: 20,
            min_free_mb: 150,
            device_serial: String::new(),
            fstab_output: None,
            verbose: false,
            json_logs: false,
        }
    }
}

impl AppConfig {
    /// Layer defaults, the TOML file, `PARTSNAP_*` variables and finally
    /// `args` (fields it skips serializing keep the lower layer's value).
    pub fn new<T: Serialize>(args: Option<&T>, config_path: Option<&Path>) -> figment::Result<Self> {
        let path = config_path.unwrap_or(Path::new(DEFAULT_CONFIG_PATH));
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX));

        if let Some(args) = args {
            figment = figment.merge(Serialized::defaults(args));
        }

        figment.extract()
    }

    pub fn backup_root(&self) -> PathBuf {
        self.backup_root
            .clone()
            .unwrap_or_else(|| self.on_media("backup"))
    }

    pub fn hide_progress_marker(&self) -> PathBuf {
        self.hide_progress_marker
            .clone()
            .unwrap_or_else(|| self.on_media(".hideprogress"))
    }

    pub fn checkpoint_marker(&self) -> PathBuf {
        self.checkpoint_marker
            .clone()
            .unwrap_or_else(|| self.on_media(".checkpoint"))
    }

    pub fn log_file(&self) -> PathBuf {
        self.log_file
            .clone()
            .unwrap_or_else(|| self.staging_dir.join("partsnap.log"))
    }

    fn on_media(&self, name: &str) -> PathBuf {
        self.media_root.join(MEDIA_DIR).join(name)
    }

    pub fn extended_command(&self) -> ExtendedCommand {
        ExtendedCommand {
            script: self.extended_command.clone(),
            staging_dir: self.staging_dir.clone(),
            checkpoint_marker: self.checkpoint_marker(),
            media_root: self.media_root.clone(),
            media_wait_secs: self.media_wait_secs,
        }
    }

    pub fn failure_log(&self) -> FailureLog {
        FailureLog {
            log: self.log_file(),
            media_root: self.media_root.clone(),
        }
    }
}
