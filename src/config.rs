//! Janitor configuration file.
//!
//! A flat JSON object; every key is optional and falls back to its default.
//! A missing file is created with the defaults, an unreadable or invalid one
//! is a startup error.

use crate::backup::BackupRecorder;
use crate::model::RetentionPolicy;
use crate::orchestrator::CycleSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/docker-janitor/config.json";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config file {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LogLevel {
    #[serde(rename = "DEBUG")]
    Debug,
    #[default]
    #[serde(rename = "INFO")]
    Info,
    #[serde(rename = "WARNING", alias = "WARN")]
    Warning,
    #[serde(rename = "ERROR")]
    Error,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`.
    pub fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JanitorConfig {
    pub daemon_sleep_interval_seconds: u64,
    pub image_age_threshold_days: u32,
    pub dry_run_mode: bool,
    pub excluded_image_patterns: Vec<String>,
    pub log_level: LogLevel,
    pub log_file: PathBuf,
    pub backup_enabled: bool,
    pub backup_file: PathBuf,
    /// Run the first daemon cycle immediately instead of after one interval.
    pub daemon_run_on_start: bool,
    #[serde(with = "humantime_serde")]
    pub engine_timeout: Duration,
    pub force_remove: bool,
    pub service_unit: String,
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            daemon_sleep_interval_seconds: 86_400,
            image_age_threshold_days: 3,
            dry_run_mode: false,
            excluded_image_patterns: Vec::new(),
            log_level: LogLevel::Info,
            log_file: PathBuf::from("/var/log/docker-janitor.log"),
            backup_enabled: true,
            backup_file: PathBuf::from("/var/lib/docker-janitor/backup.json"),
            daemon_run_on_start: true,
            engine_timeout: Duration::from_secs(120),
            force_remove: true,
            service_unit: "docker-janitor.service".to_string(),
        }
    }
}

/// How a configuration was obtained by [`JanitorConfig::read`].
#[derive(Debug)]
pub enum ConfigOrigin {
    File,
    /// The file was missing and has been created with the defaults.
    DefaultsWritten,
    /// The file was missing and could not be created.
    DefaultsOnly(ConfigError),
}

impl ConfigOrigin {
    pub fn log(&self, path: &Path) {
        match self {
            ConfigOrigin::File => {}
            ConfigOrigin::DefaultsWritten => {
                info!(path = %path.display(), "wrote default configuration")
            }
            ConfigOrigin::DefaultsOnly(e) => {
                warn!(error = %e, "using defaults, could not write configuration")
            }
        }
    }
}

impl JanitorConfig {
    /// Read `path`, creating it with defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let (cfg, origin) = Self::read(path)?;
        origin.log(path);
        Ok(cfg)
    }

    /// Like [`JanitorConfig::load`], but leaves reporting the origin to the caller.
    pub fn read(path: &Path) -> Result<(Self, ConfigOrigin), ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let cfg = Self::default();
                let origin = match cfg.save(path) {
                    Ok(()) => ConfigOrigin::DefaultsWritten,
                    Err(e) => ConfigOrigin::DefaultsOnly(e),
                };
                return Ok((cfg, origin));
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let cfg: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        cfg.validate()?;
        Ok((cfg, ConfigOrigin::File))
    }

    /// Validate, then atomically replace `path` (temp file + rename).
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        self.validate()?;
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let mut text = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        text.push('\n');
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, text).map_err(io_err)?;
        std::fs::rename(&tmp, path).map_err(io_err)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.daemon_sleep_interval_seconds == 0 {
            return Err(ConfigError::Invalid(
                "daemon_sleep_interval_seconds must be greater than 0".into(),
            ));
        }
        if let Some(i) = self
            .excluded_image_patterns
            .iter()
            .position(|p| p.trim().is_empty())
        {
            return Err(ConfigError::Invalid(format!(
                "excluded_image_patterns[{i}] is empty"
            )));
        }
        if self.backup_enabled && self.backup_file.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "backup_file must be set while backup_enabled is true".into(),
            ));
        }
        if self.engine_timeout.is_zero() {
            return Err(ConfigError::Invalid("engine_timeout must be greater than 0".into()));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.daemon_sleep_interval_seconds)
    }

    pub fn policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            age_threshold: time::Duration::days(i64::from(self.image_age_threshold_days)),
            excluded_patterns: self.excluded_image_patterns.clone(),
            dry_run: self.dry_run_mode,
        }
    }

    /// Lock file shared by every janitor process on the host, next to the backup log.
    pub fn lock_file(&self) -> PathBuf {
        if self.backup_file.as_os_str().is_empty() {
            std::env::temp_dir().join("docker-janitor.lock")
        } else {
            self.backup_file.with_extension("lock")
        }
    }

    pub fn backup_recorder(&self) -> BackupRecorder {
        if self.backup_enabled {
            BackupRecorder::to_file(&self.backup_file)
        } else {
            BackupRecorder::disabled()
        }
    }

    pub fn cycle_settings(&self) -> CycleSettings {
        CycleSettings {
            policy: self.policy(),
            backup: self.backup_recorder(),
            force: self.force_remove,
        }
    }
}

/// The configuration file plus command-line overrides that are applied on top
/// of it but never written back.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    path: PathBuf,
    force_dry_run: bool,
}

impl ConfigSource {
    pub fn new(path: impl Into<PathBuf>, force_dry_run: bool) -> Self {
        Self {
            path: path.into(),
            force_dry_run,
        }
    }

    pub fn read(&self) -> Result<(JanitorConfig, ConfigOrigin), ConfigError> {
        let (mut cfg, origin) = JanitorConfig::read(&self.path)?;
        self.apply_overrides(&mut cfg);
        Ok((cfg, origin))
    }

    /// Re-read the file. Called at the start of every daemon cycle.
    pub fn load(&self) -> Result<JanitorConfig, ConfigError> {
        let mut cfg = JanitorConfig::load(&self.path)?;
        self.apply_overrides(&mut cfg);
        Ok(cfg)
    }

    /// Write `cfg` to the file and return the configuration now in effect.
    /// Overridden keys keep their on-disk value.
    pub fn save(&self, cfg: JanitorConfig) -> Result<JanitorConfig, ConfigError> {
        let mut on_disk = cfg;
        if self.force_dry_run {
            let (current, _) = JanitorConfig::read(&self.path)?;
            on_disk.dry_run_mode = current.dry_run_mode;
        }
        on_disk.save(&self.path)?;
        let mut effective = on_disk;
        self.apply_overrides(&mut effective);
        Ok(effective)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn forces_dry_run(&self) -> bool {
        self.force_dry_run
    }

    fn apply_overrides(&self, cfg: &mut JanitorConfig) {
        if self.force_dry_run {
            cfg.dry_run_mode = true;
        }
    }
}
