//! Editable draft of the configuration shown on the settings tab.

use crate::config::JanitorConfig;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Interval,
    AgeDays,
    Patterns,
    DryRun,
    BackupEnabled,
}

impl Field {
    pub const ALL: [Field; 5] = [
        Field::Interval,
        Field::AgeDays,
        Field::Patterns,
        Field::DryRun,
        Field::BackupEnabled,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Field::Interval => "Cleanup interval",
            Field::AgeDays => "Age threshold (days)",
            Field::Patterns => "Excluded patterns",
            Field::DryRun => "Dry run",
            Field::BackupEnabled => "Backups",
        }
    }

    fn is_toggle(self) -> bool {
        matches!(self, Field::DryRun | Field::BackupEnabled)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsDraft {
    pub interval: String,
    pub age_days: String,
    /// Comma separated.
    pub patterns: String,
    pub dry_run: bool,
    pub backup_enabled: bool,
    pub selected: usize,
    pub editing: bool,
    pub dirty: bool,
}

impl SettingsDraft {
    pub fn from_config(cfg: &JanitorConfig) -> Self {
        Self {
            interval: humantime::format_duration(cfg.interval()).to_string(),
            age_days: cfg.image_age_threshold_days.to_string(),
            patterns: cfg.excluded_image_patterns.join(", "),
            dry_run: cfg.dry_run_mode,
            backup_enabled: cfg.backup_enabled,
            selected: 0,
            editing: false,
            dirty: false,
        }
    }

    pub fn field(&self) -> Field {
        Field::ALL[self.selected.min(Field::ALL.len() - 1)]
    }

    pub fn value(&self, field: Field) -> String {
        let on_off = |b: bool| if b { "on" } else { "off" }.to_string();
        match field {
            Field::Interval => self.interval.clone(),
            Field::AgeDays => self.age_days.clone(),
            Field::Patterns => self.patterns.clone(),
            Field::DryRun => on_off(self.dry_run),
            Field::BackupEnabled => on_off(self.backup_enabled),
        }
    }

    pub fn select_next(&mut self) {
        if !self.editing {
            self.selected = (self.selected + 1) % Field::ALL.len();
        }
    }

    pub fn select_prev(&mut self) {
        if !self.editing {
            self.selected = (self.selected + Field::ALL.len() - 1) % Field::ALL.len();
        }
    }

    /// Enter: flip a toggle, or start/stop editing a text field.
    pub fn activate(&mut self) {
        match self.field() {
            Field::DryRun => self.dry_run = !self.dry_run,
            Field::BackupEnabled => self.backup_enabled = !self.backup_enabled,
            _ => {
                self.editing = !self.editing;
                return;
            }
        }
        self.dirty = true;
    }

    pub fn input(&mut self, c: char) {
        if let Some(buf) = self.text_mut() {
            buf.push(c);
            self.dirty = true;
        }
    }

    pub fn backspace(&mut self) {
        if let Some(buf) = self.text_mut() {
            buf.pop();
            self.dirty = true;
        }
    }

    fn text_mut(&mut self) -> Option<&mut String> {
        if !self.editing || self.field().is_toggle() {
            return None;
        }
        match self.field() {
            Field::Interval => Some(&mut self.interval),
            Field::AgeDays => Some(&mut self.age_days),
            Field::Patterns => Some(&mut self.patterns),
            _ => None,
        }
    }

    /// Build the configuration to save: `base` with the draft applied.
    pub fn apply_to(&self, base: &JanitorConfig) -> Result<JanitorConfig, String> {
        let interval: Duration = humantime::parse_duration(self.interval.trim())
            .map_err(|e| format!("cleanup interval: {e}"))?;
        if interval.subsec_nanos() != 0 || interval.is_zero() {
            return Err("cleanup interval must be a whole, non-zero number of seconds".into());
        }
        let age_days: u32 = self
            .age_days
            .trim()
            .parse()
            .map_err(|_| format!("age threshold: `{}` is not a number of days", self.age_days.trim()))?;
        let patterns: Vec<String> = self
            .patterns
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect();

        let cfg = JanitorConfig {
            daemon_sleep_interval_seconds: interval.as_secs(),
            image_age_threshold_days: age_days,
            excluded_image_patterns: patterns,
            dry_run_mode: self.dry_run,
            backup_enabled: self.backup_enabled,
            ..base.clone()
        };
        cfg.validate().map_err(|e| e.to_string())?;
        Ok(cfg)
    }
}
