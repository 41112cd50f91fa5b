//! Interactive session state. Owned by the UI thread only.

use super::settings::SettingsDraft;
use crate::config::JanitorConfig;
use crate::metrics::format_bytes;
use crate::model::{CycleEvent, CyclePhase, CycleResult, ImageResult, ScanEntry, ScanReport};
use crate::orchestrator::{SessionEvent, StatusSnapshot, UiCommand};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tab {
    Dashboard,
    Settings,
    ManualClean,
}

impl Tab {
    pub const ALL: [Tab; 3] = [Tab::Dashboard, Tab::Settings, Tab::ManualClean];

    pub fn index(self) -> usize {
        match self {
            Tab::Dashboard => 0,
            Tab::Settings => 1,
            Tab::ManualClean => 2,
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Tab::Dashboard => "Dashboard",
            Tab::Settings => "Settings",
            Tab::ManualClean => "Manual clean",
        }
    }

    pub fn next(self) -> Tab {
        Tab::ALL[(self.index() + 1) % Tab::ALL.len()]
    }

    pub fn prev(self) -> Tab {
        Tab::ALL[(self.index() + Tab::ALL.len() - 1) % Tab::ALL.len()]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Scanning,
    Cleaning,
}

pub struct SessionState {
    pub tab: Tab,
    pub show_help: bool,
    pub info: String,
    /// Last configuration confirmed by the controller.
    pub config: JanitorConfig,
    pub settings: SettingsDraft,
    pub last_scan: Option<ScanReport>,
    pub last_cycle: Option<CycleResult>,
    /// Image ids ticked on the manual clean tab.
    pub selection: BTreeSet<String>,
    /// Guards against a second scan or cycle while one is outstanding.
    pub in_progress: Option<Activity>,
    pub phase: CyclePhase,
    pub processed: usize,
    /// Row under the cursor in the eligible list.
    pub cursor: usize,
    pub confirm_pending: bool,
    pub status: Option<StatusSnapshot>,
}

impl SessionState {
    pub fn new(config: JanitorConfig) -> Self {
        Self {
            tab: Tab::Dashboard,
            show_help: false,
            info: String::new(),
            settings: SettingsDraft::from_config(&config),
            config,
            last_scan: None,
            last_cycle: None,
            selection: BTreeSet::new(),
            in_progress: None,
            phase: CyclePhase::Idle,
            processed: 0,
            cursor: 0,
            confirm_pending: false,
            status: None,
        }
    }

    pub fn dry_run(&self) -> bool {
        self.config.dry_run_mode
    }

    pub fn eligible(&self) -> Vec<&ScanEntry> {
        self.last_scan
            .as_ref()
            .map(|r| r.eligible().collect())
            .unwrap_or_default()
    }

    pub fn selected_bytes(&self) -> u64 {
        self.eligible()
            .iter()
            .filter(|e| self.selection.contains(&e.record.id))
            .map(|e| e.record.size_bytes)
            .sum()
    }

    fn busy_message(&self) -> &'static str {
        match self.in_progress {
            Some(Activity::Scanning) => "A scan is already running",
            _ => "A cleanup is already running",
        }
    }

    pub fn request_scan(&mut self) -> Option<UiCommand> {
        if self.in_progress.is_some() {
            self.info = self.busy_message().into();
            return None;
        }
        self.in_progress = Some(Activity::Scanning);
        self.confirm_pending = false;
        self.phase = CyclePhase::Scanning;
        self.info = "Scanning images…".into();
        Some(UiCommand::Scan)
    }

    /// `d`: in dry run the cycle starts right away, a live run asks first.
    pub fn request_clean(&mut self) -> Option<UiCommand> {
        if self.in_progress.is_some() {
            self.info = self.busy_message().into();
            return None;
        }
        if self.selection.is_empty() {
            self.info = "Nothing selected".into();
            return None;
        }
        if self.dry_run() {
            return Some(self.start_clean());
        }
        self.confirm_pending = true;
        self.info = format!(
            "Delete {} image(s), {}? y = confirm, n = abort",
            self.selection.len(),
            format_bytes(self.selected_bytes())
        );
        None
    }

    pub fn confirm(&mut self) -> Option<UiCommand> {
        if !self.confirm_pending || self.in_progress.is_some() {
            return None;
        }
        Some(self.start_clean())
    }

    pub fn abort_confirm(&mut self) {
        if self.confirm_pending {
            self.confirm_pending = false;
            self.info = "Deletion aborted".into();
        }
    }

    fn start_clean(&mut self) -> UiCommand {
        self.confirm_pending = false;
        self.in_progress = Some(Activity::Cleaning);
        self.processed = 0;
        self.info = if self.dry_run() {
            "Dry run started…".into()
        } else {
            "Cleanup started…".into()
        };
        UiCommand::Clean {
            selection: self.selection.clone(),
        }
    }

    pub fn move_cursor(&mut self, delta: isize) {
        let len = self.eligible().len();
        if len == 0 {
            self.cursor = 0;
            return;
        }
        let next = self.cursor as isize + delta;
        self.cursor = next.clamp(0, len as isize - 1) as usize;
    }

    pub fn toggle_current(&mut self) {
        if self.in_progress == Some(Activity::Cleaning) {
            return;
        }
        let Some(id) = self.eligible().get(self.cursor).map(|e| e.record.id.clone()) else {
            return;
        };
        if !self.selection.remove(&id) {
            self.selection.insert(id);
        }
        self.confirm_pending = false;
    }

    /// Select every eligible image, or clear the selection if all were selected.
    pub fn toggle_all(&mut self) {
        if self.in_progress == Some(Activity::Cleaning) {
            return;
        }
        let ids: BTreeSet<String> = self.eligible().iter().map(|e| e.record.id.clone()).collect();
        if !ids.is_empty() && ids.is_subset(&self.selection) {
            self.selection.clear();
        } else {
            self.selection = ids;
        }
        self.confirm_pending = false;
    }

    pub fn apply_event(&mut self, ev: SessionEvent) {
        match ev {
            SessionEvent::Cycle(CycleEvent::PhaseStarted { phase }) => self.phase = phase,
            SessionEvent::Cycle(CycleEvent::ImageProcessed { outcome }) => {
                if !matches!(outcome.result, ImageResult::Kept | ImageResult::NotSelected) {
                    self.processed += 1;
                }
            }
            SessionEvent::ScanCompleted(report) => {
                self.in_progress = None;
                self.phase = CyclePhase::Idle;
                let eligible: BTreeSet<&str> =
                    report.eligible().map(|e| e.record.id.as_str()).collect();
                self.selection.retain(|id| eligible.contains(id.as_str()));
                self.info = format!(
                    "Scan: {} image(s), {} eligible for deletion",
                    report.entries.len(),
                    eligible.len()
                );
                self.last_scan = Some(report);
                self.move_cursor(0);
            }
            SessionEvent::ScanFailed(msg) => {
                self.in_progress = None;
                self.phase = CyclePhase::Idle;
                self.info = format!("Scan failed: {msg}");
            }
            SessionEvent::CycleCompleted(result) => {
                self.in_progress = None;
                self.phase = CyclePhase::Done;
                if let Some(scan) = self.last_scan.as_mut() {
                    scan.forget_deleted(&result);
                }
                for o in &result.outcomes {
                    if o.result == ImageResult::Deleted {
                        self.selection.remove(&o.image_id);
                    }
                }
                self.info = match (&result.error, result.dry_run) {
                    (Some(err), _) => format!("Cleanup failed: {err}"),
                    (None, true) => format!(
                        "Dry run: {} image(s) would be deleted ({})",
                        result.simulated,
                        format_bytes(result.simulated_bytes)
                    ),
                    (None, false) => format!(
                        "Deleted {} image(s), {} reclaimed, {} failed",
                        result.deleted,
                        format_bytes(result.reclaimed_bytes),
                        result.failed
                    ),
                };
                self.last_cycle = Some(*result);
                self.move_cursor(0);
            }
            SessionEvent::Rejected(msg) => {
                // The refused request never started.
                self.in_progress = None;
                self.phase = CyclePhase::Idle;
                self.info = format!("Rejected: {msg}");
            }
            SessionEvent::Info(msg) => self.info = msg,
            SessionEvent::ConfigSaved(cfg) => {
                self.settings = SettingsDraft {
                    selected: self.settings.selected,
                    ..SettingsDraft::from_config(&cfg)
                };
                self.config = *cfg;
                self.info = "Settings saved; the daemon applies them from its next cycle".into();
            }
            SessionEvent::ConfigSaveFailed(msg) => self.info = format!("Save failed: {msg}"),
            SessionEvent::Status(s) => self.status = Some(*s),
        }
    }
}
