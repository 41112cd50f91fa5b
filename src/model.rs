use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use time::OffsetDateTime;

/// One cached image as reported by the container engine at scan time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub size_bytes: u64,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl ImageRecord {
    /// Id without the `sha256:` digest prefix, truncated to 12 characters.
    pub fn short_id(&self) -> &str {
        let bare = self.id.strip_prefix("sha256:").unwrap_or(&self.id);
        &bare[..12.min(bare.len())]
    }

    pub fn display_tags(&self) -> String {
        if self.tags.is_empty() {
            "<none>".to_string()
        } else {
            self.tags.join(", ")
        }
    }
}

/// Retention rules applied to one cycle. Snapshotted at cycle start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub age_threshold: time::Duration,
    pub excluded_patterns: Vec<String>,
    pub dry_run: bool,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            age_threshold: time::Duration::days(3),
            excluded_patterns: Vec::new(),
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Keep,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Reason {
    TooYoung,
    MatchedExclusion,
    Eligible,
}

impl Reason {
    pub fn label(self) -> &'static str {
        match self {
            Reason::TooYoung => "too-young",
            Reason::MatchedExclusion => "matched-exclusion",
            Reason::Eligible => "eligible",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub action: Action,
    pub reason: Reason,
}

impl Decision {
    pub fn keep(reason: Reason) -> Self {
        Self {
            action: Action::Keep,
            reason,
        }
    }

    pub fn delete() -> Self {
        Self {
            action: Action::Delete,
            reason: Reason::Eligible,
        }
    }

    pub fn is_delete(&self) -> bool {
        self.action == Action::Delete
    }
}

/// Result of one removal request issued by the deletion executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeleteOutcome {
    Deleted,
    Simulated,
    Failed { reason: String },
}

/// What happened to a single image during a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ImageResult {
    /// Protected by the policy.
    Kept,
    /// Eligible, but outside the operator's manual selection.
    NotSelected,
    Deleted,
    Simulated,
    Failed { reason: String },
    /// Eligible, but the cycle stopped before its removal was attempted.
    Skipped,
}

impl From<DeleteOutcome> for ImageResult {
    fn from(outcome: DeleteOutcome) -> Self {
        match outcome {
            DeleteOutcome::Deleted => ImageResult::Deleted,
            DeleteOutcome::Simulated => ImageResult::Simulated,
            DeleteOutcome::Failed { reason } => ImageResult::Failed { reason },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageOutcome {
    pub image_id: String,
    pub tags: Vec<String>,
    pub size_bytes: u64,
    pub decision: Decision,
    pub result: ImageResult,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    Idle,
    Scanning,
    Evaluating,
    BackingUp,
    Deleting,
    Done,
}

impl CyclePhase {
    pub fn label(self) -> &'static str {
        match self {
            CyclePhase::Idle => "idle",
            CyclePhase::Scanning => "scanning",
            CyclePhase::Evaluating => "evaluating",
            CyclePhase::BackingUp => "backing-up",
            CyclePhase::Deleting => "deleting",
            CyclePhase::Done => "done",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    Completed,
    Cancelled,
    Failed,
}

/// Outcome of one orchestrator run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleResult {
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub finished_at: OffsetDateTime,
    pub status: CycleStatus,
    #[serde(default)]
    pub error: Option<String>,
    pub dry_run: bool,
    pub scanned: usize,
    pub scanned_bytes: u64,
    pub kept: usize,
    pub candidates: usize,
    pub deleted: usize,
    pub simulated: usize,
    pub failed: usize,
    pub skipped: usize,
    pub reclaimed_bytes: u64,
    pub simulated_bytes: u64,
    pub outcomes: Vec<ImageOutcome>,
}

impl CycleResult {
    pub(crate) fn empty(started_at: OffsetDateTime, dry_run: bool) -> Self {
        Self {
            started_at,
            finished_at: started_at,
            status: CycleStatus::Completed,
            error: None,
            dry_run,
            scanned: 0,
            scanned_bytes: 0,
            kept: 0,
            candidates: 0,
            deleted: 0,
            simulated: 0,
            failed: 0,
            skipped: 0,
            reclaimed_bytes: 0,
            simulated_bytes: 0,
            outcomes: Vec::new(),
        }
    }

    /// Recompute every counter from `outcomes` and stamp the end time.
    pub(crate) fn finish(mut self, status: CycleStatus, error: Option<String>) -> Self {
        self.status = status;
        self.error = error;
        self.finished_at = OffsetDateTime::now_utc();
        self.scanned = self.outcomes.len();
        self.scanned_bytes = self.outcomes.iter().map(|o| o.size_bytes).sum();
        self.kept = 0;
        self.candidates = 0;
        self.deleted = 0;
        self.simulated = 0;
        self.failed = 0;
        self.skipped = 0;
        self.reclaimed_bytes = 0;
        self.simulated_bytes = 0;
        for o in &self.outcomes {
            match &o.result {
                ImageResult::Kept | ImageResult::NotSelected => self.kept += 1,
                ImageResult::Deleted => {
                    self.deleted += 1;
                    self.reclaimed_bytes += o.size_bytes;
                }
                ImageResult::Simulated => {
                    self.simulated += 1;
                    self.simulated_bytes += o.size_bytes;
                }
                ImageResult::Failed { .. } => self.failed += 1,
                ImageResult::Skipped => self.skipped += 1,
            }
            if !matches!(o.result, ImageResult::Kept | ImageResult::NotSelected) {
                self.candidates += 1;
            }
        }
        self
    }

    pub fn is_failed(&self) -> bool {
        self.status == CycleStatus::Failed
    }
}

/// One row of a scan: the image and what the policy says about it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanEntry {
    pub record: ImageRecord,
    pub decision: Decision,
}

/// Catalog + evaluation without any deletion, used by the manual clean tab.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    #[serde(with = "time::serde::rfc3339")]
    pub scanned_at: OffsetDateTime,
    pub entries: Vec<ScanEntry>,
}

impl ScanReport {
    pub fn eligible(&self) -> impl Iterator<Item = &ScanEntry> {
        self.entries.iter().filter(|e| e.decision.is_delete())
    }

    /// Drop entries whose image was removed by a later cycle.
    pub fn forget_deleted(&mut self, result: &CycleResult) {
        let gone: std::collections::HashSet<&str> = result
            .outcomes
            .iter()
            .filter(|o| o.result == ImageResult::Deleted)
            .map(|o| o.image_id.as_str())
            .collect();
        self.entries.retain(|e| !gone.contains(e.record.id.as_str()));
    }
}

/// Progress emitted by the orchestrator while a cycle runs.
#[derive(Debug, Clone)]
pub enum CycleEvent {
    PhaseStarted { phase: CyclePhase },
    ImageProcessed { outcome: ImageOutcome },
}
