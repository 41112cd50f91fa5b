//! Cleanup cycle orchestrator.
//!
//! One cycle runs `scanning → evaluating → backing-up → deleting → done`. At most
//! one cycle (or scan) is active per [`Orchestrator`] and all its clones; a
//! second request is rejected, never queued. With a lock file configured the
//! guard also spans processes, so the daemon and an interactive session never
//! delete at the same time.

use crate::backup::{BackupEntry, BackupRecorder};
use crate::engine::{ContainerEngine, EngineError};
use crate::executor::DeletionExecutor;
use crate::model::{
    CycleEvent, CyclePhase, CycleResult, CycleStatus, Decision, ImageOutcome, ImageRecord,
    ImageResult, RetentionPolicy, ScanEntry, ScanReport,
};
use crate::policy;
use fs2::FileExt;
use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("a cleanup cycle is already running")]
pub struct CycleAlreadyRunning;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScanError {
    #[error(transparent)]
    AlreadyRunning(#[from] CycleAlreadyRunning),

    #[error("scan cancelled")]
    Cancelled,

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("{0}")]
    Lock(String),
}

#[derive(Debug, thiserror::Error)]
enum AcquireError {
    #[error(transparent)]
    Busy(#[from] CycleAlreadyRunning),

    #[error("cannot take the cycle lock: {0}")]
    Lock(#[from] std::io::Error),
}

impl From<AcquireError> for ScanError {
    fn from(e: AcquireError) -> Self {
        match e {
            AcquireError::Busy(busy) => ScanError::AlreadyRunning(busy),
            other => ScanError::Lock(other.to_string()),
        }
    }
}

/// Everything a cycle needs that comes from configuration, frozen at cycle start.
#[derive(Debug, Clone)]
pub struct CycleSettings {
    pub policy: RetentionPolicy,
    pub backup: BackupRecorder,
    pub force: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CycleRequest {
    /// Restrict deletion to these image ids. Only narrows the candidate set.
    pub selection: Option<BTreeSet<String>>,
    pub cancel: CancellationToken,
}

/// Receives progress while a cycle runs.
pub trait CycleObserver: Send + Sync {
    fn on_event(&self, event: CycleEvent);
}

impl<F> CycleObserver for F
where
    F: Fn(CycleEvent) + Send + Sync,
{
    fn on_event(&self, event: CycleEvent) {
        self(event)
    }
}

/// Observer for callers that only want the final [`CycleResult`].
pub fn silent(_: CycleEvent) {}

#[derive(Clone)]
pub struct Orchestrator {
    engine: Arc<dyn ContainerEngine>,
    running: Arc<AtomicBool>,
    lock_file: Option<PathBuf>,
}

/// Held for the duration of a scan or cycle. The advisory lock, if any, is
/// released when `_lock` is closed.
struct FlightGuard<'a> {
    running: &'a AtomicBool,
    _lock: Option<File>,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

fn lock_exclusive(path: &Path) -> Result<File, AcquireError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path)?;
    match file.try_lock_exclusive() {
        Ok(()) => Ok(file),
        Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
            Err(AcquireError::Busy(CycleAlreadyRunning))
        }
        Err(e) => Err(AcquireError::Lock(e)),
    }
}

impl Orchestrator {
    pub fn new(engine: Arc<dyn ContainerEngine>) -> Self {
        Self {
            engine,
            running: Arc::new(AtomicBool::new(false)),
            lock_file: None,
        }
    }

    /// Share the single-flight guard with every process using the same lock file.
    pub fn with_lock_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.lock_file = Some(path.into());
        self
    }

    pub fn engine(&self) -> &Arc<dyn ContainerEngine> {
        &self.engine
    }

    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn acquire(&self) -> Result<FlightGuard<'_>, AcquireError> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| CycleAlreadyRunning)?;
        let mut flight = FlightGuard {
            running: &self.running,
            _lock: None,
        };
        if let Some(path) = &self.lock_file {
            flight._lock = Some(lock_exclusive(path)?);
        }
        Ok(flight)
    }

    /// List and evaluate without deleting anything.
    pub async fn scan(
        &self,
        policy: &RetentionPolicy,
        cancel: &CancellationToken,
    ) -> Result<ScanReport, ScanError> {
        let _flight = self.acquire()?;
        let images = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ScanError::Cancelled),
            listed = self.engine.list_images() => listed?,
        };
        let scanned_at = OffsetDateTime::now_utc();
        let decisions = policy::evaluate(&images, policy, scanned_at);
        let entries: Vec<ScanEntry> = images
            .into_iter()
            .zip(decisions)
            .map(|(record, decision)| ScanEntry { record, decision })
            .collect();
        info!(
            scanned = entries.len(),
            eligible = entries.iter().filter(|e| e.decision.is_delete()).count(),
            "scan finished"
        );
        Ok(ScanReport {
            scanned_at,
            entries,
        })
    }

    /// Run one full cycle. Always yields a [`CycleResult`] once started; only a
    /// concurrent run is reported as an error.
    pub async fn run_cycle(
        &self,
        settings: &CycleSettings,
        request: CycleRequest,
        observer: &dyn CycleObserver,
    ) -> Result<CycleResult, CycleAlreadyRunning> {
        let policy = &settings.policy;
        let mut result = CycleResult::empty(OffsetDateTime::now_utc(), policy.dry_run);
        let _flight = match self.acquire() {
            Ok(flight) => flight,
            Err(AcquireError::Busy(busy)) => return Err(busy),
            Err(e) => {
                error!(error = %e, lock_file = ?self.lock_file, "cleanup cycle not started");
                return Ok(done(
                    observer,
                    result.finish(CycleStatus::Failed, Some(e.to_string())),
                ));
            }
        };
        let cancel = &request.cancel;
        info!(
            dry_run = policy.dry_run,
            backup = ?settings.backup.path(),
            manual = request.selection.is_some(),
            "cleanup cycle started"
        );

        observer.on_event(CycleEvent::PhaseStarted {
            phase: CyclePhase::Scanning,
        });
        let listed = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            listed = self.engine.list_images() => Some(listed),
        };
        let images = match listed {
            None => {
                info!("cleanup cycle cancelled while scanning");
                return Ok(done(observer, result.finish(CycleStatus::Cancelled, None)));
            }
            Some(Err(e)) => {
                if e.is_environmental() {
                    error!(error = %e, "container engine unavailable, cycle aborted");
                } else {
                    error!(error = %e, "image catalog unreadable, cycle aborted");
                }
                return Ok(done(
                    observer,
                    result.finish(CycleStatus::Failed, Some(e.to_string())),
                ));
            }
            Some(Ok(images)) => images,
        };

        observer.on_event(CycleEvent::PhaseStarted {
            phase: CyclePhase::Evaluating,
        });
        let decisions = policy::evaluate(&images, policy, OffsetDateTime::now_utc());
        let mut candidates: Vec<(ImageRecord, Decision)> = Vec::new();
        for (record, decision) in images.into_iter().zip(decisions) {
            let verdict = if !decision.is_delete() {
                Some(ImageResult::Kept)
            } else if request
                .selection
                .as_ref()
                .is_some_and(|sel| !sel.contains(&record.id))
            {
                Some(ImageResult::NotSelected)
            } else {
                None
            };
            match verdict {
                Some(kept) => record_outcome(&mut result, observer, &record, decision, kept),
                None => candidates.push((record, decision)),
            }
        }
        info!(
            scanned = result.outcomes.len() + candidates.len(),
            candidates = candidates.len(),
            "evaluation finished"
        );

        if cancel.is_cancelled() {
            info!("cleanup cycle cancelled before any deletion");
            skip_all(&mut result, observer, candidates);
            return Ok(done(observer, result.finish(CycleStatus::Cancelled, None)));
        }

        observer.on_event(CycleEvent::PhaseStarted {
            phase: CyclePhase::BackingUp,
        });
        let mut entries: Vec<BackupEntry> = Vec::with_capacity(candidates.len());
        for (record, _) in &candidates {
            match settings.backup.record_pending(record).await {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    error!(image_id = %record.id, error = %e, "backup failed, no image will be deleted");
                    skip_all(&mut result, observer, candidates);
                    return Ok(done(
                        observer,
                        result.finish(CycleStatus::Failed, Some(format!("backup failed: {e}"))),
                    ));
                }
            }
        }

        observer.on_event(CycleEvent::PhaseStarted {
            phase: CyclePhase::Deleting,
        });
        let executor = DeletionExecutor::new(self.engine.as_ref(), settings.force);
        let mut cancelled = false;
        for ((record, decision), entry) in candidates.into_iter().zip(entries) {
            if !cancelled && cancel.is_cancelled() {
                info!("stop requested, remaining candidates skipped");
                cancelled = true;
            }
            if cancelled {
                record_outcome(&mut result, observer, &record, decision, ImageResult::Skipped);
                continue;
            }
            let outcome = executor.delete(&record.id, policy.dry_run).await;
            let image_result = ImageResult::from(outcome);
            if image_result == ImageResult::Deleted {
                if let Err(e) = settings
                    .backup
                    .finalize(&entry, OffsetDateTime::now_utc())
                    .await
                {
                    warn!(image_id = %record.id, error = %e, "image deleted but backup entry not finalized");
                }
            }
            record_outcome(&mut result, observer, &record, decision, image_result);
        }

        let status = if cancelled {
            CycleStatus::Cancelled
        } else {
            CycleStatus::Completed
        };
        Ok(done(observer, result.finish(status, None)))
    }
}

fn record_outcome(
    result: &mut CycleResult,
    observer: &dyn CycleObserver,
    record: &ImageRecord,
    decision: Decision,
    image_result: ImageResult,
) {
    let outcome = ImageOutcome {
        image_id: record.id.clone(),
        tags: record.tags.clone(),
        size_bytes: record.size_bytes,
        decision,
        result: image_result,
    };
    observer.on_event(CycleEvent::ImageProcessed {
        outcome: outcome.clone(),
    });
    result.outcomes.push(outcome);
}

fn skip_all(
    result: &mut CycleResult,
    observer: &dyn CycleObserver,
    candidates: Vec<(ImageRecord, Decision)>,
) {
    for (record, decision) in candidates {
        record_outcome(result, observer, &record, decision, ImageResult::Skipped);
    }
}

fn done(observer: &dyn CycleObserver, result: CycleResult) -> CycleResult {
    observer.on_event(CycleEvent::PhaseStarted {
        phase: CyclePhase::Done,
    });
    info!(
        status = ?result.status,
        scanned = result.scanned,
        kept = result.kept,
        deleted = result.deleted,
        simulated = result.simulated,
        failed = result.failed,
        skipped = result.skipped,
        reclaimed_bytes = result.reclaimed_bytes,
        "cleanup cycle finished"
    );
    result
}
