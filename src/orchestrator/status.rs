//! Dashboard status snapshot.

use crate::backup::BackupStats;
use crate::config::JanitorConfig;
use crate::engine::{ContainerEngine, Reachability};
use crate::service::{self, ServiceState};
use std::time::Duration;
use time::OffsetDateTime;
use tracing::debug;

const LOG_TAIL_LINES: usize = 10;

#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub checked_at: OffsetDateTime,
    pub engine: Reachability,
    pub service_unit: String,
    pub service: ServiceState,
    /// `Err` carries the reason the backup log could not be read.
    pub backup: Result<BackupStats, String>,
    pub backup_enabled: bool,
    pub log_tail: Vec<String>,
    pub interval: Duration,
    pub dry_run: bool,
}

/// Probe everything the dashboard shows. Individual probe failures are
/// reported inside the snapshot.
pub(crate) async fn collect(engine: &dyn ContainerEngine, cfg: &JanitorConfig) -> StatusSnapshot {
    let backup = cfg.backup_recorder();
    let (reach, unit, stats, tail) = tokio::join!(
        engine.reachability(),
        service::unit_state(&cfg.service_unit),
        backup.stats(),
        service::tail_lines(&cfg.log_file, LOG_TAIL_LINES),
    );
    let log_tail = tail.unwrap_or_else(|e| vec![format!("cannot read {}: {e}", cfg.log_file.display())]);
    debug!(engine = ?reach, service = unit.label(), "status refreshed");
    StatusSnapshot {
        checked_at: OffsetDateTime::now_utc(),
        engine: reach,
        service_unit: cfg.service_unit.clone(),
        service: unit,
        backup: stats.map_err(|e| e.to_string()),
        backup_enabled: backup.is_enabled(),
        log_tail,
        interval: cfg.interval(),
        dry_run: cfg.dry_run_mode,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fake::{reference_catalog, FakeEngine};
    use crate::engine::EngineError;
    use tempfile::tempdir;

    fn config_in(dir: &std::path::Path) -> JanitorConfig {
        JanitorConfig {
            log_file: dir.join("janitor.log"),
            backup_file: dir.join("backup.json"),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn snapshot_reports_backup_and_log() {
        let dir = tempdir().unwrap();
        let cfg = config_in(dir.path());
        std::fs::write(&cfg.log_file, "first\nsecond\n").unwrap();
        let now = OffsetDateTime::now_utc();
        let catalog = reference_catalog(now);
        cfg.backup_recorder().record_pending(&catalog[0]).await.unwrap();

        let engine = FakeEngine::with_images(catalog);
        let snap = collect(&engine, &cfg).await;

        assert_eq!(snap.engine, Reachability::Reachable);
        assert_eq!(snap.backup, Ok(BackupStats { entries: 1, pending: 1 }));
        assert_eq!(snap.log_tail, vec!["first", "second"]);
        assert_eq!(snap.interval, Duration::from_secs(86_400));
    }

    #[tokio::test]
    async fn unreachable_engine_is_reported_not_raised() {
        let dir = tempdir().unwrap();
        let cfg = config_in(dir.path());
        let engine =
            FakeEngine::default().list_fails_with(EngineError::Unavailable("no socket".into()));
        let snap = collect(&engine, &cfg).await;
        assert!(matches!(snap.engine, Reachability::Unreachable(ref m) if m.contains("no socket")));
        assert!(snap.log_tail.is_empty());
        assert_eq!(snap.backup, Ok(BackupStats::default()));
    }
}
