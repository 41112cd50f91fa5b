//! Session controller.
//!
//! Runs scans and cleanup cycles on behalf of the interactive session, owns the
//! live configuration and polls dashboard status. Emits [`SessionEvent`]s for
//! the presentation layer.

use super::cycle::{CycleAlreadyRunning, CycleRequest, Orchestrator, ScanError};
use super::status::{self, StatusSnapshot};
use crate::config::{ConfigSource, JanitorConfig};
use crate::model::{CycleEvent, CycleResult, ScanReport};
use anyhow::Result;
use std::collections::BTreeSet;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const STATUS_REFRESH: Duration = Duration::from_secs(5);

/// Commands emitted by UI layers.
#[derive(Debug, Clone)]
pub(crate) enum UiCommand {
    Scan,
    Clean { selection: BTreeSet<String> },
    Cancel,
    SaveConfig(Box<JanitorConfig>),
    RefreshStatus,
    Quit,
}

#[derive(Debug, Clone)]
pub(crate) enum SessionEvent {
    Cycle(CycleEvent),
    ScanCompleted(ScanReport),
    ScanFailed(String),
    CycleCompleted(Box<CycleResult>),
    /// A request refused because another scan or cycle is active.
    Rejected(String),
    Info(String),
    ConfigSaved(Box<JanitorConfig>),
    ConfigSaveFailed(String),
    Status(Box<StatusSnapshot>),
}

enum TaskOutput {
    Scan(Result<ScanReport, ScanError>),
    Cycle(Result<CycleResult, CycleAlreadyRunning>),
}

/// Internal handle for the in-flight scan or cycle.
struct TaskCtx {
    cancel: CancellationToken,
    handle: Option<tokio::task::JoinHandle<TaskOutput>>,
}

fn start_scan(orch: &Orchestrator, cfg: &JanitorConfig) -> TaskCtx {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let orch = orch.clone();
    let policy = cfg.policy();
    let handle =
        tokio::spawn(async move { TaskOutput::Scan(orch.scan(&policy, &token).await) });
    TaskCtx {
        cancel,
        handle: Some(handle),
    }
}

fn start_cycle(
    orch: &Orchestrator,
    cfg: &JanitorConfig,
    selection: BTreeSet<String>,
    event_tx: UnboundedSender<SessionEvent>,
) -> TaskCtx {
    let cancel = CancellationToken::new();
    let request = CycleRequest {
        selection: Some(selection),
        cancel: cancel.clone(),
    };
    let orch = orch.clone();
    let settings = cfg.cycle_settings();
    let handle = tokio::spawn(async move {
        let forward = move |ev: CycleEvent| {
            let _ = event_tx.send(SessionEvent::Cycle(ev));
        };
        TaskOutput::Cycle(orch.run_cycle(&settings, request, &forward).await)
    });
    TaskCtx {
        cancel,
        handle: Some(handle),
    }
}

fn spawn_status(
    orch: &Orchestrator,
    cfg: &JanitorConfig,
) -> tokio::task::JoinHandle<StatusSnapshot> {
    let engine = orch.engine().clone();
    let cfg = cfg.clone();
    tokio::spawn(async move { status::collect(engine.as_ref(), &cfg).await })
}

/// Serve UI commands until `Quit` (or the command channel closes) and the
/// in-flight task, if any, has finished.
pub(crate) async fn run_controller(
    orch: Orchestrator,
    source: ConfigSource,
    mut cfg: JanitorConfig,
    event_tx: UnboundedSender<SessionEvent>,
    mut cmd_rx: UnboundedReceiver<UiCommand>,
) -> Result<()> {
    let mut task: Option<TaskCtx> = None;
    let mut status_task: Option<tokio::task::JoinHandle<StatusSnapshot>> = None;
    let mut quit_pending = false;
    let mut status_tick = tokio::time::interval(STATUS_REFRESH);
    status_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            cmd = cmd_rx.recv(), if !quit_pending => {
                match cmd {
                    Some(UiCommand::Scan) | Some(UiCommand::Clean { .. }) if task.is_some() => {
                        let _ = event_tx.send(SessionEvent::Rejected(CycleAlreadyRunning.to_string()));
                    }
                    Some(UiCommand::Scan) => {
                        info!("manual scan requested");
                        task = Some(start_scan(&orch, &cfg));
                    }
                    Some(UiCommand::Clean { selection }) => {
                        info!(selected = selection.len(), dry_run = cfg.dry_run_mode, "manual clean requested");
                        task = Some(start_cycle(&orch, &cfg, selection, event_tx.clone()));
                    }
                    Some(UiCommand::Cancel) => {
                        if let Some(ctx) = &task {
                            ctx.cancel.cancel();
                            let _ = event_tx.send(SessionEvent::Info("Cancelling…".into()));
                        }
                    }
                    Some(UiCommand::SaveConfig(new_cfg)) => {
                        save_config(&source, &mut cfg, *new_cfg, &event_tx);
                    }
                    Some(UiCommand::RefreshStatus) => {
                        if status_task.is_none() {
                            status_task = Some(spawn_status(&orch, &cfg));
                        }
                    }
                    Some(UiCommand::Quit) | None => {
                        // Quit waits for the current task so no deletion is cut short.
                        quit_pending = true;
                        match &task {
                            Some(ctx) => ctx.cancel.cancel(),
                            None => break,
                        }
                    }
                }
            }
            // Do not take the JoinHandle before this branch wins; otherwise it is
            // dropped when another branch is chosen and completion is never seen.
            maybe_done = async {
                if let Some(ctx) = &mut task {
                    if let Some(h) = ctx.handle.as_mut() {
                        return Some(h.await);
                    }
                }
                futures::future::pending().await
            } => {
                if let Some(join_res) = maybe_done {
                    task = None;
                    match join_res {
                        Ok(output) => report_task(output, &event_tx),
                        Err(e) => {
                            let _ = event_tx.send(SessionEvent::Info(format!("Task join failed: {e}")));
                        }
                    }
                    if quit_pending {
                        break;
                    }
                    if status_task.is_none() {
                        status_task = Some(spawn_status(&orch, &cfg));
                    }
                }
            }
            snapshot = async {
                match status_task.as_mut() {
                    Some(h) => h.await,
                    None => futures::future::pending().await,
                }
            } => {
                status_task = None;
                match snapshot {
                    Ok(s) => {
                        let _ = event_tx.send(SessionEvent::Status(Box::new(s)));
                    }
                    Err(e) => warn!(error = %e, "status probe task failed"),
                }
            }
            _ = status_tick.tick() => {
                if status_task.is_none() {
                    status_task = Some(spawn_status(&orch, &cfg));
                }
            }
        }
    }

    if let Some(h) = status_task {
        h.abort();
    }
    Ok(())
}

fn report_task(output: TaskOutput, event_tx: &UnboundedSender<SessionEvent>) {
    let event = match output {
        TaskOutput::Scan(Ok(report)) => SessionEvent::ScanCompleted(report),
        TaskOutput::Scan(Err(ScanError::AlreadyRunning(busy))) => {
            SessionEvent::Rejected(busy.to_string())
        }
        TaskOutput::Scan(Err(e)) => SessionEvent::ScanFailed(e.to_string()),
        TaskOutput::Cycle(Ok(result)) => SessionEvent::CycleCompleted(Box::new(result)),
        TaskOutput::Cycle(Err(busy)) => SessionEvent::Rejected(busy.to_string()),
    };
    let _ = event_tx.send(event);
}

fn save_config(
    source: &ConfigSource,
    cfg: &mut JanitorConfig,
    new_cfg: JanitorConfig,
    event_tx: &UnboundedSender<SessionEvent>,
) {
    match source.save(new_cfg) {
        Ok(effective) => {
            info!(path = %source.path().display(), "configuration saved");
            *cfg = effective;
            let _ = event_tx.send(SessionEvent::ConfigSaved(Box::new(cfg.clone())));
        }
        Err(e) => {
            warn!(error = %e, "configuration not saved");
            let _ = event_tx.send(SessionEvent::ConfigSaveFailed(e.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fake::{reference_catalog, FakeEngine};
    use crate::model::ImageResult;
    use std::sync::Arc;
    use tempfile::tempdir;
    use time::OffsetDateTime;
    use tokio::sync::mpsc;

    struct Harness {
        engine: Arc<FakeEngine>,
        cmd_tx: UnboundedSender<UiCommand>,
        evt_rx: UnboundedReceiver<SessionEvent>,
        handle: tokio::task::JoinHandle<Result<()>>,
        _dir: tempfile::TempDir,
        config_path: std::path::PathBuf,
    }

    fn start(engine: FakeEngine, dry_run: bool) -> Harness {
        start_with(engine, dry_run, false)
    }

    /// The config file is written with `dry_run`; `force_dry_run` mimics `--dry-run`.
    fn start_with(engine: FakeEngine, dry_run: bool, force_dry_run: bool) -> Harness {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.json");
        let cfg = JanitorConfig {
            image_age_threshold_days: 30,
            excluded_image_patterns: vec!["prod-*".into()],
            dry_run_mode: dry_run,
            backup_enabled: false,
            log_file: dir.path().join("janitor.log"),
            ..Default::default()
        };
        cfg.save(&config_path).unwrap();
        let source = ConfigSource::new(&config_path, force_dry_run);
        let cfg = source.load().unwrap();
        let engine = Arc::new(engine);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (evt_tx, evt_rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_controller(
            Orchestrator::new(engine.clone()),
            source,
            cfg,
            evt_tx,
            cmd_rx,
        ));
        Harness {
            engine,
            cmd_tx,
            evt_rx,
            handle,
            _dir: dir,
            config_path,
        }
    }

    /// Next event that is not background noise (status, progress, info).
    async fn next_outcome(rx: &mut UnboundedReceiver<SessionEvent>) -> SessionEvent {
        loop {
            match rx.recv().await.expect("controller hung up") {
                SessionEvent::Status(_) | SessionEvent::Cycle(_) | SessionEvent::Info(_) => {}
                other => return other,
            }
        }
    }

    #[tokio::test]
    async fn scan_then_clean_selected_images() {
        let now = OffsetDateTime::now_utc();
        let mut h = start(FakeEngine::with_images(reference_catalog(now)), false);

        h.cmd_tx.send(UiCommand::Scan).unwrap();
        let report = match next_outcome(&mut h.evt_rx).await {
            SessionEvent::ScanCompleted(r) => r,
            other => panic!("unexpected {other:?}"),
        };
        let selection: BTreeSet<String> = report.eligible().map(|e| e.record.id.clone()).collect();
        assert_eq!(selection.len(), 1);

        h.cmd_tx.send(UiCommand::Clean { selection }).unwrap();
        match next_outcome(&mut h.evt_rx).await {
            SessionEvent::CycleCompleted(result) => {
                assert_eq!(result.deleted, 1);
                assert!(result
                    .outcomes
                    .iter()
                    .any(|o| o.image_id == "A" && o.result == ImageResult::Deleted));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(h.engine.removed(), vec!["A"]);

        h.cmd_tx.send(UiCommand::Quit).unwrap();
        h.handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn second_request_is_rejected_while_busy() {
        let now = OffsetDateTime::now_utc();
        let mut h = start(
            FakeEngine::with_images(reference_catalog(now)).list_delay(Duration::from_secs(30)),
            false,
        );

        h.cmd_tx.send(UiCommand::Scan).unwrap();
        h.cmd_tx.send(UiCommand::Scan).unwrap();
        match next_outcome(&mut h.evt_rx).await {
            SessionEvent::Rejected(msg) => assert!(msg.contains("already running")),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            next_outcome(&mut h.evt_rx).await,
            SessionEvent::ScanCompleted(_)
        ));

        h.cmd_tx.send(UiCommand::Quit).unwrap();
        h.handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_aborts_a_slow_scan_and_quit_waits_for_it() {
        let now = OffsetDateTime::now_utc();
        let mut h = start(
            FakeEngine::with_images(reference_catalog(now)).list_delay(Duration::from_secs(300)),
            false,
        );

        h.cmd_tx.send(UiCommand::Scan).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        h.cmd_tx.send(UiCommand::Cancel).unwrap();
        match next_outcome(&mut h.evt_rx).await {
            SessionEvent::ScanFailed(msg) => assert_eq!(msg, "scan cancelled"),
            other => panic!("unexpected {other:?}"),
        }

        h.cmd_tx.send(UiCommand::Scan).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        h.cmd_tx.send(UiCommand::Quit).unwrap();
        h.handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn saved_config_is_written_and_echoed() {
        let mut h = start(FakeEngine::default(), true);
        let new_cfg = JanitorConfig {
            image_age_threshold_days: 9,
            backup_enabled: false,
            ..Default::default()
        };
        h.cmd_tx
            .send(UiCommand::SaveConfig(Box::new(new_cfg.clone())))
            .unwrap();
        match next_outcome(&mut h.evt_rx).await {
            SessionEvent::ConfigSaved(cfg) => assert_eq!(*cfg, new_cfg),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(JanitorConfig::load(&h.config_path).unwrap(), new_cfg);

        let invalid = JanitorConfig {
            daemon_sleep_interval_seconds: 0,
            ..Default::default()
        };
        h.cmd_tx
            .send(UiCommand::SaveConfig(Box::new(invalid)))
            .unwrap();
        assert!(matches!(
            next_outcome(&mut h.evt_rx).await,
            SessionEvent::ConfigSaveFailed(_)
        ));

        drop(h.cmd_tx);
        h.handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn dry_run_override_stays_out_of_the_saved_file() {
        let mut h = start_with(FakeEngine::default(), false, true);
        // The settings tab starts from the effective config, override included.
        let mut edited = JanitorConfig::load(&h.config_path).unwrap();
        edited.dry_run_mode = true;
        edited.image_age_threshold_days = 9;
        h.cmd_tx
            .send(UiCommand::SaveConfig(Box::new(edited)))
            .unwrap();
        match next_outcome(&mut h.evt_rx).await {
            SessionEvent::ConfigSaved(cfg) => {
                assert!(cfg.dry_run_mode);
                assert_eq!(cfg.image_age_threshold_days, 9);
            }
            other => panic!("unexpected {other:?}"),
        }

        let on_disk = JanitorConfig::load(&h.config_path).unwrap();
        assert!(!on_disk.dry_run_mode);
        assert_eq!(on_disk.image_age_threshold_days, 9);

        h.cmd_tx.send(UiCommand::Quit).unwrap();
        h.handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn status_is_published_on_demand() {
        let mut h = start(FakeEngine::default(), false);
        h.cmd_tx.send(UiCommand::RefreshStatus).unwrap();
        loop {
            if let Some(SessionEvent::Status(s)) = h.evt_rx.recv().await {
                assert_eq!(s.engine, crate::engine::Reachability::Reachable);
                break;
            }
        }
        h.cmd_tx.send(UiCommand::Quit).unwrap();
        h.handle.await.unwrap().unwrap();
    }
}
