//! Daemon scheduler: one cleanup cycle per interval until asked to stop.

use crate::config::{ConfigSource, JanitorConfig};
use crate::orchestrator::{silent, CycleRequest, Orchestrator};
use crate::text_summary::build_text_summary;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct Scheduler {
    orchestrator: Orchestrator,
    source: ConfigSource,
}

impl Scheduler {
    pub fn new(orchestrator: Orchestrator, source: ConfigSource) -> Self {
        Self {
            orchestrator,
            source,
        }
    }

    /// Run until `shutdown` fires. A stop request lets the image currently being
    /// deleted finish, then skips the rest of the batch. Returns the number of
    /// cycles that ran.
    pub async fn run(&self, initial: JanitorConfig, shutdown: CancellationToken) -> u64 {
        let mut cfg = initial;
        let mut cycles = 0u64;
        let mut wait_first = !cfg.daemon_run_on_start;
        info!(
            interval = %humantime::format_duration(cfg.interval()),
            run_on_start = cfg.daemon_run_on_start,
            "scheduler started"
        );

        loop {
            if wait_first || cycles > 0 {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(cfg.interval()) => {}
                }
            }
            wait_first = false;

            // Pick up changes saved from the settings tab; a bad file keeps the last good config.
            match self.source.load() {
                Ok(fresh) => {
                    if fresh != cfg {
                        info!("configuration reloaded");
                    }
                    cfg = fresh;
                }
                Err(e) => warn!(error = %e, "configuration reload failed, keeping previous settings"),
            }

            let request = CycleRequest {
                selection: None,
                cancel: shutdown.child_token(),
            };
            match self
                .orchestrator
                .run_cycle(&cfg.cycle_settings(), request, &silent)
                .await
            {
                Ok(result) => {
                    cycles += 1;
                    for line in build_text_summary(&result).lines {
                        if result.is_failed() {
                            warn!("{line}");
                        } else {
                            info!("{line}");
                        }
                    }
                }
                Err(busy) => warn!("{busy}, scheduled cycle skipped"),
            }

            if shutdown.is_cancelled() {
                break;
            }
        }

        info!(cycles, "scheduler stopped");
        cycles
    }
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("interrupt received, shutting down"),
        _ = terminate => info!("SIGTERM received, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fake::{image, FakeEngine};
    use crate::engine::EngineError;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;
    use time::OffsetDateTime;

    fn config(run_on_start: bool) -> JanitorConfig {
        JanitorConfig {
            daemon_sleep_interval_seconds: 60,
            daemon_run_on_start: run_on_start,
            backup_enabled: false,
            ..Default::default()
        }
    }

    /// Config file holding `cfg`, as the daemon would find it on disk.
    fn file_source(cfg: &JanitorConfig) -> (TempDir, ConfigSource) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        cfg.save(&path).unwrap();
        (dir, ConfigSource::new(path, false))
    }

    fn spawn(
        engine: Arc<FakeEngine>,
        source: ConfigSource,
        initial: JanitorConfig,
    ) -> (CancellationToken, tokio::task::JoinHandle<u64>) {
        let shutdown = CancellationToken::new();
        let scheduler = Scheduler::new(Orchestrator::new(engine), source);
        let token = shutdown.clone();
        let handle = tokio::spawn(async move { scheduler.run(initial, token).await });
        (shutdown, handle)
    }

    #[tokio::test(start_paused = true)]
    async fn first_cycle_runs_at_start_when_configured() {
        let now = OffsetDateTime::now_utc();
        let engine = Arc::new(FakeEngine::with_images(vec![image("old", &[], 10, now)]));
        let cfg = config(true);
        let (_dir, source) = file_source(&cfg);
        let (shutdown, handle) = spawn(engine.clone(), source, cfg);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(engine.removed(), vec!["old"]);

        shutdown.cancel();
        assert_eq!(handle.await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn first_cycle_waits_one_interval_otherwise() {
        let now = OffsetDateTime::now_utc();
        let engine = Arc::new(FakeEngine::with_images(vec![image("old", &[], 10, now)]));
        let cfg = config(false);
        let (_dir, source) = file_source(&cfg);
        let (shutdown, handle) = spawn(engine.clone(), source, cfg);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(engine.removed().is_empty());

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(engine.removed(), vec!["old"]);

        shutdown.cancel();
        assert_eq!(handle.await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn engine_outage_does_not_stop_the_schedule() {
        let engine = Arc::new(
            FakeEngine::default().list_fails_with(EngineError::Unavailable("daemon down".into())),
        );
        let cfg = config(true);
        let (_dir, source) = file_source(&cfg);
        let (shutdown, handle) = spawn(engine, source, cfg);

        // Cycles at t=0, 60 and 120.
        tokio::time::sleep(Duration::from_secs(125)).await;
        shutdown.cancel();
        assert_eq!(handle.await.unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn saved_settings_apply_from_the_next_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let cfg = JanitorConfig {
            dry_run_mode: true,
            ..config(true)
        };
        cfg.save(&path).unwrap();

        let now = OffsetDateTime::now_utc();
        let engine = Arc::new(FakeEngine::with_images(vec![image("old", &[], 10, now)]));
        let source = ConfigSource::new(&path, false);
        let (shutdown, handle) = spawn(engine.clone(), source, cfg.clone());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(engine.removed().is_empty(), "dry run must not delete");

        JanitorConfig {
            dry_run_mode: false,
            ..cfg
        }
        .save(&path)
        .unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(engine.removed(), vec!["old"]);

        shutdown.cancel();
        assert_eq!(handle.await.unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_mid_batch_finishes_the_current_removal_only() {
        let now = OffsetDateTime::now_utc();
        let engine = Arc::new(
            FakeEngine::with_images(vec![
                image("first", &[], 10, now),
                image("second", &[], 10, now),
                image("third", &[], 10, now),
            ])
            .remove_delay(Duration::from_secs(10)),
        );
        let cfg = config(true);
        let (_dir, source) = file_source(&cfg);
        let (shutdown, handle) = spawn(engine.clone(), source, cfg);

        // "first" is being removed until t=10.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(engine.removed().is_empty());
        shutdown.cancel();

        assert_eq!(handle.await.unwrap(), 1);
        assert_eq!(engine.removed(), vec!["first"]);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_while_idle_stops_promptly() {
        let engine = Arc::new(FakeEngine::default());
        let cfg = JanitorConfig {
            daemon_sleep_interval_seconds: 86_400,
            ..config(false)
        };
        let (_dir, source) = file_source(&cfg);
        let (shutdown, handle) = spawn(engine, source, cfg);
        tokio::time::sleep(Duration::from_secs(5)).await;
        shutdown.cancel();
        assert_eq!(handle.await.unwrap(), 0);
    }
}
