use crate::config::{ConfigSource, JanitorConfig, DEFAULT_CONFIG_PATH};
use crate::engine::{ContainerEngine, DockerCli};
use crate::logging::{self, LogTarget};
use crate::orchestrator::{silent, CycleRequest, Orchestrator};
use crate::scheduler::{self, Scheduler};
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Debug, Parser, Clone)]
#[command(
    name = "docker-janitor",
    version,
    about = "Policy-driven cleanup of locally cached container images"
)]
pub struct Cli {
    /// Run the cleanup scheduler in the foreground (service mode)
    #[arg(long, conflicts_with = "once")]
    pub daemon: bool,

    /// Run a single cleanup cycle, print the summary and exit
    #[arg(long)]
    pub once: bool,

    /// Simulate deletions regardless of the configured mode. Without --daemon,
    /// runs one simulated cycle and exits
    #[arg(long)]
    pub dry_run: bool,

    /// Print the cycle result as JSON (with --once or --dry-run)
    #[arg(long)]
    pub json: bool,

    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Docker client binary used to talk to the engine
    #[arg(long, default_value = "docker")]
    pub docker_bin: PathBuf,
}

impl Cli {
    pub fn config_source(&self) -> ConfigSource {
        ConfigSource::new(&self.config, self.dry_run)
    }

    fn interactive(&self) -> bool {
        !self.daemon && !self.once && !self.dry_run && cfg!(feature = "tui")
    }
}

pub async fn run(args: Cli) -> Result<()> {
    if args.json && !(args.once || (args.dry_run && !args.daemon)) {
        anyhow::bail!("--json needs a single cycle (--once or --dry-run)");
    }
    let source = args.config_source();
    let (cfg, origin) = source
        .read()
        .with_context(|| format!("load configuration from {}", args.config.display()))?;

    let target = if args.interactive() {
        LogTarget::FileOnly
    } else {
        LogTarget::FileAndStderr
    };
    let _log_guard = logging::init(&cfg, target);
    origin.log(source.path());

    let engine: Arc<dyn ContainerEngine> =
        Arc::new(DockerCli::new(&args.docker_bin, cfg.engine_timeout));
    let orch = Orchestrator::new(engine).with_lock_file(cfg.lock_file());

    if args.daemon {
        return run_daemon(orch, source, cfg).await;
    }
    #[cfg(feature = "tui")]
    {
        if args.interactive() {
            return crate::tui::run(orch, source, cfg).await;
        }
    }
    // --once, --dry-run, or no mode flag in a build without the UI.
    run_once(&orch, &cfg, args.json).await
}

async fn run_daemon(orch: Orchestrator, source: ConfigSource, cfg: JanitorConfig) -> Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %source.path().display(),
        dry_run_forced = source.forces_dry_run(),
        "docker-janitor daemon starting"
    );
    if let Err(e) = orch.engine().ping().await {
        error!(error = %e, "container engine unreachable at startup");
        return Err(e).context("container engine unreachable at startup");
    }

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        scheduler::shutdown_signal().await;
        trigger.cancel();
    });

    Scheduler::new(orch, source).run(cfg, shutdown).await;
    Ok(())
}

async fn run_once(orch: &Orchestrator, cfg: &JanitorConfig, json: bool) -> Result<()> {
    let result = orch
        .run_cycle(&cfg.cycle_settings(), CycleRequest::default(), &silent)
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        for line in crate::text_summary::build_text_summary(&result).lines {
            println!("{line}");
        }
    }

    if result.is_failed() {
        let err = result.error.as_deref().unwrap_or("unknown error");
        anyhow::bail!("cleanup cycle failed: {err}");
    }
    Ok(())
}
