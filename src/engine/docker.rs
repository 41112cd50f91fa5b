//! Docker engine adapter driving the `docker` command line client.

use super::{bounded, ContainerEngine, EngineError};
use crate::model::ImageRecord;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::process::Command;
use tracing::{debug, warn};

/// Talks to the local Docker daemon through the `docker` binary.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: PathBuf,
    timeout: Duration,
}

struct CommandOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

impl DockerCli {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    async fn exec(&self, args: &[&str]) -> Result<CommandOutput, EngineError> {
        debug!(binary = %self.binary.display(), ?args, "docker call");
        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the future on timeout must not leave the client running.
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => EngineError::Unavailable(format!(
                "`{}` not found in PATH",
                self.binary.display()
            )),
            std::io::ErrorKind::PermissionDenied => EngineError::PermissionDenied(format!(
                "cannot execute `{}`: {e}",
                self.binary.display()
            )),
            _ => EngineError::Unavailable(format!("failed to start `{}`: {e}", self.binary.display())),
        })?;

        let output = bounded(self.timeout, async move {
            child
                .wait_with_output()
                .await
                .map_err(|e| EngineError::Unavailable(format!("docker client failed: {e}")))
        })
        .await?;

        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[async_trait]
impl ContainerEngine for DockerCli {
    async fn list_images(&self) -> Result<Vec<ImageRecord>, EngineError> {
        let listed = self
            .exec(&["image", "ls", "--no-trunc", "--quiet"])
            .await?;
        if !listed.success {
            return Err(classify_failure(&listed.stderr));
        }

        let ids = parse_ids(&listed.stdout);
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut args = vec!["image", "inspect"];
        args.extend(ids.iter().map(String::as_str));
        let inspected = self.exec(&args).await?;

        match parse_inspect(&inspected.stdout) {
            Ok(records) => {
                if !inspected.success {
                    // Images removed between the two calls; the rest are complete records.
                    warn!(
                        requested = ids.len(),
                        returned = records.len(),
                        stderr = %inspected.stderr.trim(),
                        "image inspect partially failed"
                    );
                }
                Ok(records)
            }
            Err(_) if !inspected.success => Err(classify_failure(&inspected.stderr)),
            Err(e) => Err(e),
        }
    }

    async fn remove_image(&self, id: &str, force: bool) -> Result<(), EngineError> {
        let mut args = vec!["image", "rm"];
        if force {
            args.push("--force");
        }
        args.push(id);
        let out = self.exec(&args).await?;
        if out.success {
            Ok(())
        } else {
            Err(classify_failure(&out.stderr))
        }
    }

    async fn ping(&self) -> Result<(), EngineError> {
        let out = self
            .exec(&["version", "--format", "{{.Server.Version}}"])
            .await?;
        if out.success && !out.stdout.trim().is_empty() {
            Ok(())
        } else {
            Err(classify_failure(&out.stderr))
        }
    }
}

/// Distinct image ids, in listing order.
fn parse_ids(stdout: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .filter(|l| seen.insert(l.to_string()))
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectedImage {
    id: String,
    #[serde(default)]
    repo_tags: Option<Vec<String>>,
    created: String,
    #[serde(default)]
    size: i64,
    #[serde(default)]
    config: Option<InspectedConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectedConfig {
    #[serde(default)]
    labels: Option<BTreeMap<String, String>>,
}

fn parse_inspect(stdout: &str) -> Result<Vec<ImageRecord>, EngineError> {
    let raw: Vec<InspectedImage> = serde_json::from_str(stdout.trim())
        .map_err(|e| EngineError::Protocol(format!("image inspect output: {e}")))?;

    let mut records = Vec::with_capacity(raw.len());
    for img in raw {
        let created_at = match OffsetDateTime::parse(&img.created, &Rfc3339) {
            Ok(t) => t,
            Err(e) => {
                // Undatable images stay out of the catalog and are never candidates.
                warn!(image_id = %img.id, created = %img.created, error = %e, "unparseable creation time, skipping image");
                continue;
            }
        };
        let tags = img
            .repo_tags
            .unwrap_or_default()
            .into_iter()
            .filter(|t| t != "<none>:<none>")
            .collect();
        let labels = img
            .config
            .and_then(|c| c.labels)
            .unwrap_or_default();
        records.push(ImageRecord {
            id: img.id,
            tags,
            created_at,
            size_bytes: u64::try_from(img.size).unwrap_or(0),
            labels,
        });
    }
    Ok(records)
}

fn classify_failure(stderr: &str) -> EngineError {
    let msg = stderr
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("docker exited with an error")
        .to_string();
    let lower = stderr.to_ascii_lowercase();
    if lower.contains("permission denied") {
        EngineError::PermissionDenied(msg)
    } else if lower.contains("cannot connect to the docker daemon")
        || lower.contains("is the docker daemon running")
        || lower.contains("error during connect")
    {
        EngineError::Unavailable(msg)
    } else {
        EngineError::Rejected(msg)
    }
}
