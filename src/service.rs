//! Host-side status probes for the dashboard: service unit state and log tail.

use std::io::SeekFrom;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::process::Command;

/// Only this much of the end of the log file is read for the tail.
const TAIL_WINDOW: u64 = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceState {
    Active,
    Inactive,
    Failed,
    /// Any other `systemctl is-active` answer (activating, deactivating, ...).
    Other(String),
    /// systemctl missing or not answering.
    Unknown,
}

impl ServiceState {
    pub fn label(&self) -> &str {
        match self {
            ServiceState::Active => "active",
            ServiceState::Inactive => "inactive",
            ServiceState::Failed => "failed",
            ServiceState::Other(s) => s,
            ServiceState::Unknown => "unknown",
        }
    }

    fn parse(answer: &str) -> Self {
        match answer.trim() {
            "active" => ServiceState::Active,
            "inactive" => ServiceState::Inactive,
            "failed" => ServiceState::Failed,
            "" => ServiceState::Unknown,
            other => ServiceState::Other(other.to_string()),
        }
    }
}

/// Ask systemd whether `unit` is running. Never fails; problems map to `Unknown`.
pub async fn unit_state(unit: &str) -> ServiceState {
    let mut cmd = Command::new("systemctl");
    cmd.args(["is-active", unit])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    // is-active exits non-zero for inactive units; stdout still carries the state.
    match tokio::time::timeout(Duration::from_secs(3), cmd.output()).await {
        Ok(Ok(out)) => ServiceState::parse(&String::from_utf8_lossy(&out.stdout)),
        _ => ServiceState::Unknown,
    }
}

/// Last `n` lines of `path`. A missing file yields no lines.
pub async fn tail_lines(path: &Path, n: usize) -> std::io::Result<Vec<String>> {
    let mut file = match tokio::fs::File::open(path).await {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let len = file.metadata().await?.len();
    let start = len.saturating_sub(TAIL_WINDOW);
    file.seek(SeekFrom::Start(start)).await?;
    let mut buf = Vec::with_capacity((len - start) as usize);
    file.read_to_end(&mut buf).await?;

    let text = String::from_utf8_lossy(&buf);
    let mut lines: Vec<&str> = text.lines().collect();
    // The first line of a partial window is most likely cut in half.
    if start > 0 && !lines.is_empty() {
        lines.remove(0);
    }
    let skip = lines.len().saturating_sub(n);
    Ok(lines[skip..].iter().map(|l| l.to_string()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn systemctl_answers_are_parsed() {
        assert_eq!(ServiceState::parse("active\n"), ServiceState::Active);
        assert_eq!(ServiceState::parse("inactive"), ServiceState::Inactive);
        assert_eq!(ServiceState::parse("failed"), ServiceState::Failed);
        assert_eq!(
            ServiceState::parse("activating"),
            ServiceState::Other("activating".into())
        );
        assert_eq!(ServiceState::parse(""), ServiceState::Unknown);
        assert_eq!(ServiceState::Other("reloading".into()).label(), "reloading");
    }

    #[tokio::test]
    async fn tail_returns_last_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("janitor.log");
        let content: String = (1..=25).map(|i| format!("line {i}\n")).collect();
        std::fs::write(&path, content).unwrap();

        let tail = tail_lines(&path, 10).await.unwrap();
        assert_eq!(tail.len(), 10);
        assert_eq!(tail.first().map(String::as_str), Some("line 16"));
        assert_eq!(tail.last().map(String::as_str), Some("line 25"));

        let short = tail_lines(&path, 100).await.unwrap();
        assert_eq!(short.len(), 25);
    }

    #[tokio::test]
    async fn tail_of_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        assert!(tail_lines(&dir.path().join("absent.log"), 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn tail_of_large_file_drops_the_cut_line() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("big.log");
        let line = "x".repeat(999);
        let content: String = (0..200).map(|i| format!("{i:04}{line}\n")).collect();
        std::fs::write(&path, content).unwrap();

        let tail = tail_lines(&path, 3).await.unwrap();
        assert_eq!(tail.len(), 3);
        assert!(tail[2].starts_with("0199"));
        assert!(tail.iter().all(|l| l.len() == 1003));
    }
}
