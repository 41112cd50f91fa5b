//! Container engine capability.
//!
//! The janitor never talks to the image store directly; it goes through
//! [`ContainerEngine`], implemented for the Docker CLI in [`docker`].

mod docker;
#[cfg(test)]
pub(crate) mod fake;

pub use docker::DockerCli;

use crate::model::ImageRecord;
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("container engine unavailable: {0}")]
    Unavailable(String),

    #[error("permission denied by the container engine: {0}")]
    PermissionDenied(String),

    #[error("container engine did not answer within {}", human(.0))]
    Timeout(Duration),

    /// The engine answered but refused the request (image in use, already gone, ...).
    #[error("{0}")]
    Rejected(String),

    #[error("unexpected answer from the container engine: {0}")]
    Protocol(String),
}

impl EngineError {
    /// Environment failures: the engine itself cannot be used right now.
    pub fn is_environmental(&self) -> bool {
        matches!(
            self,
            EngineError::Unavailable(_) | EngineError::PermissionDenied(_) | EngineError::Timeout(_)
        )
    }
}

fn human(d: &Duration) -> humantime::FormattedDuration {
    humantime::format_duration(*d)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reachability {
    Reachable,
    Unreachable(String),
}

/// Operations the janitor needs from a container runtime.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Snapshot of every locally cached image. No side effects.
    async fn list_images(&self) -> Result<Vec<ImageRecord>, EngineError>;

    /// Remove one image by id.
    async fn remove_image(&self, id: &str, force: bool) -> Result<(), EngineError>;

    async fn ping(&self) -> Result<(), EngineError>;

    async fn reachability(&self) -> Reachability {
        match self.ping().await {
            Ok(()) => Reachability::Reachable,
            Err(e) => Reachability::Unreachable(e.to_string()),
        }
    }
}

/// Bound an engine call by `limit`, mapping expiry to [`EngineError::Timeout`].
pub(crate) async fn bounded<T, F>(limit: Duration, fut: F) -> Result<T, EngineError>
where
    F: Future<Output = Result<T, EngineError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => Err(EngineError::Timeout(limit)),
    }
}
