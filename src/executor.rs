//! Deletion executor: one removal request per candidate, never fatal.

use crate::engine::ContainerEngine;
use crate::model::DeleteOutcome;
use tracing::{info, warn};

pub struct DeletionExecutor<'a> {
    engine: &'a dyn ContainerEngine,
    force: bool,
}

impl<'a> DeletionExecutor<'a> {
    pub fn new(engine: &'a dyn ContainerEngine, force: bool) -> Self {
        Self { engine, force }
    }

    /// Remove `image_id`, or pretend to when `dry_run` is set (no engine call).
    pub async fn delete(&self, image_id: &str, dry_run: bool) -> DeleteOutcome {
        if dry_run {
            info!(image_id = %image_id, "dry run: would delete image");
            return DeleteOutcome::Simulated;
        }
        match self.engine.remove_image(image_id, self.force).await {
            Ok(()) => {
                info!(image_id = %image_id, "deleted image");
                DeleteOutcome::Deleted
            }
            Err(e) => {
                warn!(image_id = %image_id, error = %e, "failed to delete image");
                DeleteOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }
}
