//! In-memory engine used by unit tests.

use super::{ContainerEngine, EngineError};
use crate::backup::BackupRecorder;
use crate::model::ImageRecord;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;
use time::OffsetDateTime;

#[derive(Default)]
pub(crate) struct FakeEngine {
    images: Mutex<Vec<ImageRecord>>,
    list_error: Mutex<Option<EngineError>>,
    list_delay: Option<Duration>,
    remove_delay: Option<Duration>,
    failing: HashSet<String>,
    removed: Mutex<Vec<String>>,
    /// When set, every removal checks that a pending backup entry already exists.
    audit_backups: Option<BackupRecorder>,
    unbacked_removals: Mutex<Vec<String>>,
}

impl FakeEngine {
    pub fn with_images(images: Vec<ImageRecord>) -> Self {
        Self {
            images: Mutex::new(images),
            ..Default::default()
        }
    }

    pub fn failing_on(mut self, id: &str) -> Self {
        self.failing.insert(id.to_string());
        self
    }

    pub fn list_fails_with(self, err: EngineError) -> Self {
        *self.list_error.lock().unwrap() = Some(err);
        self
    }

    pub fn list_delay(mut self, delay: Duration) -> Self {
        self.list_delay = Some(delay);
        self
    }

    pub fn remove_delay(mut self, delay: Duration) -> Self {
        self.remove_delay = Some(delay);
        self
    }

    pub fn auditing(mut self, recorder: BackupRecorder) -> Self {
        self.audit_backups = Some(recorder);
        self
    }

    pub fn removed(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }

    pub fn unbacked_removals(&self) -> Vec<String> {
        self.unbacked_removals.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn list_images(&self) -> Result<Vec<ImageRecord>, EngineError> {
        if let Some(delay) = self.list_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.list_error.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(self.images.lock().unwrap().clone())
    }

    async fn remove_image(&self, id: &str, _force: bool) -> Result<(), EngineError> {
        if let Some(recorder) = &self.audit_backups {
            let entries = recorder.load_entries().await.unwrap_or_default();
            if !entries.iter().any(|e| e.image_id == id) {
                self.unbacked_removals.lock().unwrap().push(id.to_string());
            }
        }
        if let Some(delay) = self.remove_delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.contains(id) {
            return Err(EngineError::Rejected(format!(
                "conflict: unable to delete {id} (image is being used by running container)"
            )));
        }
        let mut images = self.images.lock().unwrap();
        let before = images.len();
        images.retain(|img| img.id != id);
        if images.len() == before {
            return Err(EngineError::Rejected(format!("No such image: {id}")));
        }
        self.removed.lock().unwrap().push(id.to_string());
        Ok(())
    }

    async fn ping(&self) -> Result<(), EngineError> {
        match self.list_error.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Image created `age_days` before `now` with 1 MiB per tag-less unit size.
pub(crate) fn image(id: &str, tags: &[&str], age_days: i64, now: OffsetDateTime) -> ImageRecord {
    ImageRecord {
        id: id.to_string(),
        tags: tags.iter().map(|t| t.to_string()).collect(),
        created_at: now - time::Duration::days(age_days),
        size_bytes: 1024 * 1024,
        labels: BTreeMap::new(),
    }
}

/// The three-image catalog used throughout the cycle tests.
pub(crate) fn reference_catalog(now: OffsetDateTime) -> Vec<ImageRecord> {
    vec![
        image("A", &["dev-1"], 45, now),
        image("B", &["prod-1"], 45, now),
        image("C", &[], 5, now),
    ]
}
