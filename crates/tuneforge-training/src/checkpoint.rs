//! Epoch checkpoints and where they are stored.

use crate::error::{TrainingError, TrainingResult};
use crate::job::TrainingJobId;
use crate::layout::CheckpointLayout;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub epoch: u32,
    pub step: u64,
    pub loss: f64,
    pub validation_loss: Option<f64>,
    pub metrics: BTreeMap<String, f64>,
    pub size: u64,
    pub path: String,
    pub created_at: DateTime<Utc>,
    pub is_best: bool,
}

/// Checkpoint contents before they are persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointDraft {
    pub job_id: TrainingJobId,
    pub epoch: u32,
    pub step: u64,
    pub loss: f64,
    pub validation_loss: Option<f64>,
    pub metrics: BTreeMap<String, f64>,
}

impl CheckpointDraft {
    #[must_use]
    pub fn checkpoint_id(&self) -> String {
        format!("{}-epoch-{}", self.job_id, self.epoch)
    }

    #[must_use]
    pub fn into_checkpoint(self, stored: StoredCheckpoint) -> Checkpoint {
        Checkpoint {
            id: self.checkpoint_id(),
            epoch: self.epoch,
            step: self.step,
            loss: self.loss,
            validation_loss: self.validation_loss,
            metrics: self.metrics,
            size: stored.size,
            path: stored.path,
            created_at: Utc::now(),
            is_best: false,
        }
    }
}

/// Where a checkpoint ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCheckpoint {
    pub path: String,
    pub size: u64,
    pub sha256: Option<String>,
}

/// Append a checkpoint, keeping `is_best` on exactly the lowest-loss one.
///
/// Ties keep the earlier checkpoint as best. Returns whether the new
/// checkpoint became the best.
pub fn append_checkpoint(checkpoints: &mut Vec<Checkpoint>, mut checkpoint: Checkpoint) -> bool {
    let previous_best = checkpoints.iter().position(|c| c.is_best);
    let is_best = previous_best.is_none_or(|idx| checkpoint.loss < checkpoints[idx].loss);

    if is_best {
        if let Some(idx) = previous_best {
            checkpoints[idx].is_best = false;
        }
    }
    checkpoint.is_best = is_best;
    checkpoints.push(checkpoint);
    is_best
}

/// Persists checkpoint payloads.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    fn id(&self) -> &'static str;

    async fn persist(&self, draft: &CheckpointDraft) -> TrainingResult<StoredCheckpoint>;
}

/// Records nothing durable; reports a nominal size and a synthetic path.
#[derive(Debug, Clone)]
pub struct InMemoryCheckpointStore {
    nominal_size: u64,
}

impl InMemoryCheckpointStore {
    pub const DEFAULT_NOMINAL_SIZE: u64 = 500 * 1024 * 1024;

    #[must_use]
    pub fn new(nominal_size: u64) -> Self {
        Self { nominal_size }
    }
}

impl Default for InMemoryCheckpointStore {
    fn default() -> Self {
        Self::new(Self::DEFAULT_NOMINAL_SIZE)
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    fn id(&self) -> &'static str {
        "memory"
    }

    async fn persist(&self, draft: &CheckpointDraft) -> TrainingResult<StoredCheckpoint> {
        Ok(StoredCheckpoint {
            path: format!("/checkpoints/{}/epoch-{}", draft.job_id, draft.epoch),
            size: self.nominal_size,
            sha256: None,
        })
    }
}

/// Writes each checkpoint as a JSON manifest under a [`CheckpointLayout`].
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    layout: CheckpointLayout,
}

impl FileCheckpointStore {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { layout: CheckpointLayout::new(root) }
    }

    #[must_use]
    pub fn layout(&self) -> &CheckpointLayout {
        &self.layout
    }

    /// Epochs with a manifest on disk for `job_id`, ascending.
    pub async fn stored_epochs(&self, job_id: &TrainingJobId) -> TrainingResult<Vec<u32>> {
        let dir = self.layout.checkpoints_dir(job_id);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut epochs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(epoch) = CheckpointLayout::epoch_of(&entry.path()) {
                epochs.push(epoch);
            }
        }
        epochs.sort_unstable();
        Ok(epochs)
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    fn id(&self) -> &'static str {
        "file"
    }

    async fn persist(&self, draft: &CheckpointDraft) -> TrainingResult<StoredCheckpoint> {
        let dir = self.layout.checkpoints_dir(&draft.job_id);
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            TrainingError::Checkpoint(format!("failed to create {}: {e}", dir.display()))
        })?;

        let path = self.layout.manifest_path(&draft.job_id, draft.epoch);
        let bytes = serde_json::to_vec_pretty(draft)?;
        tokio::fs::write(&path, &bytes).await.map_err(|e| {
            TrainingError::Checkpoint(format!("failed to write {}: {e}", path.display()))
        })?;

        debug!(job_id = %draft.job_id, epoch = draft.epoch, path = %path.display(), "Wrote checkpoint manifest");
        Ok(StoredCheckpoint {
            path: path.display().to_string(),
            size: bytes.len() as u64,
            sha256: Some(hex::encode(Sha256::digest(&bytes))),
        })
    }
}
