//! On-disk placement of checkpoint manifests.

use crate::job::TrainingJobId;
use std::path::{Path, PathBuf};

const MANIFEST_PREFIX: &str = "epoch-";
const MANIFEST_EXT: &str = "json";

/// Maps `(job, epoch)` to `<root>/<job_id>/checkpoints/epoch-<n>.json`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointLayout {
    root: PathBuf,
}

impl CheckpointLayout {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn checkpoints_dir(&self, job_id: &TrainingJobId) -> PathBuf {
        self.root.join(job_id.0.as_str()).join("checkpoints")
    }

    #[must_use]
    pub fn manifest_path(&self, job_id: &TrainingJobId, epoch: u32) -> PathBuf {
        self.checkpoints_dir(job_id).join(format!("{MANIFEST_PREFIX}{epoch}.{MANIFEST_EXT}"))
    }

    /// The epoch a manifest file name encodes, or `None` for any other file.
    #[must_use]
    pub fn epoch_of(path: &Path) -> Option<u32> {
        if path.extension()? != MANIFEST_EXT {
            return None;
        }
        path.file_stem()?.to_str()?.strip_prefix(MANIFEST_PREFIX)?.parse().ok()
    }
}
