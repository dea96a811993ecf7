//! Run files.
//!
//! A run file is a TOML description of one fine-tuning run:
//!
//! ```toml
//! name = "support-bot"
//!
//! [dataset]
//! path = "support.jsonl"
//!
//! [base_model]
//! id = "base-small"
//! name = "Base Small"
//! provider = "custom"
//!
//! [base_model.pricing.training]
//! per_token = 0.000008
//!
//! [hyperparameters]
//! epochs = 2
//! ```
//!
//! Dataset paths are resolved against the directory holding the run file.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tuneforge_training::{
    BaseModel, Dataset, DatasetFormat, FineTuningConfig, Hyperparameters, TrainingOptions, ValidationLimits,
};

#[derive(Debug, Clone, Deserialize)]
pub struct DatasetSource {
    pub path: PathBuf,
    #[serde(default)]
    pub format: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunSpec {
    pub name: String,
    pub dataset: DatasetSource,
    pub base_model: BaseModel,
    #[serde(default)]
    pub hyperparameters: Hyperparameters,
    #[serde(default)]
    pub training_options: TrainingOptions,
    /// Directory the run file lives in.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl RunSpec {
    pub fn load(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read run file {}", path.display()))?;
        let mut spec: Self =
            toml::from_str(&content).with_context(|| format!("Failed to parse run file {}", path.display()))?;
        spec.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(spec)
    }

    pub fn dataset_path(&self) -> PathBuf {
        if self.dataset.path.is_absolute() {
            self.dataset.path.clone()
        } else {
            self.base_dir.join(&self.dataset.path)
        }
    }

    /// Read and validate the dataset, then assemble the config.
    ///
    /// Fails if the dataset cannot be parsed, fails validation, or the
    /// hyperparameters are out of range.
    pub async fn build(&self, limits: &ValidationLimits) -> Result<FineTuningConfig> {
        let path = self.dataset_path();
        let format = resolve_format(&path, self.dataset.format.as_deref())?;
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read dataset {}", path.display()))?;
        let size = bytes.len() as u64;

        let (records, validation) = tuneforge_training::validate_dataset(bytes, format, limits.clone())
            .await
            .with_context(|| format!("Failed to parse dataset {}", path.display()))?;

        let dataset_name = path
            .file_name()
            .map_or_else(|| self.name.clone(), |n| n.to_string_lossy().into_owned());
        let dataset = Dataset::new(dataset_name, format, size, &records, validation)
            .with_metadata("source", Value::String(path.display().to_string()));

        FineTuningConfig::new(
            self.name.clone(),
            self.base_model.clone(),
            dataset,
            self.hyperparameters.clone(),
            self.training_options.clone(),
        )
        .with_context(|| format!("Run '{}' is not trainable", self.name))
    }
}

/// An explicit format wins; otherwise the file extension decides.
pub fn resolve_format(path: &Path, explicit: Option<&str>) -> Result<DatasetFormat> {
    if let Some(format) = explicit {
        return format.parse().with_context(|| format!("Unknown dataset format '{format}'"));
    }
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .with_context(|| format!("Cannot infer dataset format of {}; pass --format", path.display()))?;
    extension
        .parse()
        .with_context(|| format!("Cannot infer dataset format of {}; pass --format", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const RUN: &str = r#"
name = "support-bot"

[dataset]
path = "data/support.jsonl"

[base_model]
id = "base-small"
name = "Base Small"
provider = "custom"

[base_model.pricing.training]
per_token = 0.000008

[hyperparameters]
epochs = 2
scheduler = "cosine"
"#;

    #[test]
    fn test_resolve_format() {
        assert_eq!(resolve_format(Path::new("a.jsonl"), None).unwrap(), DatasetFormat::Jsonl);
        assert_eq!(resolve_format(Path::new("a.TXT"), None).unwrap(), DatasetFormat::Text);
        assert_eq!(resolve_format(Path::new("a.data"), Some("csv")).unwrap(), DatasetFormat::Csv);
        assert!(resolve_format(Path::new("noext"), None).is_err());
        assert!(resolve_format(Path::new("a.parquet"), None).is_err());
    }

    #[tokio::test]
    async fn test_load_and_build() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir(temp.path().join("data")).unwrap();
        let content: String = (0..12)
            .map(|i| format!("{{\"prompt\":\"question {i}\",\"completion\":\"answer {i}\"}}\n"))
            .collect();
        std::fs::write(temp.path().join("data/support.jsonl"), content).unwrap();
        let run_path = temp.path().join("run.toml");
        std::fs::write(&run_path, RUN).unwrap();

        let spec = RunSpec::load(&run_path).unwrap();
        assert_eq!(spec.dataset_path(), temp.path().join("data/support.jsonl"));
        assert_eq!(spec.hyperparameters.epochs, 2);
        assert_eq!(spec.hyperparameters.batch_size, Hyperparameters::default().batch_size);

        let config = spec.build(&ValidationLimits::default()).await.unwrap();
        assert_eq!(config.name, "support-bot");
        assert_eq!(config.dataset.record_count, 12);
        assert_eq!(config.dataset.format, DatasetFormat::Jsonl);
        let source = temp.path().join("data/support.jsonl").display().to_string();
        assert_eq!(config.dataset.metadata.get("source"), Some(&Value::String(source)));
        assert!(config.cost_estimation.total_cost > 0.0);
    }

    #[tokio::test]
    async fn test_build_rejects_invalid_dataset() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir(temp.path().join("data")).unwrap();
        // Too few records to be accepted.
        std::fs::write(temp.path().join("data/support.jsonl"), "{\"prompt\":\"q\",\"completion\":\"a\"}\n").unwrap();
        let run_path = temp.path().join("run.toml");
        std::fs::write(&run_path, RUN).unwrap();

        let err = RunSpec::load(&run_path).unwrap().build(&ValidationLimits::default()).await.unwrap_err();
        assert!(format!("{err:#}").contains("dataset rejected"));
    }
}
