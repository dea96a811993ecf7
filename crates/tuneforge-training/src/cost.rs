//! Cost estimation for fine-tuning runs.
//!
//! The breakdown is a reporting view: data preparation, evaluation and
//! deployment are fixed shares of the total while training and storage are
//! the literal computed components, so the breakdown does not sum to
//! `total_cost`.

use crate::config::FineTuningConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub data_preparation: f64,
    pub training: f64,
    pub evaluation: f64,
    pub deployment: f64,
    pub storage: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostEstimation {
    pub training_cost: f64,
    pub storage_cost: f64,
    pub inference_cost: f64,
    pub total_cost: f64,
    /// Whole minutes, rounded up.
    pub estimated_minutes: u64,
    pub currency: String,
    pub breakdown: CostBreakdown,
}

/// Constants behind the estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostModel {
    /// Tokens per character of raw record content.
    pub token_inflation: f64,
    pub checkpoint_size_bytes: u64,
    /// Monthly storage price per byte.
    pub storage_rate_per_byte: f64,
    /// Flat cost of sample inference testing.
    pub inference_cost: f64,
    pub throughput_tokens_per_sec: f64,
    pub currency: String,
    pub data_preparation_share: f64,
    pub evaluation_share: f64,
    pub deployment_share: f64,
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            token_inflation: 1.5,
            checkpoint_size_bytes: 500 * 1024 * 1024,
            storage_rate_per_byte: 0.000_001,
            inference_cost: 10.0,
            throughput_tokens_per_sec: 1000.0,
            currency: "USD".to_string(),
            data_preparation_share: 0.10,
            evaluation_share: 0.05,
            deployment_share: 0.05,
        }
    }
}

impl CostModel {
    #[must_use]
    pub fn estimated_tokens(&self, config: &FineTuningConfig) -> f64 {
        config.dataset.record_count as f64 * config.dataset.average_length() * self.token_inflation
    }

    #[must_use]
    pub fn estimate(&self, config: &FineTuningConfig) -> CostEstimation {
        let epochs = f64::from(config.hyperparameters.epochs);
        let total_tokens = self.estimated_tokens(config);

        let training_cost = total_tokens * epochs * config.base_model.pricing.training.per_token;
        let checkpoints = f64::from(config.training_options.checkpoint_count(config.hyperparameters.epochs));
        let storage_cost = self.checkpoint_size_bytes as f64 * checkpoints * self.storage_rate_per_byte;
        let inference_cost = self.inference_cost;
        let total_cost = training_cost + storage_cost + inference_cost;

        let minutes = (total_tokens / self.throughput_tokens_per_sec / 60.0).ceil();
        let estimated_minutes = if minutes.is_finite() && minutes > 0.0 { minutes as u64 } else { 0 };

        CostEstimation {
            training_cost,
            storage_cost,
            inference_cost,
            total_cost,
            estimated_minutes,
            currency: self.currency.clone(),
            breakdown: CostBreakdown {
                data_preparation: total_cost * self.data_preparation_share,
                training: training_cost,
                evaluation: total_cost * self.evaluation_share,
                deployment: total_cost * self.deployment_share,
                storage: storage_cost,
            },
        }
    }
}

/// Estimate with the default [`CostModel`].
#[must_use]
pub fn estimate_cost(config: &FineTuningConfig) -> CostEstimation {
    CostModel::default().estimate(config)
}
