use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// Points kept per metric before the oldest are evicted.
pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

fn default_capacity() -> usize {
    DEFAULT_HISTORY_CAPACITY
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub step: u64,
    pub epoch: u32,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

/// Which direction counts as "best" for a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricGoal {
    Minimize,
    Maximize,
}

/// Bounded time series for one scalar metric plus running aggregates.
///
/// Aggregates cover every recorded value, including points already evicted
/// from `history`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricHistory {
    pub goal: MetricGoal,
    pub current: f64,
    pub best: f64,
    pub worst: f64,
    pub average: f64,
    pub count: u64,
    pub history: VecDeque<MetricPoint>,
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

impl MetricHistory {
    #[must_use]
    pub fn new(goal: MetricGoal) -> Self {
        Self::with_capacity(goal, DEFAULT_HISTORY_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(goal: MetricGoal, capacity: usize) -> Self {
        Self {
            goal,
            current: 0.0,
            best: 0.0,
            worst: 0.0,
            average: 0.0,
            count: 0,
            history: VecDeque::with_capacity(capacity.min(DEFAULT_HISTORY_CAPACITY)),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&mut self, point: MetricPoint) {
        let value = point.value;

        if self.count == 0 {
            self.best = value;
            self.worst = value;
        } else {
            match self.goal {
                MetricGoal::Minimize => {
                    self.best = self.best.min(value);
                    self.worst = self.worst.max(value);
                }
                MetricGoal::Maximize => {
                    self.best = self.best.max(value);
                    self.worst = self.worst.min(value);
                }
            }
        }

        self.count += 1;
        self.average += (value - self.average) / self.count as f64;
        self.current = value;

        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(point);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Metrics tracked for a job. `loss` is always present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub loss: MetricHistory,
    pub learning_rate: MetricHistory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_loss: Option<MetricHistory>,
    #[serde(default)]
    pub custom: BTreeMap<String, MetricHistory>,
}

impl Default for TrainingMetrics {
    fn default() -> Self {
        Self {
            loss: MetricHistory::new(MetricGoal::Minimize),
            learning_rate: MetricHistory::new(MetricGoal::Minimize),
            validation_loss: None,
            custom: BTreeMap::new(),
        }
    }
}

impl TrainingMetrics {
    pub fn record_validation_loss(&mut self, point: MetricPoint) {
        self.validation_loss
            .get_or_insert_with(|| MetricHistory::new(MetricGoal::Minimize))
            .record(point);
    }

    /// Record a named metric; names containing "loss" or "perplexity" are minimized.
    pub fn record_custom(&mut self, name: &str, point: MetricPoint) {
        let goal = if name.contains("loss") || name.contains("perplexity") {
            MetricGoal::Minimize
        } else {
            MetricGoal::Maximize
        };
        self.custom
            .entry(name.to_string())
            .or_insert_with(|| MetricHistory::new(goal))
            .record(point);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(step: u64, value: f64) -> MetricPoint {
        MetricPoint { step, epoch: 1, value, timestamp: Utc::now() }
    }

    #[test]
    fn test_running_aggregates() {
        let mut loss = MetricHistory::new(MetricGoal::Minimize);
        for (i, v) in [2.0, 1.0, 3.0].into_iter().enumerate() {
            loss.record(point(i as u64 + 1, v));
        }
        assert!((loss.current - 3.0).abs() < f64::EPSILON);
        assert!((loss.best - 1.0).abs() < f64::EPSILON);
        assert!((loss.worst - 3.0).abs() < f64::EPSILON);
        assert!((loss.average - 2.0).abs() < 1e-12);
        assert_eq!(loss.count, 3);
    }

    #[test]
    fn test_maximize_goal() {
        let mut accuracy = MetricHistory::new(MetricGoal::Maximize);
        accuracy.record(point(1, 0.5));
        accuracy.record(point(2, 0.9));
        assert!((accuracy.best - 0.9).abs() < f64::EPSILON);
        assert!((accuracy.worst - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_history_evicts_oldest() {
        let mut loss = MetricHistory::with_capacity(MetricGoal::Minimize, 3);
        for step in 1..=5 {
            loss.record(point(step, step as f64));
        }
        let steps: Vec<u64> = loss.history.iter().map(|p| p.step).collect();
        assert_eq!(steps, vec![3, 4, 5]);
        assert_eq!(loss.count, 5);
        assert!((loss.best - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_default_capacity_bound() {
        let mut loss = MetricHistory::new(MetricGoal::Minimize);
        for step in 0..1500 {
            loss.record(point(step, 1.0));
        }
        assert_eq!(loss.history.len(), DEFAULT_HISTORY_CAPACITY);
        assert_eq!(loss.history.front().map(|p| p.step), Some(500));
    }

    #[test]
    fn test_custom_metric_goal() {
        let mut metrics = TrainingMetrics::default();
        metrics.record_custom("accuracy", point(1, 0.4));
        metrics.record_custom("accuracy", point(2, 0.8));
        metrics.record_custom("perplexity", point(1, 9.0));
        metrics.record_custom("perplexity", point(2, 4.0));
        assert!((metrics.custom["accuracy"].best - 0.8).abs() < f64::EPSILON);
        assert!((metrics.custom["perplexity"].best - 4.0).abs() < f64::EPSILON);
    }
}
