use std::collections::BTreeMap;

use serde::Serialize;

/// Per-worker counters, updated only by the owning worker.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkerMetrics {
    pub responses: u64,
    pub fallback_responses: u64,
    pub avg_response_ms: f64,
    pub decisions: BTreeMap<String, u64>,
}

impl WorkerMetrics {
    pub fn record(&mut self, response_time_ms: u64, decision_class: Option<String>, fallback: bool) {
        self.responses += 1;
        if fallback {
            self.fallback_responses += 1;
        }
        let n = self.responses as f64;
        self.avg_response_ms = (self.avg_response_ms * (n - 1.0) + response_time_ms as f64) / n;
        if let Some(class) = decision_class {
            *self.decisions.entry(class).or_insert(0) += 1;
        }
    }

    pub fn report(&self, label: &str) -> String {
        if self.responses == 0 {
            return format!("{label}: no decisions yet");
        }
        let total: u64 = self.decisions.values().sum();
        let mut parts = Vec::new();
        for (class, count) in &self.decisions {
            let share = if total > 0 {
                *count as f64 / total as f64 * 100.0
            } else {
                0.0
            };
            parts.push(format!("{class}: {count} ({share:.1}%)"));
        }
        format!(
            "{label}: {} responses, {:.0}ms avg. Decisions: {}",
            self.responses,
            self.avg_response_ms,
            parts.join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_average_matches_arithmetic_mean() {
        let mut metrics = WorkerMetrics::default();
        metrics.record(100, Some("low".to_string()), false);
        metrics.record(300, Some("high".to_string()), false);
        assert_eq!(metrics.responses, 2);
        assert!((metrics.avg_response_ms - 200.0).abs() < 1e-9);
    }

    #[test]
    fn decision_classes_accumulate() {
        let mut metrics = WorkerMetrics::default();
        metrics.record(10, Some("medium".to_string()), false);
        metrics.record(10, Some("medium".to_string()), true);
        assert_eq!(metrics.decisions["medium"], 2);
        assert_eq!(metrics.fallback_responses, 1);
        assert!(metrics.report("hvac").contains("medium: 2"));
    }
}
