use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use atrium_types::ScenarioType;

use crate::bus::BusConfig;

/// Per-scenario wall-clock budgets in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioDurations {
    #[serde(default = "default_cooling_crisis_secs")]
    pub cooling_crisis: f64,
    #[serde(default = "default_security_breach_secs")]
    pub security_breach: f64,
    #[serde(default = "default_energy_optimization_secs")]
    pub energy_optimization: f64,
    #[serde(default = "default_routine_maintenance_secs")]
    pub routine_maintenance: f64,
}

impl Default for ScenarioDurations {
    fn default() -> Self {
        Self {
            cooling_crisis: default_cooling_crisis_secs(),
            security_breach: default_security_breach_secs(),
            energy_optimization: default_energy_optimization_secs(),
            routine_maintenance: default_routine_maintenance_secs(),
        }
    }
}

impl ScenarioDurations {
    pub fn for_scenario(&self, scenario_type: ScenarioType) -> f64 {
        match scenario_type {
            ScenarioType::CoolingCrisis => self.cooling_crisis,
            ScenarioType::SecurityBreach => self.security_breach,
            ScenarioType::EnergyOptimization => self.energy_optimization,
            ScenarioType::RoutineMaintenance => self.routine_maintenance,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_max_concurrent_models")]
    pub max_concurrent_models: usize,
    #[serde(default = "default_memory_threshold_gb")]
    pub memory_threshold_gb: f64,
    #[serde(default = "default_max_memory_gb")]
    pub max_memory_gb: f64,
    /// Non-model memory attributed to the process when checking the hard cap.
    #[serde(default = "default_baseline_memory_mb")]
    pub baseline_memory_mb: f64,
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    #[serde(default = "default_worker_timeout_secs")]
    pub worker_timeout_secs: u64,
    #[serde(default)]
    pub scenario_max_durations: ScenarioDurations,
    #[serde(default = "default_recovery_timeout_secs")]
    pub recovery_timeout_secs: u64,
    #[serde(default = "default_kv_ttl_secs")]
    pub kv_ttl_secs: u64,
    #[serde(default = "default_bus_queue_capacity")]
    pub bus_queue_capacity: usize,
    #[serde(default = "default_bus_subscription_capacity")]
    pub bus_subscription_capacity: usize,
    #[serde(default = "default_bus_drain_deadline_secs")]
    pub bus_drain_deadline_secs: u64,
    #[serde(default = "default_handler_slow_warn_ms")]
    pub handler_slow_warn_ms: u64,
    /// Directory for JSONL file logs; file logging is off when unset.
    #[serde(default)]
    pub logs_dir: Option<String>,
    #[serde(default = "default_log_retention_days")]
    pub log_retention_days: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_models: default_max_concurrent_models(),
            memory_threshold_gb: default_memory_threshold_gb(),
            max_memory_gb: default_max_memory_gb(),
            baseline_memory_mb: default_baseline_memory_mb(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            worker_timeout_secs: default_worker_timeout_secs(),
            scenario_max_durations: ScenarioDurations::default(),
            recovery_timeout_secs: default_recovery_timeout_secs(),
            kv_ttl_secs: default_kv_ttl_secs(),
            bus_queue_capacity: default_bus_queue_capacity(),
            bus_subscription_capacity: default_bus_subscription_capacity(),
            bus_drain_deadline_secs: default_bus_drain_deadline_secs(),
            handler_slow_warn_ms: default_handler_slow_warn_ms(),
            logs_dir: None,
            log_retention_days: default_log_retention_days(),
        }
    }
}

impl OrchestratorConfig {
    pub fn from_yaml_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&raw)?;
        Ok(config)
    }

    pub fn bus_config(&self) -> BusConfig {
        BusConfig {
            queue_capacity: self.bus_queue_capacity,
            subscription_capacity: self.bus_subscription_capacity,
            drain_deadline: Duration::from_secs(self.bus_drain_deadline_secs),
            handler_slow_warn_ms: self.handler_slow_warn_ms,
        }
    }

    pub fn worker_timeout(&self) -> Duration {
        Duration::from_secs(self.worker_timeout_secs)
    }

    pub fn kv_ttl(&self) -> Duration {
        Duration::from_secs(self.kv_ttl_secs)
    }

    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_secs)
    }
}

fn default_max_concurrent_models() -> usize {
    2
}

fn default_memory_threshold_gb() -> f64 {
    7.0
}

fn default_max_memory_gb() -> f64 {
    8.0
}

fn default_baseline_memory_mb() -> f64 {
    1024.0
}

fn default_cleanup_interval_secs() -> u64 {
    30
}

fn default_worker_timeout_secs() -> u64 {
    60
}

fn default_recovery_timeout_secs() -> u64 {
    60
}

fn default_kv_ttl_secs() -> u64 {
    86_400
}

fn default_bus_queue_capacity() -> usize {
    256
}

fn default_bus_subscription_capacity() -> usize {
    64
}

fn default_bus_drain_deadline_secs() -> u64 {
    5
}

fn default_handler_slow_warn_ms() -> u64 {
    1000
}

fn default_log_retention_days() -> u64 {
    7
}

fn default_cooling_crisis_secs() -> f64 {
    120.0
}

fn default_security_breach_secs() -> f64 {
    90.0
}

fn default_energy_optimization_secs() -> f64 {
    180.0
}

fn default_routine_maintenance_secs() -> f64 {
    60.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.max_concurrent_models, 2);
        assert_eq!(config.memory_threshold_gb, 7.0);
        assert_eq!(config.max_memory_gb, 8.0);
        assert_eq!(config.cleanup_interval_secs, 30);
        assert_eq!(config.worker_timeout_secs, 60);
        assert_eq!(config.recovery_timeout_secs, 60);
        assert_eq!(config.kv_ttl_secs, 86_400);
        assert_eq!(config.scenario_max_durations.cooling_crisis, 120.0);
        assert_eq!(config.scenario_max_durations.security_breach, 90.0);
        assert_eq!(config.scenario_max_durations.energy_optimization, 180.0);
        assert_eq!(config.scenario_max_durations.routine_maintenance, 60.0);
        assert!(config.logs_dir.is_none());
        assert_eq!(config.log_retention_days, 7);
    }

    #[test]
    fn yaml_overrides_apply_over_defaults() {
        let raw = "max_concurrent_models: 3\nscenario_max_durations:\n  security_breach: 45\n";
        let config: OrchestratorConfig = serde_yaml::from_str(raw).unwrap();
        assert_eq!(config.max_concurrent_models, 3);
        assert_eq!(config.scenario_max_durations.security_breach, 45.0);
        assert_eq!(config.scenario_max_durations.cooling_crisis, 120.0);
        assert_eq!(config.worker_timeout_secs, 60);
    }

    #[test]
    fn duration_lookup_covers_all_scenarios() {
        let durations = ScenarioDurations::default();
        assert_eq!(durations.for_scenario(ScenarioType::CoolingCrisis), 120.0);
        assert_eq!(durations.for_scenario(ScenarioType::RoutineMaintenance), 60.0);
    }
}
