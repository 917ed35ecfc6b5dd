use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::AgentType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioType {
    CoolingCrisis,
    SecurityBreach,
    EnergyOptimization,
    RoutineMaintenance,
}

impl ScenarioType {
    pub fn as_str(self) -> &'static str {
        match self {
            ScenarioType::CoolingCrisis => "cooling_crisis",
            ScenarioType::SecurityBreach => "security_breach",
            ScenarioType::EnergyOptimization => "energy_optimization",
            ScenarioType::RoutineMaintenance => "routine_maintenance",
        }
    }

    pub fn all() -> [ScenarioType; 4] {
        [
            ScenarioType::CoolingCrisis,
            ScenarioType::SecurityBreach,
            ScenarioType::EnergyOptimization,
            ScenarioType::RoutineMaintenance,
        ]
    }
}

impl std::fmt::Display for ScenarioType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioState {
    Idle,
    Initializing,
    Running,
    Paused,
    Completed,
    Failed,
    Resetting,
}

impl ScenarioState {
    pub fn as_str(self) -> &'static str {
        match self {
            ScenarioState::Idle => "idle",
            ScenarioState::Initializing => "initializing",
            ScenarioState::Running => "running",
            ScenarioState::Paused => "paused",
            ScenarioState::Completed => "completed",
            ScenarioState::Failed => "failed",
            ScenarioState::Resetting => "resetting",
        }
    }

    /// Terminal states a new scenario may be triggered from.
    pub fn can_trigger(self) -> bool {
        matches!(
            self,
            ScenarioState::Idle | ScenarioState::Completed | ScenarioState::Failed
        )
    }
}

/// One scripted event injection plus the responses it expects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioStep {
    pub step_id: String,
    pub description: String,
    pub event_type: String,
    pub event_data: Value,
    #[serde(default)]
    pub delay_secs: f64,
    #[serde(default = "default_step_timeout")]
    pub timeout_secs: f64,
    #[serde(default)]
    pub expected_response_topics: Vec<String>,
    #[serde(default)]
    pub required_agents: Vec<AgentType>,
}

fn default_step_timeout() -> f64 {
    30.0
}

impl ScenarioStep {
    pub fn new(step_id: impl Into<String>, event_type: impl Into<String>, event_data: Value) -> Self {
        Self {
            step_id: step_id.into(),
            description: String::new(),
            event_type: event_type.into(),
            event_data,
            delay_secs: 0.0,
            timeout_secs: default_step_timeout(),
            expected_response_topics: Vec::new(),
            required_agents: Vec::new(),
        }
    }
}

/// Scenario-specific success requirements beyond the step-count ratios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioRequirement {
    LockdownInitiated,
    NetworkIsolation,
    EnergySavings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioConfig {
    pub scenario_id: String,
    pub name: String,
    pub description: String,
    pub scenario_type: ScenarioType,
    pub max_duration_secs: f64,
    pub steps: Vec<ScenarioStep>,
    #[serde(default)]
    pub cleanup_steps: Vec<ScenarioStep>,
    /// Fraction of a step's required agents that must respond for the step
    /// to count as successful.
    #[serde(default = "default_step_quorum")]
    pub step_quorum_ratio: f64,
    /// Fraction of steps that must complete for the scenario to succeed.
    #[serde(default = "default_completion_ratio")]
    pub completion_ratio: f64,
    /// Fraction of steps that must succeed for the scenario to succeed.
    #[serde(default = "default_success_ratio")]
    pub success_ratio: f64,
    #[serde(default)]
    pub min_unique_agents: usize,
    #[serde(default)]
    pub required_actions: Vec<ScenarioRequirement>,
}

fn default_step_quorum() -> f64 {
    0.8
}

fn default_completion_ratio() -> f64 {
    0.8
}

fn default_success_ratio() -> f64 {
    0.6
}

/// Mutable progress for a single step while a scenario runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioStepRuntime {
    pub step_id: String,
    pub start: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
    pub completed: bool,
    pub success: bool,
    #[serde(default)]
    pub agent_responses: BTreeMap<AgentType, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScenarioMetrics {
    pub total_agent_responses: usize,
    pub unique_agents_responded: usize,
    pub total_events: usize,
    pub completion_rate: f64,
    pub average_step_secs: f64,
    #[serde(default)]
    pub lockdowns_initiated: u64,
    #[serde(default)]
    pub network_isolations: u64,
    #[serde(default)]
    pub energy_savings_achieved: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub scenario_id: String,
    pub scenario_type: ScenarioType,
    pub final_state: ScenarioState,
    pub start: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
    pub duration_secs: f64,
    pub steps_completed: usize,
    pub steps_total: usize,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub steps: Vec<ScenarioStepRuntime>,
    #[serde(default)]
    pub events: Vec<Value>,
    #[serde(default)]
    pub performance_metrics: ScenarioMetrics,
}

impl ScenarioResult {
    pub fn started(config: &ScenarioConfig, start: DateTime<Utc>) -> Self {
        Self {
            scenario_id: config.scenario_id.clone(),
            scenario_type: config.scenario_type,
            final_state: ScenarioState::Initializing,
            start,
            end: None,
            duration_secs: 0.0,
            steps_completed: 0,
            steps_total: config.steps.len(),
            success: false,
            error: None,
            steps: Vec::new(),
            events: Vec::new(),
            performance_metrics: ScenarioMetrics::default(),
        }
    }
}
