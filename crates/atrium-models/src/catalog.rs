use serde::{Deserialize, Serialize};

use atrium_types::AgentType;

/// Retention priority of a cached model. Lower priorities are evicted first;
/// ordinary cleanup never evicts `Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl ModelPriority {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelPriority::Low => "low",
            ModelPriority::Medium => "medium",
            ModelPriority::High => "high",
            ModelPriority::Critical => "critical",
        }
    }

    /// Position in the eviction order; smaller evicts first.
    pub fn evict_rank(self) -> u8 {
        match self {
            ModelPriority::Low => 0,
            ModelPriority::Medium => 1,
            ModelPriority::High => 2,
            ModelPriority::Critical => 3,
        }
    }
}

/// Per-agent model assignment with invocation defaults and the memory the
/// loaded instance is expected to occupy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelProfile {
    pub model_id: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub estimated_memory_mb: f64,
    pub priority: ModelPriority,
}

/// Fixed agent-to-model table. Security and coordination hold critical
/// priority; analytics-grade roles sit lower so they yield memory first.
pub fn profile_for(agent_type: AgentType) -> ModelProfile {
    let (model_id, temperature, max_tokens, estimated_memory_mb, priority) = match agent_type {
        AgentType::Coordinator => ("mistral-nemo:latest", 0.05, 300, 4500.0, ModelPriority::Critical),
        AgentType::Security => ("gemma2:2b", 0.05, 150, 1500.0, ModelPriority::Critical),
        AgentType::Hvac => ("mistral:7b", 0.1, 200, 4500.0, ModelPriority::High),
        AgentType::Power => ("gemma2:2b", 0.1, 150, 1500.0, ModelPriority::High),
        AgentType::Network => ("qwen2.5vl:7b", 0.15, 200, 4500.0, ModelPriority::Medium),
    };
    ModelProfile {
        model_id: model_id.to_string(),
        temperature,
        max_tokens,
        estimated_memory_mb,
        priority,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn security_and_coordinator_are_critical() {
        assert_eq!(profile_for(AgentType::Security).priority, ModelPriority::Critical);
        assert_eq!(profile_for(AgentType::Coordinator).priority, ModelPriority::Critical);
    }

    #[test]
    fn eviction_rank_orders_low_first() {
        assert!(ModelPriority::Low.evict_rank() < ModelPriority::Medium.evict_rank());
        assert!(ModelPriority::Medium.evict_rank() < ModelPriority::High.evict_rank());
        assert!(ModelPriority::High.evict_rank() < ModelPriority::Critical.evict_rank());
    }

    #[test]
    fn every_agent_has_a_profile() {
        for agent in AgentType::workers() {
            let profile = profile_for(agent);
            assert!(!profile.model_id.is_empty());
            assert!(profile.estimated_memory_mb > 0.0);
        }
    }
}
