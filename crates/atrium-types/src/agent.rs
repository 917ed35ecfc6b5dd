use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Role a worker plays in the facility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
    Hvac,
    Power,
    Security,
    Network,
    Coordinator,
}

impl AgentType {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentType::Hvac => "hvac",
            AgentType::Power => "power",
            AgentType::Security => "security",
            AgentType::Network => "network",
            AgentType::Coordinator => "coordinator",
        }
    }

    /// The four specialist roles the coordinator aggregates over.
    pub fn workers() -> [AgentType; 4] {
        [
            AgentType::Hvac,
            AgentType::Power,
            AgentType::Security,
            AgentType::Network,
        ]
    }

    /// Single normalization point for agent types arriving in untrusted
    /// payloads. Accepts the canonical lowercase name plus the `_agent`
    /// suffixed spelling used by older dashboards.
    pub fn parse(raw: &str) -> Option<AgentType> {
        let name = raw.trim().to_ascii_lowercase();
        let name = name.strip_suffix("_agent").unwrap_or(&name);
        match name {
            "hvac" => Some(AgentType::Hvac),
            "power" => Some(AgentType::Power),
            "security" => Some(AgentType::Security),
            "network" => Some(AgentType::Network),
            "coordinator" => Some(AgentType::Coordinator),
            _ => None,
        }
    }
}

impl std::fmt::Display for AgentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a worker task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Processing,
    Waiting,
    Error,
    Offline,
}

/// Outcome classification carried on every published response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Success,
    Fallback,
    Failed,
}

/// Urgency of a facility event. Greater means more urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl EventPriority {
    pub fn as_str(self) -> &'static str {
        match self {
            EventPriority::Low => "low",
            EventPriority::Medium => "medium",
            EventPriority::High => "high",
            EventPriority::Critical => "critical",
        }
    }

    pub fn parse(raw: &str) -> Option<EventPriority> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "low" => Some(EventPriority::Low),
            "medium" => Some(EventPriority::Medium),
            "high" => Some(EventPriority::High),
            "critical" => Some(EventPriority::Critical),
            _ => None,
        }
    }
}

/// Severity attached to directives and log-facing events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl EventSeverity {
    pub fn as_str(self) -> &'static str {
        match self {
            EventSeverity::Debug => "debug",
            EventSeverity::Info => "info",
            EventSeverity::Warning => "warning",
            EventSeverity::Error => "error",
            EventSeverity::Critical => "critical",
        }
    }
}

/// Structured decision a specialist publishes on its output topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    pub request_id: String,
    pub agent_type: AgentType,
    pub status: ResponseStatus,
    pub decision: Value,
    #[serde(default)]
    pub reasoning: String,
    pub confidence: f64,
    pub response_time_ms: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub fallback: bool,
}

impl AgentResponse {
    pub fn new(request_id: impl Into<String>, agent_type: AgentType, decision: Value) -> Self {
        Self {
            request_id: request_id.into(),
            agent_type,
            status: ResponseStatus::Success,
            decision,
            reasoning: String::new(),
            confidence: 0.0,
            response_time_ms: 0,
            timestamp: Utc::now(),
            fallback: false,
        }
    }
}

/// Cross-agent instruction issued by the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDirective {
    pub request_id: String,
    pub agent_type: AgentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_agent: Option<AgentType>,
    pub directive_type: String,
    pub directive: String,
    pub priority: EventSeverity,
    #[serde(default)]
    pub context: Value,
    #[serde(default)]
    pub reasoning: String,
    pub timestamp: DateTime<Utc>,
}

impl AgentDirective {
    pub fn new(directive_type: impl Into<String>, directive: impl Into<String>) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            agent_type: AgentType::Coordinator,
            target_agent: None,
            directive_type: directive_type.into(),
            directive: directive.into(),
            priority: EventSeverity::Info,
            context: Value::Null,
            reasoning: String::new(),
            timestamp: Utc::now(),
        }
    }
}

/// Versioned, checksummed snapshot of a worker's internal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub agent_id: String,
    pub agent_type: AgentType,
    pub state_data: Value,
    pub last_updated: DateTime<Utc>,
    pub version: u64,
    pub checksum: String,
}

impl AgentState {
    pub fn new(agent_id: impl Into<String>, agent_type: AgentType, state_data: Value) -> Self {
        Self {
            agent_id: agent_id.into(),
            agent_type,
            state_data,
            last_updated: Utc::now(),
            version: 1,
            checksum: String::new(),
        }
    }
}
