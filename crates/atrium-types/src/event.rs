use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Well-known topics the core publishes and consumes. Topics are exact
/// dotted strings; there is no pattern matching.
pub mod topics {
    pub const HVAC_TEMPERATURE_CHANGED: &str = "hvac.temperature.changed";
    pub const HVAC_COOLING_DECISION: &str = "hvac.cooling.decision";
    pub const POWER_OPTIMIZATION_DECISION: &str = "power.optimization.decision";
    pub const SECURITY_EVENT: &str = "facility.security.event";
    pub const SECURITY_ASSESSMENT_DECISION: &str = "security.assessment.decision";
    pub const NETWORK_EVENT: &str = "facility.network.event";
    pub const NETWORK_ASSESSMENT: &str = "facility.network.assessment";
    pub const NETWORK_ASSESSMENT_DECISION: &str = "network.assessment.decision";
    pub const COORDINATION_DIRECTIVE: &str = "facility.coordination.directive";
    pub const COORDINATION_CONFLICT: &str = "facility.coordination.conflict";
    pub const COORDINATION_CONFLICT_RESOLUTION: &str = "facility.coordination.conflict_resolution";
    pub const COORDINATION_SCENARIO: &str = "facility.coordination.scenario";
    pub const COORDINATION_SCENARIO_ORCHESTRATION: &str =
        "facility.coordination.scenario_orchestration";
    pub const SCENARIO_START: &str = "demo.scenario.start";
    pub const SCENARIO_INITIALIZED: &str = "demo.scenario.initialized";
    pub const SCENARIO_PAUSED: &str = "demo.scenario.paused";
    pub const SCENARIO_RESUMED: &str = "demo.scenario.resumed";
    pub const SCENARIO_STOPPED: &str = "demo.scenario.stopped";
    pub const SCENARIO_COMPLETED: &str = "demo.scenario.completed";
    pub const SCENARIO_FAILED: &str = "demo.scenario.failed";
    pub const SCENARIO_RESET: &str = "demo.scenario.reset";
    pub const SECURITY_LOCKDOWN_INITIATED: &str = "security.lockdown.initiated";
}

/// An immutable message on the bus. The payload shape is typed per topic;
/// correlation across agents happens through `request_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub topic: String,
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl Event {
    /// Build an event, lifting a `request_id` out of the payload when the
    /// producer embedded one there.
    pub fn new(topic: impl Into<String>, payload: Value) -> Self {
        let request_id = payload
            .get("request_id")
            .and_then(Value::as_str)
            .map(str::to_string);
        Self {
            topic: topic.into(),
            payload,
            request_id,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_lifts_request_id_from_payload() {
        let event = Event::new(topics::SECURITY_EVENT, json!({"request_id": "r-9", "event_type": "routine_check"}));
        assert_eq!(event.request_id.as_deref(), Some("r-9"));
    }

    #[test]
    fn new_leaves_request_id_empty_when_absent() {
        let event = Event::new(topics::HVAC_TEMPERATURE_CHANGED, json!({"temperature": 22.5}));
        assert!(event.request_id.is_none());
    }
}
