use std::collections::BTreeMap;

use serde_json::{json, Value};

use atrium_types::{topics, AgentType};

use crate::framework::Specialist;

/// Power optimization. Sits downstream of HVAC: the upstream cooling
/// decision is its primary context, since cooling dominates facility load.
pub struct PowerSpecialist;

fn cooling_context(payload: &Value) -> Option<&str> {
    payload
        .get("decision")
        .and_then(|decision| decision.get("cooling_level"))
        .and_then(Value::as_str)
}

impl Specialist for PowerSpecialist {
    fn agent_type(&self) -> AgentType {
        AgentType::Power
    }

    fn input_topics(&self) -> Vec<&'static str> {
        vec![topics::HVAC_COOLING_DECISION]
    }

    fn output_topic(&self) -> &'static str {
        topics::POWER_OPTIMIZATION_DECISION
    }

    fn fallback_key(&self) -> &'static str {
        "power_optimization"
    }

    fn build_prompt(&self, payload: &Value) -> String {
        let cooling = cooling_context(payload).unwrap_or("unknown");
        format!(
            "You are the power management specialist for a server facility. \
HVAC just committed to cooling level `{cooling}`. Recommend a power \
distribution adjustment and respond as JSON with keys power_optimization \
(a short directive), optimization_level (one of conservative, standard, \
aggressive), reasoning, and confidence (0-100)."
        )
    }

    fn decision_from_structured(&self, mut value: Value) -> Value {
        if let Some(object) = value.as_object_mut() {
            if !object.contains_key("power_optimization") {
                object.insert(
                    "power_optimization".to_string(),
                    json!("maintain current power distribution"),
                );
            }
            object.remove("confidence");
            object.remove("reasoning");
        }
        value
    }

    fn decision_from_raw(&self, raw: &str) -> Value {
        json!({ "power_optimization": raw })
    }

    fn fallback_decision(&self, payload: &Value) -> Value {
        json!({
            "power_optimization": "maintain current power distribution",
            "optimization_level": "conservative",
            "cooling_context": cooling_context(payload).unwrap_or("unknown"),
        })
    }

    fn decision_class(&self, decision: &Value) -> Option<String> {
        Some(
            decision
                .get("optimization_level")
                .and_then(Value::as_str)
                .unwrap_or("standard")
                .to_string(),
        )
    }

    fn fallback_context(&self, payload: &Value) -> BTreeMap<String, Value> {
        let mut context = BTreeMap::new();
        if let Some(cooling) = cooling_context(payload) {
            context.insert("cooling_level".to_string(), json!(cooling));
        }
        context
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_cooling_level_is_extracted_from_response_payload() {
        let payload = json!({
            "agent_type": "hvac",
            "decision": { "cooling_level": "emergency" },
        });
        assert_eq!(cooling_context(&payload), Some("emergency"));
        let specialist = PowerSpecialist;
        assert!(specialist.build_prompt(&payload).contains("`emergency`"));
    }

    #[test]
    fn fallback_decision_is_conservative() {
        let specialist = PowerSpecialist;
        let decision = specialist.fallback_decision(&json!({"decision": {"cooling_level": "high"}}));
        assert_eq!(decision["power_optimization"], "maintain current power distribution");
        assert_eq!(decision["cooling_context"], "high");
        assert_eq!(specialist.decision_class(&decision).unwrap(), "conservative");
    }

    #[test]
    fn structured_output_without_directive_gets_default() {
        let specialist = PowerSpecialist;
        let decision = specialist.decision_from_structured(json!({"optimization_level": "aggressive"}));
        assert_eq!(decision["power_optimization"], "maintain current power distribution");
        assert_eq!(decision["optimization_level"], "aggressive");
    }
}
