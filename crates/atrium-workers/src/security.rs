use std::collections::BTreeMap;

use serde_json::{json, Value};

use atrium_types::{topics, AgentType};

use crate::framework::Specialist;

const THREAT_LEVELS: [&str; 5] = ["informational", "low", "medium", "high", "critical"];

/// Threat assessment. Maps facility security events onto a threat level;
/// the fallback derives the level from the event type alone.
pub struct SecuritySpecialist;

impl Specialist for SecuritySpecialist {
    fn agent_type(&self) -> AgentType {
        AgentType::Security
    }

    fn input_topics(&self) -> Vec<&'static str> {
        vec![topics::SECURITY_EVENT]
    }

    fn output_topic(&self) -> &'static str {
        topics::SECURITY_ASSESSMENT_DECISION
    }

    fn fallback_key(&self) -> &'static str {
        "threat_assessment"
    }

    fn build_prompt(&self, payload: &Value) -> String {
        let event_type = payload
            .get("event_type")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        let location = payload
            .get("location")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        let severity = payload
            .get("severity")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        format!(
            "You are the security operations specialist for a server facility. \
Assess this event: type `{event_type}`, location `{location}`, reported \
severity `{severity}`. Respond as JSON with keys threat_level (one of \
informational, low, medium, high, critical), threat_assessment, \
recommended_actions, reasoning, and confidence (0-100)."
        )
    }

    fn decision_from_structured(&self, mut value: Value) -> Value {
        let level = value
            .get("threat_level")
            .and_then(Value::as_str)
            .map(str::to_ascii_lowercase)
            .filter(|level| THREAT_LEVELS.contains(&level.as_str()))
            .unwrap_or_else(|| "medium".to_string());
        if let Some(object) = value.as_object_mut() {
            object.insert("threat_level".to_string(), json!(level));
            object.remove("confidence");
            object.remove("reasoning");
        }
        value
    }

    fn decision_from_raw(&self, raw: &str) -> Value {
        let lower = raw.to_ascii_lowercase();
        let level = if lower.contains("critical") {
            "critical"
        } else if lower.contains("high") {
            "high"
        } else if lower.contains("informational") {
            "informational"
        } else if lower.contains("low") {
            "low"
        } else {
            "medium"
        };
        json!({ "threat_level": level, "threat_assessment": raw })
    }

    fn fallback_decision(&self, payload: &Value) -> Value {
        let event_type = payload
            .get("event_type")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        let level = match event_type {
            "unauthorized_access" | "perimeter_breach" | "system_tampering" => "high",
            "suspicious_activity" | "anomaly_detected" => "medium",
            "routine_check" | "system_update" => "informational",
            _ => "medium",
        };
        json!({
            "threat_level": level,
            "threat_assessment": format!("Standard security protocols applied for {event_type}."),
            "recommended_actions": "Escalate to human operator for review.",
            "event_correlation": payload.get("event_id").cloned().unwrap_or(Value::Null),
        })
    }

    fn decision_class(&self, decision: &Value) -> Option<String> {
        decision
            .get("threat_level")
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    fn fallback_context(&self, payload: &Value) -> BTreeMap<String, Value> {
        let mut context = BTreeMap::new();
        if let Some(event_type) = payload.get("event_type") {
            context.insert("event_type".to_string(), event_type.clone());
        }
        context
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_types_map_onto_threat_levels() {
        let specialist = SecuritySpecialist;
        let level = |event_type: &str| {
            specialist.fallback_decision(&json!({"event_type": event_type}))["threat_level"]
                .as_str()
                .unwrap()
                .to_string()
        };
        assert_eq!(level("unauthorized_access"), "high");
        assert_eq!(level("perimeter_breach"), "high");
        assert_eq!(level("system_tampering"), "high");
        assert_eq!(level("suspicious_activity"), "medium");
        assert_eq!(level("anomaly_detected"), "medium");
        assert_eq!(level("routine_check"), "informational");
        assert_eq!(level("system_update"), "informational");
        assert_eq!(level("never_seen_before"), "medium");
    }

    #[test]
    fn raw_text_keyword_scan_prefers_critical() {
        let specialist = SecuritySpecialist;
        assert_eq!(
            specialist.decision_from_raw("this looks critical, maybe high")["threat_level"],
            "critical"
        );
        assert_eq!(specialist.decision_from_raw("informational notice")["threat_level"], "informational");
        assert_eq!(specialist.decision_from_raw("nothing conclusive")["threat_level"], "medium");
    }

    #[test]
    fn structured_level_outside_vocabulary_becomes_medium() {
        let specialist = SecuritySpecialist;
        let decision = specialist.decision_from_structured(json!({"threat_level": "apocalyptic"}));
        assert_eq!(decision["threat_level"], "medium");
    }
}
