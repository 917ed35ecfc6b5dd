use std::collections::BTreeMap;

use serde_json::{json, Value};

use atrium_types::{topics, AgentType};

use crate::framework::Specialist;

const HEALTH_LEVELS: [&str; 4] = ["optimal", "stable", "degraded", "critical"];

/// Health derived from bandwidth utilization alone, for the rule-based path.
fn health_from_bandwidth(bandwidth_pct: f64) -> &'static str {
    if bandwidth_pct >= 85.0 {
        "critical"
    } else if bandwidth_pct >= 70.0 {
        "degraded"
    } else if bandwidth_pct < 50.0 {
        "optimal"
    } else {
        "stable"
    }
}

/// Network infrastructure assessment from bandwidth, latency, and loss
/// readings. Defaults to `stable` whenever the signal is ambiguous.
pub struct NetworkSpecialist;

impl Specialist for NetworkSpecialist {
    fn agent_type(&self) -> AgentType {
        AgentType::Network
    }

    fn input_topics(&self) -> Vec<&'static str> {
        vec![topics::NETWORK_EVENT, topics::NETWORK_ASSESSMENT]
    }

    fn output_topic(&self) -> &'static str {
        topics::NETWORK_ASSESSMENT_DECISION
    }

    fn fallback_key(&self) -> &'static str {
        "traffic_analysis"
    }

    fn build_prompt(&self, payload: &Value) -> String {
        let bandwidth = payload.get("bandwidth_usage").and_then(Value::as_f64);
        let latency = payload.get("latency").and_then(Value::as_f64);
        let loss = payload.get("packet_loss").and_then(Value::as_f64);
        let segment = payload
            .get("segment")
            .and_then(Value::as_str)
            .unwrap_or("core");
        format!(
            "You are the network infrastructure specialist for a server \
facility. Segment `{segment}` reports bandwidth usage {}, latency {}ms, \
packet loss {}. Respond as JSON with keys network_health (one of optimal, \
stable, degraded, critical), network_assessment, optimization_actions, \
reasoning, and confidence (0-100).",
            bandwidth.map(|v| format!("{v}%")).unwrap_or_else(|| "unknown".to_string()),
            latency.map(|v| v.to_string()).unwrap_or_else(|| "unknown".to_string()),
            loss.map(|v| format!("{v}%")).unwrap_or_else(|| "unknown".to_string()),
        )
    }

    fn decision_from_structured(&self, mut value: Value) -> Value {
        let health = value
            .get("network_health")
            .and_then(Value::as_str)
            .map(str::to_ascii_lowercase)
            .filter(|health| HEALTH_LEVELS.contains(&health.as_str()))
            .unwrap_or_else(|| "stable".to_string());
        if let Some(object) = value.as_object_mut() {
            object.insert("network_health".to_string(), json!(health));
            object.remove("confidence");
            object.remove("reasoning");
        }
        value
    }

    fn decision_from_raw(&self, raw: &str) -> Value {
        let lower = raw.to_ascii_lowercase();
        let health = if lower.contains("critical") {
            "critical"
        } else if lower.contains("degraded") {
            "degraded"
        } else if lower.contains("optimal") {
            "optimal"
        } else {
            "stable"
        };
        json!({ "network_health": health, "network_assessment": raw })
    }

    fn fallback_decision(&self, payload: &Value) -> Value {
        let health = payload
            .get("bandwidth_usage")
            .and_then(Value::as_f64)
            .map(health_from_bandwidth)
            .unwrap_or("stable");
        json!({
            "network_health": health,
            "network_assessment": "Standard network monitoring engaged.",
            "segment": payload.get("segment").cloned().unwrap_or(json!("core")),
        })
    }

    fn decision_class(&self, decision: &Value) -> Option<String> {
        decision
            .get("network_health")
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    fn fallback_context(&self, payload: &Value) -> BTreeMap<String, Value> {
        let mut context = BTreeMap::new();
        if let Some(segment) = payload.get("segment") {
            context.insert("segment".to_string(), segment.clone());
        }
        context
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_without_readings_defaults_to_stable() {
        let specialist = NetworkSpecialist;
        let decision = specialist.fallback_decision(&json!({"segment": "edge"}));
        assert_eq!(decision["network_health"], "stable");
        assert_eq!(decision["segment"], "edge");
    }

    #[test]
    fn fallback_classifies_bandwidth_utilization() {
        let specialist = NetworkSpecialist;
        let health = |pct: f64| {
            specialist.fallback_decision(&json!({"bandwidth_usage": pct}))["network_health"]
                .as_str()
                .unwrap()
                .to_string()
        };
        assert_eq!(health(30.0), "optimal");
        assert_eq!(health(55.0), "stable");
        assert_eq!(health(75.0), "degraded");
        assert_eq!(health(92.0), "critical");
    }

    #[test]
    fn raw_scan_recognizes_health_keywords() {
        let specialist = NetworkSpecialist;
        assert_eq!(specialist.decision_from_raw("link degraded")["network_health"], "degraded");
        assert_eq!(specialist.decision_from_raw("all optimal")["network_health"], "optimal");
        assert_eq!(specialist.decision_from_raw("CRITICAL loss")["network_health"], "critical");
        assert_eq!(specialist.decision_from_raw("fine")["network_health"], "stable");
    }

    #[test]
    fn subscribes_to_both_network_topics() {
        let specialist = NetworkSpecialist;
        let inputs = specialist.input_topics();
        assert!(inputs.contains(&topics::NETWORK_EVENT));
        assert!(inputs.contains(&topics::NETWORK_ASSESSMENT));
    }
}
