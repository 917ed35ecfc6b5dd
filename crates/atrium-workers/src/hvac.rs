use std::collections::BTreeMap;

use serde_json::{json, Value};

use atrium_types::{topics, AgentType};

use crate::framework::Specialist;

const COOLING_LEVELS: [&str; 4] = ["low", "medium", "high", "emergency"];

/// Energy footprint of each cooling level relative to the medium baseline.
fn energy_profile(cooling_level: &str) -> Value {
    let (consumption_pct, cost_per_hour) = match cooling_level {
        "low" => (85, 12),
        "high" => (125, 22),
        "emergency" => (150, 35),
        _ => (100, 15),
    };
    json!({ "consumption_pct": consumption_pct, "cost_per_hour_usd": cost_per_hour })
}

/// Temperature control. Consumes temperature change events and emits a
/// cooling decision; the rule-based fallback maps temperature bands directly
/// onto cooling levels.
pub struct HvacSpecialist;

impl Specialist for HvacSpecialist {
    fn agent_type(&self) -> AgentType {
        AgentType::Hvac
    }

    fn input_topics(&self) -> Vec<&'static str> {
        vec![topics::HVAC_TEMPERATURE_CHANGED]
    }

    fn output_topic(&self) -> &'static str {
        topics::HVAC_COOLING_DECISION
    }

    fn fallback_key(&self) -> &'static str {
        "cooling_decision"
    }

    fn build_prompt(&self, payload: &Value) -> String {
        let temperature = payload.get("temperature").and_then(Value::as_f64);
        let zone = payload
            .get("zone")
            .and_then(Value::as_str)
            .unwrap_or("main_server_room");
        let trend = payload.get("trend").and_then(Value::as_str).unwrap_or("unknown");
        format!(
            "You are the HVAC control specialist for a server facility. \
Current reading: temperature {}C in zone {zone}, trend {trend}. \
Choose a cooling level and respond as JSON with keys cooling_level \
(one of low, medium, high, emergency), reasoning, and confidence (0-100).",
            temperature.map(|t| t.to_string()).unwrap_or_else(|| "unknown".to_string()),
        )
    }

    fn decision_from_structured(&self, mut value: Value) -> Value {
        let level = value
            .get("cooling_level")
            .and_then(Value::as_str)
            .map(str::to_ascii_lowercase)
            .filter(|level| COOLING_LEVELS.contains(&level.as_str()))
            .unwrap_or_else(|| "medium".to_string());
        if let Some(object) = value.as_object_mut() {
            object.insert("energy_profile".to_string(), energy_profile(&level));
            object.insert("cooling_level".to_string(), json!(level));
            object.remove("confidence");
            object.remove("reasoning");
        }
        value
    }

    fn decision_from_raw(&self, raw: &str) -> Value {
        let level = raw.trim().to_ascii_lowercase();
        let level = if COOLING_LEVELS.contains(&level.as_str()) {
            level
        } else {
            "medium".to_string()
        };
        let profile = energy_profile(&level);
        json!({ "cooling_level": level, "energy_profile": profile })
    }

    fn fallback_decision(&self, payload: &Value) -> Value {
        let temperature = payload
            .get("temperature")
            .and_then(Value::as_f64)
            .unwrap_or(22.0);
        let level = if temperature > 26.0 {
            "high"
        } else if temperature > 24.0 {
            "medium"
        } else {
            "low"
        };
        json!({
            "cooling_level": level,
            "temperature_input": temperature,
            "energy_profile": energy_profile(level),
        })
    }

    fn decision_class(&self, decision: &Value) -> Option<String> {
        decision
            .get("cooling_level")
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    fn fallback_context(&self, payload: &Value) -> BTreeMap<String, Value> {
        let mut context = BTreeMap::new();
        if let Some(temperature) = payload.get("temperature") {
            context.insert("temperature".to_string(), temperature.clone());
        }
        context
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_thresholds_are_strict() {
        let specialist = HvacSpecialist;
        let level = |t: f64| {
            specialist.fallback_decision(&json!({"temperature": t}))["cooling_level"]
                .as_str()
                .unwrap()
                .to_string()
        };
        assert_eq!(level(24.0), "low");
        assert_eq!(level(24.0001), "medium");
        assert_eq!(level(26.0), "medium");
        assert_eq!(level(26.0001), "high");
        assert_eq!(level(32.5), "high");
    }

    #[test]
    fn missing_temperature_defaults_to_low() {
        let specialist = HvacSpecialist;
        let decision = specialist.fallback_decision(&json!({}));
        assert_eq!(decision["cooling_level"], "low");
        assert_eq!(decision["temperature_input"], 22.0);
    }

    #[test]
    fn raw_output_outside_vocabulary_becomes_medium() {
        let specialist = HvacSpecialist;
        assert_eq!(specialist.decision_from_raw("EMERGENCY")["cooling_level"], "emergency");
        assert_eq!(specialist.decision_from_raw("tepid")["cooling_level"], "medium");
    }

    #[test]
    fn structured_output_is_normalized() {
        let specialist = HvacSpecialist;
        let decision = specialist.decision_from_structured(json!({
            "cooling_level": "High",
            "confidence": 90,
            "reasoning": "hot",
            "airflow": "max",
        }));
        assert_eq!(decision["cooling_level"], "high");
        assert_eq!(decision["airflow"], "max");
        assert!(decision.get("confidence").is_none());
    }

    #[test]
    fn decisions_carry_the_energy_profile() {
        let specialist = HvacSpecialist;
        let decision = specialist.fallback_decision(&json!({"temperature": 30.0}));
        assert_eq!(decision["energy_profile"]["consumption_pct"], 125);
        assert_eq!(decision["energy_profile"]["cost_per_hour_usd"], 22);

        let emergency = specialist.decision_from_raw("emergency");
        assert_eq!(emergency["energy_profile"]["consumption_pct"], 150);
    }
}
