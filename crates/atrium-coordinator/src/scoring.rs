use std::collections::BTreeMap;

use serde_json::Value;

use atrium_types::{AgentType, EventPriority};

/// Scores a decision from its declared priority, blast radius, and
/// emergency/correlation flags. Returns the score (out of 200) and the
/// factors that contributed.
pub fn priority_score(decision: &Value, context: Option<&Value>) -> (u32, Vec<&'static str>) {
    let mut score = 0;
    let mut factors = Vec::new();

    match decision
        .get("priority")
        .and_then(Value::as_str)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("critical") => {
            score += 100;
            factors.push("critical_priority");
        }
        Some("high") => {
            score += 75;
            factors.push("high_priority");
        }
        Some("medium") => {
            score += 50;
            factors.push("medium_priority");
        }
        Some("low") => {
            score += 25;
            factors.push("low_priority");
        }
        _ => {}
    }

    match decision
        .get("impact")
        .and_then(Value::as_str)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("facility_wide") => {
            score += 50;
            factors.push("facility_impact");
        }
        Some("multi_system") => {
            score += 30;
            factors.push("multi_system_impact");
        }
        Some("single_system") => {
            score += 10;
            factors.push("single_system_impact");
        }
        _ => {}
    }

    if decision.get("emergency").and_then(Value::as_bool).unwrap_or(false) {
        score += 40;
        factors.push("emergency_response");
    }

    if context
        .and_then(|context| context.get("correlation_high"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
    {
        score += 20;
        factors.push("high_correlation");
    }

    (score, factors)
}

/// Orders conflicting decisions by priority and renders a resolution with
/// each agent's declared dependencies attached.
pub fn resolve_conflicts(
    decisions: &[Value],
    dependencies: &BTreeMap<AgentType, Vec<AgentType>>,
) -> String {
    if decisions.is_empty() {
        return "No conflicts detected".to_string();
    }

    let mut ordered = decisions.to_vec();
    ordered.sort_by_key(|decision| {
        let priority = decision
            .get("priority")
            .and_then(Value::as_str)
            .and_then(EventPriority::parse)
            .unwrap_or(EventPriority::Low);
        std::cmp::Reverse(priority)
    });

    let mut lines = vec!["Conflict resolution:".to_string()];
    for decision in &ordered {
        let agent = decision
            .get("agent_type")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        let priority = decision
            .get("priority")
            .and_then(Value::as_str)
            .unwrap_or("low");
        let action = decision
            .get("action")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        lines.push(format!("{agent}: {action} (priority: {priority})"));

        if let Some(agent_type) = AgentType::parse(agent) {
            if let Some(deps) = dependencies.get(&agent_type).filter(|deps| !deps.is_empty()) {
                let names = deps
                    .iter()
                    .map(|dep| dep.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                lines.push(format!("  depends on: {names}"));
            }
        }
    }

    lines.join("\n")
}

/// Per-scenario response pattern: which agents act, in what order, doing
/// what.
#[derive(Debug, Clone)]
pub struct ScenarioPattern {
    pub priority_order: [AgentType; 4],
    pub actions: BTreeMap<AgentType, &'static str>,
}

pub fn scenario_pattern(scenario_type: &str) -> ScenarioPattern {
    use AgentType::{Hvac, Network, Power, Security};
    let (priority_order, actions): ([AgentType; 4], [(AgentType, &'static str); 4]) =
        match scenario_type {
            "power_overload" => (
                [Power, Hvac, Security, Network],
                [
                    (Power, "load_shedding"),
                    (Hvac, "reduce_cooling"),
                    (Security, "emergency_protocols"),
                    (Network, "bandwidth_throttling"),
                ],
            ),
            "security_breach" => (
                [Security, Network, Power, Hvac],
                [
                    (Security, "lockdown_protocols"),
                    (Network, "isolation_mode"),
                    (Power, "critical_power_only"),
                    (Hvac, "emergency_ventilation"),
                ],
            ),
            "network_congestion" => (
                [Network, Power, Security, Hvac],
                [
                    (Network, "traffic_prioritization"),
                    (Power, "power_optimization"),
                    (Security, "heightened_alert"),
                    (Hvac, "standard_operation"),
                ],
            ),
            // Unknown scenario types orchestrate like a temperature emergency.
            _ => (
                [Hvac, Power, Security, Network],
                [
                    (Hvac, "emergency_cooling"),
                    (Power, "power_allocation_support"),
                    (Security, "increased_monitoring"),
                    (Network, "priority_bandwidth"),
                ],
            ),
        };
    ScenarioPattern {
        priority_order,
        actions: actions.into_iter().collect(),
    }
}

/// Renders the orchestration plan for a scenario, covering the agents that
/// actually reported.
pub fn orchestration_plan(
    scenario_type: &str,
    agent_responses: &Value,
    emergency_level: &str,
) -> String {
    let pattern = scenario_pattern(scenario_type);
    let mut lines = vec![
        format!("Scenario: {scenario_type} (emergency level: {emergency_level})"),
        "Orchestration plan:".to_string(),
    ];

    for agent in pattern.priority_order {
        let Some(response) = agent_responses.get(agent.as_str()) else {
            continue;
        };
        let action = pattern.actions.get(&agent).copied().unwrap_or("standard_operation");
        lines.push(format!("  {}: {action}", agent.as_str().to_uppercase()));
        if let Some(reasoning) = response.get("reasoning").and_then(Value::as_str) {
            lines.push(format!("    response: {reasoning}"));
        }
    }

    lines.join("\n")
}
