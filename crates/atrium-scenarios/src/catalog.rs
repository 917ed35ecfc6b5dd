use serde_json::json;

use atrium_core::ScenarioDurations;
use atrium_types::{
    topics, AgentType, ScenarioConfig, ScenarioRequirement, ScenarioStep, ScenarioType,
};

/// Built-in demo scenario definitions. Scenarios are plain data: the
/// orchestrator owns execution, and scenario-specific logic lives in
/// handlers it attaches itself.
pub fn builtin_config(scenario_type: ScenarioType, durations: &ScenarioDurations) -> ScenarioConfig {
    match scenario_type {
        ScenarioType::CoolingCrisis => cooling_crisis(durations.cooling_crisis),
        ScenarioType::SecurityBreach => security_breach(durations.security_breach),
        ScenarioType::EnergyOptimization => energy_optimization(durations.energy_optimization),
        ScenarioType::RoutineMaintenance => routine_maintenance(durations.routine_maintenance),
    }
}

fn step(
    step_id: &str,
    description: &str,
    event_type: &str,
    event_data: serde_json::Value,
    delay_secs: f64,
    timeout_secs: f64,
    expected: &[&str],
    required: &[AgentType],
) -> ScenarioStep {
    ScenarioStep {
        description: description.to_string(),
        delay_secs,
        timeout_secs,
        expected_response_topics: expected.iter().map(|topic| topic.to_string()).collect(),
        required_agents: required.to_vec(),
        ..ScenarioStep::new(step_id, event_type, event_data)
    }
}

fn cooling_crisis(max_duration_secs: f64) -> ScenarioConfig {
    ScenarioConfig {
        scenario_id: "cooling_crisis_demo".to_string(),
        name: "Cooling Crisis Response".to_string(),
        description: "Coordinated response to a cooling system failure".to_string(),
        scenario_type: ScenarioType::CoolingCrisis,
        max_duration_secs,
        steps: vec![
            step(
                "normal_operation",
                "Normal facility operation",
                topics::SCENARIO_START,
                json!({ "scenario": "cooling_crisis", "phase": "normal" }),
                1.0,
                10.0,
                &[],
                &[],
            ),
            step(
                "temperature_rise",
                "Initial temperature increase detected",
                topics::HVAC_TEMPERATURE_CHANGED,
                json!({
                    "temperature": 26.5,
                    "trend": "rising",
                    "rate": 0.5,
                    "zone": "server_room_main",
                }),
                2.0,
                15.0,
                &[topics::HVAC_COOLING_DECISION],
                &[AgentType::Hvac],
            ),
            step(
                "emergency_temperature",
                "Emergency temperature threshold reached",
                topics::HVAC_TEMPERATURE_CHANGED,
                json!({
                    "temperature": 32.5,
                    "trend": "rising",
                    "rate": 1.2,
                    "emergency": true,
                    "zone": "server_room_main",
                }),
                2.0,
                15.0,
                &[topics::HVAC_COOLING_DECISION, topics::POWER_OPTIMIZATION_DECISION],
                &[AgentType::Hvac, AgentType::Power],
            ),
            step(
                "perimeter_watch",
                "Heightened monitoring around the affected zone",
                topics::SECURITY_EVENT,
                json!({
                    "event_id": "cc-sec-1",
                    "event_type": "anomaly_detected",
                    "location": "server_room_main",
                    "severity": "medium",
                }),
                1.0,
                15.0,
                &[topics::SECURITY_ASSESSMENT_DECISION],
                &[AgentType::Security],
            ),
            step(
                "network_priority",
                "Bandwidth priority for facility telemetry",
                topics::NETWORK_EVENT,
                json!({
                    "bandwidth_usage": 72.0,
                    "latency": 18.0,
                    "packet_loss": 0.2,
                    "segment": "core",
                }),
                1.0,
                20.0,
                &[topics::NETWORK_ASSESSMENT_DECISION, topics::COORDINATION_DIRECTIVE],
                &[AgentType::Network, AgentType::Coordinator],
            ),
            step(
                "coordination_response",
                "Multi-agent coordination response",
                topics::COORDINATION_SCENARIO,
                json!({
                    "scenario_type": "temperature_emergency",
                    "emergency_level": "critical",
                    "agent_responses": {},
                }),
                1.0,
                10.0,
                &[topics::COORDINATION_SCENARIO_ORCHESTRATION],
                &[AgentType::Coordinator],
            ),
        ],
        cleanup_steps: vec![step(
            "reset_temperature",
            "Reset temperature to normal",
            topics::HVAC_TEMPERATURE_CHANGED,
            json!({ "temperature": 22.0, "trend": "stable", "status": "normal" }),
            0.5,
            10.0,
            &[],
            &[],
        )],
        step_quorum_ratio: 0.8,
        completion_ratio: 0.8,
        success_ratio: 0.6,
        min_unique_agents: 3,
        required_actions: vec![],
    }
}

fn security_breach(max_duration_secs: f64) -> ScenarioConfig {
    ScenarioConfig {
        scenario_id: "security_breach_demo".to_string(),
        name: "Security Breach Response".to_string(),
        description: "Coordinated lockdown response to a confirmed breach".to_string(),
        scenario_type: ScenarioType::SecurityBreach,
        max_duration_secs,
        steps: vec![
            step(
                "normal_security",
                "Normal security operation",
                topics::SCENARIO_START,
                json!({ "scenario": "security_breach", "phase": "normal" }),
                1.0,
                10.0,
                &[],
                &[],
            ),
            step(
                "suspicious_access",
                "Suspicious access attempt detected",
                topics::SECURITY_EVENT,
                json!({
                    "event_id": "sb-sec-1",
                    "event_type": "suspicious_activity",
                    "location": "server_room_a",
                    "severity": "medium",
                    "user_id": "unknown_user_001",
                    "attempts": 3,
                }),
                2.0,
                15.0,
                &[topics::SECURITY_ASSESSMENT_DECISION],
                &[AgentType::Security],
            ),
            step(
                "breach_confirmed",
                "Security breach confirmed",
                topics::SECURITY_EVENT,
                json!({
                    "event_id": "sb-sec-2",
                    "event_type": "unauthorized_access",
                    "location": "server_room_a",
                    "severity": "high",
                }),
                2.0,
                15.0,
                &[topics::SECURITY_ASSESSMENT_DECISION],
                &[AgentType::Security],
            ),
            step(
                "isolation_check",
                "Validate segment isolation readiness",
                topics::NETWORK_EVENT,
                json!({
                    "bandwidth_usage": 35.0,
                    "latency": 12.0,
                    "packet_loss": 0.1,
                    "segment": "isolation",
                }),
                1.0,
                15.0,
                &[topics::NETWORK_ASSESSMENT_DECISION],
                &[AgentType::Network],
            ),
            step(
                "lockdown_initiated",
                "Facility lockdown initiated",
                topics::SECURITY_LOCKDOWN_INITIATED,
                json!({
                    "scope": "facility_wide",
                    "duration": "indefinite",
                    "reason": "security_breach",
                    "actions": ["door_lockdown", "network_isolation", "access_revocation"],
                }),
                1.0,
                10.0,
                &[],
                &[],
            ),
            step(
                "coordination_lockdown",
                "Coordinated lockdown response",
                topics::COORDINATION_SCENARIO,
                json!({
                    "scenario_type": "security_breach",
                    "emergency_level": "high",
                    "agent_responses": {},
                }),
                1.0,
                10.0,
                &[topics::COORDINATION_SCENARIO_ORCHESTRATION],
                &[AgentType::Coordinator],
            ),
        ],
        cleanup_steps: vec![step(
            "lift_lockdown",
            "Lift security lockdown",
            "security.lockdown.lifted",
            json!({ "scope": "facility_wide", "reason": "demo_complete" }),
            0.5,
            10.0,
            &[],
            &[],
        )],
        step_quorum_ratio: 0.8,
        completion_ratio: 0.8,
        success_ratio: 0.6,
        min_unique_agents: 3,
        required_actions: vec![
            ScenarioRequirement::LockdownInitiated,
            ScenarioRequirement::NetworkIsolation,
        ],
    }
}

fn energy_optimization(max_duration_secs: f64) -> ScenarioConfig {
    ScenarioConfig {
        scenario_id: "energy_optimization_demo".to_string(),
        name: "Energy Optimization".to_string(),
        description: "Proactive energy cost optimization via pre-cooling".to_string(),
        scenario_type: ScenarioType::EnergyOptimization,
        max_duration_secs,
        steps: vec![
            step(
                "consumption_review",
                "Energy consumption analysis",
                topics::SCENARIO_START,
                json!({ "scenario": "energy_optimization", "phase": "analysis" }),
                1.0,
                10.0,
                &[],
                &[],
            ),
            step(
                "pre_cooling_strategy",
                "Pre-cooling for energy arbitrage",
                topics::HVAC_TEMPERATURE_CHANGED,
                json!({
                    "temperature": 20.0,
                    "trend": "decreasing",
                    "rate": -0.5,
                    "pre_cooling": true,
                    "strategy": "energy_arbitrage",
                    "price_drop_threshold": 0.10,
                }),
                2.0,
                20.0,
                &[topics::HVAC_COOLING_DECISION, topics::POWER_OPTIMIZATION_DECISION],
                &[AgentType::Hvac, AgentType::Power],
            ),
            step(
                "load_balancing",
                "Network load balancing for shifted workloads",
                topics::NETWORK_EVENT,
                json!({
                    "bandwidth_usage": 55.0,
                    "latency": 14.0,
                    "packet_loss": 0.1,
                    "segment": "core",
                }),
                1.0,
                15.0,
                &[topics::NETWORK_ASSESSMENT_DECISION],
                &[AgentType::Network],
            ),
            step(
                "coordination_response",
                "Power and HVAC coordination",
                topics::COORDINATION_SCENARIO,
                json!({
                    "scenario_type": "power_overload",
                    "emergency_level": "normal",
                    "agent_responses": {},
                }),
                1.0,
                10.0,
                &[topics::COORDINATION_SCENARIO_ORCHESTRATION],
                &[AgentType::Coordinator],
            ),
            step(
                "optimization_verification",
                "Verify optimization and stabilization",
                topics::HVAC_TEMPERATURE_CHANGED,
                json!({
                    "temperature": 22.0,
                    "trend": "stable",
                    "rate": 0.0,
                    "optimization_complete": true,
                }),
                2.0,
                20.0,
                &[topics::HVAC_COOLING_DECISION, topics::POWER_OPTIMIZATION_DECISION],
                &[AgentType::Hvac, AgentType::Power],
            ),
        ],
        cleanup_steps: vec![step(
            "system_stabilization",
            "System stabilization completed",
            topics::HVAC_TEMPERATURE_CHANGED,
            json!({ "temperature": 22.0, "trend": "stable", "rate": 0.0 }),
            0.5,
            10.0,
            &[],
            &[],
        )],
        step_quorum_ratio: 0.8,
        completion_ratio: 0.8,
        success_ratio: 0.6,
        min_unique_agents: 3,
        required_actions: vec![ScenarioRequirement::EnergySavings],
    }
}

fn routine_maintenance(max_duration_secs: f64) -> ScenarioConfig {
    ScenarioConfig {
        scenario_id: "routine_maintenance_demo".to_string(),
        name: "Routine Maintenance".to_string(),
        description: "HVAC and network validation during a maintenance window".to_string(),
        scenario_type: ScenarioType::RoutineMaintenance,
        max_duration_secs,
        steps: vec![
            step(
                "maintenance_detection",
                "Detect scheduled maintenance window",
                topics::SCENARIO_START,
                json!({ "scenario": "routine_maintenance", "phase": "detection" }),
                0.5,
                10.0,
                &[],
                &[],
            ),
            step(
                "hvac_system_check",
                "HVAC system status check",
                topics::HVAC_TEMPERATURE_CHANGED,
                json!({
                    "temperature": 22.5,
                    "trend": "stable",
                    "maintenance": true,
                    "zone": "server_room_main",
                }),
                1.0,
                10.0,
                &[topics::HVAC_COOLING_DECISION],
                &[AgentType::Hvac],
            ),
            step(
                "network_connectivity_check",
                "Validate network connectivity and performance",
                topics::NETWORK_EVENT,
                json!({
                    "bandwidth_usage": 30.0,
                    "latency": 10.0,
                    "packet_loss": 0.0,
                    "segment": "maintenance",
                }),
                1.0,
                10.0,
                &[topics::NETWORK_ASSESSMENT_DECISION],
                &[AgentType::Network],
            ),
            step(
                "coordination_completion",
                "Complete coordination and verification",
                topics::COORDINATION_SCENARIO,
                json!({
                    "scenario_type": "routine_maintenance",
                    "emergency_level": "normal",
                    "agent_responses": {},
                }),
                1.0,
                10.0,
                &[topics::COORDINATION_SCENARIO_ORCHESTRATION],
                &[AgentType::Coordinator],
            ),
        ],
        cleanup_steps: vec![step(
            "reset_maintenance_state",
            "Reset maintenance state",
            topics::HVAC_TEMPERATURE_CHANGED,
            json!({ "temperature": 22.0, "trend": "stable" }),
            0.5,
            10.0,
            &[],
            &[],
        )],
        step_quorum_ratio: 0.8,
        completion_ratio: 0.8,
        success_ratio: 0.6,
        min_unique_agents: 2,
        required_actions: vec![],
    }
}
