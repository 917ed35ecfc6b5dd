use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use atrium_coordinator::{Coordinator, CoordinatorConfig};
use atrium_core::{
    BusConfig, EventBus, FixedMemoryProbe, MemoryKvStore, RecoveryManager, ScenarioDurations,
    StateManager,
};
use atrium_models::{ModelLoader, ModelManager, ModelManagerConfig, ModelProfile};
use atrium_providers::{FailingClient, FallbackResponder, LlmClient, StaticClient};
use atrium_scenarios::ScenarioOrchestrator;
use atrium_types::{
    topics, AgentResponse, AgentState, AgentType, Event, ScenarioState, ScenarioType,
};
use atrium_workers::{
    HvacSpecialist, NetworkSpecialist, PowerSpecialist, SecuritySpecialist, Specialist, Worker,
};

/// One canned model per agent role, so every specialist answers with
/// plausible structured output without a live backend.
struct RoleLoader;

#[async_trait]
impl ModelLoader for RoleLoader {
    async fn load(
        &self,
        agent_type: AgentType,
        profile: &ModelProfile,
    ) -> anyhow::Result<Arc<dyn LlmClient>> {
        let reply = match agent_type {
            AgentType::Hvac => {
                r#"{"cooling_level": "emergency", "confidence": 92, "reasoning": "temperature beyond safe band"}"#
            }
            AgentType::Power => {
                r#"{"power_optimization": "reroute non-essential load to support cooling", "optimization_level": "aggressive", "confidence": 88, "reasoning": "cooling has priority"}"#
            }
            AgentType::Security => {
                r#"{"threat_level": "low", "threat_assessment": "no hostile activity detected", "confidence": 81, "reasoning": "routine telemetry"}"#
            }
            AgentType::Network => {
                r#"{"network_health": "stable", "network_assessment": "utilization within limits", "confidence": 84, "reasoning": "headroom available"}"#
            }
            AgentType::Coordinator => {
                r#"{"overall_status": "red", "priority_event": "thermal_emergency", "coordinated_plan": ["HVAC: emergency cooling", "Power: reroute load"], "justification": "temperature critical"}"#
            }
        };
        Ok(Arc::new(StaticClient::new(profile.model_id.clone(), reply)))
    }
}

struct FailingLoader;

#[async_trait]
impl ModelLoader for FailingLoader {
    async fn load(
        &self,
        _agent_type: AgentType,
        _profile: &ModelProfile,
    ) -> anyhow::Result<Arc<dyn LlmClient>> {
        Ok(Arc::new(FailingClient))
    }
}

struct Facility {
    bus: EventBus,
    orchestrator: Arc<ScenarioOrchestrator>,
    #[allow(dead_code)]
    workers: Vec<Arc<Worker>>,
    #[allow(dead_code)]
    coordinator: Arc<Coordinator>,
}

async fn spawn_facility(loader: Arc<dyn ModelLoader>) -> Facility {
    let bus = EventBus::new(BusConfig::default());
    let models = Arc::new(ModelManager::new(
        ModelManagerConfig::default(),
        Arc::new(FixedMemoryProbe::new(16.0, 4.0)),
        loader,
    ));
    let fallback = Arc::new(FallbackResponder::new());

    let specialists: Vec<Arc<dyn Specialist>> = vec![
        Arc::new(HvacSpecialist),
        Arc::new(PowerSpecialist),
        Arc::new(SecuritySpecialist),
        Arc::new(NetworkSpecialist),
    ];
    let mut workers = Vec::new();
    for specialist in specialists {
        workers.push(
            Worker::spawn(
                specialist,
                bus.clone(),
                models.clone(),
                fallback.clone(),
                Duration::from_secs(10),
            )
            .await,
        );
    }

    let coordinator = Coordinator::spawn(
        bus.clone(),
        models.clone(),
        fallback.clone(),
        CoordinatorConfig::default(),
    )
    .await;

    let orchestrator = ScenarioOrchestrator::spawn(bus.clone(), ScenarioDurations::default()).await;

    Facility {
        bus,
        orchestrator,
        workers,
        coordinator,
    }
}

async fn collect(bus: &EventBus, topic: &'static str) -> Arc<StdMutex<Vec<Value>>> {
    let seen = Arc::new(StdMutex::new(Vec::new()));
    let sink = seen.clone();
    bus.subscribe_fn(topic, move |event| {
        let sink = sink.clone();
        async move {
            sink.lock().unwrap().push(event.payload);
            Ok(())
        }
    })
    .await;
    seen
}

fn responses(seen: &Arc<StdMutex<Vec<Value>>>) -> Vec<AgentResponse> {
    seen.lock()
        .unwrap()
        .iter()
        .filter_map(|value| serde_json::from_value(value.clone()).ok())
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cooling_crisis_runs_to_successful_coordination() {
    let facility = spawn_facility(Arc::new(RoleLoader)).await;
    let cooling = collect(&facility.bus, topics::HVAC_COOLING_DECISION).await;
    let power = collect(&facility.bus, topics::POWER_OPTIMIZATION_DECISION).await;
    let security = collect(&facility.bus, topics::SECURITY_ASSESSMENT_DECISION).await;
    let directives = collect(&facility.bus, topics::COORDINATION_DIRECTIVE).await;
    facility.bus.start().await;

    let result = facility
        .orchestrator
        .trigger_scenario(ScenarioType::CoolingCrisis)
        .await
        .unwrap();

    assert!(result.success, "scenario failed: {:?}", result.error);
    assert_eq!(result.steps_completed, result.steps_total);
    assert!(result.duration_secs <= 120.0);
    assert!(result.performance_metrics.unique_agents_responded >= 3);

    assert!(responses(&cooling)
        .iter()
        .any(|response| response.decision["cooling_level"] == "emergency"));
    assert!(!responses(&power).is_empty());
    assert!(!responses(&security).is_empty());

    let directive = directives.lock().unwrap().first().cloned().expect("directive issued");
    let status = directive["context"]["overall_status"].as_str().unwrap();
    assert!(status == "yellow" || status == "red");

    facility.bus.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn security_breach_counts_lockdown_and_isolation() {
    let facility = spawn_facility(Arc::new(RoleLoader)).await;
    facility.bus.start().await;

    let result = facility
        .orchestrator
        .trigger_scenario(ScenarioType::SecurityBreach)
        .await
        .unwrap();

    assert!(result.success, "scenario failed: {:?}", result.error);
    assert!(result.performance_metrics.lockdowns_initiated >= 1);
    assert!(result.performance_metrics.network_isolations >= 1);
    assert!(result.duration_secs <= 90.0);

    facility.bus.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn routine_maintenance_then_double_reset_is_idempotent() {
    let facility = spawn_facility(Arc::new(RoleLoader)).await;
    let resets = collect(&facility.bus, topics::SCENARIO_RESET).await;
    facility.bus.start().await;

    let result = facility
        .orchestrator
        .trigger_scenario(ScenarioType::RoutineMaintenance)
        .await
        .unwrap();
    assert!(result.success, "scenario failed: {:?}", result.error);
    assert_eq!(facility.orchestrator.state(), ScenarioState::Completed);

    facility.orchestrator.reset().await.unwrap();
    assert_eq!(facility.orchestrator.state(), ScenarioState::Idle);
    facility.orchestrator.reset().await.unwrap();
    assert_eq!(facility.orchestrator.state(), ScenarioState::Idle);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(resets.lock().unwrap().len(), 2);

    facility.bus.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unavailable_model_falls_back_within_deadline() {
    let facility = spawn_facility(Arc::new(FailingLoader)).await;
    let cooling = collect(&facility.bus, topics::HVAC_COOLING_DECISION).await;
    facility.bus.start().await;

    facility
        .bus
        .publish(Event::new(
            topics::HVAC_TEMPERATURE_CHANGED,
            json!({"temperature": 30.0, "zone": "server_room_main"}),
        ))
        .await
        .unwrap();

    let mut observed = None;
    for _ in 0..100 {
        if let Some(first) = responses(&cooling).first().cloned() {
            observed = Some(first);
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    let response = observed.expect("fallback decision within five seconds");
    assert!(response.fallback);
    assert_eq!(response.decision["cooling_level"], "high");
    assert!(response.confidence >= 0.2 && response.confidence <= 0.95);

    facility.bus.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_and_recovery_restore_states_and_replay_events() {
    let kv = Arc::new(MemoryKvStore::new());
    let ttl = Duration::from_secs(86_400);

    // First process: save two snapshots and leave three events queued.
    let bus = EventBus::new(BusConfig::default());
    let state = Arc::new(StateManager::new(kv.clone(), ttl));
    let recovery = RecoveryManager::new(
        bus.clone(),
        state.clone(),
        kv.clone(),
        ttl,
        Duration::from_secs(60),
    );

    let hvac_saved = state
        .save(&AgentState::new("hvac-1", AgentType::Hvac, json!({"zone": "main"})))
        .await
        .unwrap();
    let net_saved = state
        .save(&AgentState::new("net-1", AgentType::Network, json!({"segment": "core"})))
        .await
        .unwrap();
    for n in 0..3 {
        bus.publish(Event::new("replay.probe", json!({"n": n})))
            .await
            .unwrap();
    }
    recovery.graceful_shutdown().await.unwrap();

    // Fresh process: same store, new bus and managers.
    let bus2 = EventBus::new(BusConfig::default());
    let state2 = Arc::new(StateManager::new(kv.clone(), ttl));
    let recovery2 = RecoveryManager::new(
        bus2.clone(),
        state2.clone(),
        kv.clone(),
        ttl,
        Duration::from_secs(60),
    );
    let replayed = collect(&bus2, "replay.probe").await;

    let report = recovery2.system_recovery().await.unwrap();
    assert!(report.duration <= Duration::from_secs(60));
    assert_eq!(report.restored_agents.len(), 2);
    assert_eq!(report.replayed_events, 3);

    let hvac_loaded = state2.load("hvac-1").await.unwrap().unwrap();
    let net_loaded = state2.load("net-1").await.unwrap().unwrap();
    assert_eq!(hvac_loaded.checksum, hvac_saved.checksum);
    assert_eq!(net_loaded.checksum, net_saved.checksum);

    for _ in 0..200 {
        if replayed.lock().unwrap().len() == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(replayed.lock().unwrap().len(), 3);

    bus2.stop().await;
}
