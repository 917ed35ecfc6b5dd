use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use atrium_core::EventBus;
use atrium_models::ModelManager;
use atrium_observability::{emit_event, ObservabilityEvent, ProcessKind};
use atrium_providers::FallbackResponder;
use atrium_types::{topics, AgentDirective, AgentType, Event, EventSeverity};

use crate::scoring::{orchestration_plan, resolve_conflicts};

const EVENT_LOG_CAPACITY: usize = 20;
const DECISION_HISTORY_CAPACITY: usize = 50;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Declared inter-system dependencies, attached to conflict
    /// resolutions. Configurable because deployments disagree on the exact
    /// edges.
    pub dependencies: BTreeMap<AgentType, Vec<AgentType>>,
    pub llm_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            dependencies: [
                (AgentType::Hvac, vec![AgentType::Power]),
                (AgentType::Power, vec![AgentType::Network]),
                (AgentType::Security, vec![AgentType::Network, AgentType::Power]),
                (AgentType::Network, vec![AgentType::Power]),
            ]
            .into_iter()
            .collect(),
            llm_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CoordinatorMetrics {
    pub coordination_events: u64,
    pub avg_coordination_ms: f64,
    pub conflicts_resolved: u64,
    pub scenarios_orchestrated: u64,
    pub priority_decisions: BTreeMap<String, u64>,
}

struct CoordinationOutcome {
    overall_status: String,
    priority_event: String,
    coordinated_plan: Vec<String>,
    justification: String,
}

impl CoordinationOutcome {
    fn monitoring_default(justification: impl Into<String>) -> Self {
        Self {
            overall_status: "yellow".to_string(),
            priority_event: "facility_monitoring".to_string(),
            coordinated_plan: vec!["Continue monitoring all systems".to_string()],
            justification: justification.into(),
        }
    }
}

/// Waits until every worker class has reported at least once, then runs one
/// coordination round and emits a facility directive. Conflict lists and
/// scenario directives are handled from their own topics.
pub struct Coordinator {
    bus: EventBus,
    models: Arc<ModelManager>,
    fallback: Arc<FallbackResponder>,
    config: CoordinatorConfig,
    fallback_mode: AtomicBool,
    facility_status: Mutex<BTreeMap<AgentType, Option<Value>>>,
    event_log: Mutex<VecDeque<String>>,
    decision_history: Mutex<VecDeque<Value>>,
    metrics: Mutex<CoordinatorMetrics>,
}

impl Coordinator {
    pub async fn spawn(
        bus: EventBus,
        models: Arc<ModelManager>,
        fallback: Arc<FallbackResponder>,
        config: CoordinatorConfig,
    ) -> Arc<Coordinator> {
        let coordinator = Arc::new(Coordinator {
            bus: bus.clone(),
            models,
            fallback,
            config,
            fallback_mode: AtomicBool::new(false),
            facility_status: Mutex::new(
                AgentType::workers().into_iter().map(|agent| (agent, None)).collect(),
            ),
            event_log: Mutex::new(VecDeque::new()),
            decision_history: Mutex::new(VecDeque::new()),
            metrics: Mutex::new(CoordinatorMetrics::default()),
        });

        let worker_topics = [
            (AgentType::Hvac, topics::HVAC_COOLING_DECISION),
            (AgentType::Power, topics::POWER_OPTIMIZATION_DECISION),
            (AgentType::Security, topics::SECURITY_ASSESSMENT_DECISION),
            (AgentType::Network, topics::NETWORK_ASSESSMENT_DECISION),
        ];
        for (agent, topic) in worker_topics {
            let subscriber = coordinator.clone();
            bus.subscribe_fn(topic, move |event| {
                let coordinator = subscriber.clone();
                async move {
                    tokio::spawn(async move {
                        coordinator.record_response(agent, event.payload).await;
                    });
                    Ok(())
                }
            })
            .await;
        }

        let subscriber = coordinator.clone();
        bus.subscribe_fn(topics::COORDINATION_CONFLICT, move |event| {
            let coordinator = subscriber.clone();
            async move {
                coordinator.handle_conflict(event.payload).await;
                Ok(())
            }
        })
        .await;

        let subscriber = coordinator.clone();
        bus.subscribe_fn(topics::COORDINATION_SCENARIO, move |event| {
            let coordinator = subscriber.clone();
            async move {
                coordinator.handle_scenario(event.payload).await;
                Ok(())
            }
        })
        .await;

        coordinator
    }

    pub fn set_fallback_mode(&self, enabled: bool) {
        self.fallback_mode.store(enabled, Ordering::SeqCst);
    }

    pub async fn metrics(&self) -> CoordinatorMetrics {
        self.metrics.lock().await.clone()
    }

    pub async fn decision_history(&self) -> Vec<Value> {
        self.decision_history.lock().await.iter().cloned().collect()
    }

    async fn record_response(&self, agent: AgentType, payload: Value) {
        let bundle = {
            let mut status = self.facility_status.lock().await;
            status.insert(agent, Some(payload.clone()));

            let mut event_log = self.event_log.lock().await;
            let summary = payload
                .get("reasoning")
                .and_then(Value::as_str)
                .unwrap_or("decision received");
            event_log.push_back(format!(
                "[{}] {}",
                agent.as_str().to_uppercase(),
                summary.chars().take(50).collect::<String>()
            ));
            while event_log.len() > EVENT_LOG_CAPACITY {
                event_log.pop_front();
            }

            if status.values().all(Option::is_some) {
                let snapshot = status
                    .iter()
                    .map(|(agent, value)| (*agent, value.clone().unwrap_or(Value::Null)))
                    .collect::<BTreeMap<_, _>>();
                for value in status.values_mut() {
                    *value = None;
                }
                Some(snapshot)
            } else {
                None
            }
        };

        if let Some(bundle) = bundle {
            self.run_coordination(bundle).await;
        }
    }

    async fn run_coordination(&self, bundle: BTreeMap<AgentType, Value>) {
        let started = Instant::now();
        {
            let mut metrics = self.metrics.lock().await;
            metrics.coordination_events += 1;
        }
        info!(agents = bundle.len(), "coordination round started");

        let recent_events = self
            .event_log
            .lock()
            .await
            .iter()
            .cloned()
            .collect::<Vec<_>>();
        let report = json!({
            "hvac_assessment": bundle.get(&AgentType::Hvac),
            "power_assessment": bundle.get(&AgentType::Power),
            "security_assessment": bundle.get(&AgentType::Security),
            "network_assessment": bundle.get(&AgentType::Network),
            "recent_events": recent_events,
        });

        let outcome = if self.fallback_mode.load(Ordering::SeqCst) {
            let reply = self
                .fallback
                .respond(AgentType::Coordinator, "facility_coordination", None)
                .await;
            CoordinationOutcome {
                coordinated_plan: vec![reply.response_text],
                ..CoordinationOutcome::monitoring_default(reply.reasoning)
            }
        } else {
            match self.invoke_model(&report).await {
                Ok(text) => parse_coordination(&text),
                Err(error) => {
                    self.publish_emergency(&error).await;
                    return;
                }
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let directive = AgentDirective {
            priority: EventSeverity::Info,
            context: json!({
                "overall_status": &outcome.overall_status,
                "priority_event": &outcome.priority_event,
                "coordinated_plan": &outcome.coordinated_plan,
                "agents_involved": bundle.keys().map(|agent| agent.as_str()).collect::<Vec<_>>(),
                "system_dependencies": dependency_table(&self.config.dependencies),
                "coordination_ms": elapsed_ms,
            }),
            reasoning: outcome.justification.clone(),
            ..AgentDirective::new("coordination_plan", outcome.coordinated_plan.join("; "))
        };
        self.publish_directive(&directive).await;

        {
            let mut metrics = self.metrics.lock().await;
            let n = metrics.coordination_events as f64;
            metrics.avg_coordination_ms =
                (metrics.avg_coordination_ms * (n - 1.0) + elapsed_ms as f64) / n;
            *metrics
                .priority_decisions
                .entry(outcome.overall_status.clone())
                .or_insert(0) += 1;
        }

        let mut history = self.decision_history.lock().await;
        history.push_back(json!({
            "request_id": directive.request_id,
            "overall_status": outcome.overall_status,
            "timestamp": directive.timestamp,
            "coordination_ms": elapsed_ms,
        }));
        while history.len() > DECISION_HISTORY_CAPACITY {
            history.pop_front();
        }
    }

    async fn invoke_model(&self, report: &Value) -> anyhow::Result<String> {
        let handle = self
            .models
            .get_or_load(AgentType::Coordinator)
            .await
            .map_err(|error| anyhow::anyhow!("coordination model unavailable: {error}"))?;

        let prompt = format!(
            "You are the facility coordinator. Analyze the combined facility \
status report and identify inter-dependencies, conflicting recommendations, \
and cascading effects. Report: {report}. Respond as JSON with keys \
overall_status (green, yellow, or red), priority_event, coordinated_plan \
(a list of directives for specific agents), justification, and confidence \
(0-100)."
        );

        let text = tokio::time::timeout(
            self.config.llm_timeout,
            handle.client.invoke(&prompt, &handle.options),
        )
        .await
        .map_err(|_| anyhow::anyhow!("coordination analysis timed out"))?
        .map_err(|error| anyhow::anyhow!("coordination analysis failed: {error}"))?;
        Ok(text)
    }

    async fn publish_emergency(&self, error: &anyhow::Error) {
        warn!(%error, "coordination failed; issuing emergency directive");
        let directive = AgentDirective {
            priority: EventSeverity::Critical,
            reasoning: error.to_string(),
            ..AgentDirective::new(
                "emergency_fallback",
                "EMERGENCY: maintain all current operations and initiate facility-wide monitoring.",
            )
        };
        self.publish_directive(&directive).await;
    }

    async fn publish_directive(&self, directive: &AgentDirective) {
        match serde_json::to_value(directive) {
            Ok(value) => {
                let event = Event::new(topics::COORDINATION_DIRECTIVE, value)
                    .with_request_id(directive.request_id.clone());
                if let Err(error) = self.bus.publish(event).await {
                    warn!(%error, "could not publish coordination directive");
                } else {
                    emit_event(
                        tracing::Level::INFO,
                        ProcessKind::Orchestrator,
                        ObservabilityEvent {
                            event: "coordination.directive.issued",
                            component: "coordinator",
                            request_id: Some(&directive.request_id),
                            agent_type: Some(AgentType::Coordinator.as_str()),
                            topic: Some(topics::COORDINATION_DIRECTIVE),
                            status: Some(directive.directive_type.as_str()),
                            ..ObservabilityEvent::default()
                        },
                    );
                    info!(
                        request_id = %directive.request_id,
                        directive_type = %directive.directive_type,
                        "coordination directive issued"
                    );
                }
            }
            Err(error) => warn!(%error, "directive serialization failed"),
        }
    }

    async fn handle_conflict(&self, payload: Value) {
        let decisions = payload.as_array().cloned().unwrap_or_default();
        let resolution = resolve_conflicts(&decisions, &self.config.dependencies);
        debug!(conflicts = decisions.len(), "conflict resolution computed");

        let directive = AgentDirective {
            priority: EventSeverity::Warning,
            context: json!({
                "conflict_type": "inter_agent_conflict",
                "resolution_method": "priority_based",
            }),
            reasoning: "Inter-agent conflict resolved by priority ordering.".to_string(),
            ..AgentDirective::new("conflict_resolution", resolution)
        };

        self.metrics.lock().await.conflicts_resolved += 1;

        match serde_json::to_value(&directive) {
            Ok(value) => {
                let event = Event::new(topics::COORDINATION_CONFLICT_RESOLUTION, value);
                if let Err(error) = self.bus.publish(event).await {
                    warn!(%error, "could not publish conflict resolution");
                }
            }
            Err(error) => warn!(%error, "conflict resolution serialization failed"),
        }
    }

    async fn handle_scenario(&self, payload: Value) {
        let scenario_type = payload
            .get("scenario_type")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        let emergency_level = payload
            .get("emergency_level")
            .and_then(Value::as_str)
            .unwrap_or("normal")
            .to_string();
        let agent_responses = payload.get("agent_responses").cloned().unwrap_or(json!({}));

        let plan = orchestration_plan(&scenario_type, &agent_responses, &emergency_level);
        let priority = if emergency_level == "normal" {
            EventSeverity::Info
        } else {
            EventSeverity::Warning
        };

        let directive = AgentDirective {
            priority,
            context: json!({
                "scenario_type": &scenario_type,
                "emergency_level": &emergency_level,
            }),
            reasoning: format!("Scenario orchestration for {scenario_type}."),
            ..AgentDirective::new("scenario_orchestration", plan)
        };

        self.metrics.lock().await.scenarios_orchestrated += 1;
        info!(scenario_type = %scenario_type, "scenario orchestrated");

        match serde_json::to_value(&directive) {
            Ok(value) => {
                let event = Event::new(topics::COORDINATION_SCENARIO_ORCHESTRATION, value);
                if let Err(error) = self.bus.publish(event).await {
                    warn!(%error, "could not publish scenario orchestration");
                }
            }
            Err(error) => warn!(%error, "scenario orchestration serialization failed"),
        }
    }
}

fn dependency_table(dependencies: &BTreeMap<AgentType, Vec<AgentType>>) -> Value {
    let mut table = serde_json::Map::new();
    for (agent, deps) in dependencies {
        table.insert(
            agent.as_str().to_string(),
            json!(deps.iter().map(|dep| dep.as_str()).collect::<Vec<_>>()),
        );
    }
    Value::Object(table)
}

fn parse_coordination(text: &str) -> CoordinationOutcome {
    let Ok(value) = serde_json::from_str::<Value>(text.trim()) else {
        return CoordinationOutcome::monitoring_default(
            "Analysis completed; raw output processed.",
        );
    };
    if !value.is_object() {
        return CoordinationOutcome::monitoring_default(
            "Analysis completed; raw output processed.",
        );
    }

    let overall_status = value
        .get("overall_status")
        .and_then(Value::as_str)
        .map(str::to_ascii_lowercase)
        .filter(|status| ["green", "yellow", "red"].contains(&status.as_str()))
        .unwrap_or_else(|| "yellow".to_string());
    let priority_event = value
        .get("priority_event")
        .and_then(Value::as_str)
        .unwrap_or("facility_monitoring")
        .to_string();
    let coordinated_plan = value
        .get("coordinated_plan")
        .and_then(Value::as_array)
        .map(|plan| {
            plan.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .filter(|plan| !plan.is_empty())
        .unwrap_or_else(|| vec!["Continue monitoring all systems".to_string()]);
    let justification = value
        .get("justification")
        .and_then(Value::as_str)
        .unwrap_or("Combined facility assessment.")
        .to_string();

    CoordinationOutcome {
        overall_status,
        priority_event,
        coordinated_plan,
        justification,
    }
}
