use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use atrium_core::EventBus;
use atrium_models::ModelManager;
use atrium_observability::{emit_event, ObservabilityEvent, ProcessKind};
use atrium_providers::{BreakerState, CircuitBreaker, FallbackResponder, LlmError};
use atrium_types::{AgentResponse, AgentState, AgentStatus, AgentType, Event, ResponseStatus};

use crate::metrics::WorkerMetrics;
use crate::parse::{decode_model_output, normalize_confidence, ParseOutcome};

/// What varies between HVAC, Power, Security, and Network: topics, prompt
/// shape, and how a decision is read out of model text or derived by rule.
pub trait Specialist: Send + Sync {
    fn agent_type(&self) -> AgentType;
    fn input_topics(&self) -> Vec<&'static str>;
    fn output_topic(&self) -> &'static str;
    fn fallback_key(&self) -> &'static str;
    fn build_prompt(&self, payload: &Value) -> String;
    /// Normalize a structured model decision onto the topic's contract.
    fn decision_from_structured(&self, value: Value) -> Value;
    /// Salvage a decision from free-form model text.
    fn decision_from_raw(&self, raw: &str) -> Value;
    /// Deterministic rule-based decision when the model path is unavailable.
    fn fallback_decision(&self, payload: &Value) -> Value;
    fn decision_class(&self, decision: &Value) -> Option<String>;
    fn fallback_context(&self, _payload: &Value) -> BTreeMap<String, Value> {
        BTreeMap::new()
    }
    fn self_test(&self) -> bool {
        true
    }
}

/// Shared worker runtime: binds a specialist to the bus, runs model calls
/// under a hard deadline, and publishes a well-formed response on every
/// path, including failures.
pub struct Worker {
    specialist: Arc<dyn Specialist>,
    bus: EventBus,
    models: Arc<ModelManager>,
    fallback: Arc<FallbackResponder>,
    timeout: Duration,
    agent_id: String,
    fallback_mode: AtomicBool,
    breaker: CircuitBreaker,
    status: Mutex<AgentStatus>,
    metrics: Mutex<WorkerMetrics>,
}

const BREAKER_FAILURE_THRESHOLD: u32 = 5;
const BREAKER_RECOVERY_SECS: u64 = 30;

impl Worker {
    pub async fn spawn(
        specialist: Arc<dyn Specialist>,
        bus: EventBus,
        models: Arc<ModelManager>,
        fallback: Arc<FallbackResponder>,
        timeout: Duration,
    ) -> Arc<Worker> {
        let agent_type = specialist.agent_type();
        let worker = Arc::new(Worker {
            specialist,
            bus: bus.clone(),
            models,
            fallback,
            timeout,
            agent_id: format!("{}-{}", agent_type, &uuid::Uuid::new_v4().to_string()[..8]),
            fallback_mode: AtomicBool::new(false),
            breaker: CircuitBreaker::new(
                BREAKER_FAILURE_THRESHOLD,
                Duration::from_secs(BREAKER_RECOVERY_SECS),
            ),
            status: Mutex::new(AgentStatus::Idle),
            metrics: Mutex::new(WorkerMetrics::default()),
        });

        if !worker.specialist.self_test() {
            warn!(agent_id = %worker.agent_id, "worker self-test failed; entering fallback mode");
            worker.fallback_mode.store(true, Ordering::SeqCst);
        }

        for topic in worker.specialist.input_topics() {
            let task_worker = worker.clone();
            bus.subscribe_fn(topic, move |event| {
                let worker = task_worker.clone();
                async move {
                    // Events are processed off the dispatch path so a slow
                    // model call never stalls delivery to other handlers.
                    tokio::spawn(async move { worker.process(event).await });
                    Ok(())
                }
            })
            .await;
        }

        worker
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn agent_type(&self) -> AgentType {
        self.specialist.agent_type()
    }

    pub fn fallback_mode(&self) -> bool {
        self.fallback_mode.load(Ordering::SeqCst)
    }

    pub fn set_fallback_mode(&self, enabled: bool) {
        self.fallback_mode.store(enabled, Ordering::SeqCst);
    }

    pub async fn status(&self) -> AgentStatus {
        *self.status.lock().await
    }

    pub async fn metrics(&self) -> WorkerMetrics {
        self.metrics.lock().await.clone()
    }

    pub async fn performance_report(&self) -> String {
        self.metrics
            .lock()
            .await
            .report(self.specialist.agent_type().as_str())
    }

    /// Snapshot suitable for the state manager.
    pub async fn state_snapshot(&self) -> AgentState {
        let metrics = self.metrics.lock().await.clone();
        AgentState::new(
            self.agent_id.clone(),
            self.specialist.agent_type(),
            serde_json::json!({
                "fallback_mode": self.fallback_mode(),
                "metrics": metrics,
            }),
        )
    }

    async fn process(&self, event: Event) {
        let started = Instant::now();
        let payload = event.payload.clone();
        let request_id = event
            .request_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        *self.status.lock().await = AgentStatus::Processing;
        let mut response = self.respond(&payload, &request_id).await;
        response.response_time_ms = started.elapsed().as_millis() as u64;
        response.timestamp = Utc::now();

        let decision_class = self.specialist.decision_class(&response.decision);
        let fallback = response.fallback;

        match serde_json::to_value(&response) {
            Ok(value) => {
                let out = Event::new(self.specialist.output_topic(), value)
                    .with_request_id(request_id.clone());
                if let Err(error) = self.bus.publish(out).await {
                    warn!(agent_id = %self.agent_id, %error, "could not publish response");
                }
            }
            Err(error) => warn!(agent_id = %self.agent_id, %error, "response serialization failed"),
        }

        self.metrics
            .lock()
            .await
            .record(started.elapsed().as_millis() as u64, decision_class, fallback);
        *self.status.lock().await = AgentStatus::Idle;

        emit_event(
            tracing::Level::INFO,
            ProcessKind::Orchestrator,
            ObservabilityEvent {
                event: "worker.response.published",
                component: "worker",
                request_id: Some(&request_id),
                agent_id: Some(&self.agent_id),
                agent_type: Some(self.specialist.agent_type().as_str()),
                topic: Some(self.specialist.output_topic()),
                status: Some(if fallback { "fallback" } else { "success" }),
                ..ObservabilityEvent::default()
            },
        );
        debug!(
            agent_id = %self.agent_id,
            request_id = %request_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            fallback,
            "event processed"
        );
    }

    pub fn breaker_state(&self) -> BreakerState {
        self.breaker.state()
    }

    async fn respond(&self, payload: &Value, request_id: &str) -> AgentResponse {
        if self.fallback_mode() {
            return self.fallback_response(payload, request_id).await;
        }
        if !self.breaker.allow() {
            debug!(agent_id = %self.agent_id, "model circuit open; skipping invocation");
            return self.fallback_response(payload, request_id).await;
        }

        let handle = match self.models.get_or_load(self.specialist.agent_type()).await {
            Ok(handle) => handle,
            Err(error) => {
                warn!(agent_id = %self.agent_id, %error, "model unavailable");
                self.breaker.record_failure();
                return self.fallback_response(payload, request_id).await;
            }
        };

        let prompt = self.specialist.build_prompt(payload);
        let invocation =
            tokio::time::timeout(self.timeout, handle.client.invoke(&prompt, &handle.options))
                .await;

        let text = match invocation {
            Err(_) => {
                warn!(agent_id = %self.agent_id, "model invocation exceeded deadline");
                self.breaker.record_failure();
                return self.fallback_response(payload, request_id).await;
            }
            Ok(Err(error @ LlmError::Fatal(_))) => {
                warn!(agent_id = %self.agent_id, %error, "model invocation failed");
                self.breaker.record_failure();
                return self.fallback_response(payload, request_id).await;
            }
            Ok(Err(error)) => {
                debug!(agent_id = %self.agent_id, %error, "transient model failure");
                self.breaker.record_failure();
                return self.fallback_response(payload, request_id).await;
            }
            Ok(Ok(text)) => text,
        };
        self.breaker.record_success();

        match decode_model_output(&text) {
            ParseOutcome::Structured(value) => {
                let confidence = normalize_confidence(value.get("confidence"), 0.85);
                let reasoning = value
                    .get("reasoning")
                    .and_then(Value::as_str)
                    .unwrap_or("Model analysis completed")
                    .to_string();
                AgentResponse {
                    status: ResponseStatus::Success,
                    reasoning,
                    confidence,
                    ..AgentResponse::new(
                        request_id,
                        self.specialist.agent_type(),
                        self.specialist.decision_from_structured(value),
                    )
                }
            }
            ParseOutcome::RawText(raw) => AgentResponse {
                status: ResponseStatus::Success,
                reasoning: raw.clone(),
                confidence: 0.75,
                ..AgentResponse::new(
                    request_id,
                    self.specialist.agent_type(),
                    self.specialist.decision_from_raw(&raw),
                )
            },
        }
    }

    async fn fallback_response(&self, payload: &Value, request_id: &str) -> AgentResponse {
        let context = self.specialist.fallback_context(payload);
        let reply = self
            .fallback
            .respond(
                self.specialist.agent_type(),
                self.specialist.fallback_key(),
                if context.is_empty() { None } else { Some(&context) },
            )
            .await;

        AgentResponse {
            status: ResponseStatus::Fallback,
            reasoning: reply.reasoning,
            confidence: reply.confidence,
            fallback: true,
            ..AgentResponse::new(
                request_id,
                self.specialist.agent_type(),
                self.specialist.fallback_decision(payload),
            )
        }
    }
}
