use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use atrium_core::{EventBus, ScenarioDurations};
use atrium_types::{
    topics, AgentType, Event, ScenarioConfig, ScenarioMetrics, ScenarioRequirement,
    ScenarioResult, ScenarioState, ScenarioStep, ScenarioStepRuntime, ScenarioType,
};

use crate::catalog::builtin_config;

#[derive(Debug, Clone)]
struct ResponseRecord {
    topic: String,
    agent_type: Option<AgentType>,
    observed: DateTime<Utc>,
    payload: Value,
}

#[derive(Debug, Clone, Copy, Default)]
struct Counters {
    lockdowns_initiated: u64,
    network_isolations: u64,
    energy_savings_achieved: u64,
}

struct RunState {
    current: Option<ScenarioConfig>,
    result: Option<ScenarioResult>,
    started_mono: Option<Instant>,
    paused_total: Duration,
    pause_started: Option<Instant>,
    current_step: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStatus {
    pub state: ScenarioState,
    pub scenario_id: Option<String>,
    pub scenario_type: Option<ScenarioType>,
    pub current_step: usize,
    pub total_steps: usize,
    pub elapsed_secs: f64,
    pub total_responses: usize,
    pub responding_agents: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioSummary {
    pub scenario_type: ScenarioType,
    pub scenario_id: String,
    pub name: String,
    pub description: String,
    pub max_duration_secs: f64,
    pub total_steps: usize,
}

/// Runs one scripted scenario at a time as a deterministic, time-bounded
/// state machine. Owns all run state; external observers only get
/// snapshots. Scenario-specific behavior (breach counters, energy savings)
/// attaches as bus handlers owned here, never as back-references from
/// scenario data.
pub struct ScenarioOrchestrator {
    bus: EventBus,
    durations: ScenarioDurations,
    state_tx: watch::Sender<ScenarioState>,
    inner: Mutex<RunState>,
    responses: Mutex<Vec<ResponseRecord>>,
    events: Mutex<Vec<Value>>,
    counters: Mutex<Counters>,
}

impl ScenarioOrchestrator {
    pub async fn spawn(bus: EventBus, durations: ScenarioDurations) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ScenarioState::Idle);
        let orchestrator = Arc::new(Self {
            bus: bus.clone(),
            durations,
            state_tx,
            inner: Mutex::new(RunState {
                current: None,
                result: None,
                started_mono: None,
                paused_total: Duration::ZERO,
                pause_started: None,
                current_step: 0,
            }),
            responses: Mutex::new(Vec::new()),
            events: Mutex::new(Vec::new()),
            counters: Mutex::new(Counters::default()),
        });

        let response_topics = [
            topics::HVAC_COOLING_DECISION,
            topics::POWER_OPTIMIZATION_DECISION,
            topics::SECURITY_ASSESSMENT_DECISION,
            topics::NETWORK_ASSESSMENT_DECISION,
            topics::COORDINATION_DIRECTIVE,
            topics::COORDINATION_SCENARIO_ORCHESTRATION,
        ];
        for topic in response_topics {
            let recorder = orchestrator.clone();
            bus.subscribe_fn(topic, move |event| {
                let orchestrator = recorder.clone();
                async move {
                    orchestrator.record_response(event).await;
                    Ok(())
                }
            })
            .await;
        }

        let counter = orchestrator.clone();
        bus.subscribe_fn(topics::SECURITY_LOCKDOWN_INITIATED, move |event| {
            let orchestrator = counter.clone();
            async move {
                orchestrator.record_lockdown(event).await;
                Ok(())
            }
        })
        .await;

        let counter = orchestrator.clone();
        bus.subscribe_fn(topics::POWER_OPTIMIZATION_DECISION, move |_event| {
            let orchestrator = counter.clone();
            async move {
                orchestrator.record_energy_decision().await;
                Ok(())
            }
        })
        .await;

        let counter = orchestrator.clone();
        bus.subscribe_fn(topics::HVAC_TEMPERATURE_CHANGED, move |event| {
            let orchestrator = counter.clone();
            async move {
                orchestrator.record_energy_verification(event).await;
                Ok(())
            }
        })
        .await;

        orchestrator
    }

    pub fn state(&self) -> ScenarioState {
        *self.state_tx.borrow()
    }

    pub async fn result(&self) -> Option<ScenarioResult> {
        self.inner.lock().await.result.clone()
    }

    pub fn available_scenarios(&self) -> Vec<ScenarioSummary> {
        ScenarioType::all()
            .into_iter()
            .map(|scenario_type| {
                let config = builtin_config(scenario_type, &self.durations);
                ScenarioSummary {
                    scenario_type,
                    scenario_id: config.scenario_id,
                    name: config.name,
                    description: config.description,
                    max_duration_secs: config.max_duration_secs,
                    total_steps: config.steps.len(),
                }
            })
            .collect()
    }

    pub async fn get_scenario_state(&self) -> OrchestratorStatus {
        let run = self.inner.lock().await;
        let responses = self.responses.lock().await;
        let mut responding = responses
            .iter()
            .filter_map(|record| record.agent_type.map(|agent| agent.as_str().to_string()))
            .collect::<Vec<_>>();
        responding.sort();
        responding.dedup();
        OrchestratorStatus {
            state: *self.state_tx.borrow(),
            scenario_id: run.current.as_ref().map(|config| config.scenario_id.clone()),
            scenario_type: run.current.as_ref().map(|config| config.scenario_type),
            current_step: run.current_step,
            total_steps: run.current.as_ref().map(|config| config.steps.len()).unwrap_or(0),
            elapsed_secs: elapsed_active(&run).as_secs_f64(),
            total_responses: responses.len(),
            responding_agents: responding,
        }
    }

    /// Runs a built-in scenario to completion and returns its result.
    pub async fn trigger_scenario(
        &self,
        scenario_type: ScenarioType,
    ) -> anyhow::Result<ScenarioResult> {
        let config = builtin_config(scenario_type, &self.durations);
        self.run_config(config).await
    }

    /// Runs an arbitrary scenario configuration. Only one scenario may be
    /// active at a time; triggering is legal from idle and terminal states
    /// only.
    pub async fn run_config(&self, config: ScenarioConfig) -> anyhow::Result<ScenarioResult> {
        {
            let mut run = self.inner.lock().await;
            let state = *self.state_tx.borrow();
            if !state.can_trigger() {
                anyhow::bail!("cannot start a scenario from state `{}`", state.as_str());
            }
            self.state_tx.send_replace(ScenarioState::Initializing);
            let now = Utc::now();
            run.current = Some(config.clone());
            run.result = Some(ScenarioResult::started(&config, now));
            run.started_mono = Some(Instant::now());
            run.paused_total = Duration::ZERO;
            run.pause_started = None;
            run.current_step = 0;
        }
        self.responses.lock().await.clear();
        self.events.lock().await.clear();
        *self.counters.lock().await = Counters::default();

        self.publish_lifecycle(
            topics::SCENARIO_INITIALIZED,
            &config.scenario_id,
            json!({
                "scenario_type": config.scenario_type.as_str(),
                "name": &config.name,
            }),
        )
        .await;
        self.state_tx.send_replace(ScenarioState::Running);
        info!(scenario_id = %config.scenario_id, "scenario started");

        self.execute(&config).await;

        let run = self.inner.lock().await;
        run.result
            .clone()
            .ok_or_else(|| anyhow::anyhow!("scenario result missing after execution"))
    }

    async fn execute(&self, config: &ScenarioConfig) {
        let budget = Duration::from_secs_f64(config.max_duration_secs);
        let mut timed_out = false;

        for (index, step) in config.steps.iter().enumerate() {
            if self.gate().await != ScenarioState::Running {
                return;
            }
            if self.elapsed().await >= budget {
                timed_out = true;
                break;
            }
            self.inner.lock().await.current_step = index;

            if step.delay_secs > 0.0 {
                tokio::time::sleep(Duration::from_secs_f64(step.delay_secs)).await;
            }
            if self.gate().await != ScenarioState::Running {
                return;
            }

            let step_start = Utc::now();
            let step_active_start = self.elapsed().await;
            self.publish_step_event(config, step, false).await;
            self.push_event(json!({
                "type": "step_event",
                "step_id": &step.step_id,
                "event_type": &step.event_type,
                "timestamp": step_start,
            }))
            .await;

            let needed = quorum_needed(step, config.step_quorum_ratio);
            let (responded, completed, budget_exhausted) = self
                .wait_for_step(step, step_start, step_active_start, budget, needed)
                .await;
            let success = completed && responded.len() >= needed;

            let agent_responses = self.step_responses(step, step_start).await;
            {
                let mut run = self.inner.lock().await;
                if let Some(result) = run.result.as_mut() {
                    result.steps.push(ScenarioStepRuntime {
                        step_id: step.step_id.clone(),
                        start: step_start,
                        end: Some(Utc::now()),
                        completed,
                        success,
                        agent_responses,
                    });
                    if completed {
                        result.steps_completed += 1;
                    }
                }
            }
            self.push_event(json!({
                "type": "step_completed",
                "step_id": &step.step_id,
                "step_index": index,
                "success": success,
                "responded": responded.iter().map(|agent| agent.as_str()).collect::<Vec<_>>(),
            }))
            .await;
            debug!(step_id = %step.step_id, success, "step finished");

            if budget_exhausted {
                timed_out = true;
                break;
            }
        }

        if self.gate().await != ScenarioState::Running {
            // stop() already finalized the result.
            return;
        }

        if timed_out {
            self.fail(config, format!(
                "Scenario timeout after {} seconds",
                config.max_duration_secs
            ))
            .await;
            return;
        }

        let success = self.evaluate(config).await;
        self.complete(config, success).await;
    }

    async fn wait_for_step(
        &self,
        step: &ScenarioStep,
        step_start: DateTime<Utc>,
        step_active_start: Duration,
        budget: Duration,
        needed: usize,
    ) -> (Vec<AgentType>, bool, bool) {
        if step.required_agents.is_empty() {
            return (Vec::new(), true, false);
        }
        let step_timeout = Duration::from_secs_f64(step.timeout_secs);
        loop {
            let responded = self.responded_agents(step, step_start).await;
            if responded.len() >= needed {
                return (responded, true, false);
            }

            let elapsed = self.elapsed().await;
            if elapsed >= budget {
                // Whole-scenario deadline hit mid-step: the step is
                // incomplete and the scenario fails.
                return (responded, false, true);
            }
            if elapsed.saturating_sub(step_active_start) >= step_timeout {
                // Step timeout only fails the step, never the scenario.
                warn!(step_id = %step.step_id, "step timed out waiting for responses");
                return (responded, true, false);
            }
            if self.gate().await != ScenarioState::Running {
                return (responded, false, false);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    async fn responded_agents(&self, step: &ScenarioStep, step_start: DateTime<Utc>) -> Vec<AgentType> {
        let responses = self.responses.lock().await;
        let mut agents = step
            .required_agents
            .iter()
            .copied()
            .filter(|agent| {
                responses.iter().any(|record| {
                    record.agent_type == Some(*agent)
                        && record.observed >= step_start
                        && step.expected_response_topics.contains(&record.topic)
                })
            })
            .collect::<Vec<_>>();
        agents.dedup();
        agents
    }

    async fn step_responses(
        &self,
        step: &ScenarioStep,
        step_start: DateTime<Utc>,
    ) -> std::collections::BTreeMap<AgentType, Value> {
        let responses = self.responses.lock().await;
        let mut map = std::collections::BTreeMap::new();
        for record in responses.iter() {
            let Some(agent) = record.agent_type else { continue };
            if record.observed >= step_start
                && step.expected_response_topics.contains(&record.topic)
                && step.required_agents.contains(&agent)
            {
                map.entry(agent).or_insert_with(|| record.payload.clone());
            }
        }
        map
    }

    async fn evaluate(&self, config: &ScenarioConfig) -> bool {
        let duration = self.elapsed().await.as_secs_f64();
        let (completed, successful, start) = {
            let run = self.inner.lock().await;
            let Some(result) = run.result.as_ref() else {
                return false;
            };
            (
                result.steps_completed,
                result.steps.iter().filter(|step| step.success).count(),
                result.start,
            )
        };
        let total = config.steps.len();

        if duration > config.max_duration_secs {
            return false;
        }
        if (completed as f64) < config.completion_ratio * total as f64 {
            return false;
        }
        if (successful as f64) < config.success_ratio * total as f64 {
            return false;
        }

        let unique = {
            let responses = self.responses.lock().await;
            let mut agents = responses
                .iter()
                .filter(|record| record.observed >= start)
                .filter_map(|record| record.agent_type)
                .collect::<Vec<_>>();
            agents.sort();
            agents.dedup();
            agents.len()
        };
        if unique < config.min_unique_agents {
            return false;
        }

        let counters = *self.counters.lock().await;
        config.required_actions.iter().all(|action| match action {
            ScenarioRequirement::LockdownInitiated => counters.lockdowns_initiated > 0,
            ScenarioRequirement::NetworkIsolation => counters.network_isolations > 0,
            ScenarioRequirement::EnergySavings => counters.energy_savings_achieved > 0,
        })
    }

    async fn complete(&self, config: &ScenarioConfig, success: bool) {
        self.finalize(config, ScenarioState::Completed, success, None).await;
        info!(scenario_id = %config.scenario_id, success, "scenario completed");
    }

    async fn fail(&self, config: &ScenarioConfig, error: String) {
        warn!(scenario_id = %config.scenario_id, %error, "scenario failed");
        self.finalize(config, ScenarioState::Failed, false, Some(error)).await;
    }

    async fn finalize(
        &self,
        config: &ScenarioConfig,
        final_state: ScenarioState,
        success: bool,
        error: Option<String>,
    ) {
        let duration = self.elapsed().await;
        let metrics = self.performance_metrics(config, duration).await;
        let events = self.events.lock().await.clone();
        {
            let mut run = self.inner.lock().await;
            if let Some(result) = run.result.as_mut() {
                result.final_state = final_state;
                result.end = Some(Utc::now());
                result.duration_secs = duration.as_secs_f64();
                result.success = success;
                result.error = error.clone();
                result.events = events;
                result.performance_metrics = metrics;
            }
        }
        self.state_tx.send_replace(final_state);

        let (topic, extra) = match final_state {
            ScenarioState::Failed => (
                topics::SCENARIO_FAILED,
                json!({ "error": error, "duration_secs": duration.as_secs_f64() }),
            ),
            _ => (
                topics::SCENARIO_COMPLETED,
                json!({ "success": success, "duration_secs": duration.as_secs_f64() }),
            ),
        };
        self.publish_lifecycle(topic, &config.scenario_id, extra).await;
    }

    async fn performance_metrics(
        &self,
        config: &ScenarioConfig,
        duration: Duration,
    ) -> ScenarioMetrics {
        let (completed, start) = {
            let run = self.inner.lock().await;
            run.result
                .as_ref()
                .map(|result| (result.steps_completed, result.start))
                .unwrap_or((0, Utc::now()))
        };
        let responses = self.responses.lock().await;
        let during_run = responses
            .iter()
            .filter(|record| record.observed >= start)
            .collect::<Vec<_>>();
        let mut unique = during_run
            .iter()
            .filter_map(|record| record.agent_type)
            .collect::<Vec<_>>();
        unique.sort();
        unique.dedup();
        let counters = *self.counters.lock().await;
        let total = config.steps.len().max(1);

        ScenarioMetrics {
            total_agent_responses: during_run.len(),
            unique_agents_responded: unique.len(),
            total_events: self.events.lock().await.len(),
            completion_rate: completed as f64 / total as f64,
            average_step_secs: duration.as_secs_f64() / completed.max(1) as f64,
            lockdowns_initiated: counters.lockdowns_initiated,
            network_isolations: counters.network_isolations,
            energy_savings_achieved: counters.energy_savings_achieved,
        }
    }

    /// Pauses a running scenario. Deadlines stop accruing until resume.
    pub async fn pause(&self) -> bool {
        if *self.state_tx.borrow() != ScenarioState::Running {
            return false;
        }
        {
            let mut run = self.inner.lock().await;
            run.pause_started = Some(Instant::now());
        }
        self.state_tx.send_replace(ScenarioState::Paused);
        let scenario_id = self.current_scenario_id().await;
        self.publish_lifecycle(topics::SCENARIO_PAUSED, &scenario_id, json!({})).await;
        info!("scenario paused");
        true
    }

    /// Resumes a paused scenario with the remaining budget re-armed.
    pub async fn resume(&self) -> bool {
        if *self.state_tx.borrow() != ScenarioState::Paused {
            return false;
        }
        {
            let mut run = self.inner.lock().await;
            if let Some(pause_started) = run.pause_started.take() {
                run.paused_total += pause_started.elapsed();
            }
        }
        self.state_tx.send_replace(ScenarioState::Running);
        let scenario_id = self.current_scenario_id().await;
        self.publish_lifecycle(topics::SCENARIO_RESUMED, &scenario_id, json!({})).await;
        info!("scenario resumed");
        true
    }

    /// Stops a running or paused scenario; the run ends unsuccessful.
    pub async fn stop(&self) -> bool {
        let state = *self.state_tx.borrow();
        if !matches!(state, ScenarioState::Running | ScenarioState::Paused) {
            return false;
        }
        let duration = self.elapsed().await;
        {
            let mut run = self.inner.lock().await;
            if let Some(result) = run.result.as_mut() {
                result.final_state = ScenarioState::Completed;
                result.end = Some(Utc::now());
                result.duration_secs = duration.as_secs_f64();
                result.success = false;
                result.error = Some("Scenario stopped by user".to_string());
            }
        }
        self.state_tx.send_replace(ScenarioState::Completed);
        let scenario_id = self.current_scenario_id().await;
        self.publish_lifecycle(topics::SCENARIO_STOPPED, &scenario_id, json!({})).await;
        info!("scenario stopped");
        true
    }

    /// Clears run state between demos: cancels nothing that is still
    /// running (reset is only legal from idle or terminal states), executes
    /// the cleanup steps, and publishes exactly one reset event.
    pub async fn reset(&self) -> anyhow::Result<()> {
        let state = *self.state_tx.borrow();
        if matches!(
            state,
            ScenarioState::Running | ScenarioState::Paused | ScenarioState::Initializing
        ) {
            anyhow::bail!("cannot reset while a scenario is active (state `{}`)", state.as_str());
        }
        self.state_tx.send_replace(ScenarioState::Resetting);

        let config = self.inner.lock().await.current.take();
        if let Some(config) = &config {
            for step in &config.cleanup_steps {
                if step.delay_secs > 0.0 {
                    tokio::time::sleep(Duration::from_secs_f64(step.delay_secs)).await;
                }
                self.publish_step_event(config, step, true).await;
            }
        }

        {
            let mut run = self.inner.lock().await;
            run.result = None;
            run.started_mono = None;
            run.paused_total = Duration::ZERO;
            run.pause_started = None;
            run.current_step = 0;
        }
        self.responses.lock().await.clear();
        self.events.lock().await.clear();
        *self.counters.lock().await = Counters::default();

        let payload = json!({ "timestamp": Utc::now(), "status": "completed" });
        if let Err(error) = self.bus.publish(Event::new(topics::SCENARIO_RESET, payload)).await {
            warn!(%error, "could not publish scenario reset");
        }
        self.state_tx.send_replace(ScenarioState::Idle);
        info!("scenario state reset");
        Ok(())
    }

    async fn gate(&self) -> ScenarioState {
        let mut rx = self.state_tx.subscribe();
        loop {
            let state = *rx.borrow_and_update();
            if state != ScenarioState::Paused {
                return state;
            }
            if rx.changed().await.is_err() {
                return state;
            }
        }
    }

    async fn elapsed(&self) -> Duration {
        elapsed_active(&*self.inner.lock().await)
    }

    async fn current_scenario_id(&self) -> String {
        self.inner
            .lock()
            .await
            .current
            .as_ref()
            .map(|config| config.scenario_id.clone())
            .unwrap_or_default()
    }

    async fn publish_step_event(&self, config: &ScenarioConfig, step: &ScenarioStep, cleanup: bool) {
        let mut payload = step.event_data.clone();
        if let Some(object) = payload.as_object_mut() {
            object.insert("scenario_id".to_string(), json!(&config.scenario_id));
            object.insert("step_id".to_string(), json!(&step.step_id));
            object.insert("timestamp".to_string(), json!(Utc::now()));
            if cleanup {
                object.insert("cleanup".to_string(), json!(true));
            }
        }
        if let Err(error) = self.bus.publish(Event::new(step.event_type.clone(), payload)).await {
            warn!(step_id = %step.step_id, %error, "could not publish step event");
        }
    }

    async fn publish_lifecycle(&self, topic: &str, scenario_id: &str, extra: Value) {
        let mut payload = json!({
            "scenario_id": scenario_id,
            "current_step": self.inner.lock().await.current_step,
            "timestamp": Utc::now(),
        });
        if let (Some(object), Some(extra)) = (payload.as_object_mut(), extra.as_object()) {
            for (key, value) in extra {
                object.insert(key.clone(), value.clone());
            }
        }
        if let Err(error) = self.bus.publish(Event::new(topic.to_string(), payload)).await {
            warn!(topic, %error, "could not publish scenario lifecycle event");
        }
    }

    async fn push_event(&self, event: Value) {
        self.events.lock().await.push(event);
    }

    fn active(&self) -> bool {
        matches!(
            *self.state_tx.borrow(),
            ScenarioState::Initializing | ScenarioState::Running | ScenarioState::Paused
        )
    }

    async fn record_response(&self, event: Event) {
        if !self.active() {
            return;
        }
        let agent_type = event
            .payload
            .get("agent_type")
            .and_then(Value::as_str)
            .and_then(AgentType::parse)
            .or_else(|| agent_from_topic(&event.topic));
        self.responses.lock().await.push(ResponseRecord {
            topic: event.topic.clone(),
            agent_type,
            observed: Utc::now(),
            payload: event.payload.clone(),
        });
        self.push_event(json!({
            "type": "agent_response",
            "event_type": event.topic,
            "agent_type": agent_type.map(|agent| agent.as_str()),
            "timestamp": Utc::now(),
        }))
        .await;
    }

    async fn record_lockdown(&self, event: Event) {
        if !self.active() || !self.running_scenario_is(ScenarioType::SecurityBreach).await {
            return;
        }
        let mut counters = self.counters.lock().await;
        counters.lockdowns_initiated += 1;
        let isolations = event
            .payload
            .get("actions")
            .and_then(Value::as_array)
            .map(|actions| {
                actions
                    .iter()
                    .filter(|action| action.as_str() == Some("network_isolation"))
                    .count() as u64
            })
            .unwrap_or(0);
        counters.network_isolations += isolations;
    }

    async fn record_energy_decision(&self) {
        if !self.active() || !self.running_scenario_is(ScenarioType::EnergyOptimization).await {
            return;
        }
        self.counters.lock().await.energy_savings_achieved += 20;
    }

    async fn record_energy_verification(&self, event: Event) {
        if !self.active() || !self.running_scenario_is(ScenarioType::EnergyOptimization).await {
            return;
        }
        if event
            .payload
            .get("optimization_complete")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            self.counters.lock().await.energy_savings_achieved += 5;
        }
    }

    async fn running_scenario_is(&self, scenario_type: ScenarioType) -> bool {
        self.inner
            .lock()
            .await
            .current
            .as_ref()
            .map(|config| config.scenario_type == scenario_type)
            .unwrap_or(false)
    }
}

fn elapsed_active(run: &RunState) -> Duration {
    let Some(started) = run.started_mono else {
        return Duration::ZERO;
    };
    let mut elapsed = started.elapsed().saturating_sub(run.paused_total);
    if let Some(pause_started) = run.pause_started {
        elapsed = elapsed.saturating_sub(pause_started.elapsed());
    }
    elapsed
}

fn quorum_needed(step: &ScenarioStep, ratio: f64) -> usize {
    (ratio * step.required_agents.len() as f64).ceil() as usize
}

fn agent_from_topic(topic: &str) -> Option<AgentType> {
    if topic.starts_with("hvac.") {
        Some(AgentType::Hvac)
    } else if topic.starts_with("power.") {
        Some(AgentType::Power)
    } else if topic.starts_with("security.") {
        Some(AgentType::Security)
    } else if topic.starts_with("network.") {
        Some(AgentType::Network)
    } else if topic.starts_with("facility.coordination.") {
        Some(AgentType::Coordinator)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atrium_core::BusConfig;
    use std::sync::Mutex as StdMutex;

    fn quick_config(steps: Vec<ScenarioStep>, max_duration_secs: f64) -> ScenarioConfig {
        ScenarioConfig {
            scenario_id: "test_scenario".to_string(),
            name: "Test".to_string(),
            description: String::new(),
            scenario_type: ScenarioType::RoutineMaintenance,
            max_duration_secs,
            steps,
            cleanup_steps: Vec::new(),
            step_quorum_ratio: 0.8,
            completion_ratio: 0.8,
            success_ratio: 0.6,
            min_unique_agents: 0,
            required_actions: Vec::new(),
        }
    }

    fn quick_step(step_id: &str, event_type: &str) -> ScenarioStep {
        ScenarioStep {
            delay_secs: 0.0,
            timeout_secs: 2.0,
            ..ScenarioStep::new(step_id, event_type, json!({}))
        }
    }

    /// Simulated worker: republishes a canned response when its input topic
    /// fires.
    async fn echo_agent(bus: &EventBus, input: &'static str, output: &'static str, agent: AgentType) {
        let bus_out = bus.clone();
        bus.subscribe_fn(input, move |_event| {
            let bus = bus_out.clone();
            async move {
                bus.publish(Event::new(
                    output,
                    json!({ "agent_type": agent.as_str(), "decision": {} }),
                ))
                .await?;
                Ok(())
            }
        })
        .await;
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

    #[tokio::test]
    async fn scenario_with_responsive_agents_succeeds() {
        let bus = EventBus::new(BusConfig::default());
        let orchestrator = ScenarioOrchestrator::spawn(bus.clone(), ScenarioDurations::default()).await;
        echo_agent(&bus, "probe.one", topics::HVAC_COOLING_DECISION, AgentType::Hvac).await;
        bus.start().await;

        let mut step = quick_step("probe", "probe.one");
        step.expected_response_topics = vec![topics::HVAC_COOLING_DECISION.to_string()];
        step.required_agents = vec![AgentType::Hvac];
        let config = quick_config(vec![quick_step("warmup", topics::SCENARIO_START), step], 30.0);

        let result = orchestrator.run_config(config).await.unwrap();
        assert!(result.success);
        assert_eq!(result.steps_completed, 2);
        assert_eq!(result.steps.len(), 2);
        assert!(result.steps.iter().all(|step| step.success));
        assert_eq!(orchestrator.state(), ScenarioState::Completed);
        assert!(result.start <= result.steps[0].start);
        assert!(result.steps[0].end.unwrap() <= result.end.unwrap());
        bus.stop().await;
    }

    #[tokio::test]
    async fn unresponsive_step_fails_but_scenario_proceeds() {
        let bus = EventBus::new(BusConfig::default());
        let orchestrator = ScenarioOrchestrator::spawn(bus.clone(), ScenarioDurations::default()).await;
        bus.start().await;

        let mut silent = quick_step("silent", "nobody.home");
        silent.timeout_secs = 0.3;
        silent.expected_response_topics = vec![topics::HVAC_COOLING_DECISION.to_string()];
        silent.required_agents = vec![AgentType::Hvac];
        let config = quick_config(
            vec![silent, quick_step("trailer", topics::SCENARIO_START)],
            30.0,
        );

        let result = orchestrator.run_config(config).await.unwrap();
        // Both steps completed (ran to their end), one unsuccessfully; 1/2
        // completed-successfully misses the 0.6 success cutoff only if fewer
        // than 60% succeeded, and 50% < 60%, so the scenario fails overall.
        assert_eq!(result.steps_completed, 2);
        assert!(!result.steps[0].success);
        assert!(result.steps[1].success);
        assert!(!result.success);
        bus.stop().await;
    }

    #[tokio::test]
    async fn deadline_mid_step_fails_scenario_with_timeout_error() {
        let bus = EventBus::new(BusConfig::default());
        let orchestrator = ScenarioOrchestrator::spawn(bus.clone(), ScenarioDurations::default()).await;
        bus.start().await;

        let mut silent = quick_step("stall", "nobody.home");
        silent.timeout_secs = 30.0;
        silent.expected_response_topics = vec![topics::HVAC_COOLING_DECISION.to_string()];
        silent.required_agents = vec![AgentType::Hvac];
        let config = quick_config(vec![silent], 0.4);

        let result = orchestrator.run_config(config).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.final_state, ScenarioState::Failed);
        assert!(result.error.as_deref().unwrap().starts_with("Scenario timeout after"));
        assert_eq!(result.steps_completed, 0);
        assert_eq!(orchestrator.state(), ScenarioState::Failed);
        bus.stop().await;
    }

    #[tokio::test]
    async fn trigger_is_rejected_while_running() {
        let bus = EventBus::new(BusConfig::default());
        let orchestrator = ScenarioOrchestrator::spawn(bus.clone(), ScenarioDurations::default()).await;
        bus.start().await;

        let mut stall = quick_step("stall", "nobody.home");
        stall.timeout_secs = 5.0;
        stall.expected_response_topics = vec![topics::HVAC_COOLING_DECISION.to_string()];
        stall.required_agents = vec![AgentType::Hvac];
        let config = quick_config(vec![stall], 30.0);

        let runner = orchestrator.clone();
        let run = tokio::spawn(async move { runner.run_config(config).await });
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(orchestrator.state(), ScenarioState::Running);
        assert!(orchestrator
            .trigger_scenario(ScenarioType::RoutineMaintenance)
            .await
            .is_err());

        orchestrator.stop().await;
        let result = run.await.unwrap().unwrap();
        assert_eq!(result.error.as_deref(), Some("Scenario stopped by user"));
        bus.stop().await;
    }

    #[tokio::test]
    async fn reset_twice_publishes_one_event_each_and_idles() {
        let bus = EventBus::new(BusConfig::default());
        let orchestrator = ScenarioOrchestrator::spawn(bus.clone(), ScenarioDurations::default()).await;
        let resets = collect(&bus, topics::SCENARIO_RESET).await;
        bus.start().await;

        let config = quick_config(vec![quick_step("only", topics::SCENARIO_START)], 30.0);
        let result = orchestrator.run_config(config).await.unwrap();
        assert_eq!(result.final_state, ScenarioState::Completed);

        orchestrator.reset().await.unwrap();
        assert_eq!(orchestrator.state(), ScenarioState::Idle);
        orchestrator.reset().await.unwrap();
        assert_eq!(orchestrator.state(), ScenarioState::Idle);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(resets.lock().unwrap().len(), 2);
        assert!(orchestrator.result().await.is_none());
        bus.stop().await;
    }

    #[tokio::test]
    async fn pause_extends_the_scenario_deadline() {
        let bus = EventBus::new(BusConfig::default());
        let orchestrator = ScenarioOrchestrator::spawn(bus.clone(), ScenarioDurations::default()).await;
        echo_agent(&bus, "probe.two", topics::HVAC_COOLING_DECISION, AgentType::Hvac).await;
        bus.start().await;

        let mut step = quick_step("probe", "probe.two");
        step.delay_secs = 0.3;
        step.expected_response_topics = vec![topics::HVAC_COOLING_DECISION.to_string()];
        step.required_agents = vec![AgentType::Hvac];
        // Budget 0.6s of active time; we pause for 0.5s during the delay.
        // Without pause accounting the scenario would time out.
        let config = quick_config(vec![step], 0.6);

        let runner = orchestrator.clone();
        let run = tokio::spawn(async move { runner.run_config(config).await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(orchestrator.pause().await);
        assert_eq!(orchestrator.state(), ScenarioState::Paused);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(orchestrator.resume().await);

        let result = run.await.unwrap().unwrap();
        assert!(result.success, "error: {:?}", result.error);
        bus.stop().await;
    }

    #[tokio::test]
    async fn lifecycle_events_are_published() {
        let bus = EventBus::new(BusConfig::default());
        let orchestrator = ScenarioOrchestrator::spawn(bus.clone(), ScenarioDurations::default()).await;
        let initialized = collect(&bus, topics::SCENARIO_INITIALIZED).await;
        let completed = collect(&bus, topics::SCENARIO_COMPLETED).await;
        bus.start().await;

        let config = quick_config(vec![quick_step("only", topics::SCENARIO_START)], 30.0);
        orchestrator.run_config(config).await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(initialized.lock().unwrap().len(), 1);
        assert_eq!(completed.lock().unwrap().len(), 1);
        assert_eq!(
            initialized.lock().unwrap()[0]["scenario_id"],
            "test_scenario"
        );
        bus.stop().await;
    }

    #[tokio::test]
    async fn energy_scenario_requires_recorded_savings() {
        let bus = EventBus::new(BusConfig::default());
        let orchestrator = ScenarioOrchestrator::spawn(bus.clone(), ScenarioDurations::default()).await;
        bus.start().await;

        let mut verify = quick_step("verify", topics::HVAC_TEMPERATURE_CHANGED);
        verify.event_data = json!({ "temperature": 22.0, "optimization_complete": true });
        // The settle step's delay leaves time for the verification event to
        // come back through the bus before success is evaluated.
        let mut settle = quick_step("settle", topics::SCENARIO_START);
        settle.delay_secs = 0.5;
        let mut config = quick_config(vec![verify, settle], 30.0);
        config.scenario_type = ScenarioType::EnergyOptimization;
        config.required_actions = vec![ScenarioRequirement::EnergySavings];

        let result = orchestrator.run_config(config).await.unwrap();
        // The orchestrator's own handler observes the published verification
        // event and credits the savings counter.
        assert!(result.performance_metrics.energy_savings_achieved > 0);
        assert!(result.success, "error: {:?}", result.error);
        bus.stop().await;
    }

    #[tokio::test]
    async fn available_scenarios_lists_all_builtins() {
        let bus = EventBus::new(BusConfig::default());
        let orchestrator = ScenarioOrchestrator::spawn(bus.clone(), ScenarioDurations::default()).await;
        let summaries = orchestrator.available_scenarios();
        assert_eq!(summaries.len(), 4);
        assert!(summaries.iter().any(|summary| summary.scenario_type == ScenarioType::CoolingCrisis));
    }
}
