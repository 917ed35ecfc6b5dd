use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use atrium_core::{MemoryProbe, OrchestratorConfig};
use atrium_providers::{InvokeOptions, LlmClient, StaticClient};
use atrium_types::AgentType;

use crate::catalog::{profile_for, ModelPriority, ModelProfile};

#[derive(Debug, Clone)]
pub struct ModelManagerConfig {
    pub max_concurrent_models: usize,
    pub memory_threshold_gb: f64,
    pub max_memory_gb: f64,
    /// Non-model memory charged against the hard cap.
    pub baseline_memory_mb: f64,
    pub cleanup_interval: Duration,
}

impl Default for ModelManagerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_models: 2,
            memory_threshold_gb: 7.0,
            max_memory_gb: 8.0,
            baseline_memory_mb: 1024.0,
            cleanup_interval: Duration::from_secs(30),
        }
    }
}

impl ModelManagerConfig {
    pub fn from_orchestrator(config: &OrchestratorConfig) -> Self {
        Self {
            max_concurrent_models: config.max_concurrent_models,
            memory_threshold_gb: config.memory_threshold_gb,
            max_memory_gb: config.max_memory_gb,
            baseline_memory_mb: config.baseline_memory_mb,
            cleanup_interval: Duration::from_secs(config.cleanup_interval_secs),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ModelManagerError {
    /// Retryable; the caller is expected to fall back.
    #[error("out of memory: {0}")]
    OutOfMemory(String),
    #[error(transparent)]
    Load(#[from] anyhow::Error),
}

/// Builds live model clients. The real backend (Ollama, remote API) is
/// injected from outside the core.
#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load(
        &self,
        agent_type: AgentType,
        profile: &ModelProfile,
    ) -> anyhow::Result<Arc<dyn LlmClient>>;
}

/// Loader that answers instantly with a fixed reply; for tests and dry runs.
pub struct InstantLoader {
    reply: String,
}

impl InstantLoader {
    pub fn new(reply: impl Into<String>) -> Self {
        Self { reply: reply.into() }
    }
}

#[async_trait]
impl ModelLoader for InstantLoader {
    async fn load(
        &self,
        _agent_type: AgentType,
        profile: &ModelProfile,
    ) -> anyhow::Result<Arc<dyn LlmClient>> {
        Ok(Arc::new(StaticClient::new(profile.model_id.clone(), self.reply.clone())))
    }
}

/// Borrowed access to a cached model, valid for a single invocation.
#[derive(Clone)]
pub struct ModelHandle {
    pub model_id: String,
    pub agent_type: AgentType,
    pub client: Arc<dyn LlmClient>,
    pub options: InvokeOptions,
}

struct Slot {
    key: String,
    model_id: String,
    agent_type: AgentType,
    priority: ModelPriority,
    last_used: DateTime<Utc>,
    last_used_seq: u64,
    usage_count: u64,
    estimated_memory_mb: f64,
    load_time_ms: u64,
    client: Arc<dyn LlmClient>,
    options: InvokeOptions,
}

impl Slot {
    fn handle(&self) -> ModelHandle {
        ModelHandle {
            model_id: self.model_id.clone(),
            agent_type: self.agent_type,
            client: self.client.clone(),
            options: self.options.clone(),
        }
    }

    fn info(&self) -> SlotInfo {
        SlotInfo {
            model_id: self.model_id.clone(),
            agent_type: self.agent_type,
            priority: self.priority,
            last_used: self.last_used,
            usage_count: self.usage_count,
            estimated_memory_mb: self.estimated_memory_mb,
            load_time_ms: self.load_time_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SlotInfo {
    pub model_id: String,
    pub agent_type: AgentType,
    pub priority: ModelPriority,
    pub last_used: DateTime<Utc>,
    pub usage_count: u64,
    pub estimated_memory_mb: f64,
    pub load_time_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryStats {
    pub total_gb: f64,
    pub used_gb: f64,
    pub available_gb: f64,
    pub percent: f64,
    pub active_models: usize,
    pub estimated_model_memory_mb: f64,
    pub load_count: u64,
    pub eviction_count: u64,
    pub cleanup_count: u64,
    pub slots: Vec<SlotInfo>,
}

/// Owns at most `max_concurrent_models` live model instances under a soft
/// memory threshold and a hard cap. Cached slots are evicted in ascending
/// `(priority, last_used)` order; critical slots survive ordinary cleanup.
pub struct ModelManager {
    config: ModelManagerConfig,
    probe: Arc<dyn MemoryProbe>,
    loader: Arc<dyn ModelLoader>,
    slots: Mutex<Vec<Slot>>,
    seq: AtomicU64,
    load_count: AtomicU64,
    eviction_count: AtomicU64,
    cleanup_count: AtomicU64,
    monitor: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl ModelManager {
    pub fn new(
        config: ModelManagerConfig,
        probe: Arc<dyn MemoryProbe>,
        loader: Arc<dyn ModelLoader>,
    ) -> Self {
        Self {
            config,
            probe,
            loader,
            slots: Mutex::new(Vec::new()),
            seq: AtomicU64::new(0),
            load_count: AtomicU64::new(0),
            eviction_count: AtomicU64::new(0),
            cleanup_count: AtomicU64::new(0),
            monitor: Mutex::new(None),
        }
    }

    /// Returns the cached model for the agent type, loading it if necessary.
    /// When memory is tight this runs ordinary then forced cleanup before
    /// giving up with a retryable out-of-memory error.
    pub async fn get_or_load(
        &self,
        agent_type: AgentType,
    ) -> Result<ModelHandle, ModelManagerError> {
        let profile = profile_for(agent_type);
        let key = slot_key(agent_type, &profile.model_id);

        if let Some(handle) = self.touch(&key).await {
            return Ok(handle);
        }

        let (feasible, _) = self.can_load(profile.estimated_memory_mb).await;
        if !feasible {
            self.cleanup(false).await;
            let (feasible, _) = self.can_load(profile.estimated_memory_mb).await;
            if !feasible {
                self.cleanup(true).await;
                let (feasible, reason) = self.can_load(profile.estimated_memory_mb).await;
                if !feasible {
                    warn!(agent_type = %agent_type, reason, "model load refused");
                    return Err(ModelManagerError::OutOfMemory(reason));
                }
            }
        }

        let started = Instant::now();
        let client = self.loader.load(agent_type, &profile).await?;
        let load_time_ms = started.elapsed().as_millis() as u64;
        info!(agent_type = %agent_type, model_id = %profile.model_id, load_time_ms, "model loaded");

        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.iter_mut().find(|slot| slot.key == key) {
            // Lost a race with a concurrent load of the same model.
            slot.last_used = Utc::now();
            slot.last_used_seq = self.seq.fetch_add(1, Ordering::SeqCst);
            slot.usage_count += 1;
            return Ok(slot.handle());
        }

        while slots.len() >= self.config.max_concurrent_models {
            let Some(index) = eviction_candidate(&slots, false) else {
                return Err(ModelManagerError::OutOfMemory(
                    "only critical-priority models remain cached".to_string(),
                ));
            };
            let evicted = slots.remove(index);
            self.eviction_count.fetch_add(1, Ordering::SeqCst);
            info!(model_id = %evicted.model_id, "evicted cached model");
        }

        let slot = Slot {
            key,
            model_id: profile.model_id.clone(),
            agent_type,
            priority: profile.priority,
            last_used: Utc::now(),
            last_used_seq: self.seq.fetch_add(1, Ordering::SeqCst),
            usage_count: 1,
            estimated_memory_mb: profile.estimated_memory_mb,
            load_time_ms,
            client,
            options: InvokeOptions {
                temperature: profile.temperature,
                max_tokens: profile.max_tokens,
                timeout: Duration::from_secs(30),
            },
        };
        let handle = slot.handle();
        slots.push(slot);
        self.load_count.fetch_add(1, Ordering::SeqCst);
        Ok(handle)
    }

    pub async fn unload(&self, model_id: &str) -> bool {
        let mut slots = self.slots.lock().await;
        let before = slots.len();
        slots.retain(|slot| slot.model_id != model_id);
        before != slots.len()
    }

    /// Evicts cached models. Ordinary cleanup removes non-critical slots in
    /// eviction order while the manager is over budget, always leaving at
    /// least one slot. Forced cleanup keeps only the highest-priority slot.
    pub async fn cleanup(&self, force: bool) -> usize {
        let mut slots = self.slots.lock().await;
        let mut evicted = 0;

        if force {
            if slots.len() > 1 {
                let keep = slots
                    .iter()
                    .enumerate()
                    .max_by_key(|(_, slot)| (slot.priority.evict_rank(), slot.last_used_seq))
                    .map(|(index, _)| index)
                    .unwrap_or(0);
                let kept = slots.swap_remove(keep);
                evicted = slots.len();
                for slot in slots.drain(..) {
                    info!(model_id = %slot.model_id, "evicted cached model");
                }
                slots.push(kept);
            }
        } else {
            while slots.len() > 1 && self.over_budget(&slots) {
                let Some(index) = eviction_candidate(&slots, false) else {
                    break;
                };
                let slot = slots.remove(index);
                info!(model_id = %slot.model_id, "evicted cached model");
                evicted += 1;
            }
        }

        self.cleanup_count.fetch_add(1, Ordering::SeqCst);
        self.eviction_count.fetch_add(evicted as u64, Ordering::SeqCst);
        evicted
    }

    /// Whether a model with the given footprint could be admitted right now.
    pub async fn can_load(&self, estimated_memory_mb: f64) -> (bool, String) {
        let slots = self.slots.lock().await;

        if slots.len() >= self.config.max_concurrent_models {
            return (
                false,
                format!(
                    "maximum concurrent models reached ({})",
                    self.config.max_concurrent_models
                ),
            );
        }

        let snapshot = self.probe.sample();
        if snapshot.used_gb >= self.config.memory_threshold_gb {
            return (
                false,
                format!(
                    "memory threshold exceeded: {:.1}GB >= {:.1}GB",
                    snapshot.used_gb, self.config.memory_threshold_gb
                ),
            );
        }

        let cached_mb: f64 = slots.iter().map(|slot| slot.estimated_memory_mb).sum();
        let projected_mb = self.config.baseline_memory_mb + cached_mb + estimated_memory_mb;
        let cap_mb = self.config.max_memory_gb * 1024.0;
        if projected_mb > cap_mb {
            return (
                false,
                format!("would exceed maximum memory: {projected_mb:.0}MB > {cap_mb:.0}MB"),
            );
        }

        (true, "memory check passed".to_string())
    }

    pub async fn stats(&self) -> MemoryStats {
        let slots = self.slots.lock().await;
        let snapshot = self.probe.sample();
        MemoryStats {
            total_gb: snapshot.total_gb,
            used_gb: snapshot.used_gb,
            available_gb: snapshot.available_gb,
            percent: snapshot.percent,
            active_models: slots.len(),
            estimated_model_memory_mb: slots.iter().map(|slot| slot.estimated_memory_mb).sum(),
            load_count: self.load_count.load(Ordering::SeqCst),
            eviction_count: self.eviction_count.load(Ordering::SeqCst),
            cleanup_count: self.cleanup_count.load(Ordering::SeqCst),
            slots: slots.iter().map(Slot::info).collect(),
        }
    }

    /// Samples memory on an interval and runs ordinary cleanup above the
    /// threshold.
    pub async fn start_monitoring(self: &Arc<Self>) {
        let mut monitor = self.monitor.lock().await;
        if monitor.is_some() {
            return;
        }
        let cancel = CancellationToken::new();
        let manager = self.clone();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(manager.config.cleanup_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let snapshot = manager.probe.sample();
                        if snapshot.used_gb >= manager.config.memory_threshold_gb {
                            warn!(
                                used_gb = snapshot.used_gb,
                                threshold_gb = manager.config.memory_threshold_gb,
                                "memory threshold exceeded"
                            );
                            manager.cleanup(false).await;
                        }
                    }
                }
            }
        });
        *monitor = Some((cancel, handle));
    }

    pub async fn stop_monitoring(&self) {
        if let Some((cancel, handle)) = self.monitor.lock().await.take() {
            cancel.cancel();
            let _ = handle.await;
        }
    }

    async fn touch(&self, key: &str) -> Option<ModelHandle> {
        let mut slots = self.slots.lock().await;
        let slot = slots.iter_mut().find(|slot| slot.key == key)?;
        slot.last_used = Utc::now();
        slot.last_used_seq = self.seq.fetch_add(1, Ordering::SeqCst);
        slot.usage_count += 1;
        Some(slot.handle())
    }

    fn over_budget(&self, slots: &[Slot]) -> bool {
        if slots.len() >= self.config.max_concurrent_models {
            return true;
        }
        if self.probe.sample().used_gb >= self.config.memory_threshold_gb {
            return true;
        }
        let cached_mb: f64 = slots.iter().map(|slot| slot.estimated_memory_mb).sum();
        self.config.baseline_memory_mb + cached_mb > self.config.max_memory_gb * 1024.0
    }
}

fn slot_key(agent_type: AgentType, model_id: &str) -> String {
    format!("{agent_type}:{model_id}")
}

fn eviction_candidate(slots: &[Slot], allow_critical: bool) -> Option<usize> {
    slots
        .iter()
        .enumerate()
        .filter(|(_, slot)| allow_critical || slot.priority != ModelPriority::Critical)
        .min_by_key(|(_, slot)| (slot.priority.evict_rank(), slot.last_used_seq))
        .map(|(index, _)| index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use atrium_core::FixedMemoryProbe;

    fn manager_with(probe: Arc<FixedMemoryProbe>) -> Arc<ModelManager> {
        Arc::new(ModelManager::new(
            ModelManagerConfig::default(),
            probe,
            Arc::new(InstantLoader::new("ok")),
        ))
    }

    #[tokio::test]
    async fn cached_model_is_reused_and_touched() {
        let probe = Arc::new(FixedMemoryProbe::new(16.0, 4.0));
        let manager = manager_with(probe);

        let first = manager.get_or_load(AgentType::Hvac).await.unwrap();
        let second = manager.get_or_load(AgentType::Hvac).await.unwrap();
        assert_eq!(first.model_id, second.model_id);

        let stats = manager.stats().await;
        assert_eq!(stats.active_models, 1);
        assert_eq!(stats.load_count, 1);
        assert_eq!(stats.slots[0].usage_count, 2);
    }

    #[tokio::test]
    async fn slot_count_never_exceeds_limit() {
        let probe = Arc::new(FixedMemoryProbe::new(16.0, 4.0));
        let manager = manager_with(probe);

        for agent in [AgentType::Power, AgentType::Network, AgentType::Hvac] {
            manager.get_or_load(agent).await.unwrap();
            assert!(manager.stats().await.active_models <= 2);
        }
    }

    #[tokio::test]
    async fn third_load_evicts_the_non_critical_slot() {
        let probe = Arc::new(FixedMemoryProbe::new(16.0, 4.0));
        let manager = manager_with(probe);

        manager.get_or_load(AgentType::Security).await.unwrap();
        manager.get_or_load(AgentType::Power).await.unwrap();
        manager.get_or_load(AgentType::Hvac).await.unwrap();

        let stats = manager.stats().await;
        let agents = stats
            .slots
            .iter()
            .map(|slot| slot.agent_type)
            .collect::<Vec<_>>();
        assert!(agents.contains(&AgentType::Security));
        assert!(agents.contains(&AgentType::Hvac));
        assert!(!agents.contains(&AgentType::Power));
    }

    #[tokio::test]
    async fn tight_memory_evicts_lru_then_loads_critical() {
        let probe = Arc::new(FixedMemoryProbe::new(8.0, 6.8));
        let manager = manager_with(probe);

        manager.get_or_load(AgentType::Network).await.unwrap();
        manager.get_or_load(AgentType::Power).await.unwrap();

        let handle = manager.get_or_load(AgentType::Coordinator).await.unwrap();
        assert_eq!(handle.agent_type, AgentType::Coordinator);

        let stats = manager.stats().await;
        assert!(stats.active_models <= 2);
        assert!(stats.eviction_count >= 1);
        assert!(stats
            .slots
            .iter()
            .all(|slot| slot.agent_type != AgentType::Network));
    }

    #[tokio::test]
    async fn over_threshold_memory_refuses_loads() {
        let probe = Arc::new(FixedMemoryProbe::new(8.0, 7.5));
        let manager = manager_with(probe);
        let result = manager.get_or_load(AgentType::Hvac).await;
        assert!(matches!(result, Err(ModelManagerError::OutOfMemory(_))));
    }

    #[tokio::test]
    async fn forced_cleanup_keeps_only_highest_priority() {
        let probe = Arc::new(FixedMemoryProbe::new(16.0, 4.0));
        let manager = manager_with(probe);

        manager.get_or_load(AgentType::Network).await.unwrap();
        manager.get_or_load(AgentType::Security).await.unwrap();

        let evicted = manager.cleanup(true).await;
        assert_eq!(evicted, 1);

        let stats = manager.stats().await;
        assert_eq!(stats.active_models, 1);
        assert_eq!(stats.slots[0].agent_type, AgentType::Security);
    }

    #[tokio::test]
    async fn ordinary_cleanup_never_evicts_critical() {
        let probe = Arc::new(FixedMemoryProbe::new(16.0, 4.0));
        let manager = manager_with(probe.clone());

        manager.get_or_load(AgentType::Security).await.unwrap();
        manager.get_or_load(AgentType::Coordinator).await.unwrap();

        probe.set_used_gb(7.9);
        manager.cleanup(false).await;

        // Both critical slots survive even while over threshold; cleanup
        // never drops below one slot and skips critical entries entirely.
        assert_eq!(manager.stats().await.active_models, 2);
    }

    #[tokio::test]
    async fn unload_removes_named_model() {
        let probe = Arc::new(FixedMemoryProbe::new(16.0, 4.0));
        let manager = manager_with(probe);
        let handle = manager.get_or_load(AgentType::Hvac).await.unwrap();

        assert!(manager.unload(&handle.model_id).await);
        assert!(!manager.unload(&handle.model_id).await);
        assert_eq!(manager.stats().await.active_models, 0);
    }

    #[tokio::test]
    async fn monitor_cleans_up_above_threshold() {
        let probe = Arc::new(FixedMemoryProbe::new(8.0, 4.0));
        let manager = Arc::new(ModelManager::new(
            ModelManagerConfig {
                cleanup_interval: Duration::from_millis(20),
                ..ModelManagerConfig::default()
            },
            probe.clone(),
            Arc::new(InstantLoader::new("ok")),
        ));

        manager.get_or_load(AgentType::Power).await.unwrap();
        manager.get_or_load(AgentType::Network).await.unwrap();

        probe.set_used_gb(7.5);
        manager.start_monitoring().await;
        tokio::time::sleep(Duration::from_millis(120)).await;
        manager.stop_monitoring().await;

        assert_eq!(manager.stats().await.active_models, 1);
    }
}
