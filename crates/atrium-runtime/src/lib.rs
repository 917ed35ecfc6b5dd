use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use atrium_coordinator::{Coordinator, CoordinatorConfig};
use atrium_core::{
    EventBus, KvStore, MemoryProbe, OrchestratorConfig, RecoveryManager, RecoveryReport,
    StateManager,
};
use atrium_models::{ModelLoader, ModelManager, ModelManagerConfig};
use atrium_observability::{init_process_logging, ProcessKind, WorkerGuard};
use atrium_providers::FallbackResponder;
use atrium_scenarios::ScenarioOrchestrator;
use atrium_workers::{
    HvacSpecialist, NetworkSpecialist, PowerSpecialist, SecuritySpecialist, Specialist, Worker,
};

/// The assembled facility: bus, model manager, the four specialists, the
/// coordinator, the scenario orchestrator, and state/recovery management.
/// All collaborators (model loader, KV store, memory probe) are injected;
/// nothing here reaches for process-wide state.
pub struct FacilityRuntime {
    config: OrchestratorConfig,
    bus: EventBus,
    models: Arc<ModelManager>,
    fallback: Arc<FallbackResponder>,
    workers: Vec<Arc<Worker>>,
    coordinator: Arc<Coordinator>,
    orchestrator: Arc<ScenarioOrchestrator>,
    state: Arc<StateManager>,
    recovery: Arc<RecoveryManager>,
    /// Keeps the non-blocking log appender alive for the runtime's lifetime.
    _log_guard: Option<WorkerGuard>,
}

impl FacilityRuntime {
    pub async fn bootstrap(
        config: OrchestratorConfig,
        loader: Arc<dyn ModelLoader>,
        kv: Arc<dyn KvStore>,
        probe: Arc<dyn MemoryProbe>,
    ) -> anyhow::Result<FacilityRuntime> {
        let log_guard = match &config.logs_dir {
            Some(dir) => match init_process_logging(
                ProcessKind::Orchestrator,
                Path::new(dir),
                config.log_retention_days,
            ) {
                Ok((guard, init)) => {
                    info!(logs_dir = %init.logs_dir, prefix = %init.prefix, "file logging initialized");
                    Some(guard)
                }
                Err(error) => {
                    warn!(%error, "file logging unavailable; continuing with console only");
                    None
                }
            },
            None => None,
        };

        let bus = EventBus::new(config.bus_config());
        let models = Arc::new(ModelManager::new(
            ModelManagerConfig::from_orchestrator(&config),
            probe,
            loader,
        ));
        let fallback = Arc::new(FallbackResponder::new());

        let specialists: Vec<Arc<dyn Specialist>> = vec![
            Arc::new(HvacSpecialist),
            Arc::new(PowerSpecialist),
            Arc::new(SecuritySpecialist),
            Arc::new(NetworkSpecialist),
        ];
        let mut workers = Vec::with_capacity(specialists.len());
        for specialist in specialists {
            workers.push(
                Worker::spawn(
                    specialist,
                    bus.clone(),
                    models.clone(),
                    fallback.clone(),
                    config.worker_timeout(),
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

        let orchestrator =
            ScenarioOrchestrator::spawn(bus.clone(), config.scenario_max_durations.clone()).await;

        let state = Arc::new(StateManager::new(kv.clone(), config.kv_ttl()));
        let recovery = Arc::new(RecoveryManager::new(
            bus.clone(),
            state.clone(),
            kv,
            config.kv_ttl(),
            config.recovery_timeout(),
        ));

        // Shutdown snapshots every worker so a later recovery can prove all
        // of them back into existence.
        let snapshot_workers = workers.clone();
        let snapshot_state = state.clone();
        recovery
            .register_shutdown_callback(Box::new(move || {
                let workers = snapshot_workers.clone();
                let state = snapshot_state.clone();
                Box::pin(async move {
                    for worker in &workers {
                        let snapshot = worker.state_snapshot().await;
                        if let Err(error) = state
                            .save_current(
                                &snapshot.agent_id,
                                snapshot.agent_type,
                                snapshot.state_data.clone(),
                            )
                            .await
                        {
                            warn!(agent_id = %snapshot.agent_id, %error, "worker snapshot failed");
                        }
                    }
                })
            }))
            .await;

        Ok(FacilityRuntime {
            config,
            bus,
            models,
            fallback,
            workers,
            coordinator,
            orchestrator,
            state,
            recovery,
            _log_guard: log_guard,
        })
    }

    /// Starts event dispatch and the memory monitor.
    pub async fn start(&self) {
        self.bus.start().await;
        self.models.start_monitoring().await;
    }

    /// Persists state and stops everything; safe to call more than once.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.models.stop_monitoring().await;
        self.recovery.graceful_shutdown().await
    }

    /// Restores persisted state onto a restarted bus.
    pub async fn recover(&self) -> anyhow::Result<RecoveryReport> {
        self.recovery.system_recovery().await
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn models(&self) -> &Arc<ModelManager> {
        &self.models
    }

    pub fn fallback(&self) -> &Arc<FallbackResponder> {
        &self.fallback
    }

    pub fn workers(&self) -> &[Arc<Worker>] {
        &self.workers
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub fn orchestrator(&self) -> &Arc<ScenarioOrchestrator> {
        &self.orchestrator
    }

    pub fn state(&self) -> &Arc<StateManager> {
        &self.state
    }

    /// One-line-per-component operational summary for dashboards and logs.
    pub async fn status_report(&self) -> String {
        let mut lines = Vec::new();
        for worker in &self.workers {
            lines.push(worker.performance_report().await);
        }
        let metrics = self.coordinator.metrics().await;
        lines.push(format!(
            "coordinator: {} rounds, {:.0}ms avg, {} conflicts resolved, {} scenarios orchestrated",
            metrics.coordination_events,
            metrics.avg_coordination_ms,
            metrics.conflicts_resolved,
            metrics.scenarios_orchestrated,
        ));
        let stats = self.models.stats().await;
        lines.push(format!(
            "models: {} active ({:.0}MB estimated), {} loads, {} evictions, {} cleanups",
            stats.active_models,
            stats.estimated_model_memory_mb,
            stats.load_count,
            stats.eviction_count,
            stats.cleanup_count,
        ));
        lines.join("\n")
    }
}
