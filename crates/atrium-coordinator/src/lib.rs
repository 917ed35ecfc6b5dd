mod coordinator;
mod scoring;

pub use coordinator::{Coordinator, CoordinatorConfig, CoordinatorMetrics};
pub use scoring::{
    orchestration_plan, priority_score, resolve_conflicts, scenario_pattern, ScenarioPattern,
};
