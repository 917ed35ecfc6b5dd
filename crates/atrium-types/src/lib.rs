mod agent;
mod event;
mod scenario;

pub use agent::{
    AgentDirective, AgentResponse, AgentState, AgentStatus, AgentType, EventPriority,
    EventSeverity, ResponseStatus,
};
pub use event::{topics, Event};
pub use scenario::{
    ScenarioConfig, ScenarioMetrics, ScenarioRequirement, ScenarioResult, ScenarioState,
    ScenarioStep, ScenarioStepRuntime, ScenarioType,
};
