mod client;
mod fallback;
mod resilience;

pub use client::{
    FailingClient, InvokeOptions, LlmClient, LlmError, ScriptedClient, StaticClient,
};
pub use fallback::{FallbackReply, FallbackResponder, FallbackStats};
pub use resilience::{BreakerState, CircuitBreaker};
