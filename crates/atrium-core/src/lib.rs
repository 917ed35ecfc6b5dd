mod bus;
mod config;
mod kv;
mod probe;
mod recovery;
mod state;

pub use bus::{BusConfig, BusError, EventBus, EventHandler, FnHandler};
pub use config::{OrchestratorConfig, ScenarioDurations};
pub use kv::{KvStore, MemoryKvStore};
pub use probe::{FixedMemoryProbe, MemoryProbe, MemorySnapshot, SystemMemoryProbe};
pub use recovery::{RecoveryManager, RecoveryReport, ShutdownCallback};
pub use state::{canonical_json, state_checksum, StateError, StateManager};
