mod catalog;
mod manager;

pub use catalog::{profile_for, ModelPriority, ModelProfile};
pub use manager::{
    InstantLoader, MemoryStats, ModelHandle, ModelLoader, ModelManager, ModelManagerConfig,
    ModelManagerError, SlotInfo,
};
