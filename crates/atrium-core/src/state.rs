use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use atrium_types::{AgentState, AgentType};

use crate::kv::KvStore;

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("stored version {stored} is newer than incoming version {incoming} for {agent_id}")]
    VersionConflict {
        agent_id: String,
        stored: u64,
        incoming: u64,
    },
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Canonical serialization for checksums: object keys sorted recursively,
/// compact output, UTF-8. Deterministic across processes.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys = map.keys().collect::<Vec<_>>();
            keys.sort();
            out.push('{');
            for (index, key) in keys.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).unwrap_or_default());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

pub fn state_checksum(state_data: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_json(state_data).as_bytes());
    format!("{:064x}", hasher.finalize())
}

fn state_key(agent_id: &str) -> String {
    format!("agent_state:{agent_id}")
}

/// Persists versioned agent snapshots with integrity checksums. Versions are
/// strictly monotonic per agent id; a checksum mismatch on load is treated
/// as corruption and surfaces as a missing snapshot.
pub struct StateManager {
    kv: Arc<dyn KvStore>,
    ttl: Duration,
    cache: RwLock<HashMap<String, AgentState>>,
}

impl StateManager {
    pub fn new(kv: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self {
            kv,
            ttl,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Stores the snapshot at `stored_version + 1` with a freshly computed
    /// checksum. Rejects saves that carry a version older than the store.
    pub async fn save(&self, state: &AgentState) -> Result<AgentState, StateError> {
        let stored_version = self.stored_version(&state.agent_id).await?;
        if state.version < stored_version {
            return Err(StateError::VersionConflict {
                agent_id: state.agent_id.clone(),
                stored: stored_version,
                incoming: state.version,
            });
        }

        let saved = AgentState {
            version: stored_version + 1,
            checksum: state_checksum(&state.state_data),
            last_updated: Utc::now(),
            ..state.clone()
        };

        let raw = serde_json::to_string(&saved).map_err(anyhow::Error::from)?;
        self.kv
            .set(&state_key(&saved.agent_id), raw, Some(self.ttl))
            .await?;
        self.cache
            .write()
            .await
            .insert(saved.agent_id.clone(), saved.clone());

        debug!(agent_id = %saved.agent_id, version = saved.version, "agent state saved");
        Ok(saved)
    }

    /// Persists the current state of an agent unconditionally, continuing
    /// the stored version sequence. For periodic snapshots where the caller
    /// is the single source of truth and no staleness check applies.
    pub async fn save_current(
        &self,
        agent_id: &str,
        agent_type: AgentType,
        state_data: Value,
    ) -> Result<AgentState, StateError> {
        let stored_version = self.stored_version(agent_id).await?;
        let state = AgentState {
            agent_id: agent_id.to_string(),
            agent_type,
            state_data,
            last_updated: Utc::now(),
            version: stored_version,
            checksum: String::new(),
        };
        self.save(&state).await
    }

    /// Loads a snapshot, verifying its checksum. Corrupt snapshots log and
    /// return `None`.
    pub async fn load(&self, agent_id: &str) -> anyhow::Result<Option<AgentState>> {
        let Some(raw) = self.kv.get(&state_key(agent_id)).await? else {
            return Ok(None);
        };
        let state: AgentState = match serde_json::from_str(&raw) {
            Ok(state) => state,
            Err(error) => {
                warn!(agent_id, %error, "agent state failed to parse");
                return Ok(None);
            }
        };

        if state_checksum(&state.state_data) != state.checksum {
            warn!(agent_id, version = state.version, "agent state checksum mismatch");
            return Ok(None);
        }

        self.cache
            .write()
            .await
            .insert(agent_id.to_string(), state.clone());
        Ok(Some(state))
    }

    /// Polls for a valid snapshot until it appears or the timeout elapses.
    pub async fn recover_agent_state(
        &self,
        agent_id: &str,
        timeout: Duration,
    ) -> anyhow::Result<Option<AgentState>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(state) = self.load(agent_id).await? {
                return Ok(Some(state));
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    pub async fn all_agent_states(&self) -> anyhow::Result<HashMap<String, AgentState>> {
        let mut states = HashMap::new();
        for key in self.kv.keys("agent_state:").await? {
            let agent_id = key.trim_start_matches("agent_state:");
            if let Some(state) = self.load(agent_id).await? {
                states.insert(agent_id.to_string(), state);
            }
        }
        Ok(states)
    }

    pub async fn delete(&self, agent_id: &str) -> anyhow::Result<bool> {
        self.cache.write().await.remove(agent_id);
        self.kv.delete(&state_key(agent_id)).await
    }

    pub async fn validate_integrity(&self, agent_id: &str) -> anyhow::Result<bool> {
        Ok(self.load(agent_id).await?.is_some())
    }

    async fn stored_version(&self, agent_id: &str) -> anyhow::Result<u64> {
        let Some(raw) = self.kv.get(&state_key(agent_id)).await? else {
            return Ok(0);
        };
        // Version survives even when the blob no longer validates, so a
        // corrupt snapshot cannot reset the monotonic counter.
        let version = serde_json::from_str::<AgentState>(&raw)
            .map(|state| state.version)
            .unwrap_or(0);
        Ok(version)
    }
}
