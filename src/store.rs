//! Agent-state persistence. Spec §1 puts the exact on-disk JSON format out
//! of scope ("only its abstract contract is required") — `StateStore` is
//! that contract, with `JsonFileStore` as one working implementation of the
//! shape spec §6 describes, so the crate is still runnable end-to-end.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::agent::{RecencyEntry, Stats};
use crate::error::Result;
use crate::reputation::Reputation;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedAgentState {
    pub id: usize,
    pub filter: Vec<u8>,
    pub recent_transactions: Vec<(String, RecencyEntry)>,
    pub validated_values: Vec<(String, u64)>,
    pub banned_wallets: Vec<String>,
    pub public_key_directory: Vec<(String, String)>,
    pub reputation: Reputation,
    pub stats: Stats,
    pub timestamp: i64,
}

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn save(&self, state: &PersistedAgentState) -> Result<()>;
    async fn load(&self, agent_id: usize) -> Result<Option<PersistedAgentState>>;
}

/// Writes/reads `{data_dir}/agent-{id}.json`, one file per witness, matching
/// the "per-file JSON, written every 5 min and on shutdown" cadence of
/// spec §6. Any directory layout is an implementation detail the spec does
/// not contract on.
pub struct JsonFileStore {
    data_dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    fn path_for(&self, agent_id: usize) -> PathBuf {
        self.data_dir.join(format!("agent-{agent_id}.json"))
    }
}

#[async_trait]
impl StateStore for JsonFileStore {
    async fn save(&self, state: &PersistedAgentState) -> Result<()> {
        tokio::fs::create_dir_all(&self.data_dir).await?;
        let json = serde_json::to_string_pretty(state)?;
        tokio::fs::write(self.path_for(state.id), json).await?;
        Ok(())
    }

    async fn load(&self, agent_id: usize) -> Result<Option<PersistedAgentState>> {
        match tokio::fs::read_to_string(self.path_for(agent_id)).await {
            Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}
