//! Recognized network configuration (spec §6), separate from runtime state
//! the way the teacher's `BootstrapConfig` kept operational knobs apart
//! from the `Node` they configure.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkOptions {
    pub num_agents: usize,
    pub required_witnesses: usize,
    pub peer_timeout_ms: i64,
    pub max_retries: u32,
    pub data_dir: String,
    pub network_id: String,
}

impl Default for NetworkOptions {
    fn default() -> Self {
        Self {
            num_agents: 5,
            required_witnesses: 3,
            peer_timeout_ms: 30_000,
            max_retries: 3,
            data_dir: "./data".to_string(),
            network_id: "main".to_string(),
        }
    }
}
