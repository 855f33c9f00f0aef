//! A typed event contract replacing the "loose event-emission pattern" the
//! design notes call out (Design Note §9): every event the network can
//! raise is a variant of `NetworkEvent`, so a subscriber cannot mishear a
//! misspelled channel name.

use serde::{Deserialize, Serialize};

use crate::agent::Stats;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum NetworkEvent {
    #[serde(rename = "peer:connected")]
    PeerConnected { peer_id: String },
    #[serde(rename = "peer:updated")]
    PeerUpdated { peer_id: String },
    #[serde(rename = "peer:disconnect")]
    PeerDisconnected { peer_id: String },
    #[serde(rename = "transaction:new")]
    TransactionNew { tx_id: String },
    #[serde(rename = "transaction:invalid")]
    TransactionInvalid { tx_id: String, reason: String },
    #[serde(rename = "transaction:confirmed")]
    TransactionConfirmed {
        tx_id: String,
        witnesses: Vec<usize>,
    },
    #[serde(rename = "transaction:failed")]
    TransactionFailed { tx_id: String, reason: String },
    #[serde(rename = "network:stats")]
    NetworkStats { agent_stats: Vec<(usize, Stats)> },
    #[serde(rename = "network:initialized")]
    NetworkInitialized { num_agents: usize },
    #[serde(rename = "network:shutdown")]
    NetworkShutdown,
}

/// A sink events are published to. Kept deliberately synchronous and
/// infallible — a slow or absent subscriber must never block or fail a
/// witness validation or a transfer.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: NetworkEvent);
}

/// The default sink: a `tokio::sync::broadcast` channel. Subscribers that
/// lag behind simply miss old events rather than stalling the publisher.
pub struct ChannelEventSink {
    sender: tokio::sync::broadcast::Sender<NetworkEvent>,
}

impl ChannelEventSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<NetworkEvent> {
        self.sender.subscribe()
    }
}

impl Default for ChannelEventSink {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: NetworkEvent) {
        // A send error just means there are currently no subscribers.
        let _ = self.sender.send(event);
    }
}
