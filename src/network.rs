//! The orchestrator: holds the agent roster, runs the reputation-weighted
//! witness lottery, drives transfers through quorum, retries pending
//! transactions, and reports a typed event stream. The direct descendant of
//! the teacher's `Node`/`step` poll loop, generalized from a single-node
//! blockchain miner into a committee-based transfer orchestrator.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::agent::Agent;
use crate::coin::Coin;
use crate::config::NetworkOptions;
use crate::crypto::sha256_hex;
use crate::directory::{DirectoryLookup, InMemoryDirectory};
use crate::error::{Error, Result};
use crate::events::{EventSink, NetworkEvent};
use crate::reputation::Reputation;
use crate::store::{PersistedAgentState, StateStore};
use crate::wallet::TransferIntent;

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerInfo {
    pub address: String,
    pub last_seen: i64,
    pub status: String,
    pub connected_at: i64,
}

#[derive(Debug, Clone)]
struct PendingTransaction {
    intent: TransferIntent,
    witnesses_tried: Vec<usize>,
    validations: Vec<usize>,
    #[allow(dead_code)]
    timestamp: i64,
    retries: u32,
    status: Option<String>,
    #[allow(dead_code)]
    fail_reason: Option<String>,
}

enum ProcessOutcome {
    Confirmed {
        tx_id: String,
        witnesses: Vec<usize>,
        coin_id: Uuid,
    },
    Pending {
        tx_id: String,
    },
    Failed {
        tx_id: String,
        reason: String,
        coin: Coin,
    },
}

#[derive(Debug, Clone)]
pub struct TransferOutcome {
    pub success: bool,
    pub tx_id: Option<String>,
    pub reason: Option<String>,
    pub witnesses: Vec<usize>,
    pub coin_id: Option<Uuid>,
}

pub struct Network {
    pub agents: Vec<Agent>,
    peers: HashMap<String, PeerInfo>,
    pending_transactions: HashMap<String, PendingTransaction>,
    options: NetworkOptions,
    directory: Arc<InMemoryDirectory>,
    events: Arc<dyn EventSink>,
    store: Arc<dyn StateStore>,
}

impl Network {
    pub fn new(
        options: NetworkOptions,
        events: Arc<dyn EventSink>,
        store: Arc<dyn StateStore>,
    ) -> Result<Self> {
        let directory = Arc::new(InMemoryDirectory::new());
        let mut agents = Vec::with_capacity(options.num_agents);
        for id in 0..options.num_agents {
            let wallet = crate::wallet::Wallet::generate()?;
            let lookup: Arc<dyn DirectoryLookup> = directory.clone();
            agents.push(Agent::new(id, wallet, Some(lookup)));
        }
        Ok(Self {
            agents,
            peers: HashMap::new(),
            pending_transactions: HashMap::new(),
            options,
            directory,
            events,
            store,
        })
    }

    pub fn options(&self) -> &NetworkOptions {
        &self.options
    }

    /// Assigns starting reputations and coin holdings, and registers every
    /// agent's public key with the shared directory (spec §4.4).
    pub async fn initialize(&mut self, coins_per_agent: u32) -> Result<()> {
        let now = now_ms();
        {
            let mut rng = rand::thread_rng();
            for (idx, agent) in self.agents.iter_mut().enumerate() {
                agent.reputation = if idx == 0 {
                    Reputation::new(100.0)
                } else {
                    let score = rng.gen_range(60.0..=100.0);
                    Reputation::with_synthetic_history(score, now)
                };

                for _ in 0..coins_per_agent {
                    let value = rng.gen_range(1..=10) as u64;
                    let coin = Coin::new(agent.wallet.id().to_string(), value, now)?;
                    agent.wallet.add_coin(coin, now)?;
                }
            }
        }

        for agent in &self.agents {
            self.directory
                .register(agent.wallet.id().to_string(), agent.wallet.public_key().clone())
                .await;
        }

        info!(num_agents = self.agents.len(), "network initialized");
        self.events.emit(NetworkEvent::NetworkInitialized {
            num_agents: self.agents.len(),
        });
        Ok(())
    }

    fn agent_index_for_wallet(&self, wallet_id: &str) -> Option<usize> {
        self.agents.iter().position(|a| a.wallet.id() == wallet_id)
    }

    /// Reasons spec §4.3 explicitly marks "no counter bump" (stages 1/2/8/10
    /// missing-key): shape, ban, expiry, and directory-miss. These reflect
    /// transient or pre-existing conditions rather than fraud caught
    /// in-the-act, so they neither bump the sender's per-witness failure
    /// counter nor terminally fail the transaction — a retry may see a
    /// different witness, a warmer directory cache, or simply time pass the
    /// expiry boundary.
    fn reason_bumps_counter(reason: &str) -> bool {
        const NO_COUNTER_BUMP_REASONS: [&str; 4] = [
            "missing required transfer data",
            "sender wallet is banned due to suspicious activity",
            "coin has expired",
            "unable to retrieve sender public key",
        ];
        !NO_COUNTER_BUMP_REASONS.contains(&reason)
    }

    /// A roster agent is also a wallet, so a sender caught submitting a
    /// fraudulent transfer takes a reputation hit on its *own* standing as
    /// a future witness, symmetric with the bonus a witness earns for
    /// catching it (spec §4.3's per-stage counter bump has no reputation
    /// effect of its own; this is the network-level mirror of it, needed
    /// for a malicious roster member's reputation to actually drift down).
    fn penalize_sender_for_reason(&mut self, sender: &str, reason: &str, now: i64) {
        if !Self::reason_bumps_counter(reason) {
            return;
        }
        let importance = if reason.contains("confirmed double-spend") {
            2.0
        } else if reason.contains("double-spend") {
            1.5
        } else {
            1.0
        };
        if let Some(idx) = self.agent_index_for_wallet(sender) {
            self.agents[idx].reputation.record_failure(importance, now);
        }
    }

    /// Splits `count` into a 70% reputation-weighted draw and a 30% random
    /// draw over the pool of agents not in `exclude_ids` (spec §4.4).
    fn get_random_witnesses(&self, count: usize, exclude_ids: &HashSet<usize>) -> Vec<usize> {
        let mut pool: Vec<usize> = (0..self.agents.len())
            .filter(|id| !exclude_ids.contains(id))
            .collect();
        if pool.len() <= count {
            return pool;
        }

        let rep_based = (count as f64 * 0.7).ceil() as usize;
        let random_count = count - rep_based;
        let mut rng = rand::thread_rng();
        let mut result = Vec::with_capacity(count);

        for _ in 0..rep_based {
            if pool.is_empty() {
                break;
            }
            let total: f64 = pool.iter().map(|&id| self.agents[id].reputation.score).sum();
            let chosen_idx = if total <= 0.0 {
                rng.gen_range(0..pool.len())
            } else {
                let mut draw = rng.gen_range(0.0..total);
                let mut idx = pool.len() - 1;
                for (i, &id) in pool.iter().enumerate() {
                    let score = self.agents[id].reputation.score;
                    if score > draw {
                        idx = i;
                        break;
                    }
                    draw -= score;
                }
                idx
            };
            result.push(pool.remove(chosen_idx));
        }

        pool.shuffle(&mut rng);
        result.extend(pool.into_iter().take(random_count));
        result
    }

    /// Builds a transfer intent from `from_idx`'s wallet and drives it
    /// through the quorum. Rolls the coin back to the sender on terminal
    /// failure.
    pub async fn transfer_coin(
        &mut self,
        from_idx: usize,
        to_idx: usize,
        coin_idx: usize,
    ) -> Result<TransferOutcome> {
        if from_idx >= self.agents.len() || to_idx >= self.agents.len() || from_idx == to_idx {
            return Err(Error::InvalidAgentIds);
        }

        let recipient_id = self.agents[to_idx].wallet.id().to_string();
        let now = now_ms();
        let intent = self.agents[from_idx]
            .wallet
            .transfer_coin(coin_idx, &recipient_id, now)
            .ok_or(Error::NoSuchCoin(coin_idx))?;

        match self.process_transaction(intent, now).await? {
            ProcessOutcome::Confirmed {
                tx_id,
                witnesses,
                coin_id,
            } => Ok(TransferOutcome {
                success: true,
                tx_id: Some(tx_id),
                reason: None,
                witnesses,
                coin_id: Some(coin_id),
            }),
            ProcessOutcome::Pending { tx_id } => Ok(TransferOutcome {
                success: false,
                tx_id: Some(tx_id),
                reason: Some("awaiting quorum".to_string()),
                witnesses: Vec::new(),
                coin_id: None,
            }),
            ProcessOutcome::Failed { reason, coin, .. } => {
                self.agents[from_idx].wallet.return_coin(coin);
                Ok(TransferOutcome {
                    success: false,
                    tx_id: None,
                    reason: Some(reason),
                    witnesses: Vec::new(),
                    coin_id: None,
                })
            }
        }
    }

    async fn process_transaction(
        &mut self,
        intent: TransferIntent,
        now: i64,
    ) -> Result<ProcessOutcome> {
        let tx_id = sha256_hex(&format!(
            "{}-{}-{}-{}",
            intent.coin.id, intent.sender, intent.recipient, intent.timestamp
        ));

        if !self.pending_transactions.contains_key(&tx_id) {
            self.pending_transactions.insert(
                tx_id.clone(),
                PendingTransaction {
                    intent: intent.clone(),
                    witnesses_tried: Vec::new(),
                    validations: Vec::new(),
                    timestamp: now,
                    retries: 0,
                    status: None,
                    fail_reason: None,
                },
            );
            self.events.emit(NetworkEvent::TransactionNew {
                tx_id: tx_id.clone(),
            });
        }

        let required = self.options.required_witnesses;
        if self.pending_transactions[&tx_id].validations.len() >= required {
            return Ok(ProcessOutcome::Pending { tx_id });
        }

        let sender_idx = self.agent_index_for_wallet(&intent.sender);
        let recipient_idx = self.agent_index_for_wallet(&intent.recipient);

        let mut exclude: HashSet<usize> = HashSet::new();
        exclude.extend(sender_idx);
        exclude.extend(recipient_idx);
        exclude.extend(self.pending_transactions[&tx_id].witnesses_tried.iter().copied());

        let needed = required - self.pending_transactions[&tx_id].validations.len();
        let witnesses = self.get_random_witnesses(needed, &exclude);

        for witness_id in witnesses {
            self.pending_transactions
                .get_mut(&tx_id)
                .expect("entry inserted above")
                .witnesses_tried
                .push(witness_id);

            let verdict = self.agents[witness_id].validate(&intent, now).await;
            if !verdict.valid {
                let reason = verdict
                    .reason
                    .unwrap_or_else(|| "validation failed".to_string());
                let terminal = Self::reason_bumps_counter(&reason);
                if terminal {
                    if let Some(entry) = self.pending_transactions.get_mut(&tx_id) {
                        entry.status = Some("failed".to_string());
                        entry.fail_reason = Some(reason.clone());
                    }
                }
                warn!(tx_id = %tx_id, witness = witness_id, reason = %reason, terminal, "transaction rejected");
                self.penalize_sender_for_reason(&intent.sender, &reason, now);
                self.events.emit(NetworkEvent::TransactionInvalid {
                    tx_id: tx_id.clone(),
                    reason: reason.clone(),
                });
                // Fraud-category rejections end the transaction right away —
                // retrying won't un-inflate a coin or un-spend it twice. A
                // transient rejection (directory miss, shape, ban, expiry)
                // leaves the record pending so the retry sweep can try again,
                // possibly against a different witness or a warmer cache.
                return Ok(if terminal {
                    ProcessOutcome::Failed {
                        tx_id,
                        reason,
                        coin: intent.coin,
                    }
                } else {
                    ProcessOutcome::Pending { tx_id }
                });
            }
            self.pending_transactions
                .get_mut(&tx_id)
                .expect("entry inserted above")
                .validations
                .push(witness_id);
        }

        let validations = self.pending_transactions[&tx_id].validations.clone();
        if validations.len() >= required {
            let mut coin = intent.coin.clone();
            coin.transfer(&intent.recipient, &intent.signature, validations.clone(), now)?;
            let coin_id = coin.id;
            if let Some(idx) = recipient_idx {
                self.agents[idx].wallet.add_coin(coin, now)?;
            }
            self.pending_transactions.remove(&tx_id);
            info!(tx_id = %tx_id, witnesses = ?validations, "transaction confirmed");
            self.events.emit(NetworkEvent::TransactionConfirmed {
                tx_id: tx_id.clone(),
                witnesses: validations.clone(),
            });
            return Ok(ProcessOutcome::Confirmed {
                tx_id,
                witnesses: validations,
                coin_id,
            });
        }

        Ok(ProcessOutcome::Pending { tx_id })
    }

    /// Test/demo harness: completes a real transfer, then forges a second
    /// coin sharing the original id and value and attempts to spend it
    /// again. The forged copy is removed from the sender's wallet
    /// regardless of the second attempt's outcome (spec §4.4).
    pub async fn simulate_double_spend(
        &mut self,
        from_idx: usize,
        recipient_idx: usize,
        coin_idx: usize,
    ) -> Result<TransferOutcome> {
        let sender_id = self.agents[from_idx].wallet.id().to_string();
        let first = self.transfer_coin(from_idx, recipient_idx, coin_idx).await?;
        if !first.success {
            return Ok(first);
        }
        let coin_id = first.coin_id.ok_or_else(|| Error::CoinNotFound(Uuid::nil()))?;

        let value = self.agents[recipient_idx]
            .wallet
            .coins
            .iter()
            .find(|c| c.id == coin_id)
            .map(|c| c.value)
            .ok_or(Error::CoinNotFound(coin_id))?;

        let now = now_ms();
        let forged = Coin::with_id(coin_id, sender_id, value, now, serde_json::Value::Null)?;
        self.agents[from_idx].wallet.add_coin(forged, now)?;
        let forged_index = self.agents[from_idx].wallet.coin_count() - 1;

        let result = self.transfer_coin(from_idx, recipient_idx, forged_index).await;

        if let Some(pos) = self.agents[from_idx]
            .wallet
            .coins
            .iter()
            .position(|c| c.id == coin_id)
        {
            self.agents[from_idx].wallet.coins.remove(pos);
        }

        result
    }

    pub fn connect_peer(&mut self, peer_id: impl Into<String>, address: impl Into<String>) {
        let peer_id = peer_id.into();
        let now = now_ms();
        self.peers.insert(
            peer_id.clone(),
            PeerInfo {
                address: address.into(),
                last_seen: now,
                status: "connected".to_string(),
                connected_at: now,
            },
        );
        self.events.emit(NetworkEvent::PeerConnected { peer_id });
    }

    pub fn touch_peer(&mut self, peer_id: &str) {
        if let Some(peer) = self.peers.get_mut(peer_id) {
            peer.last_seen = now_ms();
        }
        if self.peers.contains_key(peer_id) {
            self.events.emit(NetworkEvent::PeerUpdated {
                peer_id: peer_id.to_string(),
            });
        }
    }

    /// Drops peers whose last-seen timestamp exceeds `peer_timeout_ms`.
    pub fn sweep_stale_peers(&mut self) {
        let now = now_ms();
        let timeout = self.options.peer_timeout_ms;
        let stale: Vec<String> = self
            .peers
            .iter()
            .filter(|(_, info)| now - info.last_seen > timeout)
            .map(|(id, _)| id.clone())
            .collect();
        for peer_id in stale {
            self.peers.remove(&peer_id);
            self.events.emit(NetworkEvent::PeerDisconnected { peer_id });
        }
    }

    /// Re-invokes `process_transaction` for every still-pending (not yet
    /// terminally failed) transaction, soliciting only witnesses that
    /// haven't already been tried. Transactions that exceed `max_retries`
    /// are dropped and the coin is rolled back.
    pub async fn sweep_retries(&mut self) -> Result<()> {
        let now = now_ms();
        let candidates: Vec<String> = self
            .pending_transactions
            .iter()
            .filter(|(_, tx)| tx.status.is_none())
            .map(|(id, _)| id.clone())
            .collect();

        for tx_id in candidates {
            let (retries, intent) = match self.pending_transactions.get_mut(&tx_id) {
                Some(entry) => {
                    entry.retries += 1;
                    (entry.retries, entry.intent.clone())
                }
                None => continue,
            };

            if retries > self.options.max_retries {
                if let Some(entry) = self.pending_transactions.remove(&tx_id) {
                    if let Some(idx) = self.agent_index_for_wallet(&entry.intent.sender) {
                        self.agents[idx].wallet.return_coin(entry.intent.coin);
                    }
                }
                self.events.emit(NetworkEvent::TransactionFailed {
                    tx_id,
                    reason: "max retries exceeded".to_string(),
                });
                continue;
            }

            if let ProcessOutcome::Failed { coin, .. } = self.process_transaction(intent, now).await? {
                if let Some(idx) = self.agent_index_for_wallet(&coin.owner_id) {
                    self.agents[idx].wallet.return_coin(coin);
                }
            }
        }

        Ok(())
    }

    /// Emits a stats snapshot and persists every agent's state.
    pub async fn sweep_stats(&mut self) -> Result<()> {
        let agent_stats = self.agents.iter().map(|a| (a.id, a.stats.clone())).collect();
        self.events.emit(NetworkEvent::NetworkStats { agent_stats });
        self.persist_all().await
    }

    async fn persist_all(&self) -> Result<()> {
        let now = now_ms();
        for agent in &self.agents {
            let state = PersistedAgentState {
                id: agent.id,
                filter: agent.seen_coins_bitmap(),
                recent_transactions: agent.recency_snapshot(),
                validated_values: agent.validated_values_snapshot(),
                banned_wallets: agent.banned_wallets_snapshot(),
                public_key_directory: agent.local_directory_snapshot(),
                reputation: agent.reputation.clone(),
                stats: agent.stats.clone(),
                timestamp: now,
            };
            self.store.save(&state).await?;
        }
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.persist_all().await?;
        self.events.emit(NetworkEvent::NetworkShutdown);
        Ok(())
    }
}

/// Handles to the three cooperative background loops spec §4.4 describes.
/// `Network` itself holds no concurrency primitives; this wraps it behind
/// an `RwLock` so the sweeps and foreground transfers can interleave.
pub struct BackgroundLoops {
    peer_sweep: JoinHandle<()>,
    retry_sweep: JoinHandle<()>,
    stats_sweep: JoinHandle<()>,
}

impl BackgroundLoops {
    pub fn abort(self) {
        self.peer_sweep.abort();
        self.retry_sweep.abort();
        self.stats_sweep.abort();
    }
}

pub fn spawn_background_loops(network: Arc<RwLock<Network>>) -> BackgroundLoops {
    let peer_sweep = {
        let network = network.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                interval.tick().await;
                network.write().await.sweep_stale_peers();
            }
        })
    };

    let retry_sweep = {
        let network = network.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(15));
            loop {
                interval.tick().await;
                if let Err(err) = network.write().await.sweep_retries().await {
                    warn!(%err, "retry sweep failed");
                }
            }
        })
    };

    let stats_sweep = {
        let network = network.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(5 * 60));
            loop {
                interval.tick().await;
                if let Err(err) = network.write().await.sweep_stats().await {
                    warn!(%err, "stats sweep failed");
                }
            }
        })
    };

    BackgroundLoops {
        peer_sweep,
        retry_sweep,
        stats_sweep,
    }
}
