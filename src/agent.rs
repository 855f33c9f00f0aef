//! The witness: a stateless validator that runs the ordered 11-stage
//! transfer validation pipeline (spec §4.3) and maintains the bounded local
//! memory (seen-set, recency cache, validated-value map, failure counters,
//! ban set, reputation, stats) that makes statelessness possible without a
//! global ledger.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bloom::SeenSet;
use crate::coin::CoinStatus;
use crate::crypto::{sha256_hex, PublicKey};
use crate::directory::DirectoryLookup;
use crate::error::Error;
use crate::reputation::Reputation;
use crate::wallet::{TransferIntent, Wallet};

pub const DEFAULT_MAX_FAILURES_BEFORE_BAN: u32 = 5;
const RECENCY_CACHE_CAPACITY: usize = 100_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecencyEntry {
    pub timestamp: i64,
    pub hash: Option<String>,
    pub sender: Option<String>,
    pub recipient: Option<String>,
    pub value: Option<u64>,
    pub coin_id: Option<String>,
}

/// The bounded exact-recency cache corroborating Bloom-filter hits and
/// detecting transaction-hash replay (spec §3). Oldest-timestamp eviction
/// on overflow, amortized O(1) per insert.
#[derive(Default)]
struct RecencyCache {
    entries: HashMap<String, RecencyEntry>,
    capacity: usize,
}

impl RecencyCache {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity,
        }
    }

    fn get(&self, key: &str) -> Option<&RecencyEntry> {
        self.entries.get(key)
    }

    fn insert(&mut self, key: String, entry: RecencyEntry) {
        self.entries.insert(key, entry);
        self.prune();
    }

    fn prune(&mut self) {
        if self.entries.len() <= self.capacity {
            return;
        }
        let overflow = self.entries.len() - self.capacity;
        let mut by_age: Vec<(String, i64)> = self
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.timestamp))
            .collect();
        by_age.sort_by_key(|(_, ts)| *ts);
        for (key, _) in by_age.into_iter().take(overflow) {
            self.entries.remove(&key);
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Observability-only counters; they never influence validation outcomes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Stats {
    pub validated: u64,
    pub zero_balance_prevented: u64,
    pub double_spends_prevented: u64,
    pub invalid_signatures: u64,
    pub banned_wallets: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub valid: bool,
    pub reason: Option<String>,
    pub witness_id: Option<usize>,
    pub timestamp: Option<i64>,
    pub reputation_score: Option<f64>,
    pub previous_timestamp: Option<i64>,
}

impl ValidationVerdict {
    fn reject(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
            witness_id: None,
            timestamp: None,
            reputation_score: None,
            previous_timestamp: None,
        }
    }

    fn reject_at(reason: impl Into<String>, previous_timestamp: i64) -> Self {
        let mut verdict = Self::reject(reason);
        verdict.previous_timestamp = Some(previous_timestamp);
        verdict
    }
}

pub struct Agent {
    pub id: usize,
    pub wallet: Wallet,
    seen_coins: SeenSet,
    recency: RecencyCache,
    validated_values: HashMap<Uuid, u64>,
    validation_failures: HashMap<String, u32>,
    banned_wallets: HashSet<String>,
    local_directory: HashMap<String, PublicKey>,
    directory: Option<Arc<dyn DirectoryLookup>>,
    pub reputation: Reputation,
    pub stats: Stats,
    pub max_failures_before_ban: u32,
}

impl Agent {
    pub fn new(id: usize, wallet: Wallet, directory: Option<Arc<dyn DirectoryLookup>>) -> Self {
        Self::with_reputation(id, wallet, directory, Reputation::default())
    }

    pub fn with_reputation(
        id: usize,
        wallet: Wallet,
        directory: Option<Arc<dyn DirectoryLookup>>,
        reputation: Reputation,
    ) -> Self {
        let mut local_directory = HashMap::new();
        local_directory.insert(wallet.id().to_string(), wallet.public_key().clone());
        Self {
            id,
            wallet,
            seen_coins: SeenSet::new(),
            recency: RecencyCache::new(RECENCY_CACHE_CAPACITY),
            validated_values: HashMap::new(),
            validation_failures: HashMap::new(),
            banned_wallets: HashSet::new(),
            local_directory,
            directory,
            reputation,
            stats: Stats::default(),
            max_failures_before_ban: DEFAULT_MAX_FAILURES_BEFORE_BAN,
        }
    }

    pub fn is_banned(&self, wallet_id: &str) -> bool {
        self.banned_wallets.contains(wallet_id)
    }

    pub fn unban(&mut self, wallet_id: &str) {
        self.banned_wallets.remove(wallet_id);
        self.validation_failures.remove(wallet_id);
    }

    pub fn register_public_key(&mut self, wallet_id: String, public_key: PublicKey) {
        self.local_directory.insert(wallet_id, public_key);
    }

    pub fn seen_coins_bitmap(&self) -> Vec<u8> {
        self.seen_coins.bitmap()
    }

    pub fn recency_snapshot(&self) -> Vec<(String, RecencyEntry)> {
        self.recency
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn validated_values_snapshot(&self) -> Vec<(String, u64)> {
        self.validated_values
            .iter()
            .map(|(id, value)| (id.to_string(), *value))
            .collect()
    }

    pub fn banned_wallets_snapshot(&self) -> Vec<String> {
        self.banned_wallets.iter().cloned().collect()
    }

    pub fn local_directory_snapshot(&self) -> Vec<(String, String)> {
        self.local_directory
            .iter()
            .map(|(wallet_id, key)| (wallet_id.clone(), key.to_pem()))
            .collect()
    }

    /// Restores local memory from a previously persisted snapshot (e.g. on
    /// process restart). Does not touch the Bloom filter's internal bit
    /// array shape-compatibility checks — callers must restore into an
    /// agent configured with the same filter parameters.
    pub fn restore(&mut self, state: &crate::store::PersistedAgentState) {
        for (key, entry) in &state.recent_transactions {
            self.recency.insert(key.clone(), entry.clone());
        }
        for (coin_id, value) in &state.validated_values {
            if let Ok(id) = coin_id.parse() {
                self.validated_values.insert(id, *value);
            }
        }
        for wallet_id in &state.banned_wallets {
            self.banned_wallets.insert(wallet_id.clone());
        }
        for (wallet_id, pem) in &state.public_key_directory {
            match PublicKey::from_pem(pem) {
                Ok(key) => {
                    self.local_directory.insert(wallet_id.clone(), key);
                }
                Err(err) => {
                    warn!(witness = self.id, wallet = wallet_id, %err, "failed to restore cached public key");
                }
            }
        }
        self.reputation = state.reputation.clone();
        self.stats = state.stats.clone();
    }

    async fn get_public_key_for_wallet(&mut self, wallet_id: &str) -> Option<PublicKey> {
        if let Some(key) = self.local_directory.get(wallet_id) {
            return Some(key.clone());
        }
        if let Some(directory) = self.directory.clone() {
            if let Some(key) = directory.lookup(wallet_id).await {
                self.local_directory.insert(wallet_id.to_string(), key.clone());
                return Some(key);
            }
        }
        None
    }

    fn bump_failure_and_maybe_ban(&mut self, sender: &str) {
        let count = self.validation_failures.entry(sender.to_string()).or_insert(0);
        *count += 1;
        if *count >= self.max_failures_before_ban {
            self.banned_wallets.insert(sender.to_string());
            self.stats.banned_wallets += 1;
            warn!(witness = self.id, wallet = sender, "banning wallet after repeated failures");
        }
    }

    fn reset_failures(&mut self, sender: &str) {
        self.validation_failures.remove(sender);
    }

    /// Runs the ordered 11-stage validation pipeline against a transfer
    /// intent. The first failing stage short-circuits with a specific
    /// reason; later stages are never reached.
    pub async fn validate(&mut self, intent: &TransferIntent, now: i64) -> ValidationVerdict {
        self.stats.validated += 1;

        // Stage 1: shape.
        if intent.sender.is_empty() || intent.recipient.is_empty() || intent.signature.is_empty() {
            debug!(witness = self.id, "rejecting transfer: missing required data");
            return ValidationVerdict::reject("missing required transfer data");
        }

        // Stage 2: ban check.
        if self.is_banned(&intent.sender) {
            return ValidationVerdict::reject("sender wallet is banned due to suspicious activity");
        }

        // Stage 3: integrity.
        if !intent.coin.verify_integrity() {
            self.bump_failure_and_maybe_ban(&intent.sender);
            return ValidationVerdict::reject("coin integrity check failed");
        }

        // Stage 4: status.
        if intent.coin.status != CoinStatus::Active {
            self.bump_failure_and_maybe_ban(&intent.sender);
            return ValidationVerdict::reject(format!(
                "coin status is {}, not active",
                intent.coin.status
            ));
        }

        // Stage 5: zero/negative value.
        if intent.coin.value == 0 {
            self.bump_failure_and_maybe_ban(&intent.sender);
            self.stats.zero_balance_prevented += 1;
            return ValidationVerdict::reject("zero or negative value coin detected");
        }

        // Stage 6: inflation.
        if let Some(&last_known) = self.validated_values.get(&intent.coin.id) {
            if intent.coin.value > last_known {
                self.bump_failure_and_maybe_ban(&intent.sender);
                return ValidationVerdict::reject(format!(
                    "coin value has been inflated from {} to {}",
                    last_known, intent.coin.value
                ));
            }
        }

        // Stage 7: probabilistic double-spend.
        if self.seen_coins.contains(&intent.coin.id) {
            self.bump_failure_and_maybe_ban(&intent.sender);
            self.stats.double_spends_prevented += 1;
            if let Some(entry) = self.recency.get(&intent.coin.id.to_string()) {
                let previous_timestamp = entry.timestamp;
                let iso = Utc
                    .timestamp_millis_opt(previous_timestamp)
                    .single()
                    .map(|dt| dt.to_rfc3339())
                    .unwrap_or_default();
                self.reputation.record_success(2.0, now);
                return ValidationVerdict::reject_at(
                    format!("confirmed double-spend detected (previous transfer: {iso})"),
                    previous_timestamp,
                );
            }
            self.reputation.record_success(1.5, now);
            return ValidationVerdict::reject("possible double-spend detected");
        }

        // Stage 8: expiry.
        if let Some(expiry) = intent.coin.expiry_date {
            if now >= expiry {
                return ValidationVerdict::reject("coin has expired");
            }
        }

        // Stage 9: replay.
        let tx_hash = sha256_hex(&format!(
            "{}-{}-{}-{}-{}-{}",
            intent.coin.id, intent.sender, intent.recipient, intent.signature, intent.timestamp, intent.coin.value
        ));
        if self.recency.get(&tx_hash).is_some() {
            self.bump_failure_and_maybe_ban(&intent.sender);
            return ValidationVerdict::reject("transaction replay detected");
        }

        // Stage 10: signature.
        let sender_public_key = match self.get_public_key_for_wallet(&intent.sender).await {
            Some(key) => key,
            None => return ValidationVerdict::reject("unable to retrieve sender public key"),
        };
        let message = intent.coin.signature_data(&intent.recipient, intent.timestamp);
        match sender_public_key.verify_str(&message, &intent.signature) {
            Ok(()) => {}
            Err(Error::InvalidSignature(_)) => {
                self.bump_failure_and_maybe_ban(&intent.sender);
                self.stats.invalid_signatures += 1;
                return ValidationVerdict::reject("invalid signature");
            }
            Err(err) => {
                // An internal/format-level failure, not sender fraud: bump
                // the counter per spec, but penalize this witness's own
                // reputation lightly rather than blame the sender further.
                self.bump_failure_and_maybe_ban(&intent.sender);
                self.reputation.record_failure(0.5, now);
                return ValidationVerdict::reject(format!("signature verification error: {err}"));
            }
        }

        // Stage 11: accept.
        self.seen_coins.insert(&intent.coin.id);
        let entry = RecencyEntry {
            timestamp: now,
            hash: Some(tx_hash.clone()),
            sender: Some(intent.sender.clone()),
            recipient: Some(intent.recipient.clone()),
            value: Some(intent.coin.value),
            coin_id: Some(intent.coin.id.to_string()),
        };
        self.recency.insert(intent.coin.id.to_string(), entry.clone());
        self.recency.insert(
            tx_hash,
            RecencyEntry {
                coin_id: Some(intent.coin.id.to_string()),
                ..entry
            },
        );
        self.validated_values.insert(intent.coin.id, intent.coin.value);
        self.reset_failures(&intent.sender);
        self.reputation.record_success(1.0, now);

        info!(
            witness = self.id,
            coin = %intent.coin.id,
            cache_size = self.recency.len(),
            "validated transfer"
        );

        ValidationVerdict {
            valid: true,
            reason: None,
            witness_id: Some(self.id),
            timestamp: Some(now),
            reputation_score: Some(self.reputation.score),
            previous_timestamp: None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::coin::Coin;

    fn make_agent(id: usize) -> Agent {
        let wallet = Wallet::generate().unwrap();
        Agent::new(id, wallet, None)
    }

    fn signed_intent(sender: &Wallet, recipient_id: &str, coin_index: usize, now: i64) -> TransferIntent {
        let mut sender = sender.clone();
        sender.transfer_coin(coin_index, recipient_id, now).unwrap()
    }

    #[tokio::test]
    async fn missing_fields_rejects_without_counter_bump() {
        let mut agent = make_agent(0);
        let sender = {
            let mut w = Wallet::generate().unwrap();
            let coin = Coin::new(w.id().to_string(), 5, 0).unwrap();
            w.add_coin(coin, 0).unwrap();
            w
        };
        let mut intent = signed_intent(&sender, "recipient", 0, 100);
        intent.signature = String::new();

        let verdict = agent.validate(&intent, 100).await;
        assert!(!verdict.valid);
        assert_eq!(verdict.reason.unwrap(), "missing required transfer data");
        assert!(agent.validation_failures.is_empty());
    }

    #[tokio::test]
    async fn happy_path_accepts_and_records_seen() {
        let mut agent = make_agent(0);
        let mut sender = Wallet::generate().unwrap();
        agent.register_public_key(sender.id().to_string(), sender.public_key().clone());
        let coin = Coin::new(sender.id().to_string(), 5, 0).unwrap();
        sender.add_coin(coin, 0).unwrap();

        let intent = sender.transfer_coin(0, "recipient-id", 100).unwrap();
        let verdict = agent.validate(&intent, 100).await;
        assert!(verdict.valid, "{:?}", verdict.reason);
        assert!(agent.seen_coins.contains(&intent.coin.id));

        // Re-validating the same coin id is now a double-spend.
        let verdict2 = agent.validate(&intent, 200).await;
        assert!(!verdict2.valid);
        assert!(verdict2.reason.unwrap().contains("double-spend"));
    }

    #[tokio::test]
    async fn zero_value_coin_is_rejected() {
        let mut agent = make_agent(0);
        let mut sender = Wallet::generate().unwrap();
        agent.register_public_key(sender.id().to_string(), sender.public_key().clone());
        let coin = Coin::new(sender.id().to_string(), 5, 0).unwrap();
        sender.add_coin(coin, 0).unwrap();

        let mut intent = sender.transfer_coin(0, "recipient-id", 100).unwrap();
        // Patch-then-reparse to forge a zero-value coin whose hash is still
        // internally consistent; mutating `value` in place would merely
        // fail the earlier integrity check instead.
        let original = intent.coin.serialize().unwrap();
        let mut patched: serde_json::Value = serde_json::from_str(&original).unwrap();
        patched["value"] = serde_json::json!(0);
        intent.coin = Coin::deserialize(&patched.to_string()).unwrap();

        let verdict = agent.validate(&intent, 100).await;
        assert!(!verdict.valid);
        assert_eq!(verdict.reason.unwrap(), "zero or negative value coin detected");
        assert_eq!(agent.stats.zero_balance_prevented, 1);
    }

    #[tokio::test]
    async fn repeated_failures_ban_the_sender() {
        let mut agent = make_agent(0);
        agent.max_failures_before_ban = 3;
        let mut sender = Wallet::generate().unwrap();
        agent.register_public_key(sender.id().to_string(), sender.public_key().clone());

        for _ in 0..3 {
            let coin = Coin::new(sender.id().to_string(), 5, 0).unwrap();
            sender.add_coin(coin, 0).unwrap();
            let mut intent = sender.transfer_coin(0, "recipient-id", 100).unwrap();
            let original = intent.coin.serialize().unwrap();
            let mut patched: serde_json::Value = serde_json::from_str(&original).unwrap();
            patched["value"] = serde_json::json!(0);
            intent.coin = Coin::deserialize(&patched.to_string()).unwrap();
            agent.validate(&intent, 100).await;
        }

        assert!(agent.is_banned(sender.id()));

        let coin = Coin::new(sender.id().to_string(), 5, 0).unwrap();
        sender.add_coin(coin, 0).unwrap();
        let intent = sender.transfer_coin(0, "recipient-id", 100).unwrap();
        let verdict = agent.validate(&intent, 100).await;
        assert!(verdict.reason.unwrap().contains("banned"));
    }

    #[tokio::test]
    async fn inflation_is_rejected() {
        let mut agent = make_agent(0);
        let mut sender = Wallet::generate().unwrap();
        agent.register_public_key(sender.id().to_string(), sender.public_key().clone());
        let coin = Coin::new(sender.id().to_string(), 5, 0).unwrap();
        let coin_id = coin.id;
        sender.add_coin(coin, 0).unwrap();
        let intent = sender.transfer_coin(0, "recipient-id", 100).unwrap();
        agent.validate(&intent, 100).await;

        // Simulate a fresh coin of the same id presented with an inflated value.
        let mut second_sender = Wallet::generate().unwrap();
        agent.register_public_key(second_sender.id().to_string(), second_sender.public_key().clone());
        let forged = Coin::with_id(
            coin_id,
            second_sender.id().to_string(),
            50,
            0,
            serde_json::Value::Null,
        )
        .unwrap();
        second_sender.add_coin(forged, 0).unwrap();
        let forged_intent = second_sender.transfer_coin(0, "recipient-id", 200).unwrap();

        let verdict = agent.validate(&forged_intent, 200).await;
        assert!(!verdict.valid);
        assert!(verdict.reason.unwrap().contains("inflated"));
    }

    #[tokio::test]
    async fn restore_round_trips_recency_values_bans_directory_and_reputation() {
        let mut agent = make_agent(0);
        let other_wallet = Wallet::generate().unwrap();
        let coin_id = Uuid::new_v4();

        let snapshot = crate::store::PersistedAgentState {
            id: agent.id,
            filter: agent.seen_coins_bitmap(),
            recent_transactions: vec![(
                coin_id.to_string(),
                RecencyEntry {
                    timestamp: 1_000,
                    hash: Some("deadbeef".to_string()),
                    sender: Some("sender-id".to_string()),
                    recipient: Some("recipient-id".to_string()),
                    value: Some(5),
                    coin_id: Some(coin_id.to_string()),
                },
            )],
            validated_values: vec![(coin_id.to_string(), 5)],
            banned_wallets: vec!["bad-wallet".to_string()],
            public_key_directory: vec![(
                other_wallet.id().to_string(),
                other_wallet.public_key().to_pem(),
            )],
            reputation: Reputation::new(42.0),
            stats: Stats {
                validated: 7,
                ..Stats::default()
            },
            timestamp: 1_000,
        };

        agent.restore(&snapshot);

        assert_eq!(
            agent.recency.get(&coin_id.to_string()).unwrap().timestamp,
            1_000
        );
        assert_eq!(agent.validated_values.get(&coin_id), Some(&5));
        assert!(agent.is_banned("bad-wallet"));
        assert_eq!(agent.reputation.score, 42.0);
        assert_eq!(agent.stats.validated, 7);

        let restored_key = agent
            .get_public_key_for_wallet(other_wallet.id())
            .await
            .expect("restored directory entry should resolve locally");
        assert_eq!(&restored_key, other_wallet.public_key());
    }
}
