//! The coin value packet: identity, owner, value, hash-chained history, and
//! the status machine that governs whether it is still transferable.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::crypto::sha256_hex;
use crate::error::{Error, Result};

/// A coin's lifecycle. All variants besides `Active` are terminal with
/// respect to transfer.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoinStatus {
    Active,
    Spent,
    Merged,
    Expired,
    Revoked,
    Frozen,
}

impl fmt::Display for CoinStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CoinStatus::Active => "active",
            CoinStatus::Spent => "spent",
            CoinStatus::Merged => "merged",
            CoinStatus::Expired => "expired",
            CoinStatus::Revoked => "revoked",
            CoinStatus::Frozen => "frozen",
        };
        f.write_str(s)
    }
}

/// One entry of a coin's transfer/split/merge history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum HistoryEvent {
    Transfer {
        from: String,
        to: String,
        timestamp: i64,
        signature: String,
        witnesses: Vec<usize>,
        prev_hash: String,
        value: u64,
    },
    Split {
        paired_coin: Uuid,
        new_value: u64,
        timestamp: i64,
        prev_hash: String,
    },
    Merge {
        paired_coin: Uuid,
        absorbed_value: u64,
        timestamp: i64,
        prev_hash: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Coin {
    pub id: Uuid,
    pub owner_id: String,
    pub value: u64,
    pub created: i64,
    pub last_transferred: i64,
    pub expiry_date: Option<i64>,
    pub hash: String,
    pub history: Vec<HistoryEvent>,
    pub metadata: serde_json::Value,
    pub status: CoinStatus,
    pub version: u32,
}

const CURRENT_VERSION: u32 = 1;

impl Coin {
    /// Creates a fresh, active coin. Fails if `value == 0`.
    pub fn new(owner_id: impl Into<String>, value: u64, now: i64) -> Result<Self> {
        Self::with_id(Uuid::new_v4(), owner_id, value, now, serde_json::Value::Null)
    }

    pub fn with_id(
        id: Uuid,
        owner_id: impl Into<String>,
        value: u64,
        now: i64,
        metadata: serde_json::Value,
    ) -> Result<Self> {
        if value == 0 {
            return Err(Error::ZeroValue);
        }
        let mut coin = Self {
            id,
            owner_id: owner_id.into(),
            value,
            created: now,
            last_transferred: now,
            expiry_date: None,
            hash: String::new(),
            history: Vec::new(),
            metadata,
            status: CoinStatus::Active,
            version: CURRENT_VERSION,
        };
        coin.recompute_hash();
        Ok(coin)
    }

    fn last_history_hash(&self) -> String {
        match self.history.last() {
            Some(HistoryEvent::Transfer { prev_hash, .. })
            | Some(HistoryEvent::Split { prev_hash, .. })
            | Some(HistoryEvent::Merge { prev_hash, .. }) => prev_hash.clone(),
            None => String::new(),
        }
    }

    fn canonical_form(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}|{}|{}",
            self.id,
            self.owner_id,
            self.value,
            self.created,
            self.last_transferred,
            self.history.len(),
            self.status,
            self.last_history_hash(),
        )
    }

    fn recompute_hash(&mut self) {
        self.hash = sha256_hex(&self.canonical_form());
    }

    /// Recomputes the hash over the current fields and compares it to the
    /// stored one.
    pub fn verify_integrity(&self) -> bool {
        sha256_hex(&self.canonical_form()) == self.hash
    }

    /// The canonical payload a wallet signs (and a witness re-derives) for a
    /// transfer of this coin to `recipient_id` at `timestamp`: identical to
    /// the string the sending wallet actually signs, so the two sides never
    /// drift apart.
    pub fn signature_data(&self, recipient_id: &str, timestamp: i64) -> String {
        format!("{}-{}-{}-{}", self.id, self.owner_id, recipient_id, timestamp)
    }

    /// If this coin has an expiry date that has passed, transitions it to
    /// `Expired`. No-op otherwise. Called on every touch (spec §3).
    pub fn touch_expiry(&mut self, now: i64) {
        if self.status == CoinStatus::Active {
            if let Some(expiry) = self.expiry_date {
                if now >= expiry {
                    self.status = CoinStatus::Expired;
                    self.recompute_hash();
                }
            }
        }
    }

    fn is_expired(&self, now: i64) -> bool {
        matches!(self.expiry_date, Some(expiry) if now >= expiry)
    }

    /// Rewrites ownership after a quorum of witnesses has attested to the
    /// transfer. `witnesses` are the attesting agent ids.
    pub fn transfer(
        &mut self,
        new_owner_id: &str,
        signature: &str,
        witnesses: Vec<usize>,
        now: i64,
    ) -> Result<()> {
        if new_owner_id.is_empty() {
            return Err(Error::InvalidRecipient);
        }
        if signature.is_empty() {
            return Err(Error::MissingSignature);
        }
        if self.status != CoinStatus::Active {
            return Err(Error::InactiveStatus(self.status));
        }
        if self.value == 0 {
            return Err(Error::ZeroValue);
        }
        if self.is_expired(now) {
            self.status = CoinStatus::Expired;
            self.recompute_hash();
            return Err(Error::Expired);
        }

        let prev_hash = self.hash.clone();
        self.history.push(HistoryEvent::Transfer {
            from: self.owner_id.clone(),
            to: new_owner_id.to_string(),
            timestamp: now,
            signature: signature.to_string(),
            witnesses,
            prev_hash,
            value: self.value,
        });
        self.owner_id = new_owner_id.to_string();
        self.last_transferred = now;
        self.recompute_hash();
        Ok(())
    }

    /// Splits off a new coin of `new_value`, owned by the same wallet.
    /// `self` keeps the remainder. Both coins append a shared split event.
    pub fn split(&mut self, new_value: u64, now: i64) -> Result<Coin> {
        if new_value == 0 || new_value >= self.value {
            return Err(Error::InvalidSplitAmount);
        }
        let new_id = Uuid::new_v4();
        let remaining = self.value - new_value;

        let self_prev_hash = self.hash.clone();
        self.value = remaining;
        self.history.push(HistoryEvent::Split {
            paired_coin: new_id,
            new_value,
            timestamp: now,
            prev_hash: self_prev_hash,
        });
        self.recompute_hash();

        let mut other = Coin::with_id(
            new_id,
            self.owner_id.clone(),
            new_value,
            now,
            serde_json::Value::Null,
        )?;
        let other_prev_hash = other.hash.clone();
        other.history.push(HistoryEvent::Split {
            paired_coin: self.id,
            new_value: remaining,
            timestamp: now,
            prev_hash: other_prev_hash,
        });
        other.recompute_hash();

        Ok(other)
    }

    /// Absorbs `other` into `self`. `other` transitions to `Merged`.
    pub fn merge(&mut self, other: &mut Coin, now: i64) -> Result<()> {
        if self.owner_id != other.owner_id {
            return Err(Error::OwnerMismatch);
        }
        if self.status != CoinStatus::Active {
            return Err(Error::NotMergeable(self.status));
        }
        if other.status != CoinStatus::Active {
            return Err(Error::NotMergeable(other.status));
        }

        let self_prev_hash = self.hash.clone();
        let other_prev_hash = other.hash.clone();
        let absorbed = other.value;

        self.value += absorbed;
        self.history.push(HistoryEvent::Merge {
            paired_coin: other.id,
            absorbed_value: absorbed,
            timestamp: now,
            prev_hash: self_prev_hash,
        });
        self.recompute_hash();

        other.status = CoinStatus::Merged;
        other.history.push(HistoryEvent::Merge {
            paired_coin: self.id,
            absorbed_value: absorbed,
            timestamp: now,
            prev_hash: other_prev_hash,
        });
        other.recompute_hash();

        Ok(())
    }

    pub fn serialize(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Round-trips through JSON, recomputing the hash and warning if it
    /// disagrees with the serialized value (a sign of tampering in transit).
    pub fn deserialize(data: &str) -> Result<Self> {
        let mut coin: Coin = serde_json::from_str(data)?;
        let stored_hash = coin.hash.clone();
        coin.recompute_hash();
        if coin.hash != stored_hash {
            warn!(coin_id = %coin.id, "deserialized coin hash does not match its stored hash");
        }
        Ok(coin)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn new_rejects_zero_value() {
        assert!(matches!(Coin::new("alice", 0, 0), Err(Error::ZeroValue)));
    }

    #[test]
    fn fresh_coin_passes_integrity() {
        let coin = Coin::new("alice", 5, 1000).unwrap();
        assert!(coin.verify_integrity());
        assert_eq!(coin.history.len(), 0);
        assert_eq!(coin.status, CoinStatus::Active);
    }

    #[test]
    fn transfer_rewrites_owner_and_appends_history() {
        let mut coin = Coin::new("alice", 5, 1000).unwrap();
        coin.transfer("bob", "sig", vec![1, 2, 3], 2000).unwrap();
        assert_eq!(coin.owner_id, "bob");
        assert_eq!(coin.history.len(), 1);
        assert_eq!(coin.last_transferred, 2000);
        assert!(coin.verify_integrity());
    }

    #[test]
    fn transfer_rejects_inactive_zero_or_unsigned() {
        let mut coin = Coin::new("alice", 5, 1000).unwrap();
        assert!(matches!(
            coin.transfer("", "sig", vec![], 2000),
            Err(Error::InvalidRecipient)
        ));
        assert!(matches!(
            coin.transfer("bob", "", vec![], 2000),
            Err(Error::MissingSignature)
        ));

        coin.status = CoinStatus::Spent;
        assert!(matches!(
            coin.transfer("bob", "sig", vec![], 2000),
            Err(Error::InactiveStatus(CoinStatus::Spent))
        ));
    }

    #[test]
    fn expired_coin_cannot_transfer() {
        let mut coin = Coin::new("alice", 5, 1000).unwrap();
        coin.expiry_date = Some(1500);
        let result = coin.transfer("bob", "sig", vec![], 2000);
        assert!(matches!(result, Err(Error::Expired)));
        assert_eq!(coin.status, CoinStatus::Expired);
    }

    #[test]
    fn tampering_breaks_integrity_check() {
        let mut coin = Coin::new("alice", 5, 1000).unwrap();
        coin.value = 500;
        assert!(!coin.verify_integrity());
    }

    #[test]
    fn split_then_merge_round_trips_value() {
        let mut c = Coin::new("alice", 10, 1000).unwrap();
        let mut split_off = c.split(4, 1500).unwrap();
        assert_eq!(c.value, 6);
        assert_eq!(split_off.value, 4);
        assert!(c.verify_integrity());
        assert!(split_off.verify_integrity());

        c.merge(&mut split_off, 2000).unwrap();
        assert_eq!(c.value, 10);
        assert_eq!(split_off.status, CoinStatus::Merged);
        assert!(c.verify_integrity());
        assert!(split_off.verify_integrity());
        assert_eq!(c.history.len(), 2);
        assert!(matches!(c.history[0], HistoryEvent::Split { .. }));
        assert!(matches!(c.history[1], HistoryEvent::Merge { .. }));
    }

    #[test]
    fn split_bounds_are_enforced() {
        let mut c = Coin::new("alice", 10, 1000).unwrap();
        assert!(matches!(c.split(0, 1500), Err(Error::InvalidSplitAmount)));
        assert!(matches!(c.split(10, 1500), Err(Error::InvalidSplitAmount)));
        assert!(matches!(c.split(11, 1500), Err(Error::InvalidSplitAmount)));
    }

    #[test]
    fn merge_requires_matching_owner_and_active_status() {
        let mut a = Coin::new("alice", 10, 1000).unwrap();
        let mut b = Coin::new("bob", 5, 1000).unwrap();
        assert!(matches!(a.merge(&mut b, 2000), Err(Error::OwnerMismatch)));

        let mut c = Coin::new("alice", 5, 1000).unwrap();
        c.status = CoinStatus::Spent;
        let mut d = Coin::new("alice", 5, 1000).unwrap();
        assert!(matches!(
            d.merge(&mut c, 2000),
            Err(Error::NotMergeable(CoinStatus::Spent))
        ));
    }

    #[test]
    fn serialize_deserialize_round_trip() {
        let coin = Coin::new("alice", 5, 1000).unwrap();
        let json = coin.serialize().unwrap();
        let restored = Coin::deserialize(&json).unwrap();
        assert_eq!(restored.id, coin.id);
        assert_eq!(restored.hash, coin.hash);
        assert!(restored.verify_integrity());
    }
}
