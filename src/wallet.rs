//! The keypair holder: owns a multiset of coins, signs transfer intents,
//! and keeps an append-only local record of sends and receives.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::coin::Coin;
use crate::crypto::{self, PrivateKey, PublicKey};
use crate::error::{Error, Result};

/// The wire form of a transfer request, carried from a sending wallet
/// through the network to the witness committee (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferIntent {
    pub coin: Coin,
    pub signature: String,
    pub sender: String,
    pub recipient: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum TransactionDirection {
    Sent,
    Received,
}

/// A locally recorded send or receive, kept purely for the wallet owner's
/// own bookkeeping; it has no bearing on witness validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub direction: TransactionDirection,
    pub coin_id: Uuid,
    pub counterparty: String,
    pub value: u64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    public_key: PublicKey,
    private_key: PrivateKey,
    id: String,
    pub coins: Vec<Coin>,
    pub transactions: Vec<TransactionRecord>,
}

impl Wallet {
    pub fn generate() -> Result<Self> {
        let (private_key, public_key) = crypto::generate_keypair()?;
        Ok(Self::from_keys(private_key, public_key))
    }

    pub fn from_keys(private_key: PrivateKey, public_key: PublicKey) -> Self {
        let id = crypto::wallet_id_from_public_key(&public_key);
        Self {
            public_key,
            private_key,
            id,
            coins: Vec::new(),
            transactions: Vec::new(),
        }
    }

    /// Loads a wallet from a PEM-encoded PKCS#8 private key, such as one
    /// read back from disk.
    pub fn load(private_key_pem: &str) -> Result<Self> {
        let private_key = PrivateKey::from_pem(private_key_pem)?;
        let public_key = private_key.public_key();
        Ok(Self::from_keys(private_key, public_key))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// The sum of `value` over every coin currently held.
    pub fn balance(&self) -> u64 {
        self.coins.iter().map(|c| c.value).sum()
    }

    pub fn coin_count(&self) -> usize {
        self.coins.len()
    }

    /// Adds `coin` to local holdings. Rejects coins this wallet does not
    /// actually own, per the ownership invariant of spec §3.
    pub fn add_coin(&mut self, coin: Coin, now: i64) -> Result<()> {
        if coin.owner_id != self.id {
            return Err(Error::NotOwner);
        }
        let counterparty = match coin.history.last() {
            Some(crate::coin::HistoryEvent::Transfer { from, .. }) => from.clone(),
            _ => String::new(),
        };
        self.transactions.push(TransactionRecord {
            direction: TransactionDirection::Received,
            coin_id: coin.id,
            counterparty,
            value: coin.value,
            timestamp: now,
        });
        self.coins.push(coin);
        Ok(())
    }

    /// Removes the coin at `index`, signs a transfer intent to `recipient_id`,
    /// and returns it. Returns `None` if `index` is out of range — mirroring
    /// the teacher's index-based coin access, which never panics on a bad
    /// index.
    pub fn transfer_coin(
        &mut self,
        index: usize,
        recipient_id: &str,
        now: i64,
    ) -> Option<TransferIntent> {
        if index >= self.coins.len() {
            return None;
        }
        let coin = self.coins.remove(index);
        let message = coin.signature_data(recipient_id, now);
        let signature = self.private_key.sign_str(&message);

        self.transactions.push(TransactionRecord {
            direction: TransactionDirection::Sent,
            coin_id: coin.id,
            counterparty: recipient_id.to_string(),
            value: coin.value,
            timestamp: now,
        });

        Some(TransferIntent {
            coin,
            signature,
            sender: self.id.clone(),
            recipient: recipient_id.to_string(),
            timestamp: now,
        })
    }

    /// Returns a coin to this wallet's holdings after a failed transfer
    /// (the network's rollback path).
    pub fn return_coin(&mut self, mut coin: Coin) {
        coin.owner_id = self.id.clone();
        self.coins.push(coin);
    }

    /// Standard RSA-SHA256 verification, exposed for callers that already
    /// hold a counterparty's public key.
    pub fn verify_signature(data: &str, signature: &str, public_key: &PublicKey) -> Result<()> {
        public_key.verify_str(data, signature)
    }
}
