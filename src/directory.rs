//! The public-key directory: conceptually a global service mapping wallet
//! ids to public keys; modeled here as an injected, swappable interface
//! (Design Note §9) so witnesses and tests can drive it independently of
//! any real directory service.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::crypto::PublicKey;

#[async_trait]
pub trait DirectoryLookup: Send + Sync {
    async fn lookup(&self, wallet_id: &str) -> Option<PublicKey>;
    async fn register(&self, wallet_id: String, public_key: PublicKey);
}

/// The in-memory stand-in for the "conceptually global" directory of spec
/// §3/§4.3. A real deployment would back this with gossip or an RPC lookup;
/// this crate only needs the trait boundary.
#[derive(Clone, Default)]
pub struct InMemoryDirectory {
    entries: Arc<RwLock<HashMap<String, PublicKey>>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DirectoryLookup for InMemoryDirectory {
    async fn lookup(&self, wallet_id: &str) -> Option<PublicKey> {
        self.entries.read().await.get(wallet_id).cloned()
    }

    async fn register(&self, wallet_id: String, public_key: PublicKey) {
        self.entries.write().await.insert(wallet_id, public_key);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::generate_keypair;

    #[tokio::test]
    async fn miss_then_register_then_hit() {
        let directory = InMemoryDirectory::new();
        assert!(directory.lookup("ghost").await.is_none());

        let (_, public_key) = generate_keypair().unwrap();
        directory
            .register("wallet-1".to_string(), public_key.clone())
            .await;
        assert_eq!(directory.lookup("wallet-1").await, Some(public_key));
    }
}
