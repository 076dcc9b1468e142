//! Custodial wallet directory: one key pair per user, created once.

use std::collections::HashMap;

use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::Address;
use parking_lot::RwLock;
use tracing::info;
use zeroize::Zeroizing;

use crate::crypto::{generate_signing_key, private_key_hex, signing_key_from_hex};
use crate::errors::{ServiceError, ServiceResult};

pub mod postgrest;

pub use postgrest::PostgrestWalletDirectory;

/// A user's custodial key pair as held by the directory.
#[derive(Clone)]
pub struct CustodialWallet {
    pub owner: String,
    pub address: Address,
    private_key: Zeroizing<String>,
}

impl CustodialWallet {
    pub fn new(owner: impl Into<String>, address: Address, private_key: Zeroizing<String>) -> Self {
        Self {
            owner: owner.into(),
            address,
            private_key,
        }
    }

    pub fn generate(owner: impl Into<String>) -> Self {
        let key = generate_signing_key();
        Self::new(owner, key.address(), private_key_hex(&key))
    }

    pub fn private_key(&self) -> &str {
        &self.private_key
    }

    /// Rebuild the signing key, checking it still derives the stored address.
    pub fn signer(&self) -> ServiceResult<LocalWallet> {
        let key = signing_key_from_hex(&self.private_key)
            .map_err(|_| ServiceError::Directory(format!("corrupt key for user {}", self.owner)))?;
        if key.address() != self.address {
            return Err(ServiceError::Directory(format!(
                "stored address does not match key for user {}",
                self.owner
            )));
        }
        Ok(key)
    }
}

impl std::fmt::Debug for CustodialWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustodialWallet")
            .field("owner", &self.owner)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait WalletDirectory: Send + Sync {
    /// Create the user's wallet. A second call returns the existing address.
    async fn create(&self, user_id: &str) -> ServiceResult<Address>;

    async fn lookup(&self, user_id: &str) -> ServiceResult<Option<CustodialWallet>>;

    async fn ensure(&self, user_id: &str) -> ServiceResult<Address> {
        match self.lookup(user_id).await? {
            Some(wallet) => Ok(wallet.address),
            None => self.create(user_id).await,
        }
    }
}

/// Process-local directory, used for development and tests.
#[derive(Default)]
pub struct MemoryWalletDirectory {
    wallets: RwLock<HashMap<String, CustodialWallet>>,
}

impl MemoryWalletDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.wallets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.wallets.read().is_empty()
    }
}

#[async_trait]
impl WalletDirectory for MemoryWalletDirectory {
    async fn create(&self, user_id: &str) -> ServiceResult<Address> {
        if user_id.is_empty() {
            return Err(ServiceError::Directory("user id must not be empty".into()));
        }
        let mut wallets = self.wallets.write();
        let wallet = wallets.entry(user_id.to_string()).or_insert_with(|| {
            let wallet = CustodialWallet::generate(user_id);
            info!(user = user_id, address = ?wallet.address, "created custodial wallet");
            wallet
        });
        Ok(wallet.address)
    }

    async fn lookup(&self, user_id: &str) -> ServiceResult<Option<CustodialWallet>> {
        Ok(self.wallets.read().get(user_id).cloned())
    }
}
