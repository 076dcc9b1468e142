use std::fmt::Display;

use async_trait::async_trait;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Bytes, Filter, Log, H256, U256};
use thiserror::Error;
use tracing::info;

use crate::errors::{ServiceError, ServiceResult};

/// Free-text failure reported by the node or the RPC transport.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ChainClientError {
    pub message: String,
}

impl ChainClientError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    fn from_display(err: impl Display) -> Self {
        Self::new(err.to_string())
    }
}

/// Narrow view of a blockchain node used by the dispatcher and the read path.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn estimate_gas(&self, tx: &TypedTransaction) -> Result<U256, ChainClientError>;

    /// Sign and broadcast `tx`. Returns as soon as the node accepts it.
    async fn send_transaction(
        &self,
        signer: &LocalWallet,
        tx: TypedTransaction,
    ) -> Result<H256, ChainClientError>;

    async fn call(&self, tx: &TypedTransaction) -> Result<Bytes, ChainClientError>;

    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>, ChainClientError>;
}

/// JSON-RPC backed [`ChainClient`].
#[derive(Clone, Debug)]
pub struct RpcChainClient {
    provider: Provider<Http>,
    chain_id: u64,
}

impl RpcChainClient {
    /// Connect to `rpc_url`, querying the chain id when none is configured.
    pub async fn connect(rpc_url: &str, chain_id: Option<u64>) -> ServiceResult<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|err| ServiceError::Config(format!("invalid rpc url {rpc_url}: {err}")))?;
        let chain_id = match chain_id {
            Some(id) => id,
            None => {
                let id = provider.get_chainid().await.map_err(|err| {
                    ServiceError::Config(format!("unable to query chain id: {err}"))
                })?;
                u64::try_from(id)
                    .map_err(|_| ServiceError::Config(format!("chain id {id} out of range")))?
            }
        };
        info!(rpc_url, chain_id, "connected to chain node");
        Ok(Self { provider, chain_id })
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn estimate_gas(&self, tx: &TypedTransaction) -> Result<U256, ChainClientError> {
        self.provider
            .estimate_gas(tx, None)
            .await
            .map_err(ChainClientError::from_display)
    }

    async fn send_transaction(
        &self,
        signer: &LocalWallet,
        tx: TypedTransaction,
    ) -> Result<H256, ChainClientError> {
        let client = SignerMiddleware::new(
            self.provider.clone(),
            signer.clone().with_chain_id(self.chain_id),
        );
        let pending = client
            .send_transaction(tx, None)
            .await
            .map_err(ChainClientError::from_display)?;
        Ok(pending.tx_hash())
    }

    async fn call(&self, tx: &TypedTransaction) -> Result<Bytes, ChainClientError> {
        self.provider
            .call(tx, None)
            .await
            .map_err(ChainClientError::from_display)
    }

    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>, ChainClientError> {
        self.provider
            .get_logs(filter)
            .await
            .map_err(ChainClientError::from_display)
    }
}
