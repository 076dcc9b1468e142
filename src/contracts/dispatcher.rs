use std::collections::HashMap;
use std::sync::Arc;

use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, TransactionRequest, H256, U256};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use super::client::{ChainClient, ChainClientError};
use super::normalizer::normalize;
use super::resolver::{resolve_call, CallArg};
use super::{ContractKind, ContractRegistry};
use crate::errors::{ServiceError, ServiceResult};
use crate::wallet::WalletDirectory;

/// Percentage applied to every gas estimate before submission.
pub const GAS_MARGIN_PERCENT: u64 = 120;

/// Gas limit for a successful estimate: 120% of the estimate, truncated.
pub fn gas_limit_with_margin(estimate: U256) -> U256 {
    estimate.saturating_mul(U256::from(GAS_MARGIN_PERCENT)) / U256::from(100u64)
}

/// Which key authorizes on-chain calls made on a user's behalf.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SigningMode {
    /// The platform admin key signs every call; the user's wallet is only reported.
    #[default]
    Admin,
    /// The caller's own custodial key signs.
    Custodial,
}

#[derive(Clone, Debug)]
pub struct DispatchRequest {
    pub contract: ContractKind,
    pub caller: String,
    pub function: String,
    pub args: Vec<CallArg>,
    pub value: U256,
}

impl DispatchRequest {
    pub fn new(contract: ContractKind, caller: impl Into<String>, function: impl Into<String>) -> Self {
        Self {
            contract,
            caller: caller.into(),
            function: function.into(),
            args: Vec::new(),
            value: U256::zero(),
        }
    }

    pub fn args(mut self, args: Vec<CallArg>) -> Self {
        self.args = args;
        self
    }

    pub fn value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }
}

/// Outcome of a broadcast call. The transaction is not necessarily mined.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchReceipt {
    pub success: bool,
    pub transaction_hash: H256,
    /// Always the caller's wallet address, whichever key signed.
    pub signer_address: Address,
    pub function: String,
}

/// Serializes submissions per signing address so each signer has one writer.
///
/// Lanes nobody holds or waits on are dropped on the next `acquire`, so the
/// map stays bounded by the number of signers with work in flight.
#[derive(Debug, Default)]
pub struct SubmissionGate {
    lanes: Mutex<HashMap<Address, Arc<AsyncMutex<()>>>>,
}

impl SubmissionGate {
    pub async fn acquire(&self, signer: Address) -> OwnedMutexGuard<()> {
        let lane = {
            let mut lanes = self.lanes.lock();
            lanes.retain(|address, lane| *address == signer || Arc::strong_count(lane) > 1);
            Arc::clone(lanes.entry(signer).or_default())
        };
        lane.lock_owned().await
    }

    pub fn lanes(&self) -> usize {
        self.lanes.lock().len()
    }
}

/// Builds, signs, and submits state-changing contract calls for users.
pub struct TransactionDispatcher {
    chain: Arc<dyn ChainClient>,
    contracts: Arc<ContractRegistry>,
    wallets: Arc<dyn WalletDirectory>,
    admin: LocalWallet,
    mode: SigningMode,
    gate: SubmissionGate,
}

impl TransactionDispatcher {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        contracts: Arc<ContractRegistry>,
        wallets: Arc<dyn WalletDirectory>,
        admin: LocalWallet,
        mode: SigningMode,
    ) -> Self {
        Self {
            chain,
            contracts,
            wallets,
            admin,
            mode,
            gate: SubmissionGate::default(),
        }
    }

    pub fn mode(&self) -> SigningMode {
        self.mode
    }

    pub fn admin_address(&self) -> Address {
        self.admin.address()
    }

    /// Execute one call on behalf of `request.caller`. Attempted exactly once.
    pub async fn dispatch(&self, request: DispatchRequest) -> ServiceResult<DispatchReceipt> {
        let wallet = self
            .wallets
            .lookup(&request.caller)
            .await?
            .ok_or_else(|| ServiceError::WalletNotFound(request.caller.clone()))?;
        let contract = self.contracts.get(request.contract);
        let resolved = resolve_call(&contract.abi, &request.function, &request.args)?;
        let signature = resolved.signature();

        let signer = match self.mode {
            SigningMode::Admin => self.admin.clone(),
            SigningMode::Custodial => wallet.signer()?,
        };
        debug!(
            user = %request.caller,
            contract = %request.contract,
            function = %signature,
            signer = ?signer.address(),
            "dispatching contract call"
        );

        let mut tx: TypedTransaction = TransactionRequest::new()
            .from(signer.address())
            .to(contract.address)
            .data(resolved.calldata.clone())
            .value(request.value)
            .into();

        let _lane = self.gate.acquire(signer.address()).await;
        let estimate = self
            .chain
            .estimate_gas(&tx)
            .await
            .map_err(|err| self.reject(&request, &signature, err))?;
        tx.set_gas(gas_limit_with_margin(estimate));

        let transaction_hash = self
            .chain
            .send_transaction(&signer, tx)
            .await
            .map_err(|err| self.reject(&request, &signature, err))?;

        info!(
            user = %request.caller,
            contract = %request.contract,
            function = %signature,
            tx_hash = ?transaction_hash,
            "contract call submitted"
        );
        Ok(DispatchReceipt {
            success: true,
            transaction_hash,
            signer_address: wallet.address,
            function: signature,
        })
    }

    fn reject(&self, request: &DispatchRequest, signature: &str, err: ChainClientError) -> ServiceError {
        let normalized = normalize(&err.message);
        warn!(
            user = %request.caller,
            contract = %request.contract,
            function = %signature,
            category = %normalized.category,
            error = %err,
            "contract call failed"
        );
        ServiceError::Chain(normalized)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn margin_is_exactly_one_hundred_twenty_percent() {
        assert_eq!(gas_limit_with_margin(U256::from(100_000u64)), U256::from(120_000u64));
        assert_eq!(gas_limit_with_margin(U256::from(21_001u64)), U256::from(25_201u64));
        assert_eq!(gas_limit_with_margin(U256::from(7u64)), U256::from(8u64));
        assert_eq!(gas_limit_with_margin(U256::zero()), U256::zero());
    }

    #[test]
    fn margin_saturates_instead_of_overflowing() {
        assert_eq!(gas_limit_with_margin(U256::MAX), U256::MAX / U256::from(100u64));
    }

    #[tokio::test]
    async fn gate_serializes_a_single_signer() {
        let gate = SubmissionGate::default();
        let signer = Address::repeat_byte(0x01);
        let held = gate.acquire(signer).await;

        let blocked = tokio::time::timeout(Duration::from_millis(50), gate.acquire(signer)).await;
        assert!(blocked.is_err(), "second writer must wait for the first");

        let other = tokio::time::timeout(
            Duration::from_millis(50),
            gate.acquire(Address::repeat_byte(0x02)),
        )
        .await;
        assert!(other.is_ok(), "distinct signers proceed independently");

        drop(held);
        assert!(
            tokio::time::timeout(Duration::from_millis(50), gate.acquire(signer))
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn idle_lanes_are_pruned() {
        let gate = SubmissionGate::default();
        for byte in 1..=16u8 {
            drop(gate.acquire(Address::repeat_byte(byte)).await);
        }
        assert_eq!(gate.lanes(), 1, "released lanes must not accumulate");

        let held = gate.acquire(Address::repeat_byte(0xaa)).await;
        drop(gate.acquire(Address::repeat_byte(0xbb)).await);
        assert_eq!(gate.lanes(), 2, "a held lane survives pruning");
        drop(held);
    }

    #[test]
    fn signing_mode_defaults_to_admin() {
        assert_eq!(SigningMode::default(), SigningMode::Admin);
        let parsed: SigningMode = serde_json::from_str("\"custodial\"").unwrap();
        assert_eq!(parsed, SigningMode::Custodial);
    }
}
