#![allow(dead_code)]

pub mod chain;
pub mod identity;

use std::path::PathBuf;
use std::sync::Arc;

use ethers::abi::Abi;
use ethers::signers::LocalWallet;
use ethers::types::Address;

use ticket_relay::api::ApiContext;
use ticket_relay::contracts::dispatcher::{SigningMode, TransactionDispatcher};
use ticket_relay::contracts::reader::TicketReader;
use ticket_relay::contracts::{load_abi, ContractConfig, ContractKind, ContractRegistry};
use ticket_relay::crypto::generate_signing_key;
use ticket_relay::ticketing::TicketingService;
use ticket_relay::wallet::{MemoryWalletDirectory, WalletDirectory};

use chain::FakeChain;
use identity::FakeIdentity;

pub fn abi_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("abi").join(name)
}

pub fn ticket_address() -> Address {
    Address::repeat_byte(0x11)
}

pub fn marketplace_address() -> Address {
    Address::repeat_byte(0x22)
}

fn shipped_abis() -> (Abi, Abi) {
    (
        load_abi(&abi_path("TicketFactory.json")).expect("ticket abi"),
        load_abi(&abi_path("Marketplace.json")).expect("marketplace abi"),
    )
}

fn keep_arity(abi: &mut Abi, name: &str, arity: usize) {
    if let Some(overloads) = abi.functions.get_mut(name) {
        overloads.retain(|function| function.inputs.len() == arity);
    }
}

/// Fully wired service over an in-memory chain, identity provider, and wallet directory.
pub struct Harness {
    pub chain: Arc<FakeChain>,
    pub identity: Arc<FakeIdentity>,
    pub wallets: Arc<MemoryWalletDirectory>,
    pub contracts: Arc<ContractRegistry>,
    pub admin: LocalWallet,
    pub tickets: Arc<TicketingService>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_mode(SigningMode::Admin)
    }

    pub fn with_mode(mode: SigningMode) -> Self {
        let (ticket_abi, marketplace_abi) = shipped_abis();
        Self::with_abis(mode, ticket_abi, marketplace_abi)
    }

    /// Contracts that only credit `msg.sender`: no trailing beneficiary on purchase or buy.
    pub fn without_beneficiary_overloads(mode: SigningMode) -> Self {
        let (mut ticket_abi, mut marketplace_abi) = shipped_abis();
        keep_arity(&mut ticket_abi, "purchaseTicket", 3);
        keep_arity(&mut marketplace_abi, "buyTicket", 1);
        Self::with_abis(mode, ticket_abi, marketplace_abi)
    }

    pub fn with_abis(mode: SigningMode, ticket_abi: Abi, marketplace_abi: Abi) -> Self {
        let contracts = Arc::new(ContractRegistry::new(
            ContractConfig::new(ContractKind::Ticket, ticket_address(), ticket_abi.clone()),
            ContractConfig::new(
                ContractKind::Marketplace,
                marketplace_address(),
                marketplace_abi.clone(),
            ),
        ));
        let chain = Arc::new(FakeChain::new(
            (ticket_address(), ticket_abi),
            (marketplace_address(), marketplace_abi),
        ));
        let identity = Arc::new(FakeIdentity::default());
        let wallets = Arc::new(MemoryWalletDirectory::new());
        let admin = generate_signing_key();

        let dispatcher = TransactionDispatcher::new(
            chain.clone(),
            contracts.clone(),
            wallets.clone(),
            admin.clone(),
            mode,
        );
        let reader = TicketReader::new(chain.clone(), contracts.clone(), 0);
        let tickets = Arc::new(TicketingService::new(
            dispatcher,
            reader,
            wallets.clone(),
            identity.clone(),
            contracts.clone(),
        ));

        Self {
            chain,
            identity,
            wallets,
            contracts,
            admin,
            tickets,
        }
    }

    /// Register a user with a token and a custodial wallet.
    pub async fn user(&self, email: &str) -> (String, String, Address) {
        let (user_id, token) = self.identity.register(email);
        let address = self.wallets.create(&user_id).await.expect("wallet");
        (user_id, token, address)
    }

    pub fn api_context(&self) -> ApiContext {
        ApiContext::new(self.identity.clone(), self.wallets.clone(), self.tickets.clone())
    }
}
