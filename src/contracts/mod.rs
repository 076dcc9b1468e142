//! Contract interaction core: ABI registry, overload resolution, dispatch,
//! error normalization, and the read path.

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use ethers::abi::Abi;
use ethers::types::Address;
use serde::{Deserialize, Serialize};

use crate::config::{ContractEntry, ContractsConfig};
use crate::errors::{ServiceError, ServiceResult};

pub mod client;
pub mod dispatcher;
pub mod normalizer;
pub mod reader;
pub mod resolver;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractKind {
    Ticket,
    Marketplace,
}

impl ContractKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ticket => "ticket",
            Self::Marketplace => "marketplace",
        }
    }
}

impl fmt::Display for ContractKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContractKind {
    type Err = ServiceError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "ticket" => Ok(Self::Ticket),
            "marketplace" => Ok(Self::Marketplace),
            other => Err(ServiceError::Config(format!("unknown contract type {other}"))),
        }
    }
}

/// Static description of one deployed contract.
#[derive(Clone, Debug)]
pub struct ContractConfig {
    pub kind: ContractKind,
    pub address: Address,
    pub abi: Abi,
}

impl ContractConfig {
    pub fn new(kind: ContractKind, address: Address, abi: Abi) -> Self {
        Self { kind, address, abi }
    }

    pub fn load(kind: ContractKind, entry: &ContractEntry) -> ServiceResult<Self> {
        let address = parse_address(&entry.address)
            .map_err(|err| ServiceError::Config(format!("{kind} contract address: {err}")))?;
        let abi = load_abi(&entry.abi_path)?;
        Ok(Self::new(kind, address, abi))
    }
}

/// Immutable set of contracts the service talks to.
#[derive(Clone, Debug)]
pub struct ContractRegistry {
    ticket: Arc<ContractConfig>,
    marketplace: Arc<ContractConfig>,
}

impl ContractRegistry {
    pub fn new(ticket: ContractConfig, marketplace: ContractConfig) -> Self {
        Self {
            ticket: Arc::new(ticket),
            marketplace: Arc::new(marketplace),
        }
    }

    pub fn load(config: &ContractsConfig) -> ServiceResult<Self> {
        Ok(Self::new(
            ContractConfig::load(ContractKind::Ticket, &config.ticket)?,
            ContractConfig::load(ContractKind::Marketplace, &config.marketplace)?,
        ))
    }

    pub fn get(&self, kind: ContractKind) -> &ContractConfig {
        match kind {
            ContractKind::Ticket => &self.ticket,
            ContractKind::Marketplace => &self.marketplace,
        }
    }
}

/// Read an ABI from either a bare JSON array or a compiler artifact with an `abi` field.
pub fn load_abi(path: &Path) -> ServiceResult<Abi> {
    let raw = fs::read_to_string(path)?;
    parse_abi(&raw).map_err(|err| ServiceError::Config(format!("{}: {err}", path.display())))
}

pub fn parse_abi(raw: &str) -> Result<Abi, String> {
    let mut document: serde_json::Value =
        serde_json::from_str(raw).map_err(|err| format!("invalid ABI json: {err}"))?;
    let abi = match document.get_mut("abi") {
        Some(inner) => inner.take(),
        None => document,
    };
    serde_json::from_value(abi).map_err(|err| format!("invalid ABI: {err}"))
}

pub fn parse_address(value: &str) -> Result<Address, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("address is empty".to_string());
    }
    trimmed
        .parse::<Address>()
        .map_err(|err| format!("invalid address {trimmed:?}: {err}"))
}
