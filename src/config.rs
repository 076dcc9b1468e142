use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use ethers::signers::{LocalWallet, Signer};
use serde::{Deserialize, Serialize};

use crate::contracts::dispatcher::SigningMode;
use crate::contracts::parse_address;
use crate::crypto::{load_signing_key, signing_key_from_hex};
use crate::errors::{ServiceError, ServiceResult};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub listen: SocketAddr,
    #[serde(default)]
    pub allowed_origin: Option<String>,
    pub chain: ChainConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    pub contracts: ContractsConfig,
    pub identity: IdentityConfig,
    #[serde(default)]
    pub wallets: WalletsConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChainConfig {
    pub rpc_url: String,
    /// Queried from the node at startup when absent.
    #[serde(default)]
    pub chain_id: Option<u64>,
    #[serde(default)]
    pub signing: SigningMode,
    #[serde(default)]
    pub listing_from_block: u64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AdminConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_path: Option<PathBuf>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContractsConfig {
    pub ticket: ContractEntry,
    pub marketplace: ContractEntry,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContractEntry {
    pub address: String,
    pub abi_path: PathBuf,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IdentityConfig {
    pub url: String,
    #[serde(default)]
    pub api_key: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalletBackend {
    Memory,
    #[default]
    Postgrest,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WalletsConfig {
    #[serde(default)]
    pub backend: WalletBackend,
    #[serde(default = "default_wallet_table")]
    pub table: String,
}

fn default_wallet_table() -> String {
    "user_wallets".to_string()
}

impl Default for WalletsConfig {
    fn default() -> Self {
        Self {
            backend: WalletBackend::default(),
            table: default_wallet_table(),
        }
    }
}

impl ServiceConfig {
    pub fn load(path: &Path) -> ServiceResult<Self> {
        let content = fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|err| ServiceError::Config(format!("unable to parse config: {err}")))
    }

    pub fn save(&self, path: &Path) -> ServiceResult<()> {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)?;
        let encoded = toml::to_string_pretty(self)
            .map_err(|err| ServiceError::Config(format!("unable to encode config: {err}")))?;
        fs::write(path, encoded)?;
        Ok(())
    }

    pub fn ensure_directories(&self) -> ServiceResult<()> {
        if let Some(parent) = self.admin.key_path.as_deref().and_then(Path::parent) {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    /// Overlay the deployment environment variables on top of the file values.
    pub fn apply_env(&mut self) -> ServiceResult<()> {
        self.apply_overrides(|name| env::var(name).ok().filter(|value| !value.trim().is_empty()))
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> ServiceResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(listen) = lookup("LISTEN_ADDR") {
            self.listen = listen
                .parse()
                .map_err(|err| ServiceError::Config(format!("invalid LISTEN_ADDR: {err}")))?;
        }
        if let Some(rpc_url) = lookup("RPC_URL") {
            self.chain.rpc_url = rpc_url;
        }
        if let Some(address) = lookup("CONTRACT_ADDRESS") {
            self.contracts.ticket.address = address;
        }
        if let Some(address) = lookup("MARKETPLACE_CONTRACT_ADDRESS") {
            self.contracts.marketplace.address = address;
        }
        if let Some(key) = lookup("ADMIN_PRIVATE_KEY") {
            self.admin.private_key = Some(key);
        }
        if let Some(address) = lookup("ADMIN_PUBLIC_KEY") {
            self.admin.public_address = Some(address);
        }
        if let Some(url) = lookup("SUPABASE_URL") {
            self.identity.url = url;
        }
        if let Some(key) = lookup("SUPABASE_KEY") {
            self.identity.api_key = key;
        }
        Ok(())
    }

    /// Resolve the admin signing key from the inline value or the key file.
    pub fn admin_key(&self) -> ServiceResult<LocalWallet> {
        let key = match (&self.admin.private_key, &self.admin.key_path) {
            (Some(secret), _) => signing_key_from_hex(secret)?,
            (None, Some(path)) => load_signing_key(path)?,
            (None, None) => {
                return Err(ServiceError::Config(
                    "admin signing key missing: set admin.private_key, admin.key_path, or ADMIN_PRIVATE_KEY"
                        .into(),
                ))
            }
        };
        if let Some(expected) = &self.admin.public_address {
            let expected = parse_address(expected)
                .map_err(|err| ServiceError::Config(format!("admin public address: {err}")))?;
            if expected != key.address() {
                return Err(ServiceError::Config(
                    "admin public address does not match the admin signing key".into(),
                ));
            }
        }
        Ok(key)
    }

    pub fn validate(&self) -> ServiceResult<()> {
        self.admin_key()?;
        parse_address(&self.contracts.ticket.address)
            .map_err(|err| ServiceError::Config(format!("ticket contract address: {err}")))?;
        parse_address(&self.contracts.marketplace.address)
            .map_err(|err| ServiceError::Config(format!("marketplace contract address: {err}")))?;
        if self.identity.url.trim().is_empty() {
            return Err(ServiceError::Config("identity.url must be set".into()));
        }
        Ok(())
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 3000)),
            allowed_origin: None,
            chain: ChainConfig {
                rpc_url: "http://127.0.0.1:8545".to_string(),
                chain_id: None,
                signing: SigningMode::Admin,
                listing_from_block: 0,
            },
            admin: AdminConfig {
                key_path: Some(PathBuf::from("./keys/admin.toml")),
                ..AdminConfig::default()
            },
            contracts: ContractsConfig {
                ticket: ContractEntry {
                    address: String::new(),
                    abi_path: PathBuf::from("./abi/TicketFactory.json"),
                },
                marketplace: ContractEntry {
                    address: String::new(),
                    abi_path: PathBuf::from("./abi/Marketplace.json"),
                },
            },
            identity: IdentityConfig {
                url: "http://127.0.0.1:54321".to_string(),
                api_key: String::new(),
            },
            wallets: WalletsConfig::default(),
        }
    }
}
