use std::fs;
use std::path::Path;

use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, H256, U256};
use ethers::utils::{format_ether, keccak256, parse_ether};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::errors::{ServiceError, ServiceResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredKey {
    pub address: String,
    pub private_key: String,
}

pub fn generate_signing_key() -> LocalWallet {
    LocalWallet::new(&mut OsRng)
}

/// Hex-encoded (0x-prefixed) secret scalar of `wallet`.
pub fn private_key_hex(wallet: &LocalWallet) -> Zeroizing<String> {
    let bytes = Zeroizing::new(wallet.signer().to_bytes().to_vec());
    Zeroizing::new(format!("0x{}", hex::encode(bytes.as_slice())))
}

pub fn signing_key_from_hex(data: &str) -> ServiceResult<LocalWallet> {
    let trimmed = data.trim();
    let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    digits
        .parse::<LocalWallet>()
        .map_err(|err| ServiceError::Config(format!("invalid private key: {err}")))
}

pub fn save_signing_key(path: &Path, wallet: &LocalWallet) -> ServiceResult<()> {
    let secret = private_key_hex(wallet);
    let stored = StoredKey {
        address: format!("{:?}", wallet.address()),
        private_key: secret.to_string(),
    };
    let encoded = Zeroizing::new(
        toml::to_string_pretty(&stored)
            .map_err(|err| ServiceError::Config(format!("failed to encode key: {err}")))?,
    );
    fs::create_dir_all(path.parent().unwrap_or_else(|| Path::new(".")))?;
    fs::write(path, encoded.as_bytes())?;
    Ok(())
}

pub fn load_signing_key(path: &Path) -> ServiceResult<LocalWallet> {
    let raw = Zeroizing::new(fs::read_to_string(path)?);
    let stored: StoredKey = toml::from_str(&raw)
        .map_err(|err| ServiceError::Config(format!("failed to decode key: {err}")))?;
    let wallet = signing_key_from_hex(&stored.private_key)?;
    let expected = stored
        .address
        .parse::<Address>()
        .map_err(|err| ServiceError::Config(format!("invalid stored address: {err}")))?;
    if wallet.address() != expected {
        return Err(ServiceError::Config(format!(
            "key file {} does not match its recorded address",
            path.display()
        )));
    }
    Ok(wallet)
}

/// Content hash submitted on-chain instead of free-text user information.
pub fn hash_user_info(info: &str) -> H256 {
    H256::from(keccak256(info.as_bytes()))
}

/// Render a wei amount as a decimal ether string without trailing zeros.
pub fn wei_to_ether_string(amount: U256) -> String {
    let formatted = format_ether(amount);
    match formatted.split_once('.') {
        Some((whole, fraction)) => {
            let fraction = fraction.trim_end_matches('0');
            if fraction.is_empty() {
                format!("{whole}.0")
            } else {
                format!("{whole}.{fraction}")
            }
        }
        None => formatted,
    }
}

pub fn ether_to_wei(amount: &str) -> ServiceResult<U256> {
    let trimmed = amount.trim();
    if trimmed.is_empty() || trimmed.starts_with('-') {
        return Err(ServiceError::InvalidArgument(format!(
            "{amount:?} is not a valid ether amount"
        )));
    }
    parse_ether(trimmed).map_err(|err| {
        ServiceError::InvalidArgument(format!("{amount:?} is not a valid ether amount: {err}"))
    })
}
