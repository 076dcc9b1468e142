use std::fmt;

use ethers::types::U256;
use serde::{Deserialize, Serialize};
use serde_json::Number;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::crypto::ether_to_wei;
use crate::errors::{ServiceError, ServiceResult};

/// A numeric request field that clients send either as a JSON number or a string.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Quantity {
    Number(Number),
    Text(String),
}

impl Quantity {
    /// The numeric zero and empty text count as absent. The text `"0"` does not.
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Number(number) => number.as_f64() == Some(0.0),
            Self::Text(text) => text.trim().is_empty(),
        }
    }

    pub fn to_u256(&self) -> ServiceResult<U256> {
        let parsed = match self {
            Self::Number(number) => number.as_u64().map(U256::from),
            Self::Text(text) => {
                let trimmed = text.trim();
                match trimmed.strip_prefix("0x") {
                    Some(digits) => U256::from_str_radix(digits, 16).ok(),
                    None if !trimmed.is_empty() => U256::from_dec_str(trimmed).ok(),
                    None => None,
                }
            }
        };
        parsed.ok_or_else(|| ServiceError::InvalidArgument(format!("{self} is not an integer")))
    }

    /// Interpret the value as an ether amount and convert it to wei.
    pub fn to_wei(&self) -> ServiceResult<U256> {
        ether_to_wei(&self.to_string())
    }

    /// Unix seconds, accepting either an integer or an RFC 3339 timestamp.
    pub fn to_unix_seconds(&self) -> ServiceResult<U256> {
        if let Ok(seconds) = self.to_u256() {
            return Ok(seconds);
        }
        let Self::Text(text) = self else {
            return Err(ServiceError::InvalidArgument(format!(
                "{self} is not a timestamp"
            )));
        };
        let parsed = OffsetDateTime::parse(text.trim(), &Rfc3339)
            .map_err(|err| ServiceError::InvalidArgument(format!("{text:?} is not a timestamp: {err}")))?;
        u64::try_from(parsed.unix_timestamp())
            .map(U256::from)
            .map_err(|_| ServiceError::InvalidArgument(format!("{text:?} predates the unix epoch")))
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(number) => write!(f, "{number}"),
            Self::Text(text) => f.write_str(text),
        }
    }
}

impl From<u64> for Quantity {
    fn from(value: u64) -> Self {
        Self::Number(Number::from(value))
    }
}

impl From<&str> for Quantity {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}
