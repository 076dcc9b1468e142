//! Maps free-text provider and node errors onto a small, stable taxonomy.
//!
//! Classification is a substring heuristic over third-party messages. New
//! provider formats that carry none of the markers fall through to
//! [`ErrorCategory::Unknown`] with the message passed through unchanged.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

const INSUFFICIENT_FUNDS_MARKER: &str = "insufficient funds";
const REVERT_MARKER: &str = "execution reverted";
const NONCE_MARKER: &str = "nonce";

const INSUFFICIENT_FUNDS_MESSAGE: &str = "Insufficient funds for transaction";
const GENERIC_REVERT_MESSAGE: &str = "Transaction would fail";
const NONCE_MESSAGE: &str = "Transaction nonce error. Please try again";

static REASON_STRING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"reason string ["'](.+?)["']"#).expect("valid reason regex"));
static INLINE_REASON: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"execution reverted: ([^,"\)\n]+)"#).expect("valid inline reason regex")
});

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    InsufficientFunds,
    ContractRejected,
    NonceConflict,
    Unknown,
}

impl ErrorCategory {
    /// Stable label for the category. Each label re-normalizes to itself.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InsufficientFunds => "insufficient funds",
            Self::ContractRejected => "execution reverted",
            Self::NonceConflict => "nonce conflict",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NormalizedError {
    pub category: ErrorCategory,
    pub message: String,
}

impl fmt::Display for NormalizedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Classify `raw` by marker, in priority order: insufficient funds, revert, nonce.
///
/// Markers are matched case-insensitively so the user-facing messages this
/// function produces classify back into the same category.
pub fn normalize(raw: &str) -> NormalizedError {
    let lowered = raw.to_ascii_lowercase();

    if lowered.contains(INSUFFICIENT_FUNDS_MARKER) {
        return NormalizedError {
            category: ErrorCategory::InsufficientFunds,
            message: INSUFFICIENT_FUNDS_MESSAGE.to_string(),
        };
    }
    if lowered.contains(REVERT_MARKER) {
        return NormalizedError {
            category: ErrorCategory::ContractRejected,
            message: revert_reason(raw).unwrap_or_else(|| GENERIC_REVERT_MESSAGE.to_string()),
        };
    }
    if lowered.contains(NONCE_MARKER) {
        return NormalizedError {
            category: ErrorCategory::NonceConflict,
            message: NONCE_MESSAGE.to_string(),
        };
    }
    NormalizedError {
        category: ErrorCategory::Unknown,
        message: raw.to_string(),
    }
}

/// Extract the contract-supplied revert reason, if the message embeds one.
pub fn revert_reason(raw: &str) -> Option<String> {
    let captures = REASON_STRING
        .captures(raw)
        .or_else(|| INLINE_REASON.captures(raw))?;
    let reason = captures.get(1)?.as_str().trim();
    (!reason.is_empty()).then(|| reason.to_string())
}
