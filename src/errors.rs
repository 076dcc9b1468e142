use std::io;

use thiserror::Error;

use crate::contracts::normalizer::{ErrorCategory, NormalizedError};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Missing required parameters: {0}")]
    MissingParameters(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Access token required")]
    Unauthenticated,
    #[error("Invalid token")]
    InvalidToken,
    #[error("Function {0} not found")]
    NoMatchingFunction(String),
    #[error("No {function} overload matches provided arguments ({arity} given)")]
    NoOverloadMatchesArguments { function: String, arity: usize },
    #[error("{0} cannot credit the caller's wallet while the admin key signs")]
    BeneficiaryUnsupported(String),
    #[error("no wallet registered for user {0}")]
    WalletNotFound(String),
    #[error("{0}")]
    Chain(NormalizedError),
    #[error("ticket {0} is not listed for sale")]
    NotListed(String),
    #[error("identity provider error: {0}")]
    Identity(String),
    #[error("wallet directory error: {0}")]
    Directory(String),
    #[error("unable to decode contract response: {0}")]
    Decode(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl ServiceError {
    /// Normalized chain category, when the failure came from the dispatch boundary.
    pub fn category(&self) -> Option<ErrorCategory> {
        match self {
            Self::Chain(normalized) => Some(normalized.category),
            _ => None,
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
