//! Overload selection for loosely-typed contract calls.
//!
//! Callers hand over positional [`CallArg`] values without knowing which of a
//! function's overloads they are aiming at. The resolver keeps the overloads
//! whose arity matches, tries to tokenize and encode the arguments against
//! each one in declaration order, and picks the first that encodes.

use std::fmt;

use ethers::abi::{Abi, Function, ParamType, Token};
use ethers::types::{Address, Bytes, H256, U256};
use serde::{Deserialize, Deserializer};

use crate::errors::{ServiceError, ServiceResult};

/// A positional argument whose ABI type is decided by the selected overload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CallArg {
    Uint(U256),
    Address(Address),
    Word(H256),
    Bytes(Vec<u8>),
    Text(String),
    Bool(bool),
}

impl CallArg {
    /// Convert into a token of `kind`, or explain why the value cannot take that type.
    pub fn tokenize(&self, kind: &ParamType) -> Result<Token, String> {
        match (self, kind) {
            (Self::Uint(value), ParamType::Uint(bits)) => fit_uint(*value, *bits),
            (Self::Uint(value), ParamType::Int(bits)) => fit_int(*value, *bits),
            (Self::Address(address), ParamType::Address) => Ok(Token::Address(*address)),
            (Self::Word(word), ParamType::FixedBytes(32)) => {
                Ok(Token::FixedBytes(word.as_bytes().to_vec()))
            }
            (Self::Word(word), ParamType::Bytes) => Ok(Token::Bytes(word.as_bytes().to_vec())),
            (Self::Bytes(bytes), ParamType::Bytes) => Ok(Token::Bytes(bytes.clone())),
            (Self::Bytes(bytes), ParamType::FixedBytes(len)) if bytes.len() == *len => {
                Ok(Token::FixedBytes(bytes.clone()))
            }
            (Self::Bool(flag), ParamType::Bool) => Ok(Token::Bool(*flag)),
            (Self::Text(text), kind) => tokenize_text(text, kind),
            (arg, kind) => Err(format!("{arg} cannot be encoded as {kind}")),
        }
    }
}

impl fmt::Display for CallArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uint(value) => write!(f, "uint {value}"),
            Self::Address(address) => write!(f, "address {address:?}"),
            Self::Word(word) => write!(f, "word {word:?}"),
            Self::Bytes(bytes) => write!(f, "bytes 0x{}", hex::encode(bytes)),
            Self::Text(text) => write!(f, "text {text:?}"),
            Self::Bool(flag) => write!(f, "bool {flag}"),
        }
    }
}

impl From<U256> for CallArg {
    fn from(value: U256) -> Self {
        Self::Uint(value)
    }
}

impl From<u64> for CallArg {
    fn from(value: u64) -> Self {
        Self::Uint(U256::from(value))
    }
}

impl From<Address> for CallArg {
    fn from(value: Address) -> Self {
        Self::Address(value)
    }
}

impl From<H256> for CallArg {
    fn from(value: H256) -> Self {
        Self::Word(value)
    }
}

impl From<&str> for CallArg {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for CallArg {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<bool> for CallArg {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl<'de> Deserialize<'de> for CallArg {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Bool(bool),
            Number(u64),
            Text(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Bool(flag) => Self::Bool(flag),
            Raw::Number(value) => Self::from(value),
            Raw::Text(text) => Self::Text(text),
        })
    }
}

fn fit_uint(value: U256, bits: usize) -> Result<Token, String> {
    if value.bits() <= bits {
        Ok(Token::Uint(value))
    } else {
        Err(format!("{value} overflows uint{bits}"))
    }
}

fn fit_int(value: U256, bits: usize) -> Result<Token, String> {
    if value.bits() < bits {
        Ok(Token::Int(value))
    } else {
        Err(format!("{value} overflows int{bits}"))
    }
}

fn parse_quantity(text: &str) -> Result<U256, String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err("empty string is not an integer".to_string());
    }
    let parsed = match trimmed.strip_prefix("0x") {
        Some(hex_digits) => U256::from_str_radix(hex_digits, 16).ok(),
        None => U256::from_dec_str(trimmed).ok(),
    };
    parsed.ok_or_else(|| format!("{text:?} is not an integer"))
}

fn decode_hex(text: &str) -> Result<Vec<u8>, String> {
    let digits = text
        .strip_prefix("0x")
        .ok_or_else(|| format!("{text:?} is not 0x-prefixed hex"))?;
    hex::decode(digits).map_err(|err| format!("{text:?} is not valid hex: {err}"))
}

fn tokenize_text(text: &str, kind: &ParamType) -> Result<Token, String> {
    match kind {
        ParamType::String => Ok(Token::String(text.to_string())),
        ParamType::Uint(bits) => fit_uint(parse_quantity(text)?, *bits),
        ParamType::Int(bits) => fit_int(parse_quantity(text)?, *bits),
        ParamType::Address => {
            let bytes = decode_hex(text)?;
            if bytes.len() != Address::len_bytes() {
                return Err(format!("{text:?} is not a 20-byte address"));
            }
            Ok(Token::Address(Address::from_slice(&bytes)))
        }
        ParamType::FixedBytes(len) => {
            let bytes = decode_hex(text)?;
            if bytes.len() != *len {
                return Err(format!("{text:?} is not {len} bytes long"));
            }
            Ok(Token::FixedBytes(bytes))
        }
        ParamType::Bytes => decode_hex(text).map(Token::Bytes),
        ParamType::Bool => match text {
            "true" => Ok(Token::Bool(true)),
            "false" => Ok(Token::Bool(false)),
            _ => Err(format!("{text:?} is not a boolean")),
        },
        other => Err(format!("text cannot be encoded as {other}")),
    }
}

/// Canonical `name(type,...)` signature used to address one overload.
pub fn function_signature(function: &Function) -> String {
    let params: Vec<String> = function
        .inputs
        .iter()
        .map(|param| param.kind.to_string())
        .collect();
    format!("{}({})", function.name, params.join(","))
}

/// The overload chosen for a call together with its encoded calldata.
#[derive(Clone, Debug)]
pub struct ResolvedCall<'a> {
    pub function: &'a Function,
    pub tokens: Vec<Token>,
    pub calldata: Bytes,
}

impl ResolvedCall<'_> {
    pub fn signature(&self) -> String {
        function_signature(self.function)
    }
}

/// Pick the first overload in `candidates` that accepts `args`.
///
/// `candidates` must be every overload sharing `name`, in ABI declaration
/// order. Encoding is only used as a validation step.
pub fn select_overload<'a>(
    name: &str,
    args: &[CallArg],
    candidates: &'a [Function],
) -> ServiceResult<ResolvedCall<'a>> {
    if candidates.is_empty() {
        return Err(ServiceError::NoMatchingFunction(name.to_string()));
    }

    for function in candidates
        .iter()
        .filter(|function| function.inputs.len() == args.len())
    {
        let tokens = match args
            .iter()
            .zip(&function.inputs)
            .map(|(arg, param)| arg.tokenize(&param.kind))
            .collect::<Result<Vec<_>, _>>()
        {
            Ok(tokens) => tokens,
            Err(_) => continue,
        };
        if let Ok(calldata) = function.encode_input(&tokens) {
            return Ok(ResolvedCall {
                function,
                tokens,
                calldata: calldata.into(),
            });
        }
    }

    Err(ServiceError::NoOverloadMatchesArguments {
        function: name.to_string(),
        arity: args.len(),
    })
}

/// Resolve `name` against every overload the ABI declares for it.
pub fn resolve_call<'a>(
    abi: &'a Abi,
    name: &str,
    args: &[CallArg],
) -> ServiceResult<ResolvedCall<'a>> {
    let candidates = abi
        .functions_by_name(name)
        .map(Vec::as_slice)
        .unwrap_or_default();
    select_overload(name, args, candidates)
}
