use alloy_primitives::{Address, B256, hex};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Longest message the contract form accepts, in characters.
pub const MAX_MESSAGE_LENGTH: usize = 280;
pub const MIN_MESSAGE_LENGTH: usize = 1;
pub const DEFAULT_GAS_LIMIT: u64 = 300_000;

/// Rinkeby, the network the WavePortal contract was deployed to.
pub const DEFAULT_NETWORK: NetworkId = NetworkId(4);
pub const DEFAULT_CONTRACT_ADDRESS: &str = "0x1c791764035d16339617810ac5bda9a35b234727";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid address: {0}")]
    Address(String),
    #[error("invalid network id: {0}")]
    Network(String),
    #[error("invalid transaction hash: {0}")]
    TxHash(String),
}

fn strip_hex_prefix(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
}

/// 20-byte address, rendered lowercase with a `0x` prefix. Checksums are
/// accepted but not required.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Account {
    address: Address,
    text: String,
}

impl Account {
    pub fn parse(raw: &str) -> Result<Self, ParseError> {
        let body = strip_hex_prefix(raw).ok_or_else(|| ParseError::Address(raw.to_owned()))?;
        let address = body
            .parse::<Address>()
            .map_err(|_| ParseError::Address(raw.to_owned()))?;
        Ok(Self::from(address))
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Display form used by the wave list: `0x1c7...4727`.
    pub fn short(&self) -> String {
        let head = &self.text[..5];
        let tail = &self.text[self.text.len() - 4..];
        format!("{head}...{tail}")
    }
}

impl From<Address> for Account {
    fn from(address: Address) -> Self {
        Self {
            address,
            text: hex::encode_prefixed(address),
        }
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl FromStr for Account {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Account {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Account> for String {
    fn from(value: Account) -> Self {
        value.text
    }
}

/// Numeric chain id. Wallets exchange it as a hex quantity (`0x4`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NetworkId(pub u64);

impl NetworkId {
    pub fn parse(raw: &str) -> Result<Self, ParseError> {
        let trimmed = raw.trim();
        let parsed = match trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
        {
            Some(hex) => u64::from_str_radix(hex, 16),
            None => trimmed.parse::<u64>(),
        };
        parsed
            .map(Self)
            .map_err(|_| ParseError::Network(raw.to_owned()))
    }

    pub fn to_hex(self) -> String {
        format!("{:#x}", self.0)
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl FromStr for NetworkId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for NetworkId {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<NetworkId> for String {
    fn from(value: NetworkId) -> Self {
        value.to_hex()
    }
}

/// Hash of a broadcast transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TransactionHandle(String);

impl TransactionHandle {
    pub fn parse(raw: &str) -> Result<Self, ParseError> {
        strip_hex_prefix(raw)
            .and_then(|body| body.parse::<B256>().ok())
            .map(|hash| Self(hex::encode_prefixed(hash)))
            .ok_or_else(|| ParseError::TxHash(raw.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TransactionHandle {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TransactionHandle> for String {
    fn from(value: TransactionHandle) -> Self {
        value.0
    }
}

/// One wave as recorded by the contract. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WaveRecord {
    pub sender: Account,
    pub message: String,
    /// Seconds since the epoch, from the block that included the wave.
    pub timestamp: u64,
}

/// What makes two observed waves the same ledger event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WaveIdentity {
    pub sender: Account,
    pub timestamp: u64,
    pub message: String,
}

impl WaveRecord {
    pub fn new(sender: Account, message: impl Into<String>, timestamp: u64) -> Self {
        Self {
            sender,
            message: message.into(),
            timestamp,
        }
    }

    pub fn identity(&self) -> WaveIdentity {
        WaveIdentity {
            sender: self.sender.clone(),
            timestamp: self.timestamp,
            message: self.message.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageBounds {
    pub min: usize,
    pub max: usize,
}

impl Default for MessageBounds {
    fn default() -> Self {
        Self {
            min: MIN_MESSAGE_LENGTH,
            max: MAX_MESSAGE_LENGTH,
        }
    }
}

impl MessageBounds {
    /// Length is counted in characters, not bytes.
    pub fn accepts(&self, message: &str) -> bool {
        let len = message.chars().count();
        len >= self.min.max(1) && len <= self.max
    }
}
