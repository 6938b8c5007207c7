//! WavePortal contract bindings and their mapping onto [`WaveRecord`].

use alloy_primitives::{B256, U256, hex};
use alloy_sol_types::{SolCall, SolEvent, sol};
use wp_api_types::{Account, WaveRecord};

sol! {
    struct Wave {
        address waver;
        string message;
        uint256 timestamp;
    }

    event NewWave(address indexed from, uint256 timestamp, string message);

    function wave(string message) external;
    function getAllWaves() external view returns (Wave[] memory);
    function getTotalWaves() external view returns (uint256);
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AbiError {
    #[error("abi decoding failed: {0}")]
    Decode(String),
    #[error("invalid hex: {0}")]
    Hex(String),
    #[error("abi value does not fit: {0}")]
    Overflow(U256),
    #[error("log is not a NewWave event")]
    UnexpectedEvent,
}

impl From<alloy_sol_types::Error> for AbiError {
    fn from(err: alloy_sol_types::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

pub fn new_wave_topic() -> String {
    hex::encode_prefixed(NewWave::SIGNATURE_HASH)
}

pub fn to_hex_data(bytes: &[u8]) -> String {
    hex::encode_prefixed(bytes)
}

pub fn from_hex_data(data: &str) -> Result<Vec<u8>, AbiError> {
    hex::decode(data).map_err(|err| AbiError::Hex(err.to_string()))
}

pub fn encode_get_all_waves() -> Vec<u8> {
    getAllWavesCall {}.abi_encode()
}

pub fn encode_get_total_waves() -> Vec<u8> {
    getTotalWavesCall {}.abi_encode()
}

pub fn encode_wave(message: &str) -> Vec<u8> {
    waveCall {
        message: message.to_owned(),
    }
    .abi_encode()
}

pub fn decode_wave_list(data: &[u8]) -> Result<Vec<WaveRecord>, AbiError> {
    getAllWavesCall::abi_decode_returns(data)?
        .into_iter()
        .map(|wave| {
            Ok(WaveRecord::new(
                Account::from(wave.waver),
                wave.message,
                seconds(wave.timestamp)?,
            ))
        })
        .collect()
}

pub fn decode_wave_count(data: &[u8]) -> Result<u64, AbiError> {
    let total = getTotalWavesCall::abi_decode_returns(data)?;
    u64::try_from(total).map_err(|_| AbiError::Overflow(total))
}

pub fn decode_new_wave(topics: &[String], data: &[u8]) -> Result<WaveRecord, AbiError> {
    let topics = topics
        .iter()
        .map(|topic| topic.parse::<B256>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| AbiError::Hex(err.to_string()))?;
    if topics.first() != Some(&NewWave::SIGNATURE_HASH) {
        return Err(AbiError::UnexpectedEvent);
    }

    let event = NewWave::decode_raw_log(topics, data)?;
    Ok(WaveRecord::new(
        Account::from(event.from),
        event.message,
        seconds(event.timestamp)?,
    ))
}

fn seconds(timestamp: U256) -> Result<u64, AbiError> {
    u64::try_from(timestamp).map_err(|_| AbiError::Overflow(timestamp))
}
