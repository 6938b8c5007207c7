use std::time::Duration;
use wp_api_types::{
    Account, DEFAULT_CONTRACT_ADDRESS, DEFAULT_GAS_LIMIT, DEFAULT_NETWORK, MessageBounds,
    NetworkId,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid value for {var}: {value}")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub required_network: NetworkId,
    /// Human name used in the wrong-network message.
    pub network_name: String,
    pub contract_address: Account,
    /// Read-only endpoint used when no wallet is injected.
    pub rpc_url: Option<String>,
    pub gas_limit: u64,
    pub message_bounds: MessageBounds,
    pub confirmation_poll_interval: Duration,
    /// Show a placeholder for a self-submitted wave until its event arrives.
    pub optimistic_placeholders: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            required_network: DEFAULT_NETWORK,
            network_name: "Rinkeby testnet".to_owned(),
            contract_address: Account::parse(DEFAULT_CONTRACT_ADDRESS)
                .unwrap_or_else(|_| unreachable!("default contract address is valid")),
            rpc_url: None,
            gas_limit: DEFAULT_GAS_LIMIT,
            message_bounds: MessageBounds::default(),
            confirmation_poll_interval: Duration::from_secs(2),
            optimistic_placeholders: false,
        }
    }
}

impl SessionConfig {
    /// Defaults overridden by `WAVEPORTAL_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(value) = lookup("WAVEPORTAL_NETWORK") {
            config.required_network = NetworkId::parse(&value).map_err(|_| ConfigError {
                var: "WAVEPORTAL_NETWORK",
                value: value.clone(),
            })?;
        }
        if let Some(value) = lookup("WAVEPORTAL_NETWORK_NAME") {
            config.network_name = value;
        }
        if let Some(value) = lookup("WAVEPORTAL_CONTRACT") {
            config.contract_address = Account::parse(&value).map_err(|_| ConfigError {
                var: "WAVEPORTAL_CONTRACT",
                value: value.clone(),
            })?;
        }
        config.rpc_url = lookup("WAVEPORTAL_RPC_URL").filter(|url| !url.trim().is_empty());
        if let Some(value) = lookup("WAVEPORTAL_GAS_LIMIT") {
            config.gas_limit = parse_number("WAVEPORTAL_GAS_LIMIT", &value)?;
        }
        if let Some(value) = lookup("WAVEPORTAL_POLL_MS") {
            let millis = parse_number("WAVEPORTAL_POLL_MS", &value)?;
            config.confirmation_poll_interval = Duration::from_millis(millis);
        }
        if let Some(value) = lookup("WAVEPORTAL_OPTIMISTIC") {
            config.optimistic_placeholders = matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }

        Ok(config)
    }
}

fn parse_number(var: &'static str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError {
        var,
        value: value.to_owned(),
    })
}
