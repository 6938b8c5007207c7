use serde_json::{Value, json};
use std::rc::Rc;
use tracing::{debug, info};
use wp_api_types::{Account, NetworkId};

use crate::provider::{
    Eip1193Provider, Listener, ListenerGuard, ProviderError, UNAUTHORIZED, USER_REJECTED,
};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WalletError {
    #[error("no wallet provider is available")]
    NoProvider,
    #[error("request rejected by the user")]
    UserRejected,
    #[error("wallet has no authorised account")]
    NotAuthorized,
    #[error("wallet provider error {code}: {message}")]
    Provider { code: i64, message: String },
    #[error("malformed wallet response: {0}")]
    Malformed(String),
}

impl From<ProviderError> for WalletError {
    fn from(err: ProviderError) -> Self {
        match err.code {
            USER_REJECTED => Self::UserRejected,
            UNAUTHORIZED => Self::NotAuthorized,
            code => Self::Provider {
                code,
                message: err.message,
            },
        }
    }
}

/// Capability to authorise writes as one account.
#[derive(Clone)]
pub struct Signer {
    account: Account,
    provider: Rc<dyn Eip1193Provider>,
}

impl Signer {
    pub fn new(account: Account, provider: Rc<dyn Eip1193Provider>) -> Self {
        Self { account, provider }
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    /// Asks the wallet to sign and broadcast. Returns the raw transaction hash.
    pub async fn send_transaction(&self, tx: Value) -> Result<String, ProviderError> {
        let hash = self
            .provider
            .request("eth_sendTransaction", json!([tx]))
            .await?;
        hash.as_str()
            .map(ToOwned::to_owned)
            .ok_or_else(|| ProviderError::new(-32000, format!("unexpected tx hash: {hash}")))
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer").field("account", &self.account).finish()
    }
}

/// Wraps the wallet injected into the environment, if any.
#[derive(Clone, Default)]
pub struct WalletGateway {
    provider: Option<Rc<dyn Eip1193Provider>>,
}

impl WalletGateway {
    pub fn new(provider: Option<Rc<dyn Eip1193Provider>>) -> Self {
        Self { provider }
    }

    pub fn has_provider(&self) -> bool {
        self.provider.is_some()
    }

    pub fn provider(&self) -> Option<Rc<dyn Eip1193Provider>> {
        self.provider.clone()
    }

    fn require(&self) -> Result<&Rc<dyn Eip1193Provider>, WalletError> {
        self.provider.as_ref().ok_or(WalletError::NoProvider)
    }

    /// Accounts already authorised for this site. Never prompts.
    pub async fn current_accounts(&self) -> Result<Vec<Account>, WalletError> {
        let raw = self.require()?.request("eth_accounts", json!([])).await?;
        parse_accounts(&raw)
    }

    /// Prompts the user to authorise an account.
    pub async fn request_accounts(&self) -> Result<Vec<Account>, WalletError> {
        let raw = self
            .require()?
            .request("eth_requestAccounts", json!([]))
            .await?;
        let accounts = parse_accounts(&raw)?;
        info!(count = accounts.len(), "wallet granted accounts");
        Ok(accounts)
    }

    pub async fn current_network(&self) -> Result<NetworkId, WalletError> {
        let raw = self.require()?.request("eth_chainId", json!([])).await?;
        let text = raw
            .as_str()
            .ok_or_else(|| WalletError::Malformed(format!("eth_chainId returned {raw}")))?;
        NetworkId::parse(text).map_err(|err| WalletError::Malformed(err.to_string()))
    }

    /// `Ok(false)` means nothing happened: no wallet, or a switch prompt is
    /// already open. Callers may retry later.
    pub async fn switch_network(&self, target: NetworkId) -> Result<bool, WalletError> {
        let Some(provider) = &self.provider else {
            return Ok(false);
        };

        let params = json!([{ "chainId": target.to_hex() }]);
        match provider.request("wallet_switchEthereumChain", params).await {
            Ok(_) => {
                info!(network = %target, "wallet switched network");
                Ok(true)
            }
            Err(err) if err.is_request_pending() => {
                debug!(network = %target, "network switch already pending");
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Signer bound to the first authorised account.
    pub async fn signer(&self) -> Result<Signer, WalletError> {
        let provider = self.require()?.clone();
        let account = self
            .current_accounts()
            .await?
            .into_iter()
            .next()
            .ok_or(WalletError::NotAuthorized)?;
        Ok(Signer::new(account, provider))
    }

    pub fn add_listener(&self, listener: Listener) -> Result<ListenerGuard, WalletError> {
        let provider = self.require()?.clone();
        Ok(ListenerGuard::register(provider, listener))
    }
}

pub fn parse_accounts(raw: &Value) -> Result<Vec<Account>, WalletError> {
    let items = raw
        .as_array()
        .ok_or_else(|| WalletError::Malformed(format!("expected account list, got {raw}")))?;
    items
        .iter()
        .map(|item| {
            item.as_str()
                .ok_or_else(|| WalletError::Malformed(format!("account is not a string: {item}")))
                .and_then(|text| {
                    Account::parse(text).map_err(|err| WalletError::Malformed(err.to_string()))
                })
        })
        .collect()
}
