pub mod abi;
pub mod rpc;
mod runtime;

use async_trait::async_trait;
use std::rc::Rc;
use wp_api_types::{TransactionHandle, WaveRecord};
use wp_wallet::{ProviderError, Signer, WalletError, provider};

pub use abi::AbiError;
pub use rpc::RpcLedgerClient;
pub use runtime::sleep;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LedgerError {
    #[error("no provider available for ledger access")]
    NoProvider,
    #[error("user rejected the transaction")]
    SubmissionRejected,
    #[error("transaction reverted: {0}")]
    TransactionReverted(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("provider does not support live subscriptions")]
    SubscriptionUnsupported,
    #[error("malformed ledger response: {0}")]
    Malformed(String),
    #[error(transparent)]
    Abi(#[from] AbiError),
}

impl LedgerError {
    /// Classifies a failed write. Node-side execution failures show up as
    /// code 3 or as an internal error mentioning the revert.
    pub fn from_submission(err: ProviderError) -> Self {
        if err.is_user_rejection() {
            return Self::SubmissionRejected;
        }
        let reverted = err.code == 3
            || (err.code == provider::INTERNAL_ERROR
                && err.message.to_ascii_lowercase().contains("revert"));
        if reverted {
            Self::TransactionReverted(err.message)
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<ProviderError> for LedgerError {
    fn from(err: ProviderError) -> Self {
        if err.code == provider::METHOD_NOT_FOUND {
            return Self::Network(format!("unsupported method: {}", err.message));
        }
        Self::Network(err.to_string())
    }
}

impl From<WalletError> for LedgerError {
    fn from(err: WalletError) -> Self {
        match err {
            WalletError::NoProvider => Self::NoProvider,
            WalletError::UserRejected => Self::SubmissionRejected,
            other => Self::Network(other.to_string()),
        }
    }
}

pub type WaveCallback = Rc<dyn Fn(WaveRecord)>;

/// A live event registration. Released exactly once, on `close` or drop.
pub struct Subscription {
    release: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    pub fn new(release: impl FnOnce() + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    pub fn is_active(&self) -> bool {
        self.release.is_some()
    }

    pub fn close(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

/// The WavePortal contract as seen by the client.
#[async_trait(?Send)]
pub trait LedgerContract {
    /// Every wave ever recorded, in ledger order. Unpaginated.
    async fn read_all(&self) -> Result<Vec<WaveRecord>, LedgerError>;

    /// Number of waves the contract has recorded.
    async fn read_count(&self) -> Result<u64, LedgerError>;

    /// Returns once the wallet has signed and broadcast.
    async fn submit(
        &self,
        signer: &Signer,
        message: &str,
        gas_limit: u64,
    ) -> Result<TransactionHandle, LedgerError>;

    /// Resolves when the transaction is included. No timeout.
    async fn await_confirmation(&self, handle: &TransactionHandle) -> Result<(), LedgerError>;

    /// Push delivery of new waves in network order.
    async fn subscribe(&self, on_event: WaveCallback) -> Result<Subscription, LedgerError>;
}
