use tracing::debug;
use wp_ledger::LedgerError;
use wp_wallet::WalletError;

/// Shown for any submission that failed after the wallet signed.
pub const TRANSACTION_FAILED: &str = "Transaction error, failed to wave 😢";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("no wallet provider is available")]
    NoProvider,
    #[error("request rejected by the user")]
    UserRejected,
    #[error("transaction rejected by the user")]
    SubmissionRejected,
    #[error("wallet is not on the required network")]
    WrongNetwork,
    #[error("a network switch is already pending in the wallet")]
    NetworkSwitchPending,
    #[error("transaction reverted")]
    TransactionReverted,
    #[error("network error")]
    NetworkError,
    #[error("message must be between {min} and {max} characters")]
    InvalidMessage { min: usize, max: usize },
    #[error("a wave is already being submitted")]
    SubmissionInProgress,
    #[error("wallet is not connected")]
    NotConnected,
}

impl SessionError {
    /// Text for the error surface. `None` for outcomes the user chose.
    pub fn user_message(&self, network_name: &str) -> Option<String> {
        match self {
            Self::UserRejected | Self::SubmissionRejected | Self::NetworkSwitchPending => None,
            Self::NoProvider => Some(
                "You need a wallet extension such as MetaMask to interact with this app".into(),
            ),
            Self::WrongNetwork => Some(format!(
                "You must use the {network_name} to interact with this app"
            )),
            Self::TransactionReverted => Some(TRANSACTION_FAILED.into()),
            Self::NetworkError => Some("Network error, could not reach the ledger".into()),
            Self::InvalidMessage { min, max } => Some(if min == max {
                format!("You must type exactly {min} characters")
            } else {
                format!("You must type between {min} and {max} characters")
            }),
            Self::SubmissionInProgress => Some("Your previous wave is still on its way".into()),
            Self::NotConnected => Some("Connect your wallet to send a wave".into()),
        }
    }
}

impl From<WalletError> for SessionError {
    fn from(err: WalletError) -> Self {
        match err {
            WalletError::NoProvider => Self::NoProvider,
            WalletError::UserRejected => Self::UserRejected,
            WalletError::NotAuthorized => Self::NotConnected,
            other => {
                debug!("wallet failure: {other}");
                Self::NetworkError
            }
        }
    }
}

impl From<LedgerError> for SessionError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::NoProvider => Self::NoProvider,
            LedgerError::SubmissionRejected => Self::SubmissionRejected,
            LedgerError::TransactionReverted(reason) => {
                debug!("transaction reverted: {reason}");
                Self::TransactionReverted
            }
            other => {
                debug!("ledger failure: {other}");
                Self::NetworkError
            }
        }
    }
}
