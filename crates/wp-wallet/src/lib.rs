pub mod gateway;
pub mod provider;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use gateway::{Signer, WalletError, WalletGateway, parse_accounts};
pub use provider::{
    Eip1193Provider, Listener, ListenerGuard, ListenerId, ProviderError, ProviderEvent,
};
