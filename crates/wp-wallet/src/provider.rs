//! The injected wallet capability (EIP-1193 shape).
//!
//! Implemented by the browser bridge over `window.ethereum`, by the HTTP
//! JSON-RPC transport, and by `testing::ScriptedProvider`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::rc::Rc;

/// User declined the request in the wallet prompt.
pub const USER_REJECTED: i64 = 4001;
/// The wallet has not authorised the requested account or method.
pub const UNAUTHORIZED: i64 = 4100;
/// The target chain is not configured in the wallet.
pub const UNRECOGNIZED_CHAIN: i64 = 4902;
/// A request of the same kind is already waiting for the user.
pub const REQUEST_PENDING: i64 = -32002;
/// Generic JSON-RPC failure reported by the node (reverts land here).
pub const INTERNAL_ERROR: i64 = -32603;
pub const METHOD_NOT_FOUND: i64 = -32601;

#[derive(Debug, Clone, PartialEq, Deserialize, thiserror::Error)]
#[error("provider error {code}: {message}")]
pub struct ProviderError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

impl ProviderError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn is_user_rejection(&self) -> bool {
        self.code == USER_REJECTED
    }

    pub fn is_request_pending(&self) -> bool {
        self.code == REQUEST_PENDING
    }
}

/// Notifications pushed by the wallet.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    AccountsChanged(Vec<String>),
    ChainChanged(String),
    /// Payload of an `eth_subscribe` subscription.
    Message { subscription: String, result: Value },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

pub type Listener = Rc<dyn Fn(&ProviderEvent)>;

#[async_trait(?Send)]
pub trait Eip1193Provider {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderError>;
    fn add_listener(&self, listener: Listener) -> ListenerId;
    fn remove_listener(&self, id: ListenerId);

    /// False for transports that can never deliver `message` events, such as
    /// plain HTTP.
    fn has_push_channel(&self) -> bool {
        true
    }
}

/// Owns one listener registration; releases it on `close` or drop.
pub struct ListenerGuard {
    provider: Rc<dyn Eip1193Provider>,
    id: Option<ListenerId>,
}

impl ListenerGuard {
    pub fn register(provider: Rc<dyn Eip1193Provider>, listener: Listener) -> Self {
        let id = provider.add_listener(listener);
        Self {
            provider,
            id: Some(id),
        }
    }

    pub fn id(&self) -> Option<ListenerId> {
        self.id
    }

    pub fn close(&mut self) {
        if let Some(id) = self.id.take() {
            self.provider.remove_listener(id);
        }
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ListenerGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerGuard").field("id", &self.id).finish()
    }
}
