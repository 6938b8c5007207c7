use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cell::{Cell, RefCell};
use tracing::{debug, warn};
use wp_wallet::{Eip1193Provider, Listener, ListenerId, ProviderError};

/// Code used when the node could not be reached at all.
pub const TRANSPORT_ERROR: i64 = -32099;

/// Read-only JSON-RPC transport.
///
/// Reads `WAVEPORTAL_RPC_URL` from environment at construction time
/// (default: `http://localhost:8545`). Plain HTTP has no push channel, so
/// registered listeners are kept but never called.
pub struct HttpProvider {
    endpoint: String,
    http: reqwest::Client,
    next_id: Cell<u64>,
    next_listener: Cell<u64>,
    listeners: RefCell<Vec<ListenerId>>,
}

impl Default for HttpProvider {
    fn default() -> Self {
        Self::new(None)
    }
}

impl HttpProvider {
    pub fn new(endpoint: Option<String>) -> Self {
        let endpoint = endpoint
            .or_else(|| std::env::var("WAVEPORTAL_RPC_URL").ok())
            .unwrap_or_else(|| "http://localhost:8545".to_string());
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            next_id: Cell::new(1),
            next_listener: Cell::new(0),
            listeners: RefCell::new(Vec::new()),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

// ── JSON-RPC envelope ─────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ProviderError>,
}

fn into_result(response: RpcResponse) -> Result<Value, ProviderError> {
    match response {
        RpcResponse {
            error: Some(error), ..
        } => Err(error),
        RpcResponse { result, .. } => Ok(result.unwrap_or(Value::Null)),
    }
}

#[async_trait(?Send)]
impl Eip1193Provider for HttpProvider {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderError> {
        let id = self.next_id.get();
        self.next_id.set(id + 1);

        let body = RpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };
        debug!(method, id, endpoint = %self.endpoint, "json-rpc request");

        let response = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                warn!(method, "json-rpc transport failure: {err}");
                ProviderError::new(TRANSPORT_ERROR, format!("{method} transport: {err}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::new(
                TRANSPORT_ERROR,
                format!("{method} HTTP {status}: {text}"),
            ));
        }

        let envelope: RpcResponse = response.json().await.map_err(|err| {
            ProviderError::new(TRANSPORT_ERROR, format!("{method} parse: {err}"))
        })?;
        into_result(envelope)
    }

    fn add_listener(&self, _listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_listener.get());
        self.next_listener.set(id.0 + 1);
        self.listeners.borrow_mut().push(id);
        id
    }

    fn remove_listener(&self, id: ListenerId) {
        self.listeners.borrow_mut().retain(|existing| *existing != id);
    }

    fn has_push_channel(&self) -> bool {
        false
    }
}
