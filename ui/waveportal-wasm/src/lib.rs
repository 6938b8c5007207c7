//! WavePortal browser bridge.
//!
//! Wires the injected wallet into the session engine and exposes a small
//! promise-based handle to the JavaScript view. Rendering stays in JS; it
//! re-reads `snapshot()` / `error()` / state whenever `onChange` fires.

pub mod provider;

use js_sys::{Function, Promise};
use serde::{Deserialize, Serialize};
use std::rc::{Rc, Weak};
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::{future_to_promise, spawn_local};
use wp_api_types::WaveRecord;
use wp_rpc_http::HttpProvider;
use wp_session::{SessionConfig, SessionError, SessionState, TransactionState, WavePortalApp};
use wp_wallet::{Eip1193Provider, ListenerGuard, ProviderEvent, WalletGateway};

pub use provider::BrowserProvider;

#[wasm_bindgen(start)]
pub fn start() {
    console_error_panic_hook::set_once();
}

/// Options accepted by the `WavePortal` constructor. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Options {
    contract: Option<String>,
    network: Option<String>,
    network_name: Option<String>,
    rpc_url: Option<String>,
    optimistic: Option<bool>,
}

impl Options {
    fn into_config(self) -> Result<SessionConfig, JsValue> {
        let Options {
            contract,
            network,
            network_name,
            rpc_url,
            optimistic,
        } = self;
        let optimistic = optimistic.map(|on| on.to_string());
        SessionConfig::from_lookup(|name| match name {
            "WAVEPORTAL_CONTRACT" => contract.clone(),
            "WAVEPORTAL_NETWORK" => network.clone(),
            "WAVEPORTAL_NETWORK_NAME" => network_name.clone(),
            "WAVEPORTAL_RPC_URL" => rpc_url.clone(),
            "WAVEPORTAL_OPTIMISTIC" => optimistic.clone(),
            _ => None,
        })
        .map_err(|err| JsValue::from_str(&err.to_string()))
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WaveView<'a> {
    sender: &'a str,
    short_sender: String,
    message: &'a str,
    timestamp: u64,
}

impl<'a> From<&'a WaveRecord> for WaveView<'a> {
    fn from(wave: &'a WaveRecord) -> Self {
        Self {
            sender: wave.sender.as_str(),
            short_sender: wave.sender.short(),
            message: &wave.message,
            timestamp: wave.timestamp,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PendingView {
    sender: String,
    message: String,
    transaction: String,
}

fn to_js<T: Serialize + ?Sized>(value: &T) -> Result<JsValue, JsValue> {
    value
        .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
        .map_err(JsValue::from)
}

fn session_error(err: SessionError) -> JsValue {
    JsValue::from_str(&err.to_string())
}

/// Handle held by the page for its whole lifetime.
#[wasm_bindgen]
pub struct WavePortal {
    app: Rc<WavePortalApp>,
    events: Option<ListenerGuard>,
}

#[wasm_bindgen]
impl WavePortal {
    #[wasm_bindgen(constructor)]
    pub fn new(options: JsValue) -> Result<WavePortal, JsValue> {
        let options: Options = if options.is_undefined() || options.is_null() {
            Options::default()
        } else {
            serde_wasm_bindgen::from_value(options)?
        };
        let config = options.into_config()?;

        let wallet = BrowserProvider::detect()
            .map(|provider| Rc::new(provider) as Rc<dyn Eip1193Provider>);
        if wallet.is_none() {
            gloo_console::warn!("no injected wallet; waves are read-only");
        }
        let wallet = WalletGateway::new(wallet);
        let fallback = config
            .rpc_url
            .clone()
            .map(|url| Rc::new(HttpProvider::new(Some(url))) as Rc<dyn Eip1193Provider>);

        let app = WavePortalApp::over_rpc(config, wallet.clone(), fallback).map_err(session_error)?;
        let app = Rc::new(app);
        let events = wallet
            .add_listener(wallet_listener(Rc::downgrade(&app)))
            .ok();

        Ok(WavePortal { app, events })
    }

    /// Silent connect and first history read. Resolves to the session state.
    pub fn start(&self) -> Promise {
        let app = self.app.clone();
        future_to_promise(async move {
            let state = app.start().await.map_err(session_error)?;
            Ok(JsValue::from_str(&state.to_string()))
        })
    }

    /// Resolves to the connected account address.
    pub fn connect(&self) -> Promise {
        let app = self.app.clone();
        future_to_promise(async move {
            let account = app.connect().await.map_err(session_error)?;
            Ok(JsValue::from_str(account.as_str()))
        })
    }

    pub fn disconnect(&self) {
        self.app.disconnect();
    }

    /// Resolves to the transaction hash once mined.
    pub fn wave(&self, message: String) -> Promise {
        let app = self.app.clone();
        future_to_promise(async move {
            let handle = app.wave(&message).await.map_err(session_error)?;
            Ok(JsValue::from_str(handle.as_str()))
        })
    }

    pub fn refresh(&self) -> Promise {
        let app = self.app.clone();
        future_to_promise(async move {
            let added = app.refresh().await.map_err(session_error)?;
            Ok(JsValue::from_f64(added as f64))
        })
    }

    /// Resolves to the contract's own wave count.
    #[wasm_bindgen(js_name = totalWaves)]
    pub fn total_waves(&self) -> Promise {
        let app = self.app.clone();
        future_to_promise(async move {
            let total = app.total_waves().await.map_err(session_error)?;
            Ok(JsValue::from_f64(total as f64))
        })
    }

    /// All waves in ledger order, as `{ sender, shortSender, message, timestamp }`.
    pub fn snapshot(&self) -> Result<JsValue, JsValue> {
        let snapshot = self.app.snapshot();
        let views: Vec<WaveView<'_>> = snapshot.iter().map(WaveView::from).collect();
        to_js(&views)
    }

    pub fn pending(&self) -> Result<JsValue, JsValue> {
        let views: Vec<PendingView> = self
            .app
            .pending()
            .into_iter()
            .map(|wave| PendingView {
                sender: wave.sender.to_string(),
                message: wave.message,
                transaction: wave.handle.to_string(),
            })
            .collect();
        to_js(&views)
    }

    pub fn error(&self) -> Option<String> {
        self.app.error()
    }

    #[wasm_bindgen(js_name = sessionState)]
    pub fn session_state(&self) -> String {
        self.app.session_state().to_string()
    }

    #[wasm_bindgen(js_name = transactionState)]
    pub fn transaction_state(&self) -> String {
        self.app.transaction_state().to_string()
    }

    #[wasm_bindgen(js_name = isMining)]
    pub fn is_mining(&self) -> bool {
        self.app.coordinator().is_busy()
    }

    /// `callback` runs after any session, transaction or history change.
    #[wasm_bindgen(js_name = onChange)]
    pub fn on_change(&self, callback: Function) {
        let render = Rc::new(move || {
            if let Err(err) = callback.call0(&JsValue::NULL) {
                gloo_console::error!("onChange callback threw", err);
            }
        });

        let hook = render.clone();
        self.app.session().on_change(Rc::new(move |_: &SessionState| hook()));
        let hook = render.clone();
        self.app.coordinator().on_change(Rc::new(move |_: &TransactionState| hook()));
        self.app.synchronizer().on_change(render);
    }

    /// Stops wallet events and the live subscription.
    pub fn shutdown(&mut self) {
        if let Some(mut events) = self.events.take() {
            events.close();
        }
        self.app.shutdown();
    }
}

fn wallet_listener(app: Weak<WavePortalApp>) -> Rc<dyn Fn(&ProviderEvent)> {
    Rc::new(move |event: &ProviderEvent| {
        let Some(app) = app.upgrade() else {
            return;
        };
        if !app.handle_provider_event(event) {
            return;
        }
        spawn_local(async move {
            if let Err(err) = app.resync().await {
                gloo_console::warn!("resync after wallet event failed:", err.to_string());
            }
        });
    })
}
