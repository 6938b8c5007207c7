//! `window.ethereum` behind the [`Eip1193Provider`] trait.
//!
//! Requests go through `ethereum.request({ method, params })`; the three
//! events the client cares about are bridged with `on` / `removeListener`.

use async_trait::async_trait;
use js_sys::{Array, Function, Promise, Reflect};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cell::{Cell, RefCell};
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::JsFuture;
use wp_wallet::provider::INTERNAL_ERROR;
use wp_wallet::{Eip1193Provider, Listener, ListenerId, ProviderError, ProviderEvent};

type JsHandler = Closure<dyn FnMut(JsValue)>;

const EVENTS: [&str; 3] = ["accountsChanged", "chainChanged", "message"];

#[derive(Serialize)]
struct RequestArguments<'a> {
    method: &'a str,
    params: &'a Value,
}

#[derive(Deserialize)]
struct SubscriptionMessage {
    data: SubscriptionData,
}

#[derive(Deserialize)]
struct SubscriptionData {
    subscription: String,
    result: Value,
}

pub struct BrowserProvider {
    ethereum: JsValue,
    next_listener: Cell<u64>,
    handlers: RefCell<Vec<(ListenerId, Vec<(&'static str, JsHandler)>)>>,
}

impl BrowserProvider {
    /// The injected wallet, if the page has one.
    pub fn detect() -> Option<Self> {
        let window = web_sys::window()?;
        let ethereum = Reflect::get(&window, &JsValue::from_str("ethereum")).ok()?;
        if ethereum.is_undefined() || ethereum.is_null() {
            return None;
        }
        Some(Self {
            ethereum,
            next_listener: Cell::new(0),
            handlers: RefCell::new(Vec::new()),
        })
    }

    fn invoke(&self, name: &str, args: &[&JsValue]) -> Result<JsValue, JsValue> {
        let function: Function = Reflect::get(&self.ethereum, &JsValue::from_str(name))?.dyn_into()?;
        let args: Array = args.iter().copied().collect();
        function.apply(&self.ethereum, &args)
    }
}

fn provider_error(err: JsValue) -> ProviderError {
    let code = Reflect::get(&err, &JsValue::from_str("code"))
        .ok()
        .and_then(|code| code.as_f64())
        .map(|code| code as i64)
        .unwrap_or(INTERNAL_ERROR);
    let message = Reflect::get(&err, &JsValue::from_str("message"))
        .ok()
        .and_then(|message| message.as_string())
        .or_else(|| err.as_string())
        .unwrap_or_else(|| "wallet request failed".to_owned());
    ProviderError::new(code, message)
}

fn event_for(name: &str, payload: JsValue) -> Option<ProviderEvent> {
    match name {
        "accountsChanged" => serde_wasm_bindgen::from_value(payload)
            .ok()
            .map(ProviderEvent::AccountsChanged),
        "chainChanged" => payload.as_string().map(ProviderEvent::ChainChanged),
        "message" => serde_wasm_bindgen::from_value::<SubscriptionMessage>(payload)
            .ok()
            .map(|message| ProviderEvent::Message {
                subscription: message.data.subscription,
                result: message.data.result,
            }),
        _ => None,
    }
}

#[async_trait(?Send)]
impl Eip1193Provider for BrowserProvider {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderError> {
        let arguments = RequestArguments {
            method,
            params: &params,
        };
        let arguments = arguments
            .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
            .map_err(|err| ProviderError::new(INTERNAL_ERROR, err.to_string()))?;

        let promise: Promise = self
            .invoke("request", &[&arguments])
            .and_then(|value| value.dyn_into::<Promise>())
            .map_err(provider_error)?;
        let result = JsFuture::from(promise).await.map_err(provider_error)?;
        if result.is_undefined() || result.is_null() {
            return Ok(Value::Null);
        }
        serde_wasm_bindgen::from_value(result)
            .map_err(|err| ProviderError::new(INTERNAL_ERROR, err.to_string()))
    }

    fn add_listener(&self, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_listener.get());
        self.next_listener.set(id.0 + 1);

        let mut registered = Vec::with_capacity(EVENTS.len());
        for name in EVENTS {
            let listener = listener.clone();
            let handler: JsHandler = Closure::new(move |payload: JsValue| {
                if let Some(event) = event_for(name, payload) {
                    listener(&event);
                }
            });
            match self.invoke("on", &[&JsValue::from_str(name), handler.as_ref()]) {
                Ok(_) => registered.push((name, handler)),
                Err(err) => gloo_console::warn!("could not listen for", name, err),
            }
        }
        self.handlers.borrow_mut().push((id, registered));
        id
    }

    fn remove_listener(&self, id: ListenerId) {
        let removed = {
            let mut handlers = self.handlers.borrow_mut();
            let Some(index) = handlers.iter().position(|(existing, _)| *existing == id) else {
                return;
            };
            handlers.remove(index).1
        };
        for (name, handler) in removed {
            if let Err(err) =
                self.invoke("removeListener", &[&JsValue::from_str(name), handler.as_ref()])
            {
                gloo_console::warn!("could not remove listener for", name, err);
            }
        }
    }
}
