//! In-memory provider double. Scripted responses per method, a call log,
//! and manual event emission.

use async_trait::async_trait;
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};

use crate::provider::{
    Eip1193Provider, Listener, ListenerId, METHOD_NOT_FOUND, ProviderError, ProviderEvent,
};

type Response = Result<Value, ProviderError>;

#[derive(Default)]
pub struct ScriptedProvider {
    queued: RefCell<HashMap<String, VecDeque<Response>>>,
    fixed: RefCell<HashMap<String, Response>>,
    calls: RefCell<Vec<(String, Value)>>,
    listeners: RefCell<Vec<(ListenerId, Listener)>>,
    next_listener: Cell<u64>,
    poll_only: bool,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// A provider that reports no push channel, like the HTTP transport.
    pub fn poll_only() -> Self {
        Self {
            poll_only: true,
            ..Self::default()
        }
    }

    /// Answer the next call to `method` with `response`. Queued answers are
    /// consumed before the fixed one.
    pub fn respond(&self, method: &str, response: Response) {
        self.queued
            .borrow_mut()
            .entry(method.to_owned())
            .or_default()
            .push_back(response);
    }

    /// Answer every call to `method` with `response`.
    pub fn respond_always(&self, method: &str, response: Response) {
        self.fixed.borrow_mut().insert(method.to_owned(), response);
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.borrow().clone()
    }

    pub fn calls_to(&self, method: &str) -> Vec<Value> {
        self.calls
            .borrow()
            .iter()
            .filter(|(name, _)| name == method)
            .map(|(_, params)| params.clone())
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.borrow().len()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().len()
    }

    /// Delivers `event` to every registered listener. Listeners may add or
    /// remove registrations while being called.
    pub fn emit(&self, event: ProviderEvent) {
        let listeners: Vec<Listener> = self
            .listeners
            .borrow()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(&event);
        }
    }
}

#[async_trait(?Send)]
impl Eip1193Provider for ScriptedProvider {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderError> {
        self.calls.borrow_mut().push((method.to_owned(), params));

        let queued = self
            .queued
            .borrow_mut()
            .get_mut(method)
            .and_then(VecDeque::pop_front);
        if let Some(response) = queued {
            return response;
        }

        self.fixed
            .borrow()
            .get(method)
            .cloned()
            .unwrap_or_else(|| {
                Err(ProviderError::new(
                    METHOD_NOT_FOUND,
                    format!("no scripted response for {method}"),
                ))
            })
    }

    fn add_listener(&self, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_listener.get());
        self.next_listener.set(id.0 + 1);
        self.listeners.borrow_mut().push((id, listener));
        id
    }

    fn remove_listener(&self, id: ListenerId) {
        self.listeners.borrow_mut().retain(|(existing, _)| *existing != id);
    }

    fn has_push_channel(&self) -> bool {
        !self.poll_only
    }
}
