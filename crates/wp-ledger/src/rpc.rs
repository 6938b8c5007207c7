//! `LedgerContract` over any EIP-1193 provider: the injected wallet in the
//! browser, or the HTTP transport when no wallet is present.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, info, warn};
use wp_api_types::{Account, TransactionHandle, WaveRecord};
use wp_wallet::provider::METHOD_NOT_FOUND;
use wp_wallet::{Eip1193Provider, Listener, ListenerGuard, ProviderError, ProviderEvent, Signer};

use crate::runtime::sleep;
use crate::{LedgerContract, LedgerError, Subscription, WaveCallback, abi};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

pub struct RpcLedgerClient {
    contract: Account,
    provider: Rc<dyn Eip1193Provider>,
    poll_interval: Duration,
    /// Node-side subscriptions whose listeners are gone; cancelled on the
    /// next request.
    stale: Rc<RefCell<Vec<String>>>,
}

impl RpcLedgerClient {
    pub fn new(contract: Account, provider: Rc<dyn Eip1193Provider>) -> Self {
        Self {
            contract,
            provider,
            poll_interval: DEFAULT_POLL_INTERVAL,
            stale: Rc::default(),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn contract(&self) -> &Account {
        &self.contract
    }

    /// `eth_call` against the latest block.
    async fn call(&self, calldata: Vec<u8>) -> Result<Vec<u8>, LedgerError> {
        self.flush_stale().await;

        let params = json!([
            {
                "to": self.contract.as_str(),
                "data": abi::to_hex_data(&calldata),
            },
            "latest"
        ]);
        let raw = self.provider.request("eth_call", params).await?;
        let data = raw
            .as_str()
            .ok_or_else(|| LedgerError::Malformed(format!("eth_call returned {raw}")))?;
        Ok(abi::from_hex_data(data)?)
    }

    async fn flush_stale(&self) {
        let ids = std::mem::take(&mut *self.stale.borrow_mut());
        for id in ids {
            if let Err(err) = self.provider.request("eth_unsubscribe", json!([id])).await {
                debug!(subscription = %id, "eth_unsubscribe failed: {err}");
            }
        }
    }
}

#[async_trait(?Send)]
impl LedgerContract for RpcLedgerClient {
    async fn read_all(&self) -> Result<Vec<WaveRecord>, LedgerError> {
        let data = self.call(abi::encode_get_all_waves()).await?;
        let waves = abi::decode_wave_list(&data)?;

        debug!(count = waves.len(), contract = %self.contract, "read wave history");
        Ok(waves)
    }

    async fn read_count(&self) -> Result<u64, LedgerError> {
        let data = self.call(abi::encode_get_total_waves()).await?;
        Ok(abi::decode_wave_count(&data)?)
    }

    async fn submit(
        &self,
        signer: &Signer,
        message: &str,
        gas_limit: u64,
    ) -> Result<TransactionHandle, LedgerError> {
        let tx = json!({
            "from": signer.account().as_str(),
            "to": self.contract.as_str(),
            "data": abi::to_hex_data(&abi::encode_wave(message)),
            "gas": format!("{gas_limit:#x}"),
        });

        let hash = signer
            .send_transaction(tx)
            .await
            .map_err(LedgerError::from_submission)?;
        let handle =
            TransactionHandle::parse(&hash).map_err(|err| LedgerError::Malformed(err.to_string()))?;

        info!(tx = %handle, sender = %signer.account(), "wave broadcast");
        Ok(handle)
    }

    async fn await_confirmation(&self, handle: &TransactionHandle) -> Result<(), LedgerError> {
        loop {
            let receipt = self
                .provider
                .request("eth_getTransactionReceipt", json!([handle.as_str()]))
                .await
                .map_err(|err| LedgerError::Network(err.to_string()))?;

            if receipt.is_null() {
                sleep(self.poll_interval).await;
                continue;
            }

            let status = receipt
                .get("status")
                .and_then(Value::as_str)
                .map(parse_quantity)
                .transpose()?;
            if status == Some(0) {
                warn!(tx = %handle, "wave reverted");
                return Err(LedgerError::TransactionReverted(format!(
                    "transaction {handle} reverted"
                )));
            }

            info!(tx = %handle, "wave mined");
            return Ok(());
        }
    }

    async fn subscribe(&self, on_event: WaveCallback) -> Result<Subscription, LedgerError> {
        if !self.provider.has_push_channel() {
            return Err(LedgerError::SubscriptionUnsupported);
        }
        self.flush_stale().await;

        let subscription_id: Rc<RefCell<Option<String>>> = Rc::default();
        // Messages that arrive before eth_subscribe has answered.
        let early: Rc<RefCell<Vec<(String, Value)>>> = Rc::default();

        let listener: Listener = {
            let subscription_id = subscription_id.clone();
            let early = early.clone();
            let on_event = on_event.clone();
            Rc::new(move |event: &ProviderEvent| {
                let ProviderEvent::Message {
                    subscription,
                    result,
                } = event
                else {
                    return;
                };
                let expected = subscription_id.borrow().clone();
                match expected {
                    Some(expected) if &expected == subscription => deliver(&on_event, result),
                    Some(_) => {}
                    None => early
                        .borrow_mut()
                        .push((subscription.clone(), result.clone())),
                }
            })
        };
        let mut guard = ListenerGuard::register(self.provider.clone(), listener);

        let params = json!([
            "logs",
            {
                "address": self.contract.as_str(),
                "topics": [abi::new_wave_topic()],
            }
        ]);
        let raw = match self.provider.request("eth_subscribe", params).await {
            Ok(raw) => raw,
            Err(err) if is_unsupported(&err) => {
                guard.close();
                return Err(LedgerError::SubscriptionUnsupported);
            }
            Err(err) => return Err(err.into()),
        };
        let id = raw
            .as_str()
            .map(ToOwned::to_owned)
            .ok_or_else(|| LedgerError::Malformed(format!("eth_subscribe returned {raw}")))?;

        *subscription_id.borrow_mut() = Some(id.clone());
        let buffered = std::mem::take(&mut *early.borrow_mut());
        for (subscription, result) in buffered {
            if subscription == id {
                deliver(&on_event, &result);
            }
        }

        info!(subscription = %id, contract = %self.contract, "subscribed to NewWave");

        let stale = self.stale.clone();
        Ok(Subscription::new(move || {
            guard.close();
            debug!(subscription = %id, "released NewWave listener");
            stale.borrow_mut().push(id);
        }))
    }
}

fn is_unsupported(err: &ProviderError) -> bool {
    err.code == METHOD_NOT_FOUND || err.message.to_ascii_lowercase().contains("not supported")
}

fn parse_quantity(raw: &str) -> Result<u64, LedgerError> {
    let body = raw.strip_prefix("0x").unwrap_or(raw);
    u64::from_str_radix(body, 16).map_err(|_| LedgerError::Malformed(format!("bad quantity {raw}")))
}

fn deliver(on_event: &WaveCallback, log: &Value) {
    if log.get("removed").and_then(Value::as_bool) == Some(true) {
        debug!("ignoring removed NewWave log");
        return;
    }

    let topics: Vec<String> = log
        .get("topics")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().map(ToOwned::to_owned))
                .collect()
        })
        .unwrap_or_default();
    let data = log.get("data").and_then(Value::as_str).unwrap_or("0x");

    let decoded = abi::from_hex_data(data).and_then(|bytes| abi::decode_new_wave(&topics, &bytes));
    match decoded {
        Ok(wave) => on_event(wave),
        Err(err) => warn!("dropping undecodable NewWave log: {err}"),
    }
}
