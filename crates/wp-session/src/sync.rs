use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::rc::Rc;
use tracing::{debug, info, warn};
use wp_api_types::{Account, TransactionHandle, WaveIdentity, WaveRecord};
use wp_ledger::{LedgerContract, LedgerError, Subscription, WaveCallback};

use crate::error::SessionError;

/// A self-submitted wave shown before its ledger record arrives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingWave {
    pub sender: Account,
    pub message: String,
    pub handle: TransactionHandle,
    /// Matching records already in history when the submission started.
    baseline: usize,
}

/// Ledger-ordered, duplicate-free wave history.
#[derive(Debug, Default)]
pub struct WaveHistory {
    records: Vec<WaveRecord>,
    seen: HashSet<WaveIdentity>,
    pending: Vec<PendingWave>,
}

impl WaveHistory {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[WaveRecord] {
        &self.records
    }

    pub fn pending(&self) -> &[PendingWave] {
        &self.pending
    }

    /// Appends unless an identical record is already present. Returns
    /// whether the history changed.
    pub fn insert(&mut self, record: WaveRecord) -> bool {
        if !self.seen.insert(record.identity()) {
            return false;
        }
        self.records.push(record);
        self.resolve_pending();
        true
    }

    /// Adds records in order, skipping known ones. Never removes anything.
    pub fn merge(&mut self, records: impl IntoIterator<Item = WaveRecord>) -> usize {
        records
            .into_iter()
            .map(|record| self.insert(record))
            .filter(|added| *added)
            .count()
    }

    /// Records from `sender` carrying exactly `message`.
    pub fn count_matching(&self, sender: &Account, message: &str) -> usize {
        self.records
            .iter()
            .filter(|record| &record.sender == sender && record.message == message)
            .count()
    }

    fn resolve_pending(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        let unresolved: Vec<PendingWave> = pending
            .into_iter()
            .filter(|wave| self.count_matching(&wave.sender, &wave.message) <= wave.baseline)
            .collect();
        self.pending = unresolved;
    }

    /// `baseline` is [`count_matching`](Self::count_matching) taken before
    /// the wave was sent. A record that already landed resolves the
    /// placeholder at once.
    pub fn add_pending(
        &mut self,
        sender: Account,
        message: String,
        handle: TransactionHandle,
        baseline: usize,
    ) {
        self.pending.push(PendingWave {
            sender,
            message,
            handle,
            baseline,
        });
        self.resolve_pending();
    }

    pub fn remove_pending(&mut self, handle: &TransactionHandle) {
        self.pending.retain(|wave| &wave.handle != handle);
    }
}

pub type HistoryHook = Rc<dyn Fn()>;

/// Keeps the local wave history in step with the ledger: one full read,
/// then live events.
pub struct WaveSynchronizer {
    ledger: RefCell<Rc<dyn LedgerContract>>,
    history: Rc<RefCell<WaveHistory>>,
    hooks: Rc<RefCell<Vec<HistoryHook>>>,
    subscription: RefCell<Option<Subscription>>,
    subscribing: Cell<bool>,
}

fn notify(hooks: &RefCell<Vec<HistoryHook>>) {
    let hooks: Vec<HistoryHook> = hooks.borrow().clone();
    for hook in hooks {
        hook();
    }
}

impl WaveSynchronizer {
    pub fn new(ledger: Rc<dyn LedgerContract>) -> Self {
        Self {
            ledger: RefCell::new(ledger),
            history: Rc::new(RefCell::new(WaveHistory::default())),
            hooks: Rc::new(RefCell::new(Vec::new())),
            subscription: RefCell::new(None),
            subscribing: Cell::new(false),
        }
    }

    pub fn ledger(&self) -> Rc<dyn LedgerContract> {
        self.ledger.borrow().clone()
    }

    /// Points the synchronizer at a new contract binding. The live
    /// subscription is released; history stays. Call `initialize` again to
    /// resubscribe.
    pub fn rebind(&self, ledger: Rc<dyn LedgerContract>) {
        self.teardown();
        *self.ledger.borrow_mut() = ledger;
    }

    /// Called whenever records or placeholders change.
    pub fn on_change(&self, hook: HistoryHook) {
        self.hooks.borrow_mut().push(hook);
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription
            .borrow()
            .as_ref()
            .is_some_and(Subscription::is_active)
    }

    /// Reads the full history, merges it in, then subscribes if not
    /// already subscribed. Safe to call repeatedly.
    pub async fn initialize(&self) -> Result<usize, SessionError> {
        let added = self.refresh().await?;
        self.ensure_subscribed().await?;
        Ok(added)
    }

    /// Re-reads the full history and merges anything missing.
    pub async fn refresh(&self) -> Result<usize, SessionError> {
        let records = self.ledger().read_all().await.map_err(|err| {
            warn!("reading wave history failed: {err}");
            SessionError::from(err)
        })?;
        let total = records.len();
        let added = self.history.borrow_mut().merge(records);
        debug!(total, added, "wave history read");
        if added > 0 {
            notify(&self.hooks);
        }
        Ok(added)
    }

    async fn ensure_subscribed(&self) -> Result<(), SessionError> {
        if self.is_subscribed() || self.subscribing.get() {
            return Ok(());
        }
        self.subscribing.set(true);

        let history = Rc::downgrade(&self.history);
        let hooks = Rc::downgrade(&self.hooks);
        let on_event: WaveCallback = Rc::new(move |record: WaveRecord| {
            let Some(history) = history.upgrade() else {
                return;
            };
            let sender = record.sender.short();
            let added = history.borrow_mut().insert(record);
            if added {
                info!(sender = %sender, "new wave");
                if let Some(hooks) = hooks.upgrade() {
                    notify(&hooks);
                }
            }
        });

        let outcome = self.ledger().subscribe(on_event).await;
        self.subscribing.set(false);
        match outcome {
            Ok(subscription) => {
                *self.subscription.borrow_mut() = Some(subscription);
                Ok(())
            }
            Err(LedgerError::SubscriptionUnsupported) => {
                warn!("live wave updates unavailable; history refreshes only on demand");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Immutable view of the history. Cloning the records keeps readers
    /// unaffected by later merges.
    pub fn snapshot(&self) -> Rc<[WaveRecord]> {
        Rc::from(self.history.borrow().records())
    }

    pub fn pending(&self) -> Vec<PendingWave> {
        self.history.borrow().pending().to_vec()
    }

    pub fn len(&self) -> usize {
        self.history.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.borrow().is_empty()
    }

    pub fn count_matching(&self, sender: &Account, message: &str) -> usize {
        self.history.borrow().count_matching(sender, message)
    }

    pub fn add_pending(
        &self,
        sender: Account,
        message: &str,
        handle: TransactionHandle,
        baseline: usize,
    ) {
        self.history
            .borrow_mut()
            .add_pending(sender, message.to_owned(), handle, baseline);
        notify(&self.hooks);
    }

    pub fn remove_pending(&self, handle: &TransactionHandle) {
        self.history.borrow_mut().remove_pending(handle);
        notify(&self.hooks);
    }

    /// Releases the live subscription. History is kept.
    pub fn teardown(&self) {
        if let Some(mut subscription) = self.subscription.borrow_mut().take() {
            subscription.close();
            debug!("wave subscription released");
        }
    }
}
