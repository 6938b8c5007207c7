use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use tracing::{debug, info, warn};
use wp_api_types::{MessageBounds, TransactionHandle};

use crate::SessionConfig;
use crate::error::{SessionError, TRANSACTION_FAILED};
use crate::session::SessionController;
use crate::surface::ErrorSurface;
use crate::sync::WaveSynchronizer;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionState {
    Idle,
    AwaitingSignature,
    Mining(TransactionHandle),
    Confirmed,
    Failed(SessionError),
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::AwaitingSignature => f.write_str("awaiting-signature"),
            Self::Mining(handle) => write!(f, "mining({handle})"),
            Self::Confirmed => f.write_str("confirmed"),
            Self::Failed(err) => write!(f, "failed({err})"),
        }
    }
}

pub type TransactionHook = Rc<dyn Fn(&TransactionState)>;

/// Drives one wave submission at a time from validation to confirmation.
/// Writes go to the synchronizer's current ledger binding. History is left
/// to the synchronizer; only placeholders are touched here.
pub struct TransactionCoordinator {
    session: Rc<SessionController>,
    synchronizer: Rc<WaveSynchronizer>,
    surface: ErrorSurface,
    bounds: MessageBounds,
    gas_limit: u64,
    optimistic: bool,
    network_name: String,
    state: RefCell<TransactionState>,
    hooks: RefCell<Vec<TransactionHook>>,
}

impl TransactionCoordinator {
    pub fn new(
        session: Rc<SessionController>,
        synchronizer: Rc<WaveSynchronizer>,
        config: &SessionConfig,
        surface: ErrorSurface,
    ) -> Self {
        Self {
            session,
            synchronizer,
            surface,
            bounds: config.message_bounds,
            gas_limit: config.gas_limit,
            optimistic: config.optimistic_placeholders,
            network_name: config.network_name.clone(),
            state: RefCell::new(TransactionState::Idle),
            hooks: RefCell::new(Vec::new()),
        }
    }

    pub fn state(&self) -> TransactionState {
        self.state.borrow().clone()
    }

    pub fn is_busy(&self) -> bool {
        self.state() != TransactionState::Idle
    }

    pub fn on_change(&self, hook: TransactionHook) {
        self.hooks.borrow_mut().push(hook);
    }

    fn transition(&self, next: TransactionState) {
        debug!(state = %next, "transaction state");
        self.state.replace(next.clone());
        let hooks: Vec<TransactionHook> = self.hooks.borrow().clone();
        for hook in hooks {
            hook(&next);
        }
    }

    fn report(&self, err: &SessionError) {
        let message = match err {
            SessionError::TransactionReverted | SessionError::NetworkError => {
                Some(TRANSACTION_FAILED.to_owned())
            }
            other => other.user_message(&self.network_name),
        };
        if let Some(message) = message {
            self.surface.set(message);
        }
    }

    /// Rejected before any wallet or network call; the state machine does
    /// not move.
    fn refuse(&self, err: SessionError) -> SessionError {
        debug!("wave refused: {err}");
        self.report(&err);
        err
    }

    /// Submits `message` as a wave and waits for it to be mined.
    pub async fn submit(&self, message: &str) -> Result<TransactionHandle, SessionError> {
        self.surface.clear();

        if self.is_busy() {
            return Err(self.refuse(SessionError::SubmissionInProgress));
        }
        if !self.bounds.accepts(message) {
            return Err(self.refuse(SessionError::InvalidMessage {
                min: self.bounds.min.max(1),
                max: self.bounds.max,
            }));
        }
        if !self.session.is_connected() {
            return Err(self.refuse(SessionError::NotConnected));
        }

        self.transition(TransactionState::AwaitingSignature);
        let mut placeholder = None;
        let outcome = self.run(message, &mut placeholder).await;

        match outcome {
            Ok(handle) => {
                info!(tx = %handle, "wave confirmed");
                self.transition(TransactionState::Confirmed);
                self.transition(TransactionState::Idle);
                Ok(handle)
            }
            Err(err) => {
                if let Some(handle) = placeholder {
                    self.synchronizer.remove_pending(&handle);
                }
                warn!("wave failed: {err}");
                self.report(&err);
                self.transition(TransactionState::Failed(err.clone()));
                self.transition(TransactionState::Idle);
                Err(err)
            }
        }
    }

    async fn run(
        &self,
        message: &str,
        placeholder: &mut Option<TransactionHandle>,
    ) -> Result<TransactionHandle, SessionError> {
        self.session.ensure_network().await?;
        let signer = self.session.signer().await?;

        let baseline = self.synchronizer.count_matching(signer.account(), message);
        let ledger = self.synchronizer.ledger();
        let handle = ledger.submit(&signer, message, self.gas_limit).await?;
        info!(tx = %handle, "wave broadcast; mining");
        self.transition(TransactionState::Mining(handle.clone()));

        if self.optimistic {
            self.synchronizer.add_pending(
                signer.account().clone(),
                message,
                handle.clone(),
                baseline,
            );
            *placeholder = Some(handle.clone());
        }

        ledger.await_confirmation(&handle).await?;
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState;
    use crate::sync::fake::{FakeLedger, handle, wave};
    use futures::channel::oneshot;
    use serde_json::json;
    use wp_ledger::LedgerError;
    use wp_wallet::provider::{REQUEST_PENDING, USER_REJECTED};
    use wp_wallet::testing::ScriptedProvider;
    use wp_wallet::{Eip1193Provider, ProviderError, WalletGateway};

    const ALICE: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    struct Fixture {
        provider: Rc<ScriptedProvider>,
        ledger: Rc<FakeLedger>,
        synchronizer: Rc<WaveSynchronizer>,
        session: Rc<SessionController>,
        coordinator: TransactionCoordinator,
        surface: ErrorSurface,
        states: Rc<RefCell<Vec<TransactionState>>>,
    }

    fn fixture(config: SessionConfig) -> Fixture {
        let provider = Rc::new(ScriptedProvider::new());
        provider.respond_always("eth_accounts", Ok(json!([ALICE])));
        provider.respond_always("eth_chainId", Ok(json!("0x4")));

        let surface = ErrorSurface::new();
        let gateway = WalletGateway::new(Some(provider.clone() as Rc<dyn Eip1193Provider>));
        let session = Rc::new(SessionController::new(gateway, &config, surface.clone()));
        let ledger = Rc::new(FakeLedger::default());
        let synchronizer = Rc::new(WaveSynchronizer::new(ledger.clone()));
        let coordinator = TransactionCoordinator::new(
            session.clone(),
            synchronizer.clone(),
            &config,
            surface.clone(),
        );

        let states = Rc::new(RefCell::new(Vec::new()));
        let sink = states.clone();
        coordinator.on_change(Rc::new(move |state: &TransactionState| {
            sink.borrow_mut().push(state.clone())
        }));

        Fixture {
            provider,
            ledger,
            synchronizer,
            session,
            coordinator,
            surface,
            states,
        }
    }

    async fn connected(config: SessionConfig) -> anyhow::Result<Fixture> {
        let fx = fixture(config);
        fx.session.attempt_silent_connect().await?;
        assert!(matches!(fx.session.state(), SessionState::Connected(_)));
        Ok(fx)
    }

    #[tokio::test]
    async fn successful_wave_walks_the_state_machine() -> anyhow::Result<()> {
        let fx = connected(SessionConfig::default()).await?;
        fx.ledger.submit_results.borrow_mut().push_back(Ok(handle('a')));

        let tx = fx.coordinator.submit("hello").await?;

        assert_eq!(tx, handle('a'));
        assert_eq!(
            *fx.states.borrow(),
            vec![
                TransactionState::AwaitingSignature,
                TransactionState::Mining(handle('a')),
                TransactionState::Confirmed,
                TransactionState::Idle,
            ]
        );
        assert_eq!(*fx.ledger.submissions.borrow(), vec![("hello".to_owned(), 300_000)]);
        assert_eq!(fx.surface.current(), None);
        Ok(())
    }

    #[tokio::test]
    async fn wave_does_not_touch_history() -> anyhow::Result<()> {
        let fx = connected(SessionConfig::default()).await?;
        fx.ledger.submit_results.borrow_mut().push_back(Ok(handle('a')));

        fx.coordinator.submit("hello").await?;

        assert!(fx.synchronizer.is_empty());
        assert!(fx.synchronizer.pending().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn disconnected_session_is_refused_without_network_calls() {
        let fx = fixture(SessionConfig::default());

        assert_eq!(
            fx.coordinator.submit("hello").await,
            Err(SessionError::NotConnected)
        );
        assert_eq!(fx.provider.call_count(), 0);
        assert!(fx.ledger.submissions.borrow().is_empty());
        assert!(fx.states.borrow().is_empty());
        assert!(fx.surface.current().is_some());
    }

    #[tokio::test]
    async fn message_length_is_checked_in_characters() -> anyhow::Result<()> {
        let fx = connected(SessionConfig::default()).await?;
        let calls_before = fx.provider.call_count();

        assert!(matches!(
            fx.coordinator.submit("").await,
            Err(SessionError::InvalidMessage { .. })
        ));
        assert!(matches!(
            fx.coordinator.submit(&"x".repeat(281)).await,
            Err(SessionError::InvalidMessage { min: 1, max: 280 })
        ));
        assert_eq!(fx.provider.call_count(), calls_before);

        fx.ledger.submit_results.borrow_mut().push_back(Ok(handle('b')));
        fx.coordinator.submit(&"🌊".repeat(280)).await?;
        Ok(())
    }

    #[tokio::test]
    async fn rejected_signature_fails_without_message() -> anyhow::Result<()> {
        let fx = connected(SessionConfig::default()).await?;
        fx.ledger
            .submit_results
            .borrow_mut()
            .push_back(Err(LedgerError::SubmissionRejected));

        assert_eq!(
            fx.coordinator.submit("hello").await,
            Err(SessionError::SubmissionRejected)
        );
        assert_eq!(fx.surface.current(), None);
        assert_eq!(
            fx.states.borrow().last(),
            Some(&TransactionState::Idle)
        );
        assert!(
            fx.states
                .borrow()
                .contains(&TransactionState::Failed(SessionError::SubmissionRejected))
        );
        Ok(())
    }

    #[tokio::test]
    async fn reverted_wave_surfaces_generic_failure() -> anyhow::Result<()> {
        let fx = connected(SessionConfig::default()).await?;
        fx.ledger.submit_results.borrow_mut().push_back(Ok(handle('c')));
        fx.ledger
            .confirmations
            .borrow_mut()
            .push_back(Err(LedgerError::TransactionReverted("wait 15m".into())));

        assert_eq!(
            fx.coordinator.submit("too soon").await,
            Err(SessionError::TransactionReverted)
        );
        assert_eq!(fx.surface.current().as_deref(), Some(TRANSACTION_FAILED));
        assert_eq!(fx.coordinator.state(), TransactionState::Idle);
        Ok(())
    }

    #[tokio::test]
    async fn declined_network_switch_blocks_submission() -> anyhow::Result<()> {
        let fx = connected(SessionConfig::default()).await?;
        fx.provider.respond("eth_chainId", Ok(json!("0x1")));
        fx.provider.respond(
            "wallet_switchEthereumChain",
            Err(ProviderError::new(USER_REJECTED, "no")),
        );

        assert_eq!(
            fx.coordinator.submit("hello").await,
            Err(SessionError::WrongNetwork)
        );
        assert!(fx.ledger.submissions.borrow().is_empty());
        assert!(fx.surface.current().unwrap().contains("Rinkeby"));
        Ok(())
    }

    #[tokio::test]
    async fn pending_network_switch_aborts_quietly_and_retry_succeeds() -> anyhow::Result<()> {
        let fx = connected(SessionConfig::default()).await?;
        fx.provider.respond("eth_chainId", Ok(json!("0x1")));
        fx.provider.respond(
            "wallet_switchEthereumChain",
            Err(ProviderError::new(REQUEST_PENDING, "already pending")),
        );

        assert_eq!(
            fx.coordinator.submit("hello").await,
            Err(SessionError::NetworkSwitchPending)
        );
        assert_eq!(fx.surface.current(), None);
        assert_eq!(fx.coordinator.state(), TransactionState::Idle);
        assert!(fx.ledger.submissions.borrow().is_empty());

        fx.ledger.submit_results.borrow_mut().push_back(Ok(handle('9')));
        assert_eq!(fx.coordinator.submit("hello").await?, handle('9'));
        assert_eq!(fx.ledger.submissions.borrow().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn second_submit_while_mining_is_refused() -> anyhow::Result<()> {
        let fx = connected(SessionConfig::default()).await?;
        fx.ledger.submit_results.borrow_mut().push_back(Ok(handle('d')));
        let (release, gate) = oneshot::channel::<()>();
        *fx.ledger.confirmation_gate.borrow_mut() = Some(gate);

        let (first, second) = futures::join!(fx.coordinator.submit("first"), async {
            assert_eq!(fx.coordinator.state(), TransactionState::Mining(handle('d')));
            let refused = fx.coordinator.submit("second").await;
            let _ = release.send(());
            refused
        });

        assert_eq!(first?, handle('d'));
        assert_eq!(second, Err(SessionError::SubmissionInProgress));
        assert_eq!(fx.ledger.submissions.borrow().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn optimistic_placeholder_lives_until_the_event() -> anyhow::Result<()> {
        let config = SessionConfig {
            optimistic_placeholders: true,
            ..SessionConfig::default()
        };
        let fx = connected(config).await?;
        fx.synchronizer.initialize().await?;
        fx.ledger.submit_results.borrow_mut().push_back(Ok(handle('e')));

        fx.coordinator.submit("gm").await?;
        let pending = fx.synchronizer.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].handle, handle('e'));

        fx.ledger.emit(wave(ALICE, "gm", 42));
        assert!(fx.synchronizer.pending().is_empty());
        assert_eq!(fx.synchronizer.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn event_landing_before_mining_leaves_no_placeholder() -> anyhow::Result<()> {
        let config = SessionConfig {
            optimistic_placeholders: true,
            ..SessionConfig::default()
        };
        let fx = connected(config).await?;
        fx.synchronizer.initialize().await?;
        fx.ledger.submit_results.borrow_mut().push_back(Ok(handle('e')));
        *fx.ledger.event_during_submit.borrow_mut() = Some(wave(ALICE, "gm", 42));

        fx.coordinator.submit("gm").await?;

        assert_eq!(fx.synchronizer.len(), 1);
        assert!(fx.synchronizer.pending().is_empty());
        assert_eq!(fx.coordinator.state(), TransactionState::Idle);
        Ok(())
    }

    #[tokio::test]
    async fn failed_wave_drops_its_placeholder() -> anyhow::Result<()> {
        let config = SessionConfig {
            optimistic_placeholders: true,
            ..SessionConfig::default()
        };
        let fx = connected(config).await?;
        fx.ledger.submit_results.borrow_mut().push_back(Ok(handle('f')));
        fx.ledger
            .confirmations
            .borrow_mut()
            .push_back(Err(LedgerError::Network("dropped".into())));

        assert!(fx.coordinator.submit("gm").await.is_err());
        assert!(fx.synchronizer.pending().is_empty());
        Ok(())
    }
}
