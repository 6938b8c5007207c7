use std::rc::Rc;
use tracing::{info, warn};
use wp_api_types::{Account, TransactionHandle, WaveRecord};
use wp_ledger::{LedgerContract, RpcLedgerClient};
use wp_wallet::{Eip1193Provider, ProviderEvent, WalletGateway};

use crate::SessionConfig;
use crate::error::SessionError;
use crate::session::{SessionController, SessionState};
use crate::surface::ErrorSurface;
use crate::sync::{PendingWave, WaveSynchronizer};
use crate::transaction::{TransactionCoordinator, TransactionState};

/// Everything a WavePortal view talks to, wired once at startup.
pub struct WavePortalApp {
    config: SessionConfig,
    surface: ErrorSurface,
    session: Rc<SessionController>,
    synchronizer: Rc<WaveSynchronizer>,
    coordinator: TransactionCoordinator,
    gate_reads: bool,
}

impl WavePortalApp {
    pub fn new(config: SessionConfig, wallet: WalletGateway, ledger: Rc<dyn LedgerContract>) -> Self {
        let surface = ErrorSurface::new();
        let gate_reads = wallet.has_provider();
        let session = Rc::new(SessionController::new(wallet, &config, surface.clone()));
        let synchronizer = Rc::new(WaveSynchronizer::new(ledger));
        let coordinator = TransactionCoordinator::new(
            session.clone(),
            synchronizer.clone(),
            &config,
            surface.clone(),
        );
        Self {
            config,
            surface,
            session,
            synchronizer,
            coordinator,
            gate_reads,
        }
    }

    /// Ledger access over JSON-RPC: through the wallet when one is injected,
    /// otherwise through `fallback` for reads only.
    pub fn over_rpc(
        config: SessionConfig,
        wallet: WalletGateway,
        fallback: Option<Rc<dyn Eip1193Provider>>,
    ) -> Result<Self, SessionError> {
        let (provider, gate_reads) = match (wallet.provider(), fallback) {
            (Some(provider), _) => (provider, true),
            (None, Some(provider)) => (provider, false),
            (None, None) => return Err(SessionError::NoProvider),
        };
        let ledger = RpcLedgerClient::new(config.contract_address.clone(), provider)
            .with_poll_interval(config.confirmation_poll_interval);
        Ok(Self::new(config, wallet, Rc::new(ledger)).with_read_gate(gate_reads))
    }

    /// Whether reads must pass the network gate first. On by default when a
    /// wallet is injected.
    pub fn with_read_gate(mut self, gate_reads: bool) -> Self {
        self.gate_reads = gate_reads;
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn session(&self) -> &Rc<SessionController> {
        &self.session
    }

    pub fn synchronizer(&self) -> &Rc<WaveSynchronizer> {
        &self.synchronizer
    }

    pub fn coordinator(&self) -> &TransactionCoordinator {
        &self.coordinator
    }

    /// Silent connect, then the first history read and live subscription.
    pub async fn start(&self) -> Result<SessionState, SessionError> {
        let state = match self.session.attempt_silent_connect().await {
            Ok(state) => state,
            Err(err) => {
                warn!("silent connect failed: {err}");
                self.session.state()
            }
        };
        self.sync().await?;
        info!(session = %state, waves = self.synchronizer.len(), "waveportal started");
        Ok(state)
    }

    async fn sync(&self) -> Result<usize, SessionError> {
        if self.gate_reads {
            self.session.ensure_network().await?;
        }
        self.synchronizer
            .initialize()
            .await
            .inspect_err(|err| self.report(err))
    }

    fn report(&self, err: &SessionError) {
        if let Some(message) = err.user_message(&self.config.network_name) {
            self.surface.set(message);
        }
    }

    /// The "Connect Wallet" action. History is synchronized again once an
    /// account is granted.
    pub async fn connect(&self) -> Result<Account, SessionError> {
        let account = self.session.user_connect().await?;
        if let Err(err) = self.sync().await {
            warn!("history sync after connect failed: {err}");
        }
        Ok(account)
    }

    pub fn disconnect(&self) {
        self.session.disconnect();
    }

    /// The "Wave at Me" action.
    pub async fn wave(&self, message: &str) -> Result<TransactionHandle, SessionError> {
        self.coordinator.submit(message).await
    }

    /// Re-reads the full history. The only update path when live
    /// subscriptions are unavailable.
    pub async fn refresh(&self) -> Result<usize, SessionError> {
        if self.gate_reads {
            self.session.ensure_network().await?;
        }
        self.synchronizer
            .refresh()
            .await
            .inspect_err(|err| self.report(err))
    }

    /// Wave count as reported by the contract.
    pub async fn total_waves(&self) -> Result<u64, SessionError> {
        if self.gate_reads {
            self.session.ensure_network().await?;
        }
        self.synchronizer
            .ledger()
            .read_count()
            .await
            .map_err(SessionError::from)
            .inspect_err(|err| self.report(err))
    }

    pub fn snapshot(&self) -> Rc<[WaveRecord]> {
        self.synchronizer.snapshot()
    }

    pub fn pending(&self) -> Vec<PendingWave> {
        self.synchronizer.pending()
    }

    pub fn error(&self) -> Option<String> {
        self.surface.current()
    }

    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    pub fn transaction_state(&self) -> TransactionState {
        self.coordinator.state()
    }

    /// Applies a wallet event to the session. Returns true when history
    /// should be synchronized again via [`resync`](Self::resync).
    pub fn handle_provider_event(&self, event: &ProviderEvent) -> bool {
        let before = self.session.state();
        self.session.handle_event(event);
        let after = self.session.state();

        match event {
            ProviderEvent::AccountsChanged(_) => {
                matches!(after, SessionState::Connected(_)) && after != before
            }
            ProviderEvent::ChainChanged(_) => {
                self.session.network() == Some(self.session.required_network())
            }
            ProviderEvent::Message { .. } => false,
        }
    }

    pub async fn resync(&self) -> Result<usize, SessionError> {
        self.sync().await
    }

    /// Swaps the contract binding (new address or ABI), then reads and
    /// subscribes against it. Waves and submissions use the new binding
    /// from here on.
    pub async fn on_ledger_change(
        &self,
        ledger: Rc<dyn LedgerContract>,
    ) -> Result<usize, SessionError> {
        info!("ledger binding changed");
        self.synchronizer.rebind(ledger);
        self.sync().await
    }

    /// Releases the live subscription. Safe to call more than once.
    pub fn shutdown(&self) {
        self.synchronizer.teardown();
        info!("waveportal shut down");
    }
}
