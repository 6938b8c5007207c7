use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use tracing::{debug, info, warn};
use wp_api_types::{Account, NetworkId};
use wp_wallet::{ProviderEvent, Signer, WalletError, WalletGateway};

use crate::SessionConfig;
use crate::error::SessionError;
use crate::surface::ErrorSurface;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    ConnectingWallet,
    SwitchingNetwork,
    Connected(Account),
    Error(SessionError),
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::ConnectingWallet => f.write_str("connecting"),
            Self::SwitchingNetwork => f.write_str("switching-network"),
            Self::Connected(account) => write!(f, "connected({})", account.short()),
            Self::Error(err) => write!(f, "error({err})"),
        }
    }
}

pub type SessionHook = Rc<dyn Fn(&SessionState)>;

/// Owns the wallet session: which account is active and whether the wallet
/// sits on the required network.
pub struct SessionController {
    gateway: WalletGateway,
    required_network: NetworkId,
    network_name: String,
    surface: ErrorSurface,
    state: RefCell<SessionState>,
    last_network: Cell<Option<NetworkId>>,
    hooks: RefCell<Vec<SessionHook>>,
}

impl SessionController {
    pub fn new(gateway: WalletGateway, config: &SessionConfig, surface: ErrorSurface) -> Self {
        Self {
            gateway,
            required_network: config.required_network,
            network_name: config.network_name.clone(),
            surface,
            state: RefCell::new(SessionState::Disconnected),
            last_network: Cell::new(None),
            hooks: RefCell::new(Vec::new()),
        }
    }

    pub fn gateway(&self) -> &WalletGateway {
        &self.gateway
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn account(&self) -> Option<Account> {
        match &*self.state.borrow() {
            SessionState::Connected(account) => Some(account.clone()),
            _ => None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.account().is_some()
    }

    /// Last network reported by the wallet, if any.
    pub fn network(&self) -> Option<NetworkId> {
        self.last_network.get()
    }

    pub fn required_network(&self) -> NetworkId {
        self.required_network
    }

    pub fn network_name(&self) -> &str {
        &self.network_name
    }

    /// Called after every state change, in registration order.
    pub fn on_change(&self, hook: SessionHook) {
        self.hooks.borrow_mut().push(hook);
    }

    fn transition(&self, next: SessionState) {
        let previous = self.state.replace(next.clone());
        if previous == next {
            return;
        }
        info!(from = %previous, to = %next, "session state changed");

        let hooks: Vec<SessionHook> = self.hooks.borrow().clone();
        for hook in hooks {
            hook(&next);
        }
    }

    fn report(&self, err: &SessionError) {
        if let Some(message) = err.user_message(&self.network_name) {
            self.surface.set(message);
        }
    }

    fn fail(&self, err: SessionError) -> SessionError {
        warn!("session failed: {err}");
        self.report(&err);
        self.transition(SessionState::Error(err.clone()));
        err
    }

    /// Adopts an already-authorised account without prompting. Never asks
    /// the wallet to switch networks.
    pub async fn attempt_silent_connect(&self) -> Result<SessionState, SessionError> {
        if !self.gateway.has_provider() {
            debug!("no wallet injected; skipping silent connect");
            return Ok(self.state());
        }
        if self.is_connected() {
            return Ok(self.state());
        }

        self.transition(SessionState::ConnectingWallet);
        match self.gateway.current_accounts().await {
            Ok(accounts) => {
                let next = match accounts.into_iter().next() {
                    Some(account) => SessionState::Connected(account),
                    None => SessionState::Disconnected,
                };
                self.transition(next.clone());
                Ok(next)
            }
            Err(err) => Err(self.fail(err.into())),
        }
    }

    /// Explicit connect: makes sure the wallet is on the required network,
    /// then asks for an account.
    pub async fn user_connect(&self) -> Result<Account, SessionError> {
        self.surface.clear();
        if let Some(account) = self.account() {
            return Ok(account);
        }
        if !self.gateway.has_provider() {
            return Err(self.fail(SessionError::NoProvider));
        }

        self.transition(SessionState::ConnectingWallet);
        let network = match self.gateway.current_network().await {
            Ok(network) => network,
            Err(err) => return Err(self.fail(err.into())),
        };
        self.last_network.set(Some(network));

        if network != self.required_network {
            self.transition(SessionState::SwitchingNetwork);
            match self.gateway.switch_network(self.required_network).await {
                Ok(true) => {
                    self.last_network.set(Some(self.required_network));
                    self.transition(SessionState::ConnectingWallet);
                }
                Ok(false) => {
                    self.transition(SessionState::Disconnected);
                    return Err(SessionError::NetworkSwitchPending);
                }
                Err(WalletError::UserRejected) => {
                    return Err(self.fail(SessionError::WrongNetwork));
                }
                Err(err) => return Err(self.fail(err.into())),
            }
        }

        match self.gateway.request_accounts().await {
            Ok(accounts) => match accounts.into_iter().next() {
                Some(account) => {
                    info!(account = %account.short(), "wallet connected");
                    self.transition(SessionState::Connected(account.clone()));
                    Ok(account)
                }
                None => {
                    self.transition(SessionState::Disconnected);
                    Err(SessionError::NotConnected)
                }
            },
            Err(WalletError::UserRejected) => {
                info!("user declined to connect");
                self.transition(SessionState::Disconnected);
                Err(SessionError::UserRejected)
            }
            Err(err) => Err(self.fail(err.into())),
        }
    }

    /// Gate for every ledger operation. Asks the wallet to switch at most
    /// once per call. Session state is left alone; a refusal only reaches
    /// the error surface.
    pub async fn ensure_network(&self) -> Result<(), SessionError> {
        if !self.gateway.has_provider() {
            return Err(SessionError::NoProvider);
        }

        let current = self.gateway.current_network().await.map_err(|err| {
            let err = SessionError::from(err);
            self.report(&err);
            err
        })?;
        self.last_network.set(Some(current));
        if current == self.required_network {
            return Ok(());
        }

        debug!(current = %current, required = %self.required_network, "asking wallet to switch");
        match self.gateway.switch_network(self.required_network).await {
            Ok(true) => {
                self.last_network.set(Some(self.required_network));
                Ok(())
            }
            Ok(false) => Err(SessionError::NetworkSwitchPending),
            Err(err) => {
                let err = match err {
                    WalletError::UserRejected => SessionError::WrongNetwork,
                    other => SessionError::from(other),
                };
                warn!("network gate refused: {err}");
                self.report(&err);
                Err(err)
            }
        }
    }

    pub fn on_accounts_changed(&self, raw: &[String]) {
        let accounts = match raw
            .iter()
            .map(|text| Account::parse(text))
            .collect::<Result<Vec<_>, _>>()
        {
            Ok(accounts) => accounts,
            Err(err) => {
                warn!("ignoring malformed accountsChanged: {err}");
                return;
            }
        };

        match (accounts.into_iter().next(), self.account()) {
            (None, _) => {
                if self.state() != SessionState::Disconnected {
                    info!("wallet revoked access");
                    self.transition(SessionState::Disconnected);
                }
            }
            (Some(next), Some(current)) if next != current => {
                info!(account = %next.short(), "wallet switched account");
                self.transition(SessionState::Connected(next));
            }
            _ => {}
        }
    }

    pub fn on_chain_changed(&self, raw: &str) {
        let network = match NetworkId::parse(raw) {
            Ok(network) => network,
            Err(err) => {
                warn!("ignoring malformed chainChanged: {err}");
                return;
            }
        };
        info!(network = %network, "wallet network changed");
        self.last_network.set(Some(network));

        if network == self.required_network
            && self.state() == SessionState::Error(SessionError::WrongNetwork)
        {
            self.surface.clear();
            self.transition(SessionState::Disconnected);
        }
    }

    pub fn handle_event(&self, event: &ProviderEvent) {
        match event {
            ProviderEvent::AccountsChanged(accounts) => self.on_accounts_changed(accounts),
            ProviderEvent::ChainChanged(network) => self.on_chain_changed(network),
            ProviderEvent::Message { .. } => {}
        }
    }

    /// Local only; wallets expose no revoke call.
    pub fn disconnect(&self) {
        self.transition(SessionState::Disconnected);
    }

    /// Signing capability for the active account. The wallet's own view of
    /// the active account wins when the two disagree.
    pub async fn signer(&self) -> Result<Signer, SessionError> {
        let Some(active) = self.account() else {
            return Err(SessionError::NotConnected);
        };
        let signer = self.gateway.signer().await?;
        if signer.account() != &active {
            warn!(
                expected = %active.short(),
                actual = %signer.account().short(),
                "wallet account moved under the session"
            );
            self.transition(SessionState::Connected(signer.account().clone()));
        }
        Ok(signer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wp_wallet::provider::{REQUEST_PENDING, USER_REJECTED};
    use wp_wallet::testing::ScriptedProvider;
    use wp_wallet::{Eip1193Provider, ProviderError};

    const ALICE: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const BOB: &str = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    fn controller(provider: &Rc<ScriptedProvider>) -> (SessionController, ErrorSurface) {
        let surface = ErrorSurface::new();
        let gateway = WalletGateway::new(Some(provider.clone() as Rc<dyn Eip1193Provider>));
        let controller = SessionController::new(gateway, &SessionConfig::default(), surface.clone());
        (controller, surface)
    }

    fn record_states(controller: &SessionController) -> Rc<RefCell<Vec<SessionState>>> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        controller.on_change(Rc::new(move |state: &SessionState| {
            sink.borrow_mut().push(state.clone())
        }));
        seen
    }

    fn account(raw: &str) -> Account {
        Account::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn silent_connect_adopts_authorised_account() -> anyhow::Result<()> {
        let provider = Rc::new(ScriptedProvider::new());
        provider.respond_always("eth_accounts", Ok(json!([ALICE])));
        let (controller, _) = controller(&provider);

        let state = controller.attempt_silent_connect().await?;

        assert_eq!(state, SessionState::Connected(account(ALICE)));
        assert!(provider.calls_to("eth_requestAccounts").is_empty());
        assert!(provider.calls_to("wallet_switchEthereumChain").is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn silent_connect_without_accounts_stays_disconnected() -> anyhow::Result<()> {
        let provider = Rc::new(ScriptedProvider::new());
        provider.respond_always("eth_accounts", Ok(json!([])));
        let (controller, surface) = controller(&provider);

        assert_eq!(controller.attempt_silent_connect().await?, SessionState::Disconnected);
        assert_eq!(surface.current(), None);
        Ok(())
    }

    #[tokio::test]
    async fn silent_connect_without_wallet_is_a_no_op() -> anyhow::Result<()> {
        let surface = ErrorSurface::new();
        let controller =
            SessionController::new(WalletGateway::new(None), &SessionConfig::default(), surface);

        assert_eq!(controller.attempt_silent_connect().await?, SessionState::Disconnected);
        Ok(())
    }

    #[tokio::test]
    async fn user_connect_switches_network_before_requesting_accounts() -> anyhow::Result<()> {
        let provider = Rc::new(ScriptedProvider::new());
        provider.respond("eth_chainId", Ok(json!("0x1")));
        provider.respond("wallet_switchEthereumChain", Ok(json!(null)));
        provider.respond("eth_requestAccounts", Ok(json!([ALICE])));
        let (controller, _) = controller(&provider);
        let seen = record_states(&controller);

        let connected = controller.user_connect().await?;

        assert_eq!(connected, account(ALICE));
        assert_eq!(
            provider.calls_to("wallet_switchEthereumChain"),
            vec![json!([{ "chainId": "0x4" }])]
        );
        assert_eq!(
            *seen.borrow(),
            vec![
                SessionState::ConnectingWallet,
                SessionState::SwitchingNetwork,
                SessionState::ConnectingWallet,
                SessionState::Connected(account(ALICE)),
            ]
        );
        assert_eq!(controller.network(), Some(NetworkId(4)));
        Ok(())
    }

    #[tokio::test]
    async fn user_connect_without_wallet_explains_what_is_missing() {
        let surface = ErrorSurface::new();
        let controller = SessionController::new(
            WalletGateway::new(None),
            &SessionConfig::default(),
            surface.clone(),
        );

        assert_eq!(controller.user_connect().await, Err(SessionError::NoProvider));
        assert_eq!(controller.state(), SessionState::Error(SessionError::NoProvider));
        assert!(surface.current().unwrap().contains("MetaMask"));
    }

    #[tokio::test]
    async fn declined_switch_leaves_wrong_network_error() {
        let provider = Rc::new(ScriptedProvider::new());
        provider.respond("eth_chainId", Ok(json!("0x1")));
        provider.respond(
            "wallet_switchEthereumChain",
            Err(ProviderError::new(USER_REJECTED, "User rejected the request.")),
        );
        let (controller, surface) = controller(&provider);

        assert_eq!(controller.user_connect().await, Err(SessionError::WrongNetwork));
        assert_eq!(controller.state(), SessionState::Error(SessionError::WrongNetwork));
        assert_eq!(
            surface.current().as_deref(),
            Some("You must use the Rinkeby testnet to interact with this app")
        );
        assert!(provider.calls_to("eth_requestAccounts").is_empty());
    }

    #[tokio::test]
    async fn pending_switch_aborts_quietly() {
        let provider = Rc::new(ScriptedProvider::new());
        provider.respond("eth_chainId", Ok(json!("0x1")));
        provider.respond(
            "wallet_switchEthereumChain",
            Err(ProviderError::new(REQUEST_PENDING, "already pending")),
        );
        let (controller, surface) = controller(&provider);

        assert_eq!(
            controller.user_connect().await,
            Err(SessionError::NetworkSwitchPending)
        );
        assert_eq!(controller.state(), SessionState::Disconnected);
        assert_eq!(surface.current(), None);
    }

    #[tokio::test]
    async fn pending_switch_on_the_gate_keeps_the_session_and_can_retry() -> anyhow::Result<()> {
        let provider = Rc::new(ScriptedProvider::new());
        provider.respond_always("eth_accounts", Ok(json!([ALICE])));
        provider.respond_always("eth_chainId", Ok(json!("0x4")));
        let (controller, surface) = controller(&provider);
        controller.attempt_silent_connect().await?;

        provider.respond("eth_chainId", Ok(json!("0x1")));
        provider.respond(
            "wallet_switchEthereumChain",
            Err(ProviderError::new(REQUEST_PENDING, "already pending")),
        );
        assert_eq!(
            controller.ensure_network().await,
            Err(SessionError::NetworkSwitchPending)
        );
        assert_eq!(controller.state(), SessionState::Connected(account(ALICE)));
        assert_eq!(surface.current(), None);

        controller.ensure_network().await?;
        assert_eq!(provider.calls_to("wallet_switchEthereumChain").len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn rejected_account_request_returns_to_disconnected() {
        let provider = Rc::new(ScriptedProvider::new());
        provider.respond("eth_chainId", Ok(json!("0x4")));
        provider.respond(
            "eth_requestAccounts",
            Err(ProviderError::new(USER_REJECTED, "User rejected the request.")),
        );
        let (controller, surface) = controller(&provider);

        assert_eq!(controller.user_connect().await, Err(SessionError::UserRejected));
        assert_eq!(controller.state(), SessionState::Disconnected);
        assert_eq!(surface.current(), None);
    }

    #[tokio::test]
    async fn network_gate_switches_at_most_once() -> anyhow::Result<()> {
        let provider = Rc::new(ScriptedProvider::new());
        provider.respond("eth_chainId", Ok(json!("0x4")));
        provider.respond("eth_chainId", Ok(json!("0x1")));
        provider.respond("wallet_switchEthereumChain", Ok(json!(null)));
        let (controller, _) = controller(&provider);

        controller.ensure_network().await?;
        assert!(provider.calls_to("wallet_switchEthereumChain").is_empty());

        controller.ensure_network().await?;
        assert_eq!(provider.calls_to("wallet_switchEthereumChain").len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn network_gate_refusal_keeps_session() -> anyhow::Result<()> {
        let provider = Rc::new(ScriptedProvider::new());
        provider.respond_always("eth_accounts", Ok(json!([ALICE])));
        provider.respond("eth_chainId", Ok(json!("0x1")));
        provider.respond(
            "wallet_switchEthereumChain",
            Err(ProviderError::new(USER_REJECTED, "no")),
        );
        let (controller, surface) = controller(&provider);
        controller.attempt_silent_connect().await?;

        assert_eq!(controller.ensure_network().await, Err(SessionError::WrongNetwork));
        assert_eq!(controller.state(), SessionState::Connected(account(ALICE)));
        assert!(surface.current().unwrap().contains("Rinkeby"));
        Ok(())
    }

    #[tokio::test]
    async fn account_events_follow_the_wallet() -> anyhow::Result<()> {
        let provider = Rc::new(ScriptedProvider::new());
        provider.respond_always("eth_accounts", Ok(json!([ALICE])));
        let (controller, _) = controller(&provider);
        controller.attempt_silent_connect().await?;

        controller.handle_event(&ProviderEvent::AccountsChanged(vec![BOB.to_owned()]));
        assert_eq!(controller.state(), SessionState::Connected(account(BOB)));

        controller.handle_event(&ProviderEvent::AccountsChanged(Vec::new()));
        assert_eq!(controller.state(), SessionState::Disconnected);
        Ok(())
    }

    #[tokio::test]
    async fn chain_events_are_recorded() {
        let provider = Rc::new(ScriptedProvider::new());
        let (controller, _) = controller(&provider);

        controller.handle_event(&ProviderEvent::ChainChanged("0x1".into()));
        assert_eq!(controller.network(), Some(NetworkId(1)));

        controller.handle_event(&ProviderEvent::ChainChanged("garbage".into()));
        assert_eq!(controller.network(), Some(NetworkId(1)));
    }

    #[tokio::test]
    async fn signer_requires_a_connected_session() {
        let provider = Rc::new(ScriptedProvider::new());
        let (controller, _) = controller(&provider);

        assert!(matches!(
            controller.signer().await,
            Err(SessionError::NotConnected)
        ));
        assert_eq!(provider.call_count(), 0);
    }
}
