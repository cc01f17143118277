//! portal facade
//!
//! wires the identity session, gateway, synchronizer and input staging
//! together and exposes what a presentation layer needs: actions, a read
//! model and a stream of user notices.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::GatewayConfig;
use crate::gateway::RemoteAccountGateway;
use crate::keys::Pubkey;
use crate::notice::{Notice, Notifier};
use crate::program::Entry;
use crate::runtime::ProgramRuntime;
use crate::session::IdentitySession;
use crate::staging::InputStaging;
use crate::sync::{CollectionState, CollectionSynchronizer};
use crate::wallet::WalletProvider;
use crate::{PortalError, Result};

/// what the presentation layer should render
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "view", rename_all = "snake_case")]
pub enum View {
    /// no identity bound, offer the connect action
    Connect,
    /// bound, first fetch outstanding
    Loading,
    /// board account missing, offer the one-time initialize action
    Initialize,
    /// last fetch failed, offer a retry
    Retry { reason: String },
    Board { entries: Vec<Entry>, pending_input: String },
}

pub struct Portal {
    session: Arc<IdentitySession>,
    gateway: Arc<RemoteAccountGateway>,
    sync: Arc<CollectionSynchronizer>,
    staging: Mutex<InputStaging>,
    notifier: Notifier,
}

impl Portal {
    /// build a portal; the receiver yields every notice meant for the user
    pub fn new(
        provider: Option<Arc<dyn WalletProvider>>,
        runtime: Arc<dyn ProgramRuntime>,
        config: GatewayConfig,
    ) -> (Self, mpsc::UnboundedReceiver<Notice>) {
        let (notifier, notices) = Notifier::channel();
        let session = Arc::new(IdentitySession::new(provider, notifier.clone()));
        let gateway = Arc::new(RemoteAccountGateway::new(runtime, config));
        let sync = Arc::new(CollectionSynchronizer::new(gateway.clone(), session.clone()));

        let portal = Self {
            session,
            gateway,
            sync,
            staging: Mutex::new(InputStaging::new()),
            notifier,
        };
        (portal, notices)
    }

    pub fn session(&self) -> &IdentitySession {
        &self.session
    }

    pub fn synchronizer(&self) -> &CollectionSynchronizer {
        &self.sync
    }

    pub fn board_address(&self) -> Pubkey {
        self.gateway.base_account()
    }

    /// spawn the task that loads the board once an identity is bound
    pub fn start(&self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.sync.clone().run(cancel))
    }

    /// host ready signal: try to reconnect a trusted wallet without prompting
    pub async fn on_ready(&self, cancel: &CancellationToken) -> Option<Pubkey> {
        self.session.attempt_silent_connect(cancel).await
    }

    pub async fn connect(&self, cancel: &CancellationToken) -> Result<Pubkey> {
        self.session.request_explicit_connect(cancel).await
    }

    /// wait until the first fetch after binding has landed
    pub async fn loaded(&self, cancel: &CancellationToken) -> Result<CollectionState> {
        let mut state = self.sync.subscribe();
        tokio::select! {
            _ = cancel.cancelled() => Err(PortalError::Cancelled("load")),
            res = state.wait_for(|s| *s != CollectionState::Unknown) => {
                res.map(|s| s.clone()).map_err(|_| PortalError::Cancelled("load"))
            }
        }
    }

    pub async fn refresh(&self, cancel: &CancellationToken) -> CollectionState {
        self.sync.refresh(cancel).await
    }

    pub async fn initialize(&self, cancel: &CancellationToken) -> Result<()> {
        let res = self.sync.initialize(cancel).await;
        self.report("could not create the board", &res);
        res
    }

    pub fn set_input(&self, text: impl Into<String>) {
        self.staging.lock().set_input(text);
    }

    /// submit the pending input
    ///
    /// the input is cleared before the remote call starts and is not restored
    /// if the call fails.
    pub async fn submit(&self, cancel: &CancellationToken) -> Result<()> {
        let Some(link) = self.staging.lock().submit() else {
            debug!("empty submission ignored");
            self.notifier.notify(Notice::info("no link given"));
            return Err(PortalError::EmptyLink);
        };
        let res = self.sync.append_entry(link, cancel).await;
        self.report("could not add link", &res);
        res
    }

    pub fn view(&self) -> View {
        if !self.session.is_bound() {
            return View::Connect;
        }
        match self.sync.state() {
            CollectionState::Unknown => View::Loading,
            CollectionState::Unprovisioned => View::Initialize,
            CollectionState::Unreachable { reason } => View::Retry { reason },
            CollectionState::Empty => View::Board {
                entries: Vec::new(),
                pending_input: self.staging.lock().pending().to_string(),
            },
            CollectionState::Populated(entries) => View::Board {
                entries,
                pending_input: self.staging.lock().pending().to_string(),
            },
        }
    }

    fn report(&self, what: &str, res: &Result<()>) {
        match res {
            Ok(()) | Err(PortalError::Cancelled(_)) => {}
            Err(e @ PortalError::MutationInFlight(_)) => {
                self.notifier.notify(Notice::warning(format!("{}: {}", what, e)))
            }
            Err(e) => self.notifier.notify(Notice::error(format!("{}: {}", what, e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::Keypair;
    use crate::memory::InMemoryRuntime;
    use crate::notice::NoticeLevel;
    use crate::wallet::KeypairWallet;

    fn portal(runtime: Arc<InMemoryRuntime>) -> (Portal, mpsc::UnboundedReceiver<Notice>) {
        let wallet: Arc<dyn WalletProvider> = Arc::new(KeypairWallet::new(Keypair::generate()).trusted());
        let config = GatewayConfig::new(Pubkey::new([7; 32]), Keypair::generate());
        Portal::new(Some(wallet), runtime, config)
    }

    #[tokio::test]
    async fn test_view_follows_lifecycle() {
        let runtime = Arc::new(InMemoryRuntime::new());
        let (portal, _notices) = portal(runtime);
        let cancel = CancellationToken::new();
        assert_eq!(portal.view(), View::Connect);

        portal.on_ready(&cancel).await.unwrap();
        assert_eq!(portal.view(), View::Loading);

        portal.refresh(&cancel).await;
        assert_eq!(portal.view(), View::Initialize);

        portal.initialize(&cancel).await.unwrap();
        portal.set_input("draft");
        assert_eq!(
            portal.view(),
            View::Board { entries: vec![], pending_input: "draft".into() }
        );
    }

    #[tokio::test]
    async fn test_start_loads_after_connect() {
        let runtime = Arc::new(InMemoryRuntime::new());
        let (portal, _notices) = portal(runtime.clone());
        let cancel = CancellationToken::new();

        let task = portal.start(cancel.clone());
        portal.connect(&cancel).await.unwrap();
        assert_eq!(portal.loaded(&cancel).await.unwrap(), CollectionState::Unprovisioned);
        task.await.unwrap();
        assert_eq!(runtime.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_offers_retry() {
        let runtime = Arc::new(InMemoryRuntime::new());
        let (portal, _notices) = portal(runtime.clone());
        let cancel = CancellationToken::new();
        portal.on_ready(&cancel).await;

        runtime.fail_next_fetch(PortalError::Network("connection refused".into()));
        portal.refresh(&cancel).await;
        assert!(matches!(portal.view(), View::Retry { .. }));

        portal.refresh(&cancel).await;
        assert_eq!(portal.view(), View::Initialize);
    }

    #[tokio::test]
    async fn test_failed_initialize_notifies() {
        let runtime = Arc::new(InMemoryRuntime::new());
        let (portal, mut notices) = portal(runtime.clone());
        let cancel = CancellationToken::new();
        portal.on_ready(&cancel).await;
        portal.refresh(&cancel).await;

        runtime.fail_next_execute(PortalError::Transaction("insufficient funds".into()));
        assert!(portal.initialize(&cancel).await.is_err());
        assert_eq!(portal.view(), View::Initialize);

        let notice = notices.try_recv().unwrap();
        assert_eq!(notice.level, NoticeLevel::Error);
        assert!(notice.message.contains("insufficient funds"));
    }

    #[test]
    fn test_view_json() {
        let view = View::Retry { reason: "timeout".into() };
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json, serde_json::json!({ "view": "retry", "reason": "timeout" }));
    }
}
