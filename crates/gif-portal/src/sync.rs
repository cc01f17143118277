//! collection synchronizer
//!
//! keeps the local view of the board equal to the last snapshot read from the
//! remote account. nothing is ever appended locally: every successful mutation
//! is followed by a full refetch, and only fetch results change the state.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::gateway::{FetchOutcome, RemoteAccountGateway};
use crate::program::Entry;
use crate::session::IdentitySession;
use crate::{PortalError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MutationKind {
    Initialize,
    Append,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutationKind::Initialize => f.write_str("initialize-account"),
            MutationKind::Append => f.write_str("append-entry"),
        }
    }
}

/// local view of the remote board
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum CollectionState {
    /// nothing fetched yet
    #[default]
    Unknown,
    /// no board account exists
    Unprovisioned,
    /// last read failed; the account may or may not exist
    Unreachable { reason: String },
    Empty,
    /// entries in remote order
    Populated(Vec<Entry>),
}

impl CollectionState {
    pub fn entries(&self) -> &[Entry] {
        match self {
            CollectionState::Populated(entries) => entries,
            _ => &[],
        }
    }

    pub fn is_provisioned(&self) -> bool {
        matches!(self, CollectionState::Empty | CollectionState::Populated(_))
    }
}

/// clears the in-flight flag when the mutation finishes, however it finishes
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool, kind: MutationKind) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| PortalError::MutationInFlight(kind))?;
        Ok(Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct CollectionSynchronizer {
    gateway: Arc<RemoteAccountGateway>,
    session: Arc<IdentitySession>,
    state: watch::Sender<CollectionState>,
    fetch_seq: AtomicU64,
    /// sequence of the newest fetch whose result was published
    applied_seq: AtomicU64,
    initializing: AtomicBool,
    appending: AtomicBool,
}

impl CollectionSynchronizer {
    pub fn new(gateway: Arc<RemoteAccountGateway>, session: Arc<IdentitySession>) -> Self {
        let (state, _) = watch::channel(CollectionState::Unknown);
        Self {
            gateway,
            session,
            state,
            fetch_seq: AtomicU64::new(0),
            applied_seq: AtomicU64::new(0),
            initializing: AtomicBool::new(false),
            appending: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> CollectionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CollectionState> {
        self.state.subscribe()
    }

    /// wait for the session to bind, then issue the first fetch
    ///
    /// binding is terminal, so this fetches once and returns.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut identity = self.session.subscribe();
        let bound = tokio::select! {
            _ = cancel.cancelled() => false,
            res = identity.wait_for(|id| id.is_some()) => res.is_ok(),
        };
        if bound {
            info!("identity bound, loading collection");
            self.refresh(&cancel).await;
        }
    }

    /// full re-read of the board; returns the state afterwards
    pub async fn refresh(&self, cancel: &CancellationToken) -> CollectionState {
        if !self.session.is_bound() {
            return self.state();
        }

        let seq = self.fetch_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let address = self.gateway.base_account();
        let next = match self.gateway.fetch_collection(&self.session, &address, cancel).await {
            Ok(FetchOutcome::NotFound) => CollectionState::Unprovisioned,
            Ok(FetchOutcome::Found(account)) if account.gif_list.is_empty() => CollectionState::Empty,
            Ok(FetchOutcome::Found(account)) => CollectionState::Populated(account.gif_list),
            Err(PortalError::Cancelled(_)) => return self.state(),
            Err(e) => CollectionState::Unreachable { reason: e.to_string() },
        };

        // a newer fetch that never lands does not hold back an older result
        let applied = self.state.send_if_modified(|current| {
            if seq <= self.applied_seq.load(Ordering::SeqCst) {
                return false;
            }
            self.applied_seq.store(seq, Ordering::SeqCst);
            *current = next.clone();
            true
        });
        if applied {
            debug!("fetch #{} -> {:?}", seq, next);
            next
        } else {
            debug!("dropping stale fetch #{}", seq);
            self.state()
        }
    }

    /// one-time provisioning of the board, then refetch
    pub async fn initialize(&self, cancel: &CancellationToken) -> Result<()> {
        match *self.state.borrow() {
            CollectionState::Unprovisioned => {}
            CollectionState::Empty | CollectionState::Populated(_) => {
                return Err(PortalError::AlreadyProvisioned)
            }
            _ => return Err(PortalError::NotLoaded),
        }
        let _guard = InFlight::acquire(&self.initializing, MutationKind::Initialize)?;

        let address = self.gateway.base_account();
        self.gateway.initialize_account(&self.session, &address, cancel).await?;
        info!("board {} created", address);
        self.refresh(cancel).await;
        Ok(())
    }

    /// append `link`, then refetch; on failure the state is left as it was
    pub async fn append_entry(&self, link: String, cancel: &CancellationToken) -> Result<()> {
        match *self.state.borrow() {
            CollectionState::Empty | CollectionState::Populated(_) => {}
            CollectionState::Unprovisioned => return Err(PortalError::NotProvisioned),
            _ => return Err(PortalError::NotLoaded),
        }
        let _guard = InFlight::acquire(&self.appending, MutationKind::Append)?;

        let address = self.gateway.base_account();
        self.gateway.append_entry(&self.session, &address, &link, cancel).await?;
        info!("link submitted: {}", link);
        self.refresh(cancel).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::GatewayConfig;
    use crate::keys::{Keypair, Pubkey};
    use crate::memory::InMemoryRuntime;
    use crate::notice::Notifier;
    use crate::program::BaseAccount;
    use crate::wallet::{KeypairWallet, WalletProvider};

    fn setup(trusted: bool) -> (Arc<InMemoryRuntime>, Arc<IdentitySession>, Arc<CollectionSynchronizer>) {
        let runtime = Arc::new(InMemoryRuntime::new());
        let config = GatewayConfig::new(Pubkey::new([7; 32]), Keypair::generate());
        let gateway = Arc::new(RemoteAccountGateway::new(runtime.clone(), config));

        let mut wallet = KeypairWallet::new(Keypair::generate());
        if trusted {
            wallet = wallet.trusted();
        }
        let wallet: Arc<dyn WalletProvider> = Arc::new(wallet);
        let (notifier, _) = Notifier::channel();
        let session = Arc::new(IdentitySession::new(Some(wallet), notifier));
        let sync = Arc::new(CollectionSynchronizer::new(gateway, session.clone()));
        (runtime, session, sync)
    }

    #[tokio::test]
    async fn test_unbound_never_fetches() {
        let (runtime, _session, sync) = setup(false);
        assert_eq!(sync.refresh(&CancellationToken::new()).await, CollectionState::Unknown);
        assert_eq!(runtime.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_run_fetches_after_bind() {
        let (runtime, session, sync) = setup(true);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(sync.clone().run(cancel.clone()));

        session.attempt_silent_connect(&cancel).await.unwrap();
        task.await.unwrap();

        assert_eq!(runtime.fetch_count(), 1);
        assert_eq!(sync.state(), CollectionState::Unprovisioned);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let (runtime, _session, sync) = setup(true);
        let cancel = CancellationToken::new();
        cancel.cancel();
        sync.clone().run(cancel).await;
        assert_eq!(runtime.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_fetch_failures_are_unreachable() {
        let (runtime, session, sync) = setup(true);
        let cancel = CancellationToken::new();
        session.attempt_silent_connect(&cancel).await;

        runtime.fail_next_fetch(PortalError::Network("connection refused".into()));
        assert!(matches!(sync.refresh(&cancel).await, CollectionState::Unreachable { .. }));

        runtime.put_account(sync.gateway.base_account(), vec![1, 2, 3]);
        assert!(matches!(sync.refresh(&cancel).await, CollectionState::Unreachable { .. }));
    }

    #[tokio::test]
    async fn test_populated_verbatim() {
        let (runtime, session, sync) = setup(true);
        let cancel = CancellationToken::new();
        session.attempt_silent_connect(&cancel).await;

        let entries = vec![
            Entry { link: "b".into(), submitter: Pubkey::new([2; 32]) },
            Entry { link: "a".into(), submitter: Pubkey::new([1; 32]) },
            Entry { link: "b".into(), submitter: Pubkey::new([2; 32]) },
        ];
        let account = BaseAccount { total_gifs: 3, gif_list: entries.clone() };
        runtime.put_account(sync.gateway.base_account(), account.encode());

        assert_eq!(sync.refresh(&cancel).await, CollectionState::Populated(entries));
    }

    #[tokio::test]
    async fn test_initialize_refetches() {
        let (runtime, session, sync) = setup(true);
        let cancel = CancellationToken::new();
        session.attempt_silent_connect(&cancel).await;
        sync.refresh(&cancel).await;

        sync.initialize(&cancel).await.unwrap();
        assert_eq!(sync.state(), CollectionState::Empty);
        assert_eq!(runtime.fetch_count(), 2);

        assert!(matches!(sync.initialize(&cancel).await, Err(PortalError::AlreadyProvisioned)));
        assert_eq!(runtime.execute_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_append_keeps_state() {
        let (runtime, session, sync) = setup(true);
        let cancel = CancellationToken::new();
        session.attempt_silent_connect(&cancel).await;
        sync.refresh(&cancel).await;
        sync.initialize(&cancel).await.unwrap();
        let before = sync.state();
        let fetches = runtime.fetch_count();

        runtime.fail_next_execute(PortalError::Network("timeout".into()));
        assert!(sync.append_entry("x".into(), &cancel).await.is_err());
        assert_eq!(sync.state(), before);
        assert_eq!(runtime.fetch_count(), fetches);
    }

    #[tokio::test]
    async fn test_append_requires_board() {
        let (runtime, session, sync) = setup(true);
        let cancel = CancellationToken::new();
        session.attempt_silent_connect(&cancel).await;
        sync.refresh(&cancel).await;

        let err = sync.append_entry("x".into(), &cancel).await.unwrap_err();
        assert!(matches!(err, PortalError::NotProvisioned));
        assert_eq!(runtime.execute_count(), 0);
    }

    #[tokio::test]
    async fn test_mutations_need_loaded_state() {
        let (runtime, session, sync) = setup(true);
        let cancel = CancellationToken::new();
        session.attempt_silent_connect(&cancel).await;

        assert!(matches!(sync.initialize(&cancel).await, Err(PortalError::NotLoaded)));
        runtime.fail_next_fetch(PortalError::Network("connection refused".into()));
        sync.refresh(&cancel).await;
        assert!(matches!(sync.append_entry("x".into(), &cancel).await, Err(PortalError::NotLoaded)));
        assert_eq!(runtime.execute_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_append_rejected() {
        let (runtime, session, sync) = setup(true);
        let cancel = CancellationToken::new();
        session.attempt_silent_connect(&cancel).await;
        sync.refresh(&cancel).await;
        sync.initialize(&cancel).await.unwrap();

        runtime.set_latency(Some(Duration::from_secs(2)));
        let first = tokio::spawn({
            let sync = sync.clone();
            let cancel = cancel.clone();
            async move { sync.append_entry("first".into(), &cancel).await }
        });
        // let the first call reach the runtime
        tokio::time::sleep(Duration::from_millis(10)).await;

        let err = sync.append_entry("second".into(), &cancel).await.unwrap_err();
        assert!(matches!(err, PortalError::MutationInFlight(MutationKind::Append)));

        first.await.unwrap().unwrap();
        assert_eq!(sync.state().entries().len(), 1);
        assert_eq!(runtime.execute_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_newer_fetch_does_not_hide_append() {
        let (runtime, session, sync) = setup(true);
        let cancel = CancellationToken::new();
        session.attempt_silent_connect(&cancel).await;
        sync.refresh(&cancel).await;
        sync.initialize(&cancel).await.unwrap();

        runtime.set_latency(Some(Duration::from_secs(2)));
        let append = tokio::spawn({
            let sync = sync.clone();
            let cancel = cancel.clone();
            async move { sync.append_entry("https://example.com/a.gif".into(), &cancel).await }
        });

        // execute lands at 2s, the refetch is outstanding until 4s
        tokio::time::sleep(Duration::from_millis(2500)).await;
        let abort = CancellationToken::new();
        let manual = tokio::spawn({
            let sync = sync.clone();
            let abort = abort.clone();
            async move { sync.refresh(&abort).await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        abort.cancel();
        manual.await.unwrap();

        append.await.unwrap().unwrap();
        let entries = sync.state().entries().to_vec();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].link, "https://example.com/a.gif");
    }

    #[tokio::test(start_paused = true)]
    async fn test_older_fetch_never_overwrites_newer() {
        let (runtime, session, sync) = setup(true);
        let cancel = CancellationToken::new();
        session.attempt_silent_connect(&cancel).await;
        sync.refresh(&cancel).await;
        sync.initialize(&cancel).await.unwrap();

        // first fetch is slow
        runtime.set_latency(Some(Duration::from_secs(2)));
        let slow = tokio::spawn({
            let sync = sync.clone();
            let cancel = cancel.clone();
            async move { sync.refresh(&cancel).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        // second fetch starts later and lands first
        runtime.set_latency(None);
        let entry = Entry { link: "b".into(), submitter: Pubkey::new([3; 32]) };
        let account = BaseAccount { total_gifs: 1, gif_list: vec![entry.clone()] };
        runtime.put_account(sync.gateway.base_account(), account.encode());
        assert_eq!(sync.refresh(&cancel).await, CollectionState::Populated(vec![entry.clone()]));

        // the slow fetch reads after this and is dropped as stale
        runtime.put_account(sync.gateway.base_account(), BaseAccount::default().encode());
        slow.await.unwrap();
        assert_eq!(sync.state(), CollectionState::Populated(vec![entry]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_fetch_keeps_state() {
        let (runtime, session, sync) = setup(true);
        let cancel = CancellationToken::new();
        session.attempt_silent_connect(&cancel).await;
        sync.refresh(&cancel).await;

        runtime.set_latency(Some(Duration::from_secs(2)));
        let abort = CancellationToken::new();
        let pending = tokio::spawn({
            let sync = sync.clone();
            let abort = abort.clone();
            async move { sync.refresh(&abort).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        abort.cancel();

        assert_eq!(pending.await.unwrap(), CollectionState::Unprovisioned);
        assert_eq!(sync.state(), CollectionState::Unprovisioned);
    }
}
