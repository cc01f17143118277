//! identity session
//!
//! `Unbound -> Bound` is the only transition; once bound the identity stays for
//! the lifetime of the session. the bound identity is published on a watch
//! channel so the synchronizer can react to it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::call::cancellable;
use crate::keys::Pubkey;
use crate::notice::{Notice, Notifier};
use crate::wallet::{ConnectOptions, WalletProvider};
use crate::{PortalError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Unbound,
    Bound(Pubkey),
}

pub struct IdentitySession {
    provider: Option<Arc<dyn WalletProvider>>,
    identity: watch::Sender<Option<Pubkey>>,
    notifier: Notifier,
    silent_attempted: AtomicBool,
}

impl IdentitySession {
    /// `provider` is None when the host has no wallet installed
    pub fn new(provider: Option<Arc<dyn WalletProvider>>, notifier: Notifier) -> Self {
        let (identity, _) = watch::channel(None);
        Self {
            provider,
            identity,
            notifier,
            silent_attempted: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> SessionState {
        match *self.identity.borrow() {
            Some(pubkey) => SessionState::Bound(pubkey),
            None => SessionState::Unbound,
        }
    }

    pub fn identity(&self) -> Option<Pubkey> {
        *self.identity.borrow()
    }

    pub fn is_bound(&self) -> bool {
        self.identity().is_some()
    }

    pub fn provider(&self) -> Option<Arc<dyn WalletProvider>> {
        self.provider.clone()
    }

    /// identity changes, starting with the current value
    pub fn subscribe(&self) -> watch::Receiver<Option<Pubkey>> {
        self.identity.subscribe()
    }

    /// reconnect a previously trusted wallet without prompting
    ///
    /// runs at most once per session; later calls just report the current
    /// identity. failures are logged, never surfaced as notices.
    pub async fn attempt_silent_connect(&self, cancel: &CancellationToken) -> Option<Pubkey> {
        if self.silent_attempted.swap(true, Ordering::SeqCst) {
            return self.identity();
        }

        let Some(provider) = &self.provider else {
            debug!("no wallet provider, staying unbound");
            return None;
        };

        match cancellable(cancel, "silent connect", provider.connect(ConnectOptions::silent())).await {
            Ok(pubkey) => {
                info!("{} wallet reconnected as {}", provider.name(), pubkey);
                self.bind(pubkey);
                self.identity()
            }
            Err(e) => {
                debug!("silent connect failed: {}", e);
                None
            }
        }
    }

    /// connect on a user gesture, possibly prompting
    pub async fn request_explicit_connect(&self, cancel: &CancellationToken) -> Result<Pubkey> {
        if let Some(pubkey) = self.identity() {
            return Ok(pubkey);
        }

        let Some(provider) = &self.provider else {
            self.notifier
                .notify(Notice::error("no wallet found, install a wallet provider to connect"));
            return Err(PortalError::NoWalletProvider);
        };

        match cancellable(cancel, "connect", provider.connect(ConnectOptions::interactive())).await {
            Ok(pubkey) => {
                info!("{} wallet connected as {}", provider.name(), pubkey);
                self.bind(pubkey);
                // a concurrent silent connect may have bound first
                Ok(self.identity().unwrap_or(pubkey))
            }
            Err(PortalError::Cancelled(what)) => Err(PortalError::Cancelled(what)),
            Err(e) => {
                warn!("wallet connect failed: {}", e);
                self.notifier.notify(Notice::error(format!("could not connect wallet: {}", e)));
                Err(e)
            }
        }
    }

    fn bind(&self, pubkey: Pubkey) {
        self.identity.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(pubkey);
                true
            } else {
                false
            }
        });
    }
}
