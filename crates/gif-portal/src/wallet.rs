//! wallet provider capability
//!
//! a provider hands out a public identity on connect and signs messages for
//! that identity. `only_if_trusted` connects never prompt: they succeed only
//! when the provider remembers an earlier approval.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::keys::{Keypair, Pubkey};
use crate::{PortalError, Result};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConnectOptions {
    pub only_if_trusted: bool,
}

impl ConnectOptions {
    pub fn silent() -> Self {
        Self { only_if_trusted: true }
    }

    pub fn interactive() -> Self {
        Self { only_if_trusted: false }
    }
}

#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// request a connection, may prompt unless `only_if_trusted`
    async fn connect(&self, options: ConnectOptions) -> Result<Pubkey>;

    /// sign a serialized transaction message as the connected identity
    async fn sign_message(&self, message: &[u8]) -> Result<[u8; 64]>;

    fn name(&self) -> &str;
}

/// decides whether an interactive connect is granted
pub type Approver = Arc<dyn Fn(&Pubkey) -> bool + Send + Sync>;

/// provider backed by a local keypair
///
/// trust is remembered in memory and, when a trust file is configured, on disk
/// so a later process can reconnect silently.
pub struct KeypairWallet {
    keypair: Keypair,
    trusted: AtomicBool,
    connected: AtomicBool,
    trust_file: Option<PathBuf>,
    approver: Approver,
}

impl KeypairWallet {
    pub fn new(keypair: Keypair) -> Self {
        Self {
            keypair,
            trusted: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            trust_file: None,
            approver: Arc::new(|_: &Pubkey| true),
        }
    }

    /// remember approval in `path`; trusted if the file names this wallet
    pub fn with_trust_file(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let trusted = std::fs::read_to_string(&path)
            .map(|marker| marker.trim() == self.pubkey().to_string())
            .unwrap_or(false);
        self.trusted = AtomicBool::new(trusted);
        self.trust_file = Some(path);
        self
    }

    pub fn with_approver(mut self, approver: Approver) -> Self {
        self.approver = approver;
        self
    }

    /// mark as previously approved
    pub fn trusted(self) -> Self {
        self.trusted.store(true, Ordering::SeqCst);
        self
    }

    pub fn is_trusted(&self) -> bool {
        self.trusted.load(Ordering::SeqCst)
    }

    pub fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    fn remember_trust(&self) -> Result<()> {
        self.trusted.store(true, Ordering::SeqCst);
        if let Some(path) = &self.trust_file {
            std::fs::write(path, self.pubkey().to_string())
                .map_err(|e| PortalError::Io(format!("{}: {}", path.display(), e)))?;
        }
        Ok(())
    }
}

#[async_trait]
impl WalletProvider for KeypairWallet {
    async fn connect(&self, options: ConnectOptions) -> Result<Pubkey> {
        let pubkey = self.pubkey();

        if options.only_if_trusted {
            if !self.is_trusted() {
                debug!("silent connect refused, {} not trusted yet", pubkey);
                return Err(PortalError::NotTrusted);
            }
        } else if !self.is_trusted() {
            // the approver may block on a human, keep it off the async workers
            let approver = self.approver.clone();
            let approved = tokio::task::spawn_blocking(move || approver(&pubkey))
                .await
                .map_err(|e| PortalError::ConnectionRejected(format!("approval aborted: {}", e)))?;
            if !approved {
                return Err(PortalError::ConnectionRejected("user declined the request".into()));
            }
            self.remember_trust()?;
            info!("connection approved for {}", pubkey);
        }

        self.connected.store(true, Ordering::SeqCst);
        Ok(pubkey)
    }

    async fn sign_message(&self, message: &[u8]) -> Result<[u8; 64]> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(PortalError::Signing("wallet not connected".into()));
        }
        Ok(self.keypair.sign(message))
    }

    fn name(&self) -> &str {
        "keypair"
    }
}
