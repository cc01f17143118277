//! cluster endpoints and client configuration

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::keys::{Keypair, Pubkey};
use crate::{PortalError, Result};

/// public solana clusters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Cluster {
    #[default]
    Devnet,
    Testnet,
    MainnetBeta,
    Localnet,
}

impl Cluster {
    pub fn url(&self) -> &'static str {
        match self {
            Cluster::Devnet => "https://api.devnet.solana.com",
            Cluster::Testnet => "https://api.testnet.solana.com",
            Cluster::MainnetBeta => "https://api.mainnet-beta.solana.com",
            Cluster::Localnet => "http://127.0.0.1:8899",
        }
    }
}

/// how settled state must be before a read or preflight accepts it
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
    #[default]
    Processed,
    Confirmed,
    Finalized,
}

impl Commitment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Commitment::Processed => "processed",
            Commitment::Confirmed => "confirmed",
            Commitment::Finalized => "finalized",
        }
    }
}

/// wallet keypair and where its trust marker lives
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct WalletConfig {
    /// keypair file of the user wallet
    pub keypair: Option<PathBuf>,
    /// marker file remembering a granted connection
    pub trust_file: Option<PathBuf>,
}

fn default_timeout_secs() -> u64 {
    30
}

/// on-disk configuration (toml)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PortalConfig {
    #[serde(default)]
    pub cluster: Cluster,
    /// overrides the cluster url when set
    #[serde(default)]
    pub rpc_endpoint: Option<String>,
    #[serde(default)]
    pub commitment: Commitment,
    /// deployed link board program
    pub program_id: Pubkey,
    /// keypair of the well-known board account
    pub base_account_keypair: PathBuf,
    #[serde(default = "default_timeout_secs")]
    pub call_timeout_secs: u64,
    #[serde(default)]
    pub wallet: WalletConfig,
}

impl PortalConfig {
    pub fn from_toml(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        if config.call_timeout_secs == 0 {
            return Err(PortalError::Config("call_timeout_secs must be positive".into()));
        }
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| PortalError::Config(format!("{}: {}", path.display(), e)))?;
        let mut config = Self::from_toml(&contents)?;

        // relative paths are relative to the config file
        if let Some(dir) = path.parent() {
            config.base_account_keypair = dir.join(&config.base_account_keypair);
            config.wallet.keypair = config.wallet.keypair.map(|p| dir.join(p));
            config.wallet.trust_file = config.wallet.trust_file.map(|p| dir.join(p));
        }
        Ok(config)
    }

    /// rpc url in effect
    pub fn endpoint(&self) -> &str {
        self.rpc_endpoint.as_deref().unwrap_or_else(|| self.cluster.url())
    }

    /// resolve into the value handed to the gateway, reading the board keypair
    pub fn gateway_config(&self) -> Result<GatewayConfig> {
        let base_account = Keypair::read_file(&self.base_account_keypair)?;
        Ok(GatewayConfig {
            rpc_endpoint: self.endpoint().to_string(),
            commitment: self.commitment,
            program_id: self.program_id,
            base_account: Arc::new(base_account),
            call_timeout: Duration::from_secs(self.call_timeout_secs),
        })
    }
}

/// everything a gateway needs, fixed at construction
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub rpc_endpoint: String,
    pub commitment: Commitment,
    pub program_id: Pubkey,
    pub base_account: Arc<Keypair>,
    pub call_timeout: Duration,
}

impl GatewayConfig {
    pub fn new(program_id: Pubkey, base_account: Keypair) -> Self {
        Self {
            rpc_endpoint: Cluster::Devnet.url().to_string(),
            commitment: Commitment::Processed,
            program_id,
            base_account: Arc::new(base_account),
            call_timeout: Duration::from_secs(default_timeout_secs()),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// address of the board account
    pub fn base_account_address(&self) -> Pubkey {
        self.base_account.pubkey()
    }
}
