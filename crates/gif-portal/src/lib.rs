//! gif-portal: wallet-gated client for a shared solana link board
//!
//! a bound wallet identity reads and appends to a single anchor account that
//! holds an ordered list of links. the local view is always the last snapshot
//! read from the chain; writes are followed by a full refetch.
//!
//! ## runtimes
//!
//! - `RpcRuntime`: solana json-rpc over http (devnet by default)
//! - `InMemoryRuntime`: executes the board program locally, for tests and the demo
//!
//! ## usage
//!
//! ```rust,ignore
//! let config = PortalConfig::load("portal.toml")?;
//! let wallet = KeypairWallet::new(Keypair::read_file("id.json")?);
//! let (portal, mut notices) = Portal::new(
//!     Some(Arc::new(wallet)),
//!     Arc::new(RpcRuntime::new()),
//!     config.gateway_config()?,
//! );
//!
//! let cancel = CancellationToken::new();
//! portal.start(cancel.clone());
//! portal.on_ready(&cancel).await;
//! portal.connect(&cancel).await?;
//! portal.loaded(&cancel).await?;
//!
//! portal.set_input("https://media.giphy.com/media/xyz/giphy.gif");
//! portal.submit(&cancel).await?;
//! println!("{:?}", portal.view());
//! ```

mod call;
pub mod config;
pub mod error;
pub mod gateway;
pub mod keys;
pub mod memory;
pub mod notice;
pub mod portal;
pub mod program;
pub mod rpc;
pub mod runtime;
pub mod session;
pub mod staging;
pub mod sync;
pub mod transaction;
pub mod wallet;

pub use config::{Cluster, Commitment, GatewayConfig, PortalConfig, WalletConfig};
pub use error::{PortalError, Result};
pub use gateway::{FetchOutcome, RemoteAccountGateway};
pub use keys::{Keypair, Pubkey};
pub use memory::InMemoryRuntime;
pub use notice::{Notice, NoticeLevel, Notifier};
pub use portal::{Portal, View};
pub use program::{BaseAccount, BoardInstruction, Entry};
pub use rpc::RpcRuntime;
pub use runtime::{CallingContext, ProgramCall, ProgramRuntime};
pub use session::{IdentitySession, SessionState};
pub use staging::InputStaging;
pub use sync::{CollectionState, CollectionSynchronizer, MutationKind};
pub use wallet::{ConnectOptions, KeypairWallet, WalletProvider};
