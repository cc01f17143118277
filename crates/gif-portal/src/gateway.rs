//! remote account gateway
//!
//! stateless facade over a `ProgramRuntime`. every call builds a new calling
//! context from the session, is bounded by the configured timeout and can be
//! cancelled. failures are logged here and handed back to the caller, never
//! retried.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::call::bounded;
use crate::config::GatewayConfig;
use crate::keys::{Keypair, Pubkey};
use crate::program::{BaseAccount, BoardInstruction};
use crate::runtime::{CallingContext, ProgramCall, ProgramRuntime};
use crate::session::IdentitySession;
use crate::{PortalError, Result};

/// result of reading the board account
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FetchOutcome {
    Found(BaseAccount),
    /// no account at the address yet, the normal first-run state
    NotFound,
}

pub struct RemoteAccountGateway {
    runtime: Arc<dyn ProgramRuntime>,
    config: GatewayConfig,
}

impl RemoteAccountGateway {
    pub fn new(runtime: Arc<dyn ProgramRuntime>, config: GatewayConfig) -> Self {
        Self { runtime, config }
    }

    /// address of the board account this gateway was configured with
    pub fn base_account(&self) -> Pubkey {
        self.config.base_account_address()
    }

    fn context(&self, session: &IdentitySession) -> Result<CallingContext> {
        let payer = session.identity().ok_or(PortalError::NotConnected)?;
        let wallet = session.provider().ok_or(PortalError::NoWalletProvider)?;
        Ok(CallingContext {
            endpoint: self.config.rpc_endpoint.clone(),
            commitment: self.config.commitment,
            payer,
            wallet,
        })
    }

    /// read and decode the board account
    pub async fn fetch_collection(
        &self,
        session: &IdentitySession,
        address: &Pubkey,
        cancel: &CancellationToken,
    ) -> Result<FetchOutcome> {
        let ctx = self.context(session)?;
        let fetched = bounded(
            cancel,
            self.config.call_timeout,
            "fetch collection",
            self.runtime.fetch_account(&ctx, address),
        )
        .await;

        let outcome = match fetched {
            Ok(Some(data)) => BaseAccount::decode(&data).map(FetchOutcome::Found),
            Ok(None) => Ok(FetchOutcome::NotFound),
            Err(e) => Err(e),
        };

        match &outcome {
            Ok(FetchOutcome::Found(account)) => {
                debug!("fetched {} with {} entries", address, account.gif_list.len())
            }
            Ok(FetchOutcome::NotFound) => debug!("{} not provisioned yet", address),
            Err(e) => warn!("fetching {} failed: {}", address, e),
        }
        outcome
    }

    /// one-time creation of the board account, co-signed by its keypair
    pub async fn initialize_account(
        &self,
        session: &IdentitySession,
        address: &Pubkey,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let base = self.config.base_account.clone();
        if base.pubkey() != *address {
            return Err(PortalError::InvalidAddress(format!(
                "no keypair held for {}",
                address
            )));
        }
        self.submit(session, address, BoardInstruction::StartStuffOff, vec![base], cancel)
            .await
    }

    /// append one link submitted by the bound identity
    pub async fn append_entry(
        &self,
        session: &IdentitySession,
        address: &Pubkey,
        link: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        if link.is_empty() {
            return Err(PortalError::EmptyLink);
        }
        let instruction = BoardInstruction::AddGif { gif_link: link.to_string() };
        self.submit(session, address, instruction, vec![], cancel).await
    }

    async fn submit(
        &self,
        session: &IdentitySession,
        address: &Pubkey,
        instruction: BoardInstruction,
        signers: Vec<Arc<Keypair>>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let ctx = self.context(session)?;
        let method = instruction.method();
        let call = ProgramCall {
            program_id: self.config.program_id,
            accounts: instruction.accounts(*address, ctx.payer),
            instruction,
            signers,
        };

        match bounded(cancel, self.config.call_timeout, method, self.runtime.execute(&ctx, call)).await {
            Ok(signature) => {
                info!("{} on {} confirmed: {}", method, address, signature);
                Ok(signature)
            }
            Err(e) => {
                warn!("{} on {} failed: {}", method, address, e);
                Err(e)
            }
        }
    }
}
