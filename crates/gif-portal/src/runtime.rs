//! remote program runtime capability
//!
//! a runtime reads raw account data and executes signed program calls. it knows
//! nothing about the board layout; decoding happens in the gateway.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Commitment;
use crate::keys::{Keypair, Pubkey};
use crate::program::{AccountMeta, BoardInstruction};
use crate::transaction::{Message, Transaction};
use crate::wallet::WalletProvider;
use crate::{PortalError, Result};

/// network, commitment and signer for one remote call
///
/// built fresh for every call, never cached.
#[derive(Clone)]
pub struct CallingContext {
    pub endpoint: String,
    pub commitment: Commitment,
    /// bound identity, pays fees and signs
    pub payer: Pubkey,
    pub wallet: Arc<dyn WalletProvider>,
}

impl std::fmt::Debug for CallingContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallingContext")
            .field("endpoint", &self.endpoint)
            .field("commitment", &self.commitment)
            .field("payer", &self.payer)
            .field("wallet", &self.wallet.name())
            .finish()
    }
}

/// one program method invocation
#[derive(Clone, Debug)]
pub struct ProgramCall {
    pub program_id: Pubkey,
    pub instruction: BoardInstruction,
    pub accounts: Vec<AccountMeta>,
    /// local keypairs co-signing besides the wallet
    pub signers: Vec<Arc<Keypair>>,
}

impl ProgramCall {
    pub fn method(&self) -> &'static str {
        self.instruction.method()
    }
}

#[async_trait]
pub trait ProgramRuntime: Send + Sync {
    /// raw account data, `None` when no account exists at `address`
    async fn fetch_account(&self, ctx: &CallingContext, address: &Pubkey) -> Result<Option<Vec<u8>>>;

    /// submit a signed call, returns the transaction signature
    async fn execute(&self, ctx: &CallingContext, call: ProgramCall) -> Result<String>;
}

/// compile `call` into a transaction signed by the local co-signers and the wallet
pub async fn sign_call(
    ctx: &CallingContext,
    call: &ProgramCall,
    recent_blockhash: [u8; 32],
) -> Result<Transaction> {
    let message = Message::compile(
        ctx.payer,
        call.program_id,
        &call.accounts,
        call.instruction.data(),
        recent_blockhash,
    )?;
    let bytes = message.serialize();
    let mut tx = Transaction::new_unsigned(message);

    for signer in &call.signers {
        tx.add_signature(&signer.pubkey(), signer.sign(&bytes))?;
    }
    let signature = ctx.wallet.sign_message(&bytes).await?;
    tx.add_signature(&ctx.payer, signature)?;

    if !tx.is_fully_signed() {
        return Err(PortalError::Signing(format!("{} is missing signatures", call.method())));
    }
    Ok(tx)
}
