//! in-memory program runtime
//!
//! executes the board program locally against a map of encoded accounts.
//! calls go through the same compile/sign path as the rpc runtime and the
//! signatures are verified, so signer mistakes surface here too. used by the
//! offline demo and by tests, which can inject failures and count calls.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::keys::{verify_signature, Pubkey};
use crate::program::{BaseAccount, BoardInstruction, Entry, SYSTEM_PROGRAM_ID};
use crate::runtime::{sign_call, CallingContext, ProgramCall, ProgramRuntime};
use crate::transaction::Transaction;
use crate::{PortalError, Result};

#[derive(Default)]
pub struct InMemoryRuntime {
    accounts: Mutex<HashMap<Pubkey, Vec<u8>>>,
    fetch_failures: Mutex<VecDeque<PortalError>>,
    execute_failures: Mutex<VecDeque<PortalError>>,
    latency: Mutex<Option<Duration>>,
    fetches: AtomicUsize,
    executions: AtomicUsize,
    slot: AtomicUsize,
}

impl InMemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// overwrite raw account data
    pub fn put_account(&self, address: Pubkey, data: Vec<u8>) {
        self.accounts.lock().insert(address, data);
    }

    pub fn account(&self, address: &Pubkey) -> Option<Vec<u8>> {
        self.accounts.lock().get(address).cloned()
    }

    /// next fetch fails with `err` instead of reading
    pub fn fail_next_fetch(&self, err: PortalError) {
        self.fetch_failures.lock().push_back(err);
    }

    /// next execute fails with `err` before touching state
    pub fn fail_next_execute(&self, err: PortalError) {
        self.execute_failures.lock().push_back(err);
    }

    /// delay every call, to hold calls in flight
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn execute_count(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }

    async fn delay(&self) {
        let latency = *self.latency.lock();
        if let Some(d) = latency {
            tokio::time::sleep(d).await;
        }
    }

    fn apply(&self, program_id: &Pubkey, tx: &Transaction) -> Result<()> {
        let bytes = tx.message.serialize();
        for (signer, sig) in tx.message.signers().iter().zip(&tx.signatures) {
            if !verify_signature(signer, &bytes, sig) {
                return Err(PortalError::Transaction(format!("bad signature for {}", signer)));
            }
        }

        let keys = &tx.message.account_keys;
        let signed = tx.message.header.num_required_signatures as usize;
        for ix in &tx.message.instructions {
            let key = |i: usize| -> Result<(Pubkey, bool, bool)> {
                let idx = *ix.accounts.get(i).ok_or_else(|| {
                    PortalError::Transaction("not enough account keys".into())
                })? as usize;
                let pubkey = *keys
                    .get(idx)
                    .ok_or_else(|| PortalError::Transaction("account index out of range".into()))?;
                Ok((pubkey, idx < signed, tx.message.is_writable(idx)))
            };

            if keys.get(ix.program_id_index as usize) != Some(program_id) {
                return Err(PortalError::Transaction("unknown program".into()));
            }

            let mut accounts = self.accounts.lock();
            match BoardInstruction::decode(&ix.data)? {
                BoardInstruction::StartStuffOff => {
                    let (base, base_signed, base_writable) = key(0)?;
                    let (_, user_signed, _) = key(1)?;
                    let (system, _, _) = key(2)?;
                    if !(base_signed && base_writable && user_signed) || system != SYSTEM_PROGRAM_ID {
                        return Err(PortalError::Transaction("missing required signature".into()));
                    }
                    if accounts.contains_key(&base) {
                        return Err(PortalError::Transaction(format!("account {} already in use", base)));
                    }
                    accounts.insert(base, BaseAccount::default().encode());
                }
                BoardInstruction::AddGif { gif_link } => {
                    let (base, _, base_writable) = key(0)?;
                    let (user, user_signed, _) = key(1)?;
                    if !(base_writable && user_signed) {
                        return Err(PortalError::Transaction("missing required signature".into()));
                    }
                    let data = accounts
                        .get_mut(&base)
                        .ok_or_else(|| PortalError::Transaction(format!("account {} not initialized", base)))?;
                    let mut state = BaseAccount::decode(data.as_slice())?;
                    state.gif_list.push(Entry { link: gif_link, submitter: user });
                    state.total_gifs += 1;
                    *data = state.encode();
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ProgramRuntime for InMemoryRuntime {
    async fn fetch_account(&self, _ctx: &CallingContext, address: &Pubkey) -> Result<Option<Vec<u8>>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        let injected = self.fetch_failures.lock().pop_front();
        if let Some(err) = injected {
            return Err(err);
        }
        Ok(self.account(address))
    }

    async fn execute(&self, ctx: &CallingContext, call: ProgramCall) -> Result<String> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        let injected = self.execute_failures.lock().pop_front();
        if let Some(err) = injected {
            return Err(err);
        }

        let slot = self.slot.fetch_add(1, Ordering::SeqCst) as u64;
        let mut blockhash = [0u8; 32];
        blockhash[..8].copy_from_slice(&slot.to_le_bytes());

        let tx = sign_call(ctx, &call, blockhash).await?;
        self.apply(&call.program_id, &tx)?;
        debug!("executed {} in slot {}", call.method(), slot);
        Ok(bs58::encode(tx.signatures[0]).into_string())
    }
}
