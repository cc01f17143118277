//! legacy transaction wire format
//!
//! message = header | keys | recent blockhash | instructions, with compact-u16
//! length prefixes. signatures are placed in the same order as the first
//! `num_required_signatures` keys.

use crate::keys::Pubkey;
use crate::program::AccountMeta;
use crate::{PortalError, Result};

pub const SIGNATURE_LEN: usize = 64;

/// largest serialized transaction a validator accepts
pub const PACKET_DATA_SIZE: usize = 1232;

/// compact-u16 length prefix
///
/// lengths come from messages that passed `Message::compile`, which keeps them
/// far below `u16::MAX`.
pub(crate) fn encode_len(out: &mut Vec<u8>, len: usize) {
    debug_assert!(len <= u16::MAX as usize, "compact-u16 overflow: {}", len);
    let mut rem = len as u16;
    loop {
        let mut byte = (rem & 0x7f) as u8;
        rem >>= 7;
        if rem == 0 {
            out.push(byte);
            break;
        }
        byte |= 0x80;
        out.push(byte);
    }
}

pub(crate) fn decode_len(data: &[u8]) -> Result<(usize, usize)> {
    let mut value = 0usize;
    for (i, byte) in data.iter().take(3).enumerate() {
        value |= ((byte & 0x7f) as usize) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(PortalError::Decoding("bad compact-u16 length".into()))
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MessageHeader {
    pub num_required_signatures: u8,
    pub num_readonly_signed: u8,
    pub num_readonly_unsigned: u8,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompiledInstruction {
    pub program_id_index: u8,
    pub accounts: Vec<u8>,
    pub data: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub header: MessageHeader,
    pub account_keys: Vec<Pubkey>,
    pub recent_blockhash: [u8; 32],
    pub instructions: Vec<CompiledInstruction>,
}

impl Message {
    /// compile a single instruction message with `payer` as fee payer
    pub fn compile(
        payer: Pubkey,
        program_id: Pubkey,
        metas: &[AccountMeta],
        data: Vec<u8>,
        recent_blockhash: [u8; 32],
    ) -> Result<Self> {
        if data.len() > PACKET_DATA_SIZE {
            return Err(PortalError::Transaction(format!(
                "instruction data is {} bytes, limit is {}",
                data.len(),
                PACKET_DATA_SIZE
            )));
        }

        // merge duplicate keys, payer first
        let mut merged: Vec<AccountMeta> = vec![AccountMeta::writable(payer, true)];
        for meta in metas
            .iter()
            .copied()
            .chain(std::iter::once(AccountMeta::readonly(program_id, false)))
        {
            match merged.iter_mut().find(|m| m.pubkey == meta.pubkey) {
                Some(existing) => {
                    existing.is_signer |= meta.is_signer;
                    existing.is_writable |= meta.is_writable;
                }
                None => merged.push(meta),
            }
        }

        // stable partition: signed writable, signed readonly, unsigned writable, unsigned readonly
        let rank = |m: &AccountMeta| match (m.is_signer, m.is_writable) {
            (true, true) => 0,
            (true, false) => 1,
            (false, true) => 2,
            (false, false) => 3,
        };
        let payer_meta = merged.remove(0);
        merged.sort_by_key(rank);
        merged.insert(0, payer_meta);

        if merged.len() > u8::MAX as usize {
            return Err(PortalError::Transaction("too many accounts".into()));
        }

        let header = MessageHeader {
            num_required_signatures: merged.iter().filter(|m| m.is_signer).count() as u8,
            num_readonly_signed: merged.iter().filter(|m| m.is_signer && !m.is_writable).count() as u8,
            num_readonly_unsigned: merged.iter().filter(|m| !m.is_signer && !m.is_writable).count()
                as u8,
        };
        let account_keys: Vec<Pubkey> = merged.iter().map(|m| m.pubkey).collect();
        let index_of = |key: &Pubkey| {
            account_keys
                .iter()
                .position(|k| k == key)
                .map(|i| i as u8)
                .ok_or_else(|| PortalError::Transaction(format!("missing key {}", key)))
        };

        let instruction = CompiledInstruction {
            program_id_index: index_of(&program_id)?,
            accounts: metas.iter().map(|m| index_of(&m.pubkey)).collect::<Result<_>>()?,
            data,
        };

        let message = Self {
            header,
            account_keys,
            recent_blockhash,
            instructions: vec![instruction],
        };
        let size = Transaction::new_unsigned(message.clone()).serialize().len();
        if size > PACKET_DATA_SIZE {
            return Err(PortalError::Transaction(format!(
                "transaction is {} bytes, limit is {}",
                size, PACKET_DATA_SIZE
            )));
        }
        Ok(message)
    }

    /// keys that must sign, in signature order
    pub fn signers(&self) -> &[Pubkey] {
        &self.account_keys[..self.header.num_required_signatures as usize]
    }

    pub fn is_writable(&self, index: usize) -> bool {
        let h = &self.header;
        let signed = h.num_required_signatures as usize;
        if index < signed {
            index < signed - h.num_readonly_signed as usize
        } else {
            index < self.account_keys.len() - h.num_readonly_unsigned as usize
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = vec![
            self.header.num_required_signatures,
            self.header.num_readonly_signed,
            self.header.num_readonly_unsigned,
        ];
        encode_len(&mut out, self.account_keys.len());
        for key in &self.account_keys {
            out.extend_from_slice(key.as_bytes());
        }
        out.extend_from_slice(&self.recent_blockhash);
        encode_len(&mut out, self.instructions.len());
        for ix in &self.instructions {
            out.push(ix.program_id_index);
            encode_len(&mut out, ix.accounts.len());
            out.extend_from_slice(&ix.accounts);
            encode_len(&mut out, ix.data.len());
            out.extend_from_slice(&ix.data);
        }
        out
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        let mut reader = Reader { data, pos: 0 };
        let header = MessageHeader {
            num_required_signatures: reader.byte()?,
            num_readonly_signed: reader.byte()?,
            num_readonly_unsigned: reader.byte()?,
        };
        let key_count = reader.len()?;
        let mut account_keys = Vec::with_capacity(key_count);
        for _ in 0..key_count {
            account_keys.push(Pubkey::new(reader.array()?));
        }
        let recent_blockhash = reader.array()?;
        let ix_count = reader.len()?;
        let mut instructions = Vec::with_capacity(ix_count);
        for _ in 0..ix_count {
            let program_id_index = reader.byte()?;
            let n = reader.len()?;
            let accounts = reader.take(n)?.to_vec();
            let n = reader.len()?;
            let data = reader.take(n)?.to_vec();
            instructions.push(CompiledInstruction { program_id_index, accounts, data });
        }
        Ok(Self { header, account_keys, recent_blockhash, instructions })
    }
}

/// message plus signatures
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub signatures: Vec<[u8; SIGNATURE_LEN]>,
    pub message: Message,
}

impl Transaction {
    pub fn new_unsigned(message: Message) -> Self {
        let n = message.header.num_required_signatures as usize;
        Self {
            signatures: vec![[0u8; SIGNATURE_LEN]; n],
            message,
        }
    }

    /// place a signature produced by `signer` over the serialized message
    pub fn add_signature(&mut self, signer: &Pubkey, signature: [u8; SIGNATURE_LEN]) -> Result<()> {
        let slot = self
            .message
            .signers()
            .iter()
            .position(|k| k == signer)
            .ok_or_else(|| PortalError::Signing(format!("{} is not a required signer", signer)))?;
        self.signatures[slot] = signature;
        Ok(())
    }

    pub fn is_fully_signed(&self) -> bool {
        self.signatures.iter().all(|s| s.iter().any(|b| *b != 0))
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        encode_len(&mut out, self.signatures.len());
        for sig in &self.signatures {
            out.extend_from_slice(sig);
        }
        out.extend_from_slice(&self.message.serialize());
        out
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        let (count, used) = decode_len(data)?;
        let mut reader = Reader { data, pos: used };
        let mut signatures = Vec::with_capacity(count);
        for _ in 0..count {
            signatures.push(reader.array()?);
        }
        let message = Message::deserialize(&data[reader.pos..])?;
        Ok(Self { signatures, message })
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos + n;
        let out = self
            .data
            .get(self.pos..end)
            .ok_or_else(|| PortalError::Decoding("transaction truncated".into()))?;
        self.pos = end;
        Ok(out)
    }

    fn byte(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn len(&mut self) -> Result<usize> {
        let rest = self.data.get(self.pos..).unwrap_or_default();
        let (value, used) = decode_len(rest)?;
        self.pos += used;
        Ok(value)
    }
}
