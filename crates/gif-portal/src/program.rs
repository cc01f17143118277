//! link board program interface
//!
//! account layout and instruction encoding of the on-chain program. both follow
//! anchor conventions: an 8 byte discriminator taken from a sha256 of a
//! namespaced name, followed by borsh data.

use borsh::{BorshDeserialize, BorshSerialize};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::keys::Pubkey;
use crate::{PortalError, Result};

/// system program, owner of freshly created accounts
pub const SYSTEM_PROGRAM_ID: Pubkey = Pubkey::new([0u8; 32]);

pub const DISCRIMINATOR_LEN: usize = 8;

/// one submitted link
#[derive(Clone, Debug, PartialEq, Eq, Serialize, BorshSerialize, BorshDeserialize)]
pub struct Entry {
    pub link: String,
    pub submitter: Pubkey,
}

/// decoded state of the board account
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct BaseAccount {
    pub total_gifs: u64,
    pub gif_list: Vec<Entry>,
}

fn discriminator(namespace: &str, name: &str) -> [u8; DISCRIMINATOR_LEN] {
    let hash = Sha256::digest(format!("{}:{}", namespace, name).as_bytes());
    let mut out = [0u8; DISCRIMINATOR_LEN];
    out.copy_from_slice(&hash[..DISCRIMINATOR_LEN]);
    out
}

impl BaseAccount {
    pub fn discriminator() -> [u8; DISCRIMINATOR_LEN] {
        discriminator("account", "BaseAccount")
    }

    /// decode raw account data; trailing bytes are allocation padding
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < DISCRIMINATOR_LEN {
            return Err(PortalError::Decoding(format!(
                "account data too short: {} bytes",
                data.len()
            )));
        }
        let (tag, mut body) = data.split_at(DISCRIMINATOR_LEN);
        if tag != Self::discriminator() {
            return Err(PortalError::Decoding("account discriminator mismatch".into()));
        }
        Self::deserialize(&mut body).map_err(|e| PortalError::Decoding(e.to_string()))
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Self::discriminator().to_vec();
        // writing into a vec cannot fail
        let _ = BorshSerialize::serialize(self, &mut out);
        out
    }
}

/// role of an account in an instruction
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AccountMeta {
    pub pubkey: Pubkey,
    pub is_signer: bool,
    pub is_writable: bool,
}

impl AccountMeta {
    pub fn writable(pubkey: Pubkey, is_signer: bool) -> Self {
        Self { pubkey, is_signer, is_writable: true }
    }

    pub fn readonly(pubkey: Pubkey, is_signer: bool) -> Self {
        Self { pubkey, is_signer, is_writable: false }
    }
}

/// program methods
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BoardInstruction {
    /// create the board account
    StartStuffOff,
    /// append one link
    AddGif { gif_link: String },
}

impl BoardInstruction {
    pub fn method(&self) -> &'static str {
        match self {
            BoardInstruction::StartStuffOff => "start_stuff_off",
            BoardInstruction::AddGif { .. } => "add_gif",
        }
    }

    pub fn data(&self) -> Vec<u8> {
        let mut out = discriminator("global", self.method()).to_vec();
        if let BoardInstruction::AddGif { gif_link } = self {
            let _ = BorshSerialize::serialize(gif_link, &mut out);
        }
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < DISCRIMINATOR_LEN {
            return Err(PortalError::Decoding("instruction data too short".into()));
        }
        let (tag, mut args) = data.split_at(DISCRIMINATOR_LEN);
        if tag == discriminator("global", "start_stuff_off") {
            Ok(BoardInstruction::StartStuffOff)
        } else if tag == discriminator("global", "add_gif") {
            let gif_link =
                String::deserialize(&mut args).map_err(|e| PortalError::Decoding(e.to_string()))?;
            Ok(BoardInstruction::AddGif { gif_link })
        } else {
            Err(PortalError::Decoding("unknown instruction".into()))
        }
    }

    /// account list the program expects for this method
    pub fn accounts(&self, base_account: Pubkey, user: Pubkey) -> Vec<AccountMeta> {
        match self {
            BoardInstruction::StartStuffOff => vec![
                AccountMeta::writable(base_account, true),
                AccountMeta::writable(user, true),
                AccountMeta::readonly(SYSTEM_PROGRAM_ID, false),
            ],
            BoardInstruction::AddGif { .. } => vec![
                AccountMeta::writable(base_account, false),
                AccountMeta::writable(user, true),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BaseAccount {
        BaseAccount {
            total_gifs: 2,
            gif_list: vec![
                Entry { link: "https://example.com/a.gif".into(), submitter: Pubkey::new([1; 32]) },
                Entry { link: "https://example.com/b.gif".into(), submitter: Pubkey::new([2; 32]) },
            ],
        }
    }

    #[test]
    fn test_decode_with_padding() {
        let mut data = sample().encode();
        data.resize(9000, 0);
        assert_eq!(BaseAccount::decode(&data).unwrap(), sample());
    }

    #[test]
    fn test_decode_preserves_order() {
        let decoded = BaseAccount::decode(&sample().encode()).unwrap();
        let links: Vec<_> = decoded.gif_list.iter().map(|e| e.link.as_str()).collect();
        assert_eq!(links, ["https://example.com/a.gif", "https://example.com/b.gif"]);
    }

    #[test]
    fn test_decode_malformed() {
        assert!(BaseAccount::decode(&[1, 2, 3]).unwrap_err().is_malformed());

        let mut wrong_tag = sample().encode();
        wrong_tag[0] ^= 1;
        assert!(BaseAccount::decode(&wrong_tag).unwrap_err().is_malformed());

        let truncated = &sample().encode()[..20];
        assert!(BaseAccount::decode(truncated).unwrap_err().is_malformed());
    }

    #[test]
    fn test_instruction_layout() {
        let add = BoardInstruction::AddGif { gif_link: "x".into() };
        let data = add.data();
        // discriminator + u32 length + 1 byte
        assert_eq!(data.len(), 8 + 4 + 1);
        assert_eq!(&data[8..12], &1u32.to_le_bytes());
        assert_eq!(BoardInstruction::decode(&data).unwrap(), add);

        let init = BoardInstruction::StartStuffOff;
        assert_eq!(init.data().len(), 8);
        assert_ne!(init.data(), add.data()[..8].to_vec());
    }

    #[test]
    fn test_account_roles() {
        let base = Pubkey::new([9; 32]);
        let user = Pubkey::new([3; 32]);

        let init = BoardInstruction::StartStuffOff.accounts(base, user);
        assert!(init[0].is_signer && init[0].is_writable);
        assert_eq!(init[2].pubkey, SYSTEM_PROGRAM_ID);

        let add = BoardInstruction::AddGif { gif_link: "x".into() }.accounts(base, user);
        assert!(!add[0].is_signer);
        assert!(add[1].is_signer);
    }
}
