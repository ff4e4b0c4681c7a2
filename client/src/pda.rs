//! Program-derived addresses for the presale accounts.
//!
//! Every seed set is `[tag, [identifier]]`, with the buyer's key appended for
//! per-buyer records. Derivation is pure, so any component can locate on-chain
//! state without a lookup.

use anchor_lang::prelude::Pubkey;
use anchor_spl::associated_token::get_associated_token_address;
use token_presale::{BUYER_ACCOUNT, PRESALE_SEED, PRESALE_VAULT};

use crate::error::{ClientError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeedTag {
    PresaleInfo,
    PresaleVault,
    BuyerAccount,
}

impl SeedTag {
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            SeedTag::PresaleInfo => PRESALE_SEED,
            SeedTag::PresaleVault => PRESALE_VAULT,
            SeedTag::BuyerAccount => BUYER_ACCOUNT,
        }
    }
}

/// Narrows a wide identifier to the single seed byte the program uses.
pub fn presale_identifier(value: u64) -> Result<u8> {
    u8::try_from(value).map_err(|_| ClientError::InvalidIdentifier(value))
}

pub fn derive_address(
    program_id: &Pubkey,
    tag: SeedTag,
    identifier: u8,
    buyer: Option<&Pubkey>,
) -> (Pubkey, u8) {
    let id = [identifier];
    match buyer {
        Some(buyer) => {
            Pubkey::find_program_address(&[tag.as_bytes(), &id, buyer.as_ref()], program_id)
        }
        None => Pubkey::find_program_address(&[tag.as_bytes(), &id], program_id),
    }
}

/// Accounts shared by every instruction against one presale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresaleAddresses {
    pub presale_info: Pubkey,
    pub presale_vault: Pubkey,
    pub presale_token_account: Pubkey,
}

impl PresaleAddresses {
    pub fn derive(program_id: &Pubkey, identifier: u8, mint: &Pubkey) -> Self {
        let (presale_info, _) = derive_address(program_id, SeedTag::PresaleInfo, identifier, None);
        let (presale_vault, _) =
            derive_address(program_id, SeedTag::PresaleVault, identifier, None);
        Self {
            presale_info,
            presale_vault,
            presale_token_account: get_associated_token_address(&presale_info, mint),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuyerAddresses {
    pub buyer_account: Pubkey,
    pub buyer_token_account: Pubkey,
}

impl BuyerAddresses {
    pub fn derive(program_id: &Pubkey, identifier: u8, buyer: &Pubkey, mint: &Pubkey) -> Self {
        let (buyer_account, _) =
            derive_address(program_id, SeedTag::BuyerAccount, identifier, Some(buyer));
        Self {
            buyer_account,
            buyer_token_account: get_associated_token_address(buyer, mint),
        }
    }
}
