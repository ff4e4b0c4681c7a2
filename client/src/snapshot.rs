use anchor_lang::prelude::Pubkey;
use anchor_lang::AccountDeserialize;
use serde::{Serialize, Serializer};
use token_presale::PresaleInfo;

use crate::error::{ClientError, Result};
use crate::window::SaleWindow;

fn as_base58<S: Serializer>(key: &Pubkey, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_str(key)
}

/// Normalized copy of the on-chain presale record. Amounts are kept in base
/// units, times in seconds since epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresaleSnapshot {
    pub presale_identifier: u8,
    #[serde(serialize_with = "as_base58")]
    pub token_mint_address: Pubkey,
    pub softcap_amount: u64,
    pub hardcap_amount: u64,
    pub deposit_token_amount: u64,
    pub sold_token_amount: u64,
    pub received_sol_amount: u64,
    pub start_time: u64,
    pub end_time: u64,
    pub max_token_amount_per_address: u64,
    pub price_per_token: u64,
    pub decimals: u8,
    pub is_live: bool,
    #[serde(serialize_with = "as_base58")]
    pub authority: Pubkey,
    pub is_soft_capped: bool,
    pub is_hard_capped: bool,
    pub is_initialized: bool,
}

impl PresaleSnapshot {
    /// Decodes raw account data, discriminator included.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut slice = data;
        let info = PresaleInfo::try_deserialize(&mut slice)
            .map_err(|e| ClientError::DataIntegrity(e.to_string()))?;
        Self::try_from(info)
    }

    /// Initialized and funded: the sale can be browsed.
    pub fn should_explore(&self) -> bool {
        self.is_initialized && self.deposit_token_amount > 0
    }

    pub fn progress_percent(&self) -> f64 {
        if self.hardcap_amount == 0 {
            return 0.0;
        }
        (self.sold_token_amount as f64 / self.hardcap_amount as f64 * 100.0).min(100.0)
    }
}

impl TryFrom<PresaleInfo> for PresaleSnapshot {
    type Error = ClientError;

    fn try_from(info: PresaleInfo) -> Result<Self> {
        if info.presale_identifier == 0 {
            return Err(ClientError::DataIntegrity("missing presale identifier".into()));
        }
        if info.token_mint_address == Pubkey::default() {
            return Err(ClientError::DataIntegrity("missing token mint address".into()));
        }
        Ok(Self {
            presale_identifier: info.presale_identifier,
            token_mint_address: info.token_mint_address,
            softcap_amount: info.softcap_amount,
            hardcap_amount: info.hardcap_amount,
            deposit_token_amount: info.deposit_token_amount,
            sold_token_amount: info.sold_token_amount,
            received_sol_amount: info.received_sol_amount,
            start_time: info.start_time,
            end_time: info.end_time,
            max_token_amount_per_address: info.max_token_amount_per_address,
            price_per_token: info.lamport_price_per_token,
            decimals: info.decimals,
            is_live: info.is_live,
            authority: info.authority,
            is_soft_capped: info.is_soft_capped,
            is_hard_capped: info.is_hard_capped,
            is_initialized: info.is_initialized,
        })
    }
}

impl SaleWindow for PresaleSnapshot {
    fn start_time(&self) -> Option<i64> {
        i64::try_from(self.start_time).ok()
    }

    fn end_time(&self) -> Option<i64> {
        i64::try_from(self.end_time).ok()
    }
}
