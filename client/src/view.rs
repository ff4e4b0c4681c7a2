use anchor_lang::prelude::Pubkey;

use crate::amount::{from_base_units, SOL_DECIMALS};
use crate::gate::ActionPhase;
use crate::snapshot::PresaleSnapshot;

/// Values read back from the chain in one refresh. Replaced whole.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncedState {
    pub presale: Option<PresaleSnapshot>,
    /// Lamports.
    pub wallet_balance: Option<u64>,
    /// Base units of the presale token held by the wallet.
    pub holding_tokens: Option<u64>,
    /// Read while another action held the gate; may predate its writes.
    pub provisional: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub presale_identifier: u8,
    pub token_mint: Option<Pubkey>,
    pub decimals: u8,
}

/// What the mirror reports as still withdrawable, in UI units.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Withdrawable {
    pub tokens: f64,
    pub sol: f64,
}

/// Read-only view handed to the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalViewState {
    pub synced: SyncedState,
    pub selection: Selection,
    pub transaction_pending: bool,
    pub phase: ActionPhase,
    pub sol_usd: Option<f64>,
    pub withdrawable: Withdrawable,
}

impl LocalViewState {
    pub fn wallet_balance_sol(&self) -> Option<f64> {
        self.synced
            .wallet_balance
            .map(|lamports| from_base_units(lamports, SOL_DECIMALS))
    }

    pub fn holding_tokens_ui(&self) -> Option<f64> {
        self.synced
            .holding_tokens
            .map(|amount| from_base_units(amount, self.selection.decimals))
    }
}
