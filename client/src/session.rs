use std::sync::Arc;

use anchor_client::solana_sdk::signature::{Keypair, Signer};
use anchor_lang::prelude::Pubkey;

/// A connected wallet bound to the presale program. Created on connect and
/// dropped on disconnect.
#[derive(Clone)]
pub struct SessionContext {
    wallet: Arc<Keypair>,
    program_id: Pubkey,
}

impl SessionContext {
    pub fn new(wallet: Arc<Keypair>, program_id: Pubkey) -> Self {
        Self { wallet, program_id }
    }

    pub fn wallet(&self) -> Pubkey {
        self.wallet.pubkey()
    }

    pub fn signer(&self) -> &Keypair {
        &self.wallet
    }

    pub fn program_id(&self) -> Pubkey {
        self.program_id
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("wallet", &self.wallet())
            .field("program_id", &self.program_id)
            .finish()
    }
}
