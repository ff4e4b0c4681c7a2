use anchor_lang::prelude::Pubkey;
use anchor_spl::associated_token::get_associated_token_address;
use log::{debug, info, warn};

use crate::client::PresaleClient;
use crate::error::{ClientError, Result};
use crate::mirror::{
    CurrentPresaleMirror, CurrentPresaleResponse, CurrentPresaleUpdate, MirrorApi,
    WalletPresaleRecord,
};
use crate::navigation::{Navigator, Route};
use crate::pda::{derive_address, SeedTag};
use crate::price::PriceIndex;
use crate::rpc::ChainRpc;
use crate::snapshot::PresaleSnapshot;
use crate::view::{SyncedState, Withdrawable};

impl<R, M, P, N> PresaleClient<R, M, P, N>
where
    R: ChainRpc,
    M: MirrorApi,
    P: PriceIndex,
    N: Navigator,
{
    /// Loads the selected presale, stores it in the view and moves to the
    /// explore view once the presale is live with inventory.
    pub async fn fetch_presale_info(&self) -> Result<PresaleSnapshot> {
        let identifier = self.selection.read().await.presale_identifier;
        let snapshot = self.load_presale(identifier).await?;
        self.synced.write().await.presale = Some(snapshot.clone());
        self.explore_if_ready(&snapshot);
        Ok(snapshot)
    }

    pub(crate) async fn load_presale(&self, identifier: u8) -> Result<PresaleSnapshot> {
        let (address, _) = derive_address(&self.program_id, SeedTag::PresaleInfo, identifier, None);
        debug!("presale {identifier} at {address}");

        let rpc = &self.rpc;
        let data = self
            .config
            .retry
            .retry("presale info", move || async move {
                rpc.get_account_data(&address)
                    .await?
                    .ok_or(ClientError::AccountNotFound(address))
            })
            .await?;

        let snapshot = PresaleSnapshot::decode(&data)?;
        debug!(
            "presale {} sold {}/{} deposit {}",
            snapshot.presale_identifier,
            snapshot.sold_token_amount,
            snapshot.hardcap_amount,
            snapshot.deposit_token_amount
        );
        Ok(snapshot)
    }

    fn explore_if_ready(&self, snapshot: &PresaleSnapshot) {
        if snapshot.should_explore() {
            info!("presale {} is funded, opening explore", snapshot.presale_identifier);
            self.navigator.navigate(Route::Explore);
        }
    }

    /// Lamports held by the connected wallet.
    pub async fn fetch_wallet_balance(&self) -> Result<u64> {
        let wallet = self.session().await?.wallet();
        let balance = self.rpc.get_balance(&wallet).await?;
        self.synced.write().await.wallet_balance = Some(balance);
        Ok(balance)
    }

    /// Presale tokens held by the connected wallet, in base units.
    pub async fn fetch_holding_tokens(&self) -> Result<Option<u64>> {
        let wallet = self.session().await?.wallet();
        let mint = self.holding_mint().await?;
        let holding = self.holding_of(&wallet, &mint).await?;
        self.synced.write().await.holding_tokens = holding;
        Ok(holding)
    }

    async fn holding_mint(&self) -> Result<Pubkey> {
        let presale_mint = self
            .synced
            .read()
            .await
            .presale
            .as_ref()
            .map(|p| p.token_mint_address);
        match presale_mint {
            Some(mint) => Ok(mint),
            None => self.require_mint().await,
        }
    }

    async fn holding_of(&self, wallet: &Pubkey, mint: &Pubkey) -> Result<Option<u64>> {
        let token_account = get_associated_token_address(wallet, mint);
        self.rpc.get_token_balance(&token_account).await
    }

    /// Rebuilds the synced view from the chain and swaps it in whole. On any
    /// read failure the previous view is kept. A refresh overlapping an action
    /// is marked provisional.
    pub async fn refresh(&self) -> Result<SyncedState> {
        self.rebuild_synced(false).await
    }

    /// `owns_gate` is set when the caller is the action holding the gate.
    pub(crate) async fn rebuild_synced(&self, owns_gate: bool) -> Result<SyncedState> {
        let overlapped = || !owns_gate && self.gate.is_pending();
        let started_during_action = overlapped();
        let identifier = self.selection.read().await.presale_identifier;
        let presale = self.load_presale(identifier).await?;

        let wallet = self.session.read().await.as_ref().map(|s| s.wallet());
        let (wallet_balance, holding_tokens) = match wallet {
            Some(wallet) => {
                let balance = self.rpc.get_balance(&wallet).await?;
                let holding = self.holding_of(&wallet, &presale.token_mint_address).await?;
                (Some(balance), holding)
            }
            None => (None, None),
        };

        let provisional = started_during_action || overlapped();
        if provisional {
            debug!("refresh overlapped a pending action, view is provisional");
        }
        let state = SyncedState {
            presale: Some(presale),
            wallet_balance,
            holding_tokens,
            provisional,
        };
        *self.synced.write().await = state.clone();
        if let Some(presale) = &state.presale {
            self.explore_if_ready(presale);
        }
        Ok(state)
    }

    pub async fn fetch_presale_record_from_db(&self) -> Result<Option<WalletPresaleRecord>> {
        let wallet = self.session().await?.wallet();
        self.mirror.presale_record(&wallet).await
    }

    pub async fn current_presale_from_db(&self) -> Result<CurrentPresaleResponse> {
        self.mirror.current_presale().await
    }

    /// The normalized current presale, or `None` when the mirror has none or
    /// cannot be reached.
    pub async fn fetch_current_presale_info(&self) -> Option<CurrentPresaleMirror> {
        match self.mirror.current_presale().await {
            Ok(response) => response.into_presale(),
            Err(err) => {
                warn!("current presale unavailable: {err}");
                None
            }
        }
    }

    /// Makes `identifier` the mirror's current presale.
    pub async fn set_current_presale_in_db(&self, identifier: u8) -> Result<()> {
        self.mirror
            .update_current(&CurrentPresaleUpdate::select(identifier))
            .await
    }

    pub async fn withdrawable_tokens_and_sol(&self) -> Result<Withdrawable> {
        let current = self
            .mirror
            .current_presale()
            .await?
            .into_presale()
            .ok_or(ClientError::MirrorUnavailable)?;
        Ok(Withdrawable {
            tokens: current.deposit_token_amount.unwrap_or(0.0),
            sol: current.received_sol_amount.unwrap_or(0.0),
        })
    }
}
