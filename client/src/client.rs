use std::sync::Arc;

use anchor_client::solana_sdk::signature::{Keypair, Signature};
use anchor_lang::prelude::Pubkey;
use anchor_lang::solana_program::instruction::Instruction;
use log::{debug, info, warn};
use tokio::sync::{watch, Mutex, RwLock};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::gate::{ActionPhase, PendingGate, PendingGuard};
use crate::mirror::{HttpMirror, MirrorApi};
use crate::navigation::{NoNavigation, Navigator};
use crate::outbox::{FlushReport, MirrorWrite, Outbox, PendingWrite};
use crate::price::{CoinGecko, PriceIndex, PricePoller};
use crate::rpc::{ChainRpc, SolanaRpc};
use crate::session::SessionContext;
use crate::view::{LocalViewState, Selection, SyncedState, Withdrawable};

/// One user session against the presale program and its mirror backend.
///
/// Mutating actions are serialized by a single pending gate. Reads may run
/// alongside them.
pub struct PresaleClient<R, M, P, N = NoNavigation> {
    pub(crate) config: ClientConfig,
    pub(crate) program_id: Pubkey,
    pub(crate) rpc: R,
    pub(crate) mirror: M,
    pub(crate) prices: Arc<P>,
    pub(crate) navigator: N,
    pub(crate) session: RwLock<Option<SessionContext>>,
    pub(crate) selection: RwLock<Selection>,
    pub(crate) synced: RwLock<SyncedState>,
    pub(crate) withdrawable: RwLock<Withdrawable>,
    pub(crate) gate: PendingGate,
    outbox: Mutex<Outbox>,
    pub(crate) sol_usd: Arc<watch::Sender<Option<f64>>>,
    poller: Mutex<Option<PricePoller>>,
}

impl PresaleClient<SolanaRpc, HttpMirror, CoinGecko, NoNavigation> {
    pub fn from_config(config: ClientConfig) -> Result<Self> {
        let rpc = SolanaRpc::new(
            config.rpc_url.clone(),
            config.commitment()?,
            config.confirm_poll_interval(),
        );
        let mirror = HttpMirror::new(config.api_base_url.clone());
        let prices = CoinGecko::new(config.price_api_url.clone());
        Self::new(config, rpc, mirror, prices, NoNavigation)
    }
}

impl<R, M, P, N> PresaleClient<R, M, P, N>
where
    R: ChainRpc,
    M: MirrorApi,
    P: PriceIndex,
    N: Navigator,
{
    pub fn new(config: ClientConfig, rpc: R, mirror: M, prices: P, navigator: N) -> Result<Self> {
        config.validate()?;
        let program_id = config.program_id()?;
        let selection = Selection {
            presale_identifier: config.default_presale_identifier,
            token_mint: config.token_mint()?,
            decimals: config.default_decimals,
        };
        let outbox = match &config.outbox_path {
            Some(path) => Outbox::open(path)?,
            None => Outbox::in_memory(),
        }
        .with_max_attempts(config.outbox_max_attempts);
        let (sol_usd, _) = watch::channel(None);
        Ok(Self {
            config,
            program_id,
            rpc,
            mirror,
            prices: Arc::new(prices),
            navigator,
            session: RwLock::new(None),
            selection: RwLock::new(selection),
            synced: RwLock::new(SyncedState::default()),
            withdrawable: RwLock::new(Withdrawable::default()),
            gate: PendingGate::default(),
            outbox: Mutex::new(outbox),
            sol_usd: Arc::new(sol_usd),
            poller: Mutex::new(None),
        })
    }

    pub fn program_id(&self) -> Pubkey {
        self.program_id
    }

    pub fn rpc(&self) -> &R {
        &self.rpc
    }

    pub fn mirror(&self) -> &M {
        &self.mirror
    }

    /// Binds a wallet, loads the active presale selection from the mirror and
    /// starts the SOL price poll.
    pub async fn connect(&self, wallet: Arc<Keypair>) -> Result<()> {
        let session = SessionContext::new(wallet, self.program_id);
        info!("wallet {} connected", session.wallet());
        *self.session.write().await = Some(session);

        self.load_selection_from_mirror().await;

        let poller = PricePoller::spawn(
            Arc::clone(&self.prices),
            self.config.price_poll_interval(),
            Arc::clone(&self.sol_usd),
        );
        *self.poller.lock().await = Some(poller);

        if let Err(err) = self.refresh().await {
            warn!("initial refresh failed: {err}");
        }
        let report = self.flush_outbox().await;
        if !report.is_clean() {
            warn!("{} mirror writes still pending", report.remaining);
        }
        Ok(())
    }

    pub async fn disconnect(&self) {
        if let Some(session) = self.session.write().await.take() {
            info!("wallet {} disconnected", session.wallet());
        }
        self.poller.lock().await.take();
        *self.synced.write().await = SyncedState::default();
        *self.withdrawable.write().await = Withdrawable::default();
    }

    async fn load_selection_from_mirror(&self) {
        match self.mirror.current_presale().await {
            Ok(response) => {
                if let Some(current) = response.into_presale() {
                    let mut selection = self.selection.write().await;
                    if let Some(decimals) = current.decimals() {
                        info!("decimals from current presale: {decimals}");
                        selection.decimals = decimals;
                    }
                    if selection.token_mint.is_none() {
                        selection.token_mint = current.token_mint();
                    }
                }
            }
            Err(err) => warn!("could not load current presale: {err}"),
        }
        match self.mirror.presale_identifier().await {
            Ok(Some(identifier)) => self.selection.write().await.presale_identifier = identifier,
            Ok(None) => {}
            Err(err) => warn!("could not load presale identifier: {err}"),
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.session.read().await.is_some()
    }

    pub fn is_transaction_pending(&self) -> bool {
        self.gate.is_pending()
    }

    pub fn phase(&self) -> ActionPhase {
        self.gate.phase()
    }

    pub fn sol_usd(&self) -> Option<f64> {
        *self.sol_usd.borrow()
    }

    pub fn subscribe_sol_usd(&self) -> watch::Receiver<Option<f64>> {
        self.sol_usd.subscribe()
    }

    pub async fn view(&self) -> LocalViewState {
        LocalViewState {
            synced: self.synced.read().await.clone(),
            selection: self.selection.read().await.clone(),
            transaction_pending: self.gate.is_pending(),
            phase: self.gate.phase(),
            sol_usd: self.sol_usd(),
            withdrawable: *self.withdrawable.read().await,
        }
    }

    pub async fn set_presale_identifier(&self, identifier: u8) -> Result<()> {
        let _guard = self.gate.try_begin().ok_or(ClientError::TransactionPending)?;
        self.selection.write().await.presale_identifier = identifier;
        Ok(())
    }

    pub async fn set_token_mint(&self, mint: Pubkey) -> Result<()> {
        let _guard = self.gate.try_begin().ok_or(ClientError::TransactionPending)?;
        info!("token mint set to {mint}");
        self.selection.write().await.token_mint = Some(mint);
        Ok(())
    }

    pub(crate) async fn session(&self) -> Result<SessionContext> {
        self.session.read().await.clone().ok_or(ClientError::NotInitialized)
    }

    pub(crate) async fn require_mint(&self) -> Result<Pubkey> {
        self.selection.read().await.token_mint.ok_or(ClientError::MintUnknown)
    }

    /// Submits one instruction and waits, bounded, for its confirmation.
    pub(crate) async fn submit_and_confirm(
        &self,
        session: &SessionContext,
        guard: &PendingGuard<'_>,
        instruction: Instruction,
    ) -> Result<Signature> {
        guard.advance(ActionPhase::Submitting);
        let signature = self.rpc.submit(instruction, session.signer()).await?;

        guard.advance(ActionPhase::Confirming);
        let timeout = self.config.confirm_timeout();
        match tokio::time::timeout(timeout, self.rpc.confirm(&signature)).await {
            Ok(confirmed) => confirmed?,
            Err(_) => return Err(ClientError::ConfirmationTimeout(signature, timeout)),
        }
        info!("transaction {signature} confirmed");
        Ok(signature)
    }

    pub(crate) async fn enqueue_and_flush(
        &self,
        signature: &Signature,
        writes: Vec<MirrorWrite>,
    ) -> FlushReport {
        let mut outbox = self.outbox.lock().await;
        if let Err(err) = outbox.enqueue(&signature.to_string(), writes) {
            warn!("{err}");
        }
        let report = outbox.flush(&self.mirror).await;
        if !report.is_clean() {
            warn!(
                "mirror behind chain for {signature}: {} writes pending",
                report.remaining
            );
        }
        report
    }

    /// Base for the wallet's absolute deposit total. Queued writes are flushed
    /// first. A total still queued after that wins over the stored record.
    pub(crate) async fn deposit_total_base(&self, wallet: &Pubkey) -> Result<f64> {
        let mut outbox = self.outbox.lock().await;
        outbox.flush(&self.mirror).await;
        if let Some(total) = outbox.pending_deposit_total(&wallet.to_string()) {
            debug!("deposit total for {wallet} taken from queued write: {total}");
            return Ok(total);
        }
        drop(outbox);
        let record = self.mirror.presale_record(wallet).await?;
        Ok(record.and_then(|r| r.deposit_token_amount).unwrap_or(0.0))
    }

    /// Retries mirror writes left over from earlier actions.
    pub async fn flush_outbox(&self) -> FlushReport {
        self.outbox.lock().await.flush(&self.mirror).await
    }

    pub async fn pending_writes(&self) -> usize {
        self.outbox.lock().await.len()
    }

    pub async fn dead_letters(&self) -> Vec<PendingWrite> {
        self.outbox.lock().await.dead_letters().to_vec()
    }
}
