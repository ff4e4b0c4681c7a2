#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anchor_client::solana_sdk::signature::{Keypair, Signature, Signer};
use anchor_lang::prelude::Pubkey;
use anchor_lang::solana_program::instruction::Instruction;
use anchor_lang::AccountSerialize;
use anchor_spl::associated_token::get_associated_token_address;
use presale_client::mirror::{
    BuyPost, CurrentPresaleMirror, CurrentPresaleResponse, CurrentPresaleUpdate,
    PresaleRecordUpsert, TokenActivityPost, WalletPresaleRecord,
};
use presale_client::pda::{derive_address, SeedTag};
use presale_client::{
    ChainRpc, ClientConfig, ClientError, MirrorApi, Navigator, PresaleClient, PriceIndex, Result,
    Route,
};
use serde_json::Value;
use token_presale::PresaleInfo;

pub const IDENTIFIER: u8 = 1;
pub const DECIMALS: u8 = 6;

#[derive(Debug, Clone, Default)]
pub enum ConfirmMode {
    #[default]
    Confirmed,
    Rejected(String),
    Hang,
    After(Duration),
}

#[derive(Default)]
pub struct FakeChain {
    pub accounts: Mutex<HashMap<Pubkey, Vec<u8>>>,
    pub balances: Mutex<HashMap<Pubkey, u64>>,
    pub token_balances: Mutex<HashMap<Pubkey, u64>>,
    /// Token balances applied once a submitted transaction confirms.
    pub after_confirm: Mutex<Vec<(Pubkey, u64)>>,
    pub submitted: Mutex<Vec<Instruction>>,
    pub submit_error: Mutex<Option<String>>,
    pub confirm_mode: Mutex<ConfirmMode>,
    /// Reads of program accounts reported as missing before the data shows up.
    pub missing_reads: AtomicU32,
    pub account_reads: AtomicU32,
}

impl FakeChain {
    pub fn put_presale(&self, program_id: &Pubkey, info: &PresaleInfo) {
        let (address, _) =
            derive_address(program_id, SeedTag::PresaleInfo, info.presale_identifier, None);
        let mut data = Vec::new();
        info.try_serialize(&mut data).unwrap();
        self.accounts.lock().unwrap().insert(address, data);
    }

    pub fn submissions(&self) -> usize {
        self.submitted.lock().unwrap().len()
    }

    pub fn last_instruction(&self) -> Instruction {
        self.submitted.lock().unwrap().last().cloned().unwrap()
    }
}

impl ChainRpc for FakeChain {
    async fn get_account_data(&self, address: &Pubkey) -> Result<Option<Vec<u8>>> {
        self.account_reads.fetch_add(1, Ordering::SeqCst);
        let missing = self
            .missing_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if missing {
            return Ok(None);
        }
        Ok(self.accounts.lock().unwrap().get(address).cloned())
    }

    async fn get_balance(&self, address: &Pubkey) -> Result<u64> {
        Ok(self.balances.lock().unwrap().get(address).copied().unwrap_or(0))
    }

    async fn get_token_balance(&self, token_account: &Pubkey) -> Result<Option<u64>> {
        Ok(self.token_balances.lock().unwrap().get(token_account).copied())
    }

    async fn submit(&self, instruction: Instruction, _payer: &Keypair) -> Result<Signature> {
        if let Some(err) = self.submit_error.lock().unwrap().clone() {
            return Err(ClientError::Rpc(err));
        }
        self.submitted.lock().unwrap().push(instruction);
        Ok(Signature::new_unique())
    }

    async fn confirm(&self, _signature: &Signature) -> Result<()> {
        let mode = self.confirm_mode.lock().unwrap().clone();
        match mode {
            ConfirmMode::Confirmed => {}
            ConfirmMode::Rejected(reason) => return Err(ClientError::InstructionFailed(reason)),
            ConfirmMode::Hang => std::future::pending::<()>().await,
            ConfirmMode::After(delay) => tokio::time::sleep(delay).await,
        }
        let updates: Vec<_> = self.after_confirm.lock().unwrap().drain(..).collect();
        self.token_balances.lock().unwrap().extend(updates);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeMirror {
    pub current: Mutex<CurrentPresaleResponse>,
    pub identifier: Mutex<Option<u8>>,
    pub record: Mutex<Option<WalletPresaleRecord>>,
    /// Number of upcoming writes to reject.
    pub fail_writes: AtomicU32,
    pub writes: Mutex<Vec<(&'static str, Value)>>,
}

impl FakeMirror {
    pub fn set_current(&self, presale: CurrentPresaleMirror) {
        *self.current.lock().unwrap() = CurrentPresaleResponse {
            success: true,
            presale_info: Some(presale),
            message: None,
        };
    }

    pub fn labels(&self) -> Vec<&'static str> {
        self.writes.lock().unwrap().iter().map(|(label, _)| *label).collect()
    }

    pub fn body(&self, label: &str) -> Value {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .find(|(l, _)| *l == label)
            .map(|(_, body)| body.clone())
            .unwrap()
    }

    pub fn bodies(&self, label: &str) -> Vec<Value> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .filter(|(l, _)| *l == label)
            .map(|(_, body)| body.clone())
            .collect()
    }

    fn accept<T: serde::Serialize>(&self, label: &'static str, body: &T) -> Result<()> {
        let rejected = self
            .fail_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if rejected {
            return Err(ClientError::Mirror("503 Service Unavailable".into()));
        }
        let body = serde_json::to_value(body).unwrap();
        self.writes.lock().unwrap().push((label, body));
        Ok(())
    }
}

impl MirrorApi for FakeMirror {
    async fn current_presale(&self) -> Result<CurrentPresaleResponse> {
        Ok(self.current.lock().unwrap().clone())
    }

    async fn update_current(&self, update: &CurrentPresaleUpdate) -> Result<()> {
        self.accept("current", update)
    }

    async fn presale_record(&self, _wallet: &Pubkey) -> Result<Option<WalletPresaleRecord>> {
        Ok(self.record.lock().unwrap().clone())
    }

    async fn upsert_presale_record(&self, upsert: &PresaleRecordUpsert) -> Result<()> {
        self.accept("presale", upsert)?;
        if let Some(total) = upsert.presale_info.deposit_token_amount {
            let mut record = self.record.lock().unwrap();
            record.get_or_insert_with(WalletPresaleRecord::default).deposit_token_amount =
                Some(total);
        }
        Ok(())
    }

    async fn append_activity(&self, post: &TokenActivityPost) -> Result<()> {
        self.accept("activity", post)
    }

    async fn record_buy(&self, post: &BuyPost) -> Result<()> {
        self.accept("buy", post)
    }

    async fn presale_identifier(&self) -> Result<Option<u8>> {
        Ok(*self.identifier.lock().unwrap())
    }
}

pub struct FakePrice {
    pub usd: f64,
    pub calls: AtomicU32,
}

impl FakePrice {
    pub fn new(usd: f64) -> Self {
        Self {
            usd,
            calls: AtomicU32::new(0),
        }
    }
}

impl PriceIndex for FakePrice {
    async fn sol_usd(&self) -> Result<f64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.usd)
    }
}

#[derive(Clone, Default)]
pub struct RecordingNavigator(pub Arc<Mutex<Vec<Route>>>);

impl RecordingNavigator {
    pub fn count(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, route: Route) {
        self.0.lock().unwrap().push(route);
    }
}

pub type TestClient = PresaleClient<FakeChain, FakeMirror, FakePrice, RecordingNavigator>;

pub struct Harness {
    pub client: TestClient,
    pub wallet: Arc<Keypair>,
    pub mint: Pubkey,
    pub navigator: RecordingNavigator,
}

impl Harness {
    pub fn chain(&self) -> &FakeChain {
        self.client.rpc()
    }

    pub fn mirror(&self) -> &FakeMirror {
        self.client.mirror()
    }

    pub fn buyer_token_account(&self) -> Pubkey {
        get_associated_token_address(&self.wallet.pubkey(), &self.mint)
    }
}

pub fn now() -> i64 {
    presale_client::window::now_unix()
}

pub fn presale_info(mint: Pubkey, authority: Pubkey) -> PresaleInfo {
    PresaleInfo {
        presale_identifier: IDENTIFIER,
        token_mint_address: mint,
        softcap_amount: 100_000_000,
        hardcap_amount: 1_000_000_000,
        deposit_token_amount: 500_000_000,
        sold_token_amount: 0,
        received_sol_amount: 0,
        start_time: 50,
        end_time: 4_000_000_000,
        max_token_amount_per_address: 100_000_000,
        lamport_price_per_token: 1_000_000,
        decimals: DECIMALS,
        is_live: true,
        authority,
        is_soft_capped: false,
        is_hard_capped: false,
        is_initialized: true,
        bump: 255,
        vault_bump: 255,
    }
}

pub fn open_mirror(mint: &Pubkey) -> CurrentPresaleMirror {
    let now = now();
    CurrentPresaleMirror {
        presale_identifier: Some(IDENTIFIER as i64),
        token_mint_address: Some(mint.to_string()),
        start_time: Some(now - 3_600),
        end_time: Some(now + 3_600),
        deposit_token_amount: Some(500.0),
        received_sol_amount: Some(1.5),
        decimals: Some(DECIMALS as i64),
        is_live: true,
        is_initialized: true,
        ..CurrentPresaleMirror::default()
    }
}

pub fn config(mint: &Pubkey) -> ClientConfig {
    ClientConfig {
        token_mint: Some(mint.to_string()),
        ..ClientConfig::default()
    }
}

/// A client with a funded open presale on chain and in the mirror. Not connected.
pub fn harness() -> Harness {
    harness_with(|config| config)
}

pub fn harness_with(adjust: impl FnOnce(ClientConfig) -> ClientConfig) -> Harness {
    let wallet = Arc::new(Keypair::new());
    let mint = Pubkey::new_unique();

    let chain = FakeChain::default();
    chain.put_presale(&token_presale::ID, &presale_info(mint, wallet.pubkey()));
    chain
        .balances
        .lock()
        .unwrap()
        .insert(wallet.pubkey(), 5_000_000_000);

    let mirror = FakeMirror::default();
    mirror.set_current(open_mirror(&mint));

    let navigator = RecordingNavigator::default();
    let client = PresaleClient::new(
        adjust(config(&mint)),
        chain,
        mirror,
        FakePrice::new(200.0),
        navigator.clone(),
    )
    .unwrap();

    Harness {
        client,
        wallet,
        mint,
        navigator,
    }
}

pub async fn connected() -> Harness {
    let harness = harness();
    harness.client.connect(harness.wallet.clone()).await.unwrap();
    harness
}
