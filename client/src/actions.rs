//! The four mutating presale actions.
//!
//! Each runs gate, session check, preconditions, address derivation, one
//! instruction with a bounded confirmation wait, queued mirror writes, then a
//! view refresh. Results are returned as [`TxOutcome`], never as errors.

use anchor_client::solana_sdk::signature::Signature;
use anchor_lang::prelude::Pubkey;
use anchor_lang::solana_program::instruction::Instruction;
use anchor_lang::solana_program::sysvar;
use anchor_lang::{system_program, InstructionData, ToAccountMetas};
use anchor_spl::associated_token::{self, get_associated_token_address};
use anchor_spl::token;
use chrono::Utc;
use log::{debug, error, info, warn};

use crate::amount::{
    from_base_units, lamports_per_token, sol_to_lamports, to_base_units, whole_token_amount,
    whole_tokens_to_base_units,
};
use crate::client::PresaleClient;
use crate::error::{ClientError, Result};
use crate::gate::{ActionPhase, PendingGuard};
use crate::mirror::{
    ActivityKind, ActivityLogEntry, AssetKind, BuyInfo, BuyPost, CurrentPresaleUpdate, MirrorApi,
    PresaleRecordFields, PresaleRecordUpsert, PresaleTerms, TokenActivityPost,
};
use crate::navigation::Navigator;
use crate::outbox::MirrorWrite;
use crate::pda::{BuyerAddresses, PresaleAddresses};
use crate::price::PriceIndex;
use crate::rpc::ChainRpc;
use crate::session::SessionContext;
use crate::window;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxOutcome {
    Success { signature: Signature },
    Failure { reason: String },
}

impl TxOutcome {
    fn from_result(prefix: &str, result: Result<Signature>) -> Self {
        match result {
            Ok(signature) => TxOutcome::Success { signature },
            Err(err) => {
                error!("{prefix}{err}");
                TxOutcome::Failure {
                    reason: format!("{prefix}{err}"),
                }
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TxOutcome::Success { .. })
    }

    pub fn signature(&self) -> Option<&Signature> {
        match self {
            TxOutcome::Success { signature } => Some(signature),
            TxOutcome::Failure { .. } => None,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            TxOutcome::Success { .. } => None,
            TxOutcome::Failure { reason } => Some(reason),
        }
    }
}

/// Terms for a new presale as entered by the administrator. Amounts are whole
/// tokens, the price is USD per token.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPresale {
    pub presale_identifier: u8,
    pub token_mint: Pubkey,
    pub softcap_amount: f64,
    pub hardcap_amount: f64,
    pub max_token_amount_per_address: f64,
    pub min_token_amount_per_address: f64,
    pub price_per_token_usd: f64,
    pub start_time: i64,
    pub end_time: i64,
    pub decimals: u8,
}

impl NewPresale {
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(ClientError::InvalidTerms(msg.to_string()));
        if self.presale_identifier == 0 {
            return invalid("presale identifier must be non-zero");
        }
        if !(self.hardcap_amount > 0.0) {
            return invalid("hardcap must be positive");
        }
        if !(self.softcap_amount >= 0.0 && self.softcap_amount <= self.hardcap_amount) {
            return invalid("softcap must not exceed hardcap");
        }
        if !(self.min_token_amount_per_address >= 0.0
            && self.min_token_amount_per_address <= self.max_token_amount_per_address)
        {
            return invalid("minimum per address must not exceed maximum");
        }
        if self.start_time <= 0 || self.start_time >= self.end_time {
            return invalid("start time must be positive and before end time");
        }
        Ok(())
    }

    fn terms(&self) -> PresaleTerms {
        PresaleTerms {
            token_mint_address: self.token_mint.to_string(),
            softcap_amount: self.softcap_amount,
            hardcap_amount: self.hardcap_amount,
            max_token_amount_per_address: self.max_token_amount_per_address,
            min_token_amount_per_address: self.min_token_amount_per_address,
            price_per_token: self.price_per_token_usd,
            start_time: self.start_time,
            end_time: self.end_time,
            decimals: self.decimals,
        }
    }
}

fn instruction(
    program_id: Pubkey,
    accounts: impl ToAccountMetas,
    args: impl InstructionData,
) -> Instruction {
    Instruction {
        program_id,
        accounts: accounts.to_account_metas(None),
        data: args.data(),
    }
}

fn activity(
    session: &SessionContext,
    kind: ActivityKind,
    amount: f64,
    token_type: AssetKind,
    signature: &Signature,
    presale_identifier: u8,
) -> MirrorWrite {
    MirrorWrite::AppendActivity(TokenActivityPost {
        public_key: session.wallet().to_string(),
        activity: ActivityLogEntry {
            kind,
            amount,
            token_type,
            signature: signature.to_string(),
            presale_identifier,
            timestamp: Utc::now().timestamp_millis(),
        },
    })
}

fn record_fields(presale_identifier: u8, signature: &Signature) -> PresaleRecordFields {
    PresaleRecordFields {
        presale_identifier,
        terms: None,
        deposit_token_amount: None,
        withdraw_amount: None,
        withdraw_type: None,
        signature: signature.to_string(),
    }
}

impl<R, M, P, N> PresaleClient<R, M, P, N>
where
    R: ChainRpc,
    M: MirrorApi,
    P: PriceIndex,
    N: Navigator,
{
    pub async fn create_and_start_presale(&self, presale: NewPresale) -> TxOutcome {
        let Some(guard) = self.gate.try_begin() else {
            return TxOutcome::from_result("", Err(ClientError::TransactionPending));
        };
        let result = self.create_inner(&guard, presale).await;
        TxOutcome::from_result("", result)
    }

    async fn create_inner(&self, guard: &PendingGuard<'_>, presale: NewPresale) -> Result<Signature> {
        let session = self.session().await?;
        presale.validate()?;

        let sol_usd = self.current_sol_usd().await?;
        let price_per_token = lamports_per_token(presale.price_per_token_usd, sol_usd)?;
        let decimals = presale.decimals;
        let softcap_amount = to_base_units(presale.softcap_amount, decimals)?;
        let hardcap_amount = to_base_units(presale.hardcap_amount, decimals)?;
        let max_token_amount_per_address =
            to_base_units(presale.max_token_amount_per_address, decimals)?;

        let identifier = presale.presale_identifier;
        let addrs = PresaleAddresses::derive(&self.program_id, identifier, &presale.token_mint);
        info!(
            "creating presale {identifier} at {} priced {price_per_token} lamports/token",
            addrs.presale_info
        );

        let ix = instruction(
            self.program_id,
            token_presale::accounts::CreateAndStartPresale {
                presale_info: addrs.presale_info,
                presale_vault: addrs.presale_vault,
                token_mint: presale.token_mint,
                authority: session.wallet(),
                system_program: system_program::ID,
                token_program: token::ID,
                rent: sysvar::rent::ID,
            },
            token_presale::instruction::CreateAndStartPresale {
                presale_identifier: identifier,
                token_mint_address: presale.token_mint,
                softcap_amount,
                hardcap_amount,
                max_token_amount_per_address,
                price_per_token,
                start_time: presale.start_time as u64,
                end_time: presale.end_time as u64,
                decimals,
            },
        );
        let signature = self.submit_and_confirm(&session, guard, ix).await?;

        guard.advance(ActionPhase::Syncing);
        {
            let mut selection = self.selection.write().await;
            selection.presale_identifier = identifier;
            selection.token_mint = Some(presale.token_mint);
            selection.decimals = decimals;
        }
        let fields = PresaleRecordFields {
            terms: Some(presale.terms()),
            ..record_fields(identifier, &signature)
        };
        let writes = vec![MirrorWrite::UpsertPresale(PresaleRecordUpsert::new(
            &session.wallet(),
            fields,
        ))];
        self.enqueue_and_flush(&signature, writes).await;
        self.refresh_after_action().await;
        Ok(signature)
    }

    /// Moves `amount` tokens (UI units) from the authority into the presale.
    pub async fn deposit_token(&self, amount: f64) -> TxOutcome {
        let Some(guard) = self.gate.try_begin() else {
            return TxOutcome::from_result("Deposit failed: ", Err(ClientError::TransactionPending));
        };
        let result = self.deposit_inner(&guard, amount).await;
        TxOutcome::from_result("Deposit failed: ", result)
    }

    async fn deposit_inner(&self, guard: &PendingGuard<'_>, amount: f64) -> Result<Signature> {
        let session = self.session().await?;
        if !(amount > 0.0) {
            return Err(ClientError::InvalidAmount(format!("{amount} must be positive")));
        }
        let mint = self.require_mint().await?;
        let selection = self.selection.read().await.clone();
        let identifier = selection.presale_identifier;
        let base_amount = to_base_units(amount, selection.decimals)?;

        let admin = session.wallet();
        let addrs = PresaleAddresses::derive(&self.program_id, identifier, &mint);
        debug!(
            "deposit {base_amount} into {} (presale {identifier})",
            addrs.presale_token_account
        );

        let ix = instruction(
            self.program_id,
            token_presale::accounts::DepositToken {
                presale_info: addrs.presale_info,
                mint_account: mint,
                from_associated_token_account: get_associated_token_address(&admin, &mint),
                to_associated_token_account: addrs.presale_token_account,
                admin,
                rent: sysvar::rent::ID,
                system_program: system_program::ID,
                token_program: token::ID,
                associated_token_program: associated_token::ID,
            },
            token_presale::instruction::DepositToken {
                amount: base_amount,
            },
        );
        let signature = self.submit_and_confirm(&session, guard, ix).await?;

        guard.advance(ActionPhase::Syncing);
        let mut writes = Vec::with_capacity(3);
        match self.deposit_total_base(&admin).await {
            Ok(previous) => {
                let fields = PresaleRecordFields {
                    deposit_token_amount: Some(previous + amount),
                    ..record_fields(identifier, &signature)
                };
                writes.push(MirrorWrite::UpsertPresale(PresaleRecordUpsert::new(&admin, fields)));
            }
            Err(err) => warn!("presale record unavailable, not updating deposit total: {err}"),
        }
        writes.push(MirrorWrite::UpdateCurrent(CurrentPresaleUpdate::deposit(
            identifier, amount,
        )));
        writes.push(activity(
            &session,
            ActivityKind::Deposit,
            amount,
            AssetKind::Token,
            &signature,
            identifier,
        ));
        self.enqueue_and_flush(&signature, writes).await;
        self.refresh_after_action().await;
        Ok(signature)
    }

    /// Buys `token_amount` whole tokens; `sol_amount` is the quoted cost
    /// recorded in the mirror.
    pub async fn buy_and_claim_token(&self, token_amount: f64, email: &str, sol_amount: f64) -> TxOutcome {
        let Some(guard) = self.gate.try_begin() else {
            return TxOutcome::from_result("", Err(ClientError::TransactionPending));
        };
        let result = self.buy_inner(&guard, token_amount, email, sol_amount).await;
        TxOutcome::from_result("", result)
    }

    async fn buy_inner(
        &self,
        guard: &PendingGuard<'_>,
        token_amount: f64,
        email: &str,
        sol_amount: f64,
    ) -> Result<Signature> {
        let session = self.session().await?;
        let tokens = whole_token_amount(token_amount)?;

        let current = self
            .mirror
            .current_presale()
            .await
            .ok()
            .and_then(|response| response.into_presale())
            .ok_or(ClientError::MirrorUnavailable)?;
        let now = window::now_unix();
        if !window::validate(&current, now) {
            return Err(ClientError::PresaleNotActive {
                now,
                start: current.start_time,
                end: current.end_time,
            });
        }

        let mint = self.require_mint().await?;
        let selection = self.selection.read().await.clone();
        let identifier = selection.presale_identifier;
        let base_amount = whole_tokens_to_base_units(tokens, selection.decimals)?;

        let buyer = session.wallet();
        let addrs = PresaleAddresses::derive(&self.program_id, identifier, &mint);
        let buyer_addrs = BuyerAddresses::derive(&self.program_id, identifier, &buyer, &mint);
        debug!(
            "buy {base_amount} from presale {identifier}, buyer record {}",
            buyer_addrs.buyer_account
        );

        let ix = instruction(
            self.program_id,
            token_presale::accounts::BuyAndClaimToken {
                presale_info: addrs.presale_info,
                token_mint: mint,
                buyer_token_account: buyer_addrs.buyer_token_account,
                presale_token_account: addrs.presale_token_account,
                presale_vault: addrs.presale_vault,
                buyer_account: buyer_addrs.buyer_account,
                buyer,
                system_program: system_program::ID,
                token_program: token::ID,
                associated_token_program: associated_token::ID,
            },
            token_presale::instruction::BuyAndClaimToken {
                token_amount: base_amount,
            },
        );
        let signature = self.submit_and_confirm(&session, guard, ix).await?;

        guard.advance(ActionPhase::Syncing);
        let holding_before = self.synced.read().await.holding_tokens.unwrap_or(0);
        let writes = vec![
            MirrorWrite::RecordBuy(BuyPost {
                public_key: buyer.to_string(),
                buy_info: BuyInfo {
                    presale_identifier: identifier,
                    token_amount: tokens,
                    sol_amount,
                    signature: signature.to_string(),
                    email: email.to_string(),
                    timestamp: Utc::now().timestamp_millis(),
                },
                token_activity: holding_before.saturating_add(base_amount),
            }),
            MirrorWrite::UpdateCurrent(CurrentPresaleUpdate::purchase(
                identifier,
                tokens as f64,
                sol_amount,
            )),
            activity(
                &session,
                ActivityKind::Buy,
                tokens as f64,
                AssetKind::Token,
                &signature,
                identifier,
            ),
        ];
        self.enqueue_and_flush(&signature, writes).await;
        self.refresh_after_action().await;
        Ok(signature)
    }

    /// Withdraws `amount` SOL or tokens (UI units) to the authority.
    pub async fn withdraw(&self, presale_identifier: u8, amount: f64, kind: AssetKind) -> TxOutcome {
        let Some(guard) = self.gate.try_begin() else {
            return TxOutcome::from_result("", Err(ClientError::TransactionPending));
        };
        let result = self.withdraw_inner(&guard, presale_identifier, amount, kind).await;
        TxOutcome::from_result("", result)
    }

    async fn withdraw_inner(
        &self,
        guard: &PendingGuard<'_>,
        identifier: u8,
        amount: f64,
        kind: AssetKind,
    ) -> Result<Signature> {
        let session = self.session().await?;
        if !(amount > 0.0) {
            return Err(ClientError::InvalidAmount(format!("{amount} must be positive")));
        }
        let mint = self.require_mint().await?;
        let decimals = self.selection.read().await.decimals;
        let base_amount = match kind {
            AssetKind::Token => to_base_units(amount, decimals)?,
            AssetKind::Sol => sol_to_lamports(amount)?,
        };

        let admin = session.wallet();
        let addrs = PresaleAddresses::derive(&self.program_id, identifier, &mint);
        debug!("withdraw {base_amount} ({kind:?}) from presale {identifier}");

        let ix = instruction(
            self.program_id,
            token_presale::accounts::Withdraw {
                presale_info: addrs.presale_info,
                presale_vault: addrs.presale_vault,
                admin,
                token_mint: mint,
                presale_token_account: addrs.presale_token_account,
                admin_token_account: get_associated_token_address(&admin, &mint),
                system_program: system_program::ID,
                token_program: token::ID,
                associated_token_program: associated_token::ID,
            },
            token_presale::instruction::Withdraw {
                amount: base_amount,
                withdraw_type: kind.into(),
            },
        );
        let signature = self.submit_and_confirm(&session, guard, ix).await?;

        guard.advance(ActionPhase::Syncing);
        match self.withdrawable_tokens_and_sol().await {
            Ok(withdrawable) => *self.withdrawable.write().await = withdrawable,
            Err(err) => warn!("withdrawable amounts unavailable: {err}"),
        }
        let fields = PresaleRecordFields {
            withdraw_amount: Some(amount),
            withdraw_type: Some(kind),
            ..record_fields(identifier, &signature)
        };
        let writes = vec![
            MirrorWrite::UpsertPresale(PresaleRecordUpsert::new(&admin, fields)),
            MirrorWrite::UpdateCurrent(CurrentPresaleUpdate::withdraw(identifier, amount, kind)),
            activity(&session, ActivityKind::Withdraw, amount, kind, &signature, identifier),
        ];
        self.enqueue_and_flush(&signature, writes).await;
        self.refresh_after_action().await;
        Ok(signature)
    }

    /// Live SOL price, falling back to the last polled value.
    async fn current_sol_usd(&self) -> Result<f64> {
        match self.prices.sol_usd().await {
            Ok(price) => {
                self.sol_usd.send_replace(Some(price));
                Ok(price)
            }
            Err(err) => self.sol_usd().ok_or(err),
        }
    }

    async fn refresh_after_action(&self) {
        match self.rebuild_synced(true).await {
            Ok(state) => {
                if let Some(holding) = state.holding_tokens {
                    let decimals = self.selection.read().await.decimals;
                    debug!("holding {} tokens", from_base_units(holding, decimals));
                }
            }
            Err(err) => warn!("refresh after confirmed action failed: {err}"),
        }
    }
}
