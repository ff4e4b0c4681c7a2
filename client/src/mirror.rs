//! Off-chain mirror of presale state kept by the REST backend.
//!
//! The presale record is written with absolute values. The "current presale"
//! aggregate is written with deltas the backend adds to its stored fields,
//! except withdraws, which name the amount and asset and leave the subtraction
//! to the backend.
//! The two shapes are kept as separate types so one cannot be sent as the other.

use std::future::Future;

use anchor_lang::prelude::Pubkey;
use log::debug;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use token_presale::WithdrawType;

use crate::error::{ClientError, Result};
use crate::window::SaleWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssetKind {
    Sol,
    Token,
}

impl From<AssetKind> for WithdrawType {
    fn from(kind: AssetKind) -> Self {
        match kind {
            AssetKind::Sol => WithdrawType::Sol,
            AssetKind::Token => WithdrawType::Token,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Deposit,
    Withdraw,
    Buy,
}

fn lenient_f64<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<f64>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

fn lenient_i64<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<i64>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

fn lenient_bool<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<bool, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::Bool(b)) => b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => s == "true",
        _ => false,
    })
}

/// The singleton "current presale" record. The backend stores whatever it was
/// sent, so every field is optional and numbers may arrive as strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentPresaleMirror {
    #[serde(default, deserialize_with = "lenient_i64")]
    pub presale_identifier: Option<i64>,
    #[serde(default)]
    pub token_mint_address: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub softcap_amount: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub hardcap_amount: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub deposit_token_amount: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub sold_token_amount: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub received_sol_amount: Option<f64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub start_time: Option<i64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub end_time: Option<i64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub max_token_amount_per_address: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub min_token_amount_per_address: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub price_per_token: Option<f64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub decimals: Option<i64>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub is_live: bool,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub is_soft_capped: bool,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub is_hard_capped: bool,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub is_initialized: bool,
}

impl CurrentPresaleMirror {
    pub fn decimals(&self) -> Option<u8> {
        self.decimals.and_then(|d| u8::try_from(d).ok())
    }

    pub fn token_mint(&self) -> Option<Pubkey> {
        self.token_mint_address.as_deref()?.parse().ok()
    }
}

impl SaleWindow for CurrentPresaleMirror {
    fn start_time(&self) -> Option<i64> {
        self.start_time
    }

    fn end_time(&self) -> Option<i64> {
        self.end_time
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentPresaleResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub presale_info: Option<CurrentPresaleMirror>,
    #[serde(default)]
    pub message: Option<String>,
}

impl CurrentPresaleResponse {
    pub fn into_presale(self) -> Option<CurrentPresaleMirror> {
        if self.success {
            self.presale_info
        } else {
            None
        }
    }
}

/// Absolute presale terms as entered by the administrator, in UI units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresaleTerms {
    pub token_mint_address: String,
    pub softcap_amount: f64,
    pub hardcap_amount: f64,
    pub max_token_amount_per_address: f64,
    pub min_token_amount_per_address: f64,
    pub price_per_token: f64,
    pub start_time: i64,
    pub end_time: i64,
    pub decimals: u8,
}

/// Amounts the backend adds to the current presale aggregate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MirrorDeltas {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sold_token_amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deposit_token_amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_sol_amount: Option<f64>,
}

/// Body of `POST /api/current`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentPresaleUpdate {
    pub presale_identifier: u8,
    #[serde(flatten)]
    pub deltas: MirrorDeltas,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub withdraw_amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub withdraw_type: Option<AssetKind>,
}

impl CurrentPresaleUpdate {
    /// Only switches the active presale.
    pub fn select(presale_identifier: u8) -> Self {
        Self {
            presale_identifier,
            deltas: MirrorDeltas::default(),
            withdraw_amount: None,
            withdraw_type: None,
        }
    }

    pub fn deposit(presale_identifier: u8, amount: f64) -> Self {
        Self {
            deltas: MirrorDeltas {
                deposit_token_amount: Some(amount),
                ..MirrorDeltas::default()
            },
            ..Self::select(presale_identifier)
        }
    }

    pub fn purchase(presale_identifier: u8, token_amount: f64, sol_amount: f64) -> Self {
        Self {
            deltas: MirrorDeltas {
                sold_token_amount: Some(token_amount),
                deposit_token_amount: Some(-token_amount),
                received_sol_amount: Some(sol_amount),
            },
            ..Self::select(presale_identifier)
        }
    }

    /// Carries no deltas. The backend subtracts `withdrawAmount` from the
    /// field named by `withdrawType`.
    pub fn withdraw(presale_identifier: u8, amount: f64, kind: AssetKind) -> Self {
        Self {
            withdraw_amount: Some(amount),
            withdraw_type: Some(kind),
            ..Self::select(presale_identifier)
        }
    }
}

/// The wallet's presale record as stored by the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletPresaleRecord {
    #[serde(default, deserialize_with = "lenient_i64")]
    pub presale_identifier: Option<i64>,
    #[serde(default)]
    pub token_mint_address: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub deposit_token_amount: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub withdraw_amount: Option<f64>,
    #[serde(default)]
    pub signature: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PresaleRecordResponse {
    #[serde(default)]
    presale_info: Option<WalletPresaleRecord>,
}

/// Absolute fields written to the wallet's presale record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresaleRecordFields {
    pub presale_identifier: u8,
    #[serde(flatten)]
    pub terms: Option<PresaleTerms>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deposit_token_amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub withdraw_amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub withdraw_type: Option<AssetKind>,
    pub signature: String,
}

/// Body of `POST /api/presale`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresaleRecordUpsert {
    pub public_key: String,
    pub presale_info: PresaleRecordFields,
}

impl PresaleRecordUpsert {
    pub fn new(wallet: &Pubkey, presale_info: PresaleRecordFields) -> Self {
        Self {
            public_key: wallet.to_string(),
            presale_info,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityLogEntry {
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    pub amount: f64,
    pub token_type: AssetKind,
    pub signature: String,
    pub presale_identifier: u8,
    /// Milliseconds since epoch.
    pub timestamp: i64,
}

/// Body of `POST /api/token-activity`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenActivityPost {
    pub public_key: String,
    pub activity: ActivityLogEntry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuyInfo {
    pub presale_identifier: u8,
    pub token_amount: u64,
    pub sol_amount: f64,
    pub signature: String,
    pub email: String,
    pub timestamp: i64,
}

/// Body of `POST /api/buy`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuyPost {
    pub public_key: String,
    pub buy_info: BuyInfo,
    /// Holding tokens after the purchase, base units.
    pub token_activity: u64,
}

/// REST backend holding the mirror records.
pub trait MirrorApi: Send + Sync {
    fn current_presale(&self) -> impl Future<Output = Result<CurrentPresaleResponse>> + Send;

    fn update_current(
        &self,
        update: &CurrentPresaleUpdate,
    ) -> impl Future<Output = Result<()>> + Send;

    fn presale_record(
        &self,
        wallet: &Pubkey,
    ) -> impl Future<Output = Result<Option<WalletPresaleRecord>>> + Send;

    fn upsert_presale_record(
        &self,
        upsert: &PresaleRecordUpsert,
    ) -> impl Future<Output = Result<()>> + Send;

    fn append_activity(&self, post: &TokenActivityPost) -> impl Future<Output = Result<()>> + Send;

    fn record_buy(&self, post: &BuyPost) -> impl Future<Output = Result<()>> + Send;

    fn presale_identifier(&self) -> impl Future<Output = Result<Option<u8>>> + Send;
}

#[derive(Debug, Default, Deserialize)]
struct Ack {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    message: Option<String>,
}

pub struct HttpMirror {
    base_url: String,
    http: reqwest::Client,
}

impl HttpMirror {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.http.get(self.url(path)).send().await?.error_for_status()?;
        Ok(response.json().await?)
    }

    async fn post_json<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<()> {
        let response = self
            .http
            .post(self.url(path))
            .json(body)
            .send()
            .await?;
        let status = response.status();
        if status.is_client_error()
            && status != StatusCode::REQUEST_TIMEOUT
            && status != StatusCode::TOO_MANY_REQUESTS
        {
            return Err(ClientError::MirrorRejected(format!("{path} returned {status}")));
        }
        let text = response.error_for_status()?.text().await?;
        let ack: Ack = serde_json::from_str(&text).unwrap_or_default();
        if ack.success == Some(false) {
            let message = ack.message.unwrap_or_else(|| format!("{path} was rejected"));
            return Err(ClientError::MirrorRejected(message));
        }
        debug!("POST {path} ok");
        Ok(())
    }
}

impl MirrorApi for HttpMirror {
    async fn current_presale(&self) -> Result<CurrentPresaleResponse> {
        self.get_json("/api/current").await
    }

    async fn update_current(&self, update: &CurrentPresaleUpdate) -> Result<()> {
        self.post_json("/api/current", update).await
    }

    async fn presale_record(&self, wallet: &Pubkey) -> Result<Option<WalletPresaleRecord>> {
        let response = self
            .http
            .get(self.url("/api/presale"))
            .query(&[("publicKey", wallet.to_string())])
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let record: PresaleRecordResponse = response.error_for_status()?.json().await?;
        Ok(record.presale_info)
    }

    async fn upsert_presale_record(&self, upsert: &PresaleRecordUpsert) -> Result<()> {
        self.post_json("/api/presale", upsert).await
    }

    async fn append_activity(&self, post: &TokenActivityPost) -> Result<()> {
        self.post_json("/api/token-activity", post).await
    }

    async fn record_buy(&self, post: &BuyPost) -> Result<()> {
        self.post_json("/api/buy", post).await
    }

    async fn presale_identifier(&self) -> Result<Option<u8>> {
        let value: Value = self.get_json("/api/presaleIdentifier").await?;
        let identifier = match value {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        };
        Ok(identifier.and_then(|id| u8::try_from(id).ok()))
    }
}
