use std::time::Duration;

use anchor_client::solana_sdk::signature::Signature;
use anchor_lang::prelude::Pubkey;
use thiserror::Error;

use crate::window;

pub type Result<T, E = ClientError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Program or wallet not initialized")]
    NotInitialized,
    #[error("Invalid token amount")]
    InvalidTokenAmount,
    #[error("Token amount must be a whole number")]
    FractionalTokenAmount,
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("Invalid presale terms: {0}")]
    InvalidTerms(String),
    #[error("Presale identifier {0} does not fit in a byte")]
    InvalidIdentifier(u64),
    #[error("Token mint is not configured")]
    MintUnknown,
    #[error("A transaction is already pending")]
    TransactionPending,
    #[error("Presale information not available")]
    MirrorUnavailable,
    #[error("{}", closed_window_message(.now, .start, .end))]
    PresaleNotActive {
        now: i64,
        start: Option<i64>,
        end: Option<i64>,
    },

    #[error("Account {0} does not exist")]
    AccountNotFound(Pubkey),
    #[error("RPC error: {0}")]
    Rpc(String),
    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<ClientError>,
    },
    #[error("Invalid presale info data structure: {0}")]
    DataIntegrity(String),

    #[error("Transaction failed to confirm: {0}")]
    InstructionFailed(String),
    #[error("Transaction {0} was not confirmed within {1:?}")]
    ConfirmationTimeout(Signature, Duration),

    #[error("Mirror request failed: {0}")]
    Mirror(String),
    #[error("Mirror rejected the request: {0}")]
    MirrorRejected(String),
    #[error("Outbox persistence failed: {0}")]
    Outbox(String),
    #[error("Price lookup failed: {0}")]
    Price(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// Account-missing outcomes are expected right after an account is created.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::AccountNotFound(_))
    }

    /// Mirror writes failing this way will fail again if resent unchanged.
    pub fn is_permanent(&self) -> bool {
        matches!(self, ClientError::MirrorRejected(_))
    }
}

fn closed_window_message(now: &i64, start: &Option<i64>, end: &Option<i64>) -> String {
    window::describe_closed(*now, *start, *end)
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::Mirror(err.to_string())
    }
}
