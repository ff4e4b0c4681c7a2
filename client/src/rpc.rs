use std::future::Future;
use std::time::Duration;

use anchor_client::solana_client::client_error::ClientError as SolanaClientError;
use anchor_client::solana_client::nonblocking::rpc_client::RpcClient;
use anchor_client::solana_sdk::commitment_config::CommitmentConfig;
use anchor_client::solana_sdk::signature::{Keypair, Signature, Signer};
use anchor_client::solana_sdk::transaction::Transaction;
use anchor_lang::prelude::Pubkey;
use anchor_lang::solana_program::instruction::Instruction;
use log::{debug, warn};

use crate::error::{ClientError, Result};

/// The chain operations the orchestrator depends on.
pub trait ChainRpc: Send + Sync {
    /// `Ok(None)` when the account does not exist.
    fn get_account_data(
        &self,
        address: &Pubkey,
    ) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send;

    /// Lamports held by `address`.
    fn get_balance(&self, address: &Pubkey) -> impl Future<Output = Result<u64>> + Send;

    /// Raw token amount of a token account, `Ok(None)` when it does not exist.
    fn get_token_balance(
        &self,
        token_account: &Pubkey,
    ) -> impl Future<Output = Result<Option<u64>>> + Send;

    /// Signs with `payer` and sends a single-instruction transaction.
    fn submit(
        &self,
        instruction: Instruction,
        payer: &Keypair,
    ) -> impl Future<Output = Result<Signature>> + Send;

    /// Resolves once the signature is confirmed; an on-chain error is
    /// `ClientError::InstructionFailed`. Callers bound the wait.
    fn confirm(&self, signature: &Signature) -> impl Future<Output = Result<()>> + Send;
}

fn rpc_error(err: SolanaClientError) -> ClientError {
    ClientError::Rpc(err.to_string())
}

pub struct SolanaRpc {
    client: RpcClient,
    commitment: CommitmentConfig,
    poll_interval: Duration,
}

impl SolanaRpc {
    pub fn new(url: String, commitment: CommitmentConfig, poll_interval: Duration) -> Self {
        Self {
            client: RpcClient::new_with_commitment(url, commitment),
            commitment,
            poll_interval,
        }
    }

    pub fn client(&self) -> &RpcClient {
        &self.client
    }
}

impl ChainRpc for SolanaRpc {
    async fn get_account_data(&self, address: &Pubkey) -> Result<Option<Vec<u8>>> {
        let response = self
            .client
            .get_account_with_commitment(address, self.commitment)
            .await
            .map_err(rpc_error)?;
        Ok(response.value.map(|account| account.data))
    }

    async fn get_balance(&self, address: &Pubkey) -> Result<u64> {
        let response = self
            .client
            .get_balance_with_commitment(address, self.commitment)
            .await
            .map_err(rpc_error)?;
        Ok(response.value)
    }

    async fn get_token_balance(&self, token_account: &Pubkey) -> Result<Option<u64>> {
        if self.get_account_data(token_account).await?.is_none() {
            return Ok(None);
        }
        let response = self
            .client
            .get_token_account_balance_with_commitment(token_account, self.commitment)
            .await
            .map_err(rpc_error)?;
        let amount = response
            .value
            .amount
            .parse::<u64>()
            .map_err(|e| ClientError::Rpc(format!("unparseable token amount: {e}")))?;
        Ok(Some(amount))
    }

    async fn submit(&self, instruction: Instruction, payer: &Keypair) -> Result<Signature> {
        let blockhash = self.client.get_latest_blockhash().await.map_err(rpc_error)?;
        let transaction = Transaction::new_signed_with_payer(
            &[instruction],
            Some(&payer.pubkey()),
            &[payer],
            blockhash,
        );
        let signature = self
            .client
            .send_transaction(&transaction)
            .await
            .map_err(rpc_error)?;
        debug!("sent transaction {signature}");
        Ok(signature)
    }

    async fn confirm(&self, signature: &Signature) -> Result<()> {
        loop {
            let status = self
                .client
                .get_signature_status_with_commitment(signature, self.commitment)
                .await;
            match status {
                Ok(Some(Ok(()))) => return Ok(()),
                Ok(Some(Err(err))) => return Err(ClientError::InstructionFailed(err.to_string())),
                Ok(None) => {}
                Err(err) => warn!("status lookup for {signature} failed: {err}"),
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
