//! Checkpointed transaction sending.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use super::context::JobContext;
use crate::domain::{
    AppError, BlockchainClient, BlockchainError, Network, TransactionReceipt, TransactionRequest,
    TxHash,
};
use crate::infra::observability::{TRANSACTIONS_RESUMED, TRANSACTIONS_SENT};

/// Blockchain clients for both networks.
#[derive(Clone)]
pub struct ChainClients {
    pub home: Arc<dyn BlockchainClient>,
    pub foreign: Arc<dyn BlockchainClient>,
}

impl ChainClients {
    pub fn new(home: Arc<dyn BlockchainClient>, foreign: Arc<dyn BlockchainClient>) -> Self {
        Self { home, foreign }
    }

    #[must_use]
    pub fn get(&self, network: Network) -> &Arc<dyn BlockchainClient> {
        match network {
            Network::Home => &self.home,
            Network::Foreign => &self.foreign,
        }
    }
}

/// What is stored under `transactions.{step}` once a transaction is broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentTransaction {
    pub hash: TxHash,
    pub network: Network,
}

/// Sends transactions on behalf of jobs.
///
/// The hash of every broadcast transaction is checkpointed into the job
/// before waiting for its receipt. A job that runs again finds the hash and
/// waits for that transaction instead of broadcasting a second one.
pub struct TransactionSender {
    chains: ChainClients,
    receipt_timeout: Duration,
}

fn step_path(step: &str) -> String {
    format!("transactions.{step}")
}

impl TransactionSender {
    pub fn new(chains: ChainClients, receipt_timeout: Duration) -> Self {
        Self {
            chains,
            receipt_timeout,
        }
    }

    #[must_use]
    pub fn chains(&self) -> &ChainClients {
        &self.chains
    }

    /// Transaction previously broadcast for `step`, if any.
    pub fn sent(ctx: &JobContext, step: &str) -> Result<Option<SentTransaction>, AppError> {
        ctx.get_as(&step_path(step))
    }

    /// Broadcast `request` for `step` (or resume the checkpointed broadcast)
    /// and wait for a successful receipt.
    #[instrument(skip(self, ctx, request), fields(job_id = %ctx.id(), network = %network.as_str()))]
    pub async fn send(
        &self,
        ctx: &mut JobContext,
        step: &str,
        network: Network,
        request: &TransactionRequest,
    ) -> Result<TransactionReceipt, AppError> {
        let client = self.chains.get(network);

        let hash = match Self::sent(ctx, step)? {
            Some(sent) => {
                info!(hash = %sent.hash, "Resuming checkpointed transaction");
                metrics::counter!(TRANSACTIONS_RESUMED, "step" => step.to_string()).increment(1);
                sent.hash
            }
            None => {
                let hash = client.send_transaction(request).await?;
                ctx.checkpoint(&step_path(step), SentTransaction { hash, network })
                    .await?;
                metrics::counter!(TRANSACTIONS_SENT, "step" => step.to_string()).increment(1);
                info!(hash = %hash, "Transaction broadcast");
                hash
            }
        };

        let result = self.confirm(client.as_ref(), &hash).await;
        Self::forget_reverted(ctx, step, result).await
    }

    /// Receipt of the transaction checkpointed for `step`, if one was sent.
    pub async fn checkpointed_receipt(
        &self,
        ctx: &mut JobContext,
        step: &str,
    ) -> Result<Option<TransactionReceipt>, AppError> {
        let Some(sent) = Self::sent(ctx, step)? else {
            return Ok(None);
        };
        let client = self.chains.get(sent.network);
        let result = self.confirm(client.as_ref(), &sent.hash).await;
        Self::forget_reverted(ctx, step, result).await.map(Some)
    }

    /// A reverted transaction will never succeed, so its checkpoint is
    /// dropped and the next run of the job broadcasts a fresh one.
    async fn forget_reverted(
        ctx: &mut JobContext,
        step: &str,
        result: Result<TransactionReceipt, AppError>,
    ) -> Result<TransactionReceipt, AppError> {
        if let Err(AppError::Blockchain(BlockchainError::Reverted(reason))) = &result
            && ctx.remove(&step_path(step))
        {
            warn!(step, reason = %reason, "Dropping checkpoint of reverted transaction");
            ctx.save().await?;
        }
        result
    }

    async fn confirm(
        &self,
        client: &dyn BlockchainClient,
        hash: &TxHash,
    ) -> Result<TransactionReceipt, AppError> {
        let receipt = client.wait_for_receipt(hash, self.receipt_timeout).await?;
        if !receipt.status {
            return Err(AppError::Blockchain(BlockchainError::Reverted(format!(
                "transaction {hash} reverted in block {}",
                receipt.block_number
            ))));
        }
        Ok(receipt)
    }
}
