//! JSON-RPC client for EVM chains.
//!
//! One client owns one sending account on one network. Calls are retried with
//! a fixed delay and rotate across the configured node URLs when a node stops
//! answering. Transactions are built as EIP-155 legacy transactions, signed by
//! the injected [`TransactionSigner`] and broadcast with
//! `eth_sendRawTransaction`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};

use super::nonce::NonceManager;
use super::tx::{LegacyTransaction, raw_transaction_hash};
use crate::domain::types::decode_hex;
use crate::domain::{
    Address, AppError, BlockchainClient, BlockchainError, ConfigError, H256, Log, Network,
    TransactionReceipt, TransactionRequest, TransactionSigner, TxHash, U256,
};

/// Configuration for the RPC client
#[derive(Debug, Clone)]
pub struct RpcClientConfig {
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub receipt_poll_interval: Duration,
    /// Estimated gas is scaled by this percentage
    pub gas_limit_multiplier_percent: u64,
    /// How many times a send is re-signed after a nonce conflict
    pub nonce_retries: u32,
    /// Skip `eth_chainId` when the chain id is known up front
    pub chain_id: Option<u64>,
}

impl Default for RpcClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_delay: Duration::from_millis(500),
            receipt_poll_interval: Duration::from_millis(1000),
            gas_limit_multiplier_percent: 120,
            nonce_retries: 3,
            chain_id: None,
        }
    }
}

/// EVM JSON-RPC blockchain client
pub struct EvmRpcClient {
    http_client: Client,
    network: Network,
    rpc_urls: Vec<String>,
    active_url: AtomicUsize,
    request_id: AtomicU64,
    signer: Arc<dyn TransactionSigner>,
    nonces: NonceManager,
    chain_id: OnceCell<u64>,
    config: RpcClientConfig,
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a, T: Serialize> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: T,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: H256,
    block_number: Option<String>,
    status: Option<String>,
    gas_used: Option<String>,
    #[serde(default)]
    logs: Vec<RpcLog>,
}

#[derive(Debug, Deserialize)]
struct RpcLog {
    address: Address,
    #[serde(default)]
    topics: Vec<H256>,
    data: String,
}

fn rpc_error(message: impl Into<String>) -> AppError {
    AppError::Blockchain(BlockchainError::RpcError(message.into()))
}

/// Parse a hex quantity such as `0x1b4`.
fn parse_quantity(value: &str) -> Result<u64, AppError> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    if digits.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(digits, 16)
        .map_err(|e| rpc_error(format!("invalid quantity '{value}': {e}")))
}

fn u256_quantity(value: &U256) -> String {
    let encoded = hex::encode(value.to_minimal_bytes());
    match encoded.trim_start_matches('0') {
        "" => "0x0".to_string(),
        digits => format!("0x{digits}"),
    }
}

fn hex_data(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Map a node error response onto the domain error that callers act on.
fn classify_rpc_error(error: &JsonRpcError) -> BlockchainError {
    let message = error.message.to_lowercase();
    if message.contains("nonce too low")
        || message.contains("replacement transaction underpriced")
        || message.contains("nonce has already been used")
    {
        BlockchainError::NonceConflict(error.message.clone())
    } else if message.contains("insufficient funds") {
        BlockchainError::InsufficientFunds
    } else if message.contains("execution reverted") {
        BlockchainError::Reverted(error.message.clone())
    } else {
        BlockchainError::RpcError(format!("{}: {}", error.code, error.message))
    }
}

fn is_already_known(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("already known") || message.contains("known transaction")
}

/// Transport failures and unclassified node errors are worth another node.
fn is_retryable_call(error: &AppError) -> bool {
    match error {
        AppError::Blockchain(BlockchainError::Connection(_) | BlockchainError::Timeout(_)) => true,
        AppError::Blockchain(BlockchainError::RpcError(message)) => !is_already_known(message),
        _ => false,
    }
}

impl TryFrom<RpcReceipt> for TransactionReceipt {
    type Error = AppError;

    fn try_from(receipt: RpcReceipt) -> Result<Self, Self::Error> {
        let block_number = receipt
            .block_number
            .as_deref()
            .map(parse_quantity)
            .transpose()?
            .ok_or_else(|| rpc_error("receipt has no block number"))?;
        // Pre-Byzantium receipts carry no status field
        let status = match receipt.status.as_deref() {
            Some(status) => parse_quantity(status)? == 1,
            None => true,
        };
        let gas_used = receipt
            .gas_used
            .as_deref()
            .map(parse_quantity)
            .transpose()?
            .unwrap_or_default();
        let logs = receipt
            .logs
            .into_iter()
            .map(|log| -> Result<Log, AppError> {
                Ok(Log {
                    address: log.address,
                    topics: log.topics,
                    data: decode_hex(&log.data).map_err(|e| rpc_error(e.to_string()))?,
                })
            })
            .collect::<Result<Vec<_>, AppError>>()?;

        Ok(Self {
            transaction_hash: receipt.transaction_hash,
            block_number,
            status,
            gas_used,
            logs,
        })
    }
}

impl EvmRpcClient {
    /// Create a new client with custom configuration
    pub fn new(
        network: Network,
        rpc_urls: Vec<String>,
        signer: Arc<dyn TransactionSigner>,
        config: RpcClientConfig,
    ) -> Result<Self, AppError> {
        if rpc_urls.is_empty() {
            return Err(AppError::Config(ConfigError::InvalidValue {
                key: format!("{}_RPC_URLS", network.as_str().to_uppercase()),
                message: "at least one RPC URL is required".to_string(),
            }));
        }
        let http_client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::Blockchain(BlockchainError::Connection(e.to_string())))?;
        info!(
            network = %network.as_str(),
            nodes = rpc_urls.len(),
            sender = %signer.address(),
            "Created blockchain client"
        );
        Ok(Self {
            http_client,
            network,
            rpc_urls,
            active_url: AtomicUsize::new(0),
            request_id: AtomicU64::new(1),
            signer,
            nonces: NonceManager::new(),
            chain_id: OnceCell::new_with(config.chain_id),
            config,
        })
    }

    /// Create a new client with default configuration
    pub fn with_defaults(
        network: Network,
        rpc_urls: Vec<String>,
        signer: Arc<dyn TransactionSigner>,
    ) -> Result<Self, AppError> {
        Self::new(network, rpc_urls, signer, RpcClientConfig::default())
    }

    /// Node currently used for calls
    #[must_use]
    pub fn active_url(&self) -> &str {
        let index = self.active_url.load(Ordering::Relaxed) % self.rpc_urls.len();
        &self.rpc_urls[index]
    }

    /// Move to the next node unless another caller already did.
    fn rotate_from(&self, failed: usize) {
        let next = (failed + 1) % self.rpc_urls.len();
        if self
            .active_url
            .compare_exchange(failed, next, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
            && next != failed
        {
            warn!(
                network = %self.network.as_str(),
                url = %self.rpc_urls[next],
                "Failing over to next RPC node"
            );
        }
    }

    /// Make an RPC call with retries and node failover
    #[instrument(skip(self, params), fields(network = %self.network.as_str()))]
    async fn rpc_call<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        params: P,
    ) -> Result<R, AppError> {
        let mut last_error = None;
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tokio::time::sleep(self.config.retry_delay).await;
            }
            let index = self.active_url.load(Ordering::Relaxed) % self.rpc_urls.len();
            match self.do_rpc_call(&self.rpc_urls[index], method, &params).await {
                Ok(result) => return Ok(result),
                Err(e) if is_retryable_call(&e) => {
                    warn!(attempt = attempt, error = ?e, method = %method, "RPC call failed");
                    self.rotate_from(index);
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or_else(|| rpc_error("Unknown error")))
    }

    /// Execute a single RPC call against one node
    async fn do_rpc_call<P: Serialize, R: DeserializeOwned>(
        &self,
        url: &str,
        method: &str,
        params: &P,
    ) -> Result<R, AppError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: self.request_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let response = self
            .http_client
            .post(url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Blockchain(BlockchainError::Timeout(e.to_string()))
                } else if e.is_connect() {
                    AppError::Blockchain(BlockchainError::Connection(e.to_string()))
                } else {
                    rpc_error(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(rpc_error(format!("HTTP {}", response.status())));
        }

        let rpc_response: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| rpc_error(e.to_string()))?;

        if let Some(error) = rpc_response.error {
            return Err(AppError::Blockchain(classify_rpc_error(&error)));
        }

        serde_json::from_value(rpc_response.result.unwrap_or(Value::Null))
            .map_err(|e| rpc_error(format!("invalid {method} result: {e}")))
    }

    async fn quantity_call<P: Serialize>(&self, method: &str, params: P) -> Result<u64, AppError> {
        let value: String = self.rpc_call(method, params).await?;
        parse_quantity(&value)
    }

    /// Chain id, fetched once per client
    pub async fn chain_id(&self) -> Result<u64, AppError> {
        self.chain_id
            .get_or_try_init(|| async { self.quantity_call("eth_chainId", json!([])).await })
            .await
            .copied()
    }

    async fn pending_nonce(&self) -> Result<u64, AppError> {
        let sender = self.signer.address();
        self.quantity_call(
            "eth_getTransactionCount",
            json!([sender.to_string(), "pending"]),
        )
        .await
    }

    async fn gas_price(&self) -> Result<U256, AppError> {
        let value: String = self.rpc_call("eth_gasPrice", json!([])).await?;
        value.parse::<U256>().map_err(|e| rpc_error(e.to_string()))
    }

    async fn estimate_gas(&self, request: &TransactionRequest) -> Result<u64, AppError> {
        let estimate = self
            .quantity_call(
                "eth_estimateGas",
                json!([{
                    "from": self.signer.address().to_string(),
                    "to": request.to.to_string(),
                    "data": hex_data(&request.data),
                    "value": u256_quantity(&request.value),
                }]),
            )
            .await?;
        Ok(estimate.saturating_mul(self.config.gas_limit_multiplier_percent) / 100)
    }

    async fn send_raw(&self, raw: &[u8]) -> Result<TxHash, AppError> {
        self.rpc_call("eth_sendRawTransaction", json!([hex_data(raw)]))
            .await
    }
}

#[async_trait]
impl BlockchainClient for EvmRpcClient {
    fn network(&self) -> Network {
        self.network
    }

    fn sender_address(&self) -> Address {
        self.signer.address()
    }

    #[instrument(skip(self), fields(network = %self.network.as_str()))]
    async fn health_check(&self) -> Result<(), AppError> {
        self.block_number().await.map(|_| ())
    }

    async fn block_number(&self) -> Result<u64, AppError> {
        self.quantity_call("eth_blockNumber", json!([])).await
    }

    #[instrument(skip(self), fields(network = %self.network.as_str()))]
    async fn get_code(&self, address: &Address) -> Result<Vec<u8>, AppError> {
        let code: String = self
            .rpc_call("eth_getCode", json!([address.to_string(), "latest"]))
            .await?;
        decode_hex(&code).map_err(|e| rpc_error(e.to_string()))
    }

    async fn call(&self, to: &Address, data: &[u8]) -> Result<Vec<u8>, AppError> {
        let output: String = self
            .rpc_call(
                "eth_call",
                json!([{ "to": to.to_string(), "data": hex_data(data) }, "latest"]),
            )
            .await?;
        decode_hex(&output).map_err(|e| rpc_error(e.to_string()))
    }

    #[instrument(skip(self, request), fields(network = %self.network.as_str(), to = %request.to))]
    async fn send_transaction(&self, request: &TransactionRequest) -> Result<TxHash, AppError> {
        let chain_id = self.chain_id().await?;
        let gas_limit = match request.gas_limit {
            Some(gas_limit) => gas_limit,
            None => self.estimate_gas(request).await?,
        };
        let gas_price = self.gas_price().await?;

        let mut nonce_conflicts = 0;
        loop {
            let nonce = self.nonces.reserve(|| self.pending_nonce()).await?;
            let tx = LegacyTransaction {
                nonce,
                gas_price,
                gas_limit,
                to: request.to,
                value: request.value,
                data: request.data.clone(),
                chain_id,
            };
            let signature = match self.signer.sign_digest(&tx.signing_hash()).await {
                Ok(signature) => signature,
                Err(e) => {
                    self.nonces.reset().await;
                    return Err(e.into());
                }
            };
            let raw = tx.encode_signed(&signature);
            debug!(nonce = nonce, gas_limit = gas_limit, "Signed transaction");

            match self.send_raw(&raw).await {
                Ok(hash) => {
                    info!(hash = %hash, nonce = nonce, "Transaction sent");
                    return Ok(hash);
                }
                Err(AppError::Blockchain(BlockchainError::RpcError(message)))
                    if is_already_known(&message) =>
                {
                    let hash = raw_transaction_hash(&raw);
                    info!(hash = %hash, nonce = nonce, "Transaction already known to node");
                    return Ok(hash);
                }
                Err(AppError::Blockchain(BlockchainError::NonceConflict(message)))
                    if nonce_conflicts < self.config.nonce_retries =>
                {
                    nonce_conflicts += 1;
                    warn!(nonce = nonce, error = %message, "Nonce conflict, resyncing");
                    self.nonces.reset().await;
                }
                Err(e) => {
                    self.nonces.reset().await;
                    return Err(e);
                }
            }
        }
    }

    async fn get_transaction_receipt(
        &self,
        hash: &TxHash,
    ) -> Result<Option<TransactionReceipt>, AppError> {
        let receipt: Option<RpcReceipt> = self
            .rpc_call("eth_getTransactionReceipt", json!([hash.to_string()]))
            .await?;
        match receipt {
            // Some nodes return pending receipts without a block number
            Some(receipt) if receipt.block_number.is_some() => TransactionReceipt::try_from(receipt).map(Some),
            _ => Ok(None),
        }
    }

    #[instrument(skip(self), fields(network = %self.network.as_str()))]
    async fn wait_for_receipt(
        &self,
        hash: &TxHash,
        timeout: Duration,
    ) -> Result<TransactionReceipt, AppError> {
        let start = std::time::Instant::now();

        while start.elapsed() < timeout {
            match self.get_transaction_receipt(hash).await {
                Ok(Some(receipt)) => {
                    info!(hash = %hash, block = receipt.block_number, "Transaction mined");
                    return Ok(receipt);
                }
                Ok(None) => {
                    debug!(hash = %hash, "Transaction not yet mined");
                }
                Err(e) => {
                    warn!(hash = %hash, error = ?e, "Error fetching transaction receipt");
                }
            }
            tokio::time::sleep(self.config.receipt_poll_interval).await;
        }

        Err(AppError::Blockchain(BlockchainError::Timeout(format!(
            "Transaction {} not mined within {}s",
            hash,
            timeout.as_secs()
        ))))
    }
}
