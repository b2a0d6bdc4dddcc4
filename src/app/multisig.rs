//! Co-signing for the home MultiSigWallet.

use std::sync::Arc;

use tracing::{debug, instrument};

use crate::domain::abi;
use crate::domain::contracts::multisig;
use crate::domain::{
    Address, AppError, BlockchainClient, ConfigError, TransactionSigner, U256,
};

/// Collects owner signatures for `MultiSigWallet.execute`.
pub struct MultiSigCoordinator {
    signers: Vec<Arc<dyn TransactionSigner>>,
    threshold: usize,
}

impl MultiSigCoordinator {
    /// Signers are ordered by address once, up front. The first `threshold`
    /// of them sign every request.
    pub fn new(
        mut signers: Vec<Arc<dyn TransactionSigner>>,
        threshold: usize,
    ) -> Result<Self, AppError> {
        if threshold == 0 || threshold > signers.len() {
            return Err(AppError::Config(ConfigError::InvalidValue {
                key: "MULTISIG_THRESHOLD".to_string(),
                message: format!(
                    "threshold {threshold} must be between 1 and the {} configured signers",
                    signers.len()
                ),
            }));
        }
        signers.sort_by_key(|signer| signer.address());
        Ok(Self { signers, threshold })
    }

    #[must_use]
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Addresses that sign, ascending.
    #[must_use]
    pub fn signer_addresses(&self) -> Vec<Address> {
        self.signers
            .iter()
            .take(self.threshold)
            .map(|signer| signer.address())
            .collect()
    }

    /// Concatenated 65-byte signatures authorizing `wallet` to call
    /// `to` with `value` and `data` at the wallet's current nonce.
    #[instrument(skip(self, client, data), fields(wallet = %wallet, to = %to))]
    pub async fn sign(
        &self,
        client: &dyn BlockchainClient,
        wallet: Address,
        to: Address,
        value: U256,
        data: &[u8],
    ) -> Result<Vec<u8>, AppError> {
        let nonce_output = client.call(&wallet, &multisig::nonce()).await?;
        let nonce = abi::decode_uint(&nonce_output, 0)?;
        let hash = multisig::sign_hash(wallet, to, value, data, nonce);
        debug!(nonce = %nonce, signers = self.threshold, "Collecting multi-sig signatures");

        let mut signatures = Vec::with_capacity(65 * self.threshold);
        for signer in self.signers.iter().take(self.threshold) {
            let signature = signer.sign_personal_message(&hash).await?;
            signatures.extend_from_slice(&signature.to_rsv_bytes());
        }
        Ok(signatures)
    }
}
