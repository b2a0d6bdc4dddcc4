//! Transaction signer strategies.
//!
//! Decouples signing from the RPC client so that raw private keys are not held
//! in the client and the multi-sig coordinator can reuse the same signers.

use async_trait::async_trait;
use secp256k1::{All, Message, PublicKey, Secp256k1, SecretKey};
use secrecy::{ExposeSecret, SecretString};

use crate::domain::abi::keccak256;
use crate::domain::types::decode_hex;
use crate::domain::{Address, BlockchainError, Signature, TransactionSigner};

/// Parse a hex-encoded secp256k1 private key. Used only within local scope.
fn secret_key_from_secret(secret: &SecretString) -> Result<SecretKey, BlockchainError> {
    let bytes = decode_hex(secret.expose_secret().trim())
        .map_err(|e| BlockchainError::InvalidSignature(e.to_string()))?;
    if bytes.len() != 32 {
        return Err(BlockchainError::InvalidSignature(format!(
            "Key must be 32 bytes, got {}",
            bytes.len()
        )));
    }
    SecretKey::from_slice(&bytes).map_err(|e| BlockchainError::InvalidSignature(e.to_string()))
}

/// EVM address of a public key: last 20 bytes of keccak(uncompressed key without prefix).
#[must_use]
pub fn address_from_public_key(public_key: &PublicKey) -> Address {
    let uncompressed = public_key.serialize_uncompressed();
    let hash = keccak256(&uncompressed[1..]);
    let mut address = [0u8; 20];
    address.copy_from_slice(&hash[12..]);
    Address(address)
}

/// Local signer: holds the secret in memory, parses it only when signing.
pub struct LocalSigner {
    secret: SecretString,
    address: Address,
    secp: Secp256k1<All>,
}

impl LocalSigner {
    /// Build a local signer from a hex-encoded 32-byte private key.
    pub fn new(secret: SecretString) -> Result<Self, BlockchainError> {
        let secp = Secp256k1::new();
        let secret_key = secret_key_from_secret(&secret)?;
        let address = address_from_public_key(&PublicKey::from_secret_key(&secp, &secret_key));
        Ok(Self {
            secret,
            address,
            secp,
        })
    }

    /// Ephemeral signer with a freshly generated key.
    #[must_use]
    pub fn random() -> Self {
        let secp = Secp256k1::new();
        let secret_key = SecretKey::new(&mut secp256k1::rand::thread_rng());
        let address = address_from_public_key(&PublicKey::from_secret_key(&secp, &secret_key));
        Self {
            secret: SecretString::from(hex::encode(secret_key.secret_bytes())),
            address,
            secp,
        }
    }
}

#[async_trait]
impl TransactionSigner for LocalSigner {
    fn address(&self) -> Address {
        self.address
    }

    async fn sign_digest(&self, digest: &[u8; 32]) -> Result<Signature, BlockchainError> {
        let secret_key = secret_key_from_secret(&self.secret)?;
        let message = Message::from_digest_slice(digest)
            .map_err(|e| BlockchainError::InvalidSignature(e.to_string()))?;
        let (recovery_id, compact) = self
            .secp
            .sign_ecdsa_recoverable(&message, &secret_key)
            .serialize_compact();

        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&compact[..32]);
        s.copy_from_slice(&compact[32..]);
        Ok(Signature {
            r,
            s,
            recovery_id: recovery_id.to_i32() as u8,
        })
    }
}

/// Recover the signing address of a digest, as `ecrecover` would.
pub fn recover_address(digest: &[u8; 32], signature: &Signature) -> Result<Address, BlockchainError> {
    use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};

    let recovery_id = RecoveryId::from_i32(i32::from(signature.recovery_id))
        .map_err(|e| BlockchainError::InvalidSignature(e.to_string()))?;
    let mut compact = [0u8; 64];
    compact[..32].copy_from_slice(&signature.r);
    compact[32..].copy_from_slice(&signature.s);
    let recoverable = RecoverableSignature::from_compact(&compact, recovery_id)
        .map_err(|e| BlockchainError::InvalidSignature(e.to_string()))?;
    let message = Message::from_digest_slice(digest)
        .map_err(|e| BlockchainError::InvalidSignature(e.to_string()))?;
    let public_key = Secp256k1::verification_only()
        .recover_ecdsa(&message, &recoverable)
        .map_err(|e| BlockchainError::InvalidSignature(e.to_string()))?;
    Ok(address_from_public_key(&public_key))
}
