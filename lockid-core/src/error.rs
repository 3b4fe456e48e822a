//! Error types for LockID core operations

use crate::asset_lock::{OutPoint, Txid};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Cryptographic operation failed: {0}")]
    CryptoError(String),

    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Invalid signature encoding: {0}")]
    InvalidSignature(String),

    #[error("Invalid identity format: {0}")]
    InvalidIdentity(String),

    #[error("Invalid outpoint: {0}")]
    InvalidOutPoint(String),

    #[error("Asset lock output {0} not found")]
    OutpointNotFound(OutPoint),

    #[error("Transaction {0} has no matching asset lock output")]
    LockOutputNotFound(Txid),

    #[error("Invalid asset lock proof: {0}")]
    InvalidProof(String),

    #[error("Balance overflow")]
    BalanceOverflow,

    #[error("Encoding error: {0}")]
    EncodingError(#[from] bincode::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}
