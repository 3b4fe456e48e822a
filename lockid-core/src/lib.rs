//! LockID Core - value types for asset-lock funded identities
//!
//! This crate provides the building blocks shared by wallets and platform
//! nodes: signing keys, identities and their public keys, outpoints of
//! funding transactions, and the proofs that bind an asset lock to an
//! identity-affecting state transition.

use serde::{Deserialize, Serialize};
use std::fmt;

#[macro_use]
mod codec;

pub mod asset_lock;
pub mod crypto;
pub mod error;
pub mod identity;
pub mod merkle;

pub use asset_lock::{
    AssetLockProof, AssetLockProofBuilder, FundingTransaction, LockEvidence, LockedOutput,
    OutPoint, TxIn, TxOut, Txid,
};
pub use crypto::{KeyPair, PublicKeyHash};
pub use error::CoreError;
pub use identity::{Identity, IdentityId, IdentityPublicKey, KeyId};

/// Result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Consumable platform credits
pub type Credits = u64;

/// Smallest unit of the funding chain's currency
pub type Duffs = u64;

/// Signature schemes an identity key may use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyType {
    /// Compressed secp256k1 key, ECDSA signatures over the double SHA-256 digest
    EcdsaSecp256k1,
    /// Ed25519 key and signatures
    Ed25519,
}

impl Default for KeyType {
    fn default() -> Self {
        KeyType::EcdsaSecp256k1
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyType::EcdsaSecp256k1 => write!(f, "ECDSA_SECP256K1"),
            KeyType::Ed25519 => write!(f, "ED25519"),
        }
    }
}

/// Protocol version carried by identities and state transitions
pub const PROTOCOL_VERSION: u32 = 1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_key_type() {
        assert_eq!(KeyType::default(), KeyType::EcdsaSecp256k1);
    }

    #[test]
    fn test_key_type_display() {
        assert_eq!(KeyType::Ed25519.to_string(), "ED25519");
    }
}
