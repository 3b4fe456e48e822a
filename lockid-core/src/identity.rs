//! Core identity structures and operations

use crate::asset_lock::OutPoint;
use crate::crypto::{self, sha256d, KeyPair, PublicKeyHash};
use crate::{CoreError, Credits, KeyType, Result, PROTOCOL_VERSION};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Index of a key within one identity
pub type KeyId = u32;

/// Identity identifier, derived from the outpoint that funded it
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityId(pub [u8; 32]);

impl_readable_bytes_serde!(IdentityId, 32, IdentityId::to_base58, IdentityId::from_base58);

impl IdentityId {
    /// Derive the identifier of the identity funded by `outpoint`
    pub fn from_outpoint(outpoint: &OutPoint) -> Self {
        Self(sha256d(&outpoint.to_bytes()))
    }

    pub fn from_base58(s: &str) -> Result<Self> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|e| CoreError::InvalidIdentity(format!("Invalid base58: {}", e)))?;
        let id: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CoreError::InvalidIdentity("Identity id must be 32 bytes".to_string()))?;
        Ok(Self(id))
    }

    pub fn to_base58(&self) -> String {
        bs58::encode(self.0).into_string()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base58())
    }
}

impl fmt::Debug for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentityId({})", self.to_base58())
    }
}

/// A public key registered on an identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityPublicKey {
    pub id: KeyId,
    #[serde(rename = "type")]
    pub key_type: KeyType,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    #[serde(default)]
    pub disabled: bool,
}

impl IdentityPublicKey {
    pub fn new(id: KeyId, key_type: KeyType, data: Vec<u8>) -> Self {
        Self {
            id,
            key_type,
            data,
            disabled: false,
        }
    }

    /// Register the public half of `keypair` under `id`
    pub fn from_keypair(id: KeyId, keypair: &KeyPair) -> Self {
        Self::new(id, keypair.key_type, keypair.public_key.clone())
    }

    /// HASH160 of the key data
    pub fn hash(&self) -> PublicKeyHash {
        PublicKeyHash::of(&self.data)
    }

    pub fn is_enabled(&self) -> bool {
        !self.disabled
    }

    /// Check that the key data decodes for its key type
    pub fn validate(&self) -> Result<()> {
        crypto::validate_public_key(self.key_type, &self.data)
    }

    pub fn verify(&self, data: &[u8], signature: &[u8]) -> Result<bool> {
        crypto::verify_signature(self.key_type, &self.data, data, signature)
    }
}

/// Identity record as stored by a platform node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub protocol_version: u32,
    pub id: IdentityId,
    pub public_keys: Vec<IdentityPublicKey>,
    pub balance: Credits,
    pub revision: u64,
}

impl Identity {
    /// Create an identity with zero balance
    pub fn new(id: IdentityId, public_keys: Vec<IdentityPublicKey>) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            id,
            public_keys,
            balance: 0,
            revision: 0,
        }
    }

    pub fn public_key(&self, key_id: KeyId) -> Option<&IdentityPublicKey> {
        self.public_keys.iter().find(|key| key.id == key_id)
    }

    /// The key at index 0, unique across all identities
    pub fn first_public_key(&self) -> Option<&IdentityPublicKey> {
        self.public_key(0)
    }

    pub fn first_public_key_hash(&self) -> Option<PublicKeyHash> {
        self.first_public_key().map(IdentityPublicKey::hash)
    }

    pub fn increase_balance(&mut self, amount: Credits) -> Result<Credits> {
        self.balance = self
            .balance
            .checked_add(amount)
            .ok_or(CoreError::BalanceOverflow)?;
        Ok(self.balance)
    }

    /// Debit `amount`; returns `None` and leaves the balance untouched if it would go negative
    pub fn reduce_balance(&mut self, amount: Credits) -> Option<Credits> {
        let remaining = self.balance.checked_sub(amount)?;
        self.balance = remaining;
        Some(remaining)
    }

    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
