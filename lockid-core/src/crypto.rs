//! Cryptographic primitives for LockID
//!
//! Identity keys sign state transitions with either ECDSA over secp256k1 or
//! Ed25519. Hashing follows the funding chain's conventions: double SHA-256
//! for transaction and identity identifiers, HASH160 for public key hashes.

use crate::{CoreError, KeyType, Result};
use ed25519_dalek::{Signer, Verifier};
use rand::rngs::OsRng;
use ripemd::Ripemd160;
use secp256k1::{ecdsa, Message, PublicKey, Secp256k1, SecretKey};
use secrecy::{ExposeSecret, Secret};
use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::Zeroizing;

/// Length of a HASH160 public key hash
pub const PUBLIC_KEY_HASH_LEN: usize = 20;

/// HASH160 of a serialized public key
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicKeyHash(pub [u8; PUBLIC_KEY_HASH_LEN]);

impl_readable_bytes_serde!(PublicKeyHash, PUBLIC_KEY_HASH_LEN, PublicKeyHash::to_hex, PublicKeyHash::from_hex);

impl PublicKeyHash {
    /// Hash a serialized public key
    pub fn of(public_key: &[u8]) -> Self {
        Self(hash160(public_key))
    }

    /// Parse a hex-encoded hash
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s)
            .map_err(|e| CoreError::InvalidPublicKey(format!("Invalid key hash hex: {}", e)))?;
        let hash: [u8; PUBLIC_KEY_HASH_LEN] = bytes.try_into().map_err(|_| {
            CoreError::InvalidPublicKey("Key hash must be 20 bytes".to_string())
        })?;
        Ok(Self(hash))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for PublicKeyHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for PublicKeyHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKeyHash({})", self.to_hex())
    }
}

/// Double SHA-256
pub fn sha256d(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    Sha256::digest(first).into()
}

/// RIPEMD-160 of SHA-256
pub fn hash160(data: &[u8]) -> [u8; PUBLIC_KEY_HASH_LEN] {
    Ripemd160::digest(Sha256::digest(data)).into()
}

/// Signing key pair for one identity key
pub struct KeyPair {
    pub key_type: KeyType,
    pub public_key: Vec<u8>,
    private_key: Secret<Vec<u8>>,
}

impl Clone for KeyPair {
    fn clone(&self) -> Self {
        Self {
            key_type: self.key_type,
            public_key: self.public_key.clone(),
            private_key: Secret::new(self.private_key.expose_secret().clone()),
        }
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("key_type", &self.key_type)
            .field("public_key", &hex::encode(&self.public_key))
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}

impl KeyPair {
    /// Generate a fresh key pair from the operating system RNG
    pub fn generate(key_type: KeyType) -> Result<Self> {
        match key_type {
            KeyType::EcdsaSecp256k1 => {
                let secp = Secp256k1::new();
                let (secret_key, public_key) = secp.generate_keypair(&mut OsRng);
                Ok(Self {
                    key_type,
                    public_key: public_key.serialize().to_vec(),
                    private_key: Secret::new(secret_key.secret_bytes().to_vec()),
                })
            }
            KeyType::Ed25519 => {
                let signing_key = ed25519_dalek::SigningKey::generate(&mut OsRng);
                Ok(Self {
                    key_type,
                    public_key: signing_key.verifying_key().to_bytes().to_vec(),
                    private_key: Secret::new(signing_key.to_bytes().to_vec()),
                })
            }
        }
    }

    /// Restore a key pair from raw secret key bytes
    pub fn from_secret_bytes(key_type: KeyType, secret: &[u8]) -> Result<Self> {
        let public_key = match key_type {
            KeyType::EcdsaSecp256k1 => {
                let secp = Secp256k1::signing_only();
                let secret_key = SecretKey::from_slice(secret)
                    .map_err(|e| CoreError::CryptoError(format!("Invalid secret key: {}", e)))?;
                PublicKey::from_secret_key(&secp, &secret_key).serialize().to_vec()
            }
            KeyType::Ed25519 => {
                let signing_key = ed25519_dalek::SigningKey::from_bytes(&*ed25519_secret(secret)?);
                signing_key.verifying_key().to_bytes().to_vec()
            }
        };

        Ok(Self {
            key_type,
            public_key,
            private_key: Secret::new(secret.to_vec()),
        })
    }

    /// Raw secret key bytes
    pub fn secret_bytes(&self) -> &[u8] {
        self.private_key.expose_secret()
    }

    /// HASH160 of the public key
    pub fn public_key_hash(&self) -> PublicKeyHash {
        PublicKeyHash::of(&self.public_key)
    }

    /// Sign arbitrary data
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        match self.key_type {
            KeyType::EcdsaSecp256k1 => {
                let secp = Secp256k1::signing_only();
                let secret_key = SecretKey::from_slice(self.private_key.expose_secret())
                    .map_err(|e| CoreError::CryptoError(format!("Invalid secret key: {}", e)))?;
                let message = Message::from_digest_slice(&sha256d(data))
                    .map_err(|e| CoreError::CryptoError(format!("Invalid digest: {}", e)))?;
                Ok(secp.sign_ecdsa(&message, &secret_key).serialize_compact().to_vec())
            }
            KeyType::Ed25519 => {
                let signing_key =
                    ed25519_dalek::SigningKey::from_bytes(&*ed25519_secret(self.private_key.expose_secret())?);
                Ok(signing_key.sign(data).to_bytes().to_vec())
            }
        }
    }

    /// Verify a signature made by this key pair
    pub fn verify(&self, data: &[u8], signature: &[u8]) -> Result<bool> {
        verify_signature(self.key_type, &self.public_key, data, signature)
    }
}

/// Verify a signature against a serialized public key.
///
/// Returns `Ok(false)` for a well-formed signature that does not match, and
/// an error when the key or the signature cannot be decoded at all.
pub fn verify_signature(
    key_type: KeyType,
    public_key: &[u8],
    data: &[u8],
    signature: &[u8],
) -> Result<bool> {
    match key_type {
        KeyType::EcdsaSecp256k1 => {
            let secp = Secp256k1::verification_only();
            let public_key = PublicKey::from_slice(public_key)
                .map_err(|e| CoreError::InvalidPublicKey(e.to_string()))?;
            let signature = ecdsa::Signature::from_compact(signature)
                .map_err(|e| CoreError::InvalidSignature(e.to_string()))?;
            let message = Message::from_digest_slice(&sha256d(data))
                .map_err(|e| CoreError::CryptoError(format!("Invalid digest: {}", e)))?;
            Ok(secp.verify_ecdsa(&message, &signature, &public_key).is_ok())
        }
        KeyType::Ed25519 => {
            let key_bytes: [u8; 32] = public_key.try_into().map_err(|_| {
                CoreError::InvalidPublicKey("Ed25519 public key must be 32 bytes".to_string())
            })?;
            let verifying_key = ed25519_dalek::VerifyingKey::from_bytes(&key_bytes)
                .map_err(|e| CoreError::InvalidPublicKey(e.to_string()))?;
            let signature = ed25519_dalek::Signature::from_slice(signature)
                .map_err(|e| CoreError::InvalidSignature(e.to_string()))?;
            Ok(verifying_key.verify(data, &signature).is_ok())
        }
    }
}

/// Check that bytes decode as a public key of the given type
pub fn validate_public_key(key_type: KeyType, public_key: &[u8]) -> Result<()> {
    match key_type {
        KeyType::EcdsaSecp256k1 => PublicKey::from_slice(public_key)
            .map(|_| ())
            .map_err(|e| CoreError::InvalidPublicKey(e.to_string())),
        KeyType::Ed25519 => {
            let key_bytes: [u8; 32] = public_key.try_into().map_err(|_| {
                CoreError::InvalidPublicKey("Ed25519 public key must be 32 bytes".to_string())
            })?;
            ed25519_dalek::VerifyingKey::from_bytes(&key_bytes)
                .map(|_| ())
                .map_err(|e| CoreError::InvalidPublicKey(e.to_string()))
        }
    }
}

fn ed25519_secret(secret: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
    let bytes: [u8; 32] = secret
        .try_into()
        .map_err(|_| CoreError::CryptoError("Ed25519 secret key must be 32 bytes".to_string()))?;
    Ok(Zeroizing::new(bytes))
}
