//! Signed state transitions and document operations

use lockid_core::crypto::sha256d;
use lockid_core::{
    AssetLockProof, IdentityId, IdentityPublicKey, KeyId, KeyPair, Result, PROTOCOL_VERSION,
};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use std::fmt;

/// The kinds of state transition a platform node accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransitionKind {
    IdentityCreate,
    IdentityTopUp,
    DocumentsBatch,
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionKind::IdentityCreate => write!(f, "identityCreate"),
            TransitionKind::IdentityTopUp => write!(f, "identityTopUp"),
            TransitionKind::DocumentsBatch => write!(f, "documentsBatch"),
        }
    }
}

/// What a document operation does to its target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentAction {
    Create,
    Replace,
    Delete,
}

/// Address of a stored document
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentKey {
    pub contract_id: String,
    pub document_type: String,
    pub document_id: String,
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.contract_id, self.document_type, self.document_id)
    }
}

/// One write in a documents batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentOperation {
    pub action: DocumentAction,
    pub contract_id: String,
    pub document_type: String,
    pub document_id: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl DocumentOperation {
    /// Create a new document whose id is derived from the owner and `entropy`
    pub fn create(
        contract_id: &str,
        document_type: &str,
        owner_id: &IdentityId,
        entropy: &[u8],
        data: serde_json::Value,
    ) -> Self {
        Self {
            action: DocumentAction::Create,
            contract_id: contract_id.to_string(),
            document_type: document_type.to_string(),
            document_id: Self::generate_document_id(contract_id, owner_id, document_type, entropy),
            data,
        }
    }

    pub fn replace(key: DocumentKey, data: serde_json::Value) -> Self {
        Self {
            action: DocumentAction::Replace,
            contract_id: key.contract_id,
            document_type: key.document_type,
            document_id: key.document_id,
            data,
        }
    }

    pub fn delete(key: DocumentKey) -> Self {
        Self {
            action: DocumentAction::Delete,
            contract_id: key.contract_id,
            document_type: key.document_type,
            document_id: key.document_id,
            data: serde_json::Value::Null,
        }
    }

    /// `base58(sha256d(contract || owner || type || entropy))`
    pub fn generate_document_id(
        contract_id: &str,
        owner_id: &IdentityId,
        document_type: &str,
        entropy: &[u8],
    ) -> String {
        let mut buf = Vec::with_capacity(
            contract_id.len() + 32 + document_type.len() + entropy.len(),
        );
        buf.extend_from_slice(contract_id.as_bytes());
        buf.extend_from_slice(owner_id.as_bytes());
        buf.extend_from_slice(document_type.as_bytes());
        buf.extend_from_slice(entropy);
        bs58::encode(sha256d(&buf)).into_string()
    }

    pub fn key(&self) -> DocumentKey {
        DocumentKey {
            contract_id: self.contract_id.clone(),
            document_type: self.document_type.clone(),
            document_id: self.document_id.clone(),
        }
    }
}

/// Transition-specific content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransitionPayload {
    /// Register a new identity funded by an asset lock
    #[serde(rename_all = "camelCase")]
    IdentityCreate {
        asset_lock_proof: AssetLockProof,
        public_keys: Vec<IdentityPublicKey>,
    },
    /// Add the credits of another asset lock to an existing identity
    #[serde(rename_all = "camelCase")]
    IdentityTopUp {
        identity_id: IdentityId,
        asset_lock_proof: AssetLockProof,
    },
    /// Billable document writes by one identity
    #[serde(rename_all = "camelCase")]
    DocumentsBatch {
        owner_id: IdentityId,
        operations: Vec<DocumentOperation>,
    },
}

/// A signed request to change identity or credit state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateTransition {
    pub protocol_version: u32,
    pub payload: TransitionPayload,
    pub signature_public_key_id: KeyId,
    #[serde(with = "hex")]
    pub signature: Vec<u8>,
}

impl StateTransition {
    /// Create an unsigned transition
    pub fn new(payload: TransitionPayload) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            payload,
            signature_public_key_id: 0,
            signature: Vec::new(),
        }
    }

    pub fn identity_create(
        asset_lock_proof: AssetLockProof,
        public_keys: Vec<IdentityPublicKey>,
    ) -> Self {
        Self::new(TransitionPayload::IdentityCreate {
            asset_lock_proof,
            public_keys,
        })
    }

    pub fn identity_top_up(identity_id: IdentityId, asset_lock_proof: AssetLockProof) -> Self {
        Self::new(TransitionPayload::IdentityTopUp {
            identity_id,
            asset_lock_proof,
        })
    }

    pub fn documents_batch(owner_id: IdentityId, operations: Vec<DocumentOperation>) -> Self {
        Self::new(TransitionPayload::DocumentsBatch {
            owner_id,
            operations,
        })
    }

    /// Sign with `keypair`, registered under `key_id`
    pub fn sign(&mut self, keypair: &KeyPair, key_id: KeyId) -> Result<()> {
        self.signature_public_key_id = key_id;
        let signing_data = self.signing_data()?;
        self.signature = keypair.sign(&signing_data)?;
        Ok(())
    }

    /// Get data that should be signed (excludes signature field)
    pub fn signing_data(&self) -> Result<Vec<u8>> {
        let signable = SignableTransition {
            protocol_version: self.protocol_version,
            payload: &self.payload,
            signature_public_key_id: self.signature_public_key_id,
        };

        Ok(serde_json::to_vec(&signable)?)
    }

    /// Get the transition hash
    pub fn hash(&self) -> Result<[u8; 32]> {
        let mut hasher = Sha3_256::new();
        hasher.update(self.to_bytes()?);
        Ok(hasher.finalize().into())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Encoded size in bytes, the basis of size-priced fees
    pub fn serialized_size(&self) -> Result<usize> {
        Ok(self.to_bytes()?.len())
    }

    pub fn kind(&self) -> TransitionKind {
        match self.payload {
            TransitionPayload::IdentityCreate { .. } => TransitionKind::IdentityCreate,
            TransitionPayload::IdentityTopUp { .. } => TransitionKind::IdentityTopUp,
            TransitionPayload::DocumentsBatch { .. } => TransitionKind::DocumentsBatch,
        }
    }

    /// The identity this transition creates or acts on
    pub fn identity_id(&self) -> IdentityId {
        match &self.payload {
            TransitionPayload::IdentityCreate {
                asset_lock_proof, ..
            } => IdentityId::from_outpoint(&asset_lock_proof.outpoint),
            TransitionPayload::IdentityTopUp { identity_id, .. } => *identity_id,
            TransitionPayload::DocumentsBatch { owner_id, .. } => *owner_id,
        }
    }

    pub fn asset_lock_proof(&self) -> Option<&AssetLockProof> {
        match &self.payload {
            TransitionPayload::IdentityCreate {
                asset_lock_proof, ..
            }
            | TransitionPayload::IdentityTopUp {
                asset_lock_proof, ..
            } => Some(asset_lock_proof),
            TransitionPayload::DocumentsBatch { .. } => None,
        }
    }
}

/// Transition data for signing (excludes signature to avoid recursion)
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignableTransition<'a> {
    protocol_version: u32,
    payload: &'a TransitionPayload,
    signature_public_key_id: KeyId,
}
