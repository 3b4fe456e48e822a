//! Error types for transition processing and its collaborators

use lockid_core::{CoreError, Credits, IdentityId, OutPoint, PublicKeyHash, Txid};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Broad class of a rejection, for callers deciding what to do next
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// May succeed later without changes, e.g. once a lock confirms
    Transient,
    /// The transition itself is malformed or incorrectly signed
    Validation,
    /// The transition conflicts with ledger state
    StateConflict,
    /// The identity cannot pay for the transition
    ResourceExhausted,
}

/// Reasons a state transition is rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Invalid state transition structure: {0}")]
    InvalidTransitionStructure(String),

    #[error("Invalid state transition signature: {0}")]
    InvalidSignature(String),

    #[error("Identity with first public key hash {public_key_hash} already exists")]
    FirstPublicKeyAlreadyExists { public_key_hash: PublicKeyHash },

    #[error("Asset lock transaction {txid} not found")]
    AssetLockTransactionNotFound { txid: Txid },

    #[error("Asset lock outpoint {outpoint} was already consumed")]
    OutpointAlreadyConsumed { outpoint: OutPoint },

    #[error("Asset lock output {outpoint} not found")]
    OutpointNotFound { outpoint: OutPoint },

    #[error("Invalid asset lock proof: {0}")]
    InvalidProof(String),

    #[error("Identity {identity_id} not found")]
    IdentityNotFound { identity_id: IdentityId },

    #[error("Not enough credits: need {required}, have {available}")]
    InsufficientCredits { required: Credits, available: Credits },

    #[error("Credit balance of identity {identity_id} would overflow")]
    BalanceOverflow { identity_id: IdentityId },

    #[error("Document conflict: {0}")]
    DocumentConflict(String),
}

impl TransitionError {
    /// Machine-readable error name reported to clients
    pub fn name(&self) -> &'static str {
        match self {
            TransitionError::InvalidTransitionStructure(_) => "InvalidStateTransitionStructureError",
            TransitionError::InvalidSignature(_) => "InvalidStateTransitionSignatureError",
            TransitionError::FirstPublicKeyAlreadyExists { .. } => {
                "IdentityFirstPublicKeyAlreadyExistsError"
            }
            TransitionError::AssetLockTransactionNotFound { .. } => {
                "IdentityAssetLockTransactionNotFoundError"
            }
            TransitionError::OutpointAlreadyConsumed { .. } => {
                "IdentityAssetLockTransactionOutPointAlreadyExistsError"
            }
            TransitionError::OutpointNotFound { .. } => {
                "IdentityAssetLockTransactionOutputNotFoundError"
            }
            TransitionError::InvalidProof(_) => "InvalidIdentityAssetLockProofError",
            TransitionError::IdentityNotFound { .. } => "IdentityNotFoundError",
            TransitionError::InsufficientCredits { .. } => "BalanceIsNotEnoughError",
            TransitionError::BalanceOverflow { .. } => "IdentityBalanceOverflowError",
            TransitionError::DocumentConflict(_) => "DocumentConflictError",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            TransitionError::AssetLockTransactionNotFound { .. } => ErrorKind::Transient,
            TransitionError::InvalidTransitionStructure(_)
            | TransitionError::InvalidSignature(_)
            | TransitionError::OutpointNotFound { .. }
            | TransitionError::InvalidProof(_) => ErrorKind::Validation,
            TransitionError::FirstPublicKeyAlreadyExists { .. }
            | TransitionError::OutpointAlreadyConsumed { .. }
            | TransitionError::IdentityNotFound { .. }
            | TransitionError::DocumentConflict(_) => ErrorKind::StateConflict,
            TransitionError::InsufficientCredits { .. }
            | TransitionError::BalanceOverflow { .. } => ErrorKind::ResourceExhausted,
        }
    }

    /// Whether resubmitting the same transition later can succeed
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// Structured form returned over the transition submission interface
    pub fn to_wire(&self) -> WireError {
        let code = match self.kind() {
            ErrorKind::Validation => "INVALID_ARGUMENT",
            ErrorKind::Transient | ErrorKind::StateConflict | ErrorKind::ResourceExhausted => {
                "FAILED_PRECONDITION"
            }
        };

        let message = match self {
            TransitionError::InsufficientCredits { .. } => {
                "Failed precondition: Not enough credits".to_string()
            }
            other => other.to_string(),
        };

        let mut wire = WireError {
            name: self.name().to_string(),
            code: code.to_string(),
            message,
            public_key_hash: None,
            outpoint: None,
            txid: None,
            required: None,
            available: None,
        };

        match self {
            TransitionError::FirstPublicKeyAlreadyExists { public_key_hash } => {
                wire.public_key_hash = Some(*public_key_hash);
            }
            TransitionError::AssetLockTransactionNotFound { txid } => wire.txid = Some(*txid),
            TransitionError::OutpointAlreadyConsumed { outpoint }
            | TransitionError::OutpointNotFound { outpoint } => wire.outpoint = Some(*outpoint),
            TransitionError::InsufficientCredits {
                required,
                available,
            } => {
                wire.required = Some(*required);
                wire.available = Some(*available);
            }
            _ => {}
        }

        wire
    }
}

/// Serializable rejection as seen by a remote client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireError {
    pub name: String,
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key_hash: Option<PublicKeyHash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outpoint: Option<OutPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txid: Option<Txid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<Credits>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available: Option<Credits>,
}

/// Failures reported by the funding chain
#[derive(Error, Debug)]
pub enum ChainError {
    #[error("Transaction rejected: {0}")]
    TransactionRejected(String),

    #[error("Input {0} is already spent")]
    DoubleSpend(OutPoint),

    #[error("Chain unavailable: {0}")]
    Unavailable(String),

    #[error("Cannot produce {requested} blocks in one request (limit {limit})")]
    TooManyBlocks { requested: u64, limit: u64 },

    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Configuration loading and validation failures
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Failures of the client-side register, top-up and write flows
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Transition rejected: {0}")]
    Transition(#[from] TransitionError),

    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    #[error("Gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        attempts: u32,
        last_error: TransitionError,
    },
}

impl ClientError {
    /// The rejection behind this failure, if the platform rejected the transition
    pub fn transition_error(&self) -> Option<&TransitionError> {
        match self {
            ClientError::Transition(e) => Some(e),
            ClientError::RetriesExhausted { last_error, .. } => Some(last_error),
            _ => None,
        }
    }
}
