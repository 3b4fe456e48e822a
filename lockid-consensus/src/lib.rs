//! LockID Consensus - identity ledger and state transition processing
//!
//! A platform node accepts signed state transitions that create identities
//! from asset locks, top them up with further locks, and spend the resulting
//! credits on document writes. Every transition is validated against the
//! ledger and a view of the funding chain before it is applied atomically.

pub mod chain;
pub mod client;
pub mod config;
pub mod error;
pub mod fees;
pub mod ledger;
pub mod locks;
pub mod platform;
pub mod transition;
pub mod validator;
pub mod waiter;

pub use chain::{ChainClient, ChainStatus, ChainView, ConfirmedTx, MemoryChain};
pub use client::{PlatformClient, RetryPolicy};
pub use config::PlatformConfig;
pub use error::{ChainError, ClientError, ConfigError, ErrorKind, TransitionError, WireError};
pub use fees::{FeeSchedule, FixedFeeSchedule, SizeFeeSchedule};
pub use ledger::{IdentityLedger, StoredDocument};
pub use platform::Platform;
pub use transition::{
    DocumentAction, DocumentKey, DocumentOperation, StateTransition, TransitionKind,
    TransitionPayload,
};
pub use validator::{OutpointState, TransitionValidator};
pub use waiter::ConfirmationWaiter;

/// Result type for state transition processing
pub type Result<T> = std::result::Result<T, TransitionError>;

/// Height of a block on the funding chain
pub type BlockHeight = u64;

/// Monotonic ledger revision, bumped once per applied transition
pub type Revision = u64;

/// Defaults shared by configuration and components
pub mod constants {
    use lockid_core::Credits;

    /// Credits granted per locked duff
    pub const CREDITS_PER_DUFF: Credits = 1000;

    /// Seconds between chain status reads while waiting for blocks
    pub const POLL_INTERVAL_SECS: u64 = 30;

    /// Confirmations an asset lock needs before it can be consumed
    pub const MIN_CONFIRMATIONS: u64 = 1;

    /// Maximum operations in one documents batch
    pub const MAX_BATCH_OPERATIONS: usize = 10;

    /// Number of mutex shards in the validator's lock table
    pub const LOCK_SHARDS: usize = 64;

    /// Processing fee charged on identity creation by the fixed schedule
    pub const IDENTITY_CREATE_FEE: Credits = 174;

    /// Processing fee charged on identity top-up by the fixed schedule
    pub const IDENTITY_TOP_UP_FEE: Credits = 174;

    /// Fee per document operation charged by the fixed schedule
    pub const DOCUMENT_OPERATION_FEE: Credits = 1000;
}

#[cfg(test)]
mod tests {
    use super::constants::*;

    #[test]
    fn test_one_duff_registration_leaves_826_credits() {
        assert_eq!(CREDITS_PER_DUFF - IDENTITY_CREATE_FEE, 826);
    }

    #[test]
    fn test_one_duff_does_not_cover_a_document_write() {
        assert!(CREDITS_PER_DUFF - IDENTITY_CREATE_FEE < DOCUMENT_OPERATION_FEE);
    }
}
