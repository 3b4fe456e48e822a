//! Platform node facade: transition submission and identity queries

use crate::chain::ChainView;
use crate::config::PlatformConfig;
use crate::error::WireError;
use crate::fees::FeeSchedule;
use crate::ledger::{IdentityLedger, StoredDocument};
use crate::transition::{DocumentKey, StateTransition};
use crate::validator::{OutpointState, TransitionValidator};
use crate::{Result, Revision, TransitionError};
use lockid_core::{Identity, IdentityId, OutPoint, PublicKeyHash};
use std::sync::Arc;

/// The state a platform node serves to clients
pub struct Platform {
    validator: TransitionValidator,
    ledger: Arc<IdentityLedger>,
}

impl Platform {
    /// Create a platform with an empty ledger and the configured fee schedule
    pub fn new(chain: Arc<dyn ChainView>, config: &PlatformConfig) -> Self {
        Self::with_fee_schedule(chain, config.credits.fees.build(), config)
    }

    pub fn with_fee_schedule(
        chain: Arc<dyn ChainView>,
        fees: Arc<dyn FeeSchedule>,
        config: &PlatformConfig,
    ) -> Self {
        let ledger = Arc::new(IdentityLedger::new());
        let validator = TransitionValidator::new(ledger.clone(), chain, fees, config);
        Self { validator, ledger }
    }

    /// Validate and apply a signed transition
    pub fn submit(&self, transition: &StateTransition) -> Result<Revision> {
        self.validator.apply(transition)
    }

    /// Submit an encoded transition, reporting rejections in wire form
    pub fn submit_wire(&self, bytes: &[u8]) -> std::result::Result<Revision, WireError> {
        let transition = StateTransition::from_bytes(bytes).map_err(|e| {
            TransitionError::InvalidTransitionStructure(format!("Undecodable transition: {}", e))
                .to_wire()
        })?;
        self.submit(&transition).map_err(|e| e.to_wire())
    }

    pub fn get_identity(&self, identity_id: &IdentityId) -> Option<Identity> {
        self.ledger.get(identity_id)
    }

    pub fn get_identity_by_first_public_key(&self, hash: &PublicKeyHash) -> Option<Identity> {
        self.ledger.identity_by_first_public_key_hash(hash)
    }

    pub fn get_identity_id_by_first_public_key(&self, hash: &PublicKeyHash) -> Option<IdentityId> {
        self.ledger.get_by_first_public_key_hash(hash)
    }

    pub fn get_document(&self, key: &DocumentKey) -> Option<StoredDocument> {
        self.ledger.document(key)
    }

    pub fn outpoint_state(&self, outpoint: &OutPoint) -> OutpointState {
        self.validator.outpoint_state(outpoint)
    }

    /// Revision of the last applied transition
    pub fn revision(&self) -> Revision {
        self.ledger.revision()
    }

    pub fn ledger(&self) -> &IdentityLedger {
        &self.ledger
    }
}
