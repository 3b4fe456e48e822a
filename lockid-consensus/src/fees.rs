//! Processing fees charged for state transitions

use crate::transition::{StateTransition, TransitionPayload};
use crate::{constants, Result, TransitionError};
use lockid_core::Credits;
use std::fmt;

/// Prices a state transition in credits
pub trait FeeSchedule: Send + Sync + fmt::Debug {
    fn fee_for(&self, transition: &StateTransition) -> Result<Credits>;
}

/// Charges a fixed price per serialized byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeFeeSchedule {
    pub price_per_byte: Credits,
}

impl FeeSchedule for SizeFeeSchedule {
    fn fee_for(&self, transition: &StateTransition) -> Result<Credits> {
        let size = transition
            .serialized_size()
            .map_err(|e| TransitionError::InvalidTransitionStructure(e.to_string()))?;
        Ok(self.price_per_byte.saturating_mul(size as Credits))
    }
}

/// Constant fee per transition kind, and per operation for document batches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedFeeSchedule {
    pub identity_create: Credits,
    pub identity_top_up: Credits,
    pub per_document_operation: Credits,
}

impl Default for FixedFeeSchedule {
    fn default() -> Self {
        Self {
            identity_create: constants::IDENTITY_CREATE_FEE,
            identity_top_up: constants::IDENTITY_TOP_UP_FEE,
            per_document_operation: constants::DOCUMENT_OPERATION_FEE,
        }
    }
}

impl FeeSchedule for FixedFeeSchedule {
    fn fee_for(&self, transition: &StateTransition) -> Result<Credits> {
        Ok(match &transition.payload {
            TransitionPayload::IdentityCreate { .. } => self.identity_create,
            TransitionPayload::IdentityTopUp { .. } => self.identity_top_up,
            TransitionPayload::DocumentsBatch { operations, .. } => self
                .per_document_operation
                .saturating_mul(operations.len() as Credits),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transition::DocumentOperation;
    use lockid_core::IdentityId;
    use serde_json::json;

    fn batch(count: usize) -> StateTransition {
        let owner = IdentityId([2; 32]);
        let operations = (0..count)
            .map(|i| DocumentOperation::create("c", "note", &owner, &[i as u8], json!({})))
            .collect();
        StateTransition::documents_batch(owner, operations)
    }

    #[test]
    fn test_fixed_fee_scales_with_operations() {
        let fees = FixedFeeSchedule::default();
        assert_eq!(fees.fee_for(&batch(1)).unwrap(), 1000);
        assert_eq!(fees.fee_for(&batch(3)).unwrap(), 3000);
    }

    #[test]
    fn test_size_fee_tracks_encoding() {
        let fees = SizeFeeSchedule { price_per_byte: 2 };
        let transition = batch(2);
        let size = transition.serialized_size().unwrap() as Credits;

        assert_eq!(fees.fee_for(&transition).unwrap(), size * 2);
        assert!(fees.fee_for(&batch(4)).unwrap() > fees.fee_for(&transition).unwrap());
    }
}
