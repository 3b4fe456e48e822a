//! State transition validation
//!
//! Checks run in a fixed order and stop at the first failure: structure,
//! signature, outpoint consumption, first-key uniqueness, asset lock proof,
//! then funds. Every check only reads; a transition that passes them all is
//! handed to the ledger as one update. The striped lock table is held across
//! both steps, so no other transition touching the same outpoint, identity or
//! first key can slip in between the check and the commit.

use crate::chain::ChainView;
use crate::config::PlatformConfig;
use crate::fees::FeeSchedule;
use crate::ledger::{IdentityLedger, LedgerUpdate};
use crate::locks::{LockKey, LockTable};
use crate::transition::{DocumentAction, DocumentOperation, StateTransition, TransitionPayload};
use crate::{constants, Result, Revision, TransitionError};
use lockid_core::{
    AssetLockProof, CoreError, Credits, Duffs, Identity, IdentityId, IdentityPublicKey,
    LockedOutput, OutPoint, PublicKeyHash, PROTOCOL_VERSION,
};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Lifecycle of an asset lock outpoint as seen by this node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutpointState {
    /// The chain view does not know the lock transaction
    Unseen,
    /// The lock transaction is known and the outpoint is unconsumed
    Locked,
    /// An identity transition has consumed the outpoint
    Consumed,
}

/// Admits state transitions into the identity ledger
pub struct TransitionValidator {
    ledger: Arc<IdentityLedger>,
    chain: Arc<dyn ChainView>,
    fees: Arc<dyn FeeSchedule>,
    locks: LockTable,
    credits_per_duff: Credits,
    min_confirmations: u64,
    max_batch_operations: usize,
}

impl TransitionValidator {
    pub fn new(
        ledger: Arc<IdentityLedger>,
        chain: Arc<dyn ChainView>,
        fees: Arc<dyn FeeSchedule>,
        config: &PlatformConfig,
    ) -> Self {
        Self {
            ledger,
            chain,
            fees,
            locks: LockTable::new(constants::LOCK_SHARDS),
            credits_per_duff: config.credits.credits_per_duff,
            min_confirmations: config.confirmation.min_confirmations,
            max_batch_operations: config.credits.max_batch_operations,
        }
    }

    pub fn ledger(&self) -> &Arc<IdentityLedger> {
        &self.ledger
    }

    pub fn outpoint_state(&self, outpoint: &OutPoint) -> OutpointState {
        if self.ledger.is_outpoint_consumed(outpoint) {
            OutpointState::Consumed
        } else if self.chain.transaction(&outpoint.txid).is_some() {
            OutpointState::Locked
        } else {
            OutpointState::Unseen
        }
    }

    /// Validate `transition` and apply it, returning the new ledger revision
    pub fn apply(&self, transition: &StateTransition) -> Result<Revision> {
        let _guard = self.locks.lock(&lock_keys(transition));

        let update = self.check(transition).map_err(|e| {
            warn!(
                "Rejected {} for identity {}: {}",
                transition.kind(),
                transition.identity_id(),
                e
            );
            e
        })?;

        let revision = self.ledger.apply(update)?;
        info!(
            "Applied {} for identity {} at revision {}",
            transition.kind(),
            transition.identity_id(),
            revision
        );
        Ok(revision)
    }

    /// Run every check without applying anything
    pub fn validate(&self, transition: &StateTransition) -> Result<()> {
        self.check(transition).map(|_| ())
    }

    fn check(&self, transition: &StateTransition) -> Result<LedgerUpdate> {
        self.check_structure(transition)?;

        match &transition.payload {
            TransitionPayload::IdentityCreate {
                asset_lock_proof,
                public_keys,
            } => self.check_identity_create(transition, asset_lock_proof, public_keys),
            TransitionPayload::IdentityTopUp {
                identity_id,
                asset_lock_proof,
            } => self.check_identity_top_up(transition, identity_id, asset_lock_proof),
            TransitionPayload::DocumentsBatch {
                owner_id,
                operations,
            } => self.check_documents_batch(transition, owner_id, operations),
        }
    }

    fn check_structure(&self, transition: &StateTransition) -> Result<()> {
        if transition.protocol_version != PROTOCOL_VERSION {
            return Err(structure_error(format!(
                "Unsupported protocol version {}",
                transition.protocol_version
            )));
        }

        if transition.signature.is_empty() {
            return Err(structure_error("Transition is not signed"));
        }

        match &transition.payload {
            TransitionPayload::IdentityCreate { public_keys, .. } => {
                if public_keys.is_empty() {
                    return Err(structure_error("Identity must have at least one public key"));
                }

                let mut seen = HashSet::new();
                for (index, key) in public_keys.iter().enumerate() {
                    if key.id as usize != index {
                        return Err(structure_error(format!(
                            "Public key ids must be assigned in order from 0, found {} at {}",
                            key.id, index
                        )));
                    }
                    if key.data.is_empty() {
                        return Err(structure_error(format!("Public key {} is empty", key.id)));
                    }
                    key.validate().map_err(|e| {
                        structure_error(format!("Public key {} is invalid: {}", key.id, e))
                    })?;
                    if !seen.insert(key.data.as_slice()) {
                        return Err(structure_error(format!(
                            "Public key {} duplicates an earlier key",
                            key.id
                        )));
                    }
                }
            }

            TransitionPayload::IdentityTopUp { .. } => {}

            TransitionPayload::DocumentsBatch { operations, .. } => {
                if operations.is_empty() {
                    return Err(structure_error("Documents batch is empty"));
                }
                if operations.len() > self.max_batch_operations {
                    return Err(structure_error(format!(
                        "Documents batch has {} operations, maximum is {}",
                        operations.len(),
                        self.max_batch_operations
                    )));
                }

                let mut seen = HashSet::new();
                for operation in operations {
                    if operation.contract_id.is_empty()
                        || operation.document_type.is_empty()
                        || operation.document_id.is_empty()
                    {
                        return Err(structure_error(
                            "Document operation is missing its contract, type or id",
                        ));
                    }
                    if operation.action != DocumentAction::Delete && !operation.data.is_object() {
                        return Err(structure_error(format!(
                            "Document {} data must be an object",
                            operation.key()
                        )));
                    }
                    if !seen.insert(operation.key()) {
                        return Err(structure_error(format!(
                            "Document {} appears twice in one batch",
                            operation.key()
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    fn check_identity_create(
        &self,
        transition: &StateTransition,
        proof: &AssetLockProof,
        public_keys: &[IdentityPublicKey],
    ) -> Result<LedgerUpdate> {
        let signer = public_keys
            .iter()
            .find(|key| key.id == transition.signature_public_key_id)
            .ok_or_else(|| {
                TransitionError::InvalidSignature(format!(
                    "Public key {} is not part of the new identity",
                    transition.signature_public_key_id
                ))
            })?;
        verify_signature(transition, signer)?;

        let identity = Identity::new(IdentityId::from_outpoint(&proof.outpoint), public_keys.to_vec());
        let first_key_hash = identity
            .first_public_key_hash()
            .ok_or_else(|| structure_error("Identity must have at least one public key"))?;
        // A replayed create reports the consumed outpoint, not its own first key
        if self.ledger.is_outpoint_consumed(&proof.outpoint)
            || self.ledger.get(&identity.id).is_some()
        {
            return Err(TransitionError::OutpointAlreadyConsumed {
                outpoint: proof.outpoint,
            });
        }
        if self.ledger.get_by_first_public_key_hash(&first_key_hash).is_some() {
            return Err(TransitionError::FirstPublicKeyAlreadyExists {
                public_key_hash: first_key_hash,
            });
        }

        let locked = self.check_asset_lock(proof, &signer.hash())?;
        let credits = self.credits_after_fee(transition, &identity.id, locked.value)?;

        debug!(
            "Identity {} funded with {} credits from {}",
            identity.id, credits, locked.outpoint
        );
        Ok(LedgerUpdate::CreateIdentity {
            identity,
            outpoint: locked.outpoint,
            credits,
        })
    }

    fn check_identity_top_up(
        &self,
        transition: &StateTransition,
        identity_id: &IdentityId,
        proof: &AssetLockProof,
    ) -> Result<LedgerUpdate> {
        let identity = self.existing_identity(identity_id)?;
        let signer = signing_key(transition, &identity)?;
        verify_signature(transition, signer)?;

        let locked = self.check_asset_lock(proof, &signer.hash())?;
        let credits = self.credits_after_fee(transition, identity_id, locked.value)?;
        if identity.balance.checked_add(credits).is_none() {
            return Err(TransitionError::BalanceOverflow {
                identity_id: *identity_id,
            });
        }

        Ok(LedgerUpdate::TopUp {
            identity_id: *identity_id,
            outpoint: locked.outpoint,
            credits,
        })
    }

    fn check_documents_batch(
        &self,
        transition: &StateTransition,
        owner_id: &IdentityId,
        operations: &[DocumentOperation],
    ) -> Result<LedgerUpdate> {
        let identity = self.existing_identity(owner_id)?;
        let signer = signing_key(transition, &identity)?;
        verify_signature(transition, signer)?;

        let fee = self.fees.fee_for(transition)?;
        if identity.balance < fee {
            return Err(TransitionError::InsufficientCredits {
                required: fee,
                available: identity.balance,
            });
        }

        self.ledger.check_document_operations(owner_id, operations)?;

        Ok(LedgerUpdate::WriteDocuments {
            owner_id: *owner_id,
            fee,
            operations: operations.to_vec(),
        })
    }

    fn existing_identity(&self, identity_id: &IdentityId) -> Result<Identity> {
        self.ledger
            .get(identity_id)
            .ok_or(TransitionError::IdentityNotFound {
                identity_id: *identity_id,
            })
    }

    /// Resolve a proof to an unconsumed, confirmed lock committing to `signer_hash`
    fn check_asset_lock(
        &self,
        proof: &AssetLockProof,
        signer_hash: &PublicKeyHash,
    ) -> Result<LockedOutput> {
        let outpoint = proof.outpoint;
        if self.ledger.is_outpoint_consumed(&outpoint) {
            return Err(TransitionError::OutpointAlreadyConsumed { outpoint });
        }

        let known = self.chain.transaction(&outpoint.txid).ok_or(
            TransitionError::AssetLockTransactionNotFound {
                txid: outpoint.txid,
            },
        )?;
        let confirmations = known.confirmations(self.chain.best_height());
        if confirmations < self.min_confirmations {
            debug!(
                "Lock transaction {} has {} of {} confirmations",
                outpoint.txid, confirmations, self.min_confirmations
            );
            return Err(TransitionError::AssetLockTransactionNotFound {
                txid: outpoint.txid,
            });
        }

        let locked = proof.verify_structure().map_err(|e| match e {
            CoreError::OutpointNotFound(outpoint) => TransitionError::OutpointNotFound { outpoint },
            other => TransitionError::InvalidProof(other.to_string()),
        })?;

        let chain_value = known
            .transaction
            .outputs
            .get(outpoint.vout as usize)
            .map(|output| output.value);
        if chain_value != Some(locked.value) {
            return Err(TransitionError::InvalidProof(format!(
                "Output {} does not carry the claimed value on chain",
                outpoint
            )));
        }

        if let Some((height, root)) = proof.committed_root() {
            if known.block_height != Some(height) || self.chain.merkle_root(height) != Some(root) {
                return Err(TransitionError::InvalidProof(format!(
                    "Merkle branch does not place {} in block {}",
                    outpoint.txid, height
                )));
            }
        }

        if locked.key_hash != *signer_hash {
            return Err(TransitionError::InvalidProof(format!(
                "Asset lock {} is committed to key hash {}, not the signing key {}",
                outpoint, locked.key_hash, signer_hash
            )));
        }

        Ok(locked)
    }

    /// Credits from `value` duffs once this transition's fee is paid
    fn credits_after_fee(
        &self,
        transition: &StateTransition,
        identity_id: &IdentityId,
        value: Duffs,
    ) -> Result<Credits> {
        let credits = value
            .checked_mul(self.credits_per_duff)
            .ok_or(TransitionError::BalanceOverflow {
                identity_id: *identity_id,
            })?;
        let fee = self.fees.fee_for(transition)?;

        credits
            .checked_sub(fee)
            .ok_or(TransitionError::InsufficientCredits {
                required: fee,
                available: credits,
            })
    }
}

/// Ledger state a transition reads or writes
fn lock_keys(transition: &StateTransition) -> Vec<LockKey> {
    match &transition.payload {
        TransitionPayload::IdentityCreate {
            asset_lock_proof,
            public_keys,
        } => {
            let mut keys = vec![
                LockKey::Outpoint(asset_lock_proof.outpoint),
                LockKey::Identity(transition.identity_id()),
            ];
            if let Some(first) = public_keys.first() {
                keys.push(LockKey::FirstKey(first.hash()));
            }
            keys
        }
        TransitionPayload::IdentityTopUp {
            identity_id,
            asset_lock_proof,
        } => vec![
            LockKey::Outpoint(asset_lock_proof.outpoint),
            LockKey::Identity(*identity_id),
        ],
        TransitionPayload::DocumentsBatch { owner_id, .. } => vec![LockKey::Identity(*owner_id)],
    }
}

fn signing_key<'a>(
    transition: &StateTransition,
    identity: &'a Identity,
) -> Result<&'a IdentityPublicKey> {
    identity
        .public_key(transition.signature_public_key_id)
        .ok_or_else(|| {
            TransitionError::InvalidSignature(format!(
                "Identity {} has no public key {}",
                identity.id, transition.signature_public_key_id
            ))
        })
}

fn verify_signature(transition: &StateTransition, key: &IdentityPublicKey) -> Result<()> {
    if !key.is_enabled() {
        return Err(TransitionError::InvalidSignature(format!(
            "Public key {} is disabled",
            key.id
        )));
    }

    let signing_data = transition
        .signing_data()
        .map_err(|e| structure_error(e.to_string()))?;

    match key.verify(&signing_data, &transition.signature) {
        Ok(true) => Ok(()),
        Ok(false) => Err(TransitionError::InvalidSignature(format!(
            "Signature does not verify against public key {}",
            key.id
        ))),
        Err(e) => Err(TransitionError::InvalidSignature(e.to_string())),
    }
}

fn structure_error(message: impl Into<String>) -> TransitionError {
    TransitionError::InvalidTransitionStructure(message.into())
}
