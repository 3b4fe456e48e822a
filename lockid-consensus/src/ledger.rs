//! Node-side identity and document state

use crate::transition::{DocumentAction, DocumentKey, DocumentOperation};
use crate::{Result, Revision, TransitionError};
use lockid_core::{Credits, Identity, IdentityId, OutPoint, PublicKeyHash};
use parking_lot::RwLock;
use std::collections::HashMap;

/// A document as written by its owner
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub owner_id: IdentityId,
    /// 1 on creation, bumped by every replace
    pub revision: u64,
    pub data: serde_json::Value,
}

/// A validated change, applied by the ledger in one write section
#[derive(Debug, Clone)]
pub(crate) enum LedgerUpdate {
    CreateIdentity {
        identity: Identity,
        outpoint: OutPoint,
        credits: Credits,
    },
    TopUp {
        identity_id: IdentityId,
        outpoint: OutPoint,
        credits: Credits,
    },
    WriteDocuments {
        owner_id: IdentityId,
        fee: Credits,
        operations: Vec<DocumentOperation>,
    },
}

#[derive(Debug, Default)]
struct LedgerTables {
    identities: HashMap<IdentityId, Identity>,
    /// First public key hash -> identity holding it
    first_keys: HashMap<PublicKeyHash, IdentityId>,
    /// Asset lock outpoint -> identity it funded
    consumed_outpoints: HashMap<OutPoint, IdentityId>,
    documents: HashMap<DocumentKey, StoredDocument>,
    revision: Revision,
}

/// Authoritative store of identities, balances and documents
#[derive(Debug, Default)]
pub struct IdentityLedger {
    tables: RwLock<LedgerTables>,
}

impl IdentityLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, identity_id: &IdentityId) -> Option<Identity> {
        self.tables.read().identities.get(identity_id).cloned()
    }

    pub fn get_by_first_public_key_hash(&self, hash: &PublicKeyHash) -> Option<IdentityId> {
        self.tables.read().first_keys.get(hash).copied()
    }

    pub fn identity_by_first_public_key_hash(&self, hash: &PublicKeyHash) -> Option<Identity> {
        let tables = self.tables.read();
        tables
            .first_keys
            .get(hash)
            .and_then(|id| tables.identities.get(id))
            .cloned()
    }

    pub fn is_outpoint_consumed(&self, outpoint: &OutPoint) -> bool {
        self.tables.read().consumed_outpoints.contains_key(outpoint)
    }

    /// The identity an outpoint was consumed by
    pub fn consumed_by(&self, outpoint: &OutPoint) -> Option<IdentityId> {
        self.tables.read().consumed_outpoints.get(outpoint).copied()
    }

    pub fn document(&self, key: &DocumentKey) -> Option<StoredDocument> {
        self.tables.read().documents.get(key).cloned()
    }

    /// Revision of the last applied transition, 0 for an empty ledger
    pub fn revision(&self) -> Revision {
        self.tables.read().revision
    }

    pub fn identity_count(&self) -> usize {
        self.tables.read().identities.len()
    }

    /// Check that `operations` by `owner_id` fit the current documents
    pub fn check_document_operations(
        &self,
        owner_id: &IdentityId,
        operations: &[DocumentOperation],
    ) -> Result<()> {
        check_documents(&self.tables.read(), owner_id, operations)
    }

    /// Apply a validated update, re-checking every invariant under the write lock.
    ///
    /// Either the whole update is applied and the revision bumped once, or
    /// nothing changes.
    pub(crate) fn apply(&self, update: LedgerUpdate) -> Result<Revision> {
        let mut tables = self.tables.write();
        let revision = tables.revision + 1;

        match update {
            LedgerUpdate::CreateIdentity {
                mut identity,
                outpoint,
                credits,
            } => {
                if tables.consumed_outpoints.contains_key(&outpoint)
                    || tables.identities.contains_key(&identity.id)
                {
                    return Err(TransitionError::OutpointAlreadyConsumed { outpoint });
                }

                let first_key_hash = identity.first_public_key_hash().ok_or_else(|| {
                    TransitionError::InvalidTransitionStructure(
                        "Identity has no first public key".to_string(),
                    )
                })?;
                if tables.first_keys.contains_key(&first_key_hash) {
                    return Err(TransitionError::FirstPublicKeyAlreadyExists {
                        public_key_hash: first_key_hash,
                    });
                }

                identity
                    .increase_balance(credits)
                    .map_err(|_| TransitionError::BalanceOverflow {
                        identity_id: identity.id,
                    })?;
                identity.revision = revision;

                tables.first_keys.insert(first_key_hash, identity.id);
                tables.consumed_outpoints.insert(outpoint, identity.id);
                tables.identities.insert(identity.id, identity);
            }

            LedgerUpdate::TopUp {
                identity_id,
                outpoint,
                credits,
            } => {
                if tables.consumed_outpoints.contains_key(&outpoint) {
                    return Err(TransitionError::OutpointAlreadyConsumed { outpoint });
                }

                let identity = tables
                    .identities
                    .get_mut(&identity_id)
                    .ok_or(TransitionError::IdentityNotFound { identity_id })?;
                identity
                    .increase_balance(credits)
                    .map_err(|_| TransitionError::BalanceOverflow { identity_id })?;
                identity.revision = revision;

                tables.consumed_outpoints.insert(outpoint, identity_id);
            }

            LedgerUpdate::WriteDocuments {
                owner_id,
                fee,
                operations,
            } => {
                check_documents(&tables, &owner_id, &operations)?;

                let identity = tables
                    .identities
                    .get_mut(&owner_id)
                    .ok_or(TransitionError::IdentityNotFound {
                        identity_id: owner_id,
                    })?;
                let available = identity.balance;
                identity
                    .reduce_balance(fee)
                    .ok_or(TransitionError::InsufficientCredits {
                        required: fee,
                        available,
                    })?;
                identity.revision = revision;

                for operation in operations {
                    let key = operation.key();
                    match operation.action {
                        DocumentAction::Create => {
                            tables.documents.insert(
                                key,
                                StoredDocument {
                                    owner_id,
                                    revision: 1,
                                    data: operation.data,
                                },
                            );
                        }
                        DocumentAction::Replace => {
                            if let Some(document) = tables.documents.get_mut(&key) {
                                document.revision += 1;
                                document.data = operation.data;
                            }
                        }
                        DocumentAction::Delete => {
                            tables.documents.remove(&key);
                        }
                    }
                }
            }
        }

        tables.revision = revision;
        Ok(revision)
    }
}

fn check_documents(
    tables: &LedgerTables,
    owner_id: &IdentityId,
    operations: &[DocumentOperation],
) -> Result<()> {
    for operation in operations {
        let key = operation.key();
        match (operation.action, tables.documents.get(&key)) {
            (DocumentAction::Create, Some(_)) => {
                return Err(TransitionError::DocumentConflict(format!(
                    "Document {} already exists",
                    key
                )));
            }
            (DocumentAction::Create, None) => {}
            (DocumentAction::Replace | DocumentAction::Delete, None) => {
                return Err(TransitionError::DocumentConflict(format!(
                    "Document {} does not exist",
                    key
                )));
            }
            (DocumentAction::Replace | DocumentAction::Delete, Some(document)) => {
                if document.owner_id != *owner_id {
                    return Err(TransitionError::DocumentConflict(format!(
                        "Document {} is owned by {}",
                        key, document.owner_id
                    )));
                }
            }
        }
    }
    Ok(())
}
