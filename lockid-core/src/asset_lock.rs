//! Funding transactions, asset-lock outpoints and their proofs
//!
//! An asset lock is a burn output of a funding transaction committing to the
//! HASH160 of the key that will sign the identity transition. The proof
//! carries the raw transaction so a node can recompute its id and read the
//! locked value without trusting the submitter, optionally with a Merkle
//! branch tying the transaction to a block.

use crate::crypto::{sha256d, PublicKeyHash, PUBLIC_KEY_HASH_LEN};
use crate::merkle::{self, MerkleHash};
use crate::{CoreError, Duffs, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// `OP_RETURN`
const OP_RETURN: u8 = 0x6a;

/// Serialized length of an outpoint
pub const OUTPOINT_LEN: usize = 36;

/// Transaction identifier (double SHA-256 of the raw transaction)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Txid(pub [u8; 32]);

impl_readable_bytes_serde!(Txid, 32, Txid::to_hex, Txid::from_hex);

impl Txid {
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s)
            .map_err(|e| CoreError::InvalidOutPoint(format!("Invalid txid hex: {}", e)))?;
        let txid: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CoreError::InvalidOutPoint("Txid must be 32 bytes".to_string()))?;
        Ok(Self(txid))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Txid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Txid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Txid({})", self.to_hex())
    }
}

/// Reference to one output of one transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    pub txid: Txid,
    pub vout: u32,
}

impl OutPoint {
    pub fn new(txid: Txid, vout: u32) -> Self {
        Self { txid, vout }
    }

    /// `txid || vout` with the index little-endian
    pub fn to_bytes(&self) -> [u8; OUTPOINT_LEN] {
        let mut bytes = [0u8; OUTPOINT_LEN];
        bytes[..32].copy_from_slice(&self.txid.0);
        bytes[32..].copy_from_slice(&self.vout.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != OUTPOINT_LEN {
            return Err(CoreError::InvalidOutPoint(format!(
                "expected {} bytes, got {}",
                OUTPOINT_LEN,
                bytes.len()
            )));
        }

        let mut txid = [0u8; 32];
        txid.copy_from_slice(&bytes[..32]);
        let mut vout = [0u8; 4];
        vout.copy_from_slice(&bytes[32..]);

        Ok(Self {
            txid: Txid(txid),
            vout: u32::from_le_bytes(vout),
        })
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.vout)
    }
}

/// Transaction input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxIn {
    pub previous_output: OutPoint,
    pub script_sig: Vec<u8>,
}

/// Transaction output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOut {
    pub value: Duffs,
    pub script_pubkey: Vec<u8>,
}

impl TxOut {
    /// Burn output locking `value` for the holder of the key hashing to `key_hash`
    pub fn asset_lock(value: Duffs, key_hash: &PublicKeyHash) -> Self {
        let mut script_pubkey = Vec::with_capacity(2 + PUBLIC_KEY_HASH_LEN);
        script_pubkey.push(OP_RETURN);
        script_pubkey.push(PUBLIC_KEY_HASH_LEN as u8);
        script_pubkey.extend_from_slice(key_hash.as_bytes());
        Self {
            value,
            script_pubkey,
        }
    }

    /// Key hash committed by an asset-lock output
    pub fn asset_lock_key_hash(&self) -> Option<PublicKeyHash> {
        match self.script_pubkey.as_slice() {
            [OP_RETURN, len, rest @ ..]
                if *len as usize == PUBLIC_KEY_HASH_LEN && rest.len() == PUBLIC_KEY_HASH_LEN =>
            {
                let mut hash = [0u8; PUBLIC_KEY_HASH_LEN];
                hash.copy_from_slice(rest);
                Some(PublicKeyHash(hash))
            }
            _ => None,
        }
    }

    pub fn is_asset_lock(&self) -> bool {
        self.asset_lock_key_hash().is_some()
    }
}

/// Transaction funding an asset lock, as broadcast by a wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingTransaction {
    pub version: u32,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    pub lock_time: u32,
}

impl FundingTransaction {
    pub fn new(inputs: Vec<TxIn>, outputs: Vec<TxOut>) -> Self {
        Self {
            version: 1,
            inputs,
            outputs,
            lock_time: 0,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(raw)?)
    }

    pub fn txid(&self) -> Result<Txid> {
        Ok(Txid(sha256d(&self.to_bytes()?)))
    }

    pub fn outpoint(&self, vout: u32) -> Result<OutPoint> {
        Ok(OutPoint::new(self.txid()?, vout))
    }
}

/// How a proof ties its transaction to the chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockEvidence {
    /// Raw transaction only; the node looks the transaction up itself
    Transaction,
    /// Raw transaction plus a Merkle branch into the block at `block_height`
    Inclusion {
        block_height: u64,
        merkle_branch: Vec<MerkleHash>,
        position: u32,
    },
}

/// Evidence that an asset lock exists and carries a given value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetLockProof {
    pub outpoint: OutPoint,
    pub value: Duffs,
    #[serde(with = "hex")]
    pub transaction: Vec<u8>,
    pub evidence: LockEvidence,
}

/// The output an asset-lock proof resolved to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockedOutput {
    pub outpoint: OutPoint,
    pub value: Duffs,
    pub key_hash: PublicKeyHash,
}

impl AssetLockProof {
    /// Proof over the raw transaction for output `vout`
    pub fn from_transaction(transaction: &FundingTransaction, vout: u32) -> Result<Self> {
        let outpoint = transaction.outpoint(vout)?;
        let output = transaction
            .outputs
            .get(vout as usize)
            .ok_or(CoreError::OutpointNotFound(outpoint))?;

        Ok(Self {
            outpoint,
            value: output.value,
            transaction: transaction.to_bytes()?,
            evidence: LockEvidence::Transaction,
        })
    }

    /// Attach a Merkle branch placing the transaction in a block
    pub fn with_inclusion(
        mut self,
        block_height: u64,
        merkle_branch: Vec<MerkleHash>,
        position: u32,
    ) -> Self {
        self.evidence = LockEvidence::Inclusion {
            block_height,
            merkle_branch,
            position,
        };
        self
    }

    /// Check the proof against its own transaction bytes.
    ///
    /// Does not consult the chain: confirmation depth and Merkle roots are
    /// checked by the node that owns a chain view.
    pub fn verify_structure(&self) -> Result<LockedOutput> {
        let transaction = FundingTransaction::from_bytes(&self.transaction)
            .map_err(|e| CoreError::InvalidProof(format!("Undecodable transaction: {}", e)))?;

        let txid = Txid(sha256d(&self.transaction));
        if txid != self.outpoint.txid {
            return Err(CoreError::InvalidProof(format!(
                "Transaction hashes to {} but the outpoint references {}",
                txid, self.outpoint.txid
            )));
        }

        let output = transaction
            .outputs
            .get(self.outpoint.vout as usize)
            .ok_or(CoreError::OutpointNotFound(self.outpoint))?;

        let key_hash = output.asset_lock_key_hash().ok_or_else(|| {
            CoreError::InvalidProof(format!("Output {} is not an asset lock", self.outpoint))
        })?;

        if output.value == 0 {
            return Err(CoreError::InvalidProof("Asset lock value must be positive".to_string()));
        }

        if output.value != self.value {
            return Err(CoreError::InvalidProof(format!(
                "Claimed value {} does not match locked value {}",
                self.value, output.value
            )));
        }

        Ok(LockedOutput {
            outpoint: self.outpoint,
            value: output.value,
            key_hash,
        })
    }

    /// Block height and the Merkle root the inclusion evidence commits to
    pub fn committed_root(&self) -> Option<(u64, MerkleHash)> {
        match &self.evidence {
            LockEvidence::Transaction => None,
            LockEvidence::Inclusion {
                block_height,
                merkle_branch,
                position,
            } => Some((
                *block_height,
                merkle::root_from_branch(&self.outpoint.txid, merkle_branch, *position),
            )),
        }
    }
}

/// Client-side builder locating the lock output of a funding transaction
#[derive(Debug, Clone)]
pub struct AssetLockProofBuilder<'a> {
    transaction: &'a FundingTransaction,
    key_hash: Option<PublicKeyHash>,
}

impl<'a> AssetLockProofBuilder<'a> {
    pub fn new(transaction: &'a FundingTransaction) -> Self {
        Self {
            transaction,
            key_hash: None,
        }
    }

    /// Only accept a lock output committing to `key_hash`
    pub fn for_key(mut self, key_hash: PublicKeyHash) -> Self {
        self.key_hash = Some(key_hash);
        self
    }

    /// Index of the intended lock output
    pub fn locate_output(&self) -> Result<u32> {
        let position = self
            .transaction
            .outputs
            .iter()
            .position(|output| match (output.asset_lock_key_hash(), &self.key_hash) {
                (Some(found), Some(wanted)) => found == *wanted,
                (Some(_), None) => true,
                (None, _) => false,
            });

        match position {
            Some(index) => Ok(index as u32),
            None => Err(CoreError::LockOutputNotFound(self.transaction.txid()?)),
        }
    }

    pub fn build(&self) -> Result<AssetLockProof> {
        AssetLockProof::from_transaction(self.transaction, self.locate_output()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{KeyPair, KeyType};

    fn funding_tx(key_hash: &PublicKeyHash, value: Duffs) -> FundingTransaction {
        FundingTransaction::new(
            vec![TxIn {
                previous_output: OutPoint::new(Txid([9; 32]), 0),
                script_sig: vec![1, 2, 3],
            }],
            vec![
                TxOut {
                    value: 5_000,
                    script_pubkey: vec![0x76, 0xa9],
                },
                TxOut::asset_lock(value, key_hash),
            ],
        )
    }

    #[test]
    fn test_outpoint_bytes() {
        let outpoint = OutPoint::new(Txid([4; 32]), 258);
        let bytes = outpoint.to_bytes();
        assert_eq!(&bytes[32..], &[2, 1, 0, 0]);
        assert_eq!(OutPoint::from_bytes(&bytes).unwrap(), outpoint);
        assert!(OutPoint::from_bytes(&bytes[..35]).is_err());
    }

    #[test]
    fn test_builder_locates_lock_output() {
        let keypair = KeyPair::generate(KeyType::EcdsaSecp256k1).unwrap();
        let tx = funding_tx(&keypair.public_key_hash(), 1);

        let builder = AssetLockProofBuilder::new(&tx).for_key(keypair.public_key_hash());
        assert_eq!(builder.locate_output().unwrap(), 1);

        let proof = builder.build().unwrap();
        assert_eq!(proof.outpoint, tx.outpoint(1).unwrap());
        assert_eq!(proof.value, 1);

        let locked = proof.verify_structure().unwrap();
        assert_eq!(locked.key_hash, keypair.public_key_hash());
    }

    #[test]
    fn test_builder_fails_without_matching_output() {
        let keypair = KeyPair::generate(KeyType::EcdsaSecp256k1).unwrap();
        let other = KeyPair::generate(KeyType::EcdsaSecp256k1).unwrap();
        let tx = funding_tx(&keypair.public_key_hash(), 1);

        let result = AssetLockProofBuilder::new(&tx)
            .for_key(other.public_key_hash())
            .locate_output();
        assert!(matches!(result, Err(CoreError::LockOutputNotFound(_))));
    }

    #[test]
    fn test_proof_rejects_foreign_transaction() {
        let keypair = KeyPair::generate(KeyType::EcdsaSecp256k1).unwrap();
        let tx = funding_tx(&keypair.public_key_hash(), 1);
        let other_tx = funding_tx(&keypair.public_key_hash(), 2);

        let mut proof = AssetLockProof::from_transaction(&tx, 1).unwrap();
        proof.transaction = other_tx.to_bytes().unwrap();

        assert!(matches!(proof.verify_structure(), Err(CoreError::InvalidProof(_))));
    }

    #[test]
    fn test_proof_rejects_wrong_value_and_non_lock_output() {
        let keypair = KeyPair::generate(KeyType::EcdsaSecp256k1).unwrap();
        let tx = funding_tx(&keypair.public_key_hash(), 1);

        let mut inflated = AssetLockProof::from_transaction(&tx, 1).unwrap();
        inflated.value = 1_000;
        assert!(matches!(inflated.verify_structure(), Err(CoreError::InvalidProof(_))));

        let change = AssetLockProof::from_transaction(&tx, 0).unwrap();
        assert!(matches!(change.verify_structure(), Err(CoreError::InvalidProof(_))));
    }

    #[test]
    fn test_proof_for_missing_output() {
        let keypair = KeyPair::generate(KeyType::EcdsaSecp256k1).unwrap();
        let tx = funding_tx(&keypair.public_key_hash(), 1);

        assert!(matches!(
            AssetLockProof::from_transaction(&tx, 7),
            Err(CoreError::OutpointNotFound(_))
        ));

        let mut proof = AssetLockProof::from_transaction(&tx, 1).unwrap();
        proof.outpoint.vout = 7;
        assert!(matches!(proof.verify_structure(), Err(CoreError::OutpointNotFound(_))));
    }

    #[test]
    fn test_zero_value_lock_is_invalid() {
        let keypair = KeyPair::generate(KeyType::EcdsaSecp256k1).unwrap();
        let tx = funding_tx(&keypair.public_key_hash(), 0);
        let proof = AssetLockProof::from_transaction(&tx, 1).unwrap();
        assert!(matches!(proof.verify_structure(), Err(CoreError::InvalidProof(_))));
    }

    #[test]
    fn test_inclusion_root() {
        let keypair = KeyPair::generate(KeyType::EcdsaSecp256k1).unwrap();
        let tx = funding_tx(&keypair.public_key_hash(), 1);
        let txid = tx.txid().unwrap();
        let block = vec![Txid([1; 32]), txid, Txid([2; 32])];

        let branch = merkle::merkle_branch(&block, 1).unwrap();
        let proof = AssetLockProof::from_transaction(&tx, 1)
            .unwrap()
            .with_inclusion(12, branch, 1);

        assert_eq!(proof.committed_root(), Some((12, merkle::merkle_root(&block))));
    }
}
