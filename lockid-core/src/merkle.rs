//! Transaction Merkle trees for block inclusion evidence
//!
//! Interior nodes are the double SHA-256 of the concatenated children. A
//! level with an odd number of nodes pairs its last node with itself.

use crate::asset_lock::Txid;
use crate::crypto::sha256d;

/// A 32-byte tree node
pub type MerkleHash = [u8; 32];

fn hash_pair(left: &MerkleHash, right: &MerkleHash) -> MerkleHash {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(left);
    buf[32..].copy_from_slice(right);
    sha256d(&buf)
}

fn next_level(level: &[MerkleHash]) -> Vec<MerkleHash> {
    level
        .chunks(2)
        .map(|chunk| {
            let right = chunk.get(1).unwrap_or(&chunk[0]);
            hash_pair(&chunk[0], right)
        })
        .collect()
}

/// Merkle root over transaction ids; all zeros for an empty block
pub fn merkle_root(txids: &[Txid]) -> MerkleHash {
    if txids.is_empty() {
        return [0; 32];
    }

    let mut level: Vec<MerkleHash> = txids.iter().map(|txid| txid.0).collect();
    while level.len() > 1 {
        level = next_level(&level);
    }
    level[0]
}

/// Sibling hashes from the leaf at `position` up to the root
pub fn merkle_branch(txids: &[Txid], position: usize) -> Option<Vec<MerkleHash>> {
    if position >= txids.len() {
        return None;
    }

    let mut branch = Vec::new();
    let mut level: Vec<MerkleHash> = txids.iter().map(|txid| txid.0).collect();
    let mut index = position;

    while level.len() > 1 {
        let sibling = level.get(index ^ 1).unwrap_or(&level[index]);
        branch.push(*sibling);
        level = next_level(&level);
        index /= 2;
    }

    Some(branch)
}

/// Fold a branch back into the root it commits to
pub fn root_from_branch(txid: &Txid, branch: &[MerkleHash], position: u32) -> MerkleHash {
    let mut current = txid.0;
    let mut index = position;

    for sibling in branch {
        current = if index & 1 == 0 {
            hash_pair(&current, sibling)
        } else {
            hash_pair(sibling, &current)
        };
        index >>= 1;
    }

    current
}

#[cfg(test)]
mod tests {
    use super::*;

    fn txids(n: u8) -> Vec<Txid> {
        (0..n).map(|i| Txid(sha256d(&[i]))).collect()
    }

    #[test]
    fn test_empty_root() {
        assert_eq!(merkle_root(&[]), [0; 32]);
    }

    #[test]
    fn test_single_transaction_root_is_its_id() {
        let ids = txids(1);
        assert_eq!(merkle_root(&ids), ids[0].0);
        assert_eq!(merkle_branch(&ids, 0).unwrap(), Vec::<MerkleHash>::new());
    }

    #[test]
    fn test_branches_fold_to_root() {
        for n in 1..=9u8 {
            let ids = txids(n);
            let root = merkle_root(&ids);
            for (position, txid) in ids.iter().enumerate() {
                let branch = merkle_branch(&ids, position).unwrap();
                assert_eq!(root_from_branch(txid, &branch, position as u32), root);
            }
        }
    }

    #[test]
    fn test_wrong_position_does_not_fold_to_root() {
        let ids = txids(4);
        let root = merkle_root(&ids);
        let branch = merkle_branch(&ids, 1).unwrap();
        assert_ne!(root_from_branch(&ids[1], &branch, 2), root);
    }

    #[test]
    fn test_branch_out_of_range() {
        assert!(merkle_branch(&txids(3), 3).is_none());
    }
}
