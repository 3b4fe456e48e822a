//! Funding chain collaborators and an in-memory regtest chain

use crate::error::ChainError;
use crate::BlockHeight;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lockid_core::crypto::sha256d;
use lockid_core::merkle::{self, MerkleHash};
use lockid_core::{Duffs, FundingTransaction, OutPoint, PublicKeyHash, TxIn, TxOut, Txid};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Hash of a block header
pub type BlockHash = [u8; 32];

/// Most blocks [`MemoryChain::mine`] produces in one call
pub const MAX_BLOCKS_PER_REQUEST: u64 = 10_000;

/// Chain status as reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainStatus {
    /// Current best block height
    pub blocks: BlockHeight,
}

/// A transaction known to the chain, mined or still in the mempool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmedTx {
    pub transaction: FundingTransaction,
    pub block_height: Option<BlockHeight>,
}

impl ConfirmedTx {
    /// Confirmations at `best_height`; 0 while unmined
    pub fn confirmations(&self, best_height: BlockHeight) -> u64 {
        match self.block_height {
            Some(height) if height <= best_height => best_height - height + 1,
            _ => 0,
        }
    }
}

/// Synchronous chain view consulted by the validator
pub trait ChainView: Send + Sync {
    fn best_height(&self) -> BlockHeight;
    fn transaction(&self, txid: &Txid) -> Option<ConfirmedTx>;
    fn merkle_root(&self, height: BlockHeight) -> Option<MerkleHash>;
}

/// Asynchronous transport used by clients
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn get_status(&self) -> Result<ChainStatus, ChainError>;

    /// Ask the chain to produce `blocks` blocks paying `address`. Test networks only.
    async fn generate_to_address(
        &self,
        blocks: u64,
        address: &str,
    ) -> Result<Vec<BlockHash>, ChainError>;

    /// Broadcast a raw funding transaction; does not wait for confirmation
    async fn send_transaction(&self, raw: &[u8]) -> Result<Txid, ChainError>;
}

/// Block header containing metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub height: BlockHeight,
    pub previous_hash: BlockHash,
    pub merkle_root: MerkleHash,
    pub timestamp: DateTime<Utc>,
    pub coinbase_address: String,
}

/// A block of funding transactions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub txids: Vec<Txid>,
    pub transactions: Vec<FundingTransaction>,
}

impl Block {
    fn new(
        height: BlockHeight,
        previous_hash: BlockHash,
        entries: Vec<(Txid, FundingTransaction)>,
        coinbase_address: &str,
    ) -> Self {
        let (txids, transactions): (Vec<Txid>, Vec<FundingTransaction>) =
            entries.into_iter().unzip();

        Self {
            header: BlockHeader {
                height,
                previous_hash,
                merkle_root: merkle::merkle_root(&txids),
                timestamp: Utc::now(),
                coinbase_address: coinbase_address.to_string(),
            },
            txids,
            transactions,
        }
    }

    /// Calculate the hash of this block
    pub fn hash(&self) -> Result<BlockHash, ChainError> {
        let header_bytes = serde_json::to_vec(&self.header)
            .map_err(|e| ChainError::SerializationError(e.to_string()))?;
        Ok(sha256d(&header_bytes))
    }
}

#[derive(Debug)]
struct ChainState {
    blocks: Vec<Block>,
    mempool: Vec<(Txid, FundingTransaction)>,
    transactions: HashMap<Txid, ConfirmedTx>,
    spent: HashSet<OutPoint>,
    faucet_nonce: u64,
}

/// In-memory regtest chain.
///
/// Broadcast transactions wait in the mempool until [`MemoryChain::mine`]
/// (or `generate_to_address`) puts them in a block.
#[derive(Debug)]
pub struct MemoryChain {
    state: RwLock<ChainState>,
}

impl Default for MemoryChain {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryChain {
    /// Create a chain holding only an empty genesis block
    pub fn new() -> Self {
        let genesis = Block::new(0, [0; 32], Vec::new(), "genesis");
        Self {
            state: RwLock::new(ChainState {
                blocks: vec![genesis],
                mempool: Vec::new(),
                transactions: HashMap::new(),
                spent: HashSet::new(),
                faucet_nonce: 0,
            }),
        }
    }

    pub fn height(&self) -> BlockHeight {
        self.state.read().blocks.len() as BlockHeight - 1
    }

    pub fn block(&self, height: BlockHeight) -> Option<Block> {
        self.state.read().blocks.get(height as usize).cloned()
    }

    pub fn mempool_size(&self) -> usize {
        self.state.read().mempool.len()
    }

    /// Build (without broadcasting) a transaction locking `value` for `key_hash`.
    ///
    /// Each call spends a fresh synthetic coin, so every lock gets its own txid.
    pub fn fund_asset_lock(&self, value: Duffs, key_hash: &PublicKeyHash) -> FundingTransaction {
        let mut state = self.state.write();
        state.faucet_nonce += 1;
        let coin = Txid(sha256d(&state.faucet_nonce.to_le_bytes()));

        FundingTransaction::new(
            vec![TxIn {
                previous_output: OutPoint::new(coin, 0),
                script_sig: Vec::new(),
            }],
            vec![TxOut::asset_lock(value, key_hash)],
        )
    }

    /// Accept a transaction into the mempool
    pub fn broadcast(&self, transaction: &FundingTransaction) -> Result<Txid, ChainError> {
        let txid = transaction.txid()?;
        let mut state = self.state.write();

        if state.transactions.contains_key(&txid) {
            return Err(ChainError::TransactionRejected(format!(
                "Transaction {} already known",
                txid
            )));
        }
        if let Some(input) = transaction
            .inputs
            .iter()
            .find(|input| state.spent.contains(&input.previous_output))
        {
            return Err(ChainError::DoubleSpend(input.previous_output));
        }

        for input in &transaction.inputs {
            state.spent.insert(input.previous_output);
        }
        state.transactions.insert(
            txid,
            ConfirmedTx {
                transaction: transaction.clone(),
                block_height: None,
            },
        );
        state.mempool.push((txid, transaction.clone()));

        debug!("Accepted transaction {} into the mempool", txid);
        Ok(txid)
    }

    /// Produce `blocks` blocks; the first takes the whole mempool
    pub fn mine(&self, blocks: u64, coinbase_address: &str) -> Result<Vec<BlockHash>, ChainError> {
        if blocks > MAX_BLOCKS_PER_REQUEST {
            return Err(ChainError::TooManyBlocks {
                requested: blocks,
                limit: MAX_BLOCKS_PER_REQUEST,
            });
        }

        let mut state = self.state.write();
        let mut hashes = Vec::new();

        for _ in 0..blocks {
            let previous = state
                .blocks
                .last()
                .ok_or_else(|| ChainError::Unavailable("Chain has no genesis block".to_string()))?;
            let previous_hash = previous.hash()?;
            let height = previous.header.height + 1;

            let entries = std::mem::take(&mut state.mempool);
            for (txid, _) in &entries {
                if let Some(known) = state.transactions.get_mut(txid) {
                    known.block_height = Some(height);
                }
            }

            let block = Block::new(height, previous_hash, entries, coinbase_address);
            hashes.push(block.hash()?);
            debug!(
                "Mined block {} with {} transactions",
                height,
                block.txids.len()
            );
            state.blocks.push(block);
        }

        Ok(hashes)
    }

    /// Height, Merkle branch and position proving a mined transaction's inclusion
    pub fn inclusion_proof(&self, txid: &Txid) -> Option<(BlockHeight, Vec<MerkleHash>, u32)> {
        let state = self.state.read();
        let height = state.transactions.get(txid)?.block_height?;
        let block = state.blocks.get(height as usize)?;
        let position = block.txids.iter().position(|id| id == txid)?;
        let branch = merkle::merkle_branch(&block.txids, position)?;
        Some((height, branch, position as u32))
    }
}

impl ChainView for MemoryChain {
    fn best_height(&self) -> BlockHeight {
        self.height()
    }

    fn transaction(&self, txid: &Txid) -> Option<ConfirmedTx> {
        self.state.read().transactions.get(txid).cloned()
    }

    fn merkle_root(&self, height: BlockHeight) -> Option<MerkleHash> {
        self.state
            .read()
            .blocks
            .get(height as usize)
            .map(|block| block.header.merkle_root)
    }
}

#[async_trait]
impl ChainClient for MemoryChain {
    async fn get_status(&self) -> Result<ChainStatus, ChainError> {
        Ok(ChainStatus {
            blocks: self.height(),
        })
    }

    async fn generate_to_address(
        &self,
        blocks: u64,
        address: &str,
    ) -> Result<Vec<BlockHash>, ChainError> {
        self.mine(blocks, address)
    }

    async fn send_transaction(&self, raw: &[u8]) -> Result<Txid, ChainError> {
        let transaction = FundingTransaction::from_bytes(raw)?;
        if transaction.to_bytes()? != raw {
            return Err(ChainError::TransactionRejected(
                "Non-canonical transaction encoding".to_string(),
            ));
        }
        self.broadcast(&transaction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_hash() -> PublicKeyHash {
        PublicKeyHash([8; 20])
    }

    #[test]
    fn test_genesis_chain() {
        let chain = MemoryChain::new();
        assert_eq!(chain.height(), 0);
        assert_eq!(chain.merkle_root(0), Some([0; 32]));
        assert!(chain.merkle_root(1).is_none());
    }

    #[test]
    fn test_transaction_confirms_when_mined() {
        let chain = MemoryChain::new();
        let tx = chain.fund_asset_lock(5, &key_hash());
        let txid = chain.broadcast(&tx).unwrap();

        let pending = chain.transaction(&txid).unwrap();
        assert_eq!(pending.confirmations(chain.best_height()), 0);

        chain.mine(3, "miner").unwrap();
        let mined = chain.transaction(&txid).unwrap();
        assert_eq!(mined.block_height, Some(1));
        assert_eq!(mined.confirmations(chain.best_height()), 3);
        assert_eq!(chain.mempool_size(), 0);
    }

    #[test]
    fn test_double_spend_is_rejected() {
        let chain = MemoryChain::new();
        let tx = chain.fund_asset_lock(5, &key_hash());
        chain.broadcast(&tx).unwrap();

        let mut conflicting = tx.clone();
        conflicting.lock_time = 1;
        assert!(matches!(
            chain.broadcast(&conflicting),
            Err(ChainError::DoubleSpend(_))
        ));
        assert!(matches!(
            chain.broadcast(&tx),
            Err(ChainError::TransactionRejected(_))
        ));
    }

    #[test]
    fn test_inclusion_proof_matches_block_root() {
        let chain = MemoryChain::new();
        let txids: Vec<Txid> = (0..3)
            .map(|_| chain.broadcast(&chain.fund_asset_lock(1, &key_hash())).unwrap())
            .collect();
        chain.mine(1, "miner").unwrap();

        let (height, branch, position) = chain.inclusion_proof(&txids[2]).unwrap();
        assert_eq!(height, 1);
        assert_eq!(
            merkle::root_from_branch(&txids[2], &branch, position),
            chain.merkle_root(1).unwrap()
        );
    }

    #[test]
    fn test_oversized_mining_request_is_rejected() {
        let chain = MemoryChain::new();
        assert!(matches!(
            chain.mine(u64::MAX, "miner"),
            Err(ChainError::TooManyBlocks { requested: u64::MAX, .. })
        ));
        assert_eq!(chain.height(), 0);
    }

    #[test]
    fn test_blocks_link_to_previous_hash() {
        let chain = MemoryChain::new();
        let hashes = chain.mine(2, "miner").unwrap();

        assert_eq!(chain.block(2).unwrap().header.previous_hash, hashes[0]);
        assert_eq!(chain.block(1).unwrap().hash().unwrap(), hashes[0]);
    }

    #[tokio::test]
    async fn test_send_transaction_and_generate() {
        let chain = MemoryChain::new();
        let tx = chain.fund_asset_lock(2, &key_hash());

        let txid = chain.send_transaction(&tx.to_bytes().unwrap()).await.unwrap();
        assert_eq!(txid, tx.txid().unwrap());

        let hashes = chain.generate_to_address(2, "regtest").await.unwrap();
        assert_eq!(hashes.len(), 2);
        assert_eq!(chain.get_status().await.unwrap().blocks, 2);
    }
}
