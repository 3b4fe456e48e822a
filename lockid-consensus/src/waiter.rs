//! Waiting for the funding chain to reach a height
//!
//! On a live network the waiter polls chain status until enough blocks have
//! been produced. On regtest it asks the chain to produce the missing blocks
//! itself. Neither path takes a timeout: callers that need to give up drop
//! the future, which leaves no state behind.

use crate::chain::ChainClient;
use crate::config::{ConfirmationConfig, WaitMode};
use crate::error::ChainError;
use crate::BlockHeight;
use async_trait::async_trait;
use lockid_core::{KeyPair, KeyType};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// How to get from the current chain height to a target height
#[async_trait]
pub trait ConfirmationStrategy: Send + Sync + fmt::Debug {
    /// Returns the chain height once it is at least `target`
    async fn reach_height(
        &self,
        client: &dyn ChainClient,
        target: BlockHeight,
    ) -> Result<BlockHeight, ChainError>;
}

/// Re-read chain status every `interval` until the target is reached
#[derive(Debug, Clone)]
pub struct PollingStrategy {
    pub interval: Duration,
}

#[async_trait]
impl ConfirmationStrategy for PollingStrategy {
    async fn reach_height(
        &self,
        client: &dyn ChainClient,
        target: BlockHeight,
    ) -> Result<BlockHeight, ChainError> {
        loop {
            let status = client.get_status().await?;
            if status.blocks >= target {
                return Ok(status.blocks);
            }
            debug!(
                "Chain at height {}, waiting for {} ({:?} until next check)",
                status.blocks, target, self.interval
            );
            tokio::time::sleep(self.interval).await;
        }
    }
}

/// Generate the missing blocks to a throwaway address
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockGenerationStrategy;

#[async_trait]
impl ConfirmationStrategy for BlockGenerationStrategy {
    async fn reach_height(
        &self,
        client: &dyn ChainClient,
        target: BlockHeight,
    ) -> Result<BlockHeight, ChainError> {
        let current = client.get_status().await?.blocks;
        if current >= target {
            return Ok(current);
        }

        let missing = target - current;
        let address = throwaway_address()?;
        client.generate_to_address(missing, &address).await?;
        debug!("Generated {} blocks to {}", missing, address);

        Ok(client.get_status().await?.blocks)
    }
}

fn throwaway_address() -> Result<String, ChainError> {
    let keypair = KeyPair::generate(KeyType::EcdsaSecp256k1)?;
    Ok(bs58::encode(keypair.public_key_hash().as_bytes()).into_string())
}

/// Suspends callers until the funding chain reaches a height
pub struct ConfirmationWaiter {
    client: Arc<dyn ChainClient>,
    strategy: Box<dyn ConfirmationStrategy>,
}

impl fmt::Debug for ConfirmationWaiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfirmationWaiter")
            .field("strategy", &self.strategy)
            .finish()
    }
}

impl ConfirmationWaiter {
    pub fn new(client: Arc<dyn ChainClient>, strategy: Box<dyn ConfirmationStrategy>) -> Self {
        Self { client, strategy }
    }

    /// Poll every `interval`
    pub fn polling(client: Arc<dyn ChainClient>, interval: Duration) -> Self {
        Self::new(client, Box::new(PollingStrategy { interval }))
    }

    /// Produce blocks on demand; regtest only
    pub fn generating(client: Arc<dyn ChainClient>) -> Self {
        Self::new(client, Box::new(BlockGenerationStrategy))
    }

    pub fn from_config(client: Arc<dyn ChainClient>, config: &ConfirmationConfig) -> Self {
        match config.mode {
            WaitMode::Poll => {
                Self::polling(client, Duration::from_secs(config.poll_interval_secs))
            }
            WaitMode::Generate => Self::generating(client),
        }
    }

    /// Wait until the chain height is at least `target`
    pub async fn wait_for_height(&self, target: BlockHeight) -> Result<BlockHeight, ChainError> {
        let height = self.strategy.reach_height(self.client.as_ref(), target).await?;
        info!("Chain reached height {} (target {})", height, target);
        Ok(height)
    }

    /// Wait for `blocks` more blocks on top of the current height
    pub async fn wait_for_blocks(&self, blocks: u64) -> Result<BlockHeight, ChainError> {
        let current = self.client.get_status().await?.blocks;
        self.wait_for_height(current.saturating_add(blocks)).await
    }
}
