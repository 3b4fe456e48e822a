//! Client-side flows: register, top up and write, with resubmission
//!
//! A client broadcasts its funding transaction, waits for the chain to move
//! past it, then submits the signed transition. When the platform has not
//! seen the lock yet it backs off and resubmits; every other rejection is
//! returned at once.

use crate::chain::ChainClient;
use crate::config::{BackoffStrategy, PlatformConfig, RetryConfig};
use crate::error::{ClientError, TransitionError};
use crate::platform::Platform;
use crate::transition::{DocumentOperation, StateTransition};
use crate::waiter::ConfirmationWaiter;
use crate::Revision;
use lockid_core::{
    AssetLockProof, AssetLockProofBuilder, Credits, FundingTransaction, Identity, IdentityId,
    IdentityPublicKey, KeyId, KeyPair,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Delay schedule for resubmitting after retryable rejections
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub strategy: BackoffStrategy,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Total attempts including the first; `None` keeps trying
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            strategy: config.strategy,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            max_attempts: config.max_attempts,
        }
    }

    /// Delay after the `attempt`-th failed attempt (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.strategy {
            BackoffStrategy::Fixed => self.initial_delay,
            BackoffStrategy::Exponential => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                self.initial_delay.saturating_mul(factor).min(self.max_delay)
            }
        }
    }

    /// Whether another attempt is allowed after `attempts` attempts
    pub fn allows_another(&self, attempts: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempts < max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Drives identity flows against a funding chain and a platform
pub struct PlatformClient {
    chain: Arc<dyn ChainClient>,
    platform: Arc<Platform>,
    waiter: ConfirmationWaiter,
    retry: RetryPolicy,
    min_confirmations: u64,
}

impl PlatformClient {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        platform: Arc<Platform>,
        config: &PlatformConfig,
    ) -> Self {
        Self {
            waiter: ConfirmationWaiter::from_config(chain.clone(), &config.confirmation),
            chain,
            platform,
            retry: RetryPolicy::from_config(&config.retry),
            min_confirmations: config.confirmation.min_confirmations,
        }
    }

    pub fn with_waiter(mut self, waiter: ConfirmationWaiter) -> Self {
        self.waiter = waiter;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn platform(&self) -> &Arc<Platform> {
        &self.platform
    }

    /// Register an identity funded by `funding`, holding `keys` in order.
    ///
    /// The transition is signed with the first key, which the lock output
    /// must commit to.
    pub async fn register_identity(
        &self,
        funding: &FundingTransaction,
        keys: &[KeyPair],
    ) -> Result<Identity, ClientError> {
        let signer = keys.first().ok_or_else(|| {
            TransitionError::InvalidTransitionStructure(
                "Identity must have at least one public key".to_string(),
            )
        })?;

        let proof = self.lock_funds(funding, signer).await?;
        let public_keys = keys
            .iter()
            .enumerate()
            .map(|(index, keypair)| IdentityPublicKey::from_keypair(index as KeyId, keypair))
            .collect();

        let mut transition = StateTransition::identity_create(proof, public_keys);
        transition.sign(signer, 0)?;
        let identity_id = transition.identity_id();

        self.submit_with_retry(&transition).await?;
        let identity = self
            .platform
            .get_identity(&identity_id)
            .ok_or(TransitionError::IdentityNotFound { identity_id })?;

        info!(
            "Registered identity {} with {} credits",
            identity.id, identity.balance
        );
        Ok(identity)
    }

    /// Add the value of `funding` to an identity; returns the new balance
    pub async fn top_up_identity(
        &self,
        identity_id: &IdentityId,
        funding: &FundingTransaction,
        signer: &KeyPair,
        key_id: KeyId,
    ) -> Result<Credits, ClientError> {
        let proof = self.lock_funds(funding, signer).await?;

        let mut transition = StateTransition::identity_top_up(*identity_id, proof);
        transition.sign(signer, key_id)?;

        self.submit_with_retry(&transition).await?;
        let balance = self
            .platform
            .get_identity(identity_id)
            .map(|identity| identity.balance)
            .ok_or(TransitionError::IdentityNotFound {
                identity_id: *identity_id,
            })?;

        info!("Topped up identity {} to {} credits", identity_id, balance);
        Ok(balance)
    }

    /// Submit a signed documents batch
    pub async fn broadcast_documents(
        &self,
        owner_id: &IdentityId,
        operations: Vec<DocumentOperation>,
        signer: &KeyPair,
        key_id: KeyId,
    ) -> Result<Revision, ClientError> {
        let mut transition = StateTransition::documents_batch(*owner_id, operations);
        transition.sign(signer, key_id)?;
        self.submit_with_retry(&transition).await
    }

    /// Submit, backing off and resubmitting while the rejection is retryable
    pub async fn submit_with_retry(
        &self,
        transition: &StateTransition,
    ) -> Result<Revision, ClientError> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self.platform.submit(transition) {
                Ok(revision) => return Ok(revision),
                Err(e) if e.is_retryable() => {
                    if !self.retry.allows_another(attempts) {
                        return Err(ClientError::RetriesExhausted {
                            attempts,
                            last_error: e,
                        });
                    }
                    let delay = self.retry.delay_for(attempts);
                    warn!(
                        "{} (attempt {}), resubmitting in {:?}",
                        e.name(),
                        attempts,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Broadcast `funding`, wait for it to confirm and build a proof for `signer`'s lock
    async fn lock_funds(
        &self,
        funding: &FundingTransaction,
        signer: &KeyPair,
    ) -> Result<AssetLockProof, ClientError> {
        let proof = AssetLockProofBuilder::new(funding)
            .for_key(signer.public_key_hash())
            .build()?;

        let txid = self.chain.send_transaction(&funding.to_bytes()?).await?;
        info!("Broadcast asset lock transaction {}", txid);

        self.waiter.wait_for_blocks(self.min_confirmations).await?;
        Ok(proof)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(strategy: BackoffStrategy) -> RetryPolicy {
        RetryPolicy {
            strategy,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            max_attempts: Some(3),
        }
    }

    #[test]
    fn test_fixed_backoff() {
        let retry = policy(BackoffStrategy::Fixed);
        assert_eq!(retry.delay_for(1), Duration::from_millis(100));
        assert_eq!(retry.delay_for(10), Duration::from_millis(100));
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let retry = policy(BackoffStrategy::Exponential);
        assert_eq!(retry.delay_for(1), Duration::from_millis(100));
        assert_eq!(retry.delay_for(2), Duration::from_millis(200));
        assert_eq!(retry.delay_for(4), Duration::from_millis(800));
        assert_eq!(retry.delay_for(5), Duration::from_millis(1000));
        assert_eq!(retry.delay_for(40), Duration::from_millis(1000));
    }

    #[test]
    fn test_attempt_cap() {
        let retry = policy(BackoffStrategy::Fixed);
        assert!(retry.allows_another(2));
        assert!(!retry.allows_another(3));

        let unbounded = RetryPolicy::default();
        assert!(unbounded.allows_another(u32::MAX - 1));
    }
}
