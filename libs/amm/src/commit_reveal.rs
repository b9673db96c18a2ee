//! Commit-reveal front-running protection.
//!
//! A trader first publishes only the SHA3-256 hash of their swap intent, then
//! reveals the parameters after a minimum number of sequence numbers has
//! elapsed. An observer of the commitment learns nothing orderable; by reveal
//! time the commitment is already sequenced, so sandwiching the reveal buys
//! nothing. Per-user monotonic nonces make every commitment hash unique and
//! non-replayable.

use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use tracing::{debug, info};

use crate::asset::{Asset, PoolPair};
use crate::config::AmmConfig;
use crate::error::AmmError;

/// The full parameters of a swap, hashed at commit time and disclosed at
/// reveal time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapIntent {
    pub user: String,
    pub pool: PoolPair,
    pub token_in: Asset,
    pub amount_in: Decimal,
    pub min_amount_out: Decimal,
    pub nonce: u64,
    /// Client-chosen blinding value. Without it the parameter space of a
    /// plausible swap is small enough to brute-force from the hash alone.
    pub secret: String,
}

impl SwapIntent {
    /// Hex-encoded SHA3-256 over the length-prefixed intent fields.
    ///
    /// Every variable-length field is prefixed with its byte length so no two
    /// distinct intents can serialize to the same byte stream. Decimals are
    /// normalized first so `1.50` and `1.5` hash identically.
    pub fn commitment_hash(&self) -> String {
        let mut hasher = Sha3_256::new();
        hash_str(&mut hasher, &self.user);
        hash_str(&mut hasher, self.pool.asset0().as_str());
        hash_str(&mut hasher, self.pool.asset1().as_str());
        hash_str(&mut hasher, self.token_in.as_str());
        hash_str(&mut hasher, &self.amount_in.normalize().to_string());
        hash_str(&mut hasher, &self.min_amount_out.normalize().to_string());
        hasher.update(self.nonce.to_be_bytes());
        hash_str(&mut hasher, &self.secret);
        hex::encode(hasher.finalize())
    }
}

fn hash_str(hasher: &mut Sha3_256, value: &str) {
    hasher.update((value.len() as u64).to_be_bytes());
    hasher.update(value.as_bytes());
}

/// Lifecycle of a commitment. `Committed` is the only state a reveal is
/// accepted from. `Revealed` means the intent was disclosed and consumed;
/// `Executed` that the disclosed swap also settled. Consumed and expired
/// records stay around until purged so replays fail loudly instead of
/// silently recommitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitmentState {
    Committed,
    Revealed,
    Executed,
    Expired,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwapCommitment {
    pub hash: String,
    pub user: String,
    pub committed_seq: u64,
    pub state: CommitmentState,
}

/// Commitment store plus per-user nonce tracking.
#[derive(Debug, Default)]
pub struct CommitRevealGuard {
    commitments: DashMap<String, SwapCommitment>,
    /// Next expected nonce per user; starts at zero.
    nonces: DashMap<String, u64>,
}

impl CommitRevealGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_nonce(&self, user: &str) -> u64 {
        self.nonces.get(user).map(|v| *v).unwrap_or(0)
    }

    /// Register a commitment hash for `user` at the current sequence number.
    pub fn commit(
        &self,
        user: &str,
        hash: &str,
        nonce: u64,
        sequence: u64,
    ) -> Result<(), AmmError> {
        let expected = self.next_nonce(user);
        if nonce != expected {
            return Err(AmmError::InvalidNonce {
                user: user.to_string(),
                expected,
                got: nonce,
            });
        }
        if self.commitments.contains_key(hash) {
            return Err(AmmError::DuplicateCommitment {
                hash: hash.to_string(),
            });
        }

        self.nonces.insert(user.to_string(), nonce + 1);
        self.commitments.insert(
            hash.to_string(),
            SwapCommitment {
                hash: hash.to_string(),
                user: user.to_string(),
                committed_seq: sequence,
                state: CommitmentState::Committed,
            },
        );
        debug!(user, hash, sequence, "swap committed");
        Ok(())
    }

    /// Validate a reveal against its commitment and consume it.
    ///
    /// The commitment is consumed exactly once: a successful reveal moves it
    /// to `Executed` even if the subsequent swap fails, so a failed swap
    /// cannot be retried under the same commitment.
    pub fn reveal(
        &self,
        hash: &str,
        intent: &SwapIntent,
        config: &AmmConfig,
        sequence: u64,
    ) -> Result<(), AmmError> {
        let mut commitment =
            self.commitments
                .get_mut(hash)
                .ok_or_else(|| AmmError::UnknownCommitment {
                    hash: hash.to_string(),
                })?;

        if commitment.state != CommitmentState::Committed {
            return Err(AmmError::CommitmentConsumed {
                hash: hash.to_string(),
                state: commitment.state,
            });
        }

        let elapsed = sequence.saturating_sub(commitment.committed_seq);
        if elapsed < config.min_reveal_delay {
            return Err(AmmError::RevealTooEarly {
                committed_seq: commitment.committed_seq,
                current_seq: sequence,
                delay: config.min_reveal_delay,
            });
        }
        if elapsed > config.max_reveal_window {
            commitment.state = CommitmentState::Expired;
            return Err(AmmError::CommitmentExpired {
                hash: hash.to_string(),
            });
        }

        if intent.commitment_hash() != hash {
            return Err(AmmError::InvalidReveal {
                hash: hash.to_string(),
            });
        }

        commitment.state = CommitmentState::Revealed;
        info!(user = %intent.user, hash, sequence, "commitment revealed");
        Ok(())
    }

    /// Record that the revealed swap settled. No-op for any other state.
    pub fn mark_executed(&self, hash: &str) {
        if let Some(mut commitment) = self.commitments.get_mut(hash) {
            if commitment.state == CommitmentState::Revealed {
                commitment.state = CommitmentState::Executed;
            }
        }
    }

    pub fn state_of(&self, hash: &str) -> Option<CommitmentState> {
        self.commitments.get(hash).map(|c| c.state)
    }

    /// Expire overdue commitments and drop terminal entries old enough that
    /// no honest client can still reference them. Returns the number dropped.
    pub fn purge_expired(&self, config: &AmmConfig, sequence: u64) -> usize {
        for mut entry in self.commitments.iter_mut() {
            if entry.state == CommitmentState::Committed
                && sequence.saturating_sub(entry.committed_seq) > config.max_reveal_window
            {
                entry.state = CommitmentState::Expired;
            }
        }

        let horizon = config.max_reveal_window * 2;
        let before = self.commitments.len();
        self.commitments.retain(|_, commitment| {
            commitment.state == CommitmentState::Committed
                || sequence.saturating_sub(commitment.committed_seq) <= horizon
        });
        let dropped = before - self.commitments.len();
        if dropped > 0 {
            debug!(dropped, sequence, "purged stale commitments");
        }
        dropped
    }

    pub fn pending_count(&self) -> usize {
        self.commitments
            .iter()
            .filter(|c| c.state == CommitmentState::Committed)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn intent(nonce: u64) -> SwapIntent {
        SwapIntent {
            user: "alice".into(),
            pool: PoolPair::new(Asset::new("eth").unwrap(), Asset::new("usdc").unwrap())
                .unwrap(),
            token_in: Asset::new("eth").unwrap(),
            amount_in: dec!(1),
            min_amount_out: dec!(1800),
            nonce,
            secret: "hunter2".into(),
        }
    }

    #[test]
    fn hash_is_stable_and_sensitive() {
        let a = intent(0);
        let mut b = intent(0);
        assert_eq!(a.commitment_hash(), b.commitment_hash());

        b.amount_in = dec!(1.000001);
        assert_ne!(a.commitment_hash(), b.commitment_hash());
        assert_eq!(intent(0).commitment_hash().len(), 64);
    }

    #[test]
    fn trailing_zeros_do_not_change_the_hash() {
        let a = intent(0);
        let mut b = intent(0);
        b.amount_in = dec!(1.00);
        assert_eq!(a.commitment_hash(), b.commitment_hash());
    }

    #[test]
    fn happy_path_commit_then_reveal() {
        let guard = CommitRevealGuard::new();
        let config = AmmConfig::default();
        let intent = intent(0);
        let hash = intent.commitment_hash();

        guard.commit("alice", &hash, 0, 10).unwrap();
        guard.reveal(&hash, &intent, &config, 12).unwrap();
        assert_eq!(guard.state_of(&hash), Some(CommitmentState::Revealed));
        guard.mark_executed(&hash);
        assert_eq!(guard.state_of(&hash), Some(CommitmentState::Executed));
    }

    #[test]
    fn nonce_must_match_expected() {
        let guard = CommitRevealGuard::new();
        let err = guard.commit("alice", "deadbeef", 5, 10).unwrap_err();
        assert_eq!(
            err,
            AmmError::InvalidNonce {
                user: "alice".into(),
                expected: 0,
                got: 5,
            }
        );

        guard.commit("alice", "aa", 0, 10).unwrap();
        assert_eq!(guard.next_nonce("alice"), 1);
        let err = guard.commit("alice", "bb", 0, 11).unwrap_err();
        assert!(matches!(err, AmmError::InvalidNonce { expected: 1, .. }));
    }

    #[test]
    fn duplicate_hash_rejected() {
        let guard = CommitRevealGuard::new();
        guard.commit("alice", "samehash", 0, 10).unwrap();
        let err = guard.commit("bob", "samehash", 0, 10).unwrap_err();
        assert!(matches!(err, AmmError::DuplicateCommitment { .. }));
    }

    #[test]
    fn reveal_too_early_is_retryable() {
        let guard = CommitRevealGuard::new();
        let config = AmmConfig::default();
        let intent = intent(0);
        let hash = intent.commitment_hash();

        guard.commit("alice", &hash, 0, 10).unwrap();
        let err = guard.reveal(&hash, &intent, &config, 11).unwrap_err();
        assert!(matches!(err, AmmError::RevealTooEarly { .. }));
        // still committed, a later reveal succeeds
        assert_eq!(guard.state_of(&hash), Some(CommitmentState::Committed));
        guard.reveal(&hash, &intent, &config, 12).unwrap();
    }

    #[test]
    fn overdue_reveal_expires_the_commitment() {
        let guard = CommitRevealGuard::new();
        let config = AmmConfig::default();
        let intent = intent(0);
        let hash = intent.commitment_hash();

        guard.commit("alice", &hash, 0, 10).unwrap();
        let err = guard
            .reveal(&hash, &intent, &config, 10 + config.max_reveal_window + 1)
            .unwrap_err();
        assert!(matches!(err, AmmError::CommitmentExpired { .. }));
        assert_eq!(guard.state_of(&hash), Some(CommitmentState::Expired));
    }

    #[test]
    fn mismatched_reveal_rejected_without_consuming() {
        let guard = CommitRevealGuard::new();
        let config = AmmConfig::default();
        let committed = intent(0);
        let hash = committed.commitment_hash();
        guard.commit("alice", &hash, 0, 10).unwrap();

        let mut tampered = committed.clone();
        tampered.min_amount_out = dec!(1);
        let err = guard.reveal(&hash, &tampered, &config, 12).unwrap_err();
        assert!(matches!(err, AmmError::InvalidReveal { .. }));
        assert_eq!(guard.state_of(&hash), Some(CommitmentState::Committed));
    }

    #[test]
    fn revealed_commitment_cannot_be_replayed() {
        let guard = CommitRevealGuard::new();
        let config = AmmConfig::default();
        let intent = intent(0);
        let hash = intent.commitment_hash();

        guard.commit("alice", &hash, 0, 10).unwrap();
        guard.reveal(&hash, &intent, &config, 12).unwrap();
        let err = guard.reveal(&hash, &intent, &config, 13).unwrap_err();
        assert!(matches!(
            err,
            AmmError::CommitmentConsumed {
                state: CommitmentState::Revealed,
                ..
            }
        ));
    }

    #[test]
    fn purge_expires_overdue_and_drops_stale() {
        let guard = CommitRevealGuard::new();
        let config = AmmConfig::default();

        guard.commit("alice", "old", 0, 0).unwrap();
        guard.commit("bob", "fresh", 0, 100).unwrap();

        // "old" is past the reveal window but inside the retention horizon
        let dropped = guard.purge_expired(&config, 100);
        assert_eq!(dropped, 0);
        assert_eq!(guard.state_of("old"), Some(CommitmentState::Expired));
        assert_eq!(guard.state_of("fresh"), Some(CommitmentState::Committed));

        // past twice the window, the terminal entry is dropped
        let dropped = guard.purge_expired(&config, 2 * config.max_reveal_window + 1);
        assert_eq!(dropped, 1);
        assert_eq!(guard.state_of("old"), None);
    }
}
