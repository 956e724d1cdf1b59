//! Block production and reward distribution.
//!
//! A mined block is appended with an empty transaction list; its hash is a
//! digest of `(height, wall-clock timestamp, random nonce)` rather than a
//! content hash of the block, so it identifies the block uniquely but is
//! not tamper-evident. That weakness is deliberate: the hash values are
//! part of the chain's observable behavior and changing the scheme would
//! rewrite them. Both the clock and the randomness source are injected so
//! tests can pin exact hashes and validator choices.

use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use sha2::{Digest, Sha256};

use crate::ledger::{
    Address, Amount, Block, LedgerError, LedgerState, BLOCK_GAS_LIMIT, GENESIS_PREVIOUS_HASH,
    SYSTEM_ADDRESS,
};

/// Fixed per-block reward, split among active validators at mining time.
pub const BLOCK_REWARD: Amount = 100;
/// Reason recorded on every reward mint.
pub const REWARD_REASON: &str = "block reward";

/// Injectable wall clock, milliseconds since the unix epoch.
pub trait Clock {
    fn now_ms(&self) -> u64;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// Clock pinned to a single instant, for deterministic tests.
#[derive(Clone, Copy, Debug)]
pub struct FixedClock(pub u64);

impl Clock for FixedClock {
    fn now_ms(&self) -> u64 {
        self.0
    }
}

/// Mine the next block: pick a validator, append the block, pay rewards.
///
/// Nothing before the append can fail, so a returned error never leaves a
/// half-mined block behind: the block is either fully appended (with its
/// height increment) or the state is untouched.
pub fn mine_block<R: Rng>(
    state: &mut LedgerState,
    rng: &mut R,
    clock: &dyn Clock,
) -> Result<Block, LedgerError> {
    let height = state.current_height + 1;
    let timestamp = clock.now_ms();
    let validator = select_validator(state, rng);
    let previous_hash = state
        .blocks
        .last()
        .map(|block| block.hash.clone())
        .unwrap_or_else(|| GENESIS_PREVIOUS_HASH.to_string());

    let block = Block {
        height,
        timestamp,
        hash: block_hash(height, timestamp, rng),
        previous_hash,
        transactions: Vec::new(),
        validator,
        gas_used: 0,
        gas_limit: BLOCK_GAS_LIMIT,
    };

    state.current_height = height;
    state.blocks.push(block.clone());
    distribute_rewards(state, timestamp, rng)?;
    Ok(block)
}

/// Uniformly random choice among active validators; the system sentinel
/// when none are active.
pub fn select_validator<R: Rng>(state: &LedgerState, rng: &mut R) -> Address {
    let active = state.active_validator_addresses();
    if active.is_empty() {
        return SYSTEM_ADDRESS.to_string();
    }
    let index = rng.gen_range(0..active.len());
    active[index].clone()
}

/// Split [`BLOCK_REWARD`] evenly among active validators. Each gets
/// `BLOCK_REWARD / K` (integer division); the remainder is burned, not
/// carried forward. With no active validators this is a no-op. With more
/// than [`BLOCK_REWARD`] validators the share rounds to zero: counters
/// still advance but nothing is minted.
fn distribute_rewards<R: Rng>(
    state: &mut LedgerState,
    now_ms: u64,
    rng: &mut R,
) -> Result<(), LedgerError> {
    let active = state.active_validator_addresses();
    if active.is_empty() {
        return Ok(());
    }
    let share = BLOCK_REWARD / active.len() as Amount;
    for address in &active {
        if share > 0 {
            state.mint(address, share, Some(REWARD_REASON.to_string()), now_ms, rng)?;
        }
        if let Some(validator) = state.validators.get_mut(address) {
            validator.rewards_earned += share;
            validator.blocks_proposed += 1;
        }
    }
    Ok(())
}

/// Weak identifier hash: sha256 over `"{height}-{timestamp}-{nonce}"`.
fn block_hash<R: Rng>(height: u64, timestamp: u64, rng: &mut R) -> String {
    let nonce: u64 = rng.gen();
    let digest = Sha256::digest(format!("{height}-{timestamp}-{nonce}").as_bytes());
    hex::encode(digest)
}
