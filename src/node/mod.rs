//! Chain service: the single writer around the ledger.
//!
//! Every mutating operation runs "apply in memory, then persist" as one
//! critical section behind a mutex, so a save can never clobber a newer
//! mutation with a stale snapshot (the unlocked variant of this design
//! has exactly that race; see DESIGN.md). Reads take the same lock
//! briefly and clone out, so they only ever observe fully-committed
//! state.
//!
//! A failed save is reported to the caller but the in-memory mutation
//! stands: callers must treat every mutation as applied in memory,
//! possibly not yet durable.

use std::path::Path;
use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};

use crate::ledger::{
    Account, AccountView, Amount, Block, ChainStatus, LedgerError, LedgerState, Transaction,
    Validator, DEFAULT_STAKE, FAUCET_ALLOTMENT,
};
use crate::producer;
use crate::producer::{Clock, SystemClock};
use crate::store::{LedgerStore, StoreError};
use crate::wallet::{AddressProvider, Ed25519AddressProvider};

/// Username of the account pre-funded at genesis.
pub const FAUCET_USERNAME: &str = "faucet";
const FAUCET_REASON: &str = "genesis funding";

#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    /// The mutation was applied in memory but could not be made durable.
    #[error("persistence failure: {0}")]
    Persistence(#[from] StoreError),
}

struct Core<P, R> {
    state: LedgerState,
    provider: P,
    rng: R,
    clock: Box<dyn Clock + Send>,
}

/// Owns the ledger, its store, and the injected capabilities.
pub struct ChainService<P = Ed25519AddressProvider, R = StdRng> {
    store: LedgerStore,
    core: Mutex<Core<P, R>>,
}

impl ChainService {
    /// Open the chain at `data_dir` with production capabilities and
    /// initialize it: load the persisted record if one exists, bootstrap
    /// genesis otherwise.
    pub fn open<D: AsRef<Path>>(data_dir: D) -> Result<Self, ChainError> {
        let service = Self::with_parts(
            LedgerStore::new(data_dir),
            Ed25519AddressProvider::new(),
            StdRng::from_entropy(),
            SystemClock,
        );
        service.initialize()?;
        Ok(service)
    }
}

impl<P, R> ChainService<P, R>
where
    P: AddressProvider,
    R: Rng,
{
    /// Assemble a service from explicit parts without initializing it.
    /// Tests use this to pin the provider, RNG, and clock.
    pub fn with_parts<C>(store: LedgerStore, provider: P, rng: R, clock: C) -> Self
    where
        C: Clock + Send + 'static,
    {
        Self {
            store,
            core: Mutex::new(Core {
                state: LedgerState::new(),
                provider,
                rng,
                clock: Box::new(clock),
            }),
        }
    }

    /// Load persisted state, or bootstrap genesis + faucet and persist the
    /// result. Idempotent within a run: once blocks exist in memory this
    /// returns without touching anything, so the faucet allotment is never
    /// minted twice.
    pub fn initialize(&self) -> Result<(), ChainError> {
        let mut core = self.core.lock().expect("chain lock poisoned");
        if !core.state.blocks.is_empty() {
            return Ok(());
        }
        if let Some(state) = self.store.load()? {
            info!(
                height = state.current_height,
                accounts = state.accounts.len(),
                "existing chain loaded"
            );
            core.state = state;
            return Ok(());
        }

        // Bootstrap on a scratch state and install it only once complete,
        // so a failing derivation cannot leave a genesis block without its
        // faucet behind.
        let Core {
            provider,
            rng,
            clock,
            ..
        } = &mut *core;
        let now = clock.now_ms();
        let mut fresh = LedgerState::new();
        fresh.blocks.push(Block::genesis(now));
        let faucet = fresh.create_account(FAUCET_USERNAME, provider, now)?;
        fresh.faucet_address = Some(faucet.address.clone());
        fresh.mint(
            &faucet.address,
            FAUCET_ALLOTMENT,
            Some(FAUCET_REASON.to_string()),
            now,
            rng,
        )?;
        info!(faucet = %faucet.address, "new chain bootstrapped");
        core.state = fresh;
        self.persist(&mut core)
    }

    pub fn create_account(&self, username: &str) -> Result<Account, ChainError> {
        let mut core = self.core.lock().expect("chain lock poisoned");
        let Core {
            state,
            provider,
            clock,
            ..
        } = &mut *core;
        let now = clock.now_ms();
        let account = state.create_account(username, provider, now)?;
        info!(username, address = %account.address, "account created");
        self.persist(&mut core)?;
        Ok(account)
    }

    pub fn mint(
        &self,
        to: &str,
        amount: Amount,
        reason: Option<String>,
    ) -> Result<Transaction, ChainError> {
        let mut core = self.core.lock().expect("chain lock poisoned");
        let Core {
            state, rng, clock, ..
        } = &mut *core;
        let now = clock.now_ms();
        let tx = state.mint(to, amount, reason, now, rng)?;
        info!(to, amount, tx_hash = %tx.tx_hash, "tokens minted");
        self.persist(&mut core)?;
        Ok(tx)
    }

    pub fn transfer(
        &self,
        from_username: &str,
        to: &str,
        amount: Amount,
    ) -> Result<Transaction, ChainError> {
        let mut core = self.core.lock().expect("chain lock poisoned");
        let Core {
            state, rng, clock, ..
        } = &mut *core;
        let now = clock.now_ms();
        let tx = state.transfer(from_username, to, amount, now, rng)?;
        info!(from = from_username, to, amount, tx_hash = %tx.tx_hash, "tokens transferred");
        self.persist(&mut core)?;
        Ok(tx)
    }

    pub fn register_validator(
        &self,
        username: &str,
        stake: Option<Amount>,
    ) -> Result<Validator, ChainError> {
        let mut core = self.core.lock().expect("chain lock poisoned");
        let Core { state, clock, .. } = &mut *core;
        let now = clock.now_ms();
        let validator = state.register_validator(username, stake.unwrap_or(DEFAULT_STAKE), now)?;
        info!(username, stake = validator.stake, "validator registered");
        self.persist(&mut core)?;
        Ok(validator)
    }

    pub fn mine_block(&self) -> Result<Block, ChainError> {
        let mut core = self.core.lock().expect("chain lock poisoned");
        let Core {
            state, rng, clock, ..
        } = &mut *core;
        let block = producer::mine_block(state, rng, clock.as_ref())?;
        info!(height = block.height, validator = %block.validator, "block mined");
        self.persist(&mut core)?;
        Ok(block)
    }

    pub fn status(&self) -> ChainStatus {
        self.core.lock().expect("chain lock poisoned").state.status()
    }

    pub fn account(&self, username: &str) -> Option<AccountView> {
        self.core
            .lock()
            .expect("chain lock poisoned")
            .state
            .account(username)
    }

    pub fn balance(&self, address: &str) -> Amount {
        self.core
            .lock()
            .expect("chain lock poisoned")
            .state
            .balance(address)
    }

    pub fn block(&self, height: u64) -> Option<Block> {
        self.core
            .lock()
            .expect("chain lock poisoned")
            .state
            .block(height)
            .cloned()
    }

    pub fn recent_blocks(&self, limit: usize) -> Vec<Block> {
        self.core
            .lock()
            .expect("chain lock poisoned")
            .state
            .recent_blocks(limit)
    }

    pub fn validators(&self) -> Vec<Validator> {
        self.core
            .lock()
            .expect("chain lock poisoned")
            .state
            .validators
            .values()
            .cloned()
            .collect()
    }

    /// Write-through step of every mutation. On failure the in-memory
    /// state is NOT rolled back; the error tells the caller durability is
    /// behind.
    fn persist(&self, core: &mut Core<P, R>) -> Result<(), ChainError> {
        let now = core.clock.now_ms();
        if let Err(err) = self.store.save(&core.state, now) {
            warn!(%err, "state mutated in memory but not persisted");
            return Err(err.into());
        }
        Ok(())
    }
}
