//! Durable persistence for the ledger.
//!
//! The whole [`LedgerState`] is serialized into one JSON record that is
//! rewritten in full after every mutation (write-to-temp then rename; no
//! append log, no checksum). Loading is defensive: a record missing any
//! field decodes with that field at its genesis default instead of
//! failing, so a partially-shaped record from an older writer still
//! comes back up, and a record that does not parse at all is treated the
//! same as no record, so the chain recovers by bootstrapping genesis.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::ledger::{
    Account, Address, Amount, Block, LedgerState, Username, Validator, CHAIN_ID, GENESIS_SUPPLY,
};

/// Directory the chain writes under when none is configured.
pub const DEFAULT_DATA_DIR: &str = "blockchain-data";
const LEDGER_FILE: &str = "blockchain.json";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("ledger store i/o failure: {0}")]
    Io(#[from] io::Error),
    #[error("ledger record codec failure: {0}")]
    Codec(#[from] serde_json::Error),
}

/// On-disk shape of the ledger. Every field defaults so that absence in
/// the record never aborts a load.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct PersistedLedger {
    chain_id: String,
    blocks: Vec<Block>,
    current_height: u64,
    total_supply: Amount,
    faucet_address: Option<Address>,
    accounts: BTreeMap<Username, Account>,
    validators: BTreeMap<Address, Validator>,
    balances: BTreeMap<Address, Amount>,
    last_saved: u64,
}

impl Default for PersistedLedger {
    fn default() -> Self {
        Self {
            chain_id: CHAIN_ID.to_string(),
            blocks: Vec::new(),
            current_height: 0,
            total_supply: GENESIS_SUPPLY,
            faucet_address: None,
            accounts: BTreeMap::new(),
            validators: BTreeMap::new(),
            balances: BTreeMap::new(),
            last_saved: 0,
        }
    }
}

impl PersistedLedger {
    fn from_state(state: &LedgerState, now_ms: u64) -> Self {
        Self {
            chain_id: state.chain_id.clone(),
            blocks: state.blocks.clone(),
            current_height: state.current_height,
            total_supply: state.total_supply,
            faucet_address: state.faucet_address.clone(),
            accounts: state.accounts.clone(),
            validators: state.validators.clone(),
            balances: state.balances.clone(),
            last_saved: now_ms,
        }
    }

    fn into_state(self) -> LedgerState {
        LedgerState {
            chain_id: self.chain_id,
            current_height: self.current_height,
            total_supply: self.total_supply,
            faucet_address: self.faucet_address,
            accounts: self.accounts,
            validators: self.validators,
            balances: self.balances,
            blocks: self.blocks,
        }
    }
}

/// Handle on the single well-known record location.
pub struct LedgerStore {
    path: PathBuf,
}

impl LedgerStore {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            path: data_dir.as_ref().join(LEDGER_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Overwrite the record with the full current state. The containing
    /// directory is created if absent.
    pub fn save(&self, state: &LedgerState, now_ms: u64) -> Result<(), StoreError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let record = PersistedLedger::from_state(state, now_ms);
        let data = serde_json::to_vec_pretty(&record)?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, data)?;
        fs::rename(&tmp_path, &self.path)?;
        debug!(path = %self.path.display(), height = state.current_height, "ledger saved");
        Ok(())
    }

    /// `Ok(None)` when no record exists or the record does not parse, so
    /// the caller can bootstrap genesis instead of treating first start
    /// (or a corrupt file) as a failure. The next save overwrites the
    /// unreadable record.
    pub fn load(&self) -> Result<Option<LedgerState>, StoreError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let data = fs::read(&self.path)?;
        let record: PersistedLedger = match serde_json::from_slice(&data) {
            Ok(record) => record,
            Err(err) => {
                warn!(
                    path = %self.path.display(),
                    %err,
                    "persisted record is unreadable; starting fresh"
                );
                return Ok(None);
            }
        };
        if record.blocks.is_empty() {
            warn!(
                path = %self.path.display(),
                "persisted record has no blocks; fields were defaulted"
            );
        }
        info!(
            blocks = record.blocks.len(),
            accounts = record.accounts.len(),
            "ledger loaded"
        );
        Ok(Some(record.into_state()))
    }

    /// Delete the record; quietly succeeds when there is nothing to
    /// delete.
    pub fn clear(&self) -> Result<(), StoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
