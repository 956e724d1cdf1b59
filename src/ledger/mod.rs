use std::collections::BTreeMap;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::wallet::{AddressProvider, DerivationError};

pub type Address = String;
pub type Username = String;
pub type Amount = u64;

pub const CHAIN_ID: &str = "mychain-1";
/// Supply the chain claims at genesis, before any mint.
pub const GENESIS_SUPPLY: Amount = 1_000_000;
/// Tokens minted to the faucet account at bootstrap. The faucet mint is
/// counted on top of [`GENESIS_SUPPLY`], so a fresh chain reports a total
/// supply of 1_500_000. Inherited double-count, kept as-is; see DESIGN.md.
pub const FAUCET_ALLOTMENT: Amount = 500_000;
pub const BLOCK_GAS_LIMIT: u64 = 1_000_000;
pub const DEFAULT_STAKE: Amount = 1_000;

/// Sentinel hash of the height-0 block.
pub const GENESIS_HASH: &str = "genesis";
/// Sentinel previous-hash of the height-0 block.
pub const GENESIS_PREVIOUS_HASH: &str = "0";
/// Sentinel validator used when no registered validator is active, and the
/// `from` of every mint.
pub const SYSTEM_ADDRESS: &str = "system";

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("account {username} already exists")]
    DuplicateAccount { username: Username },
    #[error("validator already registered for address {address}")]
    DuplicateValidator { address: Address },
    #[error("sender account {username} does not exist")]
    UnknownSender { username: Username },
    #[error("account {username} does not exist")]
    UnknownAccount { username: Username },
    #[error("insufficient balance in {address}: have {balance}, need {amount}")]
    InsufficientBalance {
        address: Address,
        balance: Amount,
        amount: Amount,
    },
    #[error("amount must be greater than zero")]
    InvalidAmount,
    #[error("amount would overflow a balance or the total supply")]
    AmountOverflow,
    #[error(transparent)]
    Derivation(#[from] DerivationError),
}

/// A named account. The balance does NOT live here; it lives in the
/// ledger's balance table keyed by address, so reward mints to a raw
/// address never have to resolve a username.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub username: Username,
    pub address: Address,
    /// Stored verbatim and returned once at creation; treat as sensitive.
    pub secret_phrase: String,
    pub created_at: u64,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ValidatorStatus {
    Active,
    Inactive,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Validator {
    pub address: Address,
    pub username: Username,
    pub stake: Amount,
    /// Fixed at registration time; never re-derived from later balance
    /// changes.
    pub power: Amount,
    pub status: ValidatorStatus,
    pub blocks_proposed: u64,
    pub rewards_earned: Amount,
    pub joined_at: u64,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TxKind {
    Mint,
    Transfer,
}

/// Record of a single mint or transfer. Transactions are returned to the
/// caller and are not bound into any block; mined blocks carry an empty
/// transaction list. Inherited behavior, kept as-is.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub kind: TxKind,
    pub from: Address,
    pub to: Address,
    pub amount: Amount,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub timestamp: u64,
    pub tx_hash: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub height: u64,
    pub timestamp: u64,
    pub hash: String,
    pub previous_hash: String,
    pub transactions: Vec<Transaction>,
    /// Address of the selected validator, or [`SYSTEM_ADDRESS`].
    pub validator: Address,
    pub gas_used: u64,
    pub gas_limit: u64,
}

impl Block {
    pub fn genesis(timestamp: u64) -> Self {
        Self {
            height: 0,
            timestamp,
            hash: GENESIS_HASH.to_string(),
            previous_hash: GENESIS_PREVIOUS_HASH.to_string(),
            transactions: Vec::new(),
            validator: SYSTEM_ADDRESS.to_string(),
            gas_used: 0,
            gas_limit: BLOCK_GAS_LIMIT,
        }
    }
}

/// Read-only chain summary.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChainStatus {
    pub chain_id: String,
    pub latest_height: u64,
    pub total_blocks: usize,
    pub total_supply: Amount,
    pub active_validator_count: usize,
    pub total_accounts: usize,
}

/// An account joined with its current balance, for query responses.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct AccountView {
    #[serde(flatten)]
    pub account: Account,
    pub balance: Amount,
}

/// The single source of truth: accounts, balances, validators, and the
/// block sequence. Blocks keep their own ordered vector because height
/// order is semantic; everything else is keyed for lookup.
///
/// All operations are pure in-memory mutations; the persistence discipline
/// is layered on by [`crate::node::ChainService`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerState {
    pub chain_id: String,
    pub current_height: u64,
    pub total_supply: Amount,
    pub faucet_address: Option<Address>,
    pub accounts: BTreeMap<Username, Account>,
    pub validators: BTreeMap<Address, Validator>,
    pub balances: BTreeMap<Address, Amount>,
    pub blocks: Vec<Block>,
}

impl LedgerState {
    pub fn new() -> Self {
        Self {
            chain_id: CHAIN_ID.to_string(),
            current_height: 0,
            total_supply: GENESIS_SUPPLY,
            faucet_address: None,
            accounts: BTreeMap::new(),
            validators: BTreeMap::new(),
            balances: BTreeMap::new(),
            blocks: Vec::new(),
        }
    }

    /// Create a named account with a provider-derived address and a zeroed
    /// balance entry. Username uniqueness is enforced here, and only here.
    pub fn create_account(
        &mut self,
        username: &str,
        provider: &mut dyn AddressProvider,
        now_ms: u64,
    ) -> Result<Account, LedgerError> {
        if self.accounts.contains_key(username) {
            return Err(LedgerError::DuplicateAccount {
                username: username.to_string(),
            });
        }
        let derived = provider.derive_account()?;
        let account = Account {
            username: username.to_string(),
            address: derived.address,
            secret_phrase: derived.secret_phrase,
            created_at: now_ms,
        };
        self.balances.insert(account.address.clone(), 0);
        self.accounts
            .insert(account.username.clone(), account.clone());
        Ok(account)
    }

    /// Mint new tokens to an address, growing the total supply. The target
    /// balance entry is created if absent.
    pub fn mint<R: Rng>(
        &mut self,
        to: &str,
        amount: Amount,
        reason: Option<String>,
        now_ms: u64,
        rng: &mut R,
    ) -> Result<Transaction, LedgerError> {
        if amount == 0 {
            return Err(LedgerError::InvalidAmount);
        }
        let credited = self
            .balance(to)
            .checked_add(amount)
            .ok_or(LedgerError::AmountOverflow)?;
        let supply = self
            .total_supply
            .checked_add(amount)
            .ok_or(LedgerError::AmountOverflow)?;
        self.balances.insert(to.to_string(), credited);
        self.total_supply = supply;
        Ok(Transaction {
            kind: TxKind::Mint,
            from: SYSTEM_ADDRESS.to_string(),
            to: to.to_string(),
            amount,
            reason,
            timestamp: now_ms,
            tx_hash: random_tx_hash(rng),
        })
    }

    /// Move tokens from a named account to an address. Debit and credit
    /// happen together or not at all; the supply is untouched.
    pub fn transfer<R: Rng>(
        &mut self,
        from_username: &str,
        to: &str,
        amount: Amount,
        now_ms: u64,
        rng: &mut R,
    ) -> Result<Transaction, LedgerError> {
        let from_address = self
            .accounts
            .get(from_username)
            .map(|account| account.address.clone())
            .ok_or_else(|| LedgerError::UnknownSender {
                username: from_username.to_string(),
            })?;
        if amount == 0 {
            return Err(LedgerError::InvalidAmount);
        }
        let balance = self.balances.get(&from_address).copied().unwrap_or(0);
        if balance < amount {
            return Err(LedgerError::InsufficientBalance {
                address: from_address,
                balance,
                amount,
            });
        }
        // The credit is checked against the post-debit balance so a
        // self-transfer neither creates nor destroys tokens.
        let debited = balance - amount;
        let receiver = if from_address == to {
            debited
        } else {
            self.balance(to)
        };
        let credited = receiver
            .checked_add(amount)
            .ok_or(LedgerError::AmountOverflow)?;
        self.balances.insert(from_address.clone(), debited);
        self.balances.insert(to.to_string(), credited);
        Ok(Transaction {
            kind: TxKind::Transfer,
            from: from_address,
            to: to.to_string(),
            amount,
            reason: None,
            timestamp: now_ms,
            tx_hash: random_tx_hash(rng),
        })
    }

    /// Register an existing account as an active validator. Power is
    /// snapshotted from the stake and never re-derived.
    pub fn register_validator(
        &mut self,
        username: &str,
        stake: Amount,
        now_ms: u64,
    ) -> Result<Validator, LedgerError> {
        let address = self
            .accounts
            .get(username)
            .map(|account| account.address.clone())
            .ok_or_else(|| LedgerError::UnknownAccount {
                username: username.to_string(),
            })?;
        if self.validators.contains_key(&address) {
            return Err(LedgerError::DuplicateValidator { address });
        }
        let validator = Validator {
            address: address.clone(),
            username: username.to_string(),
            stake,
            power: stake,
            status: ValidatorStatus::Active,
            blocks_proposed: 0,
            rewards_earned: 0,
            joined_at: now_ms,
        };
        self.validators.insert(address, validator.clone());
        Ok(validator)
    }

    pub fn account(&self, username: &str) -> Option<AccountView> {
        self.accounts.get(username).map(|account| AccountView {
            balance: self.balance(&account.address),
            account: account.clone(),
        })
    }

    pub fn balance(&self, address: &str) -> Amount {
        self.balances.get(address).copied().unwrap_or(0)
    }

    pub fn block(&self, height: u64) -> Option<&Block> {
        self.blocks.iter().find(|block| block.height == height)
    }

    /// Up to `limit` most recent blocks, newest first.
    pub fn recent_blocks(&self, limit: usize) -> Vec<Block> {
        self.blocks.iter().rev().take(limit).cloned().collect()
    }

    /// Addresses of validators currently eligible for selection and
    /// rewards, in stable (address) order.
    pub fn active_validator_addresses(&self) -> Vec<Address> {
        self.validators
            .values()
            .filter(|v| v.status == ValidatorStatus::Active)
            .map(|v| v.address.clone())
            .collect()
    }

    pub fn status(&self) -> ChainStatus {
        ChainStatus {
            chain_id: self.chain_id.clone(),
            latest_height: self.current_height,
            total_blocks: self.blocks.len(),
            total_supply: self.total_supply,
            active_validator_count: self.active_validator_addresses().len(),
            total_accounts: self.accounts.len(),
        }
    }
}

impl Default for LedgerState {
    fn default() -> Self {
        Self::new()
    }
}

/// Opaque unique transaction identifier: 32 random bytes, hex encoded.
pub fn random_tx_hash<R: Rng>(rng: &mut R) -> String {
    let mut bytes = [0u8; 32];
    rng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    use rand::{rngs::StdRng, SeedableRng};

    use crate::wallet::Ed25519AddressProvider;

    fn test_ledger() -> (LedgerState, Ed25519AddressProvider<StdRng>, StdRng) {
        (
            LedgerState::new(),
            Ed25519AddressProvider::with_rng(StdRng::seed_from_u64(11)),
            StdRng::seed_from_u64(22),
        )
    }

    #[test]
    fn create_account_starts_at_zero_balance() {
        let (mut ledger, mut provider, _) = test_ledger();
        let account = ledger.create_account("alice", &mut provider, 1).unwrap();
        assert_eq!(ledger.balance(&account.address), 0);
        let view = ledger.account("alice").unwrap();
        assert_eq!(view.account, account);
        assert_eq!(view.balance, 0);
    }

    #[test]
    fn duplicate_usernames_are_rejected() {
        let (mut ledger, mut provider, _) = test_ledger();
        ledger.create_account("alice", &mut provider, 1).unwrap();
        assert!(matches!(
            ledger.create_account("alice", &mut provider, 2),
            Err(LedgerError::DuplicateAccount { .. })
        ));
        assert_eq!(ledger.accounts.len(), 1);
    }

    #[test]
    fn mint_grows_balance_and_supply_by_exactly_the_amount() {
        let (mut ledger, mut provider, mut rng) = test_ledger();
        let account = ledger.create_account("alice", &mut provider, 1).unwrap();
        let supply_before = ledger.total_supply;
        let tx = ledger
            .mint(&account.address, 1_000, Some("grant".into()), 2, &mut rng)
            .unwrap();
        assert_eq!(tx.kind, TxKind::Mint);
        assert_eq!(tx.from, SYSTEM_ADDRESS);
        assert_eq!(ledger.balance(&account.address), 1_000);
        assert_eq!(ledger.total_supply, supply_before + 1_000);
    }

    #[test]
    fn zero_amounts_are_invalid() {
        let (mut ledger, mut provider, mut rng) = test_ledger();
        let account = ledger.create_account("alice", &mut provider, 1).unwrap();
        assert!(matches!(
            ledger.mint(&account.address, 0, None, 2, &mut rng),
            Err(LedgerError::InvalidAmount)
        ));
        assert!(matches!(
            ledger.transfer("alice", "cosmos1ffff", 0, 2, &mut rng),
            Err(LedgerError::InvalidAmount)
        ));
    }

    #[test]
    fn mints_that_would_overflow_are_rejected_whole() {
        let (mut ledger, mut provider, mut rng) = test_ledger();
        let alice = ledger.create_account("alice", &mut provider, 1).unwrap();
        let supply_before = ledger.total_supply;
        assert!(matches!(
            ledger.mint(&alice.address, u64::MAX, None, 2, &mut rng),
            Err(LedgerError::AmountOverflow)
        ));
        assert_eq!(ledger.balance(&alice.address), 0);
        assert_eq!(ledger.total_supply, supply_before);
    }

    #[test]
    fn transfers_that_would_overflow_the_receiver_do_not_debit() {
        let (mut ledger, mut provider, mut rng) = test_ledger();
        let alice = ledger.create_account("alice", &mut provider, 1).unwrap();
        ledger.mint(&alice.address, 100, None, 2, &mut rng).unwrap();
        ledger.balances.insert("cosmos1full".to_string(), u64::MAX);
        assert!(matches!(
            ledger.transfer("alice", "cosmos1full", 10, 3, &mut rng),
            Err(LedgerError::AmountOverflow)
        ));
        assert_eq!(ledger.balance(&alice.address), 100);
        assert_eq!(ledger.balance("cosmos1full"), u64::MAX);
    }

    #[test]
    fn a_self_transfer_leaves_the_balance_unchanged() {
        let (mut ledger, mut provider, mut rng) = test_ledger();
        let alice = ledger.create_account("alice", &mut provider, 1).unwrap();
        ledger.mint(&alice.address, 500, None, 2, &mut rng).unwrap();
        ledger
            .transfer("alice", &alice.address, 200, 3, &mut rng)
            .unwrap();
        assert_eq!(ledger.balance(&alice.address), 500);
    }

    #[test]
    fn transfer_conserves_the_balance_sum() {
        let (mut ledger, mut provider, mut rng) = test_ledger();
        let alice = ledger.create_account("alice", &mut provider, 1).unwrap();
        let bob = ledger.create_account("bob", &mut provider, 1).unwrap();
        ledger
            .mint(&alice.address, 1_100, None, 2, &mut rng)
            .unwrap();
        let supply_before = ledger.total_supply;
        let sum_before: Amount = ledger.balances.values().sum();

        let tx = ledger
            .transfer("alice", &bob.address, 200, 3, &mut rng)
            .unwrap();
        assert_eq!(tx.kind, TxKind::Transfer);
        assert_eq!(tx.from, alice.address);
        assert_eq!(tx.tx_hash.len(), 64);
        assert_eq!(ledger.balance(&alice.address), 900);
        assert_eq!(ledger.balance(&bob.address), 200);
        assert_eq!(ledger.total_supply, supply_before);
        assert_eq!(ledger.balances.values().sum::<Amount>(), sum_before);
    }

    #[test]
    fn transfer_to_a_fresh_address_creates_the_entry() {
        let (mut ledger, mut provider, mut rng) = test_ledger();
        ledger.create_account("alice", &mut provider, 1).unwrap();
        let alice = ledger.account("alice").unwrap().account;
        ledger.mint(&alice.address, 500, None, 2, &mut rng).unwrap();
        ledger
            .transfer("alice", "cosmos1aaaa", 300, 3, &mut rng)
            .unwrap();
        assert_eq!(ledger.balance("cosmos1aaaa"), 300);
    }

    #[test]
    fn insufficient_balance_never_partially_debits() {
        let (mut ledger, mut provider, mut rng) = test_ledger();
        let alice = ledger.create_account("alice", &mut provider, 1).unwrap();
        ledger.mint(&alice.address, 100, None, 2, &mut rng).unwrap();
        let err = ledger
            .transfer("alice", "cosmos1bbbb", 101, 3, &mut rng)
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientBalance {
                balance: 100,
                amount: 101,
                ..
            }
        ));
        assert_eq!(ledger.balance(&alice.address), 100);
        assert_eq!(ledger.balance("cosmos1bbbb"), 0);
    }

    #[test]
    fn unknown_sender_is_rejected() {
        let (mut ledger, _, mut rng) = test_ledger();
        assert!(matches!(
            ledger.transfer("ghost", "cosmos1cccc", 10, 1, &mut rng),
            Err(LedgerError::UnknownSender { .. })
        ));
    }

    #[test]
    fn validator_registration_requires_an_account_and_is_unique() {
        let (mut ledger, mut provider, _) = test_ledger();
        assert!(matches!(
            ledger.register_validator("ghost", 500, 1),
            Err(LedgerError::UnknownAccount { .. })
        ));

        ledger.create_account("alice", &mut provider, 1).unwrap();
        let validator = ledger.register_validator("alice", 500, 2).unwrap();
        assert_eq!(validator.stake, 500);
        assert_eq!(validator.power, 500);
        assert_eq!(validator.status, ValidatorStatus::Active);
        assert_eq!(validator.blocks_proposed, 0);
        assert_eq!(validator.rewards_earned, 0);

        assert!(matches!(
            ledger.register_validator("alice", 900, 3),
            Err(LedgerError::DuplicateValidator { .. })
        ));
    }

    #[test]
    fn queries_return_none_for_missing_entities() {
        let (ledger, _, _) = test_ledger();
        assert!(ledger.account("nobody").is_none());
        assert!(ledger.block(5).is_none());
        assert_eq!(ledger.balance("cosmos1dddd"), 0);
    }

    #[test]
    fn status_counts_only_active_validators() {
        let (mut ledger, mut provider, _) = test_ledger();
        ledger.create_account("alice", &mut provider, 1).unwrap();
        ledger.create_account("bob", &mut provider, 1).unwrap();
        ledger.register_validator("alice", 500, 2).unwrap();
        let bob = ledger.register_validator("bob", 700, 2).unwrap();
        ledger.validators.get_mut(&bob.address).unwrap().status = ValidatorStatus::Inactive;

        let status = ledger.status();
        assert_eq!(status.chain_id, CHAIN_ID);
        assert_eq!(status.active_validator_count, 1);
        assert_eq!(status.total_accounts, 2);
    }
}
