//! Single-node proof-of-stake ledger.
//!
//! The crate keeps a chain of blocks, named accounts with token balances,
//! and a registry of staked validators, and periodically mines blocks that
//! mint and split a fixed reward among the active validators. State is
//! write-through persisted to a single JSON record after every mutation.
//!
//! * [`ledger`] — the in-memory state machine and its typed errors.
//! * [`wallet`] — the address-derivation capability (ed25519 + sha256).
//! * [`producer`] — block creation, validator selection, reward payout.
//! * [`store`] — the durable record: save, defensive load, clear.
//! * [`node`] — the service wrapper enforcing mutate-then-persist.
//! * [`miner`] — the periodic auto-mining driver.
//!
//! The modules are intentionally small and focused so that a boundary
//! layer (CLI today, HTTP tomorrow) can be bolted on without pulling in
//! bespoke plumbing of its own.

pub mod ledger;
pub mod miner;
pub mod node;
pub mod producer;
pub mod store;
pub mod wallet;
