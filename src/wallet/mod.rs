//! Address derivation capability.
//!
//! Accounts are identified by an address derived from a freshly generated
//! secret phrase. The phrase is the hex encoding of a 32-byte ed25519 seed;
//! the address is a prefixed, truncated sha256 of the verifying key. The
//! ledger consumes this purely as a capability and never inspects the
//! phrase beyond storing it verbatim.

use ed25519_dalek::SigningKey;
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};

/// Prefix carried by every derived address, cosmos-style.
pub const ADDRESS_PREFIX: &str = "cosmos1";

const SEED_LEN: usize = 32;
const ADDRESS_BODY_LEN: usize = 20;

#[derive(Debug, thiserror::Error)]
pub enum DerivationError {
    #[error("secret phrase is not valid hex")]
    MalformedPhrase,
    #[error("secret phrase must encode {SEED_LEN} bytes")]
    BadSeedLength,
}

/// A freshly derived account identity: the phrase is sensitive and is
/// returned to the caller exactly once, at creation time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DerivedAccount {
    pub secret_phrase: String,
    pub address: String,
}

pub trait AddressProvider {
    fn derive_account(&mut self) -> Result<DerivedAccount, DerivationError>;
}

/// Default provider: random seed from the supplied RNG, ed25519 keypair,
/// sha256-truncated address.
pub struct Ed25519AddressProvider<R = OsRng> {
    rng: R,
}

impl Ed25519AddressProvider<OsRng> {
    pub fn new() -> Self {
        Self { rng: OsRng }
    }
}

impl Default for Ed25519AddressProvider<OsRng> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: RngCore> Ed25519AddressProvider<R> {
    /// Seedable variant so tests can pin the derived addresses.
    pub fn with_rng(rng: R) -> Self {
        Self { rng }
    }
}

impl<R: RngCore> AddressProvider for Ed25519AddressProvider<R> {
    fn derive_account(&mut self) -> Result<DerivedAccount, DerivationError> {
        let mut seed = [0u8; SEED_LEN];
        self.rng.fill_bytes(&mut seed);
        let secret_phrase = hex::encode(seed);
        let address = address_from_phrase(&secret_phrase)?;
        Ok(DerivedAccount {
            secret_phrase,
            address,
        })
    }
}

/// Re-derive the address for a stored phrase. Deterministic: the same
/// phrase always maps to the same address.
pub fn address_from_phrase(phrase: &str) -> Result<String, DerivationError> {
    let seed_bytes = hex::decode(phrase.trim()).map_err(|_| DerivationError::MalformedPhrase)?;
    let seed: [u8; SEED_LEN] = seed_bytes
        .try_into()
        .map_err(|_| DerivationError::BadSeedLength)?;
    let signing_key = SigningKey::from_bytes(&seed);
    let digest = Sha256::digest(signing_key.verifying_key().as_bytes());
    Ok(format!(
        "{ADDRESS_PREFIX}{}",
        hex::encode(&digest[..ADDRESS_BODY_LEN])
    ))
}
