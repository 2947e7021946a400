//! Owns a node's long-lived key material: the identity key pair, the signing key pair,
//! the signed pre-key and its signature, and a pool of one-time pre-keys (§4.2).

use crate::config::KeyStoreConfig;
use crate::constants::{DEFAULT_ONE_TIME_PREKEY_POOL_FLOOR, KEY_ID_HEX_LENGTH};
use crate::errors::KeyStoreError;
use crate::primitives::{self, KeyPair, Signature, SigningKeyPair, SigningPublicKey};
use crate::utils::PreKeyBundle;
use std::collections::HashMap;
use std::sync::Mutex;

struct Identity {
    identity_keys: KeyPair,
    signing_keys: SigningKeyPair,
    signed_pre_key: KeyPair,
    signed_pre_key_signature: Signature,
}

/// A one-time pre-key pool, keyed by the hex fingerprint of each key's public half.
/// `available` entries have never been handed to a peer; `published` entries were
/// included in a bundle and are awaiting consumption by the responder completing a
/// handshake. Moving an entry from `available` to `published` is what makes
/// `publish_bundle` an atomic, at-most-once consumption of the pool.
struct OneTimePreKeyPool {
    available: HashMap<String, KeyPair>,
    published: HashMap<String, KeyPair>,
}

impl OneTimePreKeyPool {
    fn new() -> Self {
        OneTimePreKeyPool {
            available: HashMap::new(),
            published: HashMap::new(),
        }
    }

    fn replenish_to(&mut self, floor: usize) -> usize {
        let mut generated = 0;
        while self.available.len() < floor {
            let pair = KeyPair::generate();
            self.available.insert(fingerprint(&pair.public.hash()), pair);
            generated += 1;
        }
        generated
    }

    /// Moves one entry from `available` to `published`, returning its public half.
    fn take_for_publication(&mut self) -> Option<PublicKeyOut> {
        let fp = self.available.keys().next().cloned()?;
        let pair = self.available.remove(&fp)?;
        let public = pair.public;
        self.published.insert(fp, pair);
        Some(public)
    }
}

type PublicKeyOut = crate::primitives::PublicKey;

fn fingerprint(hash: &[u8]) -> String {
    let hex = hex_encode(hash);
    hex[..KEY_ID_HEX_LENGTH].to_string()
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(out, "{:02x}", b).expect("writing into a String cannot fail");
    }
    out
}

/// Manages one node's long-lived key material and one-time pre-key pool.
///
/// Read-mostly fields (identity, signing, signed pre-key) are set once at
/// `initialize` and never mutated afterward, so they need no synchronization beyond
/// what `initialize`'s one-time setup requires. The one-time pre-key pool is mutated by
/// every handshake, so it alone is guarded by a mutex (§5).
pub struct KeyStore {
    identity: Option<Identity>,
    pool: Mutex<OneTimePreKeyPool>,
    one_time_pre_key_pool_floor: usize,
}

impl KeyStore {
    /// Creates an uninitialized key store. Call [`KeyStore::initialize`] before use.
    pub fn new() -> Self {
        KeyStore::with_pool_floor(DEFAULT_ONE_TIME_PREKEY_POOL_FLOOR)
    }

    /// Creates an uninitialized key store with a non-default one-time pre-key pool floor.
    pub fn with_pool_floor(one_time_pre_key_pool_floor: usize) -> Self {
        KeyStore {
            identity: None,
            pool: Mutex::new(OneTimePreKeyPool::new()),
            one_time_pre_key_pool_floor,
        }
    }

    /// Creates an uninitialized key store from a [`KeyStoreConfig`], the constructor a
    /// collaborator that loads configuration from outside the core should use.
    pub fn with_config(config: KeyStoreConfig) -> Self {
        KeyStore::with_pool_floor(config.one_time_pre_key_pool_floor)
    }

    /// Idempotent: generates identity and signing key pairs if absent, (re)generates the
    /// signed pre-key and signs it, and replenishes the one-time pre-key pool to the
    /// configured floor.
    pub fn initialize(&mut self) {
        if self.identity.is_none() {
            let identity_keys = KeyPair::generate();
            let signing_keys = SigningKeyPair::generate();
            let signed_pre_key = KeyPair::generate();
            let signed_pre_key_signature =
                primitives::sign(&signing_keys.secret, &signed_pre_key.public.0);
            log::debug!(
                "key store initialized, key_id={}",
                &fingerprint(&identity_keys.public.hash())
            );
            self.identity = Some(Identity {
                identity_keys,
                signing_keys,
                signed_pre_key,
                signed_pre_key_signature,
            });
        }
        let generated = self
            .pool
            .lock()
            .expect("one-time pre-key pool mutex poisoned")
            .replenish_to(self.one_time_pre_key_pool_floor);
        if generated > 0 {
            log::debug!("replenished one-time pre-key pool with {generated} entries");
        }
    }

    fn identity(&self) -> Result<&Identity, KeyStoreError> {
        self.identity.as_ref().ok_or(KeyStoreError::NotInitialized)
    }

    /// The 16-hex-char fingerprint of the identity public key.
    pub fn key_id(&self) -> Result<String, KeyStoreError> {
        Ok(fingerprint(&self.identity()?.identity_keys.public.hash()))
    }

    pub fn identity_public(&self) -> Result<[u8; 32], KeyStoreError> {
        Ok(self.identity()?.identity_keys.public.0)
    }

    pub fn identity_key_pair(&self) -> Result<KeyPair, KeyStoreError> {
        Ok(self.identity()?.identity_keys.clone())
    }

    pub fn signing_public(&self) -> Result<SigningPublicKey, KeyStoreError> {
        Ok(self.identity()?.signing_keys.public)
    }

    pub fn signing_key_pair(&self) -> Result<SigningKeyPair, KeyStoreError> {
        Ok(self.identity()?.signing_keys.clone())
    }

    pub fn signed_pre_key(&self) -> Result<KeyPair, KeyStoreError> {
        Ok(self.identity()?.signed_pre_key.clone())
    }

    pub fn signed_pre_key_signature(&self) -> Result<Signature, KeyStoreError> {
        Ok(self.identity()?.signed_pre_key_signature.clone())
    }

    /// Builds a [`PreKeyBundle`] for publication. If `include_one_time` is true, atomically
    /// consumes one entry from the one-time pre-key pool and includes its public half.
    ///
    /// # Errors
    ///
    /// `PoolExhausted` if `include_one_time` is true and no one-time pre-key is
    /// available — the caller explicitly asked for one and must not be handed a
    /// bundle silently missing it.
    pub fn publish_bundle(&self, include_one_time: bool) -> Result<PreKeyBundle, KeyStoreError> {
        let identity = self.identity()?;
        let one_time_pre_key = if include_one_time {
            let mut pool = self.pool.lock().expect("one-time pre-key pool mutex poisoned");
            Some(pool.take_for_publication().ok_or(KeyStoreError::PoolExhausted)?)
        } else {
            None
        };

        Ok(PreKeyBundle {
            identity_key: identity.identity_keys.public,
            signed_pre_key: identity.signed_pre_key.public,
            signed_pre_key_signature: identity.signed_pre_key_signature.clone(),
            one_time_pre_key,
        })
    }

    /// Responder-side: finds and removes the one-time pre-key secret whose public
    /// fingerprint matches the one a peer consumed from a published bundle. Returns
    /// `None` if the fingerprint is unknown or was already consumed — a one-time
    /// pre-key is handed out at most once.
    pub fn consume_one_time_pre_key(
        &self,
        public_fingerprint: &str,
    ) -> Result<Option<KeyPair>, KeyStoreError> {
        self.identity()?;
        let mut pool = self.pool.lock().expect("one-time pre-key pool mutex poisoned");
        let consumed = pool.published.remove(public_fingerprint);
        if consumed.is_some() {
            log::debug!("consumed one-time pre-key {public_fingerprint}");
        }
        Ok(consumed)
    }
}

impl Default for KeyStore {
    fn default() -> Self {
        KeyStore::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operations_before_initialize_fail() {
        let store = KeyStore::new();
        assert!(matches!(
            store.identity_public(),
            Err(KeyStoreError::NotInitialized)
        ));
    }

    #[test]
    fn initialize_is_idempotent_for_identity() {
        let mut store = KeyStore::new();
        store.initialize();
        let key_id_1 = store.key_id().unwrap();
        store.initialize();
        let key_id_2 = store.key_id().unwrap();
        assert_eq!(key_id_1, key_id_2);
    }

    #[test]
    fn pool_replenishes_to_floor() {
        let mut store = KeyStore::with_pool_floor(3);
        store.initialize();
        assert_eq!(store.pool.lock().unwrap().available.len(), 3);
    }

    #[test]
    fn one_time_pre_key_is_consumed_at_most_once() {
        let mut store = KeyStore::with_pool_floor(2);
        store.initialize();
        let bundle = store.publish_bundle(true).unwrap();
        let otpk = bundle.one_time_pre_key.unwrap();
        let fp = {
            let hex = hex_encode(&otpk.hash());
            hex[..KEY_ID_HEX_LENGTH].to_string()
        };
        let first = store.consume_one_time_pre_key(&fp).unwrap();
        assert!(first.is_some());
        let second = store.consume_one_time_pre_key(&fp).unwrap();
        assert!(second.is_none());
    }

    #[test]
    fn publish_bundle_reports_pool_exhaustion() {
        let mut store = KeyStore::with_pool_floor(1);
        store.initialize();
        store.publish_bundle(true).unwrap();
        assert!(matches!(
            store.publish_bundle(true),
            Err(KeyStoreError::PoolExhausted)
        ));
        // A bundle that never asked for a one-time pre-key still succeeds.
        assert!(store.publish_bundle(false).is_ok());
    }

    #[test]
    fn with_config_applies_pool_floor() {
        let mut store = KeyStore::with_config(KeyStoreConfig {
            one_time_pre_key_pool_floor: 5,
        });
        store.initialize();
        assert_eq!(store.pool.lock().unwrap().available.len(), 5);
    }

    #[test]
    fn signed_pre_key_signature_verifies() {
        let mut store = KeyStore::with_pool_floor(1);
        store.initialize();
        let spk = store.signed_pre_key().unwrap();
        let sig = store.signed_pre_key_signature().unwrap();
        let signing_public = store.signing_public().unwrap();
        assert!(primitives::verify(&signing_public, &spk.public.0, &sig));
    }
}
