//! In-memory configuration structs for the key store and ratchet (§4.6). The core
//! reads no files of its own; a collaborator (the donor's `config` crate pattern,
//! minus the file I/O) loads these values from wherever configuration lives and
//! constructs these structs directly.

use crate::constants::{DEFAULT_MAX_SKIP, DEFAULT_ONE_TIME_PREKEY_POOL_FLOOR};
use serde::{Deserialize, Serialize};

/// Policy knobs for a [`crate::ratchet::DoubleRatchetSession`]. Both peers MUST agree
/// on `max_skip`; it bounds the skipped-key cache, not a security parameter.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RatchetConfig {
    pub max_skip: usize,
}

impl Default for RatchetConfig {
    fn default() -> Self {
        RatchetConfig {
            max_skip: DEFAULT_MAX_SKIP,
        }
    }
}

/// Policy knobs for a [`crate::keystore::KeyStore`].
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct KeyStoreConfig {
    pub one_time_pre_key_pool_floor: usize,
}

impl Default for KeyStoreConfig {
    fn default() -> Self {
        KeyStoreConfig {
            one_time_pre_key_pool_floor: DEFAULT_ONE_TIME_PREKEY_POOL_FLOOR,
        }
    }
}
