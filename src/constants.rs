// byte size of a Curve25519 private key
pub(crate) const CURVE25519_SECRET_LENGTH: usize = 32;
// byte size of a Curve25519 public key
pub(crate) const CURVE25519_PUBLIC_LENGTH: usize = CURVE25519_SECRET_LENGTH;

pub(crate) const SIGNATURE_LENGTH: usize = 64;
// byte size of a sha256 hash
pub(crate) const SHA256_HASH_LENGTH: usize = 32;
// byte size of an aes256 key
pub(crate) const AES256_SECRET_LENGTH: usize = 32;
// byte size of aes256-gcm nonce
pub(crate) const AES256_NONCE_LENGTH: usize = 12;
// byte size of an aes256-gcm authentication tag
pub(crate) const AES256_TAG_LENGTH: usize = 16;

// number of hex characters in a KeyStore::key_id fingerprint
pub(crate) const KEY_ID_HEX_LENGTH: usize = 16;

// wire size of the Double Ratchet header: public key (32) + pn (u32) + ns (u32)
pub(crate) const RATCHET_HEADER_LENGTH: usize =
    CURVE25519_PUBLIC_LENGTH + size_of::<u32>() + size_of::<u32>();

/// Default maximum number of skipped-but-not-yet-received message keys a
/// single session will buffer before refusing to ratchet further. Both
/// peers MUST agree on this value; it is a policy choice, not something
/// security requires to be exactly 1000.
pub const DEFAULT_MAX_SKIP: usize = 1000;

/// Default floor the one-time pre-key pool is replenished to on every
/// `KeyStore::initialize`.
pub const DEFAULT_ONE_TIME_PREKEY_POOL_FLOOR: usize = 100;

/// Current format version stamped on every serialized session snapshot.
pub(crate) const SESSION_SNAPSHOT_VERSION: u8 = 1;
