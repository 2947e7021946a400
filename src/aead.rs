//! Thin AEAD message layer (§4.5): binds ciphertext to a ratchet [`Header`] as
//! associated data. Kept separate from [`crate::ratchet`] since the spec treats it as
//! its own component sitting below the ratchet state machine.

use crate::constants::AES256_NONCE_LENGTH;
use crate::errors::AeadError;
use crate::primitives::{self, SharedSecret};
use crate::utils::Header;

/// Encrypts `plaintext` under `message_key`, binding `header`'s canonical 40-byte
/// encoding as associated data. Returns `ciphertext || tag`. The nonce is sampled
/// fresh from the OS CSPRNG; callers must carry it alongside the ciphertext since
/// [`decrypt`] requires it back.
pub fn encrypt(
    message_key: &SharedSecret,
    header: &Header,
    plaintext: &[u8],
) -> Result<(Vec<u8>, [u8; AES256_NONCE_LENGTH]), AeadError> {
    let nonce = primitives::random_nonce();
    let ciphertext = primitives::aead_seal(message_key, &nonce, &header.to_bytes(), plaintext)?;
    Ok((ciphertext, nonce))
}

/// Decrypts `ciphertext` (which includes the trailing tag) under `message_key`,
/// verifying it against `header`'s canonical encoding and `nonce`.
///
/// # Errors
///
/// `AuthFailure` if the tag does not verify; the caller must drop the packet without
/// mutating any ratchet state.
pub fn decrypt(
    message_key: &SharedSecret,
    header: &Header,
    nonce: &[u8; AES256_NONCE_LENGTH],
    ciphertext: &[u8],
) -> Result<Vec<u8>, AeadError> {
    primitives::aead_open(message_key, nonce, &header.to_bytes(), ciphertext)
}
