//! This module defines the error types raised by each component of the cryptographic core.
//! `KeyStoreError` covers the key store (§4.2), `X3dhError` the X3DH handshake (§4.3),
//! `RatchetError` the Double Ratchet (§4.4), and `SessionError` session snapshot
//! (de)serialization (§6). Conversions between them let a caller that only cares about
//! "did the send/receive succeed" bubble any of them up uniformly.

use aes::cipher::crypto_common;
use ed25519_dalek::SignatureError;
use std::fmt::{Display, Formatter};

/// Errors raised by [`crate::keystore::KeyStore`].
#[derive(Debug)]
pub enum KeyStoreError {
    /// An operation was attempted before `initialize` was called.
    NotInitialized,

    /// No one-time pre-key was available to satisfy the request.
    PoolExhausted,
}

impl Display for KeyStoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyStoreError::NotInitialized => write!(f, "key store not initialized"),
            KeyStoreError::PoolExhausted => write!(f, "one-time pre-key pool is exhausted"),
        }
    }
}

impl std::error::Error for KeyStoreError {}

/// Errors raised by [`crate::x3dh`].
#[derive(Debug)]
pub enum X3dhError {
    /// The signed pre-key signature in a [`crate::keystore::PreKeyBundle`] did not verify.
    BundleVerificationFailed,

    /// A DH input was the identity point or otherwise not a valid Curve25519 public key.
    InvalidPublicKey,

    /// Error occurring during Ed25519 signature verification.
    InvalidSignature(SignatureError),

    /// Error indicating an invalid key material length during HKDF key derivation.
    HkdfInvalidLengthError(hkdf::InvalidLength),
}

impl Display for X3dhError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            X3dhError::BundleVerificationFailed => {
                write!(f, "pre-key bundle signature verification failed")
            }
            X3dhError::InvalidPublicKey => write!(f, "invalid public key"),
            X3dhError::InvalidSignature(e) => write!(f, "invalid signature: {}", e),
            X3dhError::HkdfInvalidLengthError(e) => write!(f, "invalid HKDF length: {}", e),
        }
    }
}

impl std::error::Error for X3dhError {}

impl From<hkdf::InvalidLength> for X3dhError {
    fn from(value: hkdf::InvalidLength) -> Self {
        X3dhError::HkdfInvalidLengthError(value)
    }
}

impl From<SignatureError> for X3dhError {
    fn from(value: SignatureError) -> Self {
        X3dhError::InvalidSignature(value)
    }
}

/// Errors raised by the AEAD message layer (§4.5).
#[derive(Debug)]
pub enum AeadError {
    /// Tag verification failed; the packet must be dropped without mutating session state.
    AuthFailure,

    /// The AES-256-GCM key or nonce did not have the expected length.
    InvalidLength(crypto_common::InvalidLength),
}

impl Display for AeadError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AeadError::AuthFailure => write!(f, "AEAD authentication failure"),
            AeadError::InvalidLength(e) => write!(f, "invalid length: {}", e),
        }
    }
}

impl std::error::Error for AeadError {}

impl From<aes_gcm::Error> for AeadError {
    fn from(_: aes_gcm::Error) -> Self {
        AeadError::AuthFailure
    }
}

impl From<crypto_common::InvalidLength> for AeadError {
    fn from(value: crypto_common::InvalidLength) -> Self {
        AeadError::InvalidLength(value)
    }
}

/// Errors raised by [`crate::ratchet`].
#[derive(Debug)]
pub enum RatchetError {
    /// Error indicating an invalid key material length during HKDF key derivation.
    HkdfInvalidLengthError(hkdf::InvalidLength),

    /// The wire header did not decode to the expected 40-byte layout.
    InvalidHeaderLength(usize),

    /// A DH input was the identity point or otherwise not a valid Curve25519 public key.
    InvalidPublicKey,

    /// Decryption of the message body failed; session state is left untouched.
    AuthFailure,

    /// The gap between the last received message and this header's message number
    /// exceeds the session's configured `max_skip`. Session state is left untouched.
    TooManySkipped,

    /// `ratchet_send` or `ratchet_receive` was called before the relevant chain key
    /// exists — e.g. the responder side of a session has not yet received a first
    /// message and so has no sending chain.
    NotReady,
}

impl Display for RatchetError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RatchetError::HkdfInvalidLengthError(e) => write!(f, "invalid HKDF length: {}", e),
            RatchetError::InvalidHeaderLength(n) => write!(f, "invalid header length: {}", n),
            RatchetError::InvalidPublicKey => write!(f, "invalid public key"),
            RatchetError::AuthFailure => write!(f, "AEAD authentication failure"),
            RatchetError::TooManySkipped => write!(f, "too many skipped messages"),
            RatchetError::NotReady => write!(f, "session has no chain key for this operation yet"),
        }
    }
}

impl std::error::Error for RatchetError {}

impl From<hkdf::InvalidLength> for RatchetError {
    fn from(value: hkdf::InvalidLength) -> Self {
        RatchetError::HkdfInvalidLengthError(value)
    }
}

impl From<AeadError> for RatchetError {
    fn from(value: AeadError) -> Self {
        match value {
            AeadError::AuthFailure => RatchetError::AuthFailure,
            AeadError::InvalidLength(_) => RatchetError::AuthFailure,
        }
    }
}

/// Errors raised while (de)serializing a session snapshot (§6).
#[derive(Debug)]
pub enum SessionError {
    /// The blob's version byte, length, or field layout did not match what this
    /// crate version expects. The blob must be refused, not repaired.
    Malformed(String),
}

impl Display for SessionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::Malformed(msg) => write!(f, "malformed session snapshot: {}", msg),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<Box<bincode::ErrorKind>> for SessionError {
    fn from(value: Box<bincode::ErrorKind>) -> Self {
        SessionError::Malformed(value.to_string())
    }
}
