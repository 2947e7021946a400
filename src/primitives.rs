//! Constant-time, memory-safe wrappers over the vetted crypto libraries the rest of the
//! crate is built on: Curve25519 DH, Ed25519 signatures, HKDF-SHA256, AES-256-GCM AEAD,
//! the OS CSPRNG, and constant-time comparison. Every other module (`keystore`, `x3dh`,
//! `ratchet`, `aead`) goes through here instead of touching `x25519-dalek`, `ed25519-dalek`,
//! `hkdf`, or `aes-gcm` directly, so there is exactly one place that knows how these types
//! map onto bytes.

use crate::constants::{
    AES256_NONCE_LENGTH, AES256_SECRET_LENGTH, CURVE25519_PUBLIC_LENGTH, CURVE25519_SECRET_LENGTH,
    SHA256_HASH_LENGTH, SIGNATURE_LENGTH,
};
use crate::errors::{AeadError, X3dhError};
use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use arrayref::array_ref;
use ed25519_dalek::ed25519::signature::Signer;
use ed25519_dalek::Verifier;
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use x25519_dalek::StaticSecret;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A Curve25519 public key: an identity key, a signed pre-key, a one-time pre-key, or a
/// ratchet key, depending on context.
#[derive(Clone, Copy, Debug, Eq, Serialize, Deserialize)]
pub struct PublicKey(pub [u8; CURVE25519_PUBLIC_LENGTH]);

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        ct_eq(&self.0, &other.0)
    }
}

impl std::hash::Hash for PublicKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl AsRef<[u8; CURVE25519_PUBLIC_LENGTH]> for PublicKey {
    fn as_ref(&self) -> &[u8; CURVE25519_PUBLIC_LENGTH] {
        &self.0
    }
}

/// Known small-order points on Curve25519's u-coordinate line: 0 and 1 (order 1), two
/// points of order 8, and `p-1`/`p`/`p+1` (order 2, 4, 8 respectively, reduced mod
/// 2^255-19's little-endian encoding). A DH secret times any of these collapses into a
/// tiny subgroup regardless of the scalar, so none of them is a valid DH input.
const LOW_ORDER_POINTS: [[u8; CURVE25519_PUBLIC_LENGTH]; 7] = [
    [
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00,
    ],
    [
        0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00,
    ],
    [
        0xe0, 0xeb, 0x7a, 0x7c, 0x3b, 0x41, 0xb8, 0xae, 0x16, 0x56, 0xe3, 0xfa, 0xf1, 0x9f, 0xc4,
        0x6a, 0xda, 0x09, 0x8d, 0xeb, 0x9c, 0x32, 0xb1, 0xfd, 0x86, 0x62, 0x05, 0x16, 0x5f, 0x49,
        0xb8, 0x00,
    ],
    [
        0x5f, 0x9c, 0x95, 0xbc, 0xa3, 0x50, 0x8c, 0x24, 0xb1, 0xd0, 0xb1, 0x55, 0x9c, 0x83, 0xef,
        0x5b, 0x04, 0x44, 0x5c, 0xc4, 0x58, 0x1c, 0x8e, 0x86, 0xd8, 0x22, 0x4e, 0xdd, 0xd0, 0x9f,
        0x11, 0x57,
    ],
    [
        0xec, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        0xff, 0x7f,
    ],
    [
        0xed, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        0xff, 0x7f,
    ],
    [
        0xee, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        0xff, 0x7f,
    ],
];

impl PublicKey {
    /// Returns the SHA-256 digest of this key, used for pre-key fingerprinting.
    pub fn hash(&self) -> [u8; SHA256_HASH_LENGTH] {
        let digest = Sha256::digest(self.0);
        *array_ref![digest, 0, SHA256_HASH_LENGTH]
    }

    /// Returns `true` if this key is the all-zero point or one of Curve25519's other
    /// known low-order points (order 1, 2, 4, or 8), none of which is a valid DH input.
    pub fn is_low_order(&self) -> bool {
        LOW_ORDER_POINTS.iter().any(|point| ct_eq(&self.0, point))
    }
}

/// A Curve25519 secret key used for X25519 Diffie-Hellman.
#[derive(Clone, Zeroize, ZeroizeOnDrop, Serialize, Deserialize)]
pub struct PrivateKey(pub [u8; CURVE25519_SECRET_LENGTH]);

impl PrivateKey {
    /// Generates a new, uniformly random Curve25519 secret key from the OS CSPRNG.
    pub fn generate() -> Self {
        PrivateKey(StaticSecret::random_from_rng(&mut OsRng).to_bytes())
    }

    /// Derives the public key corresponding to this secret.
    pub fn public_key(&self) -> PublicKey {
        let secret = StaticSecret::from(self.0);
        PublicKey(x25519_dalek::PublicKey::from(&secret).to_bytes())
    }
}

impl AsRef<[u8; CURVE25519_SECRET_LENGTH]> for PrivateKey {
    fn as_ref(&self) -> &[u8; CURVE25519_SECRET_LENGTH] {
        &self.0
    }
}

/// An X25519 key pair: a secret scalar and its derived public point.
#[derive(Clone)]
pub struct KeyPair {
    pub public: PublicKey,
    pub secret: PrivateKey,
}

impl KeyPair {
    /// Generates a fresh random key pair.
    pub fn generate() -> Self {
        let secret = PrivateKey::generate();
        let public = secret.public_key();
        KeyPair { public, secret }
    }

    pub fn from_secret(secret: PrivateKey) -> Self {
        let public = secret.public_key();
        KeyPair { public, secret }
    }
}

/// An Ed25519 public (verifying) key.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SigningPublicKey(pub [u8; CURVE25519_PUBLIC_LENGTH]);

/// An Ed25519 secret (signing) key.
#[derive(Clone, Zeroize, ZeroizeOnDrop, Serialize, Deserialize)]
pub struct SigningSecretKey(pub [u8; CURVE25519_SECRET_LENGTH]);

/// An Ed25519 key pair used to sign a signed pre-key.
#[derive(Clone)]
pub struct SigningKeyPair {
    pub public: SigningPublicKey,
    pub secret: SigningSecretKey,
}

impl SigningKeyPair {
    /// Generates a fresh random Ed25519 signing key pair.
    pub fn generate() -> Self {
        let signing = ed25519_dalek::SigningKey::generate(&mut OsRng);
        let verifying = ed25519_dalek::VerifyingKey::from(&signing);
        SigningKeyPair {
            public: SigningPublicKey(verifying.to_bytes()),
            secret: SigningSecretKey(signing.to_bytes()),
        }
    }
}

/// A 64-byte Ed25519 signature.
#[derive(Clone, Debug)]
pub struct Signature(pub [u8; SIGNATURE_LENGTH]);

impl AsRef<[u8; SIGNATURE_LENGTH]> for Signature {
    fn as_ref(&self) -> &[u8; SIGNATURE_LENGTH] {
        &self.0
    }
}

/// Output of a Diffie-Hellman exchange, or of any HKDF derivation producing a 32-byte
/// secret. Zeroized on drop; never compared except in constant time.
#[derive(Clone, Zeroize, ZeroizeOnDrop, Serialize, Deserialize)]
pub struct SharedSecret(pub [u8; AES256_SECRET_LENGTH]);

impl AsRef<[u8; AES256_SECRET_LENGTH]> for SharedSecret {
    fn as_ref(&self) -> &[u8; AES256_SECRET_LENGTH] {
        &self.0
    }
}

/// Performs an X25519 Diffie-Hellman exchange between `secret` and `public`.
///
/// # Errors
///
/// Returns [`X3dhError::InvalidPublicKey`] if `public` is the identity point or one of
/// Curve25519's other known low-order points, any of which would produce a degenerate,
/// small-subgroup shared secret regardless of `secret`.
pub fn dh(secret: &PrivateKey, public: &PublicKey) -> Result<SharedSecret, X3dhError> {
    if public.is_low_order() {
        return Err(X3dhError::InvalidPublicKey);
    }
    let static_secret = StaticSecret::from(secret.0);
    let their_public = x25519_dalek::PublicKey::from(public.0);
    Ok(SharedSecret(static_secret.diffie_hellman(&their_public).to_bytes()))
}

/// Signs `message` with an Ed25519 secret key.
pub fn sign(secret: &SigningSecretKey, message: &[u8]) -> Signature {
    let signing_key = ed25519_dalek::SigningKey::from_bytes(&secret.0);
    Signature(signing_key.sign(message).to_bytes())
}

/// Verifies an Ed25519 `signature` over `message` under `public`.
pub fn verify(public: &SigningPublicKey, message: &[u8], signature: &Signature) -> bool {
    let Ok(verifying_key) = ed25519_dalek::VerifyingKey::from_bytes(&public.0) else {
        return false;
    };
    let sig = ed25519_dalek::Signature::from_bytes(&signature.0);
    verifying_key.verify(message, &sig).is_ok()
}

/// HMAC-SHA256-based HKDF: extract with `salt` (a zero-filled 32-byte string if `None`),
/// then expand `info` into `length` bytes of output keying material.
pub fn hkdf(ikm: &[u8], salt: Option<&[u8]>, info: &[u8], length: usize) -> Vec<u8> {
    let zero_salt = [0u8; SHA256_HASH_LENGTH];
    let hk = Hkdf::<Sha256>::new(Some(salt.unwrap_or(&zero_salt)), ikm);
    let mut okm = vec![0u8; length];
    hk.expand(info, &mut okm)
        .expect("HKDF-SHA256 output length is always within the supported range here");
    okm
}

/// AES-256-GCM seal: returns `ciphertext || tag`.
pub fn aead_seal(
    key: &SharedSecret,
    nonce: &[u8; AES256_NONCE_LENGTH],
    ad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, AeadError> {
    let cipher = Aes256Gcm::new_from_slice(&key.0)?;
    let nonce = Nonce::from_slice(nonce);
    Ok(cipher.encrypt(nonce, Payload { msg: plaintext, aad: ad })?)
}

/// AES-256-GCM open: verifies the tag and returns the plaintext, or
/// [`AeadError::AuthFailure`] if authentication fails.
pub fn aead_open(
    key: &SharedSecret,
    nonce: &[u8; AES256_NONCE_LENGTH],
    ad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, AeadError> {
    let cipher = Aes256Gcm::new_from_slice(&key.0)?;
    let nonce = Nonce::from_slice(nonce);
    Ok(cipher.decrypt(nonce, Payload { msg: ciphertext, aad: ad })?)
}

/// Fills a fresh buffer of `n` bytes from the OS CSPRNG.
pub fn random_bytes(n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    OsRng.fill_bytes(&mut buf);
    buf
}

/// Generates a fresh random AEAD nonce.
pub fn random_nonce() -> [u8; AES256_NONCE_LENGTH] {
    let mut nonce = [0u8; AES256_NONCE_LENGTH];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Constant-time byte-slice equality. Returns `false` (not a panic) if lengths differ,
/// since a length mismatch alone must not be observable as a timing side channel.
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}
