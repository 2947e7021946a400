//! Wire-format types that cross the core's boundary (§6): the pre-key bundle a peer
//! publishes, and the ratchet header transmitted alongside every message.

use crate::constants::{
    CURVE25519_PUBLIC_LENGTH, RATCHET_HEADER_LENGTH, SIGNATURE_LENGTH,
};
use crate::errors::SessionError;
use crate::primitives::{PublicKey, Signature};
use arrayref::array_ref;

/// What a peer publishes so others can initiate a session with it (§3, §4.3).
#[derive(Clone, Debug)]
pub struct PreKeyBundle {
    pub identity_key: PublicKey,
    pub signed_pre_key: PublicKey,
    pub signed_pre_key_signature: Signature,
    pub one_time_pre_key: Option<PublicKey>,
}

impl PreKeyBundle {
    const BASE_SIZE: usize = CURVE25519_PUBLIC_LENGTH * 2 + SIGNATURE_LENGTH + 1;
    const WITH_OTPK_SIZE: usize = Self::BASE_SIZE + CURVE25519_PUBLIC_LENGTH;

    /// Encodes this bundle as `identity_key || signed_pre_key || signature || flag ||
    /// one_time_pre_key?`, per §6's wire format.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::WITH_OTPK_SIZE);
        out.extend_from_slice(&self.identity_key.0);
        out.extend_from_slice(&self.signed_pre_key.0);
        out.extend_from_slice(&self.signed_pre_key_signature.0);
        match &self.one_time_pre_key {
            Some(otpk) => {
                out.push(1);
                out.extend_from_slice(&otpk.0);
            }
            None => out.push(0),
        }
        out
    }

    /// Decodes a bundle previously produced by [`PreKeyBundle::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SessionError> {
        if bytes.len() != Self::BASE_SIZE && bytes.len() != Self::WITH_OTPK_SIZE {
            return Err(SessionError::Malformed(format!(
                "pre-key bundle has {} bytes, expected {} or {}",
                bytes.len(),
                Self::BASE_SIZE,
                Self::WITH_OTPK_SIZE
            )));
        }

        let identity_key = PublicKey(*array_ref![bytes, 0, CURVE25519_PUBLIC_LENGTH]);
        let signed_pre_key = PublicKey(*array_ref![
            bytes,
            CURVE25519_PUBLIC_LENGTH,
            CURVE25519_PUBLIC_LENGTH
        ]);
        let signed_pre_key_signature = Signature(*array_ref![
            bytes,
            2 * CURVE25519_PUBLIC_LENGTH,
            SIGNATURE_LENGTH
        ]);
        let flag_offset = 2 * CURVE25519_PUBLIC_LENGTH + SIGNATURE_LENGTH;
        let flag = bytes[flag_offset];

        let one_time_pre_key = match flag {
            0 if bytes.len() == Self::BASE_SIZE => None,
            1 if bytes.len() == Self::WITH_OTPK_SIZE => Some(PublicKey(*array_ref![
                bytes,
                flag_offset + 1,
                CURVE25519_PUBLIC_LENGTH
            ])),
            _ => {
                return Err(SessionError::Malformed(
                    "pre-key bundle flag byte disagrees with length".to_string(),
                ))
            }
        };

        Ok(PreKeyBundle {
            identity_key,
            signed_pre_key,
            signed_pre_key_signature,
            one_time_pre_key,
        })
    }
}

/// The cleartext header transmitted with every ratchet message, also used as AEAD
/// associated data (§3, §4.5).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    pub ratchet_public_key: PublicKey,
    pub previous_chain_length: u32,
    pub message_number: u32,
}

impl Header {
    /// Encodes the header as `ratchet_public_key (32) || previous_chain_length (u32 BE) ||
    /// message_number (u32 BE)`, exactly `RATCHET_HEADER_LENGTH` bytes.
    pub fn to_bytes(&self) -> [u8; RATCHET_HEADER_LENGTH] {
        let mut out = [0u8; RATCHET_HEADER_LENGTH];
        out[..CURVE25519_PUBLIC_LENGTH].copy_from_slice(&self.ratchet_public_key.0);
        out[CURVE25519_PUBLIC_LENGTH..CURVE25519_PUBLIC_LENGTH + 4]
            .copy_from_slice(&self.previous_chain_length.to_be_bytes());
        out[CURVE25519_PUBLIC_LENGTH + 4..].copy_from_slice(&self.message_number.to_be_bytes());
        out
    }

    /// Decodes a header previously produced by [`Header::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SessionError> {
        if bytes.len() != RATCHET_HEADER_LENGTH {
            return Err(SessionError::Malformed(format!(
                "ratchet header has {} bytes, expected {}",
                bytes.len(),
                RATCHET_HEADER_LENGTH
            )));
        }
        let ratchet_public_key = PublicKey(*array_ref![bytes, 0, CURVE25519_PUBLIC_LENGTH]);
        let previous_chain_length = u32::from_be_bytes(*array_ref![
            bytes,
            CURVE25519_PUBLIC_LENGTH,
            4
        ]);
        let message_number = u32::from_be_bytes(*array_ref![bytes, CURVE25519_PUBLIC_LENGTH + 4, 4]);
        Ok(Header {
            ratchet_public_key,
            previous_chain_length,
            message_number,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::{KeyPair, SigningKeyPair};

    #[test]
    fn prekey_bundle_round_trips_without_otpk() {
        let identity = KeyPair::generate();
        let signed_pre_key = KeyPair::generate();
        let signing = SigningKeyPair::generate();
        let signature = crate::primitives::sign(&signing.secret, &signed_pre_key.public.0);
        let bundle = PreKeyBundle {
            identity_key: identity.public,
            signed_pre_key: signed_pre_key.public,
            signed_pre_key_signature: signature,
            one_time_pre_key: None,
        };
        let decoded = PreKeyBundle::from_bytes(&bundle.to_bytes()).unwrap();
        assert_eq!(decoded.identity_key, bundle.identity_key);
        assert_eq!(decoded.one_time_pre_key, None);
    }

    #[test]
    fn prekey_bundle_round_trips_with_otpk() {
        let identity = KeyPair::generate();
        let signed_pre_key = KeyPair::generate();
        let otpk = KeyPair::generate();
        let signing = SigningKeyPair::generate();
        let signature = crate::primitives::sign(&signing.secret, &signed_pre_key.public.0);
        let bundle = PreKeyBundle {
            identity_key: identity.public,
            signed_pre_key: signed_pre_key.public,
            signed_pre_key_signature: signature,
            one_time_pre_key: Some(otpk.public),
        };
        let decoded = PreKeyBundle::from_bytes(&bundle.to_bytes()).unwrap();
        assert_eq!(decoded.one_time_pre_key, Some(otpk.public));
    }

    #[test]
    fn header_round_trip() {
        let header = Header {
            ratchet_public_key: KeyPair::generate().public,
            previous_chain_length: 7,
            message_number: 42,
        };
        let decoded = Header::from_bytes(&header.to_bytes()).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn header_rejects_wrong_length() {
        assert!(Header::from_bytes(&[0u8; 10]).is_err());
    }
}
