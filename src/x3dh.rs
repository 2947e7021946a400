//! This module implements the X3DH (Extended Triple Diffie-Hellman) key agreement protocol.
//!
//! X3DH establishes an initial shared secret between two parties ahead of the Double
//! Ratchet, combining an identity key, a signed pre-key, and an optional one-time
//! pre-key to provide forward secrecy and authentication.
//!
//! For more information, see the [Signal Protocol specification](https://signal.org/docs/specifications/x3dh/).

use crate::errors::X3dhError;
use crate::primitives::{self, KeyPair, PublicKey, SigningPublicKey};
use crate::utils::PreKeyBundle;

const SHARED_SECRET_INFO: &[u8] = b"x3dh-shared-secret";

/// The output of [`initiate`]: the derived root key, the fresh ephemeral public key to
/// send to the responder, and whether a one-time pre-key was consumed.
pub struct HandshakeResult {
    pub shared_secret: [u8; 32],
    pub ephemeral_public: PublicKey,
    pub used_one_time: bool,
}

/// Initiator side of X3DH (§4.3). Verifies `remote_bundle`'s signature, generates a
/// fresh ephemeral key, and derives the initial shared secret from up to four DH
/// outputs.
///
/// # Errors
///
/// `BundleVerificationFailed` if the bundle's signed pre-key signature does not verify
/// under `remote_signing_public`. `InvalidPublicKey` if any DH input is the identity
/// point.
pub fn initiate(
    local_identity: &KeyPair,
    remote_signing_public: &SigningPublicKey,
    remote_bundle: &PreKeyBundle,
) -> Result<HandshakeResult, X3dhError> {
    if !primitives::verify(
        remote_signing_public,
        &remote_bundle.signed_pre_key.0,
        &remote_bundle.signed_pre_key_signature,
    ) {
        return Err(X3dhError::BundleVerificationFailed);
    }

    let ephemeral = KeyPair::generate();

    // DH1 = DH(IKA, SPKB)
    let dh1 = primitives::dh(&local_identity.secret, &remote_bundle.signed_pre_key)?;
    // DH2 = DH(EKA, IKB)
    let dh2 = primitives::dh(&ephemeral.secret, &remote_bundle.identity_key)?;
    // DH3 = DH(EKA, SPKB)
    let dh3 = primitives::dh(&ephemeral.secret, &remote_bundle.signed_pre_key)?;
    // DH4 = DH(EKA, OTPK), if present
    let dh4 = remote_bundle
        .one_time_pre_key
        .as_ref()
        .map(|otpk| primitives::dh(&ephemeral.secret, otpk))
        .transpose()?;

    let shared_secret = derive_shared_secret(&dh1, &dh2, &dh3, dh4.as_ref());

    Ok(HandshakeResult {
        shared_secret,
        ephemeral_public: ephemeral.public,
        used_one_time: dh4.is_some(),
    })
}

/// Responder side of X3DH (§4.3). Performs the mirrored DH operations against the
/// initiator's identity and ephemeral public keys, in the same order, producing the
/// identical 32-byte shared secret.
///
/// `one_time_pre_key_secret` must be `Some` exactly when the initiator's bundle
/// contained a one-time pre-key and the caller knows, out-of-band via the envelope,
/// that it was consumed (§9 open question: the responder side cannot infer this from
/// the DH inputs alone).
pub fn respond(
    local_identity: &KeyPair,
    local_signed_pre_key: &KeyPair,
    remote_identity_pub: &PublicKey,
    remote_ephemeral_pub: &PublicKey,
    one_time_pre_key_secret: Option<&KeyPair>,
) -> Result<[u8; 32], X3dhError> {
    // DH1 = DH(SPKB, IKA)
    let dh1 = primitives::dh(&local_signed_pre_key.secret, remote_identity_pub)?;
    // DH2 = DH(IKB, EKA)
    let dh2 = primitives::dh(&local_identity.secret, remote_ephemeral_pub)?;
    // DH3 = DH(SPKB, EKA)
    let dh3 = primitives::dh(&local_signed_pre_key.secret, remote_ephemeral_pub)?;
    // DH4 = DH(OTPK, EKA), if a one-time pre-key was consumed
    let dh4 = one_time_pre_key_secret
        .map(|otpk| primitives::dh(&otpk.secret, remote_ephemeral_pub))
        .transpose()?;

    Ok(derive_shared_secret(&dh1, &dh2, &dh3, dh4.as_ref()))
}

fn derive_shared_secret(
    dh1: &primitives::SharedSecret,
    dh2: &primitives::SharedSecret,
    dh3: &primitives::SharedSecret,
    dh4: Option<&primitives::SharedSecret>,
) -> [u8; 32] {
    // HKDF input key material = F || KM, where F is 32 bytes of 0xFF for cryptographic
    // domain separation (the X3DH spec's curve-dependent prefix, Curve25519 case).
    let mut ikm = vec![0xFFu8; 32];
    ikm.extend_from_slice(&dh1.0);
    ikm.extend_from_slice(&dh2.0);
    ikm.extend_from_slice(&dh3.0);
    if let Some(dh4) = dh4 {
        ikm.extend_from_slice(&dh4.0);
    }
    let okm = primitives::hkdf(&ikm, None, SHARED_SECRET_INFO, 32);
    let mut out = [0u8; 32];
    out.copy_from_slice(&okm);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::SigningKeyPair;

    fn bob_bundle(
        include_otpk: bool,
    ) -> (
        PreKeyBundle,
        KeyPair,
        KeyPair,
        SigningKeyPair,
        Option<KeyPair>,
    ) {
        let identity = KeyPair::generate();
        let signed_pre_key = KeyPair::generate();
        let signing = SigningKeyPair::generate();
        let signature = primitives::sign(&signing.secret, &signed_pre_key.public.0);
        let otpk = if include_otpk {
            Some(KeyPair::generate())
        } else {
            None
        };
        let bundle = PreKeyBundle {
            identity_key: identity.public,
            signed_pre_key: signed_pre_key.public,
            signed_pre_key_signature: signature,
            one_time_pre_key: otpk.as_ref().map(|k| k.public),
        };
        (bundle, identity, signed_pre_key, signing, otpk)
    }

    #[test]
    fn initiate_and_respond_agree_without_one_time_pre_key() {
        let (bundle, bob_identity, bob_spk, bob_signing, _otpk) = bob_bundle(false);
        let alice_identity = KeyPair::generate();

        let result = initiate(&alice_identity, &bob_signing.public, &bundle).unwrap();
        assert!(!result.used_one_time);

        let bob_secret = respond(
            &bob_identity,
            &bob_spk,
            &alice_identity.public,
            &result.ephemeral_public,
            None,
        )
        .unwrap();

        assert_eq!(result.shared_secret, bob_secret);
    }

    #[test]
    fn initiate_and_respond_agree_with_one_time_pre_key() {
        let (bundle, bob_identity, bob_spk, bob_signing, otpk) = bob_bundle(true);
        let alice_identity = KeyPair::generate();

        let result = initiate(&alice_identity, &bob_signing.public, &bundle).unwrap();
        assert!(result.used_one_time);

        let bob_secret = respond(
            &bob_identity,
            &bob_spk,
            &alice_identity.public,
            &result.ephemeral_public,
            otpk.as_ref(),
        )
        .unwrap();

        assert_eq!(result.shared_secret, bob_secret);
    }

    #[test]
    fn initiate_rejects_bad_signature() {
        let (mut bundle, _bob_identity, _bob_spk, bob_signing, _otpk) = bob_bundle(false);
        bundle.signed_pre_key = KeyPair::generate().public;
        let alice_identity = KeyPair::generate();
        assert!(matches!(
            initiate(&alice_identity, &bob_signing.public, &bundle),
            Err(X3dhError::BundleVerificationFailed)
        ));
    }
}
