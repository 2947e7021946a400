//! Cryptographic core of a decentralized peer-to-peer messenger's end-to-end encryption
//! subsystem: a key store, an X3DH handshake, a Double Ratchet session state machine,
//! and the AEAD message layer that sits on top of it.
//!
//! Network transport, persistent storage, and UI are external collaborators; this crate
//! only specifies the interfaces they consume. See each module's docs for its piece of
//! the data flow: [`keystore`] owns long-lived key material, [`x3dh`] turns a peer's
//! published [`utils::PreKeyBundle`] into a shared secret, [`ratchet`] turns that secret
//! into a per-peer session that keeps rekeying, and [`aead`] encrypts/decrypts message
//! bodies under the keys the ratchet produces.

pub mod aead;
pub mod config;
pub(crate) mod constants;
pub mod errors;
pub mod keystore;
pub mod primitives;
pub mod ratchet;
pub mod utils;
pub mod x3dh;

#[cfg(test)]
mod tests {
    use crate::config::RatchetConfig;
    use crate::keystore::KeyStore;
    use crate::ratchet::DoubleRatchetSession;
    use crate::{aead, x3dh};

    /// End-to-end: initiator publishes nothing, responder publishes a bundle,
    /// initiator runs X3DH and the first ratchet send, responder runs X3DH and the
    /// first ratchet receive, and the decrypted plaintext matches.
    #[test]
    fn full_handshake_and_first_message_round_trip() {
        // Installs a logger so the `log::debug!` call sites in `keystore` are
        // observable when this test is run with `RUST_LOG=debug`; safe to call more
        // than once across the test binary since later calls are ignored.
        let _ = env_logger::try_init();

        let mut responder_store = KeyStore::with_pool_floor(1);
        responder_store.initialize();
        let bundle = responder_store.publish_bundle(true).unwrap();

        let mut initiator_store = KeyStore::with_pool_floor(1);
        initiator_store.initialize();

        let initiator_identity = initiator_store.identity_key_pair().unwrap();
        let responder_signing_public = responder_store.signing_public().unwrap();
        let handshake =
            x3dh::initiate(&initiator_identity, &responder_signing_public, &bundle).unwrap();

        let responder_identity = responder_store.identity_key_pair().unwrap();
        let responder_spk = responder_store.signed_pre_key().unwrap();
        let one_time_secret = if handshake.used_one_time {
            let fp = {
                let otpk = bundle.one_time_pre_key.unwrap();
                let hash = otpk.hash();
                hex_prefix(&hash)
            };
            responder_store.consume_one_time_pre_key(&fp).unwrap()
        } else {
            None
        };
        let responder_secret = x3dh::respond(
            &responder_identity,
            &responder_spk,
            &initiator_identity.public,
            &handshake.ephemeral_public,
            one_time_secret.as_ref(),
        )
        .unwrap();
        assert_eq!(handshake.shared_secret, responder_secret);

        let config = RatchetConfig::default();
        let mut initiator_session = DoubleRatchetSession::initiate(
            handshake.shared_secret,
            responder_spk.public,
            config,
        )
        .unwrap();
        let mut responder_session =
            DoubleRatchetSession::respond(responder_secret, responder_spk, config);

        let (message_key, header) = initiator_session.ratchet_send().unwrap();
        let (ciphertext, nonce) = aead::encrypt(&message_key, &header, b"hello, peer").unwrap();

        let received_key = responder_session.ratchet_receive(&header).unwrap();
        let plaintext = aead::decrypt(&received_key, &header, &nonce, &ciphertext).unwrap();
        assert_eq!(plaintext, b"hello, peer");
    }

    fn hex_prefix(hash: &[u8]) -> String {
        use std::fmt::Write;
        let mut out = String::with_capacity(crate::constants::KEY_ID_HEX_LENGTH);
        for b in hash {
            if out.len() >= crate::constants::KEY_ID_HEX_LENGTH {
                break;
            }
            write!(out, "{:02x}", b).unwrap();
        }
        out
    }
}
