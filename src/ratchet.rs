//! This module implements the Double Ratchet algorithm: the per-peer session state
//! machine that combines symmetric-key chain ratchets (forward secrecy) with a
//! Diffie-Hellman ratchet (post-compromise security).
//! For more information, see the [Signal Protocol specification](https://signal.org/docs/specifications/doubleratchet/).

use crate::config::RatchetConfig;
use crate::constants::SESSION_SNAPSHOT_VERSION;
use crate::errors::{RatchetError, SessionError};
use crate::primitives::{self, KeyPair, PrivateKey, PublicKey, SharedSecret};
use crate::utils::Header;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

const CHAIN_KEY_INFO: &[u8] = b"chain-key";
const MESSAGE_KEY_INFO: &[u8] = b"message-key";
const RATCHET_STEP_INFO: &[u8] = b"ratchet-step";

/// Which half of the session is initialized, per §4.4. Purely informational — callers
/// may use it to decide whether `ratchet_send` can currently succeed.
#[derive(Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Right after X3DH, before either chain exists.
    Uninitialized,
    /// A sending chain exists; no remote ratchet public has been seen yet.
    SendingInitialized,
    /// Both chains exist; the DH ratchet steps on every incoming new remote public.
    Established,
}

/// Insertion-ordered cache of skipped-but-not-yet-received message keys, bounded to
/// `max_skip` entries with FIFO eviction (§4.4, invariant 3).
struct SkippedKeyCache {
    order: VecDeque<(PublicKey, u32)>,
    keys: HashMap<(PublicKey, u32), SharedSecret>,
}

impl SkippedKeyCache {
    fn new() -> Self {
        SkippedKeyCache {
            order: VecDeque::new(),
            keys: HashMap::new(),
        }
    }

    fn insert(&mut self, remote: PublicKey, message_number: u32, key: SharedSecret, max_skip: usize) {
        let id = (remote, message_number);
        if !self.keys.contains_key(&id) {
            self.order.push_back(id.clone());
        }
        self.keys.insert(id, key);
        while self.order.len() > max_skip {
            if let Some(oldest) = self.order.pop_front() {
                self.keys.remove(&oldest);
            }
        }
    }

    /// Removes and returns the key for `(remote, message_number)`, if present. A
    /// successful lookup always removes the entry (§4.4).
    fn take(&mut self, remote: &PublicKey, message_number: u32) -> Option<SharedSecret> {
        let id = (remote.clone(), message_number);
        let key = self.keys.remove(&id)?;
        self.order.retain(|entry| entry != &id);
        Some(key)
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

/// A per-peer Double Ratchet session (§3, §4.4). Not internally synchronized — callers
/// must serialize access to a single session (§5).
pub struct DoubleRatchetSession {
    root_key: SharedSecret,
    sending_chain_key: Option<SharedSecret>,
    receiving_chain_key: Option<SharedSecret>,
    sending_message_number: u32,
    receiving_message_number: u32,
    previous_sending_chain_length: u32,
    dh_self: KeyPair,
    dh_remote: Option<PublicKey>,
    skipped_keys: SkippedKeyCache,
    max_skip: usize,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
}

impl DoubleRatchetSession {
    /// Initiator-side construction: called right after [`crate::x3dh::initiate`] with
    /// the resulting `shared_secret` and the responder's signed pre-key public (used
    /// as the initial remote ratchet key). Leaves `SendingInitialized`: a sending
    /// chain exists, no message has been received yet.
    pub fn initiate(
        shared_secret: [u8; 32],
        remote_ratchet_public: PublicKey,
        config: RatchetConfig,
    ) -> Result<Self, RatchetError> {
        let dh_self = KeyPair::generate();
        let dh_output = primitives::dh(&dh_self.secret, &remote_ratchet_public)
            .map_err(|_| RatchetError::InvalidPublicKey)?;
        let (root_key, sending_chain_key) =
            ratchet_step(&SharedSecret(shared_secret), &dh_output);

        let now = Utc::now();
        Ok(DoubleRatchetSession {
            root_key,
            sending_chain_key: Some(sending_chain_key),
            receiving_chain_key: None,
            sending_message_number: 0,
            receiving_message_number: 0,
            previous_sending_chain_length: 0,
            dh_self,
            dh_remote: Some(remote_ratchet_public),
            skipped_keys: SkippedKeyCache::new(),
            max_skip: config.max_skip,
            created_at: now,
            last_activity: now,
        })
    }

    /// Responder-side construction: called right after [`crate::x3dh::respond`] with the
    /// resulting `shared_secret` and the local signed pre-key pair the session reuses as
    /// its first ratchet key pair. Leaves `Uninitialized`: neither chain exists until
    /// the first inbound message triggers a DH ratchet step.
    pub fn respond(shared_secret: [u8; 32], local_signed_pre_key: KeyPair, config: RatchetConfig) -> Self {
        let now = Utc::now();
        DoubleRatchetSession {
            root_key: SharedSecret(shared_secret),
            sending_chain_key: None,
            receiving_chain_key: None,
            sending_message_number: 0,
            receiving_message_number: 0,
            previous_sending_chain_length: 0,
            dh_self: local_signed_pre_key,
            dh_remote: None,
            skipped_keys: SkippedKeyCache::new(),
            max_skip: config.max_skip,
            created_at: now,
            last_activity: now,
        }
    }

    /// The session's current state, per §4.4.
    pub fn state(&self) -> SessionState {
        match (&self.sending_chain_key, &self.receiving_chain_key) {
            (None, None) => SessionState::Uninitialized,
            (Some(_), None) => SessionState::SendingInitialized,
            _ => SessionState::Established,
        }
    }

    /// The header that would be stamped on the next outbound message, without
    /// advancing any state.
    pub fn current_header(&self) -> Header {
        Header {
            ratchet_public_key: self.dh_self.public,
            previous_chain_length: self.previous_sending_chain_length,
            message_number: self.sending_message_number,
        }
    }

    /// Advances the sending chain one step and returns the fresh message key together
    /// with the header to stamp on the outbound message (§4.4 sending procedure).
    ///
    /// # Errors
    ///
    /// `NotReady` if no sending chain exists yet (a responder session that has not
    /// received a first message).
    pub fn ratchet_send(&mut self) -> Result<(SharedSecret, Header), RatchetError> {
        let chain_key = self.sending_chain_key.clone().ok_or(RatchetError::NotReady)?;
        let (next_chain_key, message_key) = chain_advance(&chain_key);
        self.sending_chain_key = Some(next_chain_key);

        let header = Header {
            ratchet_public_key: self.dh_self.public,
            previous_chain_length: self.previous_sending_chain_length,
            message_number: self.sending_message_number,
        };
        self.sending_message_number += 1;
        self.last_activity = Utc::now();
        Ok((message_key, header))
    }

    /// Consumes `header`, advancing DH and/or chain state as required, and returns the
    /// message key that exactly corresponds to
    /// `(header.ratchet_public_key, header.message_number)` (§4.4 receiving procedure).
    ///
    /// # Errors
    ///
    /// `TooManySkipped` if the gap that would need to be precomputed exceeds
    /// `max_skip`; the session is left completely unmutated in that case.
    /// `InvalidPublicKey` if `header.ratchet_public_key` is the identity point.
    pub fn ratchet_receive(&mut self, header: &Header) -> Result<SharedSecret, RatchetError> {
        if let Some(mk) = self
            .skipped_keys
            .take(&header.ratchet_public_key, header.message_number)
        {
            return Ok(mk);
        }

        let needs_dh_step = self.dh_remote.as_ref() != Some(&header.ratchet_public_key);

        // Validate both potential skip gaps *before* mutating anything, so a
        // `TooManySkipped` failure never leaves the session partially ratcheted.
        if needs_dh_step {
            let old_chain_gap = header
                .previous_chain_length
                .saturating_sub(self.receiving_message_number) as usize;
            if old_chain_gap > self.max_skip {
                return Err(RatchetError::TooManySkipped);
            }
            // After the step, receiving_message_number resets to 0.
            if header.message_number as usize > self.max_skip {
                return Err(RatchetError::TooManySkipped);
            }
        } else {
            let gap = header
                .message_number
                .saturating_sub(self.receiving_message_number) as usize;
            if gap > self.max_skip {
                return Err(RatchetError::TooManySkipped);
            }
        }

        if needs_dh_step {
            // a. stash the sending chain's logical length.
            self.previous_sending_chain_length = self.sending_message_number;

            // b. skip-and-store under the *old* dh_remote, using the old receiving chain.
            if let (Some(old_remote), Some(old_chain)) =
                (self.dh_remote.clone(), self.receiving_chain_key.clone())
            {
                let remaining = skip_into_cache(
                    old_chain,
                    self.receiving_message_number,
                    header.previous_chain_length,
                    &old_remote,
                    &mut self.skipped_keys,
                    self.max_skip,
                );
                self.receiving_chain_key = Some(remaining);
            }

            // c. derive new root + receiving chain from the old dh_self and new dh_remote.
            let dh_out = primitives::dh(&self.dh_self.secret, &header.ratchet_public_key)
                .map_err(|_| RatchetError::InvalidPublicKey)?;
            let (new_root, receiving_chain_key) = ratchet_step(&self.root_key, &dh_out);
            self.root_key = new_root;
            self.receiving_chain_key = Some(receiving_chain_key);

            // d. rotate dh_self, adopt the new dh_remote.
            self.dh_self = KeyPair::generate();
            self.dh_remote = Some(header.ratchet_public_key);

            // e. derive a fresh sending chain from the rotated dh_self.
            let dh_out2 = primitives::dh(&self.dh_self.secret, self.dh_remote.as_ref().unwrap())
                .map_err(|_| RatchetError::InvalidPublicKey)?;
            let (new_root2, sending_chain_key) = ratchet_step(&self.root_key, &dh_out2);
            self.root_key = new_root2;
            self.sending_chain_key = Some(sending_chain_key);

            // f. reset counters.
            self.sending_message_number = 0;
            self.receiving_message_number = 0;
        }

        // 3. skip-and-store under the current dh_remote, up to header.message_number.
        let current_chain = self
            .receiving_chain_key
            .clone()
            .ok_or(RatchetError::NotReady)?;
        let remaining = skip_into_cache(
            current_chain,
            self.receiving_message_number,
            header.message_number,
            &header.ratchet_public_key,
            &mut self.skipped_keys,
            self.max_skip,
        );

        // 4. derive this message's key, advance the chain, bump the counter.
        let (next_chain, message_key) = chain_advance(&remaining);
        self.receiving_chain_key = Some(next_chain);
        self.receiving_message_number += 1;
        self.last_activity = Utc::now();
        Ok(message_key)
    }

    /// Number of entries currently held in the skipped-message-key cache.
    pub fn skipped_key_count(&self) -> usize {
        self.skipped_keys.len()
    }

    /// Serializes this session into an opaque, versioned byte blob a storage layer can
    /// persist (§6). Encryption of the blob, if any, is the storage layer's concern.
    pub fn serialize_session(&self) -> Result<Vec<u8>, SessionError> {
        let data = SessionSnapshot::from(self);
        let mut out = vec![SESSION_SNAPSHOT_VERSION];
        out.extend(bincode::serialize(&data)?);
        Ok(out)
    }

    /// Deserializes a blob previously produced by [`DoubleRatchetSession::serialize_session`].
    ///
    /// # Errors
    ///
    /// `SerializationError` if the version byte is unrecognized or the remaining bytes
    /// do not decode to a well-formed snapshot. The blob is refused, never repaired.
    pub fn deserialize_session(bytes: &[u8]) -> Result<Self, SessionError> {
        let (version, rest) = bytes
            .split_first()
            .ok_or_else(|| SessionError::Malformed("empty session snapshot".to_string()))?;
        if *version != SESSION_SNAPSHOT_VERSION {
            return Err(SessionError::Malformed(format!(
                "unsupported session snapshot version {version}"
            )));
        }
        let data: SessionSnapshot = bincode::deserialize(rest)?;
        Ok(data.into())
    }
}

/// Derives exactly `until - start` message keys from `chain_key`, storing each under
/// `remote` at its message number, and returns the chain key advanced that many steps.
fn skip_into_cache(
    chain_key: SharedSecret,
    start: u32,
    until: u32,
    remote: &PublicKey,
    cache: &mut SkippedKeyCache,
    max_skip: usize,
) -> SharedSecret {
    let mut ck = chain_key;
    let mut n = start;
    while n < until {
        let (next_ck, mk) = chain_advance(&ck);
        cache.insert(remote.clone(), n, mk, max_skip);
        ck = next_ck;
        n += 1;
    }
    ck
}

/// Chain key advance + message key derivation from the same chain key (§4.4).
fn chain_advance(chain_key: &SharedSecret) -> (SharedSecret, SharedSecret) {
    let next = primitives::hkdf(&chain_key.0, None, CHAIN_KEY_INFO, 32);
    let message_key = primitives::hkdf(&chain_key.0, None, MESSAGE_KEY_INFO, 32);
    (
        SharedSecret(to_array(&next)),
        SharedSecret(to_array(&message_key)),
    )
}

/// The DH ratchet step: derives a fresh root key and chain key from the old root key
/// and a DH output, splitting a 64-byte HKDF expansion into two 32-byte halves.
fn ratchet_step(root_key: &SharedSecret, dh_output: &SharedSecret) -> (SharedSecret, SharedSecret) {
    let mut ikm = Vec::with_capacity(64);
    ikm.extend_from_slice(&root_key.0);
    ikm.extend_from_slice(&dh_output.0);
    let okm = primitives::hkdf(&ikm, None, RATCHET_STEP_INFO, 64);
    let mut new_root = [0u8; 32];
    let mut chain_key = [0u8; 32];
    new_root.copy_from_slice(&okm[..32]);
    chain_key.copy_from_slice(&okm[32..]);
    (SharedSecret(new_root), SharedSecret(chain_key))
}

fn to_array(bytes: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(bytes);
    out
}

#[derive(Serialize, Deserialize)]
struct SessionSnapshot {
    root_key: [u8; 32],
    sending_chain_key: Option<[u8; 32]>,
    receiving_chain_key: Option<[u8; 32]>,
    sending_message_number: u32,
    receiving_message_number: u32,
    previous_sending_chain_length: u32,
    dh_self_public: [u8; 32],
    dh_self_secret: [u8; 32],
    dh_remote: Option<[u8; 32]>,
    skipped_keys: Vec<([u8; 32], u32, [u8; 32])>,
    max_skip: usize,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
}

impl From<&DoubleRatchetSession> for SessionSnapshot {
    fn from(session: &DoubleRatchetSession) -> Self {
        let skipped_keys = session
            .skipped_keys
            .order
            .iter()
            .map(|(remote, n)| {
                let key = session.skipped_keys.keys.get(&(remote.clone(), *n)).expect(
                    "every id in the insertion-order queue has a matching entry in the map",
                );
                (remote.0, *n, key.0)
            })
            .collect();

        SessionSnapshot {
            root_key: session.root_key.0,
            sending_chain_key: session.sending_chain_key.as_ref().map(|k| k.0),
            receiving_chain_key: session.receiving_chain_key.as_ref().map(|k| k.0),
            sending_message_number: session.sending_message_number,
            receiving_message_number: session.receiving_message_number,
            previous_sending_chain_length: session.previous_sending_chain_length,
            dh_self_public: session.dh_self.public.0,
            dh_self_secret: session.dh_self.secret.0,
            dh_remote: session.dh_remote.as_ref().map(|k| k.0),
            skipped_keys,
            max_skip: session.max_skip,
            created_at: session.created_at,
            last_activity: session.last_activity,
        }
    }
}

impl From<SessionSnapshot> for DoubleRatchetSession {
    fn from(data: SessionSnapshot) -> Self {
        let mut skipped_keys = SkippedKeyCache::new();
        for (remote, n, key) in data.skipped_keys {
            skipped_keys.insert(PublicKey(remote), n, SharedSecret(key), usize::MAX);
        }

        let dh_self_secret = PrivateKey(data.dh_self_secret);
        DoubleRatchetSession {
            root_key: SharedSecret(data.root_key),
            sending_chain_key: data.sending_chain_key.map(SharedSecret),
            receiving_chain_key: data.receiving_chain_key.map(SharedSecret),
            sending_message_number: data.sending_message_number,
            receiving_message_number: data.receiving_message_number,
            previous_sending_chain_length: data.previous_sending_chain_length,
            dh_self: KeyPair {
                public: PublicKey(data.dh_self_public),
                secret: dh_self_secret,
            },
            dh_remote: data.dh_remote.map(PublicKey),
            skipped_keys,
            max_skip: data.max_skip,
            created_at: data.created_at,
            last_activity: data.last_activity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paired_sessions() -> (DoubleRatchetSession, DoubleRatchetSession) {
        let shared_secret = [7u8; 32];
        let bob_spk = KeyPair::generate();
        let config = RatchetConfig::default();
        let alice = DoubleRatchetSession::initiate(shared_secret, bob_spk.public, config).unwrap();
        let bob = DoubleRatchetSession::respond(shared_secret, bob_spk, config);
        (alice, bob)
    }

    #[test]
    fn simple_ordered_exchange() {
        let (mut alice, mut bob) = paired_sessions();

        let (mk1, h1) = alice.ratchet_send().unwrap();
        let (mk2, h2) = alice.ratchet_send().unwrap();

        let bob_mk1 = bob.ratchet_receive(&h1).unwrap();
        let bob_mk2 = bob.ratchet_receive(&h2).unwrap();

        assert_eq!(mk1.0, bob_mk1.0);
        assert_eq!(mk2.0, bob_mk2.0);
        assert_eq!(alice.sending_message_number, 2);
        assert_eq!(bob.receiving_message_number, 2);
    }

    #[test]
    fn out_of_order_within_a_chain() {
        let (mut alice, mut bob) = paired_sessions();
        let (mk1, h1) = alice.ratchet_send().unwrap();
        let (mk2, h2) = alice.ratchet_send().unwrap();
        let (mk3, h3) = alice.ratchet_send().unwrap();

        let recv2 = bob.ratchet_receive(&h2).unwrap();
        assert_eq!(recv2.0, mk2.0);
        assert_eq!(bob.skipped_key_count(), 1);

        let recv1 = bob.ratchet_receive(&h1).unwrap();
        assert_eq!(recv1.0, mk1.0);
        assert_eq!(bob.skipped_key_count(), 0);

        let recv3 = bob.ratchet_receive(&h3).unwrap();
        assert_eq!(recv3.0, mk3.0);
        assert_eq!(bob.skipped_key_count(), 0);
    }

    #[test]
    fn dh_ratchet_step_on_reply() {
        let (mut alice, mut bob) = paired_sessions();
        let (_mk1, h1) = alice.ratchet_send().unwrap();
        bob.ratchet_receive(&h1).unwrap();

        let (_r1_key, r1_header) = bob.ratchet_send().unwrap();
        alice.ratchet_receive(&r1_header).unwrap();

        let (_mk2, h2) = alice.ratchet_send().unwrap();
        assert_ne!(h2.ratchet_public_key, h1.ratchet_public_key);
        assert_eq!(h2.previous_chain_length, 1);

        assert!(bob.ratchet_receive(&h2).is_ok());
        assert_eq!(bob.skipped_key_count(), 0);
    }

    #[test]
    fn dropped_message_across_ratchet() {
        let (mut alice, mut bob) = paired_sessions();
        let (_mk1, h1) = alice.ratchet_send().unwrap();
        let (_mk2, h2) = alice.ratchet_send().unwrap();

        let (_r1_key, r1_header) = bob.ratchet_send().unwrap();
        alice.ratchet_receive(&r1_header).unwrap();

        let (_mk3, h3) = alice.ratchet_send().unwrap();

        bob.ratchet_receive(&h1).unwrap();
        bob.ratchet_receive(&h3).unwrap();

        assert_eq!(bob.skipped_key_count(), 1);
        assert!(bob.skipped_keys.keys.contains_key(&(h2.ratchet_public_key, h2.message_number)));
    }

    #[test]
    fn x3dh_derived_secrets_seed_matching_sessions() {
        let (mut alice, mut bob) = paired_sessions();
        let (mk, header) = alice.ratchet_send().unwrap();
        let bob_mk = bob.ratchet_receive(&header).unwrap();
        assert_eq!(mk.0, bob_mk.0);
    }

    #[test]
    fn session_snapshot_round_trips() {
        let (mut alice, _bob) = paired_sessions();
        alice.ratchet_send().unwrap();
        let blob = alice.serialize_session().unwrap();
        let restored = DoubleRatchetSession::deserialize_session(&blob).unwrap();
        assert_eq!(restored.root_key.0, alice.root_key.0);
        assert_eq!(restored.sending_message_number, alice.sending_message_number);
        assert_eq!(restored.dh_self.public, alice.dh_self.public);
    }

    #[test]
    fn skipped_key_cache_evicts_oldest_first() {
        let (mut alice, mut bob) = paired_sessions();
        let config = RatchetConfig { max_skip: 2 };
        bob.max_skip = config.max_skip;

        for _ in 0..4 {
            alice.ratchet_send().unwrap();
        }
        let (_mk, h5) = alice.ratchet_send().unwrap();
        // Receiving message #4 skips #0..3 but cache only keeps the most recent 2.
        bob.ratchet_receive(&h5).unwrap();
        assert_eq!(bob.skipped_key_count(), 2);
    }

    #[test]
    fn too_many_skipped_leaves_session_unchanged() {
        let (mut alice, mut bob) = paired_sessions();
        bob.max_skip = 3;
        for _ in 0..5 {
            alice.ratchet_send().unwrap();
        }
        let (_mk, h_last) = alice.ratchet_send().unwrap();

        let root_before = bob.root_key.0;
        let recv_before = bob.receiving_message_number;
        let result = bob.ratchet_receive(&h_last);
        assert!(matches!(result, Err(RatchetError::TooManySkipped)));
        assert_eq!(bob.root_key.0, root_before);
        assert_eq!(bob.receiving_message_number, recv_before);
    }

    #[test]
    fn sending_before_any_receive_on_responder_fails() {
        let (_alice, mut bob) = paired_sessions();
        assert!(matches!(bob.ratchet_send(), Err(RatchetError::NotReady)));
    }
}
