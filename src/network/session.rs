//! Per-connection secure session.
//!
//! A session owns one key ring and the handshake state for exactly one
//! connection. Frames are handled strictly in arrival order; all
//! cryptographic and validation work for a frame runs to completion
//! before the next one is read. A crypto or validation failure is
//! terminal for that single event only — it is logged, answered with a
//! negative verdict, and the session keeps serving.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::crypto::keyring::{CryptoError, KeyRing, KeyRole};
use crate::network::protocol::{
    InEvent, OutEvent, RequestEnvelope, ResponseEnvelope, ServerKeysPayload,
    SetClientKeysRequest, SignUpRequest, NO, YES,
};
use crate::password::PasswordHasher;
use crate::storage::{Profile, ProfileStore, PROFILES_COLLECTION};
use crate::validator::Payload;

/// Handshake progress. `Ready` is absorbing: once both peer keys are
/// imported the session never reverts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Initial state; waiting for the peer's public keys.
    AwaitingPeerKeys,
    /// Both peer keys imported; business events may flow.
    Ready,
}

/// One connection's secure channel state.
pub struct SecureSession {
    /// Derived from the transport peer address; stable for the
    /// connection's lifetime.
    id: String,
    /// Last-seen correlation id from the peer; log context only.
    correlation_key: String,
    state: HandshakeState,
    keys: KeyRing,
    store: Arc<dyn ProfileStore>,
    hasher: Arc<dyn PasswordHasher>,
}

impl SecureSession {
    /// Create a session for a new connection, generating its key ring.
    ///
    /// Key generation failure is fatal to the session: no channel is
    /// usable without keys.
    pub fn new(
        id: String,
        store: Arc<dyn ProfileStore>,
        hasher: Arc<dyn PasswordHasher>,
    ) -> Result<Self, CryptoError> {
        Ok(Self {
            id,
            correlation_key: String::new(),
            state: HandshakeState::AwaitingPeerKeys,
            keys: KeyRing::generate()?,
            store,
            hasher,
        })
    }

    /// Session identifier (peer address).
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current handshake state.
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Whether the handshake has completed.
    pub fn is_ready(&self) -> bool {
        self.state == HandshakeState::Ready
    }

    /// Decode one inbound text frame and dispatch it.
    ///
    /// Returns the reply frame to send, if the event produces one.
    /// Undecodable frames and unknown events are logged and skipped; they
    /// never terminate the session.
    pub fn handle_frame(&mut self, raw: &str) -> Option<ResponseEnvelope> {
        let envelope = match RequestEnvelope::from_json(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!(session = %self.id, error = %e, "dropping undecodable frame");
                return None;
            }
        };

        self.correlation_key = envelope.req_id.clone();

        let Some(event) = envelope.event() else {
            warn!(
                session = %self.id,
                req_id = %self.correlation_key,
                event = %envelope.name,
                "unknown event"
            );
            return None;
        };

        debug!(
            session = %self.id,
            req_id = %self.correlation_key,
            event = %envelope.name,
            "dispatching frame"
        );

        match event {
            InEvent::GetServerKeys => self.publish_keys(),
            InEvent::SetClientKeys => Some(self.accept_peer_keys(&envelope.data)),
            InEvent::SignUp => self.sign_up(&envelope.data),
        }
    }

    /// `rsa:getServerKeys`: export both local public keys as PEM and
    /// send them as a JSON string payload.
    fn publish_keys(&self) -> Option<ResponseEnvelope> {
        let pems = match self.keys.export_public_keys() {
            Ok(pems) => pems,
            Err(e) => {
                error!(session = %self.id, req_id = %self.correlation_key, error = %e,
                    "public key export failed");
                return None;
            }
        };

        let payload = ServerKeysPayload {
            oaep: pems.confidentiality,
            pss: pems.authenticity,
        };

        match serde_json::to_string(&payload) {
            Ok(data) => Some(ResponseEnvelope {
                name: OutEvent::ServerKeys,
                data,
            }),
            Err(e) => {
                error!(session = %self.id, req_id = %self.correlation_key, error = %e,
                    "public key payload serialization failed");
                None
            }
        }
    }

    /// `rsa:setClientKeys`: import each peer key present in the payload.
    ///
    /// The two imports are independent: a failure in one does not roll
    /// back a successful import of the other, but any failure turns the
    /// acknowledgment into `"NO"`. Re-imports overwrite (keys may rotate
    /// mid-session).
    fn accept_peer_keys(&mut self, payload: &Payload) -> ResponseEnvelope {
        let request = match SetClientKeysRequest::from_payload(payload) {
            Ok(request) => request,
            Err(e) => {
                error!(session = %self.id, req_id = %self.correlation_key, error = %e,
                    "malformed key submission");
                return ResponseEnvelope::accept_client_keys(false);
            }
        };

        let mut accepted = true;

        if let Some(pem) = request.oaep {
            if let Err(e) = self.keys.import_peer_key(&pem, KeyRole::Confidentiality) {
                error!(session = %self.id, req_id = %self.correlation_key, error = %e,
                    "confidentiality key import failed");
                accepted = false;
            }
        }

        if let Some(pem) = request.pss {
            if let Err(e) = self.keys.import_peer_key(&pem, KeyRole::Authenticity) {
                error!(session = %self.id, req_id = %self.correlation_key, error = %e,
                    "authenticity key import failed");
                accepted = false;
            }
        }

        if !self.is_ready()
            && self.keys.has_peer_confidentiality_key()
            && self.keys.has_peer_authenticity_key()
        {
            self.state = HandshakeState::Ready;
            debug!(session = %self.id, req_id = %self.correlation_key, "handshake complete");
        }

        ResponseEnvelope::accept_client_keys(accepted)
    }

    /// `rsa:signUp`: validate and decrypt the sealed credentials, hash
    /// the password, persist the profile, and answer with an encrypted
    /// verdict.
    ///
    /// The reply is always routed through the key ring, even the constant
    /// verdict strings: future extensions may carry sensitive context.
    fn sign_up(&mut self, payload: &Payload) -> Option<ResponseEnvelope> {
        // Business events are gated on the completed handshake; the
        // validator is not even invoked before that.
        if !self.is_ready() || !self.keys.has_peer_authenticity_key() {
            warn!(session = %self.id, req_id = %self.correlation_key,
                "sign-up attempted before handshake completion");
            return self.encrypted_verdict(false);
        }

        let request = match SignUpRequest::from_payload(payload, &self.keys) {
            Ok(request) => request,
            Err(e) => {
                // Detailed cause stays in server-side logs; the peer only
                // ever sees a generic rejection.
                error!(session = %self.id, req_id = %self.correlation_key, error = %e,
                    "sign-up validation failed");
                return self.encrypted_verdict(false);
            }
        };

        let saved = self.persist_profile(request);
        self.encrypted_verdict(saved)
    }

    fn persist_profile(&self, request: SignUpRequest) -> bool {
        let password_hash = match self.hasher.hash(&request.password) {
            Ok(hash) => hash,
            Err(e) => {
                error!(session = %self.id, req_id = %self.correlation_key, error = %e,
                    "password hashing failed");
                return false;
            }
        };

        // `request` is consumed here; the raw password is dropped with it.
        let profile = Profile::new(request.username, password_hash);
        debug!(session = %self.id, req_id = %self.correlation_key,
            username = %profile.name, "persisting new profile");

        match self.store.insert(PROFILES_COLLECTION, vec![profile]) {
            Ok(()) => true,
            Err(e) => {
                error!(session = %self.id, req_id = %self.correlation_key, error = %e,
                    "profile persistence failed");
                false
            }
        }
    }

    /// Encrypt a verdict string to the peer's confidentiality key. When
    /// no peer key was ever imported the reply is logged and dropped,
    /// never sent in plaintext.
    fn encrypted_verdict(&self, accepted: bool) -> Option<ResponseEnvelope> {
        let verdict = if accepted { YES } else { NO };

        match self.keys.encrypt(verdict.as_bytes(), "") {
            Ok(ciphertext) => {
                debug!(session = %self.id, req_id = %self.correlation_key,
                    preview = %hex::encode(&ciphertext[..8.min(ciphertext.len())]),
                    "sending encrypted verdict");
                Some(ResponseEnvelope {
                    name: OutEvent::SignUp,
                    data: BASE64.encode(ciphertext),
                })
            }
            Err(e) => {
                error!(session = %self.id, req_id = %self.correlation_key, error = %e,
                    "cannot encrypt sign-up verdict");
                None
            }
        }
    }
}

impl std::fmt::Debug for SecureSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureSession")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::password::PasswordHashError;
    use crate::storage::MemoryStore;
    use serde_json::json;

    /// Deterministic, fast stand-in for the slow hash primitive.
    struct StubHasher;

    impl PasswordHasher for StubHasher {
        fn hash(&self, plaintext: &str) -> Result<String, PasswordHashError> {
            Ok(format!("hashed:{plaintext}"))
        }
    }

    /// Store that always fails, for the persistence-failure path.
    struct BrokenStore;

    impl ProfileStore for BrokenStore {
        fn insert(
            &self,
            _collection: &str,
            _records: Vec<Profile>,
        ) -> Result<(), crate::storage::PersistenceError> {
            Err(crate::storage::PersistenceError::Backend(
                "disk on fire".to_string(),
            ))
        }
    }

    fn session_with(store: Arc<dyn ProfileStore>) -> SecureSession {
        SecureSession::new("127.0.0.1:9999".to_string(), store, Arc::new(StubHasher)).unwrap()
    }

    fn frame(name: &str, data: serde_json::Value) -> String {
        json!({"name": name, "reqID": "test-req", "data": data}).to_string()
    }

    /// Run the handshake from the client side: fetch server keys, import
    /// them into the client ring, then submit the client's own keys.
    fn complete_handshake(session: &mut SecureSession, client: &mut KeyRing) {
        let reply = session
            .handle_frame(&frame("rsa:getServerKeys", json!({})))
            .unwrap();
        assert_eq!(reply.name, OutEvent::ServerKeys);

        let server_keys: ServerKeysPayload = serde_json::from_str(&reply.data).unwrap();
        client
            .import_peer_key(&server_keys.oaep, KeyRole::Confidentiality)
            .unwrap();
        client
            .import_peer_key(&server_keys.pss, KeyRole::Authenticity)
            .unwrap();

        let pems = client.export_public_keys().unwrap();
        let reply = session
            .handle_frame(&frame(
                "rsa:setClientKeys",
                json!({"oaep": pems.confidentiality, "pss": pems.authenticity}),
            ))
            .unwrap();
        assert_eq!(reply.data, YES);
    }

    fn sealed(client: &KeyRing, plaintext: &str) -> (String, String) {
        let ciphertext = client.encrypt(plaintext.as_bytes(), "").unwrap();
        let signature = client.sign(&ciphertext).unwrap();
        (BASE64.encode(&ciphertext), BASE64.encode(&signature))
    }

    fn decrypt_verdict(client: &KeyRing, reply: &ResponseEnvelope) -> String {
        let ciphertext = BASE64.decode(&reply.data).unwrap();
        String::from_utf8(client.decrypt(&ciphertext, "").unwrap()).unwrap()
    }

    #[test]
    fn test_session_starts_awaiting_peer_keys() {
        let session = session_with(Arc::new(MemoryStore::new()));
        assert_eq!(session.state(), HandshakeState::AwaitingPeerKeys);
        assert!(!session.is_ready());
    }

    #[test]
    fn test_get_server_keys_does_not_advance_state() {
        let mut session = session_with(Arc::new(MemoryStore::new()));
        let reply = session
            .handle_frame(&frame("rsa:getServerKeys", json!({})))
            .unwrap();

        let keys: ServerKeysPayload = serde_json::from_str(&reply.data).unwrap();
        assert!(keys.oaep.starts_with("-----BEGIN PUBLIC KEY-----"));
        assert!(keys.pss.starts_with("-----BEGIN PUBLIC KEY-----"));
        assert_eq!(session.state(), HandshakeState::AwaitingPeerKeys);
    }

    #[test]
    fn test_handshake_completes_with_both_keys() {
        let mut session = session_with(Arc::new(MemoryStore::new()));
        let mut client = KeyRing::generate().unwrap();

        complete_handshake(&mut session, &mut client);
        assert!(session.is_ready());
    }

    #[test]
    fn test_single_key_submission_does_not_complete_handshake() {
        let mut session = session_with(Arc::new(MemoryStore::new()));
        let client = KeyRing::generate().unwrap();
        let pems = client.export_public_keys().unwrap();

        let reply = session
            .handle_frame(&frame(
                "rsa:setClientKeys",
                json!({"pss": pems.authenticity}),
            ))
            .unwrap();

        // The import itself is fine, but the channel is not ready yet.
        assert_eq!(reply.data, YES);
        assert_eq!(session.state(), HandshakeState::AwaitingPeerKeys);
    }

    #[test]
    fn test_partial_import_survives_bad_sibling() {
        let mut session = session_with(Arc::new(MemoryStore::new()));
        let client = KeyRing::generate().unwrap();
        let pems = client.export_public_keys().unwrap();

        // Valid OAEP key alongside a garbage PSS key: rejected overall,
        // but the good import sticks.
        let reply = session
            .handle_frame(&frame(
                "rsa:setClientKeys",
                json!({"oaep": pems.confidentiality, "pss": "garbage"}),
            ))
            .unwrap();
        assert_eq!(reply.data, NO);
        assert_eq!(session.state(), HandshakeState::AwaitingPeerKeys);

        // Supplying only the missing key now completes the handshake.
        let reply = session
            .handle_frame(&frame(
                "rsa:setClientKeys",
                json!({"pss": pems.authenticity}),
            ))
            .unwrap();
        assert_eq!(reply.data, YES);
        assert!(session.is_ready());
    }

    #[test]
    fn test_reimport_keeps_session_ready() {
        let mut session = session_with(Arc::new(MemoryStore::new()));
        let mut client = KeyRing::generate().unwrap();
        complete_handshake(&mut session, &mut client);

        // Same keys again: idempotent.
        let pems = client.export_public_keys().unwrap();
        let reply = session
            .handle_frame(&frame(
                "rsa:setClientKeys",
                json!({"oaep": pems.confidentiality, "pss": pems.authenticity}),
            ))
            .unwrap();
        assert_eq!(reply.data, YES);
        assert!(session.is_ready());

        // Rotated keys: still ready, slots overwritten.
        let rotated = KeyRing::generate().unwrap().export_public_keys().unwrap();
        let reply = session
            .handle_frame(&frame(
                "rsa:setClientKeys",
                json!({"oaep": rotated.confidentiality, "pss": rotated.authenticity}),
            ))
            .unwrap();
        assert_eq!(reply.data, YES);
        assert!(session.is_ready());
    }

    #[test]
    fn test_sign_up_rejected_before_handshake() {
        let store = Arc::new(MemoryStore::new());
        let mut session = session_with(store.clone());

        // No peer confidentiality key exists, so not even the encrypted
        // rejection can be produced; the reply is dropped.
        let reply = session.handle_frame(&frame(
            "rsa:signUp",
            json!({"name": "QQ==", "nameSign": "QQ==", "password": "QQ==", "passwordSign": "QQ=="}),
        ));
        assert!(reply.is_none());
        assert_eq!(session.state(), HandshakeState::AwaitingPeerKeys);
        assert!(store.records(PROFILES_COLLECTION).is_empty());
    }

    #[test]
    fn test_sign_up_end_to_end() {
        let store = Arc::new(MemoryStore::new());
        let mut session = session_with(store.clone());
        let mut client = KeyRing::generate().unwrap();
        complete_handshake(&mut session, &mut client);

        let (name, name_sign) = sealed(&client, "alice");
        let (password, password_sign) = sealed(&client, "pw123");

        let reply = session
            .handle_frame(&frame(
                "rsa:signUp",
                json!({
                    "name": name,
                    "nameSign": name_sign,
                    "password": password,
                    "passwordSign": password_sign,
                }),
            ))
            .unwrap();

        assert_eq!(reply.name, OutEvent::SignUp);
        assert_eq!(decrypt_verdict(&client, &reply), YES);

        let records = store.records(PROFILES_COLLECTION);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "alice");
        assert_eq!(records[0].password_hash, "hashed:pw123");
        assert_ne!(records[0].password_hash, "pw123");
    }

    #[test]
    fn test_sign_up_rejects_forged_signature() {
        let store = Arc::new(MemoryStore::new());
        let mut session = session_with(store.clone());
        let mut client = KeyRing::generate().unwrap();
        complete_handshake(&mut session, &mut client);

        let (name, name_sign) = sealed(&client, "alice");
        let (password, _) = sealed(&client, "pw123");
        // Sign the password ciphertext with the wrong signature.
        let reply = session
            .handle_frame(&frame(
                "rsa:signUp",
                json!({
                    "name": name,
                    "nameSign": name_sign,
                    "password": password,
                    "passwordSign": name_sign,
                }),
            ))
            .unwrap();

        assert_eq!(decrypt_verdict(&client, &reply), NO);
        assert!(store.records(PROFILES_COLLECTION).is_empty());
    }

    #[test]
    fn test_sign_up_missing_field_rejected() {
        let store = Arc::new(MemoryStore::new());
        let mut session = session_with(store.clone());
        let mut client = KeyRing::generate().unwrap();
        complete_handshake(&mut session, &mut client);

        let (name, name_sign) = sealed(&client, "alice");
        let reply = session
            .handle_frame(&frame(
                "rsa:signUp",
                json!({"name": name, "nameSign": name_sign}),
            ))
            .unwrap();

        assert_eq!(decrypt_verdict(&client, &reply), NO);
        assert!(store.records(PROFILES_COLLECTION).is_empty());
    }

    #[test]
    fn test_persistence_failure_is_sign_up_failure() {
        let mut session = session_with(Arc::new(BrokenStore));
        let mut client = KeyRing::generate().unwrap();
        complete_handshake(&mut session, &mut client);

        let (name, name_sign) = sealed(&client, "alice");
        let (password, password_sign) = sealed(&client, "pw123");

        let reply = session
            .handle_frame(&frame(
                "rsa:signUp",
                json!({
                    "name": name,
                    "nameSign": name_sign,
                    "password": password,
                    "passwordSign": password_sign,
                }),
            ))
            .unwrap();

        // Storage trouble is a sign-up failure, not a connection fault.
        assert_eq!(decrypt_verdict(&client, &reply), NO);
        assert!(session.is_ready());
    }

    #[test]
    fn test_unknown_event_is_skipped() {
        let mut session = session_with(Arc::new(MemoryStore::new()));
        assert!(session
            .handle_frame(&frame("rsa:selfDestruct", json!({})))
            .is_none());
        assert_eq!(session.state(), HandshakeState::AwaitingPeerKeys);
    }

    #[test]
    fn test_undecodable_frame_is_skipped() {
        let mut session = session_with(Arc::new(MemoryStore::new()));
        assert!(session.handle_frame("not json at all").is_none());
        assert!(session.handle_frame(r#"{"name": 42}"#).is_none());
    }

    #[test]
    fn test_correlation_key_tracks_last_frame() {
        let mut session = session_with(Arc::new(MemoryStore::new()));
        let raw = json!({"name": "rsa:getServerKeys", "reqID": "abc-1", "data": {}}).to_string();
        let _ = session.handle_frame(&raw);
        assert_eq!(session.correlation_key, "abc-1");

        let raw = json!({"name": "rsa:getServerKeys", "reqID": "abc-2", "data": {}}).to_string();
        let _ = session.handle_frame(&raw);
        assert_eq!(session.correlation_key, "abc-2");
    }
}
