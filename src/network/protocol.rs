//! Wire protocol.
//!
//! JSON text frames over the WebSocket. Inbound frames carry an event
//! name, a correlation id echoed into log context, and an untyped payload
//! object. Outbound frames carry an event name and a single string, which
//! is either plaintext or base64 ciphertext depending on the event.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::crypto::keyring::KeyRing;
use crate::validator::{
    FieldRule, FieldSpec, FieldType, Payload, RuleSet, ValidationError, Validator,
};

/// Positive protocol verdict.
pub const YES: &str = "YES";
/// Negative protocol verdict.
pub const NO: &str = "NO";

// =============================================================================
// ENVELOPES
// =============================================================================

/// Inbound request envelope:
/// `{"name": <event>, "reqID": <string>, "data": {...}}`.
#[derive(Debug, Clone, Deserialize)]
pub struct RequestEnvelope {
    /// Requested operation.
    pub name: String,
    /// Opaque correlation id, echoed into log context only; not part of
    /// the trust boundary.
    #[serde(rename = "reqID", default)]
    pub req_id: String,
    /// Untyped key→value payload.
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl RequestEnvelope {
    /// Deserialize from a JSON text frame.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Resolve the event name, if it is one we serve.
    pub fn event(&self) -> Option<InEvent> {
        InEvent::parse(&self.name)
    }
}

/// Outbound response envelope: `{"name": <event>, "data": <string>}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Event this frame answers or announces.
    pub name: OutEvent,
    /// Plaintext or base64 ciphertext, determined by the sending
    /// operation; not self-describing.
    pub data: String,
}

impl ResponseEnvelope {
    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Handshake acknowledgment frame (plaintext verdict).
    pub fn accept_client_keys(accepted: bool) -> Self {
        Self {
            name: OutEvent::AcceptClientKeys,
            data: if accepted { YES } else { NO }.to_string(),
        }
    }
}

// =============================================================================
// EVENTS
// =============================================================================

/// Client → server events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InEvent {
    /// Client asks for the server's public keys.
    GetServerKeys,
    /// Client submits its own public keys.
    SetClientKeys,
    /// Client signs up with sealed credentials.
    SignUp,
}

impl InEvent {
    /// Parse a wire event name.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "rsa:getServerKeys" => Some(Self::GetServerKeys),
            "rsa:setClientKeys" => Some(Self::SetClientKeys),
            "rsa:signUp" => Some(Self::SignUp),
            _ => None,
        }
    }

    /// Wire name of the event.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GetServerKeys => "rsa:getServerKeys",
            Self::SetClientKeys => "rsa:setClientKeys",
            Self::SignUp => "rsa:signUp",
        }
    }
}

/// Server → client events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutEvent {
    /// Server publishes its public keys.
    #[serde(rename = "rsa:serverKeys")]
    ServerKeys,
    /// Server accepts or rejects the client's keys.
    #[serde(rename = "rsa:acceptClientKeys")]
    AcceptClientKeys,
    /// Encrypted sign-up verdict.
    #[serde(rename = "rsa:signUp")]
    SignUp,
}

/// Payload of the `rsa:serverKeys` event, serialized to a JSON string and
/// embedded into the envelope `data` field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerKeysPayload {
    /// Confidentiality public key PEM.
    #[serde(rename = "OAEP")]
    pub oaep: String,
    /// Authenticity public key PEM.
    #[serde(rename = "PSS")]
    pub pss: String,
}

// =============================================================================
// TYPED REQUESTS
// =============================================================================

/// Rule set for `rsa:setClientKeys`: either key may be supplied, each
/// imported independently.
pub const SET_CLIENT_KEYS_RULES: RuleSet = RuleSet {
    fields: &[
        FieldSpec {
            name: "oaep",
            ty: FieldType::String,
            rules: &[FieldRule::Optional],
        },
        FieldSpec {
            name: "pss",
            ty: FieldType::String,
            rules: &[FieldRule::Optional],
        },
    ],
};

/// Rule set for `rsa:signUp`: both credentials arrive sealed (base64
/// ciphertext plus a detached signature over the ciphertext).
pub const SIGN_UP_RULES: RuleSet = RuleSet {
    fields: &[
        FieldSpec {
            name: "name",
            ty: FieldType::String,
            rules: &[FieldRule::Required, FieldRule::SignedAndEncrypted],
        },
        FieldSpec {
            name: "password",
            ty: FieldType::String,
            rules: &[FieldRule::Required, FieldRule::SignedAndEncrypted],
        },
    ],
};

/// Validated `rsa:setClientKeys` request.
#[derive(Debug, Clone)]
pub struct SetClientKeysRequest {
    /// Confidentiality public key PEM, when supplied.
    pub oaep: Option<String>,
    /// Authenticity public key PEM, when supplied.
    pub pss: Option<String>,
}

impl SetClientKeysRequest {
    /// Validate and narrow the untyped payload.
    pub fn from_payload(payload: &Payload) -> Result<Self, ValidationError> {
        let mut record = Validator::new().parse(payload, &SET_CLIENT_KEYS_RULES)?;

        // Explicit checked narrowing: a present-but-non-string PEM is a
        // type error, not an absent key.
        let oaep = Self::take_pem(&mut record, "oaep")?;
        let pss = Self::take_pem(&mut record, "pss")?;

        Ok(Self { oaep, pss })
    }

    fn take_pem(
        record: &mut crate::validator::ValidatedRecord,
        name: &str,
    ) -> Result<Option<String>, ValidationError> {
        match record.get(name).map(Value::is_string) {
            Some(true) => Ok(record.take_string(name)),
            Some(false) => Err(ValidationError::TypeMismatch(name.to_string())),
            None => Ok(None),
        }
    }
}

/// Validated and decrypted `rsa:signUp` request.
pub struct SignUpRequest {
    /// Decrypted, signature-verified username.
    pub username: String,
    /// Decrypted, signature-verified raw password. Dropped right after
    /// hashing; never logged or persisted.
    pub password: String,
}

impl SignUpRequest {
    /// Validate, verify, and decrypt the untyped payload.
    pub fn from_payload(payload: &Payload, keyring: &KeyRing) -> Result<Self, ValidationError> {
        let mut record = Validator::with_keyring(keyring).parse(payload, &SIGN_UP_RULES)?;

        let username = record
            .take_string("name")
            .ok_or_else(|| ValidationError::MissingRequiredField("name".to_string()))?;
        let password = record
            .take_string("password")
            .ok_or_else(|| ValidationError::MissingRequiredField("password".to_string()))?;

        Ok(Self { username, password })
    }
}

impl std::fmt::Debug for SignUpRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never expose the raw password, even in debug output.
        f.debug_struct("SignUpRequest")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}
