//! Rule-driven payload validation.
//!
//! Inbound payloads arrive as untyped JSON objects. Each request shape
//! declares a static, ordered list of field descriptors; the validator
//! walks them in order and produces either a fully validated (and, for
//! sensitive fields, decrypted) record or the first failure.
//!
//! Validation and decryption are fused into a single rule so a field can
//! never be observed by calling code in a "validated but still
//! ciphertext" limbo state.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::crypto::keyring::{CryptoError, KeyRing};

/// Untyped inbound payload: a JSON object with unique keys.
pub type Payload = Map<String, Value>;

/// Declared target type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// JSON string.
    String,
    /// JSON number.
    Number,
    /// JSON boolean.
    Bool,
}

impl FieldType {
    fn matches(self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Bool => value.is_boolean(),
        }
    }
}

/// A single validation rule. Rules on a field evaluate left to right;
/// all must pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRule {
    /// Field must be present, non-null, and type-compatible.
    Required,
    /// Field may be absent; always succeeds.
    Optional,
    /// Field must be present and shaped like an email address
    /// (exactly one `@`, non-empty on both sides).
    EmailFormat,
    /// Field holds base64 ciphertext accompanied by `<field>Sign`, a
    /// base64 signature over the ciphertext bytes. Verifies, then
    /// decrypts, substituting the plaintext into the record.
    SignedAndEncrypted,
}

/// One field descriptor inside a rule set.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    /// Payload key this descriptor applies to.
    pub name: &'static str,
    /// Declared target type.
    pub ty: FieldType,
    /// Ordered rule list. Empty means copy-through when present and
    /// type-compatible, silently skipped when absent.
    pub rules: &'static [FieldRule],
}

/// A static, per-request-type ordered list of field descriptors.
#[derive(Debug, Clone, Copy)]
pub struct RuleSet {
    /// Ordered field descriptors.
    pub fields: &'static [FieldSpec],
}

/// Validation failures. The first failing rule short-circuits the parse.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is absent or null.
    #[error("missing required field `{0}`")]
    MissingRequiredField(String),

    /// A field is present but its runtime type does not match the
    /// declared one.
    #[error("field `{0}` has the wrong type")]
    TypeMismatch(String),

    /// A field does not match the expected format.
    #[error("field `{0}` is not shaped like an email address")]
    InvalidFormat(String),

    /// The companion `<field>Sign` entry is absent or not a string.
    #[error("missing signature entry for field `{0}`")]
    MissingSignature(String),

    /// A field or its signature is not valid base64.
    #[error("field `{0}` is not valid base64")]
    InvalidBase64(String),

    /// Decrypted plaintext is not valid UTF-8.
    #[error("decrypted value for field `{0}` is not valid UTF-8")]
    InvalidUtf8(String),

    /// A signed-and-encrypted rule was declared but the validator has no
    /// key ring bound.
    #[error("no key ring bound, required to validate field `{0}`")]
    KeyRingRequired(String),

    /// Signature verification or decryption failed.
    #[error("cryptographic check failed for field `{field}`")]
    Crypto {
        /// The field the check ran for.
        field: String,
        /// Underlying key ring failure (kept for server-side logs, never
        /// echoed to the peer).
        #[source]
        source: CryptoError,
    },
}

/// The validated, decoded output of a parse: a new record, never a
/// mutated view of the input.
#[derive(Debug, Clone, Default)]
pub struct ValidatedRecord {
    fields: Map<String, Value>,
}

impl ValidatedRecord {
    /// Borrow a field value.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Borrow a field as `&str`, if present and a string.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    /// Move a string field out of the record.
    pub fn take_string(&mut self, name: &str) -> Option<String> {
        match self.fields.remove(name) {
            Some(Value::String(s)) => Some(s),
            _ => None,
        }
    }

    /// Number of fields in the record.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the record holds no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// The rule engine. Holds an optional key ring for signed-and-encrypted
/// rules; construct one per parse from the owning session.
pub struct Validator<'k> {
    keyring: Option<&'k KeyRing>,
}

impl<'k> Validator<'k> {
    /// Validator without cryptographic capability; signed-and-encrypted
    /// rules will fail with [`ValidationError::KeyRingRequired`].
    pub fn new() -> Self {
        Self { keyring: None }
    }

    /// Validator bound to a session key ring.
    pub fn with_keyring(keyring: &'k KeyRing) -> Self {
        Self {
            keyring: Some(keyring),
        }
    }

    /// Decode and validate `payload` against `rules`.
    ///
    /// Fields are visited in declared order and the first rule failure is
    /// returned; no partial record is produced on failure. The input
    /// payload is never mutated.
    pub fn parse(
        &self,
        payload: &Payload,
        rules: &RuleSet,
    ) -> Result<ValidatedRecord, ValidationError> {
        let mut out = Map::new();

        for spec in rules.fields {
            let mut value = payload.get(spec.name).cloned();

            if spec.rules.is_empty() {
                // No rules: copy through when present and type-compatible,
                // silently skip otherwise.
                if let Some(v) = value {
                    if spec.ty.matches(&v) {
                        out.insert(spec.name.to_string(), v);
                    }
                }
                continue;
            }

            for rule in spec.rules {
                match rule {
                    FieldRule::Optional => {}
                    FieldRule::Required => {
                        match &value {
                            None | Some(Value::Null) => {
                                return Err(ValidationError::MissingRequiredField(
                                    spec.name.to_string(),
                                ))
                            }
                            Some(v) if !spec.ty.matches(v) => {
                                return Err(ValidationError::TypeMismatch(spec.name.to_string()))
                            }
                            Some(_) => {}
                        };
                    }
                    FieldRule::EmailFormat => {
                        let ok = value
                            .as_ref()
                            .and_then(Value::as_str)
                            .map(is_email_shaped)
                            .unwrap_or(false);
                        if !ok {
                            return Err(ValidationError::InvalidFormat(spec.name.to_string()));
                        }
                    }
                    FieldRule::SignedAndEncrypted => {
                        let plaintext = self.verify_and_decrypt(payload, spec.name, &value)?;
                        value = Some(Value::String(plaintext));
                    }
                }
            }

            if let Some(v) = value {
                out.insert(spec.name.to_string(), v);
            }
        }

        Ok(ValidatedRecord { fields: out })
    }

    /// The signed-and-encrypted rule body. Signatures are computed over
    /// the ciphertext bytes, not the plaintext, by contract.
    fn verify_and_decrypt(
        &self,
        payload: &Payload,
        field: &str,
        value: &Option<Value>,
    ) -> Result<String, ValidationError> {
        let keyring = self
            .keyring
            .ok_or_else(|| ValidationError::KeyRingRequired(field.to_string()))?;

        let encoded = match value {
            None | Some(Value::Null) => {
                return Err(ValidationError::MissingRequiredField(field.to_string()))
            }
            Some(Value::String(s)) => s,
            Some(_) => return Err(ValidationError::TypeMismatch(field.to_string())),
        };

        let sign_key = format!("{field}Sign");
        let encoded_sign = payload
            .get(&sign_key)
            .and_then(Value::as_str)
            .ok_or_else(|| ValidationError::MissingSignature(field.to_string()))?;

        // Both entries must independently decode before any crypto runs.
        let ciphertext = BASE64
            .decode(encoded)
            .map_err(|_| ValidationError::InvalidBase64(field.to_string()))?;
        let signature = BASE64
            .decode(encoded_sign)
            .map_err(|_| ValidationError::InvalidBase64(sign_key.clone()))?;

        keyring
            .verify(&signature, &ciphertext)
            .map_err(|source| ValidationError::Crypto {
                field: field.to_string(),
                source,
            })?;

        let plaintext = keyring
            .decrypt(&ciphertext, "")
            .map_err(|source| ValidationError::Crypto {
                field: field.to_string(),
                source,
            })?;

        String::from_utf8(plaintext).map_err(|_| ValidationError::InvalidUtf8(field.to_string()))
    }
}

impl Default for Validator<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// Permissive email shape: exactly one `@` with non-empty content on
/// both sides.
fn is_email_shaped(s: &str) -> bool {
    let mut parts = s.split('@');
    matches!(
        (parts.next(), parts.next(), parts.next()),
        (Some(local), Some(domain), None) if !local.is_empty() && !domain.is_empty()
    )
}
