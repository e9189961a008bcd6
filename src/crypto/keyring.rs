//! Dual-keypair RSA key ring.
//!
//! Each session owns two independent 2048-bit RSA keypairs: one used only
//! for encryption (OAEP with SHA-256) and one used only for signatures
//! (PSS with SHA-256 and randomized salt). The two roles are never served
//! by the same keypair. Peer public keys are imported from SPKI PEM and
//! may be overwritten by a later import.

use rsa::pkcs8::{spki, DecodePublicKey, EncodePublicKey, LineEnding};
use rsa::pss::{BlindedSigningKey, Signature, VerifyingKey};
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use thiserror::Error;

use crate::KEY_BITS;

/// Which of the two peer key slots an operation refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRole {
    /// Encryption/decryption keypair (OAEP).
    Confidentiality,
    /// Signing/verification keypair (PSS).
    Authenticity,
}

impl std::fmt::Display for KeyRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyRole::Confidentiality => write!(f, "confidentiality (OAEP)"),
            KeyRole::Authenticity => write!(f, "authenticity (PSS)"),
        }
    }
}

/// Key ring errors.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// RSA key generation failed (entropy or algorithm failure).
    #[error("key generation failed: {0}")]
    KeyGeneration(rsa::Error),

    /// The peer public key required for the operation was never imported.
    #[error("peer {0} key not imported")]
    MissingPeerKey(KeyRole),

    /// Plaintext exceeds the OAEP message bound for the peer's modulus.
    #[error("message too large for RSA-OAEP encryption")]
    MessageTooLarge,

    /// Encryption failed inside the RSA layer.
    #[error("encryption failed: {0}")]
    Encryption(rsa::Error),

    /// Padding or label mismatch, or corrupted ciphertext.
    #[error("decryption failed")]
    Decryption,

    /// Signing failed (RNG failure).
    #[error("signing failed")]
    Signing,

    /// The signature does not match the data.
    #[error("signature verification failed")]
    SignatureVerification,

    /// Local public key could not be serialized to PEM.
    #[error("public key serialization failed: {0}")]
    Serialization(spki::Error),

    /// The PEM block is absent or malformed.
    #[error("malformed public key PEM: {0}")]
    InvalidKeyFormat(String),

    /// The PEM decoded, but the key inside is not an RSA public key.
    #[error("unsupported key type, expected an RSA public key")]
    UnsupportedKeyType,
}

/// Both local public keys, serialized as SPKI PEM.
#[derive(Debug, Clone)]
pub struct PublicKeyPems {
    /// Confidentiality (OAEP) public key PEM.
    pub confidentiality: String,
    /// Authenticity (PSS) public key PEM.
    pub authenticity: String,
}

/// Per-session key material: two local keypairs plus the peer's imported
/// public keys.
pub struct KeyRing {
    confidentiality_private: RsaPrivateKey,
    confidentiality_public: RsaPublicKey,
    authenticity_signing: BlindedSigningKey<Sha256>,
    authenticity_public: RsaPublicKey,
    peer_confidentiality: Option<RsaPublicKey>,
    peer_authenticity: Option<RsaPublicKey>,
}

impl KeyRing {
    /// Generate fresh confidentiality and authenticity keypairs.
    ///
    /// Failure here is fatal to the session: no channel is usable
    /// without keys.
    pub fn generate() -> Result<Self, CryptoError> {
        let mut rng = rand::thread_rng();

        let confidentiality_private =
            RsaPrivateKey::new(&mut rng, KEY_BITS).map_err(CryptoError::KeyGeneration)?;
        let authenticity_private =
            RsaPrivateKey::new(&mut rng, KEY_BITS).map_err(CryptoError::KeyGeneration)?;

        let confidentiality_public = RsaPublicKey::from(&confidentiality_private);
        let authenticity_public = RsaPublicKey::from(&authenticity_private);

        Ok(Self {
            confidentiality_private,
            confidentiality_public,
            authenticity_signing: BlindedSigningKey::<Sha256>::new(authenticity_private),
            authenticity_public,
            peer_confidentiality: None,
            peer_authenticity: None,
        })
    }

    fn oaep_padding(label: &str) -> Oaep {
        if label.is_empty() {
            Oaep::new::<Sha256>()
        } else {
            Oaep::new_with_label::<Sha256, _>(label)
        }
    }

    /// Encrypt `plaintext` to the peer's confidentiality key.
    pub fn encrypt(&self, plaintext: &[u8], label: &str) -> Result<Vec<u8>, CryptoError> {
        let peer = self
            .peer_confidentiality
            .as_ref()
            .ok_or(CryptoError::MissingPeerKey(KeyRole::Confidentiality))?;

        let mut rng = rand::thread_rng();
        peer.encrypt(&mut rng, Self::oaep_padding(label), plaintext)
            .map_err(|e| match e {
                rsa::Error::MessageTooLong => CryptoError::MessageTooLarge,
                other => CryptoError::Encryption(other),
            })
    }

    /// Decrypt a ciphertext produced for our confidentiality key.
    ///
    /// The error is deliberately flat: padding failures, label mismatches
    /// and corruption are indistinguishable to callers.
    pub fn decrypt(&self, ciphertext: &[u8], label: &str) -> Result<Vec<u8>, CryptoError> {
        self.confidentiality_private
            .decrypt(Self::oaep_padding(label), ciphertext)
            .map_err(|_| CryptoError::Decryption)
    }

    /// Sign `data` with the local authenticity key (SHA-256 digest, PSS
    /// padding with randomized salt).
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut rng = rand::thread_rng();
        let signature = self
            .authenticity_signing
            .try_sign_with_rng(&mut rng, data)
            .map_err(|_| CryptoError::Signing)?;
        Ok(signature.to_vec())
    }

    /// Verify a detached signature over `data` against the peer's
    /// authenticity key.
    pub fn verify(&self, signature: &[u8], data: &[u8]) -> Result<(), CryptoError> {
        let peer = self
            .peer_authenticity
            .as_ref()
            .ok_or(CryptoError::MissingPeerKey(KeyRole::Authenticity))?;

        let signature =
            Signature::try_from(signature).map_err(|_| CryptoError::SignatureVerification)?;

        VerifyingKey::<Sha256>::new(peer.clone())
            .verify(data, &signature)
            .map_err(|_| CryptoError::SignatureVerification)
    }

    /// Serialize both local public keys to SPKI PEM.
    pub fn export_public_keys(&self) -> Result<PublicKeyPems, CryptoError> {
        let confidentiality = self
            .confidentiality_public
            .to_public_key_pem(LineEnding::LF)
            .map_err(CryptoError::Serialization)?;
        let authenticity = self
            .authenticity_public
            .to_public_key_pem(LineEnding::LF)
            .map_err(CryptoError::Serialization)?;

        Ok(PublicKeyPems {
            confidentiality,
            authenticity,
        })
    }

    /// Import a peer public key from SPKI PEM into the given slot,
    /// overwriting any previous import.
    pub fn import_peer_key(&mut self, pem: &str, role: KeyRole) -> Result<(), CryptoError> {
        let key = RsaPublicKey::from_public_key_pem(pem).map_err(|e| match e {
            spki::Error::OidUnknown { .. } => CryptoError::UnsupportedKeyType,
            other => CryptoError::InvalidKeyFormat(other.to_string()),
        })?;

        match role {
            KeyRole::Confidentiality => self.peer_confidentiality = Some(key),
            KeyRole::Authenticity => self.peer_authenticity = Some(key),
        }

        Ok(())
    }

    /// Whether the peer's confidentiality key has been imported.
    pub fn has_peer_confidentiality_key(&self) -> bool {
        self.peer_confidentiality.is_some()
    }

    /// Whether the peer's authenticity key has been imported.
    pub fn has_peer_authenticity_key(&self) -> bool {
        self.peer_authenticity.is_some()
    }

    /// Peer key currently held in the given slot, if any.
    pub fn peer_key(&self, role: KeyRole) -> Option<&RsaPublicKey> {
        match role {
            KeyRole::Confidentiality => self.peer_confidentiality.as_ref(),
            KeyRole::Authenticity => self.peer_authenticity.as_ref(),
        }
    }
}

impl std::fmt::Debug for KeyRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyRing")
            .field("peer_confidentiality", &self.peer_confidentiality.is_some())
            .field("peer_authenticity", &self.peer_authenticity.is_some())
            .finish_non_exhaustive()
    }
}
