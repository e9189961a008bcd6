//! Slow password hashing.
//!
//! Consumed by the sign-up handler as an external primitive: raw password
//! in, salted one-way hash out. Behind a trait so tests can swap in a
//! cheap cost factor.

use thiserror::Error;

/// Password hashing failure.
#[derive(Debug, Error)]
#[error("password hashing failed: {0}")]
pub struct PasswordHashError(String);

/// Slow, salted one-way hash primitive.
pub trait PasswordHasher: Send + Sync {
    /// Hash a raw password. The caller is expected to drop the plaintext
    /// immediately afterwards.
    fn hash(&self, plaintext: &str) -> Result<String, PasswordHashError>;
}

/// bcrypt-backed hasher.
pub struct BcryptHasher {
    cost: u32,
}

impl BcryptHasher {
    /// Hasher with an explicit cost factor (tests use the bcrypt minimum).
    pub fn with_cost(cost: u32) -> Self {
        Self { cost }
    }
}

impl Default for BcryptHasher {
    fn default() -> Self {
        Self {
            cost: bcrypt::DEFAULT_COST,
        }
    }
}

impl PasswordHasher for BcryptHasher {
    fn hash(&self, plaintext: &str) -> Result<String, PasswordHashError> {
        bcrypt::hash(plaintext, self.cost).map_err(|e| PasswordHashError(e.to_string()))
    }
}
