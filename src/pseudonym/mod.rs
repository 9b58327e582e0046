//! Salted one-way identity transform.
//!
//! A pseudonym is the hex-encoded SHA-256 digest of `identity || salt`.
//! The salt is loaded once at startup and there is no fallback: a process
//! without an explicit salt refuses to run.

use crate::error::{PipelineError, Result};
use crate::models::Pseudonym;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};

/// Minimum salt length in characters.
pub const MIN_SALT_LEN: usize = 16;

/// Deterministic salted pseudonymizer.
pub struct Pseudonymizer {
    salt: SecretString,
}

impl std::fmt::Debug for Pseudonymizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pseudonymizer")
            .field("salt", &"<redacted>")
            .finish()
    }
}

impl Pseudonymizer {
    /// Build a pseudonymizer from the configured salt.
    ///
    /// `None`, blank, or short salts are fatal configuration errors.
    pub fn from_salt(salt: Option<SecretString>) -> Result<Self> {
        let salt = salt.ok_or(PipelineError::MissingSalt)?;

        let exposed = salt.expose_secret();
        if exposed.trim().is_empty() {
            return Err(PipelineError::MissingSalt);
        }
        if exposed.chars().count() < MIN_SALT_LEN {
            return Err(PipelineError::InvalidSalt(format!(
                "must be at least {} characters",
                MIN_SALT_LEN
            )));
        }

        Ok(Self { salt })
    }

    /// Derive the pseudonym for a raw identity.
    pub fn pseudonymize(&self, raw_identity: &str) -> Pseudonym {
        let mut hasher = Sha256::new();
        hasher.update(raw_identity.as_bytes());
        hasher.update(self.salt.expose_secret().as_bytes());
        let digest = hasher.finalize();

        let hex = digest
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<String>();

        Pseudonym::new(hex)
    }
}
