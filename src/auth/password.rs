//! Credential sealing and verification
//!
//! Existing deployments store passwords as-is and compare by string
//! equality, so [`PlaintextCredentials`] stays the default. Switching to
//! [`BcryptCredentials`] hashes new writes; previously stored plaintext
//! passwords no longer verify after the switch and must be reset.

use crate::core::config::SecurityConfig;
use crate::core::error::{Result, VodError};
use std::sync::Arc;

pub trait CredentialPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Turn a password into the value stored under the password key
    fn seal(&self, password: &str) -> Result<String>;

    /// Check a password against the stored value
    fn verify(&self, password: &str, stored: &str) -> Result<bool>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PlaintextCredentials;

impl CredentialPolicy for PlaintextCredentials {
    fn name(&self) -> &'static str {
        "plaintext"
    }

    fn seal(&self, password: &str) -> Result<String> {
        Ok(password.to_string())
    }

    fn verify(&self, password: &str, stored: &str) -> Result<bool> {
        Ok(password == stored)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BcryptCredentials {
    cost: u32,
}

impl BcryptCredentials {
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }
}

impl Default for BcryptCredentials {
    fn default() -> Self {
        Self::new(bcrypt::DEFAULT_COST)
    }
}

impl CredentialPolicy for BcryptCredentials {
    fn name(&self) -> &'static str {
        "bcrypt"
    }

    fn seal(&self, password: &str) -> Result<String> {
        bcrypt::hash(password, self.cost)
            .map_err(|e| VodError::AuthenticationError(format!("Failed to hash password: {}", e)))
    }

    fn verify(&self, password: &str, stored: &str) -> Result<bool> {
        match bcrypt::verify(password, stored) {
            Ok(matches) => Ok(matches),
            // A value that is not a bcrypt hash can never match
            Err(bcrypt::BcryptError::InvalidHash(_)) | Err(bcrypt::BcryptError::InvalidPrefix(_)) => Ok(false),
            Err(e) => Err(VodError::AuthenticationError(format!("Failed to verify password: {}", e))),
        }
    }
}

/// Build the policy named by `security.password_hashing`
pub fn from_config(config: &SecurityConfig) -> Result<Arc<dyn CredentialPolicy>> {
    match config.password_hashing.as_str() {
        "plaintext" => Ok(Arc::new(PlaintextCredentials)),
        "bcrypt" => Ok(Arc::new(BcryptCredentials::default())),
        other => Err(VodError::ConfigError(format!("Unknown password hashing scheme: {}", other))),
    }
}
