//! Authentication module
//!
//! Credential handling for the user records kept in storage.

pub mod password;

pub use password::{BcryptCredentials, CredentialPolicy, PlaintextCredentials};
