//! Credential handling for external providers.

pub mod credentials;

pub use credentials::{ProviderCredentials, SecretString};
