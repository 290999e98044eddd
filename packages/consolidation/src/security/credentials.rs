//! Credential handling with secure memory.
//!
//! Uses the `secrecy` crate so provider keys never reach logs, `Debug`
//! output, or error messages.

use secrecy::{ExposeSecret, SecretBox};
use std::fmt;

use crate::error::{ConsolidationError, Result};

/// A provider key that prints as `[REDACTED]`.
pub struct SecretString(SecretBox<str>);

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretBox::new(value.into().into_boxed_str()))
    }

    /// The raw key, for building request headers only.
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl Clone for SecretString {
    fn clone(&self) -> Self {
        Self::new(self.expose())
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// Credentials and endpoint for an embedding or chat provider.
#[derive(Clone)]
pub struct ProviderCredentials {
    /// API key (secret)
    pub api_key: SecretString,

    /// API base URL, without a trailing slash
    pub base_url: String,
}

impl ProviderCredentials {
    /// Default OpenAI-compatible endpoint.
    pub const DEFAULT_BASE_URL: &'static str = "https://api.openai.com/v1";

    /// Create credentials for the default endpoint.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: SecretString::new(api_key),
            base_url: Self::DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Read `OPENAI_API_KEY` (required) and `OPENAI_BASE_URL` (optional).
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| ConsolidationError::Config("OPENAI_API_KEY not set".into()))?;
        let creds = Self::new(api_key);
        Ok(match std::env::var("OPENAI_BASE_URL") {
            Ok(url) if !url.trim().is_empty() => creds.with_base_url(url),
            _ => creds,
        })
    }

    /// Set the base URL (Azure, proxies, local servers).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// `Authorization` header value.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.api_key.expose())
    }
}

impl fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderCredentials")
            .field("api_key", &self.api_key)
            .field("base_url", &self.base_url)
            .finish()
    }
}
