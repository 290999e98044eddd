//! Provider implementations.
//!
//! Reference implementations of the `Embedder` and `MergeVerifier` traits
//! for OpenAI-compatible APIs. Users can use these directly or implement
//! their own.

#[cfg(feature = "openai")]
mod openai;

#[cfg(feature = "openai")]
pub use openai::{
    OpenAIEmbedder, OpenAIVerifier, DEFAULT_CHAT_MODEL, DEFAULT_EMBEDDING_MODEL, DEFAULT_TIMEOUT,
};
