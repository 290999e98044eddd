//! Core trait abstractions for the consolidation library.
//!
//! These traits define the interfaces that applications implement
//! to provide embeddings, merge verification, and storage.

pub mod embedder;
pub mod store;
pub mod verifier;
