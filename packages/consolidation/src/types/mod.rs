//! Data types for the consolidation library.

pub mod config;
pub mod document;
pub mod topic;
