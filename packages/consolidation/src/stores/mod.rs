//! Storage implementations for the consolidation library.
//!
//! Available backends:
//! - `MemoryStore` - In-memory storage (always available)
//! - `SqliteStore` - SQLite file-based storage (requires `sqlite` feature)
//! - `PostgresStore` - PostgreSQL + pgvector storage (requires `postgres` feature)

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::MemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;

/// Classify a database error.
///
/// Lost connections and pool exhaustion are worth retrying; everything
/// else (constraint violations, bad SQL, decode failures) is not.
#[cfg(any(feature = "sqlite", feature = "postgres"))]
pub(crate) fn map_sqlx(e: sqlx::Error) -> crate::error::ConsolidationError {
    use crate::error::ConsolidationError;

    match e {
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => ConsolidationError::StoreUnavailable(e.to_string()),
        other => ConsolidationError::storage(other),
    }
}

/// Encode an embedding as little-endian f32 bytes.
#[cfg(feature = "sqlite")]
pub(crate) fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Decode little-endian f32 bytes.
#[cfg(feature = "sqlite")]
pub(crate) fn embedding_from_bytes(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
