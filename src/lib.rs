//! # graphrag
//!
//! Graph-augmented retrieval question answering service.
//!
//! Given a natural-language question, graphrag returns a generated answer
//! together with supporting sources, graph entities, and graph relations.
//! Given a document, it extracts entities and relations with a generative
//! model and persists them into a property graph, linking each extracted
//! entity to its document via a `CONTAINS` edge.
//!
//! ## Architecture
//!
//! ```text
//! question ──▶ Orchestrator ──▶ result cache
//!                  │ miss
//!                  ├──▶ RetrievalService (vector search + generator, cached)
//!                  ├──▶ graph enhancement (entity search + neighbor fan-out)
//!                  └──▶ fuse, re-rank, truncate, cache
//!
//! document ──▶ GraphBuilder ──▶ EntityExtractor ──▶ GraphStore
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use graphrag::models::Entity;
//! use graphrag::storage::{GraphStore, InMemoryGraphStore};
//!
//! let store = InMemoryGraphStore::new();
//! let entity = Entity::new("Concept", "long-term care");
//! store.add_entity(&entity).await?;
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

use thiserror::Error as ThisError;

// Module declarations
pub mod api;
pub mod config;
pub mod llm;
pub mod models;
pub mod observability;
pub mod services;
pub mod storage;

// Re-exports for convenience
pub use config::AppConfig;
pub use llm::{Generator, GeneratorService};
pub use models::{Direction, Entity, GraphSnapshot, GraphStatistics, Relation};
pub use services::{
    CacheService, EntityExtractor, GraphBuilder, InMemoryVectorIndex, Orchestrator,
    RetrievalService, VectorIndex,
};
pub use storage::{GraphStore, InMemoryGraphStore, SqliteGraphStore};

/// Error type for graphrag operations.
///
/// Uses `thiserror` for automatic `Display` and `Error` trait implementations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidInput` | Request schema violations, empty queries, oversized content |
/// | `Unauthorized` | Missing or wrong shared-secret header on admin endpoints |
/// | `RateLimited` | Generator provider returned a 429 (retried once, then degraded) |
/// | `Upstream` | Generator provider timeout or 5xx after retry budget |
/// | `OperationFailed` | `SQLite` errors, I/O errors, cache or index failures |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    ///
    /// Raised when:
    /// - A query is empty or exceeds the length limit
    /// - Ingest content is empty or exceeds 1,000,000 characters
    /// - An unknown entity type is requested
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Authentication failed.
    ///
    /// Raised when the shared-secret header is missing or does not match.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// A generator provider signalled a rate limit.
    ///
    /// Carries the server-suggested delay when one could be parsed.
    #[error("rate limited by '{provider}' (retry after {retry_after_secs}s)")]
    RateLimited {
        /// The provider that rejected the request.
        provider: String,
        /// Suggested delay before retrying, in seconds.
        retry_after_secs: u64,
    },

    /// A generator provider is unavailable.
    ///
    /// Raised on timeouts, connection failures, and non-429 error statuses.
    /// Callers degrade to the provider's stub mode.
    #[error("upstream '{provider}' unavailable: {cause}")]
    Upstream {
        /// The provider that failed.
        provider: String,
        /// The underlying cause.
        cause: String,
    },

    /// An operation failed.
    ///
    /// Raised when:
    /// - `SQLite` graph store operations fail
    /// - Cache serialization fails
    /// - The vector index rejects a document
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },
}

impl Error {
    /// Builds an `OperationFailed` error with a named operation.
    pub fn op(operation: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::OperationFailed {
            operation: operation.into(),
            cause: cause.to_string(),
        }
    }
}

/// Result type alias for graphrag operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidInput("query is empty".to_string());
        assert_eq!(err.to_string(), "invalid input: query is empty");

        let err = Error::op("add_entity", "disk full");
        assert_eq!(err.to_string(), "operation 'add_entity' failed: disk full");

        let err = Error::Unauthorized("missing api key".to_string());
        assert_eq!(err.to_string(), "unauthorized: missing api key");
    }

    #[test]
    fn test_rate_limited_display() {
        let err = Error::RateLimited {
            provider: "gemini".to_string(),
            retry_after_secs: 5,
        };
        assert!(err.to_string().contains("gemini"));
        assert!(err.to_string().contains("5s"));
    }
}
