//! Service layer: caching, vector retrieval, extraction, graph building,
//! and query orchestration.

pub mod builder;
pub mod cache;
pub mod extraction;
pub mod orchestrator;
pub mod retrieval;
pub mod vector;

pub use builder::{DocumentInput, GraphBuilder};
pub use cache::{fingerprint_key, CacheService};
pub use extraction::EntityExtractor;
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use retrieval::RetrievalService;
pub use vector::{InMemoryVectorIndex, VectorDocument, VectorIndex};
