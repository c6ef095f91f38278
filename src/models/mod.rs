//! Data model types shared across the service.

pub mod graph;
pub mod query;

pub use graph::{
    Direction, Entity, GraphSnapshot, GraphStatistics, Relation, CONTAINS_RELATION,
    DOCUMENT_ENTITY_TYPE, KNOWN_ENTITY_TYPES,
};
pub use query::{BatchIngestReport, IngestReport, QueryOutcome, RetrievalOutcome, Source};
