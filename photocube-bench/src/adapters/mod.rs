//! Database adapter modules.

pub mod neo4j_adapter;
pub mod postgres_adapter;
