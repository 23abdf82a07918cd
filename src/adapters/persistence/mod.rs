//! Persistence adapters - document store implementations.
//!
//! - `InMemoryPersistence` - For tests and local runs without a database
//! - `PostgresPersistence` - JSONB documents in PostgreSQL

mod in_memory;
mod postgres;

pub use in_memory::InMemoryPersistence;
pub use postgres::PostgresPersistence;
