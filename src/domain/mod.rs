//! Domain layer containing the matching and costing logic.
//!
//! # Module Organization
//!
//! - `foundation` - Shared primitives (IDs, timestamps, errors)
//! - `classification` - Code normalization and tiered schedule matching
//! - `schedule` - Uploaded cost schedule entries and their store
//! - `element` - Structural elements and the in-memory element index
//! - `cost` - Per-element totals, project aggregates, the batch match cache

pub mod classification;
pub mod cost;
pub mod element;
pub mod foundation;
pub mod schedule;
