//! Element Cost Relay - live cost enrichment for structural elements
//!
//! Consumes element records from an event stream, matches their
//! classification codes against an uploaded cost schedule, keeps
//! deduplicated per-project totals, and relays everything to WebSocket
//! subscribers.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
