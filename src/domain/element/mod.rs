//! Structural elements - stream records, enrichment and the in-memory index.

mod element;
mod store;

pub use element::{Element, ElementCost, StreamRecord};
pub use store::ElementStore;

#[cfg(test)]
pub(crate) use element::test_support;
