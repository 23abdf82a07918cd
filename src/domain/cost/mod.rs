//! Cost computation - per-element totals, project aggregates and the
//! batch match cache.

mod aggregator;
mod cache;

pub use aggregator::{CostAggregator, CostElementRecord, ProjectAggregate};
pub use cache::{BatchMatch, CodeMatch, MatchCache, DEFAULT_MATCH_CACHE_TTL};

/// Total cost of an element: unit cost times quantity.
pub fn element_total(unit_cost: f64, quantity: f64) -> f64 {
    unit_cost * quantity
}
