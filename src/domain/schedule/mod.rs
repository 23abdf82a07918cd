//! Cost schedule - uploaded unit costs per classification code.

mod entry;
mod store;

pub use entry::{CostScheduleEntry, ScheduleSource};
pub use store::CostScheduleStore;

#[cfg(test)]
pub(crate) use store::test_support;
