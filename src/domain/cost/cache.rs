//! Time-boxed memoization of the batch match over all element codes.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::domain::classification::{find_match, MatchResult, NormalizedCode};
use crate::domain::element::ElementStore;
use crate::domain::foundation::Timestamp;
use crate::domain::schedule::CostScheduleStore;

pub const DEFAULT_MATCH_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Match found for one distinct element code.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeMatch {
    pub code: NormalizedCode,
    pub result: MatchResult,
    pub element_count: usize,
}

/// Result of matching every distinct element code against one schedule.
#[derive(Debug, Clone)]
pub struct BatchMatch {
    pub matches: BTreeMap<NormalizedCode, CodeMatch>,
    pub unmatched: Vec<NormalizedCode>,
    pub computed_at: Timestamp,
}

impl BatchMatch {
    pub fn compute(elements: &ElementStore, schedule: &CostScheduleStore) -> Self {
        let mut matches = BTreeMap::new();
        let mut unmatched = Vec::new();

        for (code, element_count) in elements.code_counts() {
            match find_match(&code, schedule) {
                Some(result) => {
                    matches.insert(
                        code.clone(),
                        CodeMatch {
                            code,
                            result,
                            element_count,
                        },
                    );
                }
                None => unmatched.push(code),
            }
        }

        Self {
            matches,
            unmatched,
            computed_at: Timestamp::now(),
        }
    }

    pub fn get(&self, code: &NormalizedCode) -> Option<&CodeMatch> {
        self.matches.get(code)
    }

    pub fn matched_element_count(&self) -> usize {
        self.matches.values().map(|m| m.element_count).sum()
    }
}

/// Single-slot cache for [`BatchMatch`].
///
/// Owned by the coordinator task, so no interior locking.
#[derive(Debug)]
pub struct MatchCache {
    ttl: Duration,
    slot: Option<(Instant, Arc<BatchMatch>)>,
    computations: u64,
}

impl MatchCache {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_MATCH_CACHE_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: None,
            computations: 0,
        }
    }

    /// Returns the cached batch, recomputing when forced, empty or expired.
    pub fn get(
        &mut self,
        force: bool,
        elements: &ElementStore,
        schedule: &CostScheduleStore,
    ) -> Arc<BatchMatch> {
        if !force {
            if let Some((stored_at, batch)) = &self.slot {
                if stored_at.elapsed() < self.ttl {
                    return Arc::clone(batch);
                }
            }
        }

        let batch = Arc::new(BatchMatch::compute(elements, schedule));
        self.computations += 1;
        self.slot = Some((Instant::now(), Arc::clone(&batch)));
        tracing::debug!(
            matched = batch.matches.len(),
            unmatched = batch.unmatched.len(),
            computations = self.computations,
            "Batch match recomputed"
        );
        batch
    }

    pub fn invalidate(&mut self) {
        self.slot = None;
    }

    /// How many times the batch has been recomputed.
    pub fn computations(&self) -> u64 {
        self.computations
    }
}

impl Default for MatchCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::classification::MatchMethod;
    use crate::domain::element::test_support::element;
    use crate::domain::schedule::test_support::schedule;

    fn fixtures() -> (ElementStore, CostScheduleStore) {
        let mut elements = ElementStore::new();
        elements.insert_if_new(element("e-1", "P", "C2.1", 1.0));
        elements.insert_if_new(element("e-2", "P", "C02.1", 2.0));
        elements.insert_if_new(element("e-3", "P", "X9", 1.0));
        (elements, schedule(&[("C2.1", 10.0)]))
    }

    #[test]
    fn batch_groups_elements_by_code() {
        let (elements, schedule) = fixtures();

        let batch = BatchMatch::compute(&elements, &schedule);

        let code = NormalizedCode::parse("C2.1").unwrap();
        let matched = batch.get(&code).unwrap();
        assert_eq!(matched.element_count, 2);
        assert_eq!(matched.result.method(), MatchMethod::Direct);
        assert_eq!(batch.unmatched.len(), 1);
        assert_eq!(batch.matched_element_count(), 2);
    }

    #[test]
    fn second_get_within_ttl_returns_cached_value() {
        let (elements, schedule) = fixtures();
        let mut cache = MatchCache::new();

        let first = cache.get(false, &elements, &schedule);
        let second = cache.get(false, &elements, &schedule);

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.computations(), 1);
    }

    #[test]
    fn force_recomputes() {
        let (elements, schedule) = fixtures();
        let mut cache = MatchCache::new();

        let first = cache.get(false, &elements, &schedule);
        let forced = cache.get(true, &elements, &schedule);

        assert!(!Arc::ptr_eq(&first, &forced));
        assert_eq!(cache.computations(), 2);
    }

    #[test]
    fn invalidate_drops_the_slot() {
        let (elements, schedule) = fixtures();
        let mut cache = MatchCache::new();

        cache.get(false, &elements, &schedule);
        cache.invalidate();
        cache.get(false, &elements, &schedule);

        assert_eq!(cache.computations(), 2);
    }

    #[test]
    fn expired_value_is_recomputed() {
        let (elements, schedule) = fixtures();
        let mut cache = MatchCache::with_ttl(Duration::ZERO);

        cache.get(false, &elements, &schedule);
        cache.get(false, &elements, &schedule);

        assert_eq!(cache.computations(), 2);
    }
}
