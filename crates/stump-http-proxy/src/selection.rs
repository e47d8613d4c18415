//! Response selection for stumps with multiple canned responses.

use crate::stump::{ResponseSpec, SelectionPolicy};
use parking_lot::{Mutex, RwLock, RwLockWriteGuard};
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Picks which of a stump's responses to return on each invocation.
///
/// Sequential cursors are shared per stump across concurrent callers; an
/// atomic increment keeps the cursor uncorrupted under contention, though
/// which racing caller observes which index is unspecified.
pub struct ResponseSelector {
    cursors: RwLock<HashMap<String, Arc<AtomicUsize>>>,
    rng: Mutex<Box<dyn RngCore + Send>>,
}

impl ResponseSelector {
    pub fn new() -> Self {
        Self::with_rng(Box::new(StdRng::from_entropy()))
    }

    /// Use an explicit random source; seeded in tests for determinism.
    pub fn with_rng(rng: Box<dyn RngCore + Send>) -> Self {
        Self {
            cursors: RwLock::new(HashMap::new()),
            rng: Mutex::new(rng),
        }
    }

    /// Select a response for `stump_id` under `policy`. Returns `None` only
    /// when the stump owns no responses.
    pub fn select<'a>(
        &self,
        stump_id: &str,
        policy: SelectionPolicy,
        responses: &'a [ResponseSpec],
    ) -> Option<&'a ResponseSpec> {
        match responses.len() {
            0 => None,
            1 => responses.first(),
            count => {
                let index = match policy {
                    SelectionPolicy::Sequential => self.next_sequential(stump_id, count),
                    SelectionPolicy::Random => self.rng.lock().gen_range(0..count),
                };
                responses.get(index)
            }
        }
    }

    fn next_sequential(&self, stump_id: &str, count: usize) -> usize {
        let cursor = self.cursor(stump_id);
        cursor.fetch_add(1, Ordering::Relaxed) % count
    }

    /// Fetch or create the cursor for a stump. Reads take the shared lock;
    /// first use upgrades to a write lock and downgrades after insertion.
    fn cursor(&self, stump_id: &str) -> Arc<AtomicUsize> {
        let cursors = self.cursors.read();
        if let Some(cursor) = cursors.get(stump_id) {
            return Arc::clone(cursor);
        }
        drop(cursors);

        let mut write = self.cursors.write();
        write.entry(stump_id.to_string()).or_default();
        let read = RwLockWriteGuard::downgrade(write);
        Arc::clone(
            read.get(stump_id)
                .expect("cursor inserted under the same lock"),
        )
    }

    /// Restart a stump's sequential rotation.
    pub fn reset(&self, stump_id: &str) {
        if let Some(cursor) = self.cursors.read().get(stump_id) {
            cursor.store(0, Ordering::Relaxed);
        }
    }

    /// Discard cursor state for a deleted stump.
    pub fn forget(&self, stump_id: &str) {
        self.cursors.write().remove(stump_id);
    }
}

impl Default for ResponseSelector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn responses(count: usize) -> Vec<ResponseSpec> {
        (0..count)
            .map(|i| ResponseSpec::with_body(200, format!("response-{i}")))
            .collect()
    }

    fn body<'a>(spec: Option<&'a ResponseSpec>) -> &'a [u8] {
        &spec.unwrap().body
    }

    #[test]
    fn test_single_response_always_returned() {
        let selector = ResponseSelector::new();
        let specs = responses(1);
        for _ in 0..5 {
            assert_eq!(
                body(selector.select("s1", SelectionPolicy::Random, &specs)),
                b"response-0"
            );
        }
    }

    #[test]
    fn test_sequential_cycles_in_registration_order() {
        let selector = ResponseSelector::new();
        let specs = responses(3);
        let picked: Vec<_> = (0..7)
            .map(|_| {
                body(selector.select("s1", SelectionPolicy::Sequential, &specs)).to_vec()
            })
            .collect();
        assert_eq!(picked[0], b"response-0");
        assert_eq!(picked[1], b"response-1");
        assert_eq!(picked[2], b"response-2");
        assert_eq!(picked[3], b"response-0");
        assert_eq!(picked[6], b"response-0");
    }

    #[test]
    fn test_cursors_are_independent_per_stump() {
        let selector = ResponseSelector::new();
        let specs = responses(2);
        assert_eq!(
            body(selector.select("a", SelectionPolicy::Sequential, &specs)),
            b"response-0"
        );
        assert_eq!(
            body(selector.select("b", SelectionPolicy::Sequential, &specs)),
            b"response-0"
        );
        assert_eq!(
            body(selector.select("a", SelectionPolicy::Sequential, &specs)),
            b"response-1"
        );
    }

    #[test]
    fn test_random_selection_stays_in_bounds_and_varies() {
        let selector = ResponseSelector::with_rng(Box::new(StdRng::seed_from_u64(42)));
        let specs = responses(4);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..64 {
            let picked = body(selector.select("s1", SelectionPolicy::Random, &specs)).to_vec();
            seen.insert(picked);
        }
        assert!(seen.len() > 1, "seeded random selection never varied");
    }

    #[test]
    fn test_no_responses_yields_none() {
        let selector = ResponseSelector::new();
        assert!(selector
            .select("s1", SelectionPolicy::Sequential, &[])
            .is_none());
    }

    #[test]
    fn test_reset_restarts_rotation() {
        let selector = ResponseSelector::new();
        let specs = responses(3);
        selector.select("s1", SelectionPolicy::Sequential, &specs);
        selector.select("s1", SelectionPolicy::Sequential, &specs);
        selector.reset("s1");
        assert_eq!(
            body(selector.select("s1", SelectionPolicy::Sequential, &specs)),
            b"response-0"
        );
    }

    #[test]
    fn test_concurrent_sequential_selection_is_balanced() {
        let selector = Arc::new(ResponseSelector::new());
        let specs = Arc::new(responses(4));
        let counts = Arc::new(Mutex::new(HashMap::<Vec<u8>, usize>::new()));

        let threads: Vec<_> = (0..4)
            .map(|_| {
                let selector = Arc::clone(&selector);
                let specs = Arc::clone(&specs);
                let counts = Arc::clone(&counts);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let picked = selector
                            .select("s1", SelectionPolicy::Sequential, &specs)
                            .unwrap()
                            .body
                            .clone();
                        *counts.lock().entry(picked).or_default() += 1;
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        // 400 selections across 4 responses: an uncorrupted shared cursor
        // hands out each index exactly 100 times.
        let counts = counts.lock();
        assert_eq!(counts.len(), 4);
        for (_, count) in counts.iter() {
            assert_eq!(*count, 100);
        }
    }
}
