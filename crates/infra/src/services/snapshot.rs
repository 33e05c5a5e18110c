//! Generation-checked snapshot cache.
//!
//! Every write bumps the generation before it returns. A load records the
//! generation it started at and installs its result only if no write landed
//! in between, so a slow reader can never park a stale value in the slot.

use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug)]
pub(crate) struct SnapshotCache<T> {
    generation: AtomicU64,
    slot: RwLock<Option<(u64, Arc<T>)>>,
}

impl<T> Default for SnapshotCache<T> {
    fn default() -> Self {
        Self {
            generation: AtomicU64::new(0),
            slot: RwLock::new(None),
        }
    }
}

impl<T> SnapshotCache<T> {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Current value, loading it when the slot is empty or outdated.
    pub(crate) fn get_or_load<E>(&self, load: impl FnOnce() -> Result<T, E>) -> Result<Arc<T>, E> {
        let generation = self.generation.load(Ordering::Acquire);
        if let Some((cached_at, value)) = self
            .slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            if *cached_at == generation {
                return Ok(Arc::clone(value));
            }
        }

        let value = Arc::new(load()?);
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        if self.generation.load(Ordering::Acquire) == generation {
            *slot = Some((generation, Arc::clone(&value)));
        }
        Ok(value)
    }

    pub(crate) fn get_or_build(&self, build: impl FnOnce() -> T) -> Arc<T> {
        match self.get_or_load(|| Ok::<T, Infallible>(build())) {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }

    pub(crate) fn is_current(&self) -> bool {
        let generation = self.generation.load(Ordering::Acquire);
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|(cached_at, _)| *cached_at == generation)
    }

    /// Call after the underlying state changed.
    pub(crate) fn invalidate(&self) {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        self.generation.fetch_add(1, Ordering::AcqRel);
        *slot = None;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[test]
    fn second_read_is_served_from_the_slot() {
        let cache = SnapshotCache::new();
        let loads = AtomicUsize::new(0);
        let build = || {
            loads.fetch_add(1, Ordering::SeqCst);
            7
        };

        assert_eq!(*cache.get_or_build(build), 7);
        assert_eq!(*cache.get_or_build(build), 7);
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(cache.is_current());
    }

    #[test]
    fn load_overtaken_by_a_write_is_not_installed() {
        let cache = SnapshotCache::new();

        let stale = cache.get_or_build(|| {
            cache.invalidate();
            1
        });
        assert_eq!(*stale, 1);
        assert!(!cache.is_current());

        assert_eq!(*cache.get_or_build(|| 2), 2);
        assert!(cache.is_current());
    }

    #[test]
    fn failed_load_leaves_the_slot_empty() {
        let cache: SnapshotCache<u32> = SnapshotCache::new();
        assert_eq!(cache.get_or_load(|| Err::<u32, _>("down")).unwrap_err(), "down");
        assert!(!cache.is_current());
    }
}
