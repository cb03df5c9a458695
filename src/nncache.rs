//! Direct-mapped cache of evaluated positions.
//!
//! One slot per bucket, indexed by the low bits of the fingerprint. A write
//! replaces whatever is in the slot. Each slot has its own spinlock so cache
//! traffic never touches the evaluator's batch mutex.

use std::cell::UnsafeCell;
use std::hint;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::constants::MAX_CACHE_SIZE_POWER_OF_TWO;
use crate::error::{Error, Result};
use crate::hash::Hash128;
use crate::nnoutput::NNOutput;

struct Slot {
    locked: AtomicBool,
    entry: UnsafeCell<Option<Arc<NNOutput>>>,
}

/// Exclusive access to one slot; unlocks on drop.
struct SlotGuard<'a> {
    slot: &'a Slot,
}

impl Slot {
    fn new() -> Self {
        Slot { locked: AtomicBool::new(false), entry: UnsafeCell::new(None) }
    }

    fn lock(&self) -> SlotGuard<'_> {
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            while self.locked.load(Ordering::Relaxed) {
                hint::spin_loop();
            }
        }
        SlotGuard { slot: self }
    }
}

impl Deref for SlotGuard<'_> {
    type Target = Option<Arc<NNOutput>>;

    fn deref(&self) -> &Self::Target {
        // SAFETY: a guard exists only after `lock` won the `locked` flag with
        // Acquire, and the flag is released with Release only when the guard
        // drops. No other reference to the entry can be live meanwhile.
        unsafe { &*self.slot.entry.get() }
    }
}

impl DerefMut for SlotGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: as in `deref`. `&mut self` also rules out a shared borrow
        // through this same guard.
        unsafe { &mut *self.slot.entry.get() }
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.slot.locked.store(false, Ordering::Release);
    }
}

pub struct NNCacheTable {
    slots: Box<[Slot]>,
    mask: u64,
}

// SAFETY: the only unsynchronized field is each slot's `UnsafeCell`, and it
// is reached only through a `SlotGuard`, which serializes access per slot.
// `Arc<NNOutput>` is itself `Send + Sync`.
unsafe impl Sync for NNCacheTable {}

impl NNCacheTable {
    /// Create a table with `2^size_power_of_two` slots.
    pub fn new(size_power_of_two: u32) -> Result<Self> {
        if size_power_of_two > MAX_CACHE_SIZE_POWER_OF_TWO {
            return Err(Error::Configuration(format!(
                "nn cache size power of two {size_power_of_two} exceeds {MAX_CACHE_SIZE_POWER_OF_TWO}"
            )));
        }
        let size = 1usize << size_power_of_two;
        let slots = (0..size).map(|_| Slot::new()).collect::<Vec<_>>().into_boxed_slice();
        Ok(NNCacheTable { slots, mask: (size as u64) - 1 })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn slot(&self, hash: Hash128) -> &Slot {
        &self.slots[(hash.hash0 & self.mask) as usize]
    }

    /// Cached result for `hash`, if the slot holds exactly that fingerprint.
    pub fn get(&self, hash: Hash128) -> Option<Arc<NNOutput>> {
        let guard = self.slot(hash).lock();
        guard.as_ref().filter(|out| out.nn_hash == hash).cloned()
    }

    /// Store `output` under its own fingerprint, replacing the slot.
    pub fn set(&self, output: Arc<NNOutput>) {
        let hash = output.nn_hash;
        let old = {
            let mut guard = self.slot(hash).lock();
            guard.replace(output)
        };
        // The displaced entry is released outside the lock.
        drop(old);
    }

    pub fn clear(&self) {
        for slot in self.slots.iter() {
            let old = slot.lock().take();
            drop(old);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn output_with_hash(hash: Hash128, value: f32) -> Arc<NNOutput> {
        let mut out = NNOutput::new(3, false);
        out.nn_hash = hash;
        out.white_win_prob = value;
        Arc::new(out)
    }

    #[test]
    fn test_get_set_clear() {
        let cache = NNCacheTable::new(4).unwrap();
        assert_eq!(cache.len(), 16);
        let h = Hash128::new(5, 99);
        assert!(cache.get(h).is_none());
        cache.set(output_with_hash(h, 0.25));
        assert_eq!(cache.get(h).unwrap().white_win_prob, 0.25);
        cache.clear();
        assert!(cache.get(h).is_none());
    }

    #[test]
    fn test_collision_rejected_and_last_write_wins() {
        let cache = NNCacheTable::new(4).unwrap();
        let a = Hash128::new(3, 1);
        let b = Hash128::new(3 + 16, 2);
        cache.set(output_with_hash(a, 0.1));
        assert!(cache.get(b).is_none(), "same slot, different fingerprint");
        cache.set(output_with_hash(b, 0.2));
        assert!(cache.get(a).is_none());
        assert_eq!(cache.get(b).unwrap().white_win_prob, 0.2);
    }

    #[test]
    fn test_size_limits() {
        assert!(NNCacheTable::new(MAX_CACHE_SIZE_POWER_OF_TWO + 1).is_err());
        assert_eq!(NNCacheTable::new(0).unwrap().len(), 1);
    }

    #[test]
    fn test_single_slot_under_contention() {
        let cache = Arc::new(NNCacheTable::new(0).unwrap());
        let handles: Vec<_> = (0..8u64)
            .map(|t| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    let mine = Hash128::new(t, t * 7 + 1);
                    for i in 0..5000u64 {
                        if i % 3 == 0 {
                            cache.set(output_with_hash(mine, t as f32));
                        } else if let Some(out) = cache.get(mine) {
                            assert_eq!(out.white_win_prob, t as f32);
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let stored = (0..8u64).filter_map(|t| cache.get(Hash128::new(t, t * 7 + 1))).count();
        assert_eq!(stored, 1, "one slot holds exactly one entry");
    }

    #[test]
    fn test_concurrent_readers_see_whole_entries() {
        let cache = Arc::new(NNCacheTable::new(2).unwrap());
        let handles: Vec<_> = (0..4u64)
            .map(|t| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for i in 0..2000u64 {
                        let h = Hash128::new(i, t);
                        cache.set(output_with_hash(h, t as f32));
                        if let Some(out) = cache.get(h) {
                            assert_eq!(out.nn_hash, h);
                            assert_eq!(out.white_win_prob, t as f32);
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }
}
