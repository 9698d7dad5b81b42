//! Fixed-capacity handle pool with generation-checked keys.
//!
//! Slots are allocated up front. [`HandlePool::acquire`] pops a slot off the
//! free list and stores the caller's value in it; [`HandlePool::release`]
//! takes the value back out and bumps the slot generation, so a key that was
//! already released can never reach the slot's next occupant. The free list
//! is guarded by a mutex that is held only for the list operation itself.

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Stable identifier of an occupied pool slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotKey {
    index: u32,
    generation: u32,
}

impl SlotKey {
    /// Slot index inside the pool.
    pub fn index(&self) -> usize {
        self.index as usize
    }

    /// Generation the slot had when this key was issued.
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

/// Errors returned by [`HandlePool::release`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// The key was already released, or belongs to another pool.
    #[error("stale pool key (slot {index}, generation {generation})")]
    StaleKey {
        /// Slot index carried by the key.
        index: usize,
        /// Generation carried by the key.
        generation: u32,
    },
}

/// Usage figures for one pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolInfo {
    /// Pool name used in reports.
    pub name: &'static str,
    /// Slots allocated up front.
    pub capacity: usize,
    /// Slots currently occupied.
    pub in_use: usize,
    /// Highest simultaneous occupancy seen.
    pub peak: usize,
    /// Slots appended beyond `capacity` because growth is enabled.
    pub grown: usize,
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

struct Slots<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    in_use: usize,
    peak: usize,
}

/// Lock-protected arena of reusable handle slots.
pub struct HandlePool<T> {
    name: &'static str,
    capacity: usize,
    grow: bool,
    inner: Mutex<Slots<T>>,
}

impl<T> HandlePool<T> {
    /// Create a pool with `capacity` pre-allocated slots.
    ///
    /// With `grow` set, an exhausted pool appends a slot instead of failing.
    pub fn new(name: &'static str, capacity: usize, grow: bool) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || Slot {
            generation: 0,
            value: None,
        });
        // Reversed so the lowest index is handed out first.
        let free = (0..capacity as u32).rev().collect();
        Self {
            name,
            capacity,
            grow,
            inner: Mutex::new(Slots {
                slots,
                free,
                in_use: 0,
                peak: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slots<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pool name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Store `value` in a free slot.
    ///
    /// Returns `Err(value)` when the pool is exhausted so the caller can tear
    /// the value down itself.
    pub fn acquire(&self, value: T) -> Result<SlotKey, T> {
        let mut inner = self.lock();
        let index = match inner.free.pop() {
            Some(index) => index,
            None if self.grow => {
                let index = inner.slots.len() as u32;
                inner.slots.push(Slot {
                    generation: 0,
                    value: None,
                });
                index
            }
            None => return Err(value),
        };

        let slot = &mut inner.slots[index as usize];
        slot.value = Some(value);
        let generation = slot.generation;
        inner.in_use += 1;
        inner.peak = inner.peak.max(inner.in_use);
        Ok(SlotKey { index, generation })
    }

    /// Take the value out of the slot named by `key` and return the slot to the free list.
    pub fn release(&self, key: SlotKey) -> Result<T, PoolError> {
        let stale = PoolError::StaleKey {
            index: key.index(),
            generation: key.generation,
        };
        let mut inner = self.lock();
        let Some(slot) = inner.slots.get_mut(key.index()) else {
            return Err(stale);
        };
        if slot.generation != key.generation {
            return Err(stale);
        }
        let Some(value) = slot.value.take() else {
            return Err(stale);
        };
        slot.generation = slot.generation.wrapping_add(1);
        inner.free.push(key.index);
        inner.in_use -= 1;
        Ok(value)
    }

    /// Whether `key` still names an occupied slot.
    pub fn contains(&self, key: SlotKey) -> bool {
        let inner = self.lock();
        inner
            .slots
            .get(key.index())
            .is_some_and(|slot| slot.generation == key.generation && slot.value.is_some())
    }

    /// Number of occupied slots.
    pub fn in_use(&self) -> usize {
        self.lock().in_use
    }

    /// Snapshot of usage figures.
    pub fn info(&self) -> PoolInfo {
        let inner = self.lock();
        PoolInfo {
            name: self.name,
            capacity: self.capacity,
            in_use: inner.in_use,
            peak: inner.peak,
            grown: inner.slots.len().saturating_sub(self.capacity),
        }
    }
}

impl<T: Clone> HandlePool<T> {
    /// Clone of the value stored under `key`, if the key is live.
    pub fn get(&self, key: SlotKey) -> Option<T> {
        let inner = self.lock();
        inner
            .slots
            .get(key.index())
            .filter(|slot| slot.generation == key.generation)
            .and_then(|slot| slot.value.clone())
    }

    /// Clones of every occupied slot's value, taken under a single lock.
    pub fn live(&self) -> Vec<T> {
        let inner = self.lock();
        inner
            .slots
            .iter()
            .filter_map(|slot| slot.value.clone())
            .collect()
    }
}

impl std::fmt::Display for PoolInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "{}: capacity {}, in use {}, free {}, peak {}, grown {}",
            self.name,
            self.capacity,
            self.in_use,
            (self.capacity + self.grown).saturating_sub(self.in_use),
            self.peak,
            self.grown
        )
    }
}
