//! # Semaphore Pool
//!
//! Slot storage for semaphore objects and the (owner, name) lookup index.
//!
//! ## Features
//!
//! - First-free slot allocation with amortized doubling growth
//! - All-or-nothing growth: a failed grow leaves the pool untouched
//! - Optional fixed-capacity configuration
//!
//! Slots are found by linear scan; the live-object count per kernel
//! instance stays small.

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use static_assertions::const_assert;

use crate::sched::EnvId;
use crate::{SyncError, SyncResult};

/// Maximum length of a semaphore name, in bytes.
pub const MAX_NAME_LEN: usize = 64;

/// Number of slots a pool starts with unless configured otherwise.
pub const DEFAULT_CAPACITY: usize = 8;

const_assert!(MAX_NAME_LEN > 0);
const_assert!(DEFAULT_CAPACITY > 0);

/// Bounded semaphore name.
pub type SemName = heapless::String<MAX_NAME_LEN>;

/// Stable handle to a pool slot.
///
/// The index stays valid for the whole lifetime of the semaphore it was
/// returned for; growth never relocates handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SemaphoreId(usize);

impl SemaphoreId {
    /// Slot index behind this handle.
    pub const fn index(self) -> usize {
        self.0
    }
}

// =============================================================================
// Semaphore Slot
// =============================================================================

/// One semaphore object.
///
/// Invariant for occupied slots: `waiters.len() == max(0, -value)`. Free
/// slots always carry `value == 0` and an empty waiter queue.
#[derive(Debug)]
pub struct Semaphore {
    /// Environment that created this semaphore
    pub(crate) owner: EnvId,
    /// Unique within the owner's set, not globally
    pub(crate) name: SemName,
    /// Signed counter; `-value` is the queue length when negative
    pub(crate) value: i32,
    /// Blocked environments, FIFO
    pub(crate) waiters: VecDeque<EnvId>,
    occupied: bool,
}

impl Semaphore {
    fn vacant() -> Self {
        Self {
            owner: EnvId(0),
            name: SemName::new(),
            value: 0,
            waiters: VecDeque::new(),
            occupied: false,
        }
    }

    fn reset(&mut self) {
        self.owner = EnvId(0);
        self.name.clear();
        self.value = 0;
        self.waiters.clear();
        self.occupied = false;
    }

    /// Environment that created this semaphore.
    pub fn owner(&self) -> EnvId {
        self.owner
    }

    /// Semaphore name.
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Current counter value.
    pub fn value(&self) -> i32 {
        self.value
    }

    /// Number of environments blocked on this semaphore.
    pub fn waiter_count(&self) -> usize {
        self.waiters.len()
    }
}

// =============================================================================
// Pool Configuration
// =============================================================================

/// Pool configuration parameters
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of slots allocated up front
    pub initial_capacity: usize,
    /// Whether the pool may grow by doubling once full; when `false`, an
    /// allocation against a full table fails with `NoCapacity`
    pub growth: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial_capacity: DEFAULT_CAPACITY,
            growth: true,
        }
    }
}

// =============================================================================
// Semaphore Pool
// =============================================================================

/// Slot storage for semaphore objects.
#[derive(Debug)]
pub struct SemaphorePool {
    slots: Vec<Semaphore>,
    growth: bool,
}

impl SemaphorePool {
    /// Create a pool with `config.initial_capacity` free slots.
    ///
    /// # Panics
    ///
    /// Panics if the initial table cannot be allocated. There is no
    /// synchronization subsystem without a pool, so this is fatal.
    pub fn new(config: &PoolConfig) -> Self {
        let mut slots = Vec::new();
        if slots.try_reserve_exact(config.initial_capacity).is_err() {
            panic!(
                "SemaphorePool: out of memory allocating {} slots",
                config.initial_capacity
            );
        }
        for _ in 0..config.initial_capacity {
            slots.push(Semaphore::vacant());
        }
        Self {
            slots,
            growth: config.growth,
        }
    }

    /// Total number of slots, occupied or free.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots.
    pub fn occupied_count(&self) -> usize {
        self.slots.iter().filter(|s| s.occupied).count()
    }

    /// Whether growth on exhaustion is enabled.
    pub fn growth_enabled(&self) -> bool {
        self.growth
    }

    /// Occupy the first free slot, growing the table if permitted.
    ///
    /// The returned slot always starts with `value == 0` and no waiters.
    pub fn allocate(&mut self) -> SyncResult<SemaphoreId> {
        let idx = match self.slots.iter().position(|s| !s.occupied) {
            Some(idx) => idx,
            None if self.growth => self.grow()?,
            None => return Err(SyncError::NoCapacity),
        };
        self.slots[idx].occupied = true;
        Ok(SemaphoreId(idx))
    }

    // Doubles the table, returning the first new index. All-or-nothing: if
    // the allocator refuses, the existing slots are untouched.
    fn grow(&mut self) -> SyncResult<usize> {
        let first_new = self.slots.len();
        let additional = first_new.max(1);
        self.slots
            .try_reserve_exact(additional)
            .map_err(|_| SyncError::NoCapacity)?;
        for _ in 0..additional {
            self.slots.push(Semaphore::vacant());
        }
        log::debug!("SemaphorePool: grew to {} slots", self.slots.len());
        Ok(first_new)
    }

    /// Release a slot back to the free state.
    ///
    /// Fails with `NotExists` if the handle is out of range or the slot is
    /// already free.
    pub fn free(&mut self, id: SemaphoreId) -> SyncResult<()> {
        let slot = self.slots.get_mut(id.0).ok_or(SyncError::NotExists)?;
        if !slot.occupied {
            return Err(SyncError::NotExists);
        }
        slot.reset();
        Ok(())
    }

    /// Resolve `(owner, name)` to a handle.
    ///
    /// Linear scan over occupied slots; free slots are skipped without
    /// reading their stale contents. The per-owner uniqueness invariant
    /// guarantees at most one match.
    pub fn lookup(&self, owner: EnvId, name: &str) -> SyncResult<SemaphoreId> {
        self.slots
            .iter()
            .position(|s| s.occupied && s.owner == owner && s.name.as_str() == name)
            .map(SemaphoreId)
            .ok_or(SyncError::NotExists)
    }

    /// Borrow an occupied slot.
    pub fn slot(&self, id: SemaphoreId) -> SyncResult<&Semaphore> {
        match self.slots.get(id.0) {
            Some(slot) if slot.occupied => Ok(slot),
            _ => Err(SyncError::NotExists),
        }
    }

    /// Borrow an occupied slot mutably.
    pub fn slot_mut(&mut self, id: SemaphoreId) -> SyncResult<&mut Semaphore> {
        match self.slots.get_mut(id.0) {
            Some(slot) if slot.occupied => Ok(slot),
            _ => Err(SyncError::NotExists),
        }
    }

    /// Iterate over the occupied slots.
    pub fn occupied(&self) -> impl Iterator<Item = (SemaphoreId, &Semaphore)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.occupied)
            .map(|(i, s)| (SemaphoreId(i), s))
    }

    pub(crate) fn occupied_mut(&mut self) -> impl Iterator<Item = (SemaphoreId, &mut Semaphore)> + '_ {
        self.slots
            .iter_mut()
            .enumerate()
            .filter(|(_, s)| s.occupied)
            .map(|(i, s)| (SemaphoreId(i), s))
    }
}
