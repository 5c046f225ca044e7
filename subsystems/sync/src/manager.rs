//! # Semaphore Manager
//!
//! The create/wait/signal protocol over the slot pool, and the handoff to
//! the scheduler when environments block or wake.
//!
//! One manager is constructed at kernel initialization and owns the whole
//! pool behind a single lock; scheduler callbacks are made only after the
//! pool guard is dropped.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use crate::pool::{PoolConfig, SemName, SemaphoreId, SemaphorePool};
use crate::sched::{EnvId, EnvStatus, Scheduler};
use crate::{SyncError, SyncResult};

// =============================================================================
// Statistics
// =============================================================================

/// Snapshot of subsystem activity
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Semaphores currently live
    pub live: usize,
    /// Total slots in the pool
    pub capacity: usize,
    /// Semaphores created since init
    pub created: u64,
    /// Semaphores freed since init
    pub freed: u64,
    /// Wait operations completed
    pub waits: u64,
    /// Signal operations completed
    pub signals: u64,
    /// Waits that blocked the caller
    pub blocks: u64,
    /// Environments woken by signal
    pub wakes: u64,
}

// =============================================================================
// Semaphore Manager
// =============================================================================

/// The semaphore subsystem.
///
/// Owns the pool and the naming index; talks to the scheduler module when
/// environments block or wake. Constructed once at kernel initialization.
pub struct SemaphoreManager {
    /// The pool, behind the subsystem-wide lock
    pool: Mutex<SemaphorePool>,
    /// Scheduler collaborator
    sched: Arc<dyn Scheduler>,
    created: AtomicU64,
    freed: AtomicU64,
    waits: AtomicU64,
    signals: AtomicU64,
    blocks: AtomicU64,
    wakes: AtomicU64,
}

impl SemaphoreManager {
    /// Create the manager at kernel initialization.
    ///
    /// # Panics
    ///
    /// Panics if the initial pool table cannot be allocated; the kernel
    /// cannot run without its synchronization subsystem.
    pub fn new(config: &PoolConfig, sched: Arc<dyn Scheduler>) -> Self {
        Self {
            pool: Mutex::new(SemaphorePool::new(config)),
            sched,
            created: AtomicU64::new(0),
            freed: AtomicU64::new(0),
            waits: AtomicU64::new(0),
            signals: AtomicU64::new(0),
            blocks: AtomicU64::new(0),
            wakes: AtomicU64::new(0),
        }
    }

    /// Create a semaphore named `name` for `owner`, with the given initial
    /// counter value.
    ///
    /// Existence is checked before a pool slot is consumed; a duplicate
    /// `(owner, name)` fails with `AlreadyExists` without touching the
    /// pool.
    pub fn create(&self, owner: EnvId, name: &str, initial: i32) -> SyncResult<SemaphoreId> {
        let mut name_buf = SemName::new();
        name_buf
            .push_str(name)
            .map_err(|_| SyncError::NameTooLong)?;

        let mut pool = self.pool.lock();
        if pool.lookup(owner, name).is_ok() {
            return Err(SyncError::AlreadyExists);
        }
        let id = pool.allocate()?;
        let slot = pool.slot_mut(id)?;
        slot.owner = owner;
        slot.name = name_buf;
        slot.value = initial;
        drop(pool);

        self.created.fetch_add(1, Ordering::Relaxed);
        log::debug!("Semaphores: env {:?} created '{}' as {:?}", owner, name, id);
        Ok(id)
    }

    /// Resolve `(owner, name)` to a handle.
    pub fn lookup(&self, owner: EnvId, name: &str) -> SyncResult<SemaphoreId> {
        self.pool.lock().lookup(owner, name)
    }

    /// Decrement the semaphore, blocking `current` when the counter goes
    /// negative.
    ///
    /// `current` is the environment executing this call, supplied by the
    /// caller. On success the operation ends by handing control to the scheduler,
    /// whether or not it blocked; a blocked caller resumes only after a
    /// later signal readies it and the scheduler dispatches it again.
    ///
    /// An unresolved `(owner, name)` returns `NotExists` with no counter
    /// change and no scheduler call.
    pub fn wait(&self, owner: EnvId, name: &str, current: EnvId) -> SyncResult<()> {
        let mut pool = self.pool.lock();
        let id = pool.lookup(owner, name)?;
        let slot = pool.slot_mut(id)?;
        slot.value -= 1;
        let blocked = slot.value < 0;
        if blocked {
            slot.waiters.push_back(current);
        }
        debug_assert_eq!(slot.waiters.len() as i32, (-slot.value).max(0));
        drop(pool);

        self.waits.fetch_add(1, Ordering::Relaxed);
        if blocked {
            self.blocks.fetch_add(1, Ordering::Relaxed);
            log::debug!("Semaphores: env {:?} blocked on {:?}", current, id);
            self.sched.set_status(current, EnvStatus::Blocked);
        }
        self.sched.reschedule();
        Ok(())
    }

    /// Increment the semaphore, waking the earliest-blocked waiter if any.
    ///
    /// Never yields: the woken environment runs at the discretion of the
    /// scheduler's dispatch policy, not synchronously with this call. An
    /// unresolved `(owner, name)` returns `NotExists` with no mutation.
    pub fn signal(&self, owner: EnvId, name: &str) -> SyncResult<()> {
        let mut pool = self.pool.lock();
        let id = pool.lookup(owner, name)?;
        let slot = pool.slot_mut(id)?;
        slot.value += 1;
        let woken = if slot.value <= 0 {
            slot.waiters.pop_front()
        } else {
            None
        };
        debug_assert_eq!(slot.waiters.len() as i32, (-slot.value).max(0));
        drop(pool);

        self.signals.fetch_add(1, Ordering::Relaxed);
        if let Some(env) = woken {
            self.wakes.fetch_add(1, Ordering::Relaxed);
            log::debug!("Semaphores: env {:?} woken from {:?}", env, id);
            self.sched.set_status(env, EnvStatus::Ready);
            self.sched.enqueue_ready(env, self.sched.wake_tier());
        }
        Ok(())
    }

    /// Destroy a semaphore, releasing its slot for reuse.
    ///
    /// Environments still queued belong to the environment-lifecycle
    /// collaborator; finding any here is tolerated but logged.
    pub fn free(&self, id: SemaphoreId) -> SyncResult<()> {
        let mut pool = self.pool.lock();
        let leftover = pool.slot(id)?.waiter_count();
        if leftover > 0 {
            log::warn!("Semaphores: freeing {:?} with {} queued waiters", id, leftover);
        }
        pool.free(id)?;
        drop(pool);

        self.freed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Destroy every semaphore owned by `owner`, returning how many were
    /// freed.
    ///
    /// Environment-lifecycle hook for owner teardown.
    pub fn free_owner(&self, owner: EnvId) -> usize {
        let mut pool = self.pool.lock();
        let ids: Vec<SemaphoreId> = pool
            .occupied()
            .filter(|(_, s)| s.owner() == owner)
            .map(|(id, _)| id)
            .collect();
        let mut freed = 0;
        for id in &ids {
            if let Ok(slot) = pool.slot(*id) {
                if slot.waiter_count() > 0 {
                    log::warn!(
                        "Semaphores: freeing {:?} with {} queued waiters",
                        id,
                        slot.waiter_count()
                    );
                }
            }
            if pool.free(*id).is_ok() {
                freed += 1;
            }
        }
        drop(pool);

        if freed > 0 {
            self.freed.fetch_add(freed as u64, Ordering::Relaxed);
            log::debug!("Semaphores: freed {} semaphores of env {:?}", freed, owner);
        }
        freed
    }

    /// Remove a terminated environment from whichever waiter queue it
    /// occupies, restoring the counter to match the shortened queue.
    ///
    /// Environment-lifecycle hook for termination while blocked; prevents a
    /// later signal from waking a reference to a destroyed environment.
    /// Returns whether the environment was found queued.
    pub fn detach_waiter(&self, env: EnvId) -> bool {
        let mut pool = self.pool.lock();
        for (id, slot) in pool.occupied_mut() {
            if let Some(pos) = slot.waiters.iter().position(|w| *w == env) {
                let _ = slot.waiters.remove(pos);
                slot.value += 1;
                log::debug!("Semaphores: detached env {:?} from {:?}", env, id);
                return true;
            }
        }
        false
    }

    /// Current counter value of a semaphore.
    pub fn value(&self, id: SemaphoreId) -> SyncResult<i32> {
        Ok(self.pool.lock().slot(id)?.value())
    }

    /// Number of environments blocked on a semaphore.
    pub fn waiter_count(&self, id: SemaphoreId) -> SyncResult<usize> {
        Ok(self.pool.lock().slot(id)?.waiter_count())
    }

    /// Number of live semaphores.
    pub fn semaphore_count(&self) -> usize {
        self.pool.lock().occupied_count()
    }

    /// Total pool slots, occupied or free.
    pub fn capacity(&self) -> usize {
        self.pool.lock().capacity()
    }

    /// Get subsystem statistics
    pub fn stats(&self) -> SyncStats {
        let pool = self.pool.lock();
        SyncStats {
            live: pool.occupied_count(),
            capacity: pool.capacity(),
            created: self.created.load(Ordering::Relaxed),
            freed: self.freed.load(Ordering::Relaxed),
            waits: self.waits.load(Ordering::Relaxed),
            signals: self.signals.load(Ordering::Relaxed),
            blocks: self.blocks.load(Ordering::Relaxed),
            wakes: self.wakes.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for SemaphoreManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SemaphoreManager")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use alloc::format;
    use alloc::string::String;
    use core::sync::atomic::AtomicUsize;

    use crate::pool::MAX_NAME_LEN;
    use crate::sched::ReadyTier;

    use super::*;

    #[derive(Default)]
    struct TestSched {
        ready: Mutex<Vec<(EnvId, ReadyTier)>>,
        statuses: Mutex<Vec<(EnvId, EnvStatus)>>,
        reschedules: AtomicUsize,
    }

    impl Scheduler for TestSched {
        fn enqueue_ready(&self, env: EnvId, tier: ReadyTier) {
            self.ready.lock().push((env, tier));
        }

        fn set_status(&self, env: EnvId, status: EnvStatus) {
            self.statuses.lock().push((env, status));
        }

        fn reschedule(&self) {
            self.reschedules.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn manager() -> (SemaphoreManager, Arc<TestSched>) {
        let sched = Arc::new(TestSched::default());
        let mgr = SemaphoreManager::new(&PoolConfig::default(), sched.clone());
        (mgr, sched)
    }

    #[test]
    fn test_create_then_lookup() {
        let (mgr, _sched) = manager();
        let id = mgr.create(EnvId(1), "disk", 3).unwrap();
        assert_eq!(mgr.lookup(EnvId(1), "disk"), Ok(id));
        assert_eq!(mgr.value(id), Ok(3));
    }

    #[test]
    fn test_duplicate_create_consumes_one_slot() {
        let (mgr, _sched) = manager();
        mgr.create(EnvId(1), "disk", 1).unwrap();
        assert_eq!(
            mgr.create(EnvId(1), "disk", 1),
            Err(SyncError::AlreadyExists)
        );
        assert_eq!(mgr.semaphore_count(), 1);
    }

    #[test]
    fn test_same_name_under_different_owners() {
        let (mgr, _sched) = manager();
        let a = mgr.create(EnvId(1), "disk", 0).unwrap();
        let b = mgr.create(EnvId(2), "disk", 0).unwrap();
        assert_ne!(a, b);
        assert_eq!(mgr.semaphore_count(), 2);
    }

    #[test]
    fn test_name_too_long_is_rejected() {
        let (mgr, _sched) = manager();
        let long: String = "x".repeat(MAX_NAME_LEN + 1);
        assert_eq!(
            mgr.create(EnvId(1), &long, 0),
            Err(SyncError::NameTooLong)
        );
        assert_eq!(mgr.semaphore_count(), 0);
    }

    #[test]
    fn test_wait_counts_down_then_blocks() {
        let (mgr, sched) = manager();
        let id = mgr.create(EnvId(1), "disk", 2).unwrap();

        mgr.wait(EnvId(1), "disk", EnvId(10)).unwrap();
        mgr.wait(EnvId(1), "disk", EnvId(11)).unwrap();
        assert_eq!(mgr.value(id), Ok(0));
        assert_eq!(mgr.waiter_count(id), Ok(0));
        assert!(sched.statuses.lock().is_empty());
        assert_eq!(sched.reschedules.load(Ordering::Relaxed), 2);

        mgr.wait(EnvId(1), "disk", EnvId(12)).unwrap();
        assert_eq!(mgr.value(id), Ok(-1));
        assert_eq!(mgr.waiter_count(id), Ok(1));
        assert_eq!(
            sched.statuses.lock().as_slice(),
            &[(EnvId(12), EnvStatus::Blocked)]
        );
        assert_eq!(sched.reschedules.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_fifo_wake_order() {
        let (mgr, sched) = manager();
        let id = mgr.create(EnvId(1), "gate", 0).unwrap();

        mgr.wait(EnvId(1), "gate", EnvId(10)).unwrap();
        mgr.wait(EnvId(1), "gate", EnvId(11)).unwrap();
        assert_eq!(mgr.value(id), Ok(-2));

        mgr.signal(EnvId(1), "gate").unwrap();
        assert_eq!(mgr.value(id), Ok(-1));
        assert_eq!(
            sched.ready.lock().as_slice(),
            &[(EnvId(10), ReadyTier::HIGHEST)]
        );

        mgr.signal(EnvId(1), "gate").unwrap();
        assert_eq!(mgr.value(id), Ok(0));
        assert_eq!(mgr.waiter_count(id), Ok(0));
        assert_eq!(
            sched.ready.lock().as_slice(),
            &[
                (EnvId(10), ReadyTier::HIGHEST),
                (EnvId(11), ReadyTier::HIGHEST)
            ]
        );

        let statuses = sched.statuses.lock();
        assert_eq!(statuses[2], (EnvId(10), EnvStatus::Ready));
        assert_eq!(statuses[3], (EnvId(11), EnvStatus::Ready));
    }

    #[test]
    fn test_signal_above_zero_wakes_nobody() {
        let (mgr, sched) = manager();
        let id = mgr.create(EnvId(1), "gate", 1).unwrap();
        mgr.signal(EnvId(1), "gate").unwrap();
        assert_eq!(mgr.value(id), Ok(2));
        assert!(sched.ready.lock().is_empty());
    }

    #[test]
    fn test_wait_on_missing_semaphore_is_inert() {
        let (mgr, sched) = manager();
        assert_eq!(
            mgr.wait(EnvId(1), "ghost", EnvId(10)),
            Err(SyncError::NotExists)
        );
        assert_eq!(sched.reschedules.load(Ordering::Relaxed), 0);
        assert!(sched.statuses.lock().is_empty());
    }

    #[test]
    fn test_signal_on_missing_semaphore_is_inert() {
        let (mgr, sched) = manager();
        let id = mgr.create(EnvId(1), "disk", 1).unwrap();
        assert_eq!(mgr.signal(EnvId(2), "disk"), Err(SyncError::NotExists));
        assert_eq!(mgr.value(id), Ok(1));
        assert!(sched.ready.lock().is_empty());
        assert!(sched.statuses.lock().is_empty());
    }

    #[test]
    fn test_free_then_lookup_fails_and_slot_reused() {
        let (mgr, _sched) = manager();
        let id = mgr.create(EnvId(1), "disk", 0).unwrap();
        mgr.free(id).unwrap();
        assert_eq!(mgr.lookup(EnvId(1), "disk"), Err(SyncError::NotExists));
        assert_eq!(mgr.free(id), Err(SyncError::NotExists));

        let id2 = mgr.create(EnvId(1), "disk", 1).unwrap();
        assert_eq!(id2, id);
    }

    #[test]
    fn test_free_owner_frees_only_theirs() {
        let (mgr, _sched) = manager();
        mgr.create(EnvId(1), "a", 0).unwrap();
        mgr.create(EnvId(1), "b", 0).unwrap();
        mgr.create(EnvId(2), "a", 0).unwrap();

        assert_eq!(mgr.free_owner(EnvId(1)), 2);
        assert_eq!(mgr.semaphore_count(), 1);
        assert!(mgr.lookup(EnvId(2), "a").is_ok());
        assert_eq!(mgr.free_owner(EnvId(1)), 0);
    }

    #[test]
    fn test_detach_waiter_restores_invariant() {
        let (mgr, sched) = manager();
        let id = mgr.create(EnvId(1), "gate", 0).unwrap();
        mgr.wait(EnvId(1), "gate", EnvId(10)).unwrap();
        mgr.wait(EnvId(1), "gate", EnvId(11)).unwrap();

        assert!(mgr.detach_waiter(EnvId(10)));
        assert_eq!(mgr.value(id), Ok(-1));
        assert_eq!(mgr.waiter_count(id), Ok(1));
        assert!(!mgr.detach_waiter(EnvId(10)));

        mgr.signal(EnvId(1), "gate").unwrap();
        assert_eq!(
            sched.ready.lock().as_slice(),
            &[(EnvId(11), ReadyTier::HIGHEST)]
        );
    }

    #[test]
    fn test_pool_growth_through_create() {
        let sched = Arc::new(TestSched::default());
        let mgr = SemaphoreManager::new(
            &PoolConfig {
                initial_capacity: 2,
                growth: true,
            },
            sched,
        );
        for i in 0..3 {
            mgr.create(EnvId(1), &format!("s{}", i), 0).unwrap();
        }
        assert_eq!(mgr.capacity(), 4);
        assert_eq!(mgr.semaphore_count(), 3);
    }

    #[test]
    fn test_fixed_pool_exhaustion() {
        let sched = Arc::new(TestSched::default());
        let mgr = SemaphoreManager::new(
            &PoolConfig {
                initial_capacity: 1,
                growth: false,
            },
            sched,
        );
        mgr.create(EnvId(1), "a", 0).unwrap();
        assert_eq!(mgr.create(EnvId(1), "b", 0), Err(SyncError::NoCapacity));
    }

    #[test]
    fn test_wake_tier_comes_from_scheduler() {
        struct TieredSched(TestSched);

        impl Scheduler for TieredSched {
            fn enqueue_ready(&self, env: EnvId, tier: ReadyTier) {
                self.0.enqueue_ready(env, tier);
            }
            fn set_status(&self, env: EnvId, status: EnvStatus) {
                self.0.set_status(env, status);
            }
            fn reschedule(&self) {
                self.0.reschedule();
            }
            fn wake_tier(&self) -> ReadyTier {
                ReadyTier(3)
            }
        }

        let sched = Arc::new(TieredSched(TestSched::default()));
        let mgr = SemaphoreManager::new(&PoolConfig::default(), sched.clone());
        mgr.create(EnvId(1), "gate", 0).unwrap();
        mgr.wait(EnvId(1), "gate", EnvId(10)).unwrap();
        mgr.signal(EnvId(1), "gate").unwrap();
        assert_eq!(
            sched.0.ready.lock().as_slice(),
            &[(EnvId(10), ReadyTier(3))]
        );
    }

    #[test]
    fn test_stats_track_operations() {
        let (mgr, _sched) = manager();
        mgr.create(EnvId(1), "gate", 0).unwrap();
        mgr.wait(EnvId(1), "gate", EnvId(10)).unwrap();
        mgr.signal(EnvId(1), "gate").unwrap();

        let stats = mgr.stats();
        assert_eq!(stats.created, 1);
        assert_eq!(stats.waits, 1);
        assert_eq!(stats.blocks, 1);
        assert_eq!(stats.signals, 1);
        assert_eq!(stats.wakes, 1);
        assert_eq!(stats.live, 1);
        assert_eq!(stats.freed, 0);
    }
}
