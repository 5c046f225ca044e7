//! # Scheduler Interface
//!
//! The contract between the synchronization subsystem and the scheduler
//! module. The subsystem hands environments over and yields; it never
//! selects who runs next.

/// Environment handle.
///
/// Environments are the kernel's unit of execution and ownership. Their
/// lifecycle lives outside this subsystem; semaphores only hold references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EnvId(pub u64);

/// Scheduling status of an environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvStatus {
    /// Currently executing, or eligible to keep executing.
    Runnable,
    /// On a ready queue, waiting to be dispatched.
    Ready,
    /// Parked on a waiter queue until signaled.
    Blocked,
}

/// Ready-queue tier (lower runs sooner).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReadyTier(pub u8);

impl ReadyTier {
    /// Highest tier (dispatched first)
    pub const HIGHEST: Self = Self(0);
    /// Lowest tier (dispatched last)
    pub const LOWEST: Self = Self(255);
}

impl Default for ReadyTier {
    fn default() -> Self {
        Self::HIGHEST
    }
}

/// Operations the scheduler module exposes to this subsystem.
///
/// Ready-queue policy - which tier a woken environment lands on and where
/// inside that tier - belongs to the implementor.
pub trait Scheduler: Send + Sync {
    /// Insert `env` into the ready queue of the given tier.
    fn enqueue_ready(&self, env: EnvId, tier: ReadyTier);

    /// Set the scheduling status of `env`.
    ///
    /// Marking the running environment [`EnvStatus::Blocked`] revokes its
    /// running designation at the next dispatch; that designation is owned
    /// by the scheduler, never by this subsystem.
    fn set_status(&self, env: EnvId, status: EnvStatus);

    /// Yield/dispatch entrypoint.
    ///
    /// Called unconditionally at the end of every successful wait
    /// operation. A blocked caller resumes from here only after a later
    /// signal readies it and the scheduler dispatches it again.
    fn reschedule(&self);

    /// Tier a woken environment is enqueued on.
    ///
    /// Defaults to [`ReadyTier::HIGHEST`]; schedulers with a different
    /// tiering policy override this.
    fn wake_tier(&self) -> ReadyTier {
        ReadyTier::HIGHEST
    }
}
