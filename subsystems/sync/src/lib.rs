//! # Vesper Synchronization Subsystem
//!
//! Named counting semaphores for kernel environments.
//!
//! ## Components
//!
//! - **Semaphore Pool**: growable slot storage with (owner, name) lookup
//! - **Semaphore Manager**: the create/wait/signal protocol and the
//!   blocking/waking handoff to the scheduler
//! - **Scheduler Interface**: the contract a scheduler module implements
//!
//! ## Philosophy
//!
//! The subsystem is **policy-free**: it decides when an environment blocks
//! or becomes ready, never who runs next. Ready-queue placement and dispatch
//! belong to the scheduler module behind the [`Scheduler`] trait.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use vesper_sync::{EnvId, PoolConfig, SemaphoreManager};
//!
//! // Once, at kernel initialization
//! let semaphores = SemaphoreManager::new(&PoolConfig::default(), scheduler);
//!
//! // A producer/consumer pair sharing one gate
//! let owner = EnvId(7);
//! semaphores.create(owner, "frames", 0)?;
//! semaphores.wait(owner, "frames", consumer)?; // blocks until signaled
//! semaphores.signal(owner, "frames")?;         // producer side, never blocks
//! ```

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

pub mod manager;
pub mod pool;
pub mod sched;

// Re-export main types
pub use manager::{SemaphoreManager, SyncStats};
pub use pool::{PoolConfig, Semaphore, SemaphoreId, SemaphorePool, DEFAULT_CAPACITY, MAX_NAME_LEN};
pub use sched::{EnvId, EnvStatus, ReadyTier, Scheduler};

/// Synchronization error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncError {
    /// Pool is full and growth is disabled or the allocator refused
    NoCapacity,
    /// A semaphore with this owner and name already exists
    AlreadyExists,
    /// No semaphore matches the owner and name (or handle)
    NotExists,
    /// Semaphore name exceeds [`MAX_NAME_LEN`]
    NameTooLong,
}

impl core::fmt::Display for SyncError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NoCapacity => write!(f, "Semaphore pool exhausted"),
            Self::AlreadyExists => write!(f, "Semaphore already exists"),
            Self::NotExists => write!(f, "Semaphore does not exist"),
            Self::NameTooLong => write!(f, "Semaphore name too long"),
        }
    }
}

/// Result type for synchronization operations
pub type SyncResult<T> = Result<T, SyncError>;
