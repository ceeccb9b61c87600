//! Sub-agent orchestration subsystem.
//!
//! [`fork::ContextForker`] builds isolated contexts, [`executor::SubagentExecutor`]
//! runs one context through the budgeted LLM + tools loop, and
//! [`lifecycle::LifecycleManager`] supervises many runs concurrently.

pub mod executor;
pub mod fork;
pub mod lifecycle;
pub mod scope;
pub mod types;

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Lock helpers that recover the data if a previous holder panicked.
///
/// Every critical section in this module leaves its data consistent, so a
/// poisoned lock carries no torn state.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
