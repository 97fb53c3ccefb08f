//! The protocol core: reliability engine, flush scheduling and connections.
//! 协议核心：可靠性引擎、刷新调度和连接。

pub mod connection;
pub mod output;
pub mod reliability;
pub mod updater;

#[cfg(test)]
pub mod test_utils;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
