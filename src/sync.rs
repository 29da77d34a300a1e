use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

/// Lock a mutex, recovering the inner state if a previous holder panicked
pub(crate) fn lock_with_recovery<'a, T>(
    mutex: &'a Mutex<T>,
    lock_name: &'static str,
) -> MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!(lock = lock_name, "mutex poisoned; recovering inner state");
            poisoned.into_inner()
        }
    }
}

pub(crate) fn read_with_recovery<'a, T>(
    lock: &'a RwLock<T>,
    lock_name: &'static str,
) -> RwLockReadGuard<'a, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!(lock = lock_name, "rwlock poisoned; recovering inner state");
            poisoned.into_inner()
        }
    }
}

pub(crate) fn write_with_recovery<'a, T>(
    lock: &'a RwLock<T>,
    lock_name: &'static str,
) -> RwLockWriteGuard<'a, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!(lock = lock_name, "rwlock poisoned; recovering inner state");
            poisoned.into_inner()
        }
    }
}
