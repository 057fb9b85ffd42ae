use std::sync::{Mutex, MutexGuard};

use tracing::warn;

/// Acquire `lock`, recovering the guard if a previous holder panicked.
///
/// Engine session fields are only written after the engine reports success, so a
/// panic mid-render leaves them describing the last state that actually held.
pub(crate) fn mutex_lock<'a, T>(
    lock: &'a Mutex<T>,
    target: &'static str,
    op: &'static str,
) -> MutexGuard<'a, T> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!(
                op,
                target_module = target,
                lock_kind = "mutex.lock",
                result = "poisoned_recovered",
                hint = "a previous holder panicked",
                "Recovered from poisoned lock"
            );
            poisoned.into_inner()
        }
    }
}
