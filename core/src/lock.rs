//! Process-wide script lock.
//!
//! Scripted driver expressions run inside an embedded interpreter that is
//! not re-entrant; every Python-flagged operation holds this lock for the
//! duration of its callback.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, MutexGuard};

lazy_static::lazy_static! {
    static ref SCRIPT_LOCK: Mutex<()> = Mutex::new(());
}

static THREADED: AtomicBool = AtomicBool::new(false);

/// Prepare the script lock. Called once during application startup.
pub fn threaded_init() {
    THREADED.store(true, Ordering::Release);
}

/// Release the script lock machinery. Called during application shutdown.
pub fn threaded_exit() {
    THREADED.store(false, Ordering::Release);
}

/// Acquire the script lock.
///
/// Valid between [`threaded_init`] and [`threaded_exit`]; acquiring outside
/// that window is logged but still serializes.
pub fn script_lock() -> MutexGuard<'static, ()> {
    if !THREADED.load(Ordering::Acquire) {
        log::warn!("Script lock acquired before threaded_init()");
    }
    SCRIPT_LOCK.lock()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_excludes() {
        threaded_init();
        let guard = script_lock();
        assert!(SCRIPT_LOCK.try_lock().is_none());
        drop(guard);
        assert!(SCRIPT_LOCK.try_lock().is_some());
        threaded_exit();
    }
}
