//! Cancellation flag shared with the OS signal handler.
//!
//! The flag is a sticky, write-once atomic: the first delivered signal
//! wins and later ones are ignored until the next `install`. Passes poll
//! it between work units; nothing here interrupts an in-flight write.

use std::sync::atomic::{AtomicI32, Ordering};

static SIGNUM: AtomicI32 = AtomicI32::new(0);

extern "C" fn handler(signum: libc::c_int) {
    if signum > 0 {
        let _ = SIGNUM.compare_exchange(0, signum, Ordering::Relaxed, Ordering::Relaxed);
    }
}

fn set_handler(signum: libc::c_int, action: usize) {
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = action;
        sa.sa_flags = libc::SA_RESTART;
        libc::sigemptyset(&mut sa.sa_mask);
        libc::sigaction(signum, &sa, std::ptr::null_mut());
    }
}

/// Reset the flag and install handlers for the cancelling signals.
/// SIGUSR1/2 are ignored so they cannot kill a long run.
pub fn install() {
    SIGNUM.store(0, Ordering::Relaxed);
    for sig in [libc::SIGHUP, libc::SIGINT, libc::SIGTERM] {
        set_handler(sig, handler as usize);
    }
    for sig in [libc::SIGUSR1, libc::SIGUSR2] {
        set_handler(sig, libc::SIG_IGN);
    }
}

pub fn signum() -> i32 {
    SIGNUM.load(Ordering::Relaxed)
}

pub fn interrupted() -> bool {
    signum() > 0
}

/// Test hook and handler back door: behaves like a delivered signal.
pub fn trigger(signum: i32) {
    if signum > 0 {
        let _ = SIGNUM.compare_exchange(0, signum, Ordering::Relaxed, Ordering::Relaxed);
    }
}

/// Restore the default disposition and re-raise, so the exit status
/// carries the conventional `128 + signum` encoding. Returns that code
/// for the caller in case the raise does not terminate us.
pub fn signaled_exit(signum: i32) -> i32 {
    unsafe {
        libc::signal(signum, libc::SIG_DFL);
        libc::raise(signum);
    }
    128 + signum
}
