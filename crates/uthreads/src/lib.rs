//! Cooperative user-level thread library with virtual-time preemption.
//!
//! Multiplexes up to [`MAX_THREADS`] logical threads onto the calling OS
//! thread. A virtual-time interval timer delivers `SIGVTALRM` once per
//! quantum; the handler saves the running context and installs the next
//! thread from a FIFO ready queue. Threads can block, resume each other,
//! and sleep for a number of quanta. All library state is a process-wide
//! singleton, mutated only with the preemption signal masked.
//!
//! ```no_run
//! fn worker() {
//!     // ... do some work, yielding implicitly on every quantum ...
//!     let _ = uthreads::terminate(uthreads::current_tid());
//! }
//!
//! uthreads::init(100_000).unwrap();
//! uthreads::spawn(worker).unwrap();
//! // Spin on the virtual clock; the timer preempts into the worker.
//! while uthreads::total_quantums() < 10 {}
//! ```
//!
//! Every failing call writes one `system error: ...` line to stderr before
//! returning, and unrecoverable platform failures (signal installation,
//! timer arming) exit the process.

mod context;
mod error;
mod sched;
mod signal;
mod table;

pub use error::Error;

use sched::{Scheduler, SwitchReason};
use signal::MaskGuard;

/// Maximum number of concurrently existing threads, the main one included.
pub const MAX_THREADS: usize = 100;

/// Stack size of every spawned thread, in bytes.
pub const STACK_SIZE: usize = 64 * 1024;

/// Thread identifier. The main thread is always 0.
pub type Tid = usize;

/// Initialize the library: create thread 0, set the quantum counter to 1,
/// install the `SIGVTALRM` handler, and arm the virtual timer for one
/// quantum of `quantum_usecs` microseconds.
///
/// Calling `init` again tears the previous scheduler down and starts
/// fresh; doing so from any thread but the main one is undefined, since
/// the caller's own stack is released with the rest.
pub fn init(quantum_usecs: i64) -> Result<(), Error> {
    if quantum_usecs <= 0 {
        return error::reject(Error::InvalidQuantum);
    }
    let _mask = MaskGuard::block();
    sched::install(Scheduler::new(quantum_usecs));
    signal::install_handler(sched::on_quantum_expiry);
    signal::arm_timer(quantum_usecs);
    log::debug!("thread library initialized, quantum {quantum_usecs}us");
    Ok(())
}

/// Spawn a thread running `entry` and append it to the ready queue.
/// Returns the smallest free tid. An entry function that returns
/// terminates its own thread.
pub fn spawn(entry: fn()) -> Result<Tid, Error> {
    let _mask = MaskGuard::block();
    let Some(sched) = (unsafe { sched::instance() }) else {
        return error::reject(Error::NotInitialized);
    };
    match sched.spawn(entry) {
        Ok(tid) => {
            log::trace!("spawned thread {tid}");
            Ok(tid)
        }
        Err(err) => error::reject(err),
    }
}

/// Terminate a thread.
///
/// - `tid` 0: frees every thread stack and exits the process with status 0.
/// - the calling thread: switches away and never returns.
/// - any other thread: releases its stack and id immediately and purges it
///   from the ready queue and sleep list.
pub fn terminate(tid: Tid) -> Result<(), Error> {
    let _mask = MaskGuard::block();
    let Some(sched) = (unsafe { sched::instance() }) else {
        return error::reject(Error::NotInitialized);
    };
    if tid == 0 {
        let sched = sched::take().expect("scheduler installed");
        sched.release_for_exit();
        std::process::exit(0);
    }
    if !sched.contains(tid) {
        return error::reject(Error::UnknownThread(tid));
    }
    if tid == sched.current() {
        sched::switch_current(SwitchReason::TerminateSelf);
        unreachable!("terminated thread resumed");
    }
    sched.terminate_remote(tid);
    log::trace!("terminated thread {tid}");
    Ok(())
}

/// Mark a thread blocked. Blocking the calling thread yields immediately;
/// blocking another removes it from the ready queue. Blocking an
/// already-blocked thread is a no-op. Thread 0 cannot be blocked.
pub fn block(tid: Tid) -> Result<(), Error> {
    let _mask = MaskGuard::block();
    let Some(sched) = (unsafe { sched::instance() }) else {
        return error::reject(Error::NotInitialized);
    };
    if !sched.contains(tid) {
        return error::reject(Error::UnknownThread(tid));
    }
    if tid == 0 {
        return error::reject(Error::BlockedMain);
    }
    if tid == sched.current() {
        sched.mark_blocked(tid);
        sched::switch_current(SwitchReason::Yield);
        // Resumed: some other thread has called `resume` on us since.
    } else {
        sched.block_remote(tid);
    }
    Ok(())
}

/// Clear a thread's blocked flag; unless it is still sleeping it rejoins
/// the tail of the ready queue. Resuming an un-blocked thread is a no-op.
pub fn resume(tid: Tid) -> Result<(), Error> {
    let _mask = MaskGuard::block();
    let Some(sched) = (unsafe { sched::instance() }) else {
        return error::reject(Error::NotInitialized);
    };
    if !sched.contains(tid) {
        return error::reject(Error::UnknownThread(tid));
    }
    sched.resume(tid);
    Ok(())
}

/// Put the calling thread to sleep for `num_quantums` quanta: it is
/// unscheduled until the global quantum counter reaches its wake point,
/// and then rejoins the ready queue (unless it was blocked meanwhile).
/// The main thread cannot sleep.
pub fn sleep(num_quantums: u64) -> Result<(), Error> {
    let _mask = MaskGuard::block();
    let Some(sched) = (unsafe { sched::instance() }) else {
        return error::reject(Error::NotInitialized);
    };
    if sched.current() == 0 {
        return error::reject(Error::SleptMain);
    }
    sched.start_sleep(num_quantums);
    sched::switch_current(SwitchReason::Yield);
    Ok(())
}

/// Tid of the calling thread (0 before `init`).
pub fn current_tid() -> Tid {
    let _mask = MaskGuard::block();
    unsafe { sched::instance() }.map_or(0, |s| s.current())
}

/// Global quantum counter: the number of successful switches so far,
/// the initial entry to the main thread included.
pub fn total_quantums() -> u64 {
    let _mask = MaskGuard::block();
    unsafe { sched::instance() }.map_or(0, |s| s.total_quantums())
}

/// Number of quanta the given thread has run for. A thread consuming its
/// first quantum counts 1.
pub fn quantums(tid: Tid) -> Result<u64, Error> {
    let _mask = MaskGuard::block();
    let Some(sched) = (unsafe { sched::instance() }) else {
        return error::reject(Error::NotInitialized);
    };
    match sched.quantums_of(tid) {
        Some(count) => Ok(count),
        None => error::reject(Error::UnknownThread(tid)),
    }
}
