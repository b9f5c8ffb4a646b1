//! The scheduler: ready queue, sleep list, quantum accounting, and the
//! process-wide singleton driving context switches.
//!
//! Everything here except [`Jump::perform`] is plain data-structure work.
//! [`Scheduler::rotate`] does the bookkeeping of one switch and hands back
//! a jump descriptor; the callers arm the timer and perform the jump with
//! the preemption signal masked.

use std::cell::UnsafeCell;
use std::collections::VecDeque;
use std::mem;
use std::ptr;

use crate::context::{self, Context};
use crate::error::{die, Error};
use crate::signal::{self, MaskGuard};
use crate::table::{ThreadRecord, ThreadTable, TidAllocator};
use crate::Tid;

/// Why the current thread is giving up the processor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SwitchReason {
    /// The quantum timer expired; the current thread stays runnable.
    Preempt,
    /// The current thread just blocked or went to sleep.
    Yield,
    /// The current thread is terminating itself.
    TerminateSelf,
}

/// A pending context jump, computed under the mask and performed last.
pub(crate) enum Jump {
    Swap {
        save: *mut Context,
        to: *const Context,
    },
    Install {
        to: *const Context,
    },
}

impl Jump {
    /// # Safety
    /// Must be performed immediately after [`Scheduler::rotate`] produced
    /// it, before any further table mutation.
    pub unsafe fn perform(self) {
        match self {
            Jump::Swap { save, to } => context::swap(save, to),
            Jump::Install { to } => context::install(to),
        }
    }
}

pub(crate) struct Scheduler {
    pub quantum_usecs: i64,
    table: ThreadTable,
    tids: TidAllocator,
    /// Runnable, non-blocked, non-sleeping threads in FIFO order. Never
    /// holds the current thread and never holds duplicates.
    ready: VecDeque<Tid>,
    /// Threads with a wake-at quantum in the future.
    sleeping: Vec<Tid>,
    current: Tid,
    total_quantums: u64,
    /// Record of the most recently self-terminated thread. Its stack is
    /// still in use until the jump completes, so it is dropped at the next
    /// scheduler entry instead of during the switch.
    graveyard: Option<ThreadRecord>,
}

impl Scheduler {
    /// Fresh scheduler with thread 0 current and one quantum on the clock.
    pub fn new(quantum_usecs: i64) -> Self {
        let mut table = ThreadTable::new();
        let mut tids = TidAllocator::new();
        tids.allocate(); // reserve id 0 for the main thread
        table.insert(0, ThreadRecord::main());
        Scheduler {
            quantum_usecs,
            table,
            tids,
            ready: VecDeque::new(),
            sleeping: Vec::new(),
            current: 0,
            total_quantums: 1,
            graveyard: None,
        }
    }

    pub fn current(&self) -> Tid {
        self.current
    }

    pub fn total_quantums(&self) -> u64 {
        self.total_quantums
    }

    pub fn contains(&self, tid: Tid) -> bool {
        self.table.contains(tid)
    }

    pub fn quantums_of(&self, tid: Tid) -> Option<u64> {
        self.table.get(tid).map(|r| r.quantums)
    }

    pub fn current_entry(&self) -> fn() {
        self.table
            .get(self.current)
            .and_then(|r| r.entry)
            .expect("spawned threads carry an entry point")
    }

    /// Allocate the smallest free tid, bootstrap a context on a fresh
    /// stack, and append the thread to the ready queue.
    pub fn spawn(&mut self, entry: fn()) -> Result<Tid, Error> {
        let Some(tid) = self.tids.allocate() else {
            return Err(Error::OutOfSlots);
        };
        self.table.insert(tid, ThreadRecord::spawned(entry, thread_start));
        self.ready.push_back(tid);
        Ok(tid)
    }

    /// Remove another thread outright: release its id, free its stack, and
    /// purge it from the ready queue and sleep list.
    pub fn terminate_remote(&mut self, tid: Tid) {
        self.tids.release(tid);
        self.table.remove(tid);
        self.ready.retain(|&t| t != tid);
        self.sleeping.retain(|&t| t != tid);
    }

    pub fn mark_blocked(&mut self, tid: Tid) {
        if let Some(rec) = self.table.get_mut(tid) {
            rec.blocked = true;
        }
    }

    /// Block a thread that is not running: set the flag and pull it out of
    /// the ready queue. Sleep-list membership is untouched.
    pub fn block_remote(&mut self, tid: Tid) {
        self.mark_blocked(tid);
        self.ready.retain(|&t| t != tid);
    }

    /// Clear the blocked flag; a thread that is not also sleeping goes back
    /// to the tail of the ready queue. No-op on an un-blocked thread.
    pub fn resume(&mut self, tid: Tid) {
        if let Some(rec) = self.table.get_mut(tid) {
            if rec.blocked {
                rec.blocked = false;
                if !rec.is_sleeping() {
                    self.ready.push_back(tid);
                }
            }
        }
    }

    /// Put the current thread to sleep for `num_quantums` quanta. The
    /// caller must follow up with a yield switch.
    pub fn start_sleep(&mut self, num_quantums: u64) {
        let wake_at = self.total_quantums + num_quantums;
        let current = self.current;
        if let Some(rec) = self.table.get_mut(current) {
            rec.wake_at = wake_at;
        }
        self.sleeping.push(current);
    }

    /// One switch worth of bookkeeping. Picks the successor, advances the
    /// sleep list and the quantum clock, and returns the jump to perform.
    /// The caller holds the signal mask and re-arms the timer before
    /// jumping.
    pub fn rotate(&mut self, reason: SwitchReason) -> Jump {
        // Nothing runs on the previously terminated thread's stack anymore.
        self.graveyard = None;

        let prev = self.current;
        let keep_runnable = reason != SwitchReason::TerminateSelf && {
            let rec = self.table.get(prev).expect("current thread has a record");
            !rec.blocked && !rec.is_sleeping()
        };
        if keep_runnable {
            self.ready.push_back(prev);
        }

        let Some(next) = self.ready.pop_front() else {
            // The current thread stopped being runnable and nothing else
            // can run: the program has deadlocked itself.
            die("no runnable thread left to schedule");
        };
        self.current = next;

        // Wake expired sleepers only after the successor is chosen, so a
        // thread waking this quantum runs no earlier than the next one.
        let due = self.total_quantums;
        let mut sleeping = mem::take(&mut self.sleeping);
        sleeping.retain(|&tid| {
            let rec = self
                .table
                .get_mut(tid)
                .expect("sleep list entries have records");
            if rec.wake_at <= due {
                rec.wake_at = 0;
                if !rec.blocked {
                    self.ready.push_back(tid);
                }
                false
            } else {
                true
            }
        });
        self.sleeping = sleeping;

        self.total_quantums += 1;
        self.table
            .get_mut(next)
            .expect("successor has a record")
            .quantums += 1;

        if reason == SwitchReason::TerminateSelf {
            self.tids.release(prev);
            self.graveyard = self.table.remove(prev);
            Jump::Install {
                to: self.ctx_ptr(next),
            }
        } else {
            Jump::Swap {
                save: self.ctx_mut_ptr(prev),
                to: self.ctx_ptr(next),
            }
        }
    }

    /// Free every thread stack ahead of a main-thread termination. The
    /// caller is still executing on its own stack, so that one buffer is
    /// leaked; the process is about to exit anyway.
    pub fn release_for_exit(mut self: Box<Self>) {
        let current = self.current;
        if let Some(rec) = self.table.get_mut(current) {
            if let Some(stack) = rec.stack.take() {
                mem::forget(stack);
            }
        }
        drop(self);
    }

    fn ctx_ptr(&self, tid: Tid) -> *const Context {
        let rec = self.table.get(tid).expect("jump target has a record");
        &*rec.ctx as *const Context
    }

    fn ctx_mut_ptr(&mut self, tid: Tid) -> *mut Context {
        let rec = self.table.get_mut(tid).expect("jump source has a record");
        &mut *rec.ctx as *mut Context
    }
}

// ---------------------------------------------------------------------------
// Process-wide singleton
// ---------------------------------------------------------------------------

struct SchedulerCell(UnsafeCell<*mut Scheduler>);

// The cell is only touched with SIGVTALRM masked (or from its handler),
// and the library multiplexes its threads onto a single OS thread.
unsafe impl Sync for SchedulerCell {}

static SCHEDULER: SchedulerCell = SchedulerCell(UnsafeCell::new(ptr::null_mut()));

/// Install a fresh scheduler, tearing down any previous one.
/// Caller must hold the signal mask.
pub(crate) fn install(sched: Scheduler) {
    unsafe {
        let slot = SCHEDULER.0.get();
        let old = *slot;
        *slot = Box::into_raw(Box::new(sched));
        if !old.is_null() {
            drop(Box::from_raw(old));
        }
    }
}

/// The live scheduler, if any.
///
/// # Safety
/// The preemption signal must be masked, or the caller must be the signal
/// handler itself, so no switch can observe the state mid-mutation.
pub(crate) unsafe fn instance() -> Option<&'static mut Scheduler> {
    unsafe { (*SCHEDULER.0.get()).as_mut() }
}

/// Detach the scheduler from the global slot for teardown.
pub(crate) fn take() -> Option<Box<Scheduler>> {
    unsafe {
        let slot = SCHEDULER.0.get();
        let old = *slot;
        *slot = ptr::null_mut();
        if old.is_null() {
            None
        } else {
            Some(Box::from_raw(old))
        }
    }
}

/// Perform one full switch away from the current thread: bookkeeping,
/// timer re-arm, and the jump itself. For a [`SwitchReason::TerminateSelf`]
/// switch this never returns; otherwise it returns when the calling thread
/// is next scheduled.
pub(crate) fn switch_current(reason: SwitchReason) {
    let jump = {
        let sched = unsafe { instance() }.expect("scheduler initialized");
        let jump = sched.rotate(reason);
        signal::arm_timer(sched.quantum_usecs);
        jump
    };
    unsafe { jump.perform() }
}

/// `SIGVTALRM` handler. The kernel blocks the signal for the handler's
/// duration; that mask is saved with the interrupted context, and the
/// ordinary handler return restores the pre-interrupt mask once the thread
/// is eventually resumed.
pub(crate) extern "C" fn on_quantum_expiry(sig: libc::c_int) {
    if sig != libc::SIGVTALRM {
        return;
    }
    if unsafe { instance() }.is_none() {
        return;
    }
    switch_current(SwitchReason::Preempt);
}

/// First frame of every spawned thread. Runs the client entry and
/// terminates the thread when the entry returns.
pub(crate) extern "C" fn thread_start() {
    let entry = {
        let _mask = MaskGuard::block();
        let sched = unsafe { instance() }.expect("scheduler initialized");
        sched.current_entry()
    };
    entry();
    let _ = crate::terminate(crate::current_tid());
    unreachable!("terminated thread resumed");
}
