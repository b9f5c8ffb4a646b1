//! Narrow wrapper over the platform context-switch primitive.
//!
//! A [`Context`] is the minimum machine state needed to resume a thread:
//! stack pointer, program counter, and signal mask, all carried inside
//! `libc::ucontext_t`. The two operations the scheduler needs are
//! [`swap`] (save the running context, resume another, return when the
//! saved one is resumed) and [`install`] (resume another without saving).
//! Register layout and address translation are the platform's business;
//! nothing outside this module touches `ucontext_t`.

use std::mem;
use std::ptr;

use crate::error::die;

#[repr(transparent)]
pub(crate) struct Context(libc::ucontext_t);

impl Context {
    /// A context slot to be filled by the first save into it. All-zero is a
    /// valid placeholder: it is overwritten before it is ever installed.
    pub fn empty() -> Box<Self> {
        unsafe { Box::new(mem::zeroed()) }
    }

    /// Lay out a context that starts `entry` at the top of `stack` with an
    /// empty saved signal mask. The platform places the stack pointer at
    /// the buffer's top and the program counter at `entry`.
    pub fn bootstrap(stack: &mut [u8], entry: extern "C" fn()) -> Box<Self> {
        let mut ctx = Self::empty();
        unsafe {
            if libc::getcontext(&mut ctx.0) != 0 {
                die("context initialization failure");
            }
            ctx.0.uc_stack.ss_sp = stack.as_mut_ptr().cast();
            ctx.0.uc_stack.ss_size = stack.len();
            ctx.0.uc_stack.ss_flags = 0;
            ctx.0.uc_link = ptr::null_mut();
            libc::sigemptyset(&mut ctx.0.uc_sigmask);
            libc::makecontext(&mut ctx.0, entry, 0);
        }
        ctx
    }
}

/// Save the running context into `save` and resume `to`. Returns only when
/// a later switch resumes the saved context; the jump installs the
/// successor's saved signal mask.
///
/// # Safety
/// Both pointers must refer to live, address-stable contexts, and `to` must
/// have been bootstrapped or previously saved into.
pub(crate) unsafe fn swap(save: *mut Context, to: *const Context) {
    if libc::swapcontext(&mut (*save).0, &(*to).0) != 0 {
        die("context switch failure");
    }
}

/// Resume `to` without saving the running context. Never returns.
///
/// # Safety
/// Same requirements as [`swap`] for `to`.
pub(crate) unsafe fn install(to: *const Context) -> ! {
    libc::setcontext(&(*to).0);
    // setcontext only returns on failure.
    die("context switch failure");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    static ENTRY_RAN: AtomicBool = AtomicBool::new(false);
    static RETURN_TO: AtomicUsize = AtomicUsize::new(0);

    /// Runs on the bootstrapped stack, then installs the saved origin
    /// context, handing control back to the test after its `swap` call.
    extern "C" fn entry() {
        ENTRY_RAN.store(true, Ordering::SeqCst);
        let back = RETURN_TO.load(Ordering::SeqCst) as *const Context;
        unsafe { install(back) };
    }

    #[test]
    fn test_swap_runs_the_bootstrapped_entry_and_comes_back() {
        let mut stack = vec![0u8; crate::STACK_SIZE].into_boxed_slice();
        let target = Context::bootstrap(&mut stack, entry);
        let mut origin = Context::empty();
        RETURN_TO.store(&mut *origin as *mut Context as usize, Ordering::SeqCst);

        unsafe { swap(&mut *origin, &*target) };

        assert!(ENTRY_RAN.load(Ordering::SeqCst));
    }
}
