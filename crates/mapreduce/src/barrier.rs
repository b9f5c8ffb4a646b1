//! Reusable count-up barrier with a designated last-arrival role.

use parking_lot::{Condvar, Mutex};

/// Rendezvous point for all workers of a job. The last thread to arrive
/// runs a caller-supplied closure while every earlier arrival stays
/// parked, then releases the whole cohort. The arrival count resets on
/// release, so the barrier can be crossed again.
pub(crate) struct Barrier {
    state: Mutex<BarrierState>,
    cv: Condvar,
    workers: usize,
}

struct BarrierState {
    arrived: usize,
    generation: u64,
}

impl Barrier {
    pub fn new(workers: usize) -> Self {
        Barrier {
            state: Mutex::new(BarrierState {
                arrived: 0,
                generation: 0,
            }),
            cv: Condvar::new(),
            workers,
        }
    }

    /// Block until all workers arrive. Exactly one caller, the last to
    /// arrive, runs `on_last`: outside the lock, but before anyone else
    /// is released.
    pub fn wait(&self, on_last: impl FnOnce()) {
        let mut state = self.state.lock();
        state.arrived += 1;
        if state.arrived < self.workers {
            let generation = state.generation;
            while state.generation == generation {
                self.cv.wait(&mut state);
            }
        } else {
            state.arrived = 0;
            drop(state);
            on_last();
            let mut state = self.state.lock();
            state.generation += 1;
            self.cv.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_single_worker_runs_the_closure_inline() {
        let barrier = Barrier::new(1);
        let mut ran = false;
        barrier.wait(|| ran = true);
        assert!(ran);
    }

    #[test]
    fn test_exactly_one_last_arrival() {
        let workers = 8;
        let barrier = Arc::new(Barrier::new(workers));
        let leaders = Arc::new(AtomicUsize::new(0));
        let crossed = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..workers)
            .map(|_| {
                let barrier = Arc::clone(&barrier);
                let leaders = Arc::clone(&leaders);
                let crossed = Arc::clone(&crossed);
                thread::spawn(move || {
                    barrier.wait(|| {
                        leaders.fetch_add(1, Ordering::SeqCst);
                    });
                    crossed.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(leaders.load(Ordering::SeqCst), 1);
        assert_eq!(crossed.load(Ordering::SeqCst), workers);
    }

    #[test]
    fn test_nobody_crosses_before_the_closure_finishes() {
        let workers = 4;
        let barrier = Arc::new(Barrier::new(workers));
        let closure_done = Arc::new(AtomicUsize::new(0));
        let saw_closure_done = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..workers)
            .map(|_| {
                let barrier = Arc::clone(&barrier);
                let closure_done = Arc::clone(&closure_done);
                let saw_closure_done = Arc::clone(&saw_closure_done);
                thread::spawn(move || {
                    barrier.wait(|| {
                        thread::sleep(std::time::Duration::from_millis(20));
                        closure_done.store(1, Ordering::SeqCst);
                    });
                    if closure_done.load(Ordering::SeqCst) == 1 {
                        saw_closure_done.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(saw_closure_done.load(Ordering::SeqCst), workers);
    }
}
