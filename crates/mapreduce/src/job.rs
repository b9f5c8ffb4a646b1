//! Job context, worker lifecycle, and the waitable handle internals.
//!
//! Each worker runs map → sort → deposit → barrier → reduce. The last
//! thread into the barrier shuffles every deposited intermediate vector
//! into key groups and opens the reduce phase before anyone is released.

use std::mem;
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};

use crate::barrier::Barrier;
use crate::counter::{self, ProgressCounter};
use crate::shuffle::drain_into_groups;
use crate::{JobState, MapReduceClient, OutputVec, Stage};

type Pairs<C> = Vec<(<C as MapReduceClient>::K2, <C as MapReduceClient>::V2)>;

/// Handed to the client's `map` and `reduce` calls. Owns the worker's
/// intermediate vector during map and reaches the shared output vector.
pub struct WorkerContext<'job, C: MapReduceClient> {
    job: &'job JobInner<C>,
    intermediate: Pairs<C>,
}

impl<'job, C: MapReduceClient> WorkerContext<'job, C> {
    /// Append one intermediate pair from `map`.
    pub fn emit2(&mut self, key: C::K2, value: C::V2) {
        self.intermediate.push((key, value));
    }

    /// Append one output pair from `reduce`.
    pub fn emit3(&self, key: C::K3, value: C::V3) {
        self.job.output.lock().push((key, value));
    }
}

/// Observable progress plus the current phase's denominator, serialized
/// under one lock.
struct ProgressState {
    stage: Stage,
    percent: f32,
    total: u64,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum JoinFlag {
    /// Nobody has waited on the job yet.
    Idle,
    /// One caller is joining the worker threads.
    Joining,
    /// The job is finished; waiting returns immediately.
    Done,
}

struct JoinState {
    flag: JoinFlag,
    handles: Vec<JoinHandle<()>>,
}

pub(crate) struct JobInner<C: MapReduceClient> {
    client: C,
    input: Vec<(C::K1, C::V1)>,
    output: OutputVec<C>,
    counter: ProgressCounter,
    /// One slot per worker, filled with the sorted intermediate vector
    /// right before the barrier; the shuffler drains them all.
    deposits: Mutex<Vec<Pairs<C>>>,
    /// Shuffle output: written once by the last thread into the barrier,
    /// read-only to reducers.
    groups: OnceLock<Vec<Pairs<C>>>,
    state: Mutex<ProgressState>,
    barrier: Barrier,
    join: Mutex<JoinState>,
    join_cv: Condvar,
}

impl<C: MapReduceClient> JobInner<C> {
    pub fn launch(
        client: C,
        input: Vec<(C::K1, C::V1)>,
        output: OutputVec<C>,
        workers: usize,
    ) -> Arc<Self> {
        assert!(workers >= 1, "a job needs at least one worker");
        assert!(
            input.len() as u64 <= counter::MAX_UNITS,
            "input exceeds the progress counter's pair limit"
        );

        let inner = Arc::new(JobInner {
            client,
            input,
            output,
            counter: ProgressCounter::new(),
            deposits: Mutex::new((0..workers).map(|_| Vec::new()).collect()),
            groups: OnceLock::new(),
            state: Mutex::new(ProgressState {
                stage: Stage::Undefined,
                percent: 0.0,
                total: 0,
            }),
            barrier: Barrier::new(workers),
            join: Mutex::new(JoinState {
                flag: JoinFlag::Idle,
                handles: Vec::with_capacity(workers),
            }),
            join_cv: Condvar::new(),
        });

        let mut handles = Vec::with_capacity(workers);
        for slot in 0..workers {
            let job = Arc::clone(&inner);
            let handle = thread::Builder::new()
                .name(format!("mapreduce-worker-{slot}"))
                .spawn(move || worker_loop(&job, slot))
                .unwrap_or_else(|_| die("worker thread creation failure"));
            handles.push(handle);
        }
        inner.join.lock().handles = handles;
        log::debug!("job started with {workers} workers");
        inner
    }

    /// Tri-state join protocol: the first waiter joins every worker and
    /// broadcasts, later waiters park on the condvar, and anyone arriving
    /// after completion returns at once.
    pub fn wait(&self) {
        let mut join = self.join.lock();
        loop {
            match join.flag {
                JoinFlag::Done => return,
                JoinFlag::Joining => self.join_cv.wait(&mut join),
                JoinFlag::Idle => {
                    join.flag = JoinFlag::Joining;
                    let handles = mem::take(&mut join.handles);
                    drop(join);
                    for handle in handles {
                        if handle.join().is_err() {
                            die("worker thread join failure");
                        }
                    }
                    let mut join = self.join.lock();
                    join.flag = JoinFlag::Done;
                    self.join_cv.notify_all();
                    return;
                }
            }
        }
    }

    /// Atomic snapshot of the observable job state.
    pub fn state(&self) -> JobState {
        let state = self.state.lock();
        JobState {
            stage: state.stage,
            percent: state.percent,
        }
    }

    fn run_map(&self, ctx: &mut WorkerContext<'_, C>) {
        self.enter_map();
        loop {
            let index = self.counter.claim();
            if index >= self.input.len() {
                break;
            }
            let (key, value) = &self.input[index];
            self.client.map(key, value, ctx);
            self.counter.add_completed(1);
            self.refresh_percent();
        }
    }

    /// First worker into map publishes the stage; the rest see it set.
    fn enter_map(&self) {
        let mut state = self.state.lock();
        if state.stage == Stage::Undefined {
            state.stage = Stage::Map;
            state.total = self.input.len() as u64;
            state.percent = if state.total == 0 { 100.0 } else { 0.0 };
        }
    }

    /// Runs on the last thread into the barrier, alone: every other worker
    /// is parked until the barrier is released, so the deposited vectors
    /// are exclusively the shuffler's.
    fn run_shuffle(&self) {
        let mut vecs = mem::take(&mut *self.deposits.lock());
        let total_pairs: usize = vecs.iter().map(Vec::len).sum();
        assert!(
            total_pairs as u64 <= counter::MAX_UNITS,
            "intermediate pairs exceed the progress counter's limit"
        );

        self.counter.enter(Stage::Shuffle);
        {
            let mut state = self.state.lock();
            state.stage = Stage::Shuffle;
            state.total = total_pairs as u64;
            state.percent = if total_pairs == 0 { 100.0 } else { 0.0 };
        }

        let groups = drain_into_groups(&mut vecs, |drained| {
            self.counter.add_completed(drained as u64);
            self.refresh_percent();
        });
        log::debug!(
            "shuffle grouped {total_pairs} pairs into {} groups",
            groups.len()
        );
        if self.groups.set(groups).is_err() {
            unreachable!("shuffle output published twice");
        }
    }

    fn enter_reduce(&self) {
        self.counter.enter(Stage::Reduce);
        let total = self.shuffled_groups().len() as u64;
        let mut state = self.state.lock();
        state.stage = Stage::Reduce;
        state.total = total;
        state.percent = if total == 0 { 100.0 } else { 0.0 };
    }

    fn run_reduce(&self, ctx: &mut WorkerContext<'_, C>) {
        debug_assert_eq!(self.counter.stage(), Stage::Reduce);
        let groups = self.shuffled_groups();
        loop {
            let index = self.counter.claim();
            if index >= groups.len() {
                break;
            }
            self.client.reduce(&groups[index], ctx);
            self.counter.add_completed(1);
            self.refresh_percent();
        }
    }

    fn shuffled_groups(&self) -> &[Pairs<C>] {
        self.groups.get().expect("shuffle output published")
    }

    /// Recompute the percentage from the counter's completed field and the
    /// phase denominator. A stale relaxed read must never drag a published
    /// percentage backward, so only increases are kept.
    fn refresh_percent(&self) {
        let completed = self.counter.completed();
        let mut state = self.state.lock();
        let percent = if state.total == 0 {
            100.0
        } else {
            (completed as f32 / state.total as f32) * 100.0
        };
        if percent > state.percent {
            state.percent = percent;
        }
    }
}

fn worker_loop<C: MapReduceClient>(job: &JobInner<C>, slot: usize) {
    let mut ctx = WorkerContext {
        job,
        intermediate: Vec::new(),
    };
    job.run_map(&mut ctx);
    ctx.intermediate.sort_by(|a, b| a.0.cmp(&b.0));
    job.deposits.lock()[slot] = mem::take(&mut ctx.intermediate);
    job.barrier.wait(|| {
        job.run_shuffle();
        job.enter_reduce();
    });
    job.run_reduce(&mut ctx);
}

/// A platform primitive failed underneath the engine; nothing recoverable
/// remains. Prints the diagnostic and exits with a failure status.
fn die(what: &str) -> ! {
    eprintln!("system error: {what}");
    std::process::exit(1);
}
