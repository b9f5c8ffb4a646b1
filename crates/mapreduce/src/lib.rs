//! Multi-worker MapReduce engine.
//!
//! A job runs three phases over N OS threads: every worker pulls input
//! pairs through a shared atomic counter and maps them into a private
//! intermediate vector; the vectors are sorted and the workers rendezvous
//! at a barrier, where the last arrival shuffles all pairs into per-key
//! groups (descending by key); the workers then race through the groups,
//! reducing each exactly once. Progress lives in a single packed 64-bit
//! atomic word, and the job handle is waitable from any number of threads.
//!
//! ```
//! use std::sync::Arc;
//! use parking_lot::Mutex;
//! use mapreduce::{start_job, MapReduceClient, Stage, WorkerContext};
//!
//! struct WordLengths;
//!
//! impl MapReduceClient for WordLengths {
//!     type K1 = ();
//!     type V1 = String;
//!     type K2 = usize;
//!     type V2 = String;
//!     type K3 = usize;
//!     type V3 = usize;
//!
//!     fn map(&self, _key: &(), word: &String, ctx: &mut WorkerContext<'_, Self>) {
//!         ctx.emit2(word.len(), word.clone());
//!     }
//!
//!     fn reduce(&self, group: &[(usize, String)], ctx: &mut WorkerContext<'_, Self>) {
//!         ctx.emit3(group[0].0, group.len());
//!     }
//! }
//!
//! let input = vec![((), "tern".into()), ((), "gull".into()), ((), "skua".into())];
//! let output = Arc::new(Mutex::new(Vec::new()));
//! let job = start_job(WordLengths, input, Arc::clone(&output), 4);
//! job.wait();
//! assert_eq!(job.state().stage, Stage::Reduce);
//! assert_eq!(*output.lock(), vec![(4, 3)]);
//! ```

mod barrier;
mod counter;
mod job;
mod shuffle;

use std::sync::Arc;

use parking_lot::Mutex;

use job::JobInner;
pub use job::WorkerContext;

/// The client side of a job: the map and reduce callables plus the types
/// flowing between the phases. Keys of the intermediate pairs carry the
/// ordering the shuffle groups by; values are opaque to the engine.
pub trait MapReduceClient: Send + Sync + Sized + 'static {
    type K1: Send + Sync + 'static;
    type V1: Send + Sync + 'static;
    type K2: Ord + Send + Sync + 'static;
    type V2: Send + Sync + 'static;
    type K3: Send + 'static;
    type V3: Send + 'static;

    /// Map one input pair, emitting intermediate pairs via
    /// [`WorkerContext::emit2`].
    fn map(&self, key: &Self::K1, value: &Self::V1, ctx: &mut WorkerContext<'_, Self>);

    /// Reduce one group of equal-key intermediate pairs, emitting output
    /// pairs via [`WorkerContext::emit3`]. Called exactly once per group.
    fn reduce(&self, group: &[(Self::K2, Self::V2)], ctx: &mut WorkerContext<'_, Self>);
}

/// The caller-supplied output collection, appended to only through
/// [`WorkerContext::emit3`].
pub type OutputVec<C> =
    Arc<Mutex<Vec<(<C as MapReduceClient>::K3, <C as MapReduceClient>::V3)>>>;

/// Phase of a running job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Undefined = 0,
    Map = 1,
    Shuffle = 2,
    Reduce = 3,
}

impl Stage {
    pub(crate) fn from_tag(tag: u64) -> Stage {
        match tag & 0b11 {
            0 => Stage::Undefined,
            1 => Stage::Map,
            2 => Stage::Shuffle,
            _ => Stage::Reduce,
        }
    }
}

/// Snapshot of a job's observable progress. `percent` is completed work
/// over the current phase's total, in `[0.0, 100.0]`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct JobState {
    pub stage: Stage,
    pub percent: f32,
}

/// Shareable handle to a running job. Clones refer to the same job; any of
/// them can wait, poll state, or be closed independently.
pub struct JobHandle<C: MapReduceClient> {
    inner: Arc<JobInner<C>>,
}

impl<C: MapReduceClient> Clone for JobHandle<C> {
    fn clone(&self) -> Self {
        JobHandle {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: MapReduceClient> JobHandle<C> {
    /// Block until the job completes. The first caller joins the worker
    /// threads; concurrent callers park until it finishes; anyone arriving
    /// afterwards returns immediately. Idempotent.
    pub fn wait(&self) {
        self.inner.wait();
    }

    /// Atomic snapshot of `{stage, percent}`.
    pub fn state(&self) -> JobState {
        self.inner.state()
    }

    /// Wait for the job, then release this handle's share of its
    /// resources. The job's own allocations are freed once the last
    /// outstanding handle is gone.
    pub fn close(self) {
        self.inner.wait();
    }
}

/// Start a job over `input` with `workers` OS threads (at least one).
/// Output pairs are appended to `output` as the client emits them. The
/// returned handle is the only way to observe or wait for the job.
pub fn start_job<C: MapReduceClient>(
    client: C,
    input: Vec<(C::K1, C::V1)>,
    output: OutputVec<C>,
    workers: usize,
) -> JobHandle<C> {
    JobHandle {
        inner: JobInner::launch(client, input, output, workers),
    }
}
