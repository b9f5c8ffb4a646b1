//! End-to-end jobs exercising the full map → shuffle → reduce pipeline.

use std::sync::Arc;

use parking_lot::Mutex;

use mapreduce::{start_job, JobState, MapReduceClient, Stage, WorkerContext};

/// Identity map; reduce concatenates the group's values.
struct Concat;

impl MapReduceClient for Concat {
    type K1 = i32;
    type V1 = String;
    type K2 = i32;
    type V2 = String;
    type K3 = i32;
    type V3 = String;

    fn map(&self, key: &i32, value: &String, ctx: &mut WorkerContext<'_, Self>) {
        ctx.emit2(*key, value.clone());
    }

    fn reduce(&self, group: &[(i32, String)], ctx: &mut WorkerContext<'_, Self>) {
        let joined: String = group.iter().map(|(_, v)| v.as_str()).collect();
        ctx.emit3(group[0].0, joined);
    }
}

/// Map passes pairs through; reduce reports each group's size.
struct CountPerKey;

impl MapReduceClient for CountPerKey {
    type K1 = u32;
    type V1 = u32;
    type K2 = u32;
    type V2 = u32;
    type K3 = u32;
    type V3 = usize;

    fn map(&self, key: &u32, value: &u32, ctx: &mut WorkerContext<'_, Self>) {
        ctx.emit2(*key, *value);
    }

    fn reduce(&self, group: &[(u32, u32)], ctx: &mut WorkerContext<'_, Self>) {
        ctx.emit3(group[0].0, group.len());
    }
}

const FINISHED: JobState = JobState {
    stage: Stage::Reduce,
    percent: 100.0,
};

#[test]
fn test_identity_map_concat_reduce() {
    let input = vec![
        (1, "a".to_string()),
        (2, "b".to_string()),
        (1, "c".to_string()),
    ];
    let output = Arc::new(Mutex::new(Vec::new()));
    let job = start_job(Concat, input, Arc::clone(&output), 1);
    job.wait();

    let output = output.lock();
    assert_eq!(output.len(), 2);
    // A single worker reduces groups in shuffle order: descending keys.
    assert_eq!(output[0].0, 2);
    assert_eq!(output[0].1, "b");
    assert_eq!(output[1].0, 1);
    assert!(output[1].1 == "ac" || output[1].1 == "ca");
    assert_eq!(job.state(), FINISHED);
}

#[test]
fn test_empty_input_completes_immediately() {
    let output: Arc<Mutex<Vec<(i32, String)>>> = Arc::new(Mutex::new(Vec::new()));
    let job = start_job(Concat, Vec::new(), Arc::clone(&output), 4);
    job.wait();
    assert!(output.lock().is_empty());
    assert_eq!(job.state(), FINISHED);
}

#[test]
fn test_large_job_groups_every_pair() {
    let input: Vec<(u32, u32)> = (0..100_000).map(|i| (i % 10, i)).collect();
    let output = Arc::new(Mutex::new(Vec::new()));
    let job = start_job(CountPerKey, input, Arc::clone(&output), 8);
    job.wait();

    let output = output.lock();
    assert_eq!(output.len(), 10);
    assert_eq!(output.iter().map(|(_, n)| n).sum::<usize>(), 100_000);
    let mut keys: Vec<u32> = output.iter().map(|(k, _)| *k).collect();
    keys.sort_unstable();
    assert_eq!(keys, (0..10).collect::<Vec<_>>());
    assert_eq!(job.state(), FINISHED);
}

#[test]
fn test_concurrent_waiters_all_return() {
    let input: Vec<(u32, u32)> = (0..1_000).map(|i| (i % 7, i)).collect();
    let output = Arc::new(Mutex::new(Vec::new()));
    let job = start_job(CountPerKey, input, output, 4);

    let waiters: Vec<_> = (0..3)
        .map(|_| {
            let job = job.clone();
            std::thread::spawn(move || {
                job.wait();
                job.state()
            })
        })
        .collect();
    for waiter in waiters {
        assert_eq!(waiter.join().unwrap(), FINISHED);
    }
    // Arriving after completion returns at once.
    job.wait();
    assert_eq!(job.state(), FINISHED);
}

#[test]
fn test_wait_is_idempotent_and_close_waits() {
    let input = vec![(1, "x".to_string())];
    let output = Arc::new(Mutex::new(Vec::new()));
    let job = start_job(Concat, input, Arc::clone(&output), 2);
    job.wait();
    job.wait();
    assert_eq!(job.state(), FINISHED);
    job.close();
    assert_eq!(*output.lock(), vec![(1, "x".to_string())]);
}
