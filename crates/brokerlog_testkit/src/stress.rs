//! Stress tests for the journal and its index collections.
//!
//! These tests verify behavior under heavy load and concurrent access.

use crate::fixtures::body_for;
use brokerlog_collections::{ConcurrentLongHashMap, ConcurrentLongHashSet};
use brokerlog_core::{Journal, Record};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of operations per thread.
    pub operations: usize,
    /// Number of concurrent threads.
    pub threads: usize,
    /// Size of record bodies in bytes.
    pub record_size: usize,
    /// Number of distinct keys owned by each thread.
    pub keys_per_thread: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 10_000,
            threads: 4,
            record_size: 64,
            keys_per_thread: 1_000,
        }
    }
}

/// Value stored for `key` by the map stress tests. Readers check that any
/// value they observe is the one belonging to the key they asked for.
pub fn value_for(key: i64) -> u64 {
    (key as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1
}

fn tally(successful: &AtomicUsize, failed: &AtomicUsize, ok: bool) {
    if ok {
        successful.fetch_add(1, Ordering::Relaxed);
    } else {
        failed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Writers put and remove their own keys while readers look up keys of
/// every writer. A read that returns another key's value is a failure.
///
/// Half of `config.threads` write and half read, at least one of each.
pub fn stress_map_concurrent(
    map: Arc<ConcurrentLongHashMap<u64>>,
    config: &StressConfig,
) -> StressTestResult {
    let writers = (config.threads / 2).max(1);
    let readers = (config.threads - writers).max(1);
    let key_space = (writers * config.keys_per_thread) as i64;

    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    let mut handles = Vec::new();
    for t in 0..writers {
        let map = Arc::clone(&map);
        let successful = Arc::clone(&successful);
        let failed = Arc::clone(&failed);
        let config = config.clone();

        handles.push(thread::spawn(move || {
            let base = (t * config.keys_per_thread) as i64;
            for i in 0..config.operations {
                let key = base + (i % config.keys_per_thread) as i64;
                let ok = if (i / config.keys_per_thread) % 2 == 0 {
                    map.put(key, value_for(key)).map_or(true, |old| old == value_for(key))
                } else {
                    map.remove(key).map_or(true, |old| old == value_for(key))
                };
                tally(&successful, &failed, ok);
            }
        }));
    }

    for t in 0..readers {
        let map = Arc::clone(&map);
        let successful = Arc::clone(&successful);
        let failed = Arc::clone(&failed);
        let operations = config.operations;

        handles.push(thread::spawn(move || {
            for i in 0..operations {
                let key = ((i * 7919 + t * 104_729) as i64) % key_space;
                let ok = map.get(key).map_or(true, |value| value == value_for(key));
                tally(&successful, &failed, ok);
            }
        }));
    }

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

/// Each thread adds its own keys to a shared set, then removes every other
/// one. Every operation must report the expected membership change.
pub fn stress_set_concurrent(set: Arc<ConcurrentLongHashSet>, config: &StressConfig) -> StressTestResult {
    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let set = Arc::clone(&set);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            let keys = config.keys_per_thread;

            thread::spawn(move || {
                let base = (t * keys) as i64;
                for key in base..base + keys as i64 {
                    tally(&successful, &failed, set.add(key));
                }
                for key in (base..base + keys as i64).step_by(2) {
                    tally(&successful, &failed, set.remove(key));
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

/// Appends records from one thread. Every id in `0..keys_per_thread` is
/// added, then each operation updates or deletes and re-adds one of them.
pub fn stress_sequential_appends(journal: &Journal, config: &StressConfig) -> StressTestResult {
    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;
    let keys = config.keys_per_thread as i64;

    for id in 0..keys {
        match journal.append_add(Record::new(id, 0, body_for(id, 0, config.record_size))) {
            Ok(()) => successful += 1,
            Err(_) => failed += 1,
        }
    }

    for i in 0..config.operations {
        let id = i as i64 % keys;
        let version = (i / config.keys_per_thread) as u32 + 1;
        let result = if i % 4 == 3 {
            journal
                .append_delete(id)
                .and_then(|()| journal.append_add(Record::new(id, 0, body_for(id, version, config.record_size))))
        } else {
            journal.append_update(Record::new(id, 1, body_for(id, version, config.record_size)))
        };
        match result {
            Ok(()) => successful += 1,
            Err(_) => failed += 1,
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Appends from several threads, each owning its own ids, while another
/// thread compacts in a loop. Each thread adds its ids, then deletes every
/// even one.
///
/// Returns the append result and the number of compactions that ran.
pub fn stress_appends_with_compaction(
    journal: Arc<Journal>,
    config: &StressConfig,
) -> (StressTestResult, usize) {
    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(AtomicBool::new(false));
    let start = Instant::now();

    let compactor = {
        let journal = Arc::clone(&journal);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut compactions = 0usize;
            while !done.load(Ordering::Acquire) {
                if journal.compact().is_ok() {
                    compactions += 1;
                }
                thread::yield_now();
            }
            compactions
        })
    };

    let writers: Vec<_> = (0..config.threads)
        .map(|t| {
            let journal = Arc::clone(&journal);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            let keys = config.keys_per_thread;
            let record_size = config.record_size;

            thread::spawn(move || {
                let base = (t * keys) as i64;
                for id in base..base + keys as i64 {
                    let result = journal.append_add(Record::new(id, 0, body_for(id, 0, record_size)));
                    tally(&successful, &failed, result.is_ok());
                }
                for id in (base..base + keys as i64).step_by(2) {
                    tally(&successful, &failed, journal.append_delete(id).is_ok());
                }
            })
        })
        .collect();

    for handle in writers {
        handle.join().expect("Thread panicked");
    }
    done.store(true, Ordering::Release);
    let compactions = compactor.join().expect("Compactor panicked");

    let result = StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    );
    (result, compactions)
}
