//! Stress helpers for the pending change queue.
//!
//! These verify deduplication holds under heavy load and concurrent
//! producers.

use offsync_engine::PendingChangeQueue;
use offsync_protocol::{ChangeOperation, EntityType};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Outcome of an enqueue stress run.
#[derive(Debug, Clone)]
pub struct QueueStressReport {
    /// Enqueue calls that returned `Ok`.
    pub enqueued: usize,
    /// Enqueue calls that returned an error.
    pub failed: usize,
    /// Pending items left after the run.
    pub pending: usize,
    /// Wall time of the run.
    pub duration: Duration,
}

impl QueueStressReport {
    fn finish(enqueued: usize, failed: usize, queue: &PendingChangeQueue, started: Instant) -> Self {
        Self {
            enqueued,
            failed,
            pending: queue.pending_changes_count(),
            duration: started.elapsed(),
        }
    }

    /// Enqueue calls per second.
    pub fn throughput(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            (self.enqueued + self.failed) as f64 / secs
        } else {
            0.0
        }
    }

    /// Prints a one-line summary.
    pub fn print_summary(&self, name: &str) {
        println!(
            "{name}: {} enqueued, {} failed, {} pending, {:?} ({:.0} ops/sec)",
            self.enqueued,
            self.failed,
            self.pending,
            self.duration,
            self.throughput()
        );
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of operations to perform.
    pub operations: usize,
    /// Number of concurrent producer threads.
    pub threads: usize,
    /// Number of distinct entities the operations touch.
    pub entity_count: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 10_000,
            threads: 4,
            entity_count: 500,
        }
    }
}

fn operation_for(i: usize) -> ChangeOperation {
    // Mostly updates, some creates, an occasional delete.
    if i % 17 == 0 {
        ChangeOperation::Delete
    } else if i % 5 == 0 {
        ChangeOperation::Create
    } else {
        ChangeOperation::Update
    }
}

/// Enqueues `config.operations` changes from a single thread.
pub fn stress_sequential_enqueue(
    queue: &PendingChangeQueue,
    config: &StressConfig,
) -> QueueStressReport {
    let entity_type = EntityType::new("notes");
    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        let id = format!("e{}", i % config.entity_count);
        match queue.enqueue(&id, entity_type.clone(), operation_for(i)) {
            Ok(_) => successful += 1,
            Err(_) => failed += 1,
        }
    }

    QueueStressReport::finish(successful, failed, queue, start)
}

/// Enqueues changes from `config.threads` threads over a shared key space.
pub fn stress_concurrent_enqueue(
    queue: Arc<PendingChangeQueue>,
    config: &StressConfig,
) -> QueueStressReport {
    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let ops_per_thread = config.operations / config.threads.max(1);

    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let queue = Arc::clone(&queue);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            let entity_count = config.entity_count;

            thread::spawn(move || {
                let entity_type = EntityType::new("notes");
                for i in 0..ops_per_thread {
                    let n = t * ops_per_thread + i;
                    let id = format!("e{}", n % entity_count);
                    match queue.enqueue(&id, entity_type.clone(), operation_for(n)) {
                        Ok(_) => successful.fetch_add(1, Ordering::Relaxed),
                        Err(_) => failed.fetch_add(1, Ordering::Relaxed),
                    };
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Producer thread panicked");
    }

    QueueStressReport::finish(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        &queue,
        start,
    )
}
