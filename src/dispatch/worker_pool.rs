use crate::context::Context;
use crate::router::Route;
use crate::runtime_config::RuntimeConfig;
use may::sync::mpsc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::core::run_request;

/// One queued request: the matched route plus the Context it will run
/// against. Ownership of the Context travels with the job so a failed
/// submission can still produce an error response.
pub struct RequestJob {
    pub route: Arc<Route>,
    pub ctx: Context,
}

/// Counters for observing the shared worker pool.
#[derive(Debug, Default)]
pub struct WorkerPoolMetrics {
    queue_depth: AtomicUsize,
    dispatched: AtomicU64,
    completed: AtomicU64,
}

impl WorkerPoolMetrics {
    fn record_dispatch(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        self.queue_depth.fetch_add(1, Ordering::Relaxed);
    }

    fn record_completion(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.queue_depth.fetch_sub(1, Ordering::Relaxed);
    }

    /// Approximate number of jobs queued or running.
    #[must_use]
    pub fn queue_depth(&self) -> usize {
        self.queue_depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }
}

/// Shared pool of worker coroutines running handlers off the carrier
/// coroutine.
///
/// All workers share one unbounded queue and load-balance by competing on
/// `recv`. The queue bound is advisory: crossing it logs a saturation
/// warning, submissions are never rejected for depth.
pub struct WorkerPool {
    sender: mpsc::Sender<RequestJob>,
    metrics: Arc<WorkerPoolMetrics>,
    queue_bound: usize,
}

impl WorkerPool {
    #[must_use]
    pub fn new(config: &RuntimeConfig) -> Self {
        let (tx, rx) = mpsc::channel::<RequestJob>();
        let rx = Arc::new(rx);
        let metrics = Arc::new(WorkerPoolMetrics::default());

        info!(
            workers = config.workers,
            stack_size = config.stack_size,
            queue_bound = config.queue_bound,
            "starting worker pool"
        );

        for worker_id in 0..config.workers {
            let rx = Arc::clone(&rx);
            let metrics = Arc::clone(&metrics);
            let builder = may::coroutine::Builder::new().stack_size(config.stack_size);
            // SAFETY: the worker closure owns everything it touches (the
            // shared receiver and metrics are Arcs moved into it) and
            // borrows nothing from this stack frame, so it satisfies the
            // 'static requirement spawn cannot check.
            let spawned = unsafe {
                builder.spawn(move || {
                    debug!(worker_id, "worker started");
                    while let Ok(mut job) = rx.recv() {
                        run_request(&job.route, &mut job.ctx);
                        metrics.record_completion();
                    }
                    debug!(worker_id, "worker exiting, queue closed");
                })
            };
            if let Err(e) = spawned {
                warn!(worker_id, error = %e, "failed to spawn worker");
            }
        }

        Self {
            sender: tx,
            metrics,
            queue_bound: config.queue_bound,
        }
    }

    /// Queue a job for the workers. Returns the job when the pool is gone so
    /// the caller can fail the request itself.
    pub fn submit(&self, job: RequestJob) -> Result<(), RequestJob> {
        let depth = self.metrics.queue_depth();
        if depth >= self.queue_bound {
            warn!(
                queue_depth = depth,
                queue_bound = self.queue_bound,
                "worker pool saturated, request queued anyway"
            );
        }
        self.metrics.record_dispatch();
        self.sender.send(job).map_err(|e| {
            self.metrics.record_completion();
            e.0
        })
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<WorkerPoolMetrics> {
        &self.metrics
    }
}
