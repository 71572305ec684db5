use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::JoinHandle;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::{debug, error, warn};

use super::{LazyJob, LazyRunner, run_logged};

type SharedReceiver = Arc<Mutex<UnboundedReceiver<LazyJob>>>;

/// Runs lazy jobs on a bounded pool of OS threads, each driving its own
/// current-thread runtime.
///
/// Suited to lazy functions that block or are CPU heavy and would otherwise
/// starve the runtime serving acknowledgments. Workers are spawned on demand
/// up to the configured limit; further jobs queue until a worker frees up.
#[derive(Debug)]
pub struct ThreadLazyRunner {
    max_threads: usize,
    pool: Mutex<Option<Pool>>,
    pending: Arc<AtomicUsize>,
}

#[derive(Debug)]
struct Pool {
    sender: UnboundedSender<LazyJob>,
    receiver: SharedReceiver,
    workers: Vec<JoinHandle<()>>,
}

impl Default for ThreadLazyRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadLazyRunner {
    /// One worker per available core.
    pub fn new() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self::with_max_threads(cores)
    }

    /// At most `max_threads` workers; zero is treated as one.
    pub fn with_max_threads(max_threads: usize) -> Self {
        Self {
            max_threads: max_threads.max(1),
            pool: Mutex::new(None),
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn max_threads(&self) -> usize {
        self.max_threads
    }

    /// Number of jobs queued or running.
    pub fn in_flight(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    fn spawn_worker(&self, pool: &mut Pool) {
        let index = pool.workers.len();
        let receiver = Arc::clone(&pool.receiver);
        let pending = Arc::clone(&self.pending);
        let spawned = std::thread::Builder::new()
            .name(format!("conduit-lazy-{index}"))
            .spawn(move || work(receiver, pending));
        match spawned {
            Ok(handle) => {
                debug!(worker = index, "Spawned lazy worker thread");
                pool.workers.push(handle);
            }
            Err(e) => error!(worker = index, error = %e, "Failed to spawn lazy thread"),
        }
    }
}

fn work(receiver: SharedReceiver, pending: Arc<AtomicUsize>) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "Failed to build lazy runtime");
            return;
        }
    };
    loop {
        let next = receiver.lock().blocking_recv();
        let Some(job) = next else {
            break;
        };
        runtime.block_on(run_logged(job));
        pending.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl LazyRunner for ThreadLazyRunner {
    fn start(&self, job: LazyJob) {
        let function = job.name().to_owned();
        let mut guard = self.pool.lock();
        let pool = guard.get_or_insert_with(|| {
            let (sender, receiver) = unbounded_channel();
            Pool {
                sender,
                receiver: Arc::new(Mutex::new(receiver)),
                workers: Vec::new(),
            }
        });

        let pending = self.pending.fetch_add(1, Ordering::SeqCst) + 1;
        if let Err(e) = pool.sender.send(job) {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            error!(function = %e.0.name(), "Lazy worker pool is closed, dropping job");
            return;
        }
        pool.workers.retain(|w| !w.is_finished());
        if pool.workers.len() < self.max_threads && pending > pool.workers.len() {
            self.spawn_worker(pool);
        }
        debug!(function = %function, workers = pool.workers.len(), "Queued lazy function for thread pool");
    }

    async fn shutdown(&self) {
        // dropping the sender lets workers drain the queue and exit
        let Some(Pool { workers, .. }) = self.pool.lock().take() else {
            return;
        };
        if workers.is_empty() {
            return;
        }
        let joined = tokio::task::spawn_blocking(move || {
            for worker in workers {
                if worker.join().is_err() {
                    warn!("Lazy thread panicked outside the lazy function");
                }
            }
        })
        .await;
        if let Err(e) = joined {
            warn!(error = %e, "Failed to join lazy threads");
        }
    }

    fn name(&self) -> &str {
        "thread"
    }
}
