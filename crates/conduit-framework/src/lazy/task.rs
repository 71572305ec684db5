use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio_util::task::TaskTracker;
use tracing::{debug, error};

use super::{LazyJob, LazyRunner, run_logged};

/// Runs lazy jobs as detached tasks on the ambient tokio runtime.
///
/// Spawned tasks are tracked so [`LazyRunner::shutdown`] can wait for them.
#[derive(Debug, Clone, Default)]
pub struct TaskLazyRunner {
    tasks: TaskTracker,
}

impl TaskLazyRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of jobs still running.
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }
}

#[async_trait]
impl LazyRunner for TaskLazyRunner {
    fn start(&self, job: LazyJob) {
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                error!(function = job.name(), error = %e, "No tokio runtime to schedule lazy function on");
                return;
            }
        };
        debug!(function = job.name(), "Scheduling lazy function as task");
        self.tasks.spawn_on(run_logged(job), &handle);
    }

    async fn shutdown(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    fn name(&self) -> &str {
        "task"
    }
}
