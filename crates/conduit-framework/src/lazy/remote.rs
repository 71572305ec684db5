use std::sync::Arc;

use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use conduit_core::{DeferredPayload, RetryConfig};

use super::{LazyJob, LazyRunner};
use crate::dispatcher::Dispatcher;
use crate::error::{InvokeError, InvokeResult};

/// A compute target that accepts serialized deferred invocations.
///
/// `invoke` resolves once the target has accepted the payload, not once the
/// lazy function has run there; its result is never awaited.
#[async_trait]
pub trait RemoteInvoker: Send + Sync + 'static {
    async fn invoke(&self, payload: &DeferredPayload) -> InvokeResult;

    /// Name used in logs.
    fn name(&self) -> &str {
        "remote"
    }
}

/// Ships lazy jobs to a [`RemoteInvoker`], retrying failed submissions.
///
/// Delivery is attempted at least once; acceptance by the target is logged
/// but not confirmed back to the originating request.
#[derive(Clone)]
pub struct RemoteLazyRunner {
    invoker: Arc<dyn RemoteInvoker>,
    retry: RetryConfig,
    tasks: TaskTracker,
}

impl RemoteLazyRunner {
    pub fn new(invoker: impl RemoteInvoker) -> Self {
        Self::from_arc(Arc::new(invoker))
    }

    pub fn from_arc(invoker: Arc<dyn RemoteInvoker>) -> Self {
        Self {
            invoker,
            retry: RetryConfig::default(),
            tasks: TaskTracker::new(),
        }
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

/// Submits `payload`, backing off between retryable failures.
async fn submit(
    invoker: &dyn RemoteInvoker,
    retry: &RetryConfig,
    function: &str,
    payload: &DeferredPayload,
) -> InvokeResult {
    let mut attempt = 0;
    let mut delay = retry.initial_delay;
    loop {
        match invoker.invoke(payload).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_retryable() && attempt < retry.max_retries => {
                attempt += 1;
                warn!(
                    function,
                    invoker = invoker.name(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Remote invocation failed, retrying"
                );
                tokio::time::sleep(delay).await;
                delay = retry.next_delay(delay);
            }
            Err(e) => return Err(e),
        }
    }
}

#[async_trait]
impl LazyRunner for RemoteLazyRunner {
    fn start(&self, job: LazyJob) {
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                error!(function = job.name(), error = %e, "No tokio runtime to submit lazy function from");
                return;
            }
        };
        let invoker = Arc::clone(&self.invoker);
        let retry = self.retry.clone();
        let function = job.name().to_owned();
        let request_id = job.invocation.request_id.clone();
        let payload = job.invocation.to_payload();

        debug!(function = %function, invoker = invoker.name(), "Submitting lazy function to remote target");
        let submission = async move {
            match submit(invoker.as_ref(), &retry, &function, &payload).await {
                Ok(()) => info!(function = %function, request_id = %request_id, "Remote target accepted lazy function"),
                Err(e) => error!(
                    function = %function,
                    request_id = %request_id,
                    error = %e,
                    "Failed to submit lazy function to remote target"
                ),
            }
        };
        self.tasks.spawn_on(submission, &handle);
    }

    async fn shutdown(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    fn name(&self) -> &str {
        "remote"
    }
}

impl std::fmt::Debug for RemoteLazyRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteLazyRunner")
            .field("invoker", &self.invoker.name())
            .field("retry", &self.retry)
            .finish()
    }
}

// ============================================================================
// In-memory queue target
// ============================================================================

/// Enqueues payloads on a bounded channel, standing in for a message queue.
#[derive(Debug, Clone)]
pub struct QueueInvoker {
    tx: mpsc::Sender<DeferredPayload>,
}

impl QueueInvoker {
    /// Creates the invoker and the receiving end of its queue.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<DeferredPayload>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl RemoteInvoker for QueueInvoker {
    async fn invoke(&self, payload: &DeferredPayload) -> InvokeResult {
        self.tx
            .send(payload.clone())
            .await
            .map_err(|_| InvokeError::Closed)
    }

    fn name(&self) -> &str {
        "queue"
    }
}

/// Drains a deferred queue, running each payload through `dispatcher`.
///
/// This is the consuming side of [`QueueInvoker`]; it returns once every
/// sender is dropped.
pub async fn consume_queue(mut rx: mpsc::Receiver<DeferredPayload>, dispatcher: Dispatcher) {
    while let Some(payload) = rx.recv().await {
        match dispatcher.dispatch_payload(payload).await {
            Ok(resp) => debug!(status = resp.status, "Consumed deferred payload"),
            Err(e) => error!(error = %e, "Dropping undecodable deferred payload"),
        }
    }
    debug!("Deferred queue closed");
}
