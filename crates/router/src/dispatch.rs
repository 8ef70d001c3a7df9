//! Bounded fan-out worker pool.
//!
//! Write fan-out is fire-and-forget: a [`DispatchJob`] is queued on a bounded
//! channel and a fixed set of workers deliver it, retrying retryable failures
//! with exponential backoff. Failed jobs are logged and dropped.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use backon::{ExponentialBuilder, Retryable};
use tagindex_types::{
    IndexError,
    config::{DispatchConfig, OverflowPolicy},
};
use tokio::{
    sync::{Mutex as AsyncMutex, mpsc},
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    metrics,
    protocol::{ShardRequest, ShardResponse},
    transport::ShardTransport,
};

/// One shard call to deliver.
#[derive(Debug, Clone)]
pub struct DispatchJob {
    /// Target node.
    pub node: Url,
    /// Call to send.
    pub request: ShardRequest,
}

/// Worker pool delivering [`DispatchJob`]s.
pub struct Dispatcher {
    sender: parking_lot::Mutex<Option<mpsc::Sender<DispatchJob>>>,
    overflow: OverflowPolicy,
    pending: Arc<AtomicUsize>,
    workers: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Spawns `config.workers` workers on the current runtime.
    pub fn start<T: ShardTransport>(config: DispatchConfig, transport: Arc<T>) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let receiver = Arc::new(AsyncMutex::new(receiver));
        let pending = Arc::new(AtomicUsize::new(0));
        let config = Arc::new(config);

        let workers = (0..config.workers.max(1))
            .map(|id| {
                let receiver = Arc::clone(&receiver);
                let transport = Arc::clone(&transport);
                let pending = Arc::clone(&pending);
                let config = Arc::clone(&config);
                tokio::spawn(async move {
                    loop {
                        let job = receiver.lock().await.recv().await;
                        let Some(job) = job else { break };
                        deliver(transport.as_ref(), &config, job).await;
                        let depth = pending.fetch_sub(1, Ordering::SeqCst) - 1;
                        metrics::set_dispatch_queue_depth(depth);
                    }
                    debug!(worker = id, "dispatch worker stopped");
                })
            })
            .collect();

        info!(
            workers = config.workers,
            queue_capacity = config.queue_capacity,
            overflow = ?config.overflow,
            "dispatch pool started"
        );
        Self {
            sender: parking_lot::Mutex::new(Some(sender)),
            overflow: config.overflow,
            pending,
            workers: parking_lot::Mutex::new(workers),
        }
    }

    /// Queues a job. Returns whether it was accepted.
    ///
    /// With [`OverflowPolicy::Block`] this waits for queue space; with
    /// [`OverflowPolicy::Reject`] a full queue drops the job.
    pub async fn submit(&self, job: DispatchJob) -> bool {
        let Some(sender) = self.sender.lock().clone() else {
            warn!(node = %job.node, "dispatch pool is shut down, dropping job");
            return false;
        };
        self.pending.fetch_add(1, Ordering::SeqCst);

        let accepted = match self.overflow {
            OverflowPolicy::Block => sender.send(job).await.is_ok(),
            OverflowPolicy::Reject => match sender.try_send(job) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(job)) => {
                    metrics::record_dispatch_rejected();
                    warn!(node = %job.node, request = %job.request.request_line(), "dispatch queue full, rejecting job");
                    false
                },
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            },
        };

        if accepted {
            metrics::set_dispatch_queue_depth(self.pending.load(Ordering::SeqCst));
        } else {
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
        accepted
    }

    /// Jobs queued or in flight.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Stops accepting jobs and waits for the queue to drain.
    pub async fn shutdown(&self) {
        drop(self.sender.lock().take());
        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "dispatch worker panicked");
            }
        }
        info!("dispatch pool stopped");
    }
}

/// Calls `node` once, bounded by `timeout`, and maps shard failures onto errors.
pub(crate) async fn call_once<T: ShardTransport>(
    transport: &T,
    node: &Url,
    request: ShardRequest,
    timeout: Duration,
) -> Result<ShardResponse, IndexError> {
    let namespace = request.namespace.clone();
    match tokio::time::timeout(timeout, transport.call(node, request)).await {
        Ok(response) => response?.into_result(node.as_str(), &namespace),
        Err(_) => Err(IndexError::Transport {
            node: node.to_string(),
            message: format!("no reply within {timeout:?}"),
        }),
    }
}

async fn deliver<T: ShardTransport>(transport: &T, config: &DispatchConfig, job: DispatchJob) {
    let started = Instant::now();
    let backoff = ExponentialBuilder::new()
        .with_min_delay(config.retry_delay)
        .with_max_times(config.max_attempts.saturating_sub(1) as usize);

    let node = &job.node;
    let request = &job.request;
    let result = (|| async move {
        call_once(transport, node, request.clone(), config.request_timeout).await
    })
    .retry(backoff)
    .sleep(tokio::time::sleep)
    .when(IndexError::is_retryable)
    .notify(|err: &IndexError, dur: Duration| {
        metrics::record_dispatch_retry();
        warn!(
            node = %node,
            request = %request.request_line(),
            backoff_ms = dur.as_millis() as u64,
            error = %err,
            "shard call failed, retrying"
        );
    })
    .await;

    let elapsed = started.elapsed().as_secs_f64();
    match result {
        Ok(response) => {
            metrics::record_dispatch_job(true, elapsed);
            debug!(node = %node, request = %request.request_line(), ?response, "fan-out job delivered");
        },
        Err(err) => {
            metrics::record_dispatch_job(false, elapsed);
            warn!(
                node = %node,
                request = %request.request_line(),
                error = %err,
                suggested_action = err.suggested_action(),
                "fan-out job dropped"
            );
        },
    }
}
