//! Query queue for serving many callers from a few model contexts.
//!
//! Every worker thread owns one context and pulls requests from a shared
//! queue, so a context never sees two decodes at once. Callers hold a
//! cloneable [`ProbeHandle`] and await the result.

use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};

use super::{ProbeReport, ProbeRequest, TokenProbe};
use crate::error::ProbeError;
use crate::model::TokenModel;
type Result<T> = crate::error::Result<T>;

struct Job {
    request: ProbeRequest,
    reply: oneshot::Sender<Result<ProbeReport>>,
}

/// Async side of the queue: submits requests and awaits their reports.
#[derive(Clone)]
pub struct ProbeHandle {
    tx: mpsc::Sender<Job>,
}

/// Worker side of the queue. Clone it once per worker thread.
#[derive(Clone)]
pub struct ProbeQueue {
    rx: Arc<Mutex<mpsc::Receiver<Job>>>,
}

impl ProbeQueue {
    /// Create a queue holding at most `depth` pending requests.
    pub fn bounded(depth: usize) -> (ProbeHandle, ProbeQueue) {
        let (tx, rx) = mpsc::channel(depth.max(1));
        (
            ProbeHandle { tx },
            ProbeQueue {
                rx: Arc::new(Mutex::new(rx)),
            },
        )
    }

    /// Answer queued requests with `model` until every handle is dropped.
    ///
    /// Blocks the calling thread; must not be called from an async task.
    /// Returns the number of requests served.
    pub fn serve<M: TokenModel + ?Sized>(&self, probe: &TokenProbe, model: &mut M) -> usize {
        let mut served = 0;
        loop {
            let job = {
                let mut rx = self.rx.lock().expect("lock poisoned");
                rx.blocking_recv()
            };
            let Some(job) = job else {
                break;
            };

            let start = std::time::Instant::now();
            let result = probe.query(model, &job.request);
            match &result {
                Ok(report) => tracing::debug!(
                    "query answered in {:.1} ms ({} targets)",
                    start.elapsed().as_secs_f64() * 1000.0,
                    report.entries.len()
                ),
                Err(e) => tracing::debug!("query failed: {}", e),
            }
            // The caller may have given up; nothing to do then.
            let _ = job.reply.send(result);
            served += 1;
        }
        served
    }
}

impl ProbeHandle {
    /// Queue a request and wait for its report.
    ///
    /// Fails with [`ProbeError::WorkerUnavailable`] when no worker is left
    /// to answer it.
    pub async fn submit(&self, request: ProbeRequest) -> Result<ProbeReport> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Job { request, reply })
            .await
            .map_err(|_| ProbeError::WorkerUnavailable)?;
        rx.await.map_err(|_| ProbeError::WorkerUnavailable)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::mock::MockModel;

    fn spawn_worker(queue: ProbeQueue) -> std::thread::JoinHandle<usize> {
        std::thread::spawn(move || {
            let mut model = MockModel::new();
            queue.serve(&TokenProbe::default(), &mut model)
        })
    }

    #[tokio::test]
    async fn test_submit_and_serve() {
        let (handle, queue) = ProbeQueue::bounded(4);
        let worker = spawn_worker(queue);

        let report = handle
            .submit(ProbeRequest::new("Hello", "H,e"))
            .await
            .unwrap();
        assert_eq!(report.entries.len(), 2);

        drop(handle);
        assert_eq!(worker.join().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_errors_reach_the_caller() {
        let (handle, queue) = ProbeQueue::bounded(4);
        let worker = spawn_worker(queue);

        let err = handle
            .submit(ProbeRequest::new("Hello", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::InvalidInput(_)));

        // The worker keeps serving after a failed query
        assert!(handle.submit(ProbeRequest::new("Hi", "i")).await.is_ok());

        drop(handle);
        assert_eq!(worker.join().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_callers_two_workers() {
        let (handle, queue) = ProbeQueue::bounded(2);
        let workers = vec![spawn_worker(queue.clone()), spawn_worker(queue)];

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let handle = handle.clone();
            tasks.push(tokio::spawn(async move {
                handle.submit(ProbeRequest::new("my name", "n,a")).await
            }));
        }
        for task in tasks {
            let report = task.await.unwrap().unwrap();
            assert_eq!(report.entries.len(), 2);
        }

        drop(handle);
        let served: usize = workers.into_iter().map(|w| w.join().unwrap()).sum();
        assert_eq!(served, 8);
    }

    #[tokio::test]
    async fn test_no_worker_is_unavailable() {
        let (handle, queue) = ProbeQueue::bounded(1);
        drop(queue);
        let err = handle
            .submit(ProbeRequest::new("Hello", "H"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::WorkerUnavailable));
    }
}
