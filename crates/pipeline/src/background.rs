//! Background task scheduler
//!
//! Bounded fire-and-forget runner for stage-6 work. Jobs are independent:
//! one failure never affects the response or the other jobs. Transient
//! failures get one retry. Shutdown drains in-flight jobs with a deadline.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};

use helmsman_core::Error as CoreError;

type JobFuture = Pin<Box<dyn Future<Output = Result<(), CoreError>> + Send>>;

/// One schedulable unit. The factory is re-invoked for the retry.
pub struct Job {
    name: &'static str,
    factory: Box<dyn Fn() -> JobFuture + Send + Sync>,
}

impl Job {
    pub fn new<F, Fut>(name: &'static str, factory: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), CoreError>> + Send + 'static,
    {
        Self {
            name,
            factory: Box::new(move || Box::pin(factory())),
        }
    }
}

/// Bounded background scheduler
pub struct BackgroundScheduler {
    tx: Mutex<Option<mpsc::Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    pending: Arc<AtomicUsize>,
}

impl BackgroundScheduler {
    /// Start the worker with a bounded queue
    pub fn start(queue_capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<Job>(queue_capacity);
        let pending = Arc::new(AtomicUsize::new(0));
        let pending_worker = pending.clone();

        let worker = tokio::spawn(async move {
            let mut running: JoinSet<()> = JoinSet::new();

            loop {
                tokio::select! {
                    job = rx.recv() => match job {
                        Some(job) => {
                            let pending = pending_worker.clone();
                            running.spawn(async move {
                                run_job(job).await;
                                pending.fetch_sub(1, Ordering::SeqCst);
                            });
                        }
                        None => break,
                    },
                    Some(_) = running.join_next(), if !running.is_empty() => {}
                }
            }

            // Channel closed: drain what is still running
            while running.join_next().await.is_some() {}
        });

        Self {
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            pending,
        }
    }

    /// Enqueue without awaiting. A full queue drops the job (logged);
    /// background work must never block request serving.
    pub fn schedule(&self, job: Job) {
        let name = job.name;
        let Some(tx) = self.tx.lock().clone() else {
            tracing::warn!(job = name, "scheduler already shut down, dropping job");
            return;
        };
        self.pending.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = tx.try_send(job) {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            tracing::warn!(job = name, error = %e, "background queue full, dropping job");
            metrics::counter!("helmsman_background_dropped_total").increment(1);
        }
    }

    /// Jobs scheduled but not yet finished
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Wait until every scheduled job has finished (test support)
    pub async fn quiesce(&self) {
        while self.pending() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Stop accepting jobs and drain with a deadline
    pub async fn shutdown(&self, drain_timeout: Duration) {
        self.tx.lock().take();
        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        if tokio::time::timeout(drain_timeout, worker).await.is_err() {
            tracing::warn!("background drain deadline hit, abandoning remaining jobs");
        }
    }
}

/// Run one job with a single retry on transient failure
async fn run_job(job: Job) {
    match (job.factory)().await {
        Ok(()) => {
            metrics::counter!("helmsman_background_ok_total", "job" => job.name).increment(1);
        }
        Err(e) if e.is_transient() => {
            tracing::warn!(job = job.name, error = %e, "background job failed, retrying once");
            match (job.factory)().await {
                Ok(()) => {
                    metrics::counter!("helmsman_background_ok_total", "job" => job.name)
                        .increment(1);
                }
                Err(e) => {
                    tracing::error!(job = job.name, error = %e, "background job failed after retry");
                    metrics::counter!("helmsman_background_failed_total", "job" => job.name)
                        .increment(1);
                }
            }
        }
        Err(e) => {
            tracing::error!(job = job.name, error = %e, "background job failed");
            metrics::counter!("helmsman_background_failed_total", "job" => job.name).increment(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[tokio::test]
    async fn test_jobs_run_and_quiesce() {
        let scheduler = BackgroundScheduler::start(16);
        let counter = Arc::new(AtomicU32::new(0));

        for _ in 0..5 {
            let counter = counter.clone();
            scheduler.schedule(Job::new("tick", move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }));
        }

        scheduler.quiesce().await;
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_transient_failure_retried_once() {
        let scheduler = BackgroundScheduler::start(4);
        let attempts = Arc::new(AtomicU32::new(0));

        let a = attempts.clone();
        scheduler.schedule(Job::new("flaky", move || {
            let attempts = a.clone();
            async move {
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(CoreError::Transient("hiccup".into()))
                } else {
                    Ok(())
                }
            }
        }));

        scheduler.quiesce().await;
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retried() {
        let scheduler = BackgroundScheduler::start(4);
        let attempts = Arc::new(AtomicU32::new(0));

        let a = attempts.clone();
        scheduler.schedule(Job::new("broken", move || {
            let attempts = a.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(CoreError::Permanent("schema".into()))
            }
        }));

        scheduler.quiesce().await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_does_not_affect_other_jobs() {
        let scheduler = BackgroundScheduler::start(8);
        let ok = Arc::new(AtomicU32::new(0));

        scheduler.schedule(Job::new("bad", || async {
            Err(CoreError::Permanent("boom".into()))
        }));
        let ok2 = ok.clone();
        scheduler.schedule(Job::new("good", move || {
            let ok = ok2.clone();
            async move {
                ok.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }));

        scheduler.quiesce().await;
        assert_eq!(ok.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_drains() {
        let scheduler = BackgroundScheduler::start(4);
        let done = Arc::new(AtomicU32::new(0));

        let d = done.clone();
        scheduler.schedule(Job::new("slow", move || {
            let done = d.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }));

        scheduler.shutdown(Duration::from_secs(1)).await;
        assert_eq!(done.load(Ordering::SeqCst), 1);

        // Scheduling after shutdown is a no-op
        scheduler.schedule(Job::new("late", || async { Ok(()) }));
    }
}
