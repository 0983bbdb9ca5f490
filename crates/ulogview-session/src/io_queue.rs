//! Serial queue running blocking file work one job at a time

use tokio::sync::{mpsc, oneshot};

type Work = Box<dyn FnOnce() + Send + 'static>;

enum Job {
    Run(Work),
    Flush(oneshot::Sender<()>),
}

/// Single worker executing submitted jobs in submission order
///
/// Marked log files are only read and written through this queue so two
/// jobs never touch the same file concurrently.
#[derive(Clone)]
pub struct IoQueue {
    jobs: mpsc::UnboundedSender<Job>,
}

impl IoQueue {
    /// Spawn the worker, must be called within a tokio runtime
    pub fn new() -> Self {
        let (jobs, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_jobs(rx));
        Self { jobs }
    }

    /// Queue a blocking job
    pub fn submit(&self, work: impl FnOnce() + Send + 'static) {
        if self.jobs.send(Job::Run(Box::new(work))).is_err() {
            tracing::warn!("I/O queue stopped, job dropped");
        }
    }

    /// Wait until every job submitted before this call has completed
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.jobs.send(Job::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }
}

impl Default for IoQueue {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_jobs(mut rx: mpsc::UnboundedReceiver<Job>) {
    while let Some(job) = rx.recv().await {
        match job {
            Job::Run(work) => {
                if let Err(e) = tokio::task::spawn_blocking(work).await {
                    tracing::error!(error = %e, "I/O job failed");
                }
            }
            Job::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}
