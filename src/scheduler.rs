// Delayed and immediate task execution for lease acquisition and renewal

use crate::{Error, Result};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, Semaphore};
use tracing::{debug, info};

/// Bounded task pool with timer-driven scheduling.
///
/// A delayed task waits on a timer without holding a worker permit, so
/// topics sitting in retry backoff occupy no workers. Each manager owns
/// its scheduler; nothing is process-wide.
#[derive(Debug)]
pub struct RenewalScheduler {
    name: String,
    workers: Arc<Semaphore>,
    runtime: Mutex<Option<Handle>>,
    shutdown_tx: broadcast::Sender<()>,
    pending: Arc<AtomicUsize>,
}

struct PendingGuard(Arc<AtomicUsize>);

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl RenewalScheduler {
    pub fn new(name: impl Into<String>, worker_threads: usize) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            name: name.into(),
            workers: Arc::new(Semaphore::new(worker_threads)),
            runtime: Mutex::new(None),
            shutdown_tx,
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Binds the scheduler to the current tokio runtime.
    pub fn start(&self) -> Result<()> {
        let mut runtime = self.runtime.lock();
        if runtime.is_some() {
            return Ok(());
        }
        let handle = Handle::try_current()
            .map_err(|e| Error::Scheduler(format!("{} needs a tokio runtime: {}", self.name, e)))?;
        *runtime = Some(handle);
        info!("Scheduler {} started", self.name);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.runtime.lock().is_some()
    }

    /// Number of submitted tasks that have not finished or been cancelled.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn available_workers(&self) -> usize {
        self.workers.available_permits()
    }

    pub fn submit<F>(&self, task: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.schedule(Duration::ZERO, task)
    }

    /// Runs `task` on a worker once `delay` has elapsed.
    pub fn schedule<F>(&self, delay: Duration, task: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = self
            .runtime
            .lock()
            .clone()
            .ok_or_else(|| Error::Scheduler(format!("{} is not running", self.name)))?;

        let workers = self.workers.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        self.pending.fetch_add(1, Ordering::SeqCst);
        let guard = PendingGuard(self.pending.clone());

        handle.spawn(async move {
            let _guard = guard;
            let run = async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let Ok(_permit) = workers.acquire_owned().await else {
                    return;
                };
                task.await;
            };

            tokio::select! {
                _ = shutdown_rx.recv() => {}
                _ = run => {}
            }
        });
        Ok(())
    }

    /// Cancels every pending task and refuses new ones until restarted.
    pub fn shutdown(&self) {
        if self.runtime.lock().take().is_none() {
            return;
        }
        let cancelled = self.shutdown_tx.send(()).unwrap_or(0);
        debug!("Scheduler {} cancelled {} pending tasks", self.name, cancelled);
        info!("Scheduler {} stopped", self.name);
    }
}
