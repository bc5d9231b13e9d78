use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use crate::config::EngineOptions;
use crate::connection::ConnectionRef;
use crate::driver::Driver;
use crate::error::SqlDispatchError;
use crate::job::{Job, JobKind};
use crate::query::QueryAndParams;
use crate::scheduler::MainScheduler;

use super::channel::Command;
use super::dispatcher::run_worker;

/// Submission side of the single worker thread.
pub(crate) struct WorkQueue<H> {
    // None once shutdown has started; guards against enqueue racing shutdown.
    sender: Mutex<Option<Sender<Command<H>>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    pending: Arc<AtomicUsize>,
    next_job_id: AtomicU64,
    worker_name: String,
}

impl<H: Send + 'static> WorkQueue<H> {
    pub(crate) fn spawn<D>(
        driver: Arc<D>,
        scheduler: Arc<dyn MainScheduler>,
        options: &EngineOptions,
    ) -> Result<Self, SqlDispatchError>
    where
        D: Driver<Handle = H>,
    {
        let (sender, receiver) = mpsc::channel::<Command<H>>();
        let pending = Arc::new(AtomicUsize::new(0));
        let worker_pending = Arc::clone(&pending);
        let worker_name = options.worker_name.clone();
        let handle = thread::Builder::new()
            .name(worker_name.clone())
            .spawn(move || {
                run_worker(driver.as_ref(), scheduler.as_ref(), &receiver, &worker_pending);
            })
            .map_err(|err| {
                SqlDispatchError::ConnectionError(format!("failed to spawn worker thread: {err}"))
            })?;
        debug!(worker = %worker_name, "worker started");

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            handle: Mutex::new(Some(handle)),
            pending,
            next_job_id: AtomicU64::new(1),
            worker_name,
        })
    }

    /// Append a job and wake the worker. Callable from any thread.
    pub(crate) fn enqueue(
        &self,
        sql: QueryAndParams,
        connection: ConnectionRef<H>,
        kind: JobKind,
    ) -> Result<u64, SqlDispatchError> {
        let sender = lock(&self.sender);
        let Some(sender) = sender.as_ref() else {
            return Err(SqlDispatchError::ConnectionError(
                "worker is shut down; job rejected".into(),
            ));
        };
        let id = self.next_job_id.fetch_add(1, Ordering::Relaxed);
        let job = Job::new(id, sql, connection, kind);
        tracing::trace!(?job, "job queued");
        self.pending.fetch_add(1, Ordering::SeqCst);
        sender.send(Command::Run(job)).map_err(|_| {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            SqlDispatchError::ConnectionError("worker closed".into())
        })?;
        Ok(id)
    }

    /// Stop accepting jobs, let the worker drain what is queued, and join it.
    pub(crate) fn shutdown(&self) {
        if let Some(sender) = lock(&self.sender).take() {
            // The worker may already be gone after a panic; the join below reports it.
            let _ = sender.send(Command::Shutdown);
        }
        let Some(handle) = lock(&self.handle).take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            warn!(worker = %self.worker_name, "shutdown requested from the worker thread; not joining");
            return;
        }
        match handle.join() {
            Ok(()) => debug!(worker = %self.worker_name, "worker joined"),
            Err(_) => warn!(worker = %self.worker_name, "worker thread terminated by panic"),
        }
    }

    pub(crate) fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub(crate) fn is_accepting(&self) -> bool {
        lock(&self.sender).is_some()
    }
}

impl<H> Drop for WorkQueue<H> {
    fn drop(&mut self) {
        if let Some(sender) = lock(&self.sender).take() {
            let _ = sender.send(Command::Shutdown);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
