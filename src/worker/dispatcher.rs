use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, TryRecvError};

use tracing::{debug, error, trace, warn};

use crate::connection::{ConnectionRef, ConnectionState};
use crate::driver::Driver;
use crate::error::{SqlDispatchError, panic_message};
use crate::job::{Job, JobKind, JobState};
use crate::results::ResultSet;
use crate::scheduler::MainScheduler;

use super::channel::Command;

enum Output {
    Rows(ResultSet),
    Affected {
        count: usize,
        last_insert_id: Option<i64>,
    },
}

/// Connections touched since the queue last drained.
struct RunningSet<H> {
    touched: HashMap<u64, ConnectionRef<H>>,
}

impl<H> RunningSet<H> {
    fn new() -> Self {
        Self {
            touched: HashMap::new(),
        }
    }

    fn touch(&mut self, conn: ConnectionRef<H>) {
        self.touched.entry(conn.id()).or_insert(conn);
    }

    /// Close the native handle of every transient connection used since the
    /// last drain. The registry entry stays, and the next job reopens lazily.
    fn reclaim_transient(&mut self) {
        for (_, conn) in self.touched.drain() {
            if conn.is_persistent() && !conn.is_released() {
                continue;
            }
            if conn.state() != ConnectionState::Closed {
                trace!(connection = conn.id(), owner = %conn.owner_label(), "closing idle transient connection");
            }
            conn.close_native();
        }
    }
}

pub(super) fn run_worker<D: Driver>(
    driver: &D,
    scheduler: &dyn MainScheduler,
    receiver: &Receiver<Command<D::Handle>>,
    pending: &AtomicUsize,
) {
    let mut running = RunningSet::new();

    loop {
        let command = match receiver.try_recv() {
            Ok(command) => command,
            Err(TryRecvError::Empty) => {
                // Closes native handles only; registry entries are host-thread state.
                running.reclaim_transient();
                match receiver.recv() {
                    Ok(command) => command,
                    Err(_) => break,
                }
            }
            Err(TryRecvError::Disconnected) => break,
        };

        match command {
            Command::Run(job) => {
                pending.fetch_sub(1, Ordering::SeqCst);
                let conn = job.connection.clone();
                run_job(driver, scheduler, job);
                running.touch(conn);
            }
            // Everything sent before Shutdown has already been received.
            Command::Shutdown => break,
        }
    }

    running.reclaim_transient();
    debug!(backend = %driver.kind(), "worker loop exited");
}

fn run_job<D: Driver>(driver: &D, scheduler: &dyn MainScheduler, mut job: Job<D::Handle>) {
    job.transition(JobState::Running);

    let outcome = match panic::catch_unwind(AssertUnwindSafe(|| execute(driver, &job))) {
        Ok(outcome) => outcome,
        Err(payload) => {
            // The native handle may be mid-statement; never reuse it.
            job.connection.native().take();
            job.connection.set_state(ConnectionState::Broken);
            Err(SqlDispatchError::WorkerPanicked(panic_message(payload.as_ref())))
        }
    };

    // Close requested while this job held the handle.
    if job.connection.is_released() && job.connection.state() != ConnectionState::Closed {
        job.connection.close_native();
    }

    match &outcome {
        Ok(_) => job.transition(JobState::Completed),
        Err(err) => {
            job.transition(JobState::Failed);
            log_failure(&job, err);
        }
    }

    dispatch(scheduler, job, outcome);
}

fn execute<D: Driver>(driver: &D, job: &Job<D::Handle>) -> Result<Output, SqlDispatchError> {
    let conn = &job.connection;
    if conn.is_released() {
        return Err(SqlDispatchError::OwnerRemovedRace {
            connection: conn.connection_string().to_string(),
            owner: conn.owner_label().to_string(),
        });
    }
    driver.check_statement(&job.sql.query)?;

    let mut slot = conn.native();
    let handle = open_if_needed(driver, conn, &mut slot)?;
    let result = match &job.kind {
        JobKind::Rows(_) => driver
            .query(handle, &job.sql.query, &job.sql.params, conn.interrupt())
            .map(Output::Rows),
        JobKind::NonQuery(_) => driver
            .execute(handle, &job.sql.query, &job.sql.params)
            .map(|count| Output::Affected {
                count,
                last_insert_id: driver.last_insert_id(handle),
            }),
    };

    if result.is_err() && !driver.is_alive(handle) {
        slot.take();
        conn.set_state(ConnectionState::Broken);
    }
    result
}

fn open_if_needed<'a, D: Driver>(
    driver: &D,
    conn: &ConnectionRef<D::Handle>,
    slot: &'a mut Option<D::Handle>,
) -> Result<&'a mut D::Handle, SqlDispatchError> {
    let alive = match slot.as_mut() {
        Some(handle) => driver.is_alive(handle),
        None => false,
    };

    if !alive {
        if slot.take().is_some() {
            warn!(connection = conn.id(), owner = %conn.owner_label(), "native connection lost; reopening");
        }
        match driver.open(conn.connection_string()) {
            Ok(handle) => {
                *slot = Some(handle);
                conn.set_state(ConnectionState::Open);
                debug!(connection = conn.id(), owner = %conn.owner_label(), "native connection opened");
            }
            Err(err) => {
                conn.set_state(ConnectionState::Broken);
                return Err(err);
            }
        }
    }

    slot.as_mut().ok_or_else(|| {
        SqlDispatchError::ConnectionError("native handle missing after open".into())
    })
}

fn log_failure<H>(job: &Job<H>, err: &SqlDispatchError) {
    let conn = &job.connection;
    match err {
        SqlDispatchError::OwnerRemovedRace { .. } | SqlDispatchError::Interrupted => warn!(
            owner = %conn.owner_label(),
            connection = conn.id(),
            job = job.id,
            query = job.sql.summary(),
            error = %err,
            "job abandoned; connection was released"
        ),
        _ => error!(
            owner = %conn.owner_label(),
            connection = conn.id(),
            job = job.id,
            query = job.sql.summary(),
            error = %err,
            "job failed"
        ),
    }
}

fn dispatch<H: Send + 'static>(
    scheduler: &dyn MainScheduler,
    job: Job<H>,
    outcome: Result<Output, SqlDispatchError>,
) {
    let Job {
        id,
        connection,
        kind,
        ..
    } = job;
    let (rows, affected, last_insert_id) = match outcome {
        Ok(Output::Rows(rows)) => (Some(rows), 0, None),
        Ok(Output::Affected {
            count,
            last_insert_id,
        }) => (None, count, last_insert_id),
        Err(_) => (None, 0, None),
    };

    scheduler.schedule(Box::new(move || {
        if let Some(row_id) = last_insert_id {
            connection.set_last_insert_row_id(row_id);
        }
        let delivered = panic::catch_unwind(AssertUnwindSafe(move || match kind {
            JobKind::Rows(callback) => callback(rows),
            JobKind::NonQuery(callback) => callback(affected),
        }));
        if let Err(payload) = delivered {
            let err = SqlDispatchError::CallbackError(panic_message(payload.as_ref()));
            error!(
                owner = %connection.owner_label(),
                connection = connection.id(),
                job = id,
                error = %err,
                "job callback panicked"
            );
        }
    }));
}
