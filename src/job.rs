use std::fmt;

use crate::connection::ConnectionRef;
use crate::query::QueryAndParams;
use crate::results::ResultSet;

/// Completion for read jobs. `None` when the job failed.
pub type RowsCallback = Box<dyn FnOnce(Option<ResultSet>) + Send + 'static>;

/// Completion for non-query jobs. `0` when the job failed.
pub type AffectedCallback = Box<dyn FnOnce(usize) + Send + 'static>;

/// What a job produces and who receives it.
pub enum JobKind {
    Rows(RowsCallback),
    NonQuery(AffectedCallback),
}

impl JobKind {
    #[must_use]
    pub fn is_non_query(&self) -> bool {
        matches!(self, JobKind::NonQuery(_))
    }
}

/// Where a job is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// One submitted statement, its target connection, and its completion.
pub struct Job<H> {
    pub(crate) id: u64,
    pub(crate) sql: QueryAndParams,
    pub(crate) connection: ConnectionRef<H>,
    pub(crate) kind: JobKind,
    pub(crate) state: JobState,
}

impl<H> Job<H> {
    pub(crate) fn new(id: u64, sql: QueryAndParams, connection: ConnectionRef<H>, kind: JobKind) -> Self {
        Self {
            id,
            sql,
            connection,
            kind,
            state: JobState::Queued,
        }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn state(&self) -> JobState {
        self.state
    }

    #[must_use]
    pub fn is_non_query(&self) -> bool {
        self.kind.is_non_query()
    }

    pub(crate) fn transition(&mut self, next: JobState) {
        tracing::trace!(job = self.id, from = %self.state, to = %next, "job state");
        self.state = next;
    }
}

impl<H> fmt::Debug for Job<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("query", &self.sql.summary())
            .field("params", &self.sql.params.len())
            .field("connection", &self.connection.id())
            .field("non_query", &self.is_non_query())
            .field("state", &self.state)
            .finish()
    }
}
