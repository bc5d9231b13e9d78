use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::driver::{Driver, Interrupt};
use crate::error::SqlDispatchError;
use crate::results::ResultSet;
use crate::types::{DatabaseType, RowValues};

/// Counters shared between a [`MockDriver`] and the test observing it.
#[derive(Debug, Default)]
pub struct MockState {
    started: Mutex<Vec<String>>,
    opens: AtomicUsize,
    closes: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    next_handle: AtomicU64,
    next_row_id: AtomicI64,
}

impl MockState {
    /// Statements in the order the worker started them.
    #[must_use]
    pub fn started(&self) -> Vec<String> {
        match self.started.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    #[must_use]
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Native handles opened and not yet dropped.
    #[must_use]
    pub fn open_handles(&self) -> usize {
        self.opens().saturating_sub(self.closes())
    }

    /// Highest number of statements that were ever running at once.
    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn record_start(&self, query: &str) {
        match self.started.lock() {
            Ok(mut guard) => guard.push(query.to_string()),
            Err(poisoned) => poisoned.into_inner().push(query.to_string()),
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
    }
}

struct InFlight<'a>(&'a MockState);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Native handle of the mock backend. Dropping it counts as a close.
#[derive(Debug)]
pub struct MockHandle {
    pub id: u64,
    alive: bool,
    last_row_id: Option<i64>,
    state: Arc<MockState>,
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Scripted in-memory backend.
///
/// The first whitespace-separated token of a statement picks its behavior:
///
/// | token              | effect                                                  |
/// |--------------------|---------------------------------------------------------|
/// | `fail`             | returns `ExecutionError`                                |
/// | `panic`            | panics inside the driver                                |
/// | `drop`             | returns `ConnectionError` and kills the handle          |
/// | `sleep:<ms>`       | sleeps, then succeeds                                   |
/// | `stream:<n>:<ms>`  | reads `n` rows, sleeping between them, polling release  |
/// | anything else      | succeeds immediately                                    |
///
/// Successful reads return one row per statement with a `statement` column
/// holding the full text. Successful non-queries affect one row and hand out
/// increasing row ids. Targets starting with `unreachable` fail to open.
#[derive(Debug, Default, Clone)]
pub struct MockDriver {
    state: Arc<MockState>,
}

enum Script {
    Fail,
    Panic,
    Drop,
    Sleep(u64),
    Stream(usize, u64),
    Ok,
}

fn parse(query: &str) -> Script {
    let head = query.split_whitespace().next().unwrap_or_default();
    let mut parts = head.split(':');
    match parts.next() {
        Some("fail") => Script::Fail,
        Some("panic") => Script::Panic,
        Some("drop") => Script::Drop,
        Some("sleep") => Script::Sleep(parts.next().and_then(|ms| ms.parse().ok()).unwrap_or(0)),
        Some("stream") => {
            let rows = parts.next().and_then(|n| n.parse().ok()).unwrap_or(1);
            let ms = parts.next().and_then(|ms| ms.parse().ok()).unwrap_or(0);
            Script::Stream(rows, ms)
        }
        _ => Script::Ok,
    }
}

impl MockDriver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn state(&self) -> Arc<MockState> {
        Arc::clone(&self.state)
    }

    fn run_script(
        &self,
        handle: &mut MockHandle,
        query: &str,
        interrupt: Option<Interrupt<'_>>,
    ) -> Result<usize, SqlDispatchError> {
        self.state.record_start(query);
        let _guard = InFlight(&self.state);
        match parse(query) {
            Script::Fail => Err(SqlDispatchError::ExecutionError(format!("scripted failure: {query}"))),
            Script::Panic => panic!("scripted panic: {query}"),
            Script::Drop => {
                handle.alive = false;
                Err(SqlDispatchError::ConnectionError("scripted disconnect".into()))
            }
            Script::Sleep(ms) => {
                thread::sleep(Duration::from_millis(ms));
                Ok(1)
            }
            Script::Stream(rows, ms) => {
                for _ in 0..rows {
                    if let Some(interrupt) = interrupt {
                        interrupt.check()?;
                    }
                    thread::sleep(Duration::from_millis(ms));
                }
                Ok(rows)
            }
            Script::Ok => Ok(1),
        }
    }
}

impl Driver for MockDriver {
    type Handle = MockHandle;

    fn kind(&self) -> DatabaseType {
        DatabaseType::Mock
    }

    fn resolve_target(&self, target: &str) -> Result<String, SqlDispatchError> {
        let target = target.trim();
        if target.is_empty() {
            return Err(SqlDispatchError::ConfigError("empty mock target".into()));
        }
        Ok(format!("mock://{target}"))
    }

    fn open(&self, connection_string: &str) -> Result<MockHandle, SqlDispatchError> {
        if connection_string.starts_with("mock://unreachable") {
            return Err(SqlDispatchError::ConnectionError(format!(
                "cannot reach {connection_string}"
            )));
        }
        self.state.opens.fetch_add(1, Ordering::SeqCst);
        Ok(MockHandle {
            id: self.state.next_handle.fetch_add(1, Ordering::SeqCst) + 1,
            alive: true,
            last_row_id: None,
            state: Arc::clone(&self.state),
        })
    }

    fn is_alive(&self, handle: &mut MockHandle) -> bool {
        handle.alive
    }

    fn query(
        &self,
        handle: &mut MockHandle,
        query: &str,
        _params: &[RowValues],
        interrupt: Interrupt<'_>,
    ) -> Result<ResultSet, SqlDispatchError> {
        self.run_script(handle, query, Some(interrupt))?;
        let mut rs = ResultSet::with_capacity(1);
        rs.set_column_names(Arc::new(vec!["statement".to_string()]));
        rs.add_row_values(vec![RowValues::Text(query.to_string())]);
        Ok(rs)
    }

    fn execute(
        &self,
        handle: &mut MockHandle,
        query: &str,
        _params: &[RowValues],
    ) -> Result<usize, SqlDispatchError> {
        let affected = self.run_script(handle, query, None)?;
        handle.last_row_id = Some(self.state.next_row_id.fetch_add(1, Ordering::SeqCst) + 1);
        Ok(affected)
    }

    fn last_insert_id(&self, handle: &mut MockHandle) -> Option<i64> {
        handle.last_row_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn scripts_drive_outcomes() {
        let driver = MockDriver::new();
        let target = driver.resolve_target("a").unwrap();
        let mut handle = driver.open(&target).unwrap();
        let flag = AtomicBool::new(false);

        assert_eq!(driver.execute(&mut handle, "insert", &[]).unwrap(), 1);
        assert_eq!(driver.last_insert_id(&mut handle), Some(1));
        assert!(driver.execute(&mut handle, "fail now", &[]).is_err());
        assert!(driver.execute(&mut handle, "drop", &[]).is_err());
        assert!(!driver.is_alive(&mut handle));

        let rows = driver
            .query(&mut handle, "stream:3:0 q", &[], Interrupt::new(&flag))
            .unwrap();
        assert_eq!(rows.results[0].get("statement"), Some(&RowValues::Text("stream:3:0 q".into())));
        assert_eq!(driver.state().started().len(), 4);
        assert_eq!(driver.state().max_in_flight(), 1);

        drop(handle);
        assert_eq!(driver.state().open_handles(), 0);
        assert!(driver.open("mock://unreachable").is_err());
    }
}
