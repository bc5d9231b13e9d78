#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use sql_dispatch::test_utils::{MockDriver, MockState};
use sql_dispatch::{EngineOptions, QueryEngine, SqlDispatchError, TickQueue};

pub const WAIT: Duration = Duration::from_secs(10);

pub struct MockHarness {
    pub engine: QueryEngine<MockDriver>,
    pub ticks: TickQueue,
    pub state: Arc<MockState>,
}

pub fn mock_harness() -> Result<MockHarness, SqlDispatchError> {
    let ticks = TickQueue::new();
    let driver = MockDriver::new();
    let state = driver.state();
    let engine = QueryEngine::start(
        driver,
        Arc::new(ticks.scheduler()),
        EngineOptions::default().with_worker_name("test-worker"),
    )?;
    Ok(MockHarness {
        engine,
        ticks,
        state,
    })
}

/// Shared sink callbacks push into; only ever touched on the pumping thread.
pub type Sink<T> = Arc<Mutex<Vec<T>>>;

pub fn sink<T>() -> Sink<T> {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn len<T>(sink: &Sink<T>) -> usize {
    sink.lock().unwrap().len()
}
