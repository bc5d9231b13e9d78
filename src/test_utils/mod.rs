//! Helpers for tests, benches and the simulator. Enabled by the `test-utils` feature.

pub mod mock;

use std::thread;
use std::time::{Duration, Instant};

use crate::scheduler::TickQueue;

pub use mock::{MockDriver, MockHandle, MockState};

/// Pump `queue` on the calling thread until `done` holds or `timeout` elapses.
///
/// Returns whether `done` held before the deadline.
pub fn pump_until(queue: &mut TickQueue, timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        queue.run_pending();
        if done() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(1));
    }
}
