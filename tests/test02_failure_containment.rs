mod common;

use std::sync::Arc;

use common::{WAIT, len, mock_harness, sink};
use sql_dispatch::test_utils::pump_until;
use sql_dispatch::{ConnectionState, LocalOwner, Owner, SqlDispatchError};

/// A failed read resolves `None`, a failed write resolves `0`, and the queue keeps going.
#[test]
fn failures_resolve_empty_and_do_not_stop_the_queue() -> Result<(), SqlDispatchError> {
    let mut h = mock_harness()?;
    let owner: Arc<dyn Owner> = LocalOwner::new("failing", "2.1");
    let conn = h.engine.open("main", &owner, true)?;

    let rows = sink::<Option<usize>>();
    let counts = sink::<usize>();
    for sql in ["fail read", "ok read", "panic read"] {
        let rows = Arc::clone(&rows);
        h.engine.query(sql, &conn, move |rs| {
            rows.lock().unwrap().push(rs.map(|rs| rs.len()));
        })?;
    }
    for sql in ["fail write", "ok write"] {
        let counts = Arc::clone(&counts);
        h.engine.execute_non_query(sql, &conn, move |n| counts.lock().unwrap().push(n))?;
    }

    assert!(pump_until(&mut h.ticks, WAIT, || len(&rows) == 3 && len(&counts) == 2));
    assert_eq!(*rows.lock().unwrap(), vec![None, Some(1), None]);
    assert_eq!(*counts.lock().unwrap(), vec![0, 1]);
    Ok(())
}

/// A driver panic throws the native handle away; the next job opens a fresh one.
#[test]
fn driver_panic_breaks_the_connection_and_the_next_job_reopens() -> Result<(), SqlDispatchError> {
    let mut h = mock_harness()?;
    let owner: Arc<dyn Owner> = LocalOwner::new("panicky", "1.0");
    let conn = h.engine.open("main", &owner, true)?;
    let counts = sink::<usize>();

    {
        let counts = Arc::clone(&counts);
        h.engine.execute_non_query("panic", &conn, move |n| counts.lock().unwrap().push(n))?;
    }
    assert!(pump_until(&mut h.ticks, WAIT, || len(&counts) == 1));
    assert_eq!(conn.state(), ConnectionState::Broken);
    assert_eq!(h.state.open_handles(), 0);

    {
        let counts = Arc::clone(&counts);
        h.engine.execute_non_query("ok", &conn, move |n| counts.lock().unwrap().push(n))?;
    }
    assert!(pump_until(&mut h.ticks, WAIT, || len(&counts) == 2));
    assert_eq!(*counts.lock().unwrap(), vec![0, 1]);
    assert_eq!(conn.state(), ConnectionState::Open);
    assert_eq!(h.state.opens(), 2);
    Ok(())
}

/// A handle that dies mid-statement is marked broken and replaced on the next job.
#[test]
fn dead_handle_is_replaced() -> Result<(), SqlDispatchError> {
    let mut h = mock_harness()?;
    let owner: Arc<dyn Owner> = LocalOwner::new("flaky", "1.0");
    let conn = h.engine.open("main", &owner, true)?;
    let counts = sink::<usize>();

    for sql in ["drop", "after"] {
        let counts = Arc::clone(&counts);
        h.engine.execute_non_query(sql, &conn, move |n| counts.lock().unwrap().push(n))?;
    }
    assert!(pump_until(&mut h.ticks, WAIT, || len(&counts) == 2));
    assert_eq!(*counts.lock().unwrap(), vec![0, 1]);
    assert_eq!(h.state.opens(), 2);
    assert_eq!(h.state.open_handles(), 1);
    Ok(())
}

/// An unreachable target fails every job without taking the worker down.
#[test]
fn open_failure_is_contained() -> Result<(), SqlDispatchError> {
    let mut h = mock_harness()?;
    let owner: Arc<dyn Owner> = LocalOwner::new("offline", "1.0");
    let bad = h.engine.open("unreachable-host", &owner, true)?;
    let good = h.engine.open("main", &owner, true)?;
    let rows = sink::<bool>();

    for conn in [&bad, &good] {
        let rows = Arc::clone(&rows);
        h.engine.query("select", conn, move |rs| rows.lock().unwrap().push(rs.is_some()))?;
    }
    assert!(pump_until(&mut h.ticks, WAIT, || len(&rows) == 2));
    assert_eq!(*rows.lock().unwrap(), vec![false, true]);
    assert_eq!(bad.state(), ConnectionState::Broken);
    Ok(())
}

/// A panicking callback is logged; later callbacks still run.
#[test]
fn callback_panic_does_not_poison_later_callbacks() -> Result<(), SqlDispatchError> {
    let mut h = mock_harness()?;
    let owner: Arc<dyn Owner> = LocalOwner::new("clumsy", "1.0");
    let conn = h.engine.open("main", &owner, true)?;
    let counts = sink::<usize>();

    h.engine.execute_non_query("first", &conn, |_| panic!("callback blew up"))?;
    {
        let counts = Arc::clone(&counts);
        h.engine.execute_non_query("second", &conn, move |n| counts.lock().unwrap().push(n))?;
    }
    assert!(pump_until(&mut h.ticks, WAIT, || len(&counts) == 1));
    assert_eq!(*counts.lock().unwrap(), vec![1]);
    assert!(h.engine.is_running());
    Ok(())
}
