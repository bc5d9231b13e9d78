mod common;

use std::sync::Arc;

use common::{WAIT, len, mock_harness, sink};
use sql_dispatch::test_utils::pump_until;
use sql_dispatch::{ConnectionState, LocalOwner, Owner, SqlDispatchError};

/// Transient connections are closed once the queue drains; persistent ones stay open.
#[test]
fn transient_connections_close_when_idle() -> Result<(), SqlDispatchError> {
    let mut h = mock_harness()?;
    let owner: Arc<dyn Owner> = LocalOwner::new("stats", "1.0");
    let keep = h.engine.open("keep", &owner, true)?;
    let temp = h.engine.open("temp", &owner, false)?;
    let counts = sink::<usize>();

    for conn in [&keep, &temp, &keep] {
        let counts = Arc::clone(&counts);
        h.engine.execute_non_query("write", conn, move |n| counts.lock().unwrap().push(n))?;
    }
    assert!(pump_until(&mut h.ticks, WAIT, || {
        len(&counts) == 3 && temp.state() == ConnectionState::Closed
    }));
    assert_eq!(keep.state(), ConnectionState::Open);
    assert_eq!(h.state.open_handles(), 1);

    // Still registered; the next job reopens it.
    assert_eq!(h.engine.registry().len(), 2);
    {
        let counts = Arc::clone(&counts);
        h.engine.execute_non_query("again", &temp, move |n| counts.lock().unwrap().push(n))?;
    }
    assert!(pump_until(&mut h.ticks, WAIT, || len(&counts) == 4));
    assert_eq!(h.state.opens(), 3);
    Ok(())
}

/// Opening the same target twice hands back the same connection; close is idempotent.
#[test]
fn open_is_deduplicated_and_close_is_idempotent() -> Result<(), SqlDispatchError> {
    let h = mock_harness()?;
    let owner = LocalOwner::new("dup", "1.0");
    let dyn_owner: Arc<dyn Owner> = owner.clone();
    let a = h.engine.open("db", &dyn_owner, true)?;
    let b = h.engine.open(" db ", &dyn_owner, false)?;
    assert_eq!(a, b);
    assert!(b.is_persistent(), "existing entry keeps its flag");
    assert_eq!(h.engine.registry().len(), 1);
    assert_eq!(owner.subscriber_count(), 1);

    h.engine.close(&a);
    h.engine.close(&b);
    assert!(h.engine.registry().is_empty());
    assert_eq!(owner.subscriber_count(), 0);
    assert!(matches!(
        h.engine.query("select", &a, |_| {}),
        Err(SqlDispatchError::NullTarget(_))
    ));

    let reopened = h.engine.open("db", &dyn_owner, true)?;
    assert_ne!(reopened, a);
    assert!(!reopened.is_released());
    Ok(())
}

/// Removing an owner force-closes everything it still holds and leaves other owners alone.
#[test]
fn owner_removal_reclaims_its_connections() -> Result<(), SqlDispatchError> {
    let mut h = mock_harness()?;
    let leaving = LocalOwner::new("leaving", "3.2");
    let staying: Arc<dyn Owner> = LocalOwner::new("staying", "1.0");
    let leaving_dyn: Arc<dyn Owner> = leaving.clone();

    let c1 = h.engine.open("a", &leaving_dyn, true)?;
    let c2 = h.engine.open("b", &leaving_dyn, true)?;
    let other = h.engine.open("a", &staying, true)?;
    let counts = sink::<usize>();
    for conn in [&c1, &c2, &other] {
        let counts = Arc::clone(&counts);
        h.engine.execute_non_query("warm", conn, move |n| counts.lock().unwrap().push(n))?;
    }
    assert!(pump_until(&mut h.ticks, WAIT, || len(&counts) == 3));
    assert_eq!(h.state.open_handles(), 3);

    leaving.remove();
    assert!(c1.is_released() && c2.is_released());
    assert_eq!(c1.state(), ConnectionState::Closed);
    assert_eq!(c2.state(), ConnectionState::Closed);
    assert!(c1.owner().is_none());
    assert_eq!(leaving.subscriber_count(), 0);
    assert_eq!(h.engine.registry().connections_for(leaving.as_ref()).len(), 0);
    assert_eq!(h.engine.registry().connections_for(staying.as_ref()), vec![other.clone()]);
    assert_eq!(other.state(), ConnectionState::Open);
    assert!(pump_until(&mut h.ticks, WAIT, || h.state.open_handles() == 1));
    Ok(())
}

/// Jobs still queued when their owner goes away are skipped and resolve empty.
#[test]
fn queued_jobs_of_a_removed_owner_are_skipped() -> Result<(), SqlDispatchError> {
    let mut h = mock_harness()?;
    let blocker_owner: Arc<dyn Owner> = LocalOwner::new("blocker", "1.0");
    let victim = LocalOwner::new("victim", "1.0");
    let victim_dyn: Arc<dyn Owner> = victim.clone();

    let blocker = h.engine.open("slow", &blocker_owner, true)?;
    let conn = h.engine.open("fast", &victim_dyn, true)?;
    let rows = sink::<Option<usize>>();

    h.engine.execute_non_query("sleep:200 blocker", &blocker, |_| {})?;
    for i in 0..3 {
        let rows = Arc::clone(&rows);
        h.engine
            .query(format!("victim{i}"), &conn, move |rs| rows.lock().unwrap().push(rs.map(|r| r.len())))?;
    }
    victim.remove();

    assert!(pump_until(&mut h.ticks, WAIT, || len(&rows) == 3));
    assert_eq!(*rows.lock().unwrap(), vec![None, None, None]);
    assert!(
        h.state.started().iter().all(|s| !s.starts_with("victim")),
        "released connections are never reopened"
    );
    assert_eq!(conn.state(), ConnectionState::Closed);
    Ok(())
}

/// Closing a connection while its read is streaming interrupts the read.
#[test]
fn close_during_read_interrupts_it() -> Result<(), SqlDispatchError> {
    let mut h = mock_harness()?;
    let owner: Arc<dyn Owner> = LocalOwner::new("reader", "1.0");
    let conn = h.engine.open("main", &owner, true)?;
    let rows = sink::<Option<usize>>();
    {
        let rows = Arc::clone(&rows);
        h.engine
            .query("stream:200:5 long", &conn, move |rs| rows.lock().unwrap().push(rs.map(|r| r.len())))?;
    }
    assert!(pump_until(&mut h.ticks, WAIT, || !h.state.started().is_empty()));

    h.engine.close(&conn);
    assert!(pump_until(&mut h.ticks, WAIT, || len(&rows) == 1));
    assert_eq!(*rows.lock().unwrap(), vec![None]);
    assert!(pump_until(&mut h.ticks, WAIT, || h.state.open_handles() == 0));
    assert_eq!(conn.state(), ConnectionState::Closed);
    Ok(())
}

/// A reloaded owner with the same name keeps its connections when the old instance is removed.
#[test]
fn reloaded_owner_survives_removal_of_its_predecessor() -> Result<(), SqlDispatchError> {
    let mut h = mock_harness()?;
    let old = LocalOwner::new("Stats", "1.0");
    let new = LocalOwner::new("Stats", "1.1");
    let old_dyn: Arc<dyn Owner> = old.clone();
    let new_dyn: Arc<dyn Owner> = new.clone();

    let a = h.engine.open("a", &old_dyn, true)?;
    let b = h.engine.open("b", &new_dyn, true)?;
    assert_eq!(new.subscriber_count(), 1);

    old.remove();
    assert!(a.is_released());
    assert!(!b.is_released());

    let counts = sink::<usize>();
    {
        let counts = Arc::clone(&counts);
        h.engine.execute_non_query("after reload", &b, move |n| counts.lock().unwrap().push(n))?;
    }
    assert!(pump_until(&mut h.ticks, WAIT, || len(&counts) == 1));
    assert_eq!(b.state(), ConnectionState::Open);

    new.remove();
    assert!(b.is_released());
    assert!(h.engine.registry().is_empty());
    Ok(())
}
