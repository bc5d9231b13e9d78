#![cfg(feature = "sqlite")]

mod common;

use std::sync::{Arc, Mutex};

use common::WAIT;
use sql_dispatch::prelude::*;
use sql_dispatch::test_utils::pump_until;

fn engine(dir: &std::path::Path, ticks: &TickQueue) -> Result<SqliteEngine, SqlDispatchError> {
    let driver = SqliteOptionsBuilder::new(dir).build()?;
    SqliteEngine::start(driver, Arc::new(ticks.scheduler()), EngineOptions::default())
}

/// Full round trip: DDL, parameterized inserts with row ids, then a read.
#[test]
fn sqlite_insert_then_select() -> Result<(), SqlDispatchError> {
    let dir = tempfile::tempdir()?;
    let mut ticks = TickQueue::new();
    let engine = engine(dir.path(), &ticks)?;
    let owner: Arc<dyn Owner> = LocalOwner::new("scores", "0.4.1");
    let conn = engine.open("scores.db", &owner, true)?;

    let ids = Arc::new(Mutex::new(Vec::new()));
    engine.execute_non_query(
        "CREATE TABLE players (id INTEGER PRIMARY KEY, name TEXT NOT NULL, score REAL, active INTEGER)",
        &conn,
        |_| {},
    )?;
    for (name, score) in [("ada", 9.5), ("bob", 7.0)] {
        let ids = Arc::clone(&ids);
        let cb_conn = conn.clone();
        engine.insert(
            QueryAndParams::new(
                "INSERT INTO players (name, score, active) VALUES (?1, ?2, ?3)",
                vec![
                    RowValues::Text(name.into()),
                    RowValues::Float(score),
                    RowValues::Bool(true),
                ],
            ),
            &conn,
            move |n| ids.lock().unwrap().push((n, cb_conn.last_insert_row_id())),
        )?;
    }

    let rows: Arc<Mutex<Option<ResultSet>>> = Arc::new(Mutex::new(None));
    let done = Arc::new(Mutex::new(false));
    {
        let rows = Arc::clone(&rows);
        let done = Arc::clone(&done);
        engine.query("SELECT id, name, score, active FROM players ORDER BY id", &conn, move |rs| {
            *rows.lock().unwrap() = rs;
            *done.lock().unwrap() = true;
        })?;
    }
    assert!(pump_until(&mut ticks, WAIT, || *done.lock().unwrap()));

    assert_eq!(*ids.lock().unwrap(), vec![(1, 1), (1, 2)]);
    let rows = rows.lock().unwrap().take().expect("rows");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows.results[1].get("name"), Some(&RowValues::Text("bob".into())));
    assert_eq!(rows.results[0].get("score").and_then(RowValues::as_float), Some(9.5));
    assert_eq!(rows.results[0].get("active").and_then(RowValues::as_bool), Some(true));
    assert!(dir.path().join("scores.db").exists());
    Ok(())
}

/// An empty result is `Some(empty)`, a failing statement is `None`.
#[test]
fn sqlite_no_rows_differs_from_failure() -> Result<(), SqlDispatchError> {
    let dir = tempfile::tempdir()?;
    let mut ticks = TickQueue::new();
    let engine = engine(dir.path(), &ticks)?;
    let owner: Arc<dyn Owner> = LocalOwner::new("empty", "1.0");
    let conn = engine.open("e.db", &owner, false)?;
    let seen = Arc::new(Mutex::new(Vec::new()));

    engine.execute_non_query("CREATE TABLE t (x INTEGER)", &conn, |_| {})?;
    for sql in ["SELECT x FROM t", "SELECT x FROM missing_table"] {
        let seen = Arc::clone(&seen);
        engine.query(sql, &conn, move |rs| seen.lock().unwrap().push(rs.map(|r| r.len())))?;
    }
    assert!(pump_until(&mut ticks, WAIT, || seen.lock().unwrap().len() == 2));
    assert_eq!(*seen.lock().unwrap(), vec![Some(0), None]);

    // Transient: closed again once the queue is idle.
    assert!(pump_until(&mut ticks, WAIT, || conn.state() == ConnectionState::Closed));
    Ok(())
}

/// ATTACH/DETACH never reach SQLite, and targets outside the data directory are refused.
#[test]
fn sqlite_rejects_escapes() -> Result<(), SqlDispatchError> {
    let dir = tempfile::tempdir()?;
    let mut ticks = TickQueue::new();
    let engine = engine(dir.path(), &ticks)?;
    let owner: Arc<dyn Owner> = LocalOwner::new("sneaky", "1.0");

    assert!(matches!(
        engine.open("../outside.db", &owner, true),
        Err(SqlDispatchError::ConfigError(_))
    ));
    assert!(matches!(
        engine.open("/etc/hosts", &owner, true),
        Err(SqlDispatchError::ConfigError(_))
    ));

    let conn = engine.open("inside.db", &owner, true)?;
    let counts = Arc::new(Mutex::new(Vec::new()));
    for sql in [
        "ATTACH DATABASE '/tmp/other.db' AS other",
        "  -- hidden\n detach other",
        "CREATE TABLE ok (x INTEGER)",
    ] {
        let counts = Arc::clone(&counts);
        engine.execute_non_query(sql, &conn, move |n| counts.lock().unwrap().push(n))?;
    }
    assert!(pump_until(&mut ticks, WAIT, || counts.lock().unwrap().len() == 3));
    assert_eq!(*counts.lock().unwrap(), vec![0, 0, 0]);

    let tables = Arc::new(Mutex::new(None));
    {
        let tables = Arc::clone(&tables);
        engine.query("SELECT name FROM sqlite_master WHERE type = 'table'", &conn, move |rs| {
            *tables.lock().unwrap() = rs.map(|r| r.len());
        })?;
    }
    assert!(pump_until(&mut ticks, WAIT, || tables.lock().unwrap().is_some()));
    assert_eq!(*tables.lock().unwrap(), Some(1));
    Ok(())
}

/// Transient connection plus one insert: the callback sees the count and row id,
/// and the native connection is closed once the worker goes idle.
#[test]
fn sqlite_transient_insert_reports_row_id_then_closes() -> Result<(), SqlDispatchError> {
    let dir = tempfile::tempdir()?;
    let mut ticks = TickQueue::new();
    let engine = engine(dir.path(), &ticks)?;
    let owner: Arc<dyn Owner> = LocalOwner::new("oneshot", "1.0");
    let conn = engine.open("oneshot.db", &owner, false)?;

    let seen = Arc::new(Mutex::new(None));
    engine.execute_non_query("CREATE TABLE log (id INTEGER PRIMARY KEY, msg TEXT)", &conn, |_| {})?;
    {
        let seen = Arc::clone(&seen);
        let cb_conn = conn.clone();
        engine.insert(
            QueryAndParams::new("INSERT INTO log (msg) VALUES (?1)", vec![RowValues::Text("hi".into())]),
            &conn,
            move |n| *seen.lock().unwrap() = Some((n, cb_conn.last_insert_row_id())),
        )?;
    }

    assert!(pump_until(&mut ticks, WAIT, || seen.lock().unwrap().is_some()));
    assert_eq!(*seen.lock().unwrap(), Some((1, 1)));
    assert!(pump_until(&mut ticks, WAIT, || conn.state() == ConnectionState::Closed));
    assert!(!conn.is_released(), "reclaiming a transient handle keeps it registered");
    Ok(())
}

/// Update and delete report affected row counts.
#[test]
fn sqlite_update_and_delete_report_counts() -> Result<(), SqlDispatchError> {
    let dir = tempfile::tempdir()?;
    let mut ticks = TickQueue::new();
    let engine = engine(dir.path(), &ticks)?;
    let owner: Arc<dyn Owner> = LocalOwner::new("kits", "2.0");
    let conn = engine.open("kits.db", &owner, true)?;
    let counts = Arc::new(Mutex::new(Vec::new()));

    engine.execute_non_query("CREATE TABLE kits (name TEXT, uses INTEGER)", &conn, |_| {})?;
    engine.execute_non_query(
        "INSERT INTO kits VALUES ('a', 0), ('b', 0), ('c', 5)",
        &conn,
        |_| {},
    )?;
    {
        let counts = Arc::clone(&counts);
        engine.update(
            QueryAndParams::new(
                "UPDATE kits SET uses = uses + 1 WHERE uses = ?1",
                vec![RowValues::Int(0)],
            ),
            &conn,
            move |n| counts.lock().unwrap().push(("update", n)),
        )?;
    }
    {
        let counts = Arc::clone(&counts);
        engine.delete("DELETE FROM kits WHERE uses > 1", &conn, move |n| {
            counts.lock().unwrap().push(("delete", n));
        })?;
    }

    assert!(pump_until(&mut ticks, WAIT, || counts.lock().unwrap().len() == 2));
    assert_eq!(*counts.lock().unwrap(), vec![("update", 2), ("delete", 1)]);
    Ok(())
}
