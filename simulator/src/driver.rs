use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use sql_dispatch::test_utils::{MockDriver, MockState, pump_until};
use sql_dispatch::{
    ConnectionRef, DatabaseType, Driver, EngineOptions, LocalOwner, Owner, QueryEngine,
    ResultSet, RowValues, SqlDispatchError, TickQueue,
};
use tracing::{debug, info, warn};

use crate::args::SimConfig;
use crate::oracle::{Accepted, ConnSnapshot, Delivery, Oracle};
use crate::workload::{Workload, parse_mock_statement};

#[derive(Debug, Default, Serialize)]
pub(crate) struct Report {
    pub(crate) accepted: usize,
    pub(crate) rejected: usize,
    pub(crate) skipped: usize,
    pub(crate) delivered: usize,
    pub(crate) empty: usize,
    pub(crate) closes: usize,
    pub(crate) reopens: usize,
    pub(crate) removals: usize,
    pub(crate) violations: Vec<String>,
}

struct Slot<H> {
    owner: usize,
    index: usize,
    persistent: bool,
    conn: Option<ConnectionRef<H>>,
}

#[derive(Default)]
struct Ledger {
    accepted: Mutex<Vec<Accepted>>,
    delivered: Mutex<Vec<Delivery>>,
    rejected: AtomicUsize,
    skipped: AtomicUsize,
}

impl Ledger {
    fn deliver(&self, sub: usize, seq: usize, produced: bool) {
        lock(&self.delivered).push(Delivery { sub, seq, produced });
    }

    fn delivered_len(&self) -> usize {
        lock(&self.delivered).len()
    }

    fn accepted_len(&self) -> usize {
        lock(&self.accepted).len()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub(crate) fn run(config: &SimConfig) -> Result<Report, String> {
    match config.backend {
        DatabaseType::Mock => {
            let driver = MockDriver::new();
            let state = driver.state();
            simulate(driver, config, &Workload::Mock, Some(&state))
        }
        DatabaseType::Sqlite => run_sqlite(config),
        DatabaseType::Postgres => run_postgres(config),
    }
}

#[cfg(feature = "sqlite")]
fn run_sqlite(config: &SimConfig) -> Result<Report, String> {
    use sql_dispatch::sqlite::SqliteOptionsBuilder;

    let dir = tempfile::tempdir().map_err(|err| format!("temp dir: {err}"))?;
    let driver = SqliteOptionsBuilder::new(dir.path())
        .build()
        .map_err(|err| err.to_string())?;
    info!(data_dir = %dir.path().display(), "sqlite data directory");
    simulate(driver, config, &Workload::Sqlite, None)
}

#[cfg(not(feature = "sqlite"))]
fn run_sqlite(_config: &SimConfig) -> Result<Report, String> {
    Err("simulator built without the `sqlite` feature".to_string())
}

#[cfg(feature = "postgres")]
fn run_postgres(config: &SimConfig) -> Result<Report, String> {
    let url = config
        .pg_url
        .clone()
        .ok_or_else(|| "--pg-url (or SQL_DISPATCH_PG_URL) is required for postgres".to_string())?;
    simulate(
        sql_dispatch::postgres::PostgresDriver::new(),
        config,
        &Workload::Postgres { url },
        None,
    )
}

#[cfg(not(feature = "postgres"))]
fn run_postgres(_config: &SimConfig) -> Result<Report, String> {
    Err("simulator built without the `postgres` feature".to_string())
}

fn simulate<D: Driver>(
    driver: D,
    config: &SimConfig,
    workload: &Workload,
    mock: Option<&Arc<MockState>>,
) -> Result<Report, String> {
    let mut ticks = TickQueue::new();
    let engine = QueryEngine::start(
        driver,
        Arc::new(ticks.scheduler()),
        EngineOptions::default().with_worker_name("sim-worker"),
    )
    .map_err(|err| err.to_string())?;
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut report = Report::default();

    let owners: Vec<Arc<LocalOwner>> = (0..config.owners)
        .map(|o| LocalOwner::new(format!("owner{o}"), "1.0.0"))
        .collect();
    let mut history: Vec<ConnectionRef<D::Handle>> = Vec::new();
    let mut slots = Vec::new();
    for (o, owner) in owners.iter().enumerate() {
        let owner_dyn: Arc<dyn Owner> = owner.clone();
        for c in 0..workload.connections_per_owner(config.connections) {
            let persistent = rng.random_bool(0.5);
            let conn = engine
                .open(&workload.target(o, c), &owner_dyn, persistent)
                .map_err(|err| err.to_string())?;
            for sql in workload.setup(o, c) {
                engine
                    .execute_non_query(sql, &conn, |_| {})
                    .map_err(|err| err.to_string())?;
            }
            history.push(conn.clone());
            slots.push(Mutex::new(Slot {
                owner: o,
                index: c,
                persistent,
                conn: Some(conn),
            }));
        }
    }

    let ledger = Arc::new(Ledger::default());
    let finished = AtomicUsize::new(0);
    thread::scope(|scope| {
        for sub in 0..config.submitters {
            let (engine, slots, ledger, finished) = (&engine, &slots, &ledger, &finished);
            scope.spawn(move || {
                submit_loop(engine, slots, workload, config, sub, ledger);
                finished.fetch_add(1, Ordering::SeqCst);
            });
        }

        while finished.load(Ordering::SeqCst) < config.submitters {
            ticks.run_pending();
            host_tick(&engine, &slots, &owners, workload, &mut rng, config, &mut history, &mut report);
            thread::sleep(Duration::from_micros(200));
        }
    });

    let timeout = Duration::from_millis(config.drain_timeout_ms);
    if !pump_until(&mut ticks, timeout, || {
        ledger.delivered_len() >= ledger.accepted_len() && engine.pending_jobs() == 0
    }) {
        report.violations.push(format!(
            "drain timed out: {} of {} callbacks delivered",
            ledger.delivered_len(),
            ledger.accepted_len()
        ));
    }

    let idle = pump_until(&mut ticks, timeout, || {
        Oracle::check_idle_connections(&snapshot(&history)).is_empty()
    });
    if !idle {
        report.violations.extend(Oracle::check_idle_connections(&snapshot(&history)));
    }

    {
        let accepted = lock(&ledger.accepted);
        let delivered = lock(&ledger.delivered);
        report.accepted = accepted.len();
        report.delivered = delivered.len();
        report.empty = delivered.iter().filter(|d| !d.produced).count();
        report.violations.extend(Oracle::check_delivery(&accepted, &delivered));
    }
    report.rejected = ledger.rejected.load(Ordering::SeqCst);
    report.skipped = ledger.skipped.load(Ordering::SeqCst);

    if let Some(state) = mock {
        let started = state.started();
        report
            .violations
            .extend(Oracle::check_fifo("worker", started.iter().filter_map(|s| parse_mock_statement(s))));
        report.violations.extend(Oracle::check_single_flight(state.max_in_flight()));
    } else {
        let targets: Vec<(usize, usize)> = slots
            .iter()
            .map(|slot| {
                let slot = lock(slot);
                (slot.owner, slot.index)
            })
            .collect();
        for (label, rows) in audit(&engine, &mut ticks, workload, &targets, timeout)? {
            report.violations.extend(Oracle::check_fifo(&label, rows));
        }
    }

    engine.shutdown();
    ticks.run_pending();
    Ok(report)
}

fn submit_loop<D: Driver>(
    engine: &QueryEngine<D>,
    slots: &[Mutex<Slot<D::Handle>>],
    workload: &Workload,
    config: &SimConfig,
    sub: usize,
    ledger: &Arc<Ledger>,
) {
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed.wrapping_add(sub as u64 + 1));
    for seq in 0..config.jobs {
        let op = workload.pick_op(config, &mut rng);
        let (conn, owner, index) = {
            let slot = lock(&slots[rng.random_range(0..slots.len())]);
            (slot.conn.clone(), slot.owner, slot.index)
        };
        let Some(conn) = conn else {
            ledger.skipped.fetch_add(1, Ordering::Relaxed);
            continue;
        };

        let sql = workload.statement(op, owner, index, sub, seq);
        let cb_ledger = Arc::clone(ledger);
        let submitted = if op.is_read() {
            engine.query(sql, &conn, move |rows| cb_ledger.deliver(sub, seq, rows.is_some()))
        } else {
            engine.execute_non_query(sql, &conn, move |n| cb_ledger.deliver(sub, seq, n > 0))
        };

        match submitted {
            Ok(_) => lock(&ledger.accepted).push(Accepted { sub, seq, op }),
            Err(SqlDispatchError::NullTarget(_)) => {
                ledger.rejected.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                warn!(sub, seq, error = %err, "submission failed");
                ledger.rejected.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
    debug!(sub, "submitter finished");
}

#[allow(clippy::too_many_arguments)]
fn host_tick<D: Driver>(
    engine: &QueryEngine<D>,
    slots: &[Mutex<Slot<D::Handle>>],
    owners: &[Arc<LocalOwner>],
    workload: &Workload,
    rng: &mut ChaCha8Rng,
    config: &SimConfig,
    history: &mut Vec<ConnectionRef<D::Handle>>,
    report: &mut Report,
) {
    if rng.random::<f64>() < config.close_rate {
        let mut slot = lock(&slots[rng.random_range(0..slots.len())]);
        if let Some(conn) = slot.conn.take() {
            engine.close(&conn);
            report.closes += 1;
        }
    }

    if rng.random::<f64>() < config.reopen_rate {
        let mut slot = lock(&slots[rng.random_range(0..slots.len())]);
        let owner = &owners[slot.owner];
        if slot.conn.is_none() && !owner.is_removed() {
            let owner_dyn: Arc<dyn Owner> = owner.clone();
            let target = workload.target(slot.owner, slot.index);
            match engine.open(&target, &owner_dyn, slot.persistent) {
                Ok(conn) => {
                    history.push(conn.clone());
                    slot.conn = Some(conn);
                    report.reopens += 1;
                }
                Err(err) => warn!(error = %err, "reopen failed"),
            }
        }
    }

    if rng.random::<f64>() < config.removal_rate {
        let owner_idx = rng.random_range(0..owners.len());
        let owner = &owners[owner_idx];
        if !owner.is_removed() {
            info!(owner = owner.name(), "removing owner");
            owner.remove();
            for slot in slots {
                let mut slot = lock(slot);
                if slot.owner == owner_idx {
                    slot.conn = None;
                }
            }
            report.removals += 1;
        }
    }
}

fn snapshot<H>(history: &[ConnectionRef<H>]) -> Vec<ConnSnapshot> {
    history
        .iter()
        .map(|conn| ConnSnapshot {
            label: format!("{} ({})", conn.connection_string(), conn.owner_name()),
            persistent: conn.is_persistent(),
            released: conn.is_released(),
            state: conn.state(),
        })
        .collect()
}

type AuditRows = Vec<(String, Vec<(usize, usize)>)>;

/// Read back what each table persisted, through a dedicated auditor owner.
fn audit<D: Driver>(
    engine: &QueryEngine<D>,
    ticks: &mut TickQueue,
    workload: &Workload,
    targets: &[(usize, usize)],
    timeout: Duration,
) -> Result<AuditRows, String> {
    let auditor: Arc<dyn Owner> = LocalOwner::new("auditor", "1.0.0");
    let results: Arc<Mutex<Vec<(String, Option<ResultSet>)>>> = Arc::default();
    let mut conns = HashMap::new();
    let mut expected = 0;

    for &(owner, index) in targets {
        let Some(sql) = workload.audit(owner, index) else {
            continue;
        };
        let target = workload.target(owner, index);
        let conn = match conns.get(&target) {
            Some(conn) => conn.clone(),
            None => {
                let conn = engine.open(&target, &auditor, true).map_err(|err| err.to_string())?;
                conns.insert(target, conn.clone());
                conn
            }
        };
        let label = Workload::table(owner, index);
        let results = Arc::clone(&results);
        engine
            .query(sql, &conn, move |rows| lock(&results).push((label, rows)))
            .map_err(|err| err.to_string())?;
        expected += 1;
    }

    if !pump_until(ticks, timeout, || lock(&results).len() == expected) {
        return Err("audit queries did not complete".to_string());
    }

    let mut out = Vec::new();
    for (label, rows) in lock(&results).drain(..) {
        let rows = rows.ok_or_else(|| format!("audit of {label} failed"))?;
        let pairs = rows
            .results
            .iter()
            .filter_map(|row| {
                let sub = row.get("sub").and_then(RowValues::as_int)?;
                let seq = row.get("seq").and_then(RowValues::as_int)?;
                Some((usize::try_from(*sub).ok()?, usize::try_from(*seq).ok()?))
            })
            .collect();
        out.push((label, pairs));
    }
    for conn in conns.values() {
        engine.close(conn);
    }
    Ok(out)
}
