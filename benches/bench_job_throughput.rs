//! Criterion measurement of queue throughput: submit a batch of jobs, pump the
//! host queue until every callback has run. The mock backend isolates the
//! engine's own overhead; the `SQLite` variant adds a real file-backed insert.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use sql_dispatch::test_utils::{MockDriver, pump_until};
use sql_dispatch::{
    Driver, EngineOptions, LocalOwner, Owner, QueryAndParams, QueryEngine, RowValues, TickQueue,
};

const BATCHES: [usize; 3] = [10, 100, 1_000];

fn run_batch<D: Driver>(
    engine: &QueryEngine<D>,
    ticks: &mut TickQueue,
    conn: &sql_dispatch::ConnectionRef<D::Handle>,
    sql: &str,
    jobs: usize,
) {
    let done = Arc::new(AtomicUsize::new(0));
    for i in 0..jobs {
        let done = Arc::clone(&done);
        let job = QueryAndParams::new(sql, vec![RowValues::Int(i as i64)]);
        engine
            .execute_non_query(job, conn, move |_| {
                done.fetch_add(1, Ordering::Relaxed);
            })
            .expect("submit");
    }
    let finished = pump_until(ticks, Duration::from_secs(60), || {
        done.load(Ordering::Relaxed) == jobs
    });
    assert!(finished, "batch did not drain");
}

fn bench_mock(c: &mut Criterion) {
    let mut group = c.benchmark_group("job_throughput_mock");
    let mut ticks = TickQueue::new();
    let engine = QueryEngine::start(
        MockDriver::new(),
        Arc::new(ticks.scheduler()),
        EngineOptions::default(),
    )
    .expect("start engine");
    let owner: Arc<dyn Owner> = LocalOwner::new("bench", "1.0");
    let conn = engine.open("bench", &owner, true).expect("open");

    for jobs in BATCHES {
        group.throughput(Throughput::Elements(jobs as u64));
        group.bench_with_input(BenchmarkId::from_parameter(jobs), &jobs, |b, &jobs| {
            b.iter(|| run_batch(&engine, &mut ticks, &conn, "insert", jobs));
        });
    }
    group.finish();
}

#[cfg(feature = "sqlite")]
fn bench_sqlite(c: &mut Criterion) {
    use sql_dispatch::sqlite::SqliteOptionsBuilder;

    let dir = tempfile::tempdir().expect("tempdir");
    let mut group = c.benchmark_group("job_throughput_sqlite");
    let mut ticks = TickQueue::new();
    let driver = SqliteOptionsBuilder::new(dir.path()).build().expect("driver");
    let engine = QueryEngine::start(driver, Arc::new(ticks.scheduler()), EngineOptions::default())
        .expect("start engine");
    let owner: Arc<dyn Owner> = LocalOwner::new("bench", "1.0");
    let conn = engine.open("bench.db", &owner, true).expect("open");
    engine
        .execute_non_query("CREATE TABLE hits (n INTEGER)", &conn, |_| {})
        .expect("create");

    for jobs in BATCHES {
        group.throughput(Throughput::Elements(jobs as u64));
        group.bench_with_input(BenchmarkId::from_parameter(jobs), &jobs, |b, &jobs| {
            b.iter(|| run_batch(&engine, &mut ticks, &conn, "INSERT INTO hits (n) VALUES (?1)", jobs));
        });
    }
    group.finish();
}

#[cfg(not(feature = "sqlite"))]
fn bench_sqlite(_c: &mut Criterion) {}

criterion_group!(benches, bench_mock, bench_sqlite);
criterion_main!(benches);
