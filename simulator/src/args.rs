use clap::Parser;
use serde::Serialize;
use sql_dispatch::DatabaseType;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "Seeded concurrency simulator for sql-dispatch")]
pub(crate) struct Args {
    #[arg(long, value_enum, default_value = "mock")]
    pub(crate) backend: DatabaseType,
    /// Connection string for `--backend postgres`.
    #[arg(long, env = "SQL_DISPATCH_PG_URL")]
    pub(crate) pg_url: Option<String>,
    #[arg(long)]
    pub(crate) seed: Option<u64>,
    /// Jobs each submitter thread tries to enqueue.
    #[arg(long, default_value_t = 500)]
    pub(crate) jobs: usize,
    #[arg(long, default_value_t = 4)]
    pub(crate) submitters: usize,
    #[arg(long, default_value_t = 3)]
    pub(crate) owners: usize,
    #[arg(long, default_value_t = 2)]
    pub(crate) connections: usize,
    #[arg(long, default_value_t = 0.05)]
    pub(crate) fail_rate: f64,
    #[arg(long, default_value_t = 0.01)]
    pub(crate) panic_rate: f64,
    #[arg(long, default_value_t = 0.02)]
    pub(crate) sleep_rate: f64,
    #[arg(long, default_value_t = 0.2)]
    pub(crate) read_rate: f64,
    /// Chance per host tick of closing a random connection.
    #[arg(long, default_value_t = 0.01)]
    pub(crate) close_rate: f64,
    /// Chance per host tick of reopening a closed connection.
    #[arg(long, default_value_t = 0.05)]
    pub(crate) reopen_rate: f64,
    /// Chance per host tick of removing a random owner.
    #[arg(long, default_value_t = 0.002)]
    pub(crate) removal_rate: f64,
    /// Give up waiting for the final drain after this long.
    #[arg(long, value_parser = humantime::parse_duration, default_value = "60s")]
    pub(crate) drain_timeout: Duration,
    #[arg(long)]
    pub(crate) log: Option<PathBuf>,
    #[arg(long)]
    pub(crate) quick: bool,
    #[arg(long)]
    pub(crate) stress: bool,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct SimConfig {
    pub(crate) backend: DatabaseType,
    #[serde(skip)]
    pub(crate) pg_url: Option<String>,
    pub(crate) seed: u64,
    pub(crate) jobs: usize,
    pub(crate) submitters: usize,
    pub(crate) owners: usize,
    pub(crate) connections: usize,
    pub(crate) fail_rate: f64,
    pub(crate) panic_rate: f64,
    pub(crate) sleep_rate: f64,
    pub(crate) read_rate: f64,
    pub(crate) close_rate: f64,
    pub(crate) reopen_rate: f64,
    pub(crate) removal_rate: f64,
    pub(crate) drain_timeout_ms: u64,
    pub(crate) log: Option<PathBuf>,
    pub(crate) preset: Option<String>,
}

impl SimConfig {
    pub(crate) fn from_args(args: Args) -> Self {
        let mut config = SimConfig {
            backend: args.backend,
            pg_url: args.pg_url,
            seed: args.seed.unwrap_or_else(random_seed),
            jobs: args.jobs,
            submitters: args.submitters.max(1),
            owners: args.owners.max(1),
            connections: args.connections.max(1),
            fail_rate: clamp_rate(args.fail_rate),
            panic_rate: clamp_rate(args.panic_rate),
            sleep_rate: clamp_rate(args.sleep_rate),
            read_rate: clamp_rate(args.read_rate),
            close_rate: clamp_rate(args.close_rate),
            reopen_rate: clamp_rate(args.reopen_rate),
            removal_rate: clamp_rate(args.removal_rate),
            drain_timeout_ms: u64::try_from(args.drain_timeout.as_millis()).unwrap_or(u64::MAX),
            log: args.log,
            preset: None,
        };

        if args.quick {
            config.apply_quick();
        }
        if args.stress {
            config.apply_stress();
        }

        config
    }

    fn apply_quick(&mut self) {
        self.preset = Some("quick".to_string());
        self.jobs = 100;
        self.submitters = 2;
        self.owners = 2;
        self.connections = 2;
        self.removal_rate = 0.0;
    }

    fn apply_stress(&mut self) {
        self.preset = Some("stress".to_string());
        self.jobs = 5_000;
        self.submitters = 16;
        self.owners = 8;
        self.connections = 3;
        self.fail_rate = 0.08;
        self.panic_rate = 0.02;
        self.close_rate = 0.03;
        self.removal_rate = 0.005;
    }
}

fn clamp_rate(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

fn random_seed() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    now.as_secs() ^ u64::from(now.subsec_nanos())
}
