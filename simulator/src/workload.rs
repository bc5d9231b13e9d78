use rand::Rng;
use rand_chacha::ChaCha8Rng;
use sql_dispatch::{QueryAndParams, RowValues};

use crate::args::SimConfig;

/// What a generated job is expected to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Op {
    Write,
    Read,
    Sleep,
    Fail,
    Panic,
}

impl Op {
    /// Scripted failures must never resolve with data.
    pub(crate) fn must_fail(self) -> bool {
        matches!(self, Op::Fail | Op::Panic)
    }

    pub(crate) fn is_read(self) -> bool {
        self == Op::Read
    }
}

/// Statement text for one backend.
#[derive(Debug, Clone)]
pub(crate) enum Workload {
    Mock,
    Sqlite,
    Postgres { url: String },
}

impl Workload {
    pub(crate) fn pick_op(&self, config: &SimConfig, rng: &mut ChaCha8Rng) -> Op {
        let roll = rng.random::<f64>();
        let panic_rate = if matches!(self, Workload::Mock) { config.panic_rate } else { 0.0 };
        let sleep_rate = if matches!(self, Workload::Mock) { config.sleep_rate } else { 0.0 };
        if roll < config.fail_rate {
            Op::Fail
        } else if roll < config.fail_rate + panic_rate {
            Op::Panic
        } else if roll < config.fail_rate + panic_rate + sleep_rate {
            Op::Sleep
        } else if rng.random::<f64>() < config.read_rate {
            Op::Read
        } else {
            Op::Write
        }
    }

    /// How many distinct connections one owner can hold.
    pub(crate) fn connections_per_owner(&self, requested: usize) -> usize {
        match self {
            // The registry keys on the connection string; one URL means one connection.
            Workload::Postgres { .. } => 1,
            _ => requested,
        }
    }

    pub(crate) fn target(&self, owner: usize, index: usize) -> String {
        match self {
            Workload::Mock => format!("o{owner}-c{index}"),
            Workload::Sqlite => format!("sim-o{owner}-c{index}.db"),
            Workload::Postgres { url } => url.clone(),
        }
    }

    pub(crate) fn table(owner: usize, index: usize) -> String {
        format!("sim_o{owner}_c{index}")
    }

    pub(crate) fn setup(&self, owner: usize, index: usize) -> Vec<String> {
        let table = Self::table(owner, index);
        match self {
            Workload::Mock => vec![format!("setup {table}")],
            Workload::Sqlite => vec![format!(
                "CREATE TABLE IF NOT EXISTS {table} (id INTEGER PRIMARY KEY, sub INTEGER, seq INTEGER)"
            )],
            Workload::Postgres { .. } => vec![
                format!("DROP TABLE IF EXISTS {table}"),
                format!("CREATE TABLE {table} (id BIGSERIAL PRIMARY KEY, sub BIGINT, seq BIGINT)"),
            ],
        }
    }

    pub(crate) fn statement(&self, op: Op, owner: usize, index: usize, sub: usize, seq: usize) -> QueryAndParams {
        let table = Self::table(owner, index);
        match self {
            Workload::Mock => {
                let prefix = match op {
                    Op::Fail => "fail ",
                    Op::Panic => "panic ",
                    Op::Sleep => "sleep:1 ",
                    Op::Read | Op::Write => "",
                };
                QueryAndParams::new_without_params(format!("{prefix}s{sub}-{seq}"))
            }
            Workload::Sqlite | Workload::Postgres { .. } => {
                let (p1, p2) = if matches!(self, Workload::Sqlite) { ("?1", "?2") } else { ("$1", "$2") };
                let sql = match op {
                    Op::Read => format!("SELECT COUNT(*) AS n FROM {table}"),
                    Op::Fail => format!("INSERT INTO {table}_missing (sub, seq) VALUES ({p1}, {p2})"),
                    Op::Write | Op::Sleep | Op::Panic => {
                        format!("INSERT INTO {table} (sub, seq) VALUES ({p1}, {p2})")
                    }
                };
                let params = if op.is_read() {
                    Vec::new()
                } else {
                    vec![to_int(sub), to_int(seq)]
                };
                QueryAndParams::new(sql, params)
            }
        }
    }

    /// Statement listing what a connection persisted, oldest first.
    pub(crate) fn audit(&self, owner: usize, index: usize) -> Option<String> {
        match self {
            Workload::Mock => None,
            _ => Some(format!(
                "SELECT sub, seq FROM {} ORDER BY id",
                Self::table(owner, index)
            )),
        }
    }
}

fn to_int(value: usize) -> RowValues {
    RowValues::Int(i64::try_from(value).unwrap_or(i64::MAX))
}

/// Parse `s{sub}-{seq}` out of a mock statement, skipping any directive prefix.
pub(crate) fn parse_mock_statement(statement: &str) -> Option<(usize, usize)> {
    let tag = statement.split_whitespace().last()?;
    let (sub, seq) = tag.strip_prefix('s')?.split_once('-')?;
    Some((sub.parse().ok()?, seq.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_statements_round_trip_their_tag() {
        let q = Workload::Mock.statement(Op::Sleep, 0, 0, 3, 41);
        assert_eq!(q.query, "sleep:1 s3-41");
        assert_eq!(parse_mock_statement(&q.query), Some((3, 41)));
        assert_eq!(parse_mock_statement("setup sim_o0_c0"), None);
    }

    #[test]
    fn sql_statements_bind_submitter_and_sequence() {
        let q = Workload::Sqlite.statement(Op::Write, 1, 0, 2, 9);
        assert!(q.query.starts_with("INSERT INTO sim_o1_c0 "));
        assert_eq!(q.params, vec![RowValues::Int(2), RowValues::Int(9)]);
        let read = Workload::Postgres { url: String::new() }.statement(Op::Read, 1, 0, 2, 9);
        assert!(read.params.is_empty());
    }
}
