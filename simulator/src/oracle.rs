use std::collections::{BTreeMap, HashMap};

use sql_dispatch::ConnectionState;

use crate::workload::Op;

/// A job the engine accepted.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Accepted {
    pub(crate) sub: usize,
    pub(crate) seq: usize,
    pub(crate) op: Op,
}

/// A callback that ran on the host thread. `produced` is true for `Some(rows)` or a non-zero count.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Delivery {
    pub(crate) sub: usize,
    pub(crate) seq: usize,
    pub(crate) produced: bool,
}

/// Final view of one connection the simulation created.
#[derive(Debug, Clone)]
pub(crate) struct ConnSnapshot {
    pub(crate) label: String,
    pub(crate) persistent: bool,
    pub(crate) released: bool,
    pub(crate) state: ConnectionState,
}

pub(crate) struct Oracle;

impl Oracle {
    /// Every accepted job is delivered exactly once, and scripted failures deliver nothing.
    pub(crate) fn check_delivery(accepted: &[Accepted], delivered: &[Delivery]) -> Vec<String> {
        let mut violations = Vec::new();
        let mut seen: HashMap<(usize, usize), Vec<bool>> = HashMap::new();
        for d in delivered {
            seen.entry((d.sub, d.seq)).or_default().push(d.produced);
        }

        for job in accepted {
            match seen.remove(&(job.sub, job.seq)) {
                None => violations.push(format!("job s{}-{} accepted but never delivered", job.sub, job.seq)),
                Some(outcomes) if outcomes.len() > 1 => violations.push(format!(
                    "job s{}-{} delivered {} times",
                    job.sub,
                    job.seq,
                    outcomes.len()
                )),
                Some(outcomes) => {
                    if job.op.must_fail() && outcomes[0] {
                        violations.push(format!(
                            "job s{}-{} was scripted to fail ({:?}) but delivered data",
                            job.sub, job.seq, job.op
                        ));
                    }
                }
            }
        }
        for (sub, seq) in seen.keys() {
            violations.push(format!("job s{sub}-{seq} delivered but never accepted"));
        }
        violations
    }

    /// Within `label`, each submitter's jobs appear in increasing sequence order.
    pub(crate) fn check_fifo(label: &str, started: impl IntoIterator<Item = (usize, usize)>) -> Vec<String> {
        let mut last: BTreeMap<usize, usize> = BTreeMap::new();
        let mut violations = Vec::new();
        for (sub, seq) in started {
            if let Some(prev) = last.insert(sub, seq) {
                if seq <= prev {
                    violations.push(format!(
                        "{label}: submitter {sub} ran seq {seq} after seq {prev}"
                    ));
                }
            }
        }
        violations
    }

    pub(crate) fn check_single_flight(max_in_flight: usize) -> Vec<String> {
        if max_in_flight > 1 {
            vec![format!("{max_in_flight} jobs ran concurrently on the worker")]
        } else {
            Vec::new()
        }
    }

    /// After the final drain nothing transient or released may still hold a native handle.
    pub(crate) fn check_idle_connections(conns: &[ConnSnapshot]) -> Vec<String> {
        conns
            .iter()
            .filter(|c| (!c.persistent || c.released) && c.state == ConnectionState::Open)
            .map(|c| {
                format!(
                    "{} still open after drain (persistent: {}, released: {})",
                    c.label, c.persistent, c.released
                )
            })
            .collect()
    }
}
