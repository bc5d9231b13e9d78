use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing_subscriber::fmt::writer::MakeWriter;

use crate::args::SimConfig;

/// Sends simulator log lines to stdout and, when `--log` is set, to a run log.
///
/// Lines in the run log are prefixed with `seed=<n> backend=<kind>` so logs
/// from several runs can be concatenated and still replayed one seed at a time.
#[derive(Clone)]
pub(crate) struct LogWriter {
    run_log: Option<Arc<RunLog>>,
}

struct RunLog {
    tag: String,
    file: Mutex<File>,
}

impl LogWriter {
    pub(crate) fn for_run(config: &SimConfig) -> io::Result<Self> {
        Self::open(config.log.clone(), run_tag(config))
    }

    fn open(path: Option<PathBuf>, tag: String) -> io::Result<Self> {
        let run_log = match path {
            Some(path) => Some(Arc::new(RunLog {
                tag,
                file: Mutex::new(File::create(path)?),
            })),
            None => None,
        };
        Ok(Self { run_log })
    }
}

fn run_tag(config: &SimConfig) -> String {
    format!("seed={} backend={:?}", config.seed, config.backend).to_lowercase()
}

pub(crate) struct EventWriter {
    run_log: Option<Arc<RunLog>>,
}

impl<'a> MakeWriter<'a> for LogWriter {
    type Writer = EventWriter;

    fn make_writer(&'a self) -> Self::Writer {
        EventWriter {
            run_log: self.run_log.clone(),
        }
    }
}

impl RunLog {
    fn lock(&self) -> MutexGuard<'_, File> {
        match self.file.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Write for EventWriter {
    // The fmt layer hands over one formatted event per call.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stdout().write_all(buf)?;
        if let Some(run_log) = &self.run_log {
            let mut file = run_log.lock();
            write!(file, "{} ", run_log.tag)?;
            file.write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stdout().flush()?;
        if let Some(run_log) = &self.run_log {
            run_log.lock().flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_log_lines_carry_the_seed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sim.log");
        let writer = LogWriter::open(Some(path.clone()), "seed=7 backend=mock".into()).unwrap();

        let mut event = writer.make_writer();
        event.write_all(b"INFO config loaded\n").unwrap();
        event.write_all(b"INFO simulation passed\n").unwrap();
        event.flush().unwrap();

        let text = std::fs::read_to_string(path).unwrap();
        assert_eq!(
            text,
            "seed=7 backend=mock INFO config loaded\nseed=7 backend=mock INFO simulation passed\n"
        );
    }

    #[test]
    fn no_run_log_without_a_path() {
        let writer = LogWriter::open(None, String::new()).unwrap();
        assert!(writer.run_log.is_none());
    }
}
