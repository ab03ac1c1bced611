//! Structured JSON logger setup.
//!
//! `RUST_LOG`/`SIDECAR_LOG_LEVEL` takes precedence, falling back to
//! `info`.
//!
//! The logger never blocks a caller: lines are handed to a bounded
//! channel drained by a dedicated writer thread; when the channel is
//! full the line is dropped and `logs_dropped_total` is incremented,
//! rather than stalling whichever task just logged.

use std::io::{self, Write};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread;

use tracing_subscriber::EnvFilter;

use crate::metrics::Metrics;

const CHANNEL_CAPACITY: usize = 4096;

#[derive(Clone)]
struct DroppingWriter {
    tx: SyncSender<Vec<u8>>,
    metrics: Arc<Metrics>,
}

impl Write for DroppingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.tx.try_send(buf.to_vec()) {
            Ok(()) => Ok(buf.len()),
            Err(TrySendError::Full(_)) => {
                self.metrics.record_log_dropped();
                Ok(buf.len())
            }
            Err(TrySendError::Disconnected(_)) => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Keeps the background writer thread alive; drop at process shutdown.
pub struct LoggerHandle {
    _drain: thread::JoinHandle<()>,
}

pub fn init(level: &str, metrics: Arc<Metrics>) -> LoggerHandle {
    let (tx, rx): (SyncSender<Vec<u8>>, Receiver<Vec<u8>>) = sync_channel(CHANNEL_CAPACITY);

    let drain = thread::Builder::new()
        .name("sidecar-log-writer".into())
        .spawn(move || {
            let mut stdout = io::stdout();
            while let Ok(line) = rx.recv() {
                let _ = stdout.write_all(&line);
            }
        })
        .expect("spawn the log writer thread");

    let writer = DroppingWriter { tx, metrics };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_writer(move || writer.clone())
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("set the process-wide tracing subscriber exactly once");

    LoggerHandle { _drain: drain }
}
