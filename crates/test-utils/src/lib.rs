//! Test utilities shared by the wallet crates.
//!
//! [`fixtures`] builds deterministic keys and swaps. The fakes stand in for the coordination
//! service: they record every call and can be scripted to fail.

pub mod fixtures;

mod coordination;
mod incoming_swap;

pub use coordination::FakeCoordinationService;
pub use incoming_swap::{FakeIncomingSwapService, IncomingSwapCall};

use std::{
    io,
    sync::{Arc, Mutex, Once, PoisonError},
};

use tracing::subscriber::DefaultGuard;
use wallet_common::logging::{self, LoggerConfig};

static LOGGING: Once = Once::new();

/// Installs the wallet logger for tests. `RUST_LOG` selects what is printed.
///
/// Safe to call from every test; only the first call installs the subscriber.
pub fn init_test_logging() {
    LOGGING.call_once(|| logging::init(LoggerConfig::with_base_name("wallet-tests")));
}

/// Log output recorded by [`capture_logs`].
#[derive(Debug, Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    /// Whether any recorded line contains `text`.
    pub fn contains(&self, text: &str) -> bool {
        let bytes = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&bytes).contains(text)
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Records every event emitted on the current thread until the guard drops.
///
/// Scoped to the thread, so it works alongside [`init_test_logging`] on single-threaded test
/// runtimes.
pub fn capture_logs() -> (CapturedLogs, DefaultGuard) {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_max_level(tracing::Level::TRACE)
        .with_writer(move || writer.clone())
        .finish();

    (logs, tracing::subscriber::set_default(subscriber))
}
