//! Log capture for assertions.

use std::{
    fmt,
    sync::{Mutex, MutexGuard, OnceLock},
};

use rstest::fixture;
use tsrpc::{LogLevel, Logger};

/// Handle to the global logger with exclusive access.
///
/// This guard ensures tests do not interfere with each other's log capture by
/// serialising access to a [`logtest::Logger`].
pub struct LoggerHandle {
    guard: MutexGuard<'static, logtest::Logger>,
}

impl LoggerHandle {
    /// Acquire the global [`logtest::Logger`] instance.
    ///
    /// # Panics
    ///
    /// Panics if a previous holder panicked while holding the lock.
    #[must_use]
    pub fn new() -> Self {
        static LOGGER: OnceLock<Mutex<logtest::Logger>> = OnceLock::new();

        let logger = LOGGER.get_or_init(|| Mutex::new(logtest::Logger::start()));
        let guard = logger.lock().expect("logger poisoned");

        Self { guard }
    }

    /// Drain captured records, returning `true` if any at `level` contains
    /// `needle`.
    pub fn contains(&mut self, level: log::Level, needle: &str) -> bool {
        let mut found = false;
        while let Some(record) = self.guard.pop() {
            found |= record.level() == level && record.args().contains(needle);
        }
        found
    }
}

impl Default for LoggerHandle {
    fn default() -> Self { Self::new() }
}

impl std::ops::Deref for LoggerHandle {
    type Target = logtest::Logger;

    fn deref(&self) -> &Self::Target { &self.guard }
}

impl std::ops::DerefMut for LoggerHandle {
    fn deref_mut(&mut self) -> &mut Self::Target { &mut self.guard }
}

#[allow(
    unused_braces,
    reason = "rustc false positive for single line rstest fixtures"
)]
#[fixture]
pub fn logger() -> LoggerHandle { LoggerHandle::new() }

/// [`Logger`] that records every event for later inspection.
#[derive(Debug, Default)]
pub struct CapturingLogger {
    lines: Mutex<Vec<(LogLevel, String)>>,
}

impl CapturingLogger {
    fn record(&self, level: LogLevel, args: fmt::Arguments<'_>) {
        self.lines
            .lock()
            .expect("lines lock")
            .push((level, args.to_string()));
    }

    /// Every captured `(level, line)` pair in order.
    #[must_use]
    pub fn lines(&self) -> Vec<(LogLevel, String)> { self.lines.lock().expect("lines lock").clone() }

    /// Returns `true` if a line at `level` contains `needle`.
    #[must_use]
    pub fn contains(&self, level: LogLevel, needle: &str) -> bool {
        self.lines
            .lock()
            .expect("lines lock")
            .iter()
            .any(|(at, line)| *at == level && line.contains(needle))
    }
}

impl Logger for CapturingLogger {
    fn debug(&self, args: fmt::Arguments<'_>) { self.record(LogLevel::Debug, args); }

    fn log(&self, args: fmt::Arguments<'_>) { self.record(LogLevel::Log, args); }

    fn warn(&self, args: fmt::Arguments<'_>) { self.record(LogLevel::Warn, args); }

    fn error(&self, args: fmt::Arguments<'_>) { self.record(LogLevel::Error, args); }
}
