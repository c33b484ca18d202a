//! Application-facing logger capability.
//!
//! The engine reports lifecycle events (API errors, dropped envelopes, schema
//! mismatches) through a [`Logger`] supplied by the embedding application.
//! Every method defaults to a no-op, so implementations only override the
//! levels they care about. [`TracingLogger`] forwards to `tracing` and is the
//! default; [`filter_logger`] narrows any logger to a minimum [`LogLevel`].

use std::{fmt, str::FromStr, sync::Arc};

/// Severity threshold understood by [`filter_logger`].
///
/// Levels are ordered from most to least verbose; [`LogLevel::None`]
/// silences everything.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    /// Diagnostic detail.
    Debug,
    /// Routine operational events.
    #[default]
    Log,
    /// Recoverable anomalies.
    Warn,
    /// Failures.
    Error,
    /// Nothing is logged.
    None,
}

/// Returned when parsing an unrecognised [`LogLevel`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown log level: {0}")]
pub struct UnknownLogLevel(pub String);

impl FromStr for LogLevel {
    type Err = UnknownLogLevel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "log" | "info" => Ok(Self::Log),
            "warn" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            "none" => Ok(Self::None),
            _ => Err(UnknownLogLevel(s.to_owned())),
        }
    }
}

/// Logging capability consumed by the engine.
///
/// # Examples
///
/// ```
/// use std::fmt;
///
/// use tsrpc::logging::Logger;
///
/// struct StderrWarnings;
///
/// impl Logger for StderrWarnings {
///     fn warn(&self, args: fmt::Arguments<'_>) { eprintln!("warn: {args}"); }
/// }
/// ```
pub trait Logger: Send + Sync {
    /// Record a debug-level event.
    fn debug(&self, _args: fmt::Arguments<'_>) {}
    /// Record a routine event.
    fn log(&self, _args: fmt::Arguments<'_>) {}
    /// Record a warning.
    fn warn(&self, _args: fmt::Arguments<'_>) {}
    /// Record an error.
    fn error(&self, _args: fmt::Arguments<'_>) {}
}

/// Logger forwarding every level to the matching `tracing` macro.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn debug(&self, args: fmt::Arguments<'_>) { tracing::debug!("{args}"); }

    fn log(&self, args: fmt::Arguments<'_>) { tracing::info!("{args}"); }

    fn warn(&self, args: fmt::Arguments<'_>) { tracing::warn!("{args}"); }

    fn error(&self, args: fmt::Arguments<'_>) { tracing::error!("{args}"); }
}

/// Logger that discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopLogger;

impl Logger for NoopLogger {}

/// Wrapper that drops events below `level` before reaching `inner`.
pub struct LevelFilteredLogger {
    inner: Arc<dyn Logger>,
    level: LogLevel,
}

impl LevelFilteredLogger {
    fn enabled(&self, level: LogLevel) -> bool { level >= self.level }
}

impl Logger for LevelFilteredLogger {
    fn debug(&self, args: fmt::Arguments<'_>) {
        if self.enabled(LogLevel::Debug) {
            self.inner.debug(args);
        }
    }

    fn log(&self, args: fmt::Arguments<'_>) {
        if self.enabled(LogLevel::Log) {
            self.inner.log(args);
        }
    }

    fn warn(&self, args: fmt::Arguments<'_>) {
        if self.enabled(LogLevel::Warn) {
            self.inner.warn(args);
        }
    }

    fn error(&self, args: fmt::Arguments<'_>) {
        if self.enabled(LogLevel::Error) {
            self.inner.error(args);
        }
    }
}

impl fmt::Debug for LevelFilteredLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LevelFilteredLogger")
            .field("level", &self.level)
            .finish_non_exhaustive()
    }
}

/// Reduce `inner` so that only events at or above `level` are emitted.
///
/// [`LogLevel::Debug`] returns `inner` unchanged and [`LogLevel::None`]
/// returns a [`NoopLogger`].
#[must_use]
pub fn filter_logger(inner: Arc<dyn Logger>, level: LogLevel) -> Arc<dyn Logger> {
    match level {
        LogLevel::Debug => inner,
        LogLevel::None => Arc::new(NoopLogger),
        level => Arc::new(LevelFilteredLogger { inner, level }),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use rstest::rstest;
    use tracing_test::traced_test;

    use super::*;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(LogLevel, String)>>);

    impl Recorder {
        fn push(&self, level: LogLevel, args: fmt::Arguments<'_>) {
            self.0
                .lock()
                .expect("recorder lock")
                .push((level, args.to_string()));
        }

        fn levels(&self) -> Vec<LogLevel> {
            self.0
                .lock()
                .expect("recorder lock")
                .iter()
                .map(|(level, _)| *level)
                .collect()
        }
    }

    impl Logger for Recorder {
        fn debug(&self, args: fmt::Arguments<'_>) { self.push(LogLevel::Debug, args); }

        fn log(&self, args: fmt::Arguments<'_>) { self.push(LogLevel::Log, args); }

        fn warn(&self, args: fmt::Arguments<'_>) { self.push(LogLevel::Warn, args); }

        fn error(&self, args: fmt::Arguments<'_>) { self.push(LogLevel::Error, args); }
    }

    fn emit_all(logger: &dyn Logger) {
        logger.debug(format_args!("d"));
        logger.log(format_args!("l"));
        logger.warn(format_args!("w"));
        logger.error(format_args!("e"));
    }

    #[rstest]
    #[case(LogLevel::Debug, vec![LogLevel::Debug, LogLevel::Log, LogLevel::Warn, LogLevel::Error])]
    #[case(LogLevel::Log, vec![LogLevel::Log, LogLevel::Warn, LogLevel::Error])]
    #[case(LogLevel::Warn, vec![LogLevel::Warn, LogLevel::Error])]
    #[case(LogLevel::Error, vec![LogLevel::Error])]
    #[case(LogLevel::None, vec![])]
    fn filter_drops_lower_levels(#[case] level: LogLevel, #[case] expected: Vec<LogLevel>) {
        let recorder = Arc::new(Recorder::default());
        let filtered = filter_logger(recorder.clone(), level);
        emit_all(filtered.as_ref());
        assert_eq!(recorder.levels(), expected);
    }

    #[rstest]
    #[case("debug", LogLevel::Debug)]
    #[case("info", LogLevel::Log)]
    #[case("WARN", LogLevel::Warn)]
    #[case("none", LogLevel::None)]
    fn levels_parse_case_insensitively(#[case] input: &str, #[case] expected: LogLevel) {
        assert_eq!(input.parse::<LogLevel>(), Ok(expected));
    }

    #[traced_test]
    #[test]
    fn tracing_logger_forwards_to_tracing() {
        TracingLogger.warn(format_args!("schema drift on {}", "Echo"));
        assert!(logs_contain("schema drift on Echo"));
    }
}
