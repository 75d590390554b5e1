//! Structured logging setup.
//!
//! Logs go to stderr through a `tracing-subscriber` fmt layer. The level
//! filter sits behind a reload layer so a configuration reload can change
//! verbosity in place.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, reload, Registry};

use crate::config::LogLevel;

/// Maps a configured level onto a tracing filter.
pub fn level_filter(level: LogLevel) -> LevelFilter {
    match level {
        LogLevel::Error => LevelFilter::ERROR,
        LogLevel::Warn => LevelFilter::WARN,
        LogLevel::Info => LevelFilter::INFO,
        LogLevel::Debug => LevelFilter::DEBUG,
    }
}

/// Handle for changing the log level at runtime.
#[derive(Clone)]
pub struct LogHandle {
    reload: Option<reload::Handle<LevelFilter, Registry>>,
    current: Arc<Mutex<LogLevel>>,
}

impl LogHandle {
    /// A handle not attached to any subscriber. It only records the level.
    pub fn detached(level: LogLevel) -> Self {
        Self {
            reload: None,
            current: Arc::new(Mutex::new(level)),
        }
    }

    /// The level most recently applied.
    pub fn level(&self) -> LogLevel {
        *self.current.lock()
    }

    /// Changes the active filter.
    pub fn set_level(&self, level: LogLevel) -> Result<(), reload::Error> {
        if let Some(handle) = &self.reload {
            handle.modify(|filter| *filter = level_filter(level))?;
        }
        *self.current.lock() = level;
        Ok(())
    }
}

impl std::fmt::Debug for LogHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogHandle")
            .field("attached", &self.reload.is_some())
            .field("level", &self.level())
            .finish()
    }
}

/// Installs the global subscriber.
///
/// `ansi` controls colour codes. If a global subscriber is already set the
/// returned handle is detached.
pub fn init(level: LogLevel, ansi: bool) -> LogHandle {
    let (filter, handle) = reload::Layer::new(level_filter(level));
    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(ansi)
                .with_target(false)
                .with_thread_names(true),
        )
        .try_init();

    match installed {
        Ok(()) => LogHandle {
            reload: Some(handle),
            current: Arc::new(Mutex::new(level)),
        },
        Err(_) => LogHandle::detached(level),
    }
}
