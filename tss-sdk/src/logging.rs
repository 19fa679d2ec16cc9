//! Process-wide log sink.
//!
//! The crate logs through the `log` facade. [`set_logger`] registers a bridge
//! with the facade the first time it is called and routes every record to the
//! installed sink. Installing a new sink replaces the old one.

use std::sync::{Arc, RwLock};

use lazy_static::lazy_static;
use log::{Level, LevelFilter, Log, Metadata, Record};

use crate::error::{LocalError, Result};

/// Receiver for log records.
pub trait LogSink: Send + Sync {
    fn log(&self, level: Level, message: &str);
}

impl<F> LogSink for F
where
    F: Fn(Level, &str) + Send + Sync,
{
    fn log(&self, level: Level, message: &str) {
        self(level, message)
    }
}

struct Bridge;

static BRIDGE: Bridge = Bridge;

lazy_static! {
    static ref SINK: RwLock<Option<Arc<dyn LogSink>>> = RwLock::new(None);

    static ref BRIDGE_INSTALLED: bool = match log::set_logger(&BRIDGE) {
        Ok(()) => {
            log::set_max_level(LevelFilter::Trace);
            true
        }
        Err(_) => false,
    };
}

fn current_sink() -> Option<Arc<dyn LogSink>> {
    match SINK.read() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

fn replace_sink(sink: Option<Arc<dyn LogSink>>) {
    match SINK.write() {
        Ok(mut guard) => *guard = sink,
        Err(poisoned) => *poisoned.into_inner() = sink,
    }
}

impl Log for Bridge {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        current_sink().is_some()
    }

    fn log(&self, record: &Record) {
        // The sink is cloned out so a sink that logs cannot deadlock on SINK.
        if let Some(sink) = current_sink() {
            let message = format!("[{}] {}", record.target(), record.args());
            sink.log(record.level(), &message);
        }
    }

    fn flush(&self) {}
}

/// Installs `sink` as the process-wide log receiver, replacing any previous one.
///
/// Fails if a different logger already owns the `log` facade.
pub fn set_logger<S: LogSink + 'static>(sink: S) -> Result<()> {
    if !*BRIDGE_INSTALLED {
        return Err(LocalError::LoggerInstalled.into());
    }
    replace_sink(Some(Arc::new(sink)));
    Ok(())
}

/// Removes the installed sink; records are dropped until a new one is set.
pub fn clear_logger() {
    replace_sink(None);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_sink_replacement() {
        let first: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let second: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        let captured = first.clone();
        set_logger(move |_level: Level, message: &str| {
            captured.lock().unwrap().push(message.to_string());
        })
        .unwrap();
        log::warn!("logging-test-first");

        let captured = second.clone();
        set_logger(move |level: Level, message: &str| {
            captured.lock().unwrap().push(format!("{}:{}", level, message));
        })
        .unwrap();
        log::info!("logging-test-second");
        clear_logger();
        log::info!("logging-test-dropped");

        let first = first.lock().unwrap();
        let second = second.lock().unwrap();
        assert!(first.iter().any(|m| m.ends_with("logging-test-first")));
        assert!(!first.iter().any(|m| m.contains("logging-test-second")));
        assert!(second.iter().any(|m| m.starts_with("INFO:") && m.ends_with("logging-test-second")));
        assert!(!second.iter().any(|m| m.contains("logging-test-dropped")));
    }
}
