//! Connection status reported by the engine.
//!
//! The engine reports status changes from its own threads. Only the most
//! recent report matters, so the session keeps a single slot that each report
//! overwrites.

use std::sync::{Mutex, PoisonError};

/// Connection codes as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnCode {
    Unknown,
    Connected,
    Disconnected,
    ConnectClose,
    ConnectError,
    ConnectUrlParseError,
    ConnectRefused,
    ConnectFail,
    ConnectProxyError,
    ConnectProxyParseError,
}

/// Coarse connection state derived from a [`ConnCode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Unknown,
    Connected,
    Disconnected,
    Closed,
    Error(ConnFailure),
}

/// Why a connection attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnFailure {
    Connect,
    UrlParse,
    Refused,
    Fail,
    Proxy,
    ProxyParse,
}

impl ConnCode {
    /// Maps an engine code; anything unrecognised is `Unknown`.
    pub fn from_code(code: i32) -> Self {
        match code {
            1300 => ConnCode::Connected,
            1301 => ConnCode::Disconnected,
            1302 => ConnCode::ConnectClose,
            1310 => ConnCode::ConnectError,
            1311 => ConnCode::ConnectUrlParseError,
            1320 => ConnCode::ConnectRefused,
            1321 => ConnCode::ConnectFail,
            1350 => ConnCode::ConnectProxyError,
            1351 => ConnCode::ConnectProxyParseError,
            _ => ConnCode::Unknown,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            ConnCode::Unknown => 0,
            ConnCode::Connected => 1300,
            ConnCode::Disconnected => 1301,
            ConnCode::ConnectClose => 1302,
            ConnCode::ConnectError => 1310,
            ConnCode::ConnectUrlParseError => 1311,
            ConnCode::ConnectRefused => 1320,
            ConnCode::ConnectFail => 1321,
            ConnCode::ConnectProxyError => 1350,
            ConnCode::ConnectProxyParseError => 1351,
        }
    }

    pub fn state(self) -> ConnState {
        match self {
            ConnCode::Unknown => ConnState::Unknown,
            ConnCode::Connected => ConnState::Connected,
            ConnCode::Disconnected => ConnState::Disconnected,
            ConnCode::ConnectClose => ConnState::Closed,
            ConnCode::ConnectError => ConnState::Error(ConnFailure::Connect),
            ConnCode::ConnectUrlParseError => ConnState::Error(ConnFailure::UrlParse),
            ConnCode::ConnectRefused => ConnState::Error(ConnFailure::Refused),
            ConnCode::ConnectFail => ConnState::Error(ConnFailure::Fail),
            ConnCode::ConnectProxyError => ConnState::Error(ConnFailure::Proxy),
            ConnCode::ConnectProxyParseError => ConnState::Error(ConnFailure::ProxyParse),
        }
    }
}

/// Latest `(code, message)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub code: ConnCode,
    pub message: Option<String>,
}

impl ConnectionStatus {
    pub fn unknown() -> Self {
        Self {
            code: ConnCode::Unknown,
            message: None,
        }
    }

    pub fn state(&self) -> ConnState {
        self.code.state()
    }
}

/// Callback invoked on every status report.
pub type StatusListener = Box<dyn Fn(&ConnectionStatus) + Send + Sync>;

/// Single-slot, last-write-wins status store.
pub(crate) struct StatusSlot {
    current: Mutex<ConnectionStatus>,
    listener: Option<StatusListener>,
}

impl StatusSlot {
    pub(crate) fn new(listener: Option<StatusListener>) -> Self {
        Self {
            current: Mutex::new(ConnectionStatus::unknown()),
            listener,
        }
    }

    pub(crate) fn set(&self, code: i32, message: Option<String>) {
        let status = ConnectionStatus {
            code: ConnCode::from_code(code),
            message,
        };
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = status.clone();
        log::debug!("connection status {} ({:?})", code, status.message);

        if let Some(listener) = &self.listener {
            listener(&status);
        }
    }

    pub(crate) fn get(&self) -> ConnectionStatus {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn reset(&self) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = ConnectionStatus::unknown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_codes_map_to_states() {
        assert_eq!(ConnCode::from_code(1300).state(), ConnState::Connected);
        assert_eq!(ConnCode::from_code(1302).state(), ConnState::Closed);
        assert_eq!(
            ConnCode::from_code(1311).state(),
            ConnState::Error(ConnFailure::UrlParse)
        );
        assert_eq!(
            ConnCode::from_code(1351).state(),
            ConnState::Error(ConnFailure::ProxyParse)
        );
        assert_eq!(ConnCode::from_code(4242), ConnCode::Unknown);
        assert_eq!(ConnCode::ConnectRefused.code(), 1320);
    }

    #[test]
    fn test_last_write_wins() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let slot = StatusSlot::new(Some(Box::new(move |_status: &ConnectionStatus| {
            counter.fetch_add(1, Ordering::SeqCst);
        })));

        assert_eq!(slot.get(), ConnectionStatus::unknown());
        slot.set(1300, Some("up".to_string()));
        slot.set(1301, Some("down".to_string()));
        assert_eq!(slot.get().code, ConnCode::Disconnected);
        assert_eq!(slot.get().message.as_deref(), Some("down"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        slot.reset();
        assert_eq!(slot.get().state(), ConnState::Unknown);
    }

    #[test]
    fn test_reports_from_other_threads() {
        let slot = Arc::new(StatusSlot::new(None));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let slot = slot.clone();
                std::thread::spawn(move || slot.set(1301, None))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(slot.get().code, ConnCode::Disconnected);
    }
}
