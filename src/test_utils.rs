//! Test doubles for exercising sessions without a real engine.

use std::os::fd::RawFd;
use std::sync::{Arc, Mutex};

use crate::engine::{Engine, EngineFlag, StatusCode};

/// One observed boundary call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Init,
    ServiceAddress(String),
    ImagesDir(RawFd),
    WorkDir(RawFd),
    Pid(i32),
    Flag(EngineFlag, bool),
    LogFile(String),
    LogLevel(i32),
    Check,
    Dump,
    Restore,
}

/// Shared, ordered log of boundary calls.
pub type CallLog = Arc<Mutex<Vec<EngineCall>>>;

/// Engine double that records every boundary call and answers with scripted
/// status codes (all zero unless overridden).
#[derive(Debug, Default)]
pub struct RecordingEngine {
    calls: CallLog,
    init_status: StatusCode,
    configure_status: StatusCode,
    check_status: StatusCode,
    dump_status: StatusCode,
    restore_status: StatusCode,
}

impl RecordingEngine {
    pub fn new() -> RecordingEngine {
        RecordingEngine::default()
    }

    /// Handle to the call log. Stays usable after the engine has moved into
    /// a session.
    pub fn call_log(&self) -> CallLog {
        Arc::clone(&self.calls)
    }

    pub fn with_init_status(mut self, status: StatusCode) -> Self {
        self.init_status = status;
        self
    }

    pub fn with_configure_status(mut self, status: StatusCode) -> Self {
        self.configure_status = status;
        self
    }

    pub fn with_check_status(mut self, status: StatusCode) -> Self {
        self.check_status = status;
        self
    }

    pub fn with_dump_status(mut self, status: StatusCode) -> Self {
        self.dump_status = status;
        self
    }

    pub fn with_restore_status(mut self, status: StatusCode) -> Self {
        self.restore_status = status;
        self
    }

    fn record(&self, call: EngineCall) {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(call);
    }
}

impl Engine for RecordingEngine {
    fn init(&mut self) -> StatusCode {
        self.record(EngineCall::Init);
        self.init_status
    }

    fn configure_service_address(&mut self, address: &str) -> StatusCode {
        self.record(EngineCall::ServiceAddress(address.to_owned()));
        self.configure_status
    }

    fn configure_images_dir(&mut self, fd: RawFd) -> StatusCode {
        self.record(EngineCall::ImagesDir(fd));
        self.configure_status
    }

    fn configure_work_dir(&mut self, fd: RawFd) -> StatusCode {
        self.record(EngineCall::WorkDir(fd));
        self.configure_status
    }

    fn configure_pid(&mut self, pid: i32) -> StatusCode {
        self.record(EngineCall::Pid(pid));
        self.configure_status
    }

    fn configure_flag(&mut self, flag: EngineFlag, value: bool) -> StatusCode {
        self.record(EngineCall::Flag(flag, value));
        self.configure_status
    }

    fn configure_log_file(&mut self, path: &str) -> StatusCode {
        self.record(EngineCall::LogFile(path.to_owned()));
        self.configure_status
    }

    fn configure_log_level(&mut self, level: i32) -> StatusCode {
        self.record(EngineCall::LogLevel(level));
        self.configure_status
    }

    fn check(&mut self) -> StatusCode {
        self.record(EngineCall::Check);
        self.check_status
    }

    fn dump(&mut self) -> StatusCode {
        self.record(EngineCall::Dump);
        self.dump_status
    }

    fn restore(&mut self) -> StatusCode {
        self.record(EngineCall::Restore);
        self.restore_status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_calls_in_order_and_returns_scripted_codes() {
        let mut engine = RecordingEngine::new().with_dump_status(-7);
        let log = engine.call_log();

        assert_eq!(engine.init(), 0);
        assert_eq!(engine.configure_pid(42), 0);
        assert_eq!(engine.dump(), -7);

        let calls = log.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![EngineCall::Init, EngineCall::Pid(42), EngineCall::Dump]
        );
    }
}
