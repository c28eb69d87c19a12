//! The engine boundary.
//!
//! Everything below the session speaks in raw integer status codes, the
//! native convention of libcriu-style checkpoint engines: a non-negative
//! value is success (and may carry a payload such as a restored PID), a
//! negative value is an errno-derived failure code. Translation into
//! [`Error`](crate::error::Error) happens above this boundary, never below
//! it.

use std::fmt;
use std::os::fd::RawFd;

/// Raw engine status. Non-negative is success, negative is a failure code.
pub type StatusCode = i32;

/// Boolean behaviour toggles understood by checkpoint engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineFlag {
    /// Keep the checkpointed process running after the dump.
    LeaveRunning,
    /// Substitute inaccessible device files during restore.
    EvasiveDevices,
    /// Allow dumping processes attached to a shell session.
    ShellJob,
    /// Allow established TCP connections in the image.
    TcpEstablished,
    /// Allow external unix sockets in the image.
    ExtUnixSk,
}

impl EngineFlag {
    pub fn name(self) -> &'static str {
        match self {
            EngineFlag::LeaveRunning => "leave-running",
            EngineFlag::EvasiveDevices => "evasive-devices",
            EngineFlag::ShellJob => "shell-job",
            EngineFlag::TcpEstablished => "tcp-established",
            EngineFlag::ExtUnixSk => "ext-unix-sk",
        }
    }
}

impl fmt::Display for EngineFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A checkpoint/restore engine holding one mutable option set.
///
/// The engine owns the authoritative copy of the configuration: every
/// `configure_*` call updates that copy, and the three operation verbs run
/// against whatever has been accumulated so far. `init` clears the option
/// set and must be the first call after construction. The verbs block
/// until the engine finishes.
///
/// Directory options cross this boundary as raw file descriptors, not
/// paths. The caller keeps the descriptors open for as long as the engine
/// may run an operation with them.
pub trait Engine {
    /// Resets the engine's option set. Must be called once, first.
    fn init(&mut self) -> StatusCode;

    /// Records the address of the engine's backing service.
    fn configure_service_address(&mut self, address: &str) -> StatusCode;

    /// Records the descriptor of the directory holding image files.
    fn configure_images_dir(&mut self, fd: RawFd) -> StatusCode;

    /// Records the descriptor of the directory for work files and logs.
    fn configure_work_dir(&mut self, fd: RawFd) -> StatusCode;

    /// Records the target process of the next dump.
    fn configure_pid(&mut self, pid: i32) -> StatusCode;

    /// Sets or clears one behaviour toggle.
    fn configure_flag(&mut self, flag: EngineFlag, value: bool) -> StatusCode;

    /// Records the engine log file name.
    fn configure_log_file(&mut self, path: &str) -> StatusCode;

    /// Records the engine log verbosity.
    fn configure_log_level(&mut self, level: i32) -> StatusCode;

    /// Probes whether the engine is usable on this host.
    fn check(&mut self) -> StatusCode;

    /// Checkpoints the configured process tree into the images directory.
    fn dump(&mut self) -> StatusCode;

    /// Recreates a process tree from the images directory. On success the
    /// returned status may be the PID of the restored tree's root.
    fn restore(&mut self) -> StatusCode;
}
