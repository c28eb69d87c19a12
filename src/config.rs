//! Session-side configuration mirror.
//!
//! The engine owns the authoritative option set; this is the session's own
//! copy, kept so the configuration stays inspectable after it has been
//! forwarded. Directory options are held as live [`DirHandle`]s, which keeps
//! the descriptors open for as long as the configuration references them.

use crate::handle::DirHandle;

/// Log verbosity pinned when a log file is configured with no explicit
/// level.
pub const DEFAULT_LOG_LEVEL: i32 = 4;

/// Behaviour toggles, all off by default.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionFlags {
    pub leave_running: bool,
    pub evasive_devices: bool,
    pub shell_job: bool,
    pub tcp_established: bool,
    pub ext_unix_sk: bool,
    /// Recorded in the model but not exposed through a session setter and
    /// never forwarded to the engine.
    pub file_locks: bool,
}

#[derive(Debug, Default)]
pub struct SessionConfig {
    pub service_address: Option<String>,
    pub images_dir: Option<DirHandle>,
    pub work_dir: Option<DirHandle>,
    pub pid: Option<i32>,
    pub flags: SessionFlags,
    pub log_file: Option<String>,
    pub log_level: Option<i32>,
}

impl SessionConfig {
    pub fn new() -> SessionConfig {
        SessionConfig::default()
    }

    /// The log-file level rule: configuring a log file while no explicit
    /// level has been chosen pins the level to [`DEFAULT_LOG_LEVEL`].
    /// Engines may write nothing to a configured log file while the level
    /// is unset.
    ///
    /// Returns the newly pinned level, or `None` when a level was already
    /// in place and nothing changed.
    pub fn apply_log_file_level_default(&mut self) -> Option<i32> {
        if self.log_level.is_none() {
            self.log_level = Some(DEFAULT_LOG_LEVEL);
            self.log_level
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn everything_starts_unset() {
        let config = SessionConfig::new();
        assert!(config.service_address.is_none());
        assert!(config.images_dir.is_none());
        assert!(config.work_dir.is_none());
        assert!(config.pid.is_none());
        assert!(config.log_file.is_none());
        assert!(config.log_level.is_none());
        assert_eq!(config.flags, SessionFlags::default());
        assert!(!config.flags.file_locks);
    }

    #[test]
    fn log_file_rule_pins_the_default_level_once() {
        let mut config = SessionConfig::new();
        assert_eq!(config.apply_log_file_level_default(), Some(DEFAULT_LOG_LEVEL));
        assert_eq!(config.log_level, Some(DEFAULT_LOG_LEVEL));
        // Already pinned, nothing to do.
        assert_eq!(config.apply_log_file_level_default(), None);
    }

    #[test]
    fn explicit_level_suppresses_the_log_file_rule() {
        let mut config = SessionConfig::new();
        config.log_level = Some(2);
        assert_eq!(config.apply_log_file_level_default(), None);
        assert_eq!(config.log_level, Some(2));
    }
}
