//! Checkpoint session lifecycle.

use std::os::fd::{AsRawFd, RawFd};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info};

use crate::config::SessionConfig;
use crate::engine::{Engine, EngineFlag, StatusCode};
use crate::error::{Error, Result, status_to_result};
use crate::handle::DirHandle;

/// Engines hold one process-global mutable option set, so at most one
/// session may be live per process.
static ENGINE_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Exclusive claim on the engine slot, returned on drop.
#[derive(Debug)]
struct ActiveToken;

impl ActiveToken {
    fn acquire() -> Result<ActiveToken> {
        if ENGINE_ACTIVE
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Ok(ActiveToken)
        } else {
            Err(Error::EngineBusy)
        }
    }
}

impl Drop for ActiveToken {
    fn drop(&mut self) {
        ENGINE_ACTIVE.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Initialized, nothing configured yet.
    Created,
    /// At least one setter has been applied.
    Configuring,
    /// The last operation finished, successfully or not.
    Ready,
    Checking,
    Dumping,
    Restoring,
}

/// A configured conversation with one checkpoint engine.
///
/// The session owns the engine, a mirror of everything configured on it,
/// and the directory descriptors the configuration references. Setters
/// follow one contract: validate locally, store in the mirror, forward to
/// the engine, and echo the committed value. A failed local validation
/// leaves both the mirror and the engine untouched; a forward rejected by
/// the engine keeps the stored value, with the engine's answer surfaced as
/// the error.
///
/// Construction claims the process-wide engine slot and fails with
/// [`Error::EngineBusy`] while another session is live. Dropping the
/// session closes its directory descriptors and returns the slot.
///
/// Every method takes `&mut self`, so a session has one writer at a time.
/// The operation verbs block for as long as the engine runs; the engine
/// offers no cooperative cancellation, only process-level signals.
#[derive(Debug)]
pub struct CheckpointSession<E: Engine> {
    config: SessionConfig,
    engine: E,
    state: SessionState,
    _active: ActiveToken,
}

impl<E: Engine> CheckpointSession<E> {
    /// Claims the engine slot and initializes the engine's option set.
    pub fn new(engine: E) -> Result<CheckpointSession<E>> {
        let token = ActiveToken::acquire()?;
        let mut session = CheckpointSession {
            config: SessionConfig::new(),
            engine,
            state: SessionState::Created,
            _active: token,
        };
        debug!("initializing engine");
        status_to_result(session.engine.init())?;
        Ok(session)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The session-side mirror of the engine configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Records the address of the engine's backing service.
    pub fn set_service_address(&mut self, address: &str) -> Result<&str> {
        if address.is_empty() {
            return Err(Error::InvalidArgument(
                "service address must not be empty".into(),
            ));
        }
        self.config.service_address = Some(address.to_owned());
        self.mark_configuring();
        status_to_result(self.engine.configure_service_address(address))?;
        Ok(self.config.service_address.as_deref().unwrap_or_default())
    }

    /// Opens `path` as the images directory and forwards its descriptor.
    ///
    /// The descriptor stays open for the life of the session (or until the
    /// directory is replaced by a later call, which releases the old one).
    /// Echoes the forwarded descriptor.
    pub fn set_images_dir(&mut self, path: impl AsRef<Path>) -> Result<RawFd> {
        let handle = DirHandle::open(path)?;
        let fd = handle.as_raw_fd();
        debug!("images directory {} (fd {fd})", handle.path().display());
        if let Some(mut previous) = self.config.images_dir.replace(handle) {
            previous.release();
        }
        self.mark_configuring();
        status_to_result(self.engine.configure_images_dir(fd))?;
        Ok(fd)
    }

    /// Same contract as [`CheckpointSession::set_images_dir`], for the
    /// directory holding engine work files and logs.
    pub fn set_work_dir(&mut self, path: impl AsRef<Path>) -> Result<RawFd> {
        let handle = DirHandle::open(path)?;
        let fd = handle.as_raw_fd();
        debug!("work directory {} (fd {fd})", handle.path().display());
        if let Some(mut previous) = self.config.work_dir.replace(handle) {
            previous.release();
        }
        self.mark_configuring();
        status_to_result(self.engine.configure_work_dir(fd))?;
        Ok(fd)
    }

    /// Sets the PID of the process tree the next dump targets.
    pub fn set_pid(&mut self, pid: i32) -> Result<i32> {
        if pid <= 0 {
            return Err(Error::InvalidArgument(format!(
                "pid must be positive, got {pid}"
            )));
        }
        self.config.pid = Some(pid);
        self.mark_configuring();
        status_to_result(self.engine.configure_pid(pid))?;
        Ok(pid)
    }

    /// Keeps the checkpointed process running after a dump.
    pub fn set_leave_running(&mut self, value: bool) -> Result<bool> {
        self.set_flag(EngineFlag::LeaveRunning, value)
    }

    pub fn set_evasive_devices(&mut self, value: bool) -> Result<bool> {
        self.set_flag(EngineFlag::EvasiveDevices, value)
    }

    pub fn set_shell_job(&mut self, value: bool) -> Result<bool> {
        self.set_flag(EngineFlag::ShellJob, value)
    }

    pub fn set_tcp_established(&mut self, value: bool) -> Result<bool> {
        self.set_flag(EngineFlag::TcpEstablished, value)
    }

    pub fn set_ext_unix_sk(&mut self, value: bool) -> Result<bool> {
        self.set_flag(EngineFlag::ExtUnixSk, value)
    }

    /// Names the engine log file, then applies the log-file level rule:
    /// when no explicit level has been chosen, the level is pinned to
    /// [`crate::config::DEFAULT_LOG_LEVEL`] and forwarded as well.
    pub fn set_log_file(&mut self, file: &str) -> Result<&str> {
        if file.is_empty() {
            return Err(Error::InvalidArgument(
                "log file name must not be empty".into(),
            ));
        }
        self.config.log_file = Some(file.to_owned());
        self.mark_configuring();
        status_to_result(self.engine.configure_log_file(file))?;
        if let Some(level) = self.config.apply_log_file_level_default() {
            debug!("log level defaulted to {level}");
            status_to_result(self.engine.configure_log_level(level))?;
        }
        Ok(self.config.log_file.as_deref().unwrap_or_default())
    }

    /// Chooses the engine log verbosity explicitly, which also keeps later
    /// [`CheckpointSession::set_log_file`] calls from touching the level.
    pub fn set_log_level(&mut self, level: i32) -> Result<i32> {
        if level < 0 {
            return Err(Error::InvalidArgument(format!(
                "log level must not be negative, got {level}"
            )));
        }
        self.config.log_level = Some(level);
        self.mark_configuring();
        status_to_result(self.engine.configure_log_level(level))?;
        Ok(level)
    }

    /// Probes whether the engine is usable on this host. Needs no prior
    /// configuration.
    pub fn check(&mut self) -> Result<StatusCode> {
        info!("checking engine availability");
        self.state = SessionState::Checking;
        let rc = self.engine.check();
        self.state = SessionState::Ready;
        status_to_result(rc)
    }

    /// Checkpoints the configured process tree into the images directory.
    pub fn dump(&mut self) -> Result<StatusCode> {
        self.require_images_dir("dump")?;
        if let Some(pid) = self.config.pid {
            info!("dumping process tree {pid}");
        } else {
            info!("dumping without an explicit target pid");
        }
        self.state = SessionState::Dumping;
        let rc = self.engine.dump();
        self.state = SessionState::Ready;
        status_to_result(rc)
    }

    /// Recreates a process tree from the images directory. A positive
    /// status is the PID of the restored tree's root.
    pub fn restore(&mut self) -> Result<StatusCode> {
        self.require_images_dir("restore")?;
        if let Some(dir) = &self.config.images_dir {
            info!("restoring process tree from {}", dir.path().display());
        }
        self.state = SessionState::Restoring;
        let rc = self.engine.restore();
        self.state = SessionState::Ready;
        let rc = status_to_result(rc)?;
        if rc > 0 {
            info!("restored process tree, root pid {rc}");
        }
        Ok(rc)
    }

    fn set_flag(&mut self, flag: EngineFlag, value: bool) -> Result<bool> {
        let slot = match flag {
            EngineFlag::LeaveRunning => &mut self.config.flags.leave_running,
            EngineFlag::EvasiveDevices => &mut self.config.flags.evasive_devices,
            EngineFlag::ShellJob => &mut self.config.flags.shell_job,
            EngineFlag::TcpEstablished => &mut self.config.flags.tcp_established,
            EngineFlag::ExtUnixSk => &mut self.config.flags.ext_unix_sk,
        };
        *slot = value;
        self.mark_configuring();
        debug!("flag {flag} -> {value}");
        status_to_result(self.engine.configure_flag(flag, value))?;
        Ok(value)
    }

    fn mark_configuring(&mut self) {
        self.state = SessionState::Configuring;
    }

    fn require_images_dir(&self, op: &'static str) -> Result<()> {
        if self.config.images_dir.is_none() {
            return Err(Error::PreconditionFailed {
                op,
                missing: "an images directory",
            });
        }
        Ok(())
    }
}

impl<E: Engine> Drop for CheckpointSession<E> {
    fn drop(&mut self) {
        debug!("closing checkpoint session");
    }
}
