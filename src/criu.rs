//! Production engine backed by the `criu` binary.
//!
//! Options accumulate locally and are materialized into a fresh argv for
//! every operation. Directory descriptors are passed as `/proc/self/fd/N`
//! paths; descriptor numbers survive the fork/exec unchanged because the
//! handles are opened without close-on-exec, so the child resolves them to
//! the same directories.
//!
//! Subprocess outcomes are folded into the errno-derived status convention:
//! an unreachable binary reports `-ECONNREFUSED`, a spawn or I/O failure
//! `-ECOMM`, and a non-zero exit `-EBADE`. A successful restore returns the
//! PID of the restored tree's root, recovered through a `--pidfile` written
//! into the work (or images) directory.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::os::fd::RawFd;
use std::path::{Path, PathBuf};
use std::process::Command;

use log::{debug, warn};
use nix::errno::Errno;
use which::which;

use crate::engine::{Engine, EngineFlag, StatusCode};

#[derive(Debug, Default, Clone)]
struct CliOpts {
    service_address: Option<String>,
    images_fd: Option<RawFd>,
    work_fd: Option<RawFd>,
    pid: Option<i32>,
    leave_running: bool,
    evasive_devices: bool,
    shell_job: bool,
    tcp_established: bool,
    ext_unix_sk: bool,
    log_file: Option<String>,
    log_level: Option<i32>,
}

/// Engine that spawns `criu` directly for every operation.
#[derive(Debug)]
pub struct CriuEngine {
    binary: PathBuf,
    opts: CliOpts,
}

impl CriuEngine {
    /// Looks up `criu` in `$PATH`.
    pub fn discover() -> Option<CriuEngine> {
        which("criu").ok().map(CriuEngine::with_binary)
    }

    /// Uses the given binary without consulting `$PATH`.
    pub fn with_binary(binary: impl Into<PathBuf>) -> CriuEngine {
        CriuEngine {
            binary: binary.into(),
            opts: CliOpts::default(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    fn common_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();
        if let Some(fd) = self.opts.images_fd {
            args.push("--images-dir".into());
            args.push(format!("/proc/self/fd/{fd}").into());
        }
        if let Some(fd) = self.opts.work_fd {
            args.push("--work-dir".into());
            args.push(format!("/proc/self/fd/{fd}").into());
        }
        if let Some(level) = self.opts.log_level {
            args.push(format!("-v{level}").into());
        }
        if let Some(file) = &self.opts.log_file {
            args.push("--log-file".into());
            args.push(file.into());
        }
        if self.opts.leave_running {
            args.push("--leave-running".into());
        }
        if self.opts.evasive_devices {
            args.push("--evasive-devices".into());
        }
        if self.opts.shell_job {
            args.push("--shell-job".into());
        }
        if self.opts.tcp_established {
            args.push("--tcp-established".into());
        }
        if self.opts.ext_unix_sk {
            args.push("--ext-unix-sk".into());
        }
        args
    }

    fn run(&self, verb: &str, args: Vec<OsString>) -> StatusCode {
        if let Some(addr) = &self.opts.service_address {
            warn!("criu runs directly; service address {addr} is not used for `criu {verb}`");
        }

        let mut cmd = Command::new(&self.binary);
        cmd.arg(verb);
        cmd.args(&args);

        let printable = args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ");
        debug!("running `{} {} {}`", self.binary.display(), verb, printable);

        let output = match cmd.output() {
            Ok(output) => output,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                warn!("cannot run {}: {}", self.binary.display(), err);
                return -(Errno::ECONNREFUSED as i32);
            }
            Err(err) => {
                warn!("cannot run {} {}: {}", self.binary.display(), verb, err);
                return -(Errno::ECOMM as i32);
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            debug!("criu {}: {}", verb, stdout.trim());
        }

        if output.status.success() {
            0
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(
                "criu {} failed ({}): {}",
                verb,
                output.status,
                stderr.trim()
            );
            -(Errno::EBADE as i32)
        }
    }

    /// Where a detached restore writes its pidfile: inside the work (or
    /// images) directory, addressed through the inherited descriptor so
    /// this process and the child resolve the same file. `None` when no
    /// directory is configured to hold one.
    fn pidfile_path(&self) -> Option<PathBuf> {
        let fd = self.opts.work_fd.or(self.opts.images_fd)?;
        let name = format!("criu-restore-{}.pid", std::process::id());
        Some(PathBuf::from(format!("/proc/self/fd/{fd}/{name}")))
    }
}

fn clear_pidfile(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        if err.kind() != io::ErrorKind::NotFound {
            warn!("cannot remove pidfile {}: {}", path.display(), err);
        }
    }
}

impl Engine for CriuEngine {
    fn init(&mut self) -> StatusCode {
        self.opts = CliOpts::default();
        0
    }

    fn configure_service_address(&mut self, address: &str) -> StatusCode {
        self.opts.service_address = Some(address.to_owned());
        0
    }

    fn configure_images_dir(&mut self, fd: RawFd) -> StatusCode {
        self.opts.images_fd = Some(fd);
        0
    }

    fn configure_work_dir(&mut self, fd: RawFd) -> StatusCode {
        self.opts.work_fd = Some(fd);
        0
    }

    fn configure_pid(&mut self, pid: i32) -> StatusCode {
        self.opts.pid = Some(pid);
        0
    }

    fn configure_flag(&mut self, flag: EngineFlag, value: bool) -> StatusCode {
        match flag {
            EngineFlag::LeaveRunning => self.opts.leave_running = value,
            EngineFlag::EvasiveDevices => self.opts.evasive_devices = value,
            EngineFlag::ShellJob => self.opts.shell_job = value,
            EngineFlag::TcpEstablished => self.opts.tcp_established = value,
            EngineFlag::ExtUnixSk => self.opts.ext_unix_sk = value,
        }
        0
    }

    fn configure_log_file(&mut self, path: &str) -> StatusCode {
        self.opts.log_file = Some(path.to_owned());
        0
    }

    fn configure_log_level(&mut self, level: i32) -> StatusCode {
        self.opts.log_level = Some(level);
        0
    }

    fn check(&mut self) -> StatusCode {
        self.run("check", self.common_args())
    }

    fn dump(&mut self) -> StatusCode {
        let mut args = self.common_args();
        if let Some(pid) = self.opts.pid {
            args.push("--tree".into());
            args.push(pid.to_string().into());
        }
        self.run("dump", args)
    }

    fn restore(&mut self) -> StatusCode {
        let mut args = self.common_args();
        args.push("--restore-detached".into());

        let pidfile = self.pidfile_path();
        if let Some(pidfile) = &pidfile {
            clear_pidfile(pidfile);
            args.push("--pidfile".into());
            args.push(pidfile.into());
        }

        let rc = self.run("restore", args);
        if rc != 0 {
            return rc;
        }

        // Without a directory to hold a pidfile the restored pid is unknown.
        let Some(pidfile) = pidfile else {
            return 0;
        };

        let pid = match fs::read_to_string(&pidfile) {
            Ok(contents) => match contents.trim().parse::<i32>() {
                Ok(pid) if pid > 0 => pid,
                _ => {
                    warn!("restore pidfile {} holds no pid", pidfile.display());
                    -(Errno::EBADMSG as i32)
                }
            },
            Err(err) => {
                warn!("cannot read restore pidfile {}: {}", pidfile.display(), err);
                -(Errno::EBADMSG as i32)
            }
        };
        clear_pidfile(&pidfile);
        pid
    }
}
