use std::path::PathBuf;

use clap::{Parser, Subcommand};
use criu_session::{CheckpointSession, CriuEngine, Result};

#[derive(Debug, Parser)]
#[command(name = "criu-session")]
#[command(about = "Checkpoint and restore process trees through CRIU", version)]
struct Cli {
    /// Specify the CRIU executable path
    #[arg(long)]
    criu_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Check that the engine is usable on this host
    Check,

    /// Checkpoint a running process tree into an images directory
    Dump {
        /// PID of the process tree to checkpoint
        pid: i32,

        /// Directory receiving the image files
        #[arg(short = 'D', long)]
        images_dir: PathBuf,

        /// Directory for engine work files and logs
        #[arg(short = 'W', long)]
        work_dir: Option<PathBuf>,

        /// Leave the process running after the dump
        #[arg(long)]
        leave_running: bool,

        /// Allow dumping processes attached to a shell session
        #[arg(long)]
        shell_job: bool,

        /// Allow established TCP connections in the image
        #[arg(long)]
        tcp_established: bool,

        /// Allow external unix sockets in the image
        #[arg(long)]
        ext_unix_sk: bool,

        /// Substitute inaccessible device files
        #[arg(long)]
        evasive_devices: bool,

        /// Engine log file, created in the work directory
        #[arg(long)]
        log_file: Option<String>,

        /// Engine log verbosity (0-4)
        #[arg(long)]
        log_level: Option<i32>,
    },

    /// Restore a process tree from an images directory
    Restore {
        /// Directory holding the image files
        #[arg(short = 'D', long)]
        images_dir: PathBuf,

        /// Directory for engine work files and logs
        #[arg(short = 'W', long)]
        work_dir: Option<PathBuf>,

        /// Restore a process that was attached to a shell session
        #[arg(long)]
        shell_job: bool,

        /// Restore established TCP connections
        #[arg(long)]
        tcp_established: bool,

        /// Restore external unix sockets
        #[arg(long)]
        ext_unix_sk: bool,

        /// Substitute inaccessible device files
        #[arg(long)]
        evasive_devices: bool,

        /// Engine log file, created in the work directory
        #[arg(long)]
        log_file: Option<String>,

        /// Engine log verbosity (0-4)
        #[arg(long)]
        log_level: Option<i32>,
    },
}

fn run(cli: Cli, engine: CriuEngine) -> Result<()> {
    let mut session = CheckpointSession::new(engine)?;

    match cli.command {
        Commands::Check => {
            session.check()?;
            println!("engine check passed");
        }
        Commands::Dump {
            pid,
            images_dir,
            work_dir,
            leave_running,
            shell_job,
            tcp_established,
            ext_unix_sk,
            evasive_devices,
            log_file,
            log_level,
        } => {
            session.set_pid(pid)?;
            session.set_images_dir(&images_dir)?;
            if let Some(dir) = &work_dir {
                session.set_work_dir(dir)?;
            }
            if let Some(level) = log_level {
                session.set_log_level(level)?;
            }
            if let Some(file) = &log_file {
                session.set_log_file(file)?;
            }
            session.set_leave_running(leave_running)?;
            session.set_shell_job(shell_job)?;
            session.set_tcp_established(tcp_established)?;
            session.set_ext_unix_sk(ext_unix_sk)?;
            session.set_evasive_devices(evasive_devices)?;
            let rc = session.dump()?;
            println!("dump finished (status {rc})");
        }
        Commands::Restore {
            images_dir,
            work_dir,
            shell_job,
            tcp_established,
            ext_unix_sk,
            evasive_devices,
            log_file,
            log_level,
        } => {
            session.set_images_dir(&images_dir)?;
            if let Some(dir) = &work_dir {
                session.set_work_dir(dir)?;
            }
            if let Some(level) = log_level {
                session.set_log_level(level)?;
            }
            if let Some(file) = &log_file {
                session.set_log_file(file)?;
            }
            session.set_shell_job(shell_job)?;
            session.set_tcp_established(tcp_established)?;
            session.set_ext_unix_sk(ext_unix_sk)?;
            session.set_evasive_devices(evasive_devices)?;
            let rc = session.restore()?;
            if rc > 0 {
                println!("restored process tree, root pid {rc}");
            } else {
                println!("restore finished (status {rc})");
            }
        }
    }

    Ok(())
}

fn main() {
    pretty_env_logger::formatted_timed_builder()
        .parse_default_env()
        .init();

    let cli = Cli::parse();

    // Find CRIU path if not provided
    let engine = match &cli.criu_path {
        Some(path) => CriuEngine::with_binary(path),
        None => match CriuEngine::discover() {
            Some(engine) => engine,
            None => {
                eprintln!("criu not found in PATH, please specify --criu-path");
                std::process::exit(1);
            }
        },
    };

    if let Err(err) = run(cli, engine) {
        eprintln!("{err}");
        std::process::exit(1);
    }
}
