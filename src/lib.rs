//! Process checkpoint/restore sessions over CRIU-style engines.
//!
//! A [`CheckpointSession`] pairs a mutable engine configuration with the
//! operations that consume it: `check`, `dump` and `restore`. The engine
//! boundary is the [`Engine`] trait, spoken in raw status codes;
//! [`CriuEngine`] implements it by driving the `criu` binary, and
//! [`test_utils::RecordingEngine`] stands in for it under test.

pub mod config;
pub mod criu;
pub mod engine;
pub mod error;
pub mod handle;
pub mod session;
pub mod test_utils;

pub use config::{DEFAULT_LOG_LEVEL, SessionConfig, SessionFlags};
pub use criu::CriuEngine;
pub use engine::{Engine, EngineFlag, StatusCode};
pub use error::{Error, Result};
pub use handle::DirHandle;
pub use session::{CheckpointSession, SessionState};
