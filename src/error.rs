//! Failure taxonomy for checkpoint/restore sessions.
//!
//! Local validation problems (bad paths, bad arguments, missing
//! configuration) are reported directly. Engine failures arrive as negative
//! status codes on the [`Engine`](crate::engine::Engine) boundary and are
//! translated into structured variants by [`Error::from_status`]; codes with
//! no known meaning are preserved in [`Error::UnknownEngineError`] so they
//! can be correlated with the engine's documentation.

use std::path::PathBuf;

use nix::errno::Errno;

use crate::engine::StatusCode;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A configured path could not be opened as a directory.
    #[error("cannot open `{}` as a directory: {}", path.display(), source)]
    DirectoryNotFound { path: PathBuf, source: Errno },

    /// A setter received an out-of-range or empty value.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An operation was invoked before the configuration it needs.
    #[error("`{op}` requires {missing} to be configured first")]
    PreconditionFailed {
        op: &'static str,
        missing: &'static str,
    },

    /// A second session tried to activate while one is already live.
    #[error("another checkpoint session already owns the engine")]
    EngineBusy,

    /// The engine reported that the requested operation failed.
    #[error("engine reported the request failed")]
    RpcFailure,

    /// The engine could not reach its backing service.
    #[error("unable to connect to the checkpoint engine")]
    ConnectionRefused,

    /// The engine could not exchange messages with its backing service.
    #[error("unable to send/recv messages to/from the engine")]
    CommunicationError,

    /// The engine rejected the request type as unsupported.
    #[error("engine does not support this type of request, consider updating the engine")]
    UnsupportedRequest,

    /// The engine answered with an unexpected response shape.
    #[error("unexpected response from the engine, consider updating the engine")]
    MalformedResponse,

    /// Any other negative status code, preserved for diagnostics.
    #[error("engine returned unknown status code {code}, consider updating the engine")]
    UnknownEngineError { code: StatusCode },
}

impl Error {
    /// Translates a negative engine status code into a structured error.
    ///
    /// The known codes follow the errno-derived convention of libcriu-style
    /// engines. Anything unrecognized keeps the raw code.
    pub fn from_status(code: StatusCode) -> Error {
        match code.checked_neg().map(Errno::from_raw) {
            Some(Errno::EBADE) => Error::RpcFailure,
            Some(Errno::ECONNREFUSED) => Error::ConnectionRefused,
            Some(Errno::ECOMM) => Error::CommunicationError,
            Some(Errno::EINVAL) => Error::UnsupportedRequest,
            Some(Errno::EBADMSG) => Error::MalformedResponse,
            _ => Error::UnknownEngineError { code },
        }
    }

    /// The underlying numeric engine code, for errors that carry one.
    pub fn engine_code(&self) -> Option<StatusCode> {
        match self {
            Error::RpcFailure => Some(-(Errno::EBADE as i32)),
            Error::ConnectionRefused => Some(-(Errno::ECONNREFUSED as i32)),
            Error::CommunicationError => Some(-(Errno::ECOMM as i32)),
            Error::UnsupportedRequest => Some(-(Errno::EINVAL as i32)),
            Error::MalformedResponse => Some(-(Errno::EBADMSG as i32)),
            Error::UnknownEngineError { code } => Some(*code),
            _ => None,
        }
    }
}

/// Passes non-negative status codes through and translates negative ones.
pub fn status_to_result(code: StatusCode) -> Result<StatusCode> {
    if code < 0 {
        Err(Error::from_status(code))
    } else {
        Ok(code)
    }
}
