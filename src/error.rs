//! Error types for wirelab.
//!
//! Per-connection failures (`ProtocolError`, `SessionError`, `RequestError`)
//! end at the connection that produced them. `ConfigError` and `TlsError`
//! are startup failures and abort the process.

use std::path::PathBuf;

use hyper::StatusCode;
use thiserror::Error;

use crate::config::ProtocolType;

/// Malformed or oversized input on an echo connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// More than `max` bytes arrived without a delimiter.
    #[error("frame length {length} exceeds maximum {max}")]
    FrameTooLong { length: usize, max: usize },
}

/// Why an echo session ended abnormally.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
}

/// A request that is answered with an HTTP error status.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("method {0} not allowed")]
    MethodNotAllowed(String),

    #[error("forbidden path")]
    Forbidden,

    #[error("not found")]
    NotFound,

    #[error("internal error: {0}")]
    Internal(String),
}

impl RequestError {
    /// The status this error is reported with.
    pub fn status(&self) -> StatusCode {
        match self {
            RequestError::BadRequest(_) => StatusCode::BAD_REQUEST,
            RequestError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            RequestError::Forbidden => StatusCode::FORBIDDEN,
            RequestError::NotFound => StatusCode::NOT_FOUND,
            RequestError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Failures loading TLS material or completing a handshake.
#[derive(Error, Debug)]
pub enum TlsError {
    #[error("failed to load certificate from '{path}': {message}")]
    CertificateLoad { path: String, message: String },

    #[error("no certificates found in '{0}'")]
    NoCertificates(String),

    #[error("failed to load private key from '{path}': {message}")]
    PrivateKeyLoad { path: String, message: String },

    #[error("no private key found in '{0}'")]
    NoPrivateKey(String),

    #[error("TLS configuration error: {0}")]
    Config(String),

    #[error("TLS handshake failed: {0}")]
    Handshake(String),
}

/// Startup failures. Any of these exits the process.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {source}", path.display())]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{}': {source}", path.display())]
    TomlParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid listen address '{0}'")]
    InvalidAddress(String),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no client available for protocol {0:?}")]
    NoClient(ProtocolType),

    #[error(transparent)]
    Tls(#[from] TlsError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_error_status() {
        assert_eq!(
            RequestError::BadRequest("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            RequestError::MethodNotAllowed("POST".into()).status(),
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(RequestError::Forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(RequestError::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            RequestError::Internal("io".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_frame_too_long_message() {
        let err = ProtocolError::FrameTooLong {
            length: 2049,
            max: 2048,
        };
        assert_eq!(err.to_string(), "frame length 2049 exceeds maximum 2048");
    }
}
