//! FTP-specific error type

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Serialize)]
pub struct FtpError {
    pub kind: FtpErrorKind,
    pub message: String,
    /// Reply code that triggered the error, if any
    pub code: Option<u16>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum FtpErrorKind {
    /// TCP connect or greeting failure
    ConnectionFailed,
    /// Wrong username/password
    AuthFailed,
    /// Server returned a 4xx/5xx for a command
    CommandRejected,
    /// File or directory not found on the server
    NotFound,
    /// Passive data connection could not be established
    DataChannelFailed,
    /// Transfer aborted or incomplete
    TransferFailed,
    /// Server sent an unparseable reply
    ProtocolError,
    /// Control connection dropped
    Disconnected,
    IoError,
}

pub type FtpResult<T> = Result<T, FtpError>;

impl FtpError {
    pub fn new(kind: FtpErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: u16) -> Self {
        self.code = Some(code);
        self
    }

    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::ConnectionFailed, msg)
    }

    pub fn auth_failed(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::AuthFailed, msg)
    }

    pub fn data_channel(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::DataChannelFailed, msg)
    }

    pub fn transfer_failed(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::TransferFailed, msg)
    }

    pub fn protocol_error(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::ProtocolError, msg)
    }

    pub fn disconnected(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::Disconnected, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::NotFound, msg)
    }

    /// Map a negative reply to an error kind
    pub fn from_reply(code: u16, text: &str) -> Self {
        let kind = match code {
            421 => FtpErrorKind::Disconnected,
            425 | 426 => FtpErrorKind::DataChannelFailed,
            530 | 532 => FtpErrorKind::AuthFailed,
            450 | 550 => FtpErrorKind::NotFound,
            _ => FtpErrorKind::CommandRejected,
        };
        Self::new(kind, text.to_string()).with_code(code)
    }

    /// Errors after which the control connection cannot be trusted
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self.kind,
            FtpErrorKind::ConnectionFailed
                | FtpErrorKind::AuthFailed
                | FtpErrorKind::Disconnected
                | FtpErrorKind::ProtocolError
                | FtpErrorKind::IoError
        )
    }
}

impl fmt::Display for FtpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "[{:?} {}] {}", self.kind, code, self.message),
            None => write!(f, "[{:?}] {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for FtpError {}

impl From<std::io::Error> for FtpError {
    fn from(e: std::io::Error) -> Self {
        Self::new(FtpErrorKind::IoError, e.to_string())
    }
}
