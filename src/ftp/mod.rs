//! The FTP subset the recorder speaks: login, CWD, LIST, RETR, STOR and
//! rename over passive data connections.

mod client;
mod error;
mod parser;
mod protocol;

pub use client::FtpClient;
pub use error::{FtpError, FtpErrorKind, FtpResult};
pub use parser::{parse_listing, FtpEntry, FtpEntryKind};

use async_trait::async_trait;

/// File operations the transfer scanner and lock removal rely on.
/// Implemented by [`FtpClient`]; tests substitute an in-memory device.
#[async_trait]
pub trait FileTransfer: Send {
    async fn cwd(&mut self, path: &str) -> FtpResult<()>;
    /// Entries of the current directory
    async fn list(&mut self) -> FtpResult<Vec<FtpEntry>>;
    async fn retrieve(&mut self, name: &str) -> FtpResult<Vec<u8>>;
    async fn store(&mut self, name: &str, data: &[u8]) -> FtpResult<()>;
    async fn rename(&mut self, from: &str, to: &str) -> FtpResult<()>;
    async fn quit(&mut self) -> FtpResult<()>;
}
