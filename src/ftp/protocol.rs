//! Control-channel codec: commands out, (multi-line) replies in

use log::trace;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use super::error::{FtpError, FtpResult};

#[derive(Debug, Clone)]
pub struct FtpResponse {
    pub code: u16,
    pub lines: Vec<String>,
}

impl FtpResponse {
    /// Reply text without the code prefix, lines joined
    pub fn text(&self) -> String {
        self.lines
            .iter()
            .map(|l| l.get(4..).unwrap_or(""))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn is_preliminary(&self) -> bool {
        (100..200).contains(&self.code)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    pub fn is_intermediate(&self) -> bool {
        (300..400).contains(&self.code)
    }
}

pub struct FtpCodec {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl FtpCodec {
    pub fn from_tcp(stream: TcpStream) -> Self {
        let (rd, wr) = stream.into_split();
        Self {
            reader: BufReader::new(rd),
            writer: wr,
        }
    }

    /// Send a command; CRLF is appended here
    pub async fn send_command(&mut self, cmd: &str) -> FtpResult<()> {
        let line = format!("{}\r\n", cmd);
        self.writer.write_all(line.as_bytes()).await?;
        if cmd.starts_with("PASS ") {
            trace!("ftp >>> PASS ****");
        } else {
            trace!("ftp >>> {}", cmd);
        }
        Ok(())
    }

    async fn read_line_raw(&mut self) -> FtpResult<String> {
        let mut buf = String::new();
        let n = self.reader.read_line(&mut buf).await?;
        if n == 0 {
            return Err(FtpError::disconnected("Server closed connection"));
        }
        Ok(buf.trim_end_matches(|c| c == '\r' || c == '\n').to_string())
    }

    /// Read one reply. `NNN-` opens a multi-line reply that ends at `NNN `.
    pub async fn read_response(&mut self) -> FtpResult<FtpResponse> {
        let first = self.read_line_raw().await?;
        let code = parse_code(&first)?;
        let mut lines = vec![first.clone()];

        if first.as_bytes().get(3) == Some(&b'-') {
            let terminator = format!("{} ", code);
            loop {
                let next = self.read_line_raw().await?;
                let done = next.starts_with(&terminator);
                lines.push(next);
                if done {
                    break;
                }
            }
        }

        trace!("ftp <<< {}", lines.last().map(String::as_str).unwrap_or(""));
        Ok(FtpResponse { code, lines })
    }

    pub async fn execute(&mut self, cmd: &str) -> FtpResult<FtpResponse> {
        self.send_command(cmd).await?;
        self.read_response().await
    }

    /// Send a command and require a 2xx reply
    pub async fn expect_ok(&mut self, cmd: &str) -> FtpResult<FtpResponse> {
        let resp = self.execute(cmd).await?;
        if !resp.is_success() {
            return Err(FtpError::from_reply(resp.code, &resp.text()));
        }
        Ok(resp)
    }
}

/// Parse the 3-digit reply code from the start of a line
pub(crate) fn parse_code(line: &str) -> FtpResult<u16> {
    line.get(..3)
        .and_then(|c| c.parse::<u16>().ok())
        .ok_or_else(|| FtpError::protocol_error(format!("Invalid reply: '{}'", line)))
}
