//! Stateful FTP client covering the subset the recorder needs:
//! login, binary mode, CWD, LIST, RETR, STOR and rename, all over PASV.

use async_trait::async_trait;
use lazy_static::lazy_static;
use log::{debug, info};
use regex::Regex;
use std::net::{IpAddr, SocketAddr};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::error::{FtpError, FtpResult};
use super::parser::{parse_listing, FtpEntry};
use super::protocol::FtpCodec;
use super::FileTransfer;

lazy_static! {
    static ref PASV_REPLY: Regex =
        Regex::new(r"\((\d+),(\d+),(\d+),(\d+),(\d+),(\d+)\)").expect("valid PASV regex");
}

pub struct FtpClient {
    codec: FtpCodec,
    host: String,
}

impl FtpClient {
    /// Open the control connection and read the greeting
    pub async fn connect(host: &str, port: u16) -> FtpResult<Self> {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| FtpError::connection_failed(format!("{}:{}: {}", host, port, e)))?;
        let mut codec = FtpCodec::from_tcp(stream);
        let greeting = codec.read_response().await?;
        if !greeting.is_success() {
            return Err(FtpError::connection_failed(format!(
                "Unexpected greeting: {}",
                greeting.text()
            ))
            .with_code(greeting.code));
        }
        debug!("ftp: connected to {}:{}", host, port);
        Ok(Self {
            codec,
            host: host.to_string(),
        })
    }

    pub async fn login(&mut self, user: &str, password: &str) -> FtpResult<()> {
        let resp = self.codec.execute(&format!("USER {}", user)).await?;
        let resp = if resp.is_intermediate() {
            self.codec.execute(&format!("PASS {}", password)).await?
        } else {
            resp
        };
        if !resp.is_success() {
            return Err(FtpError::auth_failed(resp.text()).with_code(resp.code));
        }
        info!("ftp: logged in to {} as {}", self.host, user);
        Ok(())
    }

    pub async fn set_binary(&mut self) -> FtpResult<()> {
        self.codec.expect_ok("TYPE I").await.map(|_| ())
    }

    /// Issue PASV and connect to the announced data port
    async fn open_pasv(&mut self) -> FtpResult<TcpStream> {
        let resp = self.codec.expect_ok("PASV").await?;
        let mut addr = parse_pasv_response(&resp.text())?;
        // Some servers announce 0.0.0.0 or a NAT-internal address
        if addr.ip().is_unspecified() {
            if let Ok(ip) = self.host.parse::<IpAddr>() {
                addr.set_ip(ip);
            }
        }
        TcpStream::connect(addr)
            .await
            .map_err(|e| FtpError::data_channel(format!("PASV data connect {}: {}", addr, e)))
    }

    /// Send a data command and require a preliminary reply
    async fn start_transfer(&mut self, cmd: &str) -> FtpResult<()> {
        let resp = self.codec.execute(cmd).await?;
        if !resp.is_preliminary() && !resp.is_success() {
            return Err(FtpError::from_reply(resp.code, &resp.text()));
        }
        Ok(())
    }

    /// Read the final reply after the data connection was closed
    async fn finish_transfer(&mut self) -> FtpResult<()> {
        let resp = self.codec.read_response().await?;
        if !resp.is_success() {
            return Err(FtpError::transfer_failed(resp.text()).with_code(resp.code));
        }
        Ok(())
    }

    async fn read_data(&mut self, cmd: &str) -> FtpResult<Vec<u8>> {
        let mut data = self.open_pasv().await?;
        self.start_transfer(cmd).await?;
        let mut buf = Vec::new();
        data.read_to_end(&mut buf)
            .await
            .map_err(|e| FtpError::transfer_failed(format!("{}: {}", cmd, e)))?;
        drop(data);
        self.finish_transfer().await?;
        Ok(buf)
    }
}

#[async_trait]
impl FileTransfer for FtpClient {
    async fn cwd(&mut self, path: &str) -> FtpResult<()> {
        self.codec.expect_ok(&format!("CWD {}", path)).await.map(|_| ())
    }

    async fn list(&mut self) -> FtpResult<Vec<FtpEntry>> {
        let raw = self.read_data("LIST").await?;
        Ok(parse_listing(&String::from_utf8_lossy(&raw)))
    }

    async fn retrieve(&mut self, name: &str) -> FtpResult<Vec<u8>> {
        self.read_data(&format!("RETR {}", name)).await
    }

    async fn store(&mut self, name: &str, data: &[u8]) -> FtpResult<()> {
        let mut stream = self.open_pasv().await?;
        self.start_transfer(&format!("STOR {}", name)).await?;
        stream
            .write_all(data)
            .await
            .map_err(|e| FtpError::transfer_failed(format!("STOR {}: {}", name, e)))?;
        stream
            .shutdown()
            .await
            .map_err(|e| FtpError::transfer_failed(format!("STOR {}: {}", name, e)))?;
        drop(stream);
        self.finish_transfer().await
    }

    async fn rename(&mut self, from: &str, to: &str) -> FtpResult<()> {
        let resp = self.codec.execute(&format!("RNFR {}", from)).await?;
        if !resp.is_intermediate() {
            return Err(FtpError::from_reply(resp.code, &resp.text()));
        }
        self.codec.expect_ok(&format!("RNTO {}", to)).await.map(|_| ())
    }

    async fn quit(&mut self) -> FtpResult<()> {
        self.codec.execute("QUIT").await.map(|_| ())
    }
}

/// Parse `(h1,h2,h3,h4,p1,p2)` from a 227 reply
pub(crate) fn parse_pasv_response(text: &str) -> FtpResult<SocketAddr> {
    let caps = PASV_REPLY
        .captures(text)
        .ok_or_else(|| FtpError::protocol_error(format!("Cannot parse PASV: {}", text)))?;

    let nums: Vec<u8> = (1..=6)
        .map(|i| {
            caps[i]
                .parse::<u8>()
                .map_err(|_| FtpError::protocol_error("PASV number out of range"))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let ip = IpAddr::from([nums[0], nums[1], nums[2], nums[3]]);
    let port = u16::from(nums[4]) * 256 + u16::from(nums[5]);
    Ok(SocketAddr::new(ip, port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;

    #[test]
    fn parses_pasv_reply() {
        let addr = parse_pasv_response("Entering Passive Mode (192,168,1,20,195,80)").unwrap();
        assert_eq!(addr, "192.168.1.20:50000".parse().unwrap());
        assert!(parse_pasv_response("Entering Passive Mode").is_err());
        assert!(parse_pasv_response("(300,1,1,1,1,1)").is_err());
    }

    /// Minimal scripted server: answers the control commands the client
    /// sends and serves one LIST and one RETR over passive connections.
    async fn scripted_server(listener: TcpListener) {
        let (control, _) = listener.accept().await.unwrap();
        let (rd, mut wr) = control.into_split();
        let mut lines = BufReader::new(rd).lines();
        wr.write_all(b"220 recorder ready\r\n").await.unwrap();

        let mut data_listener: Option<TcpListener> = None;
        while let Some(line) = lines.next_line().await.unwrap() {
            let reply: Vec<u8> = match line.as_str() {
                "USER humaxftp" => b"331 password please\r\n".to_vec(),
                "PASS 0000" => b"230 welcome\r\n".to_vec(),
                "TYPE I" => b"200 binary\r\n".to_vec(),
                "CWD /My Video" => b"250 ok\r\n".to_vec(),
                "PASV" => {
                    let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
                    let port = l.local_addr().unwrap().port();
                    data_listener = Some(l);
                    format!(
                        "227 Entering Passive Mode (127,0,0,1,{},{})\r\n",
                        port / 256,
                        port % 256
                    )
                    .into_bytes()
                }
                "LIST" | "RETR News.hmt" => {
                    let body: &[u8] = if line == "LIST" {
                        b"-rw-r--r-- 1 0 0 8192 Jan  5 21:00 News.hmt\r\n"
                    } else {
                        b"descriptor"
                    };
                    wr.write_all(b"150 opening\r\n").await.unwrap();
                    let listener = data_listener.take().unwrap();
                    let (mut data, _) = listener.accept().await.unwrap();
                    data.write_all(body).await.unwrap();
                    drop(data);
                    b"226 done\r\n".to_vec()
                }
                "QUIT" => {
                    wr.write_all(b"221 bye\r\n").await.unwrap();
                    break;
                }
                _ => b"502 not implemented\r\n".to_vec(),
            };
            wr.write_all(&reply).await.unwrap();
        }
    }

    #[tokio::test]
    async fn talks_to_a_scripted_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(scripted_server(listener));

        let mut client = FtpClient::connect("127.0.0.1", port).await.unwrap();
        client.login("humaxftp", "0000").await.unwrap();
        client.set_binary().await.unwrap();
        client.cwd("/My Video").await.unwrap();

        let entries = client.list().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "News.hmt");
        assert_eq!(client.retrieve("News.hmt").await.unwrap(), b"descriptor".to_vec());

        let err = client.rename("a", "b").await.unwrap_err();
        assert_eq!(err.code, Some(502));

        client.quit().await.unwrap();
        server.await.unwrap();
    }
}
