//! SSDP M-SEARCH over UDP multicast

use log::{debug, trace};
use std::collections::HashSet;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{timeout_at, Instant};

const MULTICAST_ADDR: &str = "239.255.255.250:1900";
pub const MEDIA_SERVER: &str = "urn:schemas-upnp-org:device:MediaServer:1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SsdpResponse {
    pub location: String,
    pub server: Option<String>,
    pub usn: Option<String>,
}

pub fn search_request(target: &str, mx: u64) -> String {
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: {}\r\n\
         MAN: \"ssdp:discover\"\r\n\
         MX: {}\r\n\
         ST: {}\r\n\r\n",
        MULTICAST_ADDR, mx, target
    )
}

/// Parse a unicast search response; None when it is not a 200 with LOCATION
pub fn parse_response(text: &str) -> Option<SsdpResponse> {
    let mut lines = text.lines();
    let status = lines.next()?;
    if !status.starts_with("HTTP/") || !status.contains(" 200") {
        return None;
    }

    let mut location = None;
    let mut server = None;
    let mut usn = None;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().to_string();
        match name.trim().to_ascii_lowercase().as_str() {
            "location" => location = Some(value),
            "server" => server = Some(value),
            "usn" => usn = Some(value),
            _ => {}
        }
    }

    Some(SsdpResponse {
        location: location.filter(|l| !l.is_empty())?,
        server,
        usn,
    })
}

/// Send one search and collect distinct responders until `window` elapses
pub async fn search(target: &str, window: Duration) -> Result<Vec<SsdpResponse>, String> {
    let socket = UdpSocket::bind("0.0.0.0:0")
        .await
        .map_err(|e| format!("Failed to bind SSDP socket: {}", e))?;
    let request = search_request(target, window.as_secs().clamp(1, 5));
    socket
        .send_to(request.as_bytes(), MULTICAST_ADDR)
        .await
        .map_err(|e| format!("Failed to send SSDP search: {}", e))?;
    debug!("discovery: M-SEARCH sent for {}", target);

    let deadline = Instant::now() + window;
    let mut seen = HashSet::new();
    let mut found = Vec::new();
    let mut buf = [0u8; 2048];
    loop {
        let received = match timeout_at(deadline, socket.recv_from(&mut buf)).await {
            Ok(received) => received,
            Err(_) => break,
        };
        let (len, from) = received.map_err(|e| format!("Failed to read SSDP reply: {}", e))?;
        let text = String::from_utf8_lossy(&buf[..len]);
        trace!("discovery: SSDP reply from {}:\n{}", from, text);
        if let Some(response) = parse_response(&text) {
            if seen.insert(response.location.clone()) {
                found.push(response);
            }
        }
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_names_target_and_wait() {
        let req = search_request(MEDIA_SERVER, 3);
        assert!(req.starts_with("M-SEARCH * HTTP/1.1\r\n"));
        assert!(req.contains("MAN: \"ssdp:discover\"\r\n"));
        assert!(req.contains("MX: 3\r\n"));
        assert!(req.contains(&format!("ST: {}\r\n", MEDIA_SERVER)));
        assert!(req.ends_with("\r\n\r\n"));
    }

    #[test]
    fn parses_location_case_insensitively() {
        let reply = "HTTP/1.1 200 OK\r\n\
                     CACHE-CONTROL: max-age=1800\r\n\
                     location: http://192.168.1.20:50001/description.xml\r\n\
                     SERVER: Linux/2.6 UPnP/1.0 HUMAX/1.0\r\n\
                     USN: uuid:1234::urn:schemas-upnp-org:device:MediaServer:1\r\n\r\n";
        let parsed = parse_response(reply).unwrap();
        assert_eq!(parsed.location, "http://192.168.1.20:50001/description.xml");
        assert_eq!(parsed.server.as_deref(), Some("Linux/2.6 UPnP/1.0 HUMAX/1.0"));
        assert!(parsed.usn.unwrap().starts_with("uuid:1234"));
    }

    #[test]
    fn ignores_notifications_and_missing_location() {
        assert!(parse_response("NOTIFY * HTTP/1.1\r\nLOCATION: http://x/\r\n").is_none());
        assert!(parse_response("HTTP/1.1 200 OK\r\nSERVER: x\r\n").is_none());
        assert!(parse_response("").is_none());
    }
}
