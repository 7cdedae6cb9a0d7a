//! LIST response parser (Unix `ls -l` and DOS/IIS styles)

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FtpEntryKind {
    File,
    Directory,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FtpEntry {
    pub name: String,
    pub kind: FtpEntryKind,
    pub size: u64,
}

impl FtpEntry {
    pub fn is_dir(&self) -> bool {
        self.kind == FtpEntryKind::Directory
    }
}

lazy_static! {
    /// `drwxr-xr-x 2 user group 4096 Jan  1 12:00 name`
    static ref UNIX_LINE: Regex = Regex::new(
        r"(?x)
        ^([dlcbps-])[rwxsStT-]{9}\S*\s+  # type + permissions
        \d+\s+                           # link count
        \S+\s+                           # owner
        (?:\S+\s+)?                      # group, missing on some servers
        (\d+)\s+                         # size
        \w{3}\s+\d{1,2}\s+[\d:]+\s       # date
        (.+)$                            # name, possibly `name -> target`
        "
    )
    .expect("valid unix listing regex");

    /// `01-05-24  09:00PM       1234 name` or `<DIR>` in place of the size
    static ref DOS_LINE: Regex = Regex::new(
        r"^\d{2}-\d{2}-\d{2,4}\s+\d{1,2}:\d{2}(?:AM|PM)?\s+(<DIR>|\d+)\s+(.+)$"
    )
    .expect("valid dos listing regex");
}

/// Parse a whole LIST body, skipping `.`, `..`, totals and unknown lines
pub fn parse_listing(raw: &str) -> Vec<FtpEntry> {
    raw.lines()
        .filter_map(|line| parse_line(line.trim_end()))
        .filter(|e| e.name != "." && e.name != "..")
        .collect()
}

fn parse_line(line: &str) -> Option<FtpEntry> {
    if let Some(caps) = UNIX_LINE.captures(line) {
        let kind = match &caps[1] {
            "d" => FtpEntryKind::Directory,
            "-" => FtpEntryKind::File,
            _ => FtpEntryKind::Other,
        };
        let name = match caps[3].find(" -> ") {
            Some(pos) => caps[3][..pos].to_string(),
            None => caps[3].to_string(),
        };
        return Some(FtpEntry {
            name,
            kind,
            size: caps[2].parse().unwrap_or(0),
        });
    }

    if let Some(caps) = DOS_LINE.captures(line) {
        let (kind, size) = if &caps[1] == "<DIR>" {
            (FtpEntryKind::Directory, 0)
        } else {
            (FtpEntryKind::File, caps[1].parse().unwrap_or(0))
        };
        return Some(FtpEntry {
            name: caps[2].to_string(),
            kind,
            size,
        });
    }

    None
}
