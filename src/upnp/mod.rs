//! The UPnP subset used for discovery: SSDP search, the device description
//! and ContentDirectory browsing.

pub mod browse;
pub mod description;
pub mod ssdp;

pub use browse::{BrowsePage, DidlContainer, DidlItem};
pub use description::DeviceDescription;

/// Extract the local name from a possibly-namespaced XML tag
pub(crate) fn local_name(raw: &[u8]) -> String {
    let s = String::from_utf8_lossy(raw);
    match s.rfind(':') {
        Some(pos) => s[pos + 1..].to_string(),
        None => s.to_string(),
    }
}
