//! ContentDirectory `Browse` (BrowseDirectChildren) and DIDL-Lite parsing

use log::trace;
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;

use super::local_name;

const BROWSE_ACTION: &str = "\"urn:schemas-upnp-org:service:ContentDirectory:1#Browse\"";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DidlContainer {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DidlItem {
    pub id: String,
    pub title: String,
    /// First `res` element: the HTTP transfer URL
    pub url: Option<String>,
    pub size: Option<u64>,
    /// Seconds, from `res@duration`
    pub duration: Option<u32>,
    pub channel: Option<String>,
    pub description: Option<String>,
}

/// One page of a container's children
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrowsePage {
    pub containers: Vec<DidlContainer>,
    pub items: Vec<DidlItem>,
    /// NumberReturned, or the parsed entry count when the device omits it
    pub returned: u32,
    pub total: Option<u32>,
}

pub fn browse_envelope(object_id: &str, start: u32, count: u32) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/" s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/">
<s:Body>
<u:Browse xmlns:u="urn:schemas-upnp-org:service:ContentDirectory:1">
<ObjectID>{}</ObjectID>
<BrowseFlag>BrowseDirectChildren</BrowseFlag>
<Filter>*</Filter>
<StartingIndex>{}</StartingIndex>
<RequestedCount>{}</RequestedCount>
<SortCriteria></SortCriteria>
</u:Browse>
</s:Body>
</s:Envelope>"#,
        escape(object_id),
        start,
        count
    )
}

/// Request `count` children of `object_id` starting at `start`
pub async fn browse(
    client: &Client,
    control_url: &str,
    object_id: &str,
    start: u32,
    count: u32,
) -> Result<BrowsePage, String> {
    let envelope = browse_envelope(object_id, start, count);
    trace!("discovery: Browse {} from {} x{}", object_id, start, count);
    let response = client
        .post(control_url)
        .header(CONTENT_TYPE, "text/xml; charset=\"utf-8\"")
        .header("SOAPAction", BROWSE_ACTION)
        .body(envelope)
        .send()
        .await
        .map_err(|e| format!("Failed to browse {}: {}", object_id, e))?;
    let status = response.status();
    if !status.is_success() {
        return Err(format!("Failed to browse {}: {}", object_id, status));
    }
    let body = response
        .text()
        .await
        .map_err(|e| format!("Failed to read browse reply for {}: {}", object_id, e))?;
    parse_browse_response(&body)
}

/// Pull `Result`, `NumberReturned` and `TotalMatches` out of the SOAP reply
pub fn parse_browse_response(xml: &str) -> Result<BrowsePage, String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut didl = String::new();
    let mut returned: Option<u32> = None;
    let mut total: Option<u32> = None;
    let mut current_tag: Option<String> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => current_tag = Some(local_name(e.name().as_ref())),
            Ok(Event::Text(ref e)) => {
                let text = e
                    .unescape()
                    .map_err(|e| format!("Bad text in browse reply: {}", e))?;
                match current_tag.as_deref() {
                    Some("Result") => didl.push_str(&text),
                    Some("NumberReturned") => returned = text.trim().parse().ok(),
                    Some("TotalMatches") => total = text.trim().parse().ok(),
                    _ => {}
                }
            }
            Ok(Event::CData(ref e)) => {
                if current_tag.as_deref() == Some("Result") {
                    didl.push_str(&String::from_utf8_lossy(e));
                }
            }
            Ok(Event::End(_)) => current_tag = None,
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("XML parse error: {}", e)),
            _ => {}
        }
        buf.clear();
    }

    let (containers, items) = if didl.trim().is_empty() {
        (Vec::new(), Vec::new())
    } else {
        parse_didl(&didl)?
    };
    let returned = returned.unwrap_or((containers.len() + items.len()) as u32);
    Ok(BrowsePage {
        containers,
        items,
        returned,
        total,
    })
}

fn attribute(e: &BytesStart, name: &str) -> Option<String> {
    e.attributes().flatten().find_map(|attr| {
        if local_name(attr.key.as_ref()) == name {
            attr.unescape_value().ok().map(|v| v.to_string())
        } else {
            None
        }
    })
}

enum Entry {
    Container(DidlContainer),
    Item(DidlItem),
}

/// Parse a DIDL-Lite document into containers and items
pub fn parse_didl(xml: &str) -> Result<(Vec<DidlContainer>, Vec<DidlItem>), String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut containers = Vec::new();
    let mut items = Vec::new();
    let mut current: Option<Entry> = None;
    let mut current_tag: Option<String> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let local = local_name(e.name().as_ref());
                match local.as_str() {
                    "container" => {
                        current = Some(Entry::Container(DidlContainer {
                            id: attribute(e, "id").unwrap_or_default(),
                            ..Default::default()
                        }))
                    }
                    "item" => {
                        current = Some(Entry::Item(DidlItem {
                            id: attribute(e, "id").unwrap_or_default(),
                            ..Default::default()
                        }))
                    }
                    "res" => {
                        // Only the first resource describes the recording itself
                        if let Some(Entry::Item(item)) = current.as_mut() {
                            if item.url.is_none() {
                                item.size = attribute(e, "size").and_then(|s| s.parse().ok());
                                item.duration =
                                    attribute(e, "duration").and_then(|d| parse_duration(&d));
                            }
                        }
                    }
                    _ => {}
                }
                current_tag = Some(local);
            }
            Ok(Event::Text(ref e)) => {
                let text = e.unescape().unwrap_or_default().trim().to_string();
                match (current.as_mut(), current_tag.as_deref()) {
                    (Some(Entry::Container(c)), Some("title")) => c.title = text,
                    (Some(Entry::Item(item)), Some(tag)) => match tag {
                        "title" => item.title = text,
                        "res" if item.url.is_none() => item.url = Some(text),
                        "channelName" => item.channel = Some(text),
                        "description" | "longDescription" if item.description.is_none() => {
                            item.description = Some(text)
                        }
                        _ => {}
                    },
                    _ => {}
                }
            }
            Ok(Event::End(ref e)) => {
                let local = local_name(e.name().as_ref());
                match (local.as_str(), current.take()) {
                    ("container", Some(Entry::Container(c))) => containers.push(c),
                    ("item", Some(Entry::Item(item))) => items.push(item),
                    (_, entry) => current = entry,
                }
                current_tag = None;
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("DIDL parse error: {}", e)),
            _ => {}
        }
        buf.clear();
    }

    Ok((containers, items))
}

/// `H+:MM:SS[.F+]` to whole seconds
pub fn parse_duration(text: &str) -> Option<u32> {
    let whole = text.trim().split('.').next()?;
    let mut parts = whole.split(':');
    let hours: u32 = parts.next()?.parse().ok()?;
    let minutes: u32 = parts.next()?.parse().ok()?;
    let seconds: u32 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || minutes >= 60 || seconds >= 60 {
        return None;
    }
    hours
        .checked_mul(3600)?
        .checked_add(minutes * 60 + seconds)
}
