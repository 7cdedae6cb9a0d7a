//! Device description: friendly name and the ContentDirectory control URL

use log::debug;
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::Client;
use url::Url;

use super::local_name;

const CONTENT_DIRECTORY: &str = "ContentDirectory";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescription {
    pub friendly_name: String,
    /// Absolute ContentDirectory control URL, when the device offers one
    pub control_url: Option<String>,
}

pub async fn fetch(client: &Client, location: &str) -> Result<DeviceDescription, String> {
    let response = client
        .get(location)
        .send()
        .await
        .map_err(|e| format!("Failed to fetch description {}: {}", location, e))?;
    if !response.status().is_success() {
        return Err(format!(
            "Failed to fetch description {}: {}",
            location,
            response.status()
        ));
    }
    let body = response
        .text()
        .await
        .map_err(|e| format!("Failed to read description {}: {}", location, e))?;
    let description = parse_description(&body, location)?;
    debug!(
        "discovery: {} is {:?}",
        location, description.friendly_name
    );
    Ok(description)
}

/// Parse a description document fetched from `location`. Relative control
/// URLs resolve against `URLBase` when present, else against `location`.
pub fn parse_description(xml: &str, location: &str) -> Result<DeviceDescription, String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut friendly_name: Option<String> = None;
    let mut url_base: Option<String> = None;
    let mut control: Option<String> = None;
    let mut service_type = String::new();
    let mut service_control = String::new();
    let mut current_tag: Option<String> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let local = local_name(e.name().as_ref());
                if local == "service" {
                    service_type.clear();
                    service_control.clear();
                }
                current_tag = Some(local);
            }
            Ok(Event::Text(ref e)) => {
                let text = e.unescape().unwrap_or_default().to_string();
                match current_tag.as_deref() {
                    Some("friendlyName") if friendly_name.is_none() => {
                        friendly_name = Some(text)
                    }
                    Some("URLBase") => url_base = Some(text),
                    Some("serviceType") => service_type = text,
                    Some("controlURL") => service_control = text,
                    _ => {}
                }
            }
            Ok(Event::End(ref e)) => {
                let local = local_name(e.name().as_ref());
                if local == "service"
                    && control.is_none()
                    && service_type.contains(CONTENT_DIRECTORY)
                    && !service_control.is_empty()
                {
                    control = Some(service_control.clone());
                }
                current_tag = None;
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("XML parse error: {}", e)),
            _ => {}
        }
        buf.clear();
    }

    let friendly_name =
        friendly_name.ok_or_else(|| format!("No friendlyName in description at {}", location))?;
    let base = Url::parse(url_base.as_deref().unwrap_or(location))
        .map_err(|e| format!("Invalid description URL {}: {}", location, e))?;
    let control_url = match control {
        Some(relative) => Some(
            base.join(&relative)
                .map_err(|e| format!("Invalid control URL {}: {}", relative, e))?
                .to_string(),
        ),
        None => None,
    };

    Ok(DeviceDescription {
        friendly_name,
        control_url,
    })
}

/// Host part of a description URL
pub fn host_of(location: &str) -> Option<String> {
    Url::parse(location)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
}
