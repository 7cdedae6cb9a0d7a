//! Bounded text fields and their one-byte character set selector

use encoding_rs::{Encoding, UTF_16BE, UTF_8, WINDOWS_1252};

/// Slice of `buf` covering `[offset, offset + max_len)`, clipped to the buffer
pub(crate) fn field(buf: &[u8], offset: usize, max_len: usize) -> &[u8] {
    if offset >= buf.len() {
        return &[];
    }
    let end = offset.saturating_add(max_len).min(buf.len());
    &buf[offset..end]
}

pub(crate) fn read_u8(buf: &[u8], offset: usize) -> u8 {
    buf.get(offset).copied().unwrap_or(0)
}

/// Little-endian u32, zero when the buffer ends before the field does
pub(crate) fn read_u32_le(buf: &[u8], offset: usize) -> u32 {
    match field(buf, offset, 4) {
        [a, b, c, d] => u32::from_le_bytes([*a, *b, *c, *d]),
        _ => 0,
    }
}

fn until_nul(bytes: &[u8]) -> &[u8] {
    match bytes.iter().position(|b| *b == 0) {
        Some(end) => &bytes[..end],
        None => bytes,
    }
}

/// UTF-16 text ends at the first aligned zero code unit
fn until_wide_nul(bytes: &[u8]) -> &[u8] {
    let mut end = bytes.len() - bytes.len() % 2;
    for (i, pair) in bytes.chunks_exact(2).enumerate() {
        if pair[0] == 0 && pair[1] == 0 {
            end = i * 2;
            break;
        }
    }
    &bytes[..end]
}

/// Filesystem names are stored without a selector
pub(crate) fn read_plain(buf: &[u8], offset: usize, max_len: usize) -> String {
    String::from_utf8_lossy(until_nul(field(buf, offset, max_len))).into_owned()
}

fn iso_8859(part: u8) -> Option<&'static Encoding> {
    Encoding::for_label(format!("iso-8859-{}", part).as_bytes())
}

/// Pick the encoding announced by the leading selector byte.
/// Returns the encoding and the number of selector bytes to skip.
fn select_charset(bytes: &[u8]) -> (&'static Encoding, usize) {
    match bytes.first().copied() {
        // 0x01..0x05 select ISO-8859-5 through ISO-8859-9
        Some(sel @ 0x01..=0x05) => (iso_8859(sel + 4).unwrap_or(WINDOWS_1252), 1),
        Some(0x10) => match bytes.get(2).copied() {
            Some(part) if bytes.len() >= 3 => (iso_8859(part).unwrap_or(WINDOWS_1252), 3),
            _ => (WINDOWS_1252, bytes.len().min(3)),
        },
        Some(0x11) => (UTF_16BE, 1),
        Some(0x15) => (UTF_8, 1),
        // Unknown selector: skip it and use the default table
        Some(sel) if sel < 0x20 => (WINDOWS_1252, 1),
        _ => (WINDOWS_1252, 0),
    }
}

/// Read a selector-prefixed text field, stopping at the first NUL or at the
/// field boundary, whichever comes first.
pub(crate) fn read_text(buf: &[u8], offset: usize, max_len: usize) -> String {
    let raw = field(buf, offset, max_len);
    let (encoding, skip) = select_charset(raw);
    let body = &raw[skip.min(raw.len())..];
    let body = if encoding == UTF_16BE {
        until_wide_nul(body)
    } else {
        until_nul(body)
    };
    let (text, _) = encoding.decode_without_bom_handling(body);
    text.trim_end().to_string()
}
