//! Sidecar recording descriptor (`.hmt`) codec
//!
//! The descriptor is a fixed-size binary blob read at hard-coded offsets.
//! Decoding never fails: offsets past the end of a short buffer read as
//! empty strings and zeros. The decoded [`Descriptor`] keeps a private copy
//! of the bytes; [`Descriptor::clear_lock`] returns a mutated full-size copy
//! and leaves that copy untouched.

mod fields;
mod text;

use chrono::{DateTime, Utc};
use serde::Serialize;

pub use fields::{Genre, RecordingState};
use text::{read_plain, read_text, read_u32_le, read_u8};

/// Total size of a descriptor file
pub const DESCRIPTOR_SIZE: usize = 8192;

pub(crate) const DIRECTORY: (usize, usize) = (0x080, 255);
pub(crate) const FILE_NAME: (usize, usize) = (0x17F, 255);
pub(crate) const START_TIME: usize = 0x280;
pub(crate) const END_TIME: usize = 0x284;
/// Nominal duration in seconds as written by the device. Not reliable.
pub(crate) const DURATION: usize = 0x288;
pub(crate) const RECORDING_STATE: usize = 0x28C;
pub(crate) const LOCK_FLAG: usize = 0x28E;
pub(crate) const RECORDING_TITLE: (usize, usize) = (0x29A, 256);
pub(crate) const GUIDANCE: (usize, usize) = (0x3C3, 154);
pub(crate) const CHANNEL_NAME: (usize, usize) = (0x45F, 64);
pub(crate) const HD_FLAG: usize = 0x4BC;
pub(crate) const GENRE: usize = 0x4BD;
pub(crate) const PROGRAM_TITLE: (usize, usize) = (0x516, 256);
pub(crate) const SYNOPSIS: (usize, usize) = (0x616, 512);

/// Lock byte value meaning "free to copy"; anything else is locked
pub const UNLOCKED: u8 = 0x04;
/// HD flag value meaning high definition
pub const HIGH_DEFINITION: u8 = 0x02;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Descriptor {
    pub directory: String,
    pub file_name: String,
    pub recording_title: String,
    pub guidance: String,
    pub channel_name: String,
    pub program_title: String,
    pub synopsis: String,
    /// Device seconds-since-epoch, not normalised to UTC
    pub start: u32,
    pub end: u32,
    /// As stored by the device; prefer `end - start`
    pub duration: u32,
    pub hd: bool,
    pub locked: bool,
    pub state: RecordingState,
    pub genre: Genre,
    #[serde(skip)]
    raw: Vec<u8>,
}

impl Descriptor {
    pub fn decode(bytes: &[u8]) -> Self {
        Descriptor {
            directory: read_plain(bytes, DIRECTORY.0, DIRECTORY.1),
            file_name: read_plain(bytes, FILE_NAME.0, FILE_NAME.1),
            recording_title: read_text(bytes, RECORDING_TITLE.0, RECORDING_TITLE.1),
            guidance: read_text(bytes, GUIDANCE.0, GUIDANCE.1),
            channel_name: read_text(bytes, CHANNEL_NAME.0, CHANNEL_NAME.1),
            program_title: read_text(bytes, PROGRAM_TITLE.0, PROGRAM_TITLE.1),
            synopsis: read_text(bytes, SYNOPSIS.0, SYNOPSIS.1),
            start: read_u32_le(bytes, START_TIME),
            end: read_u32_le(bytes, END_TIME),
            duration: read_u32_le(bytes, DURATION),
            hd: read_u8(bytes, HD_FLAG) == HIGH_DEFINITION,
            // A missing lock byte reads as zero and therefore as locked
            locked: read_u8(bytes, LOCK_FLAG) != UNLOCKED,
            state: RecordingState::from_byte(read_u8(bytes, RECORDING_STATE)),
            genre: Genre::from_code(read_u8(bytes, GENRE)),
            raw: bytes.to_vec(),
        }
    }

    /// The bytes this descriptor was decoded from
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Full-size copy of the descriptor with the lock byte cleared.
    /// Short input is zero-padded to [`DESCRIPTOR_SIZE`].
    pub fn clear_lock(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; DESCRIPTOR_SIZE.max(self.raw.len())];
        bytes[..self.raw.len()].copy_from_slice(&self.raw);
        bytes[LOCK_FLAG] = UNLOCKED;
        bytes
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(i64::from(self.start), 0)
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(i64::from(self.end), 0)
    }

    /// Recording length from the start/end stamps, falling back to the
    /// stored duration when the stamps are missing or inverted
    pub fn actual_duration(&self) -> u32 {
        if self.end > self.start && self.start > 0 {
            self.end - self.start
        } else {
            self.duration
        }
    }
}

/// Decode a descriptor blob
pub fn decode(bytes: &[u8]) -> Descriptor {
    Descriptor::decode(bytes)
}

/// Copy of the descriptor bytes with the lock removed
pub fn clear_lock(descriptor: &Descriptor) -> Vec<u8> {
    descriptor.clear_lock()
}
