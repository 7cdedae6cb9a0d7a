//! Enumerated descriptor fields: recording state and genre

use serde::Serialize;

/// Outcome of the recording as reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RecordingState {
    ZeroLength,
    Valid,
    Scrambled,
    Failed,
    #[default]
    PowerLoss,
}

impl RecordingState {
    pub fn from_byte(value: u8) -> Self {
        match value {
            0 => RecordingState::ZeroLength,
            2 => RecordingState::Valid,
            3 => RecordingState::Scrambled,
            4 => RecordingState::Failed,
            _ => RecordingState::PowerLoss,
        }
    }
}

impl std::fmt::Display for RecordingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordingState::ZeroLength => write!(f, "zero length"),
            RecordingState::Valid => write!(f, "valid"),
            RecordingState::Scrambled => write!(f, "scrambled"),
            RecordingState::Failed => write!(f, "failed"),
            RecordingState::PowerLoss => write!(f, "power loss"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Genre {
    #[default]
    Unclassified,
    Movie,
    NewsFactual,
    Entertainment,
    Sport,
    Children,
    Education,
    Lifestyle,
    Drama,
}

/// Genre byte -> category. Codes not listed are unclassified.
const GENRE_TABLE: [(u8, Genre); 11] = [
    (0x10, Genre::Movie),
    (0x20, Genre::NewsFactual),
    (0x30, Genre::Entertainment),
    (0x40, Genre::Sport),
    (0x50, Genre::Children),
    (0x60, Genre::Entertainment),
    (0x70, Genre::NewsFactual),
    (0x80, Genre::NewsFactual),
    (0x90, Genre::Education),
    (0xA0, Genre::Lifestyle),
    (0xF0, Genre::Drama),
];

impl Genre {
    pub fn from_code(code: u8) -> Self {
        GENRE_TABLE
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, genre)| *genre)
            .unwrap_or(Genre::Unclassified)
    }
}

impl std::fmt::Display for Genre {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Genre::Unclassified => write!(f, "Unclassified"),
            Genre::Movie => write!(f, "Movie"),
            Genre::NewsFactual => write!(f, "News & Factual"),
            Genre::Entertainment => write!(f, "Entertainment"),
            Genre::Sport => write!(f, "Sport"),
            Genre::Children => write!(f, "Children"),
            Genre::Education => write!(f, "Education"),
            Genre::Lifestyle => write!(f, "Lifestyle"),
            Genre::Drama => write!(f, "Drama"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_state_defaults_to_power_loss() {
        assert_eq!(RecordingState::from_byte(0), RecordingState::ZeroLength);
        assert_eq!(RecordingState::from_byte(1), RecordingState::PowerLoss);
        assert_eq!(RecordingState::from_byte(2), RecordingState::Valid);
        assert_eq!(RecordingState::from_byte(3), RecordingState::Scrambled);
        assert_eq!(RecordingState::from_byte(4), RecordingState::Failed);
        assert_eq!(RecordingState::from_byte(0xFF), RecordingState::PowerLoss);
    }

    #[test]
    fn genre_lookup_falls_back_to_unclassified() {
        assert_eq!(Genre::from_code(0x10), Genre::Movie);
        assert_eq!(Genre::from_code(0x60), Genre::Entertainment);
        assert_eq!(Genre::from_code(0xF0), Genre::Drama);
        assert_eq!(Genre::from_code(0x11), Genre::Unclassified);
        assert_eq!(Genre::from_code(0x00), Genre::Unclassified);
    }
}
