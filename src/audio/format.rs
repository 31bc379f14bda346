//! Claimed audio formats and how each one gets decoded.

use std::fmt;

/// Which decode path a format takes through the normalizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeRoute {
    /// The primary decoder reads it as-is; no fallback is attempted.
    Direct,
    /// Needs the external transcoder first, with the streaming decoder as fallback.
    Transcode,
}

/// Audio container / codec format, as claimed by the upload's file extension.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AudioFormat {
    Wav,
    Flac,
    Ogg,
    Webm,
    Mp3,
    M4a,
    Mp4,
    Aac,
    /// Any extension we don't recognise, lower-cased.
    Other(String),
}

impl AudioFormat {
    /// Map a tag (file extension without the dot) to a format.
    ///
    /// Matching is case-insensitive and surrounding whitespace is ignored.
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_lowercase().as_str() {
            "wav" => Self::Wav,
            "flac" => Self::Flac,
            "ogg" => Self::Ogg,
            "webm" => Self::Webm,
            "mp3" => Self::Mp3,
            "m4a" => Self::M4a,
            "mp4" => Self::Mp4,
            "aac" => Self::Aac,
            other => Self::Other(other.to_string()),
        }
    }

    /// Derive the format from an upload filename.
    ///
    /// Returns `None` when there is no filename, or the filename has no
    /// extension to speak of, so the caller can apply its default.
    pub fn from_filename(filename: Option<&str>) -> Option<Self> {
        let (_, extension) = filename?.rsplit_once('.')?;
        if extension.trim().is_empty() {
            return None;
        }
        Some(Self::from_tag(extension))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Wav => "wav",
            Self::Flac => "flac",
            Self::Ogg => "ogg",
            Self::Webm => "webm",
            Self::Mp3 => "mp3",
            Self::M4a => "m4a",
            Self::Mp4 => "mp4",
            Self::Aac => "aac",
            Self::Other(tag) => tag,
        }
    }

    /// Classify into a decode route. Unknown tags take the transcode path.
    pub fn route(&self) -> DecodeRoute {
        match self {
            Self::Wav | Self::Flac | Self::Ogg => DecodeRoute::Direct,
            Self::Webm | Self::Mp3 | Self::M4a | Self::Mp4 | Self::Aac | Self::Other(_) => {
                DecodeRoute::Transcode
            }
        }
    }

    /// The ffmpeg demuxer to force for this format, if any.
    ///
    /// `None` lets ffmpeg probe the input itself.
    pub fn ffmpeg_demuxer(&self) -> Option<&'static str> {
        match self {
            Self::Webm => Some("matroska"),
            Self::Mp3 => Some("mp3"),
            Self::M4a | Self::Mp4 => Some("mov"),
            Self::Aac => Some("aac"),
            Self::Wav => Some("wav"),
            Self::Flac => Some("flac"),
            Self::Ogg => Some("ogg"),
            Self::Other(_) => None,
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("wav", DecodeRoute::Direct)]
    #[case("flac", DecodeRoute::Direct)]
    #[case("OGG", DecodeRoute::Direct)]
    #[case("webm", DecodeRoute::Transcode)]
    #[case("mp3", DecodeRoute::Transcode)]
    #[case("m4a", DecodeRoute::Transcode)]
    #[case("mp4", DecodeRoute::Transcode)]
    #[case("aac", DecodeRoute::Transcode)]
    #[case("opus", DecodeRoute::Transcode)]
    #[case("blob", DecodeRoute::Transcode)]
    fn test_route_classification(#[case] tag: &str, #[case] expected: DecodeRoute) {
        assert_eq!(AudioFormat::from_tag(tag).route(), expected);
    }

    #[rstest]
    #[case(Some("voice.webm"), Some(AudioFormat::Webm))]
    #[case(Some("Voice.WAV"), Some(AudioFormat::Wav))]
    #[case(Some("archive.tar.mp3"), Some(AudioFormat::Mp3))]
    #[case(Some("voice"), None)]
    #[case(Some("voice."), None)]
    #[case(None, None)]
    fn test_from_filename(#[case] filename: Option<&str>, #[case] expected: Option<AudioFormat>) {
        assert_eq!(AudioFormat::from_filename(filename), expected);
    }

    #[test]
    fn test_unknown_tag_is_preserved_lowercase() {
        let format = AudioFormat::from_tag("CAF");
        assert_eq!(format, AudioFormat::Other("caf".to_string()));
        assert_eq!(format.to_string(), "caf");
        assert_eq!(format.ffmpeg_demuxer(), None);
    }
}
