use std::fmt;

/// Container/codec of an encoded audio payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioFormat {
    Mp3,
    Wav,
    Ogg,
    Webm,
    Unknown,
}

impl AudioFormat {
    /// Map a MIME type such as `audio/webm;codecs=opus` to a format.
    pub fn from_mime(mime: &str) -> Self {
        let mime = mime.to_ascii_lowercase();
        if mime.contains("webm") {
            AudioFormat::Webm
        } else if mime.contains("ogg") {
            AudioFormat::Ogg
        } else if mime.contains("mp3") || mime.contains("mpeg") {
            AudioFormat::Mp3
        } else if mime.contains("wav") {
            AudioFormat::Wav
        } else {
            AudioFormat::Unknown
        }
    }

    /// File extension handed to the decoder probe as a hint.
    pub fn extension(self) -> Option<&'static str> {
        match self {
            AudioFormat::Mp3 => Some("mp3"),
            AudioFormat::Wav => Some("wav"),
            AudioFormat::Ogg => Some("ogg"),
            AudioFormat::Webm => Some("webm"),
            AudioFormat::Unknown => None,
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "audio/mpeg",
            AudioFormat::Wav => "audio/wav",
            AudioFormat::Ogg => "audio/ogg",
            AudioFormat::Webm => "audio/webm",
            AudioFormat::Unknown => "application/octet-stream",
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension().unwrap_or("unknown"))
    }
}
