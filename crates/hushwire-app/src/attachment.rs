//! Image payloads carried inside messages as base64 data URLs.

use base64::{Engine, engine::general_purpose::STANDARD};

/// Decoded image payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Media type from the data URL header
    pub mime: String,
    /// Raw payload
    pub bytes: Vec<u8>,
}

impl Attachment {
    /// Parse `data:<mime>;base64,<payload>`. `None` for anything else.
    pub fn from_data_url(text: &str) -> Option<Self> {
        let (header, payload) = text.strip_prefix("data:")?.split_once(',')?;
        let mime = header.strip_suffix(";base64")?;
        let bytes = STANDARD.decode(payload.trim()).ok()?;
        Some(Self { mime: mime.to_string(), bytes })
    }

    /// File extension matching the media type.
    pub fn extension(&self) -> &'static str {
        match self.mime.as_str() {
            "image/png" => "png",
            "image/jpeg" | "image/jpg" => "jpg",
            "image/gif" => "gif",
            "image/webp" => "webp",
            _ => "bin",
        }
    }
}
