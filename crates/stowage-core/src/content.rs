//! Content classification by byte sniffing.
//!
//! Declared names are never consulted: a `.jpg` that is really a zip is a zip.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use utoipa::ToSchema;

/// Bytes read from the start of a blob for classification.
pub const SNIFF_LEN: usize = 512;

/// Broad content class of a published artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ContentClass {
    Image,
    Video,
    Audio,
    Document,
    Archive,
    Text,
    Binary,
}

impl ContentClass {
    /// Whether a thumbnail should be attempted for this class
    pub fn is_image(&self) -> bool {
        matches!(self, ContentClass::Image)
    }
}

impl FromStr for ContentClass {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "image" => Ok(ContentClass::Image),
            "video" => Ok(ContentClass::Video),
            "audio" => Ok(ContentClass::Audio),
            "document" => Ok(ContentClass::Document),
            "archive" => Ok(ContentClass::Archive),
            "text" => Ok(ContentClass::Text),
            "binary" => Ok(ContentClass::Binary),
            _ => Err(anyhow::anyhow!("Invalid content class: {}", s)),
        }
    }
}

impl Display for ContentClass {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ContentClass::Image => write!(f, "image"),
            ContentClass::Video => write!(f, "video"),
            ContentClass::Audio => write!(f, "audio"),
            ContentClass::Document => write!(f, "document"),
            ContentClass::Archive => write!(f, "archive"),
            ContentClass::Text => write!(f, "text"),
            ContentClass::Binary => write!(f, "binary"),
        }
    }
}

/// Result of sniffing a blob's leading bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub class: ContentClass,
    pub mime_type: String,
}

impl Classification {
    fn new(class: ContentClass, mime_type: &str) -> Self {
        Self {
            class,
            mime_type: mime_type.to_string(),
        }
    }
}

/// (offset, magic, class, mime) for formats the image crate does not know.
const SIGNATURES: &[(usize, &[u8], ContentClass, &str)] = &[
    (0, b"%PDF-", ContentClass::Document, "application/pdf"),
    (0, b"PK\x03\x04", ContentClass::Archive, "application/zip"),
    (0, b"PK\x05\x06", ContentClass::Archive, "application/zip"),
    (0, b"\x1f\x8b", ContentClass::Archive, "application/gzip"),
    (0, b"7z\xbc\xaf\x27\x1c", ContentClass::Archive, "application/x-7z-compressed"),
    (257, b"ustar", ContentClass::Archive, "application/x-tar"),
    (4, b"ftypqt", ContentClass::Video, "video/quicktime"),
    (4, b"ftypM4A", ContentClass::Audio, "audio/mp4"),
    (4, b"ftyp", ContentClass::Video, "video/mp4"),
    (0, b"\x1a\x45\xdf\xa3", ContentClass::Video, "video/webm"),
    (0, b"ID3", ContentClass::Audio, "audio/mpeg"),
    (0, b"\xff\xfb", ContentClass::Audio, "audio/mpeg"),
    (0, b"OggS", ContentClass::Audio, "audio/ogg"),
    (0, b"fLaC", ContentClass::Audio, "audio/flac"),
];

/// Classify content from its leading bytes (at most [`SNIFF_LEN`] are needed).
pub fn classify(head: &[u8]) -> Classification {
    if head.is_empty() {
        return Classification::new(ContentClass::Binary, "application/octet-stream");
    }

    // RIFF containers carry their real type at offset 8.
    if head.len() >= 12 && &head[0..4] == b"RIFF" {
        match &head[8..12] {
            b"WAVE" => return Classification::new(ContentClass::Audio, "audio/wav"),
            b"AVI " => return Classification::new(ContentClass::Video, "video/x-msvideo"),
            _ => {}
        }
    }

    if let Ok(format) = image::guess_format(head) {
        return Classification::new(ContentClass::Image, format.to_mime_type());
    }

    for (offset, magic, class, mime) in SIGNATURES {
        if head.len() >= offset + magic.len() && &head[*offset..offset + magic.len()] == *magic {
            return Classification::new(*class, mime);
        }
    }

    if looks_like_text(head) {
        return Classification::new(ContentClass::Text, "text/plain");
    }

    Classification::new(ContentClass::Binary, "application/octet-stream")
}

fn looks_like_text(head: &[u8]) -> bool {
    if head.contains(&0) {
        return false;
    }
    match std::str::from_utf8(head) {
        Ok(_) => true,
        // The sniff window may cut a multi-byte character in half.
        Err(e) => e.error_len().is_none() && e.valid_up_to() + 4 > head.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_png_by_magic() {
        let png = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";
        let c = classify(png);
        assert_eq!(c.class, ContentClass::Image);
        assert_eq!(c.mime_type, "image/png");
    }

    #[test]
    fn test_classify_pdf_and_zip() {
        assert_eq!(classify(b"%PDF-1.7\n%...").mime_type, "application/pdf");
        assert_eq!(classify(b"PK\x03\x04rest").class, ContentClass::Archive);
    }

    #[test]
    fn test_classify_mp4_and_wav() {
        let mp4 = b"\0\0\0\x18ftypisom\0\0\x02\0";
        assert_eq!(classify(mp4).mime_type, "video/mp4");

        let wav = b"RIFF\x24\0\0\0WAVEfmt ";
        assert_eq!(classify(wav).class, ContentClass::Audio);
    }

    #[test]
    fn test_classify_text_and_binary() {
        assert_eq!(classify(b"hello, world\n").class, ContentClass::Text);
        assert_eq!(classify(b"\0\x01\x02\x03").class, ContentClass::Binary);
        assert_eq!(classify(b"").class, ContentClass::Binary);
    }

    #[test]
    fn test_declared_extension_is_irrelevant() {
        // Bytes decide; there is no name input at all.
        assert_eq!(classify(b"PK\x05\x06").class, ContentClass::Archive);
    }

    #[test]
    fn test_text_cut_mid_character_is_still_text() {
        let mut bytes = "héllo".as_bytes().to_vec();
        bytes.extend_from_slice(&"é".as_bytes()[..1]);
        assert_eq!(classify(&bytes).class, ContentClass::Text);
    }

    #[test]
    fn test_content_class_round_trips_through_str() {
        assert_eq!("Image".parse::<ContentClass>().unwrap(), ContentClass::Image);
        assert_eq!(ContentClass::Archive.to_string(), "archive");
        assert!("nope".parse::<ContentClass>().is_err());
    }
}
