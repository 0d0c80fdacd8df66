use std::fmt;

use serde::{Deserialize, Serialize};

// =============================================================================
// Media
// =============================================================================

/// Binary payload of an image fragment.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Media {
    /// Raw image bytes. Never serialized.
    #[serde(skip)]
    pub data: Vec<u8>,
    /// Normalized MIME type (parameters stripped), e.g. `image/jpeg`.
    pub mime_type: String,
    pub filename: String,
    pub size_bytes: usize,
}

impl Media {
    /// Build a media payload, recording the byte size of `data`.
    pub fn new(data: Vec<u8>, mime_type: impl Into<String>, filename: impl Into<String>) -> Self {
        let size_bytes = data.len();
        Self {
            data,
            mime_type: mime_type.into(),
            filename: filename.into(),
            size_bytes,
        }
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

impl fmt::Debug for Media {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Media")
            .field("mime_type", &self.mime_type)
            .field("filename", &self.filename)
            .field("size_bytes", &self.size_bytes)
            .finish()
    }
}

// =============================================================================
// Fragments
// =============================================================================

/// The closed set of fragment kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FragmentKind {
    Text,
    Image,
}

impl fmt::Display for FragmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FragmentKind::Text => write!(f, "text"),
            FragmentKind::Image => write!(f, "image"),
        }
    }
}

/// Content carried by a fragment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FragmentPayload {
    Text(String),
    Image { caption: String, media: Media },
}

/// One raw unit of input for a conversation key.
///
/// `arrival_order` is assigned by the queue when the fragment is enqueued;
/// values supplied by the caller are overwritten.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fragment {
    pub payload: FragmentPayload,
    pub arrival_order: u64,
}

impl Fragment {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            payload: FragmentPayload::Text(text.into()),
            arrival_order: 0,
        }
    }

    pub fn image(caption: impl Into<String>, media: Media) -> Self {
        Self {
            payload: FragmentPayload::Image {
                caption: caption.into(),
                media,
            },
            arrival_order: 0,
        }
    }

    pub fn kind(&self) -> FragmentKind {
        match self.payload {
            FragmentPayload::Text(_) => FragmentKind::Text,
            FragmentPayload::Image { .. } => FragmentKind::Image,
        }
    }
}

// =============================================================================
// Units and batches
// =============================================================================

/// A coalesced, flush-ready item.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Unit {
    /// One or more adjacent text fragments joined by the separator.
    Text { text: String },
    /// A standalone image with its own caption.
    Image { caption: String, media: Media },
}

impl Unit {
    pub fn text(text: impl Into<String>) -> Self {
        Unit::Text { text: text.into() }
    }

    pub fn kind(&self) -> FragmentKind {
        match self {
            Unit::Text { .. } => FragmentKind::Text,
            Unit::Image { .. } => FragmentKind::Image,
        }
    }
}

/// The snapshot handed to a flush handler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Batch {
    pub units: Vec<Unit>,
    /// Number of raw fragments taken from the buffer for this batch.
    pub fragment_count: usize,
    /// 1-based flush counter for the key's current queue lifetime.
    pub sequence: u64,
    /// `arrival_order` of the first and last fragment taken for this batch.
    pub first_arrival: u64,
    pub last_arrival: u64,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jpeg(bytes: &[u8]) -> Media {
        Media::new(bytes.to_vec(), "image/jpeg", "photo.jpg")
    }

    #[test]
    fn test_media_records_size() {
        let media = jpeg(&[1, 2, 3, 4]);
        assert_eq!(media.size_bytes, 4);
        assert!(media.is_image());
        assert!(!Media::new(vec![1], "audio/ogg", "a.ogg").is_image());
    }

    #[test]
    fn test_media_debug_hides_bytes() {
        let dbg = format!("{:?}", jpeg(&[0xde, 0xad]));
        assert!(dbg.contains("image/jpeg"));
        assert!(!dbg.contains("222"));
    }

    #[test]
    fn test_fragment_constructors() {
        let text = Fragment::text("hola");
        assert_eq!(text.kind(), FragmentKind::Text);
        assert_eq!(text.arrival_order, 0);

        let image = Fragment::image("caption", jpeg(&[1]));
        assert_eq!(image.kind(), FragmentKind::Image);
    }

    #[test]
    fn test_fragment_kind_display() {
        assert_eq!(FragmentKind::Text.to_string(), "text");
        assert_eq!(FragmentKind::Image.to_string(), "image");
    }

    #[test]
    fn test_unit_serialization_skips_media_bytes() {
        let unit = Unit::Image {
            caption: "receipt".to_string(),
            media: jpeg(&[9, 9, 9]),
        };
        let json = serde_json::to_value(&unit).unwrap();
        assert_eq!(json["type"], "image");
        assert_eq!(json["caption"], "receipt");
        assert_eq!(json["media"]["size_bytes"], 3);
        assert!(json["media"].get("data").is_none());
    }

    #[test]
    fn test_batch_len() {
        let batch = Batch {
            units: vec![Unit::text("a, b")],
            fragment_count: 2,
            sequence: 1,
            first_arrival: 0,
            last_arrival: 1,
        };
        assert_eq!(batch.len(), 1);
        assert!(!batch.is_empty());
    }
}
