//! Photo records, quality tiers and the tier URL resolver

use crate::error::{AlbumError, Result};
use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque, unique photo identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhotoId(String);

impl PhotoId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PhotoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PhotoId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Image quality tier, ordered by pixel size and byte weight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Thumb,
    Medium,
    Display,
    Original,
}

impl Tier {
    pub const ALL: [Tier; 4] = [Tier::Thumb, Tier::Medium, Tier::Display, Tier::Original];

    /// `display` and `original` count as high quality
    pub fn is_high(self) -> bool {
        self >= Tier::Display
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Thumb => "thumb",
            Tier::Medium => "medium",
            Tier::Display => "display",
            Tier::Original => "original",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Photo record as served by the album API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Photo {
    pub id: PhotoId,
    #[serde(default)]
    pub album_id: String,
    pub filename: String,
    pub storage_key: String,
    #[serde(default)]
    pub thumb_key: Option<String>,
    #[serde(default)]
    pub medium_key: Option<String>,
    #[serde(default)]
    pub display_key: Option<String>,
    #[serde(default)]
    pub mime: String,
    #[serde(default)]
    pub bytes: u64,
    pub taken_at: DateTime<Utc>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Photo {
    /// Storage key for a tier; missing derivatives fall back to the original upload
    pub fn key_for(&self, tier: Tier) -> &str {
        let derivative = match tier {
            Tier::Thumb => self.thumb_key.as_deref(),
            Tier::Medium => self.medium_key.as_deref(),
            Tier::Display => self.display_key.as_deref(),
            Tier::Original => None,
        };
        derivative.unwrap_or(&self.storage_key)
    }
}

/// Natural size of a decoded image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDimensions {
    pub width: u32,
    pub height: u32,
}

impl ImageDimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// width / height, `None` for degenerate sizes
    pub fn aspect_ratio(self) -> Option<f64> {
        if self.width == 0 || self.height == 0 {
            None
        } else {
            Some(f64::from(self.width) / f64::from(self.height))
        }
    }
}

/// Maps a photo and tier to a fetchable URL
pub trait ImageUrlResolver: Send + Sync {
    fn url_for(&self, photo: &Photo, tier: Tier) -> String;
}

/// Resolves `{base}/api/files/{key}` with the key percent-encoded as one path segment
#[derive(Debug, Clone)]
pub struct FileUrlResolver {
    base: Url,
}

impl FileUrlResolver {
    pub fn new(base: &str) -> Result<Self> {
        let base = Url::parse(base)
            .map_err(|e| AlbumError::Config(format!("invalid server URL {:?}: {}", base, e)))?;
        if base.cannot_be_a_base() {
            return Err(AlbumError::Config(format!("server URL {} cannot be a base", base)));
        }
        Ok(Self { base })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }
}

impl ImageUrlResolver for FileUrlResolver {
    fn url_for(&self, photo: &Photo, tier: Tier) -> String {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(["api", "files", photo.key_for(tier)]);
        }
        url.into()
    }
}

#[cfg(test)]
pub(crate) fn test_photo(id: &str) -> Photo {
    Photo {
        id: PhotoId::new(id),
        album_id: "album".into(),
        filename: format!("{}.jpg", id),
        storage_key: format!("{}/original.jpg", id),
        thumb_key: Some(format!("{}/thumb.webp", id)),
        medium_key: Some(format!("{}/medium.webp", id)),
        display_key: Some(format!("{}/display.webp", id)),
        mime: "image/jpeg".into(),
        bytes: 5 * 1024 * 1024,
        taken_at: DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap(),
        created_at: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_order() {
        assert!(Tier::Thumb < Tier::Medium);
        assert!(Tier::Medium < Tier::Display);
        assert!(Tier::Display < Tier::Original);
        assert!(!Tier::Medium.is_high());
        assert!(Tier::Display.is_high());
        assert!(Tier::Original.is_high());
    }

    #[test]
    fn test_missing_derivative_uses_storage_key() {
        let mut photo = test_photo("p1");
        photo.medium_key = None;
        assert_eq!(photo.key_for(Tier::Medium), "p1/original.jpg");
        assert_eq!(photo.key_for(Tier::Thumb), "p1/thumb.webp");
        assert_eq!(photo.key_for(Tier::Original), "p1/original.jpg");
    }

    #[test]
    fn test_resolver_encodes_key() {
        let resolver = FileUrlResolver::new("http://localhost:3000/").unwrap();
        let photo = test_photo("p1");
        assert_eq!(
            resolver.url_for(&photo, Tier::Thumb),
            "http://localhost:3000/api/files/p1%2Fthumb.webp"
        );
    }

    #[test]
    fn test_resolver_rejects_bad_base() {
        assert!(FileUrlResolver::new("not a url").is_err());
        assert!(FileUrlResolver::new("mailto:a@b.c").is_err());
    }

    #[test]
    fn test_photo_from_api_json() {
        let json = r#"{
            "id": "abc",
            "album_id": "a1",
            "filename": "IMG_1.jpg",
            "storage_key": "k/orig.jpg",
            "thumb_key": "k/t.webp",
            "mime": "image/jpeg",
            "bytes": 1234,
            "taken_at": "2024-05-01T10:00:00Z",
            "created_at": "2024-05-02T10:00:00Z"
        }"#;
        let photo: Photo = serde_json::from_str(json).unwrap();
        assert_eq!(photo.id.as_str(), "abc");
        assert_eq!(photo.key_for(Tier::Display), "k/orig.jpg");
        assert_eq!(photo.key_for(Tier::Thumb), "k/t.webp");
    }

    #[test]
    fn test_aspect_ratio() {
        assert_eq!(ImageDimensions::new(400, 300).aspect_ratio(), Some(400.0 / 300.0));
        assert_eq!(ImageDimensions::new(0, 300).aspect_ratio(), None);
    }
}
