//! REST client for the album server

use crate::error::{AlbumError, Result};
use crate::exif::ExifData;
use crate::photo::{Photo, PhotoId};
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Server default page size
pub const DEFAULT_PAGE_LIMIT: u32 = 60;

/// One page of `/api/photos`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotosPage {
    pub items: Vec<Photo>,
    #[serde(default)]
    pub total: Option<u64>,
    pub limit: u32,
    pub offset: u64,
    #[serde(default)]
    pub next_offset: Option<u64>,
    #[serde(default)]
    pub has_more: Option<bool>,
}

impl PhotosPage {
    /// Offset of the following page, `None` at the end of the listing
    pub fn following_offset(&self) -> Option<u64> {
        let more = self.has_more.unwrap_or(self.next_offset.is_some());
        if !more || self.items.is_empty() {
            return None;
        }
        let next = self
            .next_offset
            .unwrap_or(self.offset + self.items.len() as u64);
        // a server that does not advance would loop forever
        (next > self.offset).then_some(next)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Album {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub cover_photo_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhotoQuery {
    pub album_id: Option<String>,
    pub limit: Option<u32>,
    pub offset: u64,
    /// Inclusive lower bound, ISO-8601
    pub start_taken_at: Option<String>,
    /// Exclusive upper bound, ISO-8601
    pub end_taken_at: Option<String>,
}

#[derive(Deserialize)]
struct ItemList<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Clone)]
pub struct AlbumApi {
    client: reqwest::Client,
    base: Url,
}

impl AlbumApi {
    pub fn new(base: &str, connect_timeout: Duration, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()?;
        Self::with_client(client, base)
    }

    pub fn with_client(client: reqwest::Client, base: &str) -> Result<Self> {
        let base = Url::parse(base)
            .map_err(|e| AlbumError::Config(format!("invalid server URL {:?}: {}", base, e)))?;
        if base.cannot_be_a_base() {
            return Err(AlbumError::Config(format!("server URL {} cannot be a base", base)));
        }
        Ok(Self { client, base })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push("api").extend(segments);
        }
        url
    }

    fn photos_url(&self, query: &PhotoQuery) -> Url {
        let mut url = self.endpoint(&["photos"]);
        {
            let mut pairs = url.query_pairs_mut();
            if let Some(album_id) = &query.album_id {
                pairs.append_pair("albumId", album_id);
            }
            if let Some(start) = &query.start_taken_at {
                pairs.append_pair("startTakenAt", start);
            }
            if let Some(end) = &query.end_taken_at {
                pairs.append_pair("endTakenAt", end);
            }
            pairs.append_pair("limit", &query.limit.unwrap_or(DEFAULT_PAGE_LIMIT).to_string());
            pairs.append_pair("offset", &query.offset.to_string());
        }
        url
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        tracing::debug!(url = %url, "API request");
        let response = self.client.get(url.clone()).send().await?;
        if !response.status().is_success() {
            return Err(AlbumError::Status {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response.json().await?)
    }

    pub async fn photos_page(&self, query: &PhotoQuery) -> Result<PhotosPage> {
        self.get_json(self.photos_url(query)).await
    }

    /// Walk every page of the listing, newest first as the server orders it
    pub async fn all_photos(&self, album_id: Option<&str>) -> Result<Vec<Photo>> {
        let mut query = PhotoQuery {
            album_id: album_id.map(str::to_string),
            ..PhotoQuery::default()
        };
        let mut photos = Vec::new();

        loop {
            let page = self.photos_page(&query).await?;
            let next = page.following_offset();
            photos.extend(page.items);
            match next {
                Some(offset) => query.offset = offset,
                None => break,
            }
        }

        tracing::info!(count = photos.len(), album = ?album_id, "Fetched photo listing");
        Ok(photos)
    }

    pub async fn albums(&self) -> Result<Vec<Album>> {
        let list: ItemList<Album> = self.get_json(self.endpoint(&["albums"])).await?;
        Ok(list.items)
    }

    pub async fn exif(&self, id: &PhotoId) -> Result<ExifData> {
        self.get_json(self.endpoint(&["photos", id.as_str(), "exif"])).await
    }
}
