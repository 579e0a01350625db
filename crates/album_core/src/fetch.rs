//! Network fetch primitive: asset loading, streamed downloads, decoding

use crate::error::{AlbumError, Result};
use crate::photo::ImageDimensions;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use image::{GenericImageView, ImageReader};
use std::io::Cursor;
use std::time::Duration;

/// Streamed response body
pub struct ByteStream {
    /// `Content-Length` when the server sent one
    pub content_length: Option<u64>,
    pub chunks: BoxStream<'static, Result<Bytes>>,
}

impl std::fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteStream")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Image fetching seam shared by the scheduler, lazy images and the viewer
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    /// Fetch `url` and fully decode it; success means the asset is displayable.
    async fn load(&self, url: &str) -> Result<ImageDimensions>;

    /// Start a streamed download of `url`.
    async fn open_stream(&self, url: &str) -> Result<ByteStream>;

    /// Decode a complete buffer received through [`ImageFetcher::open_stream`].
    async fn decode(&self, data: Bytes) -> Result<ImageDimensions> {
        decode_blocking(data).await
    }
}

/// `reqwest` backed fetcher
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    load_timeout: Duration,
}

impl HttpFetcher {
    /// `load_timeout` bounds whole-asset loads; streamed downloads are only
    /// bounded by the connect timeout since originals can be large.
    pub fn new(connect_timeout: Duration, load_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self { client, load_timeout })
    }

    pub fn with_client(client: reqwest::Client, load_timeout: Duration) -> Self {
        Self { client, load_timeout }
    }

    async fn get(&self, url: &str, timeout: Option<Duration>) -> Result<reqwest::Response> {
        let mut request = self.client.get(url);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let response = request.send().await?;

        if !response.status().is_success() {
            return Err(AlbumError::Status {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl ImageFetcher for HttpFetcher {
    async fn load(&self, url: &str) -> Result<ImageDimensions> {
        tracing::debug!(url, "Loading image");
        let response = self.get(url, Some(self.load_timeout)).await?;
        let data = response.bytes().await?;
        decode_blocking(data).await
    }

    async fn open_stream(&self, url: &str) -> Result<ByteStream> {
        tracing::debug!(url, "Opening image stream");
        let response = self.get(url, None).await?;
        let content_length = response.content_length();
        let chunks = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(AlbumError::from))
            .boxed();

        Ok(ByteStream { content_length, chunks })
    }
}

/// Decode on the blocking pool so large originals don't stall the runtime
pub async fn decode_blocking(data: Bytes) -> Result<ImageDimensions> {
    tokio::task::spawn_blocking(move || decode_dimensions(&data))
        .await
        .map_err(|e| AlbumError::ChannelClosed(format!("decode task: {}", e)))?
}

/// Fully decode an encoded image and report its natural size
pub fn decode_dimensions(data: &[u8]) -> Result<ImageDimensions> {
    let reader = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| AlbumError::Decode(e.to_string()))?;

    let img = reader.decode()?;
    let (width, height) = img.dimensions();
    Ok(ImageDimensions::new(width, height))
}

/// Check if a MIME type is one the decoder handles
pub fn is_supported_mime(mime: &str) -> bool {
    matches!(
        mime.to_ascii_lowercase().as_str(),
        "image/jpeg" | "image/jpg" | "image/png" | "image/gif" | "image/webp" | "image/bmp"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::png_bytes;

    #[test]
    fn test_decode_dimensions() {
        let data = png_bytes(40, 30);
        assert_eq!(decode_dimensions(&data).unwrap(), ImageDimensions::new(40, 30));
    }

    #[test]
    fn test_decode_garbage_fails() {
        let err = decode_dimensions(b"definitely not an image").unwrap_err();
        assert!(matches!(err, AlbumError::Decode(_)));
    }

    #[test]
    fn test_truncated_image_fails() {
        let data = png_bytes(40, 30);
        assert!(decode_dimensions(&data[..data.len() / 2]).is_err());
    }

    #[tokio::test]
    async fn test_decode_blocking() {
        let dims = decode_blocking(Bytes::from(png_bytes(8, 16))).await.unwrap();
        assert_eq!(dims.aspect_ratio(), Some(0.5));
    }

    #[test]
    fn test_is_supported_mime() {
        assert!(is_supported_mime("image/jpeg"));
        assert!(is_supported_mime("IMAGE/WEBP"));
        assert!(!is_supported_mime("video/mp4"));
    }
}
