//! In-memory fetcher for component tests

use crate::error::{AlbumError, Result};
use crate::fetch::{ByteStream, ImageFetcher};
use crate::photo::ImageDimensions;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Encode a blank PNG of the given size
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::new(width, height);
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}

/// One step of a scripted stream
#[derive(Clone)]
pub enum Chunk {
    Data(Vec<u8>),
    /// Park the stream until the notify fires
    Wait(Arc<Notify>),
    Fail,
}

#[derive(Clone)]
struct Script {
    result: std::result::Result<ImageDimensions, u16>,
    gate: Option<Arc<Notify>>,
}

struct StreamScript {
    content_length: Option<u64>,
    chunks: Vec<Chunk>,
}

/// Scripted [`ImageFetcher`] recording calls and load overlap
pub struct MockFetcher {
    scripts: Mutex<HashMap<String, Script>>,
    streams: Mutex<HashMap<String, StreamScript>>,
    default_dims: ImageDimensions,
    delay: Duration,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockFetcher {
    pub fn new() -> Arc<Self> {
        Self::with_delay(Duration::ZERO)
    }

    /// Every load sleeps `delay` before resolving
    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(HashMap::new()),
            streams: Mutex::new(HashMap::new()),
            default_dims: ImageDimensions::new(400, 300),
            delay,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    pub fn succeed(&self, url: &str, dims: ImageDimensions) {
        self.scripts.lock().insert(url.to_string(), Script { result: Ok(dims), gate: None });
    }

    pub fn fail(&self, url: &str) {
        self.scripts.lock().insert(url.to_string(), Script { result: Err(404), gate: None });
    }

    /// Loads of `url` block until the returned notify fires, then succeed
    pub fn gate(&self, url: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.scripts.lock().insert(
            url.to_string(),
            Script { result: Ok(self.default_dims), gate: Some(gate.clone()) },
        );
        gate
    }

    pub fn stream(&self, url: &str, content_length: Option<u64>, chunks: Vec<Chunk>) {
        self.streams
            .lock()
            .insert(url.to_string(), StreamScript { content_length, chunks });
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self, url: &str) -> usize {
        self.calls.lock().iter().filter(|u| u.as_str() == url).count()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageFetcher for MockFetcher {
    async fn load(&self, url: &str) -> Result<ImageDimensions> {
        self.calls.lock().push(url.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let script = self.scripts.lock().get(url).cloned();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(gate) = script.as_ref().and_then(|s| s.gate.clone()) {
            gate.notified().await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        match script.map(|s| s.result) {
            Some(Ok(dims)) => Ok(dims),
            Some(Err(status)) => Err(AlbumError::Status { status, url: url.to_string() }),
            None => Ok(self.default_dims),
        }
    }

    async fn open_stream(&self, url: &str) -> Result<ByteStream> {
        self.calls.lock().push(url.to_string());
        let script = self.streams.lock().remove(url);
        let Some(script) = script else {
            return Err(AlbumError::Status { status: 404, url: url.to_string() });
        };

        let chunks = stream::unfold(script.chunks.into_iter(), |mut chunks| async move {
            loop {
                match chunks.next()? {
                    Chunk::Data(data) => return Some((Ok(Bytes::from(data)), chunks)),
                    Chunk::Wait(gate) => gate.notified().await,
                    Chunk::Fail => {
                        let reset = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
                        return Some((Err(AlbumError::Io(reset)), chunks));
                    }
                }
            }
        })
        .boxed();

        Ok(ByteStream { content_length: script.content_length, chunks })
    }
}
