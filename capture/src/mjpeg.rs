use bytes::{Bytes, BytesMut};
use chrono::Utc;
use futures_util::StreamExt;
use live_overlay_common::frame::Frame;
use reqwest::StatusCode;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::CaptureError;

const BOUNDARY: &[u8] = b"--frame\r\n";
const HEADER_END: &[u8] = b"\r\n\r\n";

/// Parse state for the MJPEG multipart stream.
enum ParseState {
    /// Looking for the boundary marker `--frame\r\n`.
    SeekingBoundary,
    /// Found boundary, now looking for end of headers `\r\n\r\n`.
    SeekingHeaderEnd,
    /// Collecting JPEG bytes until the next boundary.
    CollectingJpeg,
}

/// Incremental parser for a `multipart/x-mixed-replace` JPEG body.
///
/// Chunks may split boundaries and headers anywhere; a JPEG is emitted
/// once the boundary following it has been seen.
pub struct MjpegParser {
    buffer: BytesMut,
    state: ParseState,
    jpeg_start: usize,
}

impl Default for MjpegParser {
    fn default() -> Self {
        Self::new()
    }
}

impl MjpegParser {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(256 * 1024),
            state: ParseState::SeekingBoundary,
            jpeg_start: 0,
        }
    }

    /// Feed one chunk and return every JPEG it completed, in stream order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        loop {
            match self.state {
                ParseState::SeekingBoundary => {
                    if let Some(pos) = find_subsequence(&self.buffer, BOUNDARY) {
                        let _ = self.buffer.split_to(pos + BOUNDARY.len());
                        self.state = ParseState::SeekingHeaderEnd;
                    } else {
                        // Keep last few bytes in case boundary spans chunks
                        if self.buffer.len() > BOUNDARY.len() {
                            let _ = self.buffer.split_to(self.buffer.len() - BOUNDARY.len());
                        }
                        break;
                    }
                }
                ParseState::SeekingHeaderEnd => {
                    if let Some(pos) = find_subsequence(&self.buffer, HEADER_END) {
                        let _ = self.buffer.split_to(pos + HEADER_END.len());
                        self.jpeg_start = 0;
                        self.state = ParseState::CollectingJpeg;
                    } else {
                        break;
                    }
                }
                ParseState::CollectingJpeg => {
                    if let Some(pos) = find_subsequence(&self.buffer[self.jpeg_start..], BOUNDARY)
                    {
                        let jpeg_end = self.jpeg_start + pos;
                        // Strip trailing \r\n before boundary
                        let end = if jpeg_end >= 2
                            && self.buffer[jpeg_end - 2] == b'\r'
                            && self.buffer[jpeg_end - 1] == b'\n'
                        {
                            jpeg_end - 2
                        } else {
                            jpeg_end
                        };

                        let jpeg = self.buffer.split_to(end).freeze();
                        let _ = self.buffer.split_to(jpeg_end - end + BOUNDARY.len());

                        if !jpeg.is_empty() {
                            frames.push(jpeg);
                        }
                        self.state = ParseState::SeekingHeaderEnd;
                    } else {
                        // Avoid re-scanning bytes that cannot start a boundary
                        self.jpeg_start = self.buffer.len().saturating_sub(BOUNDARY.len());
                        break;
                    }
                }
            }
        }

        frames
    }
}

/// Client for a camera that serves an MJPEG stream over HTTP.
pub struct MjpegCamera {
    client: reqwest::Client,
    url: String,
}

impl MjpegCamera {
    pub fn new(url: &str, connect_timeout: Duration) -> Result<Self, CaptureError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(CaptureError::Client)?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    /// Open the stream and start a background reader that keeps the feed
    /// pointed at the newest frame.
    ///
    /// Access or reachability problems on this first request are returned
    /// to the caller. Once connected, the reader reconnects on its own with
    /// exponential backoff until every [`CameraFeed`] has been dropped.
    pub async fn connect(self) -> Result<CameraFeed, CaptureError> {
        info!(url = self.url, "connecting to MJPEG stream");
        let response = open_stream(&self.client, &self.url).await?;
        info!(status = %response.status(), "connected to MJPEG stream");

        let (tx, feed) = CameraFeed::channel();
        tokio::spawn(run_reader(self.client, self.url, response, tx));
        Ok(feed)
    }
}

/// Receiving side of the camera: always holds the most recent frame.
#[derive(Debug, Clone)]
pub struct CameraFeed {
    frames: watch::Receiver<Option<Frame>>,
}

impl CameraFeed {
    /// A feed driven by the returned sender; frames are published with
    /// `send(Some(frame))`.
    pub fn channel() -> (watch::Sender<Option<Frame>>, Self) {
        let (tx, rx) = watch::channel(None);
        (tx, Self { frames: rx })
    }

    /// Most recent frame, if any has arrived.
    pub fn latest(&self) -> Option<Frame> {
        self.frames.borrow().clone()
    }

    /// Independent receiver for other consumers of the frames.
    pub fn subscribe(&self) -> watch::Receiver<Option<Frame>> {
        self.frames.clone()
    }

    /// Wait until the camera has delivered at least one frame.
    pub async fn first_frame(&mut self) -> Result<Frame, CaptureError> {
        let frame = self
            .frames
            .wait_for(Option::is_some)
            .await
            .map_err(|_| CaptureError::FeedClosed)?;
        frame.clone().ok_or(CaptureError::FeedClosed)
    }
}

async fn open_stream(client: &reqwest::Client, url: &str) -> Result<reqwest::Response, CaptureError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(CaptureError::Unreachable)?;

    let status = response.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(CaptureError::PermissionDenied(status.as_u16()));
    }
    if !status.is_success() {
        return Err(CaptureError::HttpStatus(status.as_u16()));
    }
    Ok(response)
}

async fn run_reader(
    client: reqwest::Client,
    url: String,
    first: reqwest::Response,
    tx: watch::Sender<Option<Frame>>,
) {
    let mut backoff = Duration::from_secs(2);
    let max_backoff = Duration::from_secs(30);
    let mut seq: u64 = 0;
    let mut pending = Some(first);

    loop {
        let result = match pending.take() {
            Some(response) => consume_stream(response, &tx, &mut seq).await,
            None => match open_stream(&client, &url).await {
                Ok(response) => {
                    info!(url, "reconnected to MJPEG stream");
                    consume_stream(response, &tx, &mut seq).await
                }
                Err(e) => Err(e),
            },
        };

        if tx.is_closed() {
            info!("camera feed dropped, stopping MJPEG reader");
            return;
        }

        match result {
            Ok(()) => {
                info!("stream ended cleanly, reconnecting");
                backoff = Duration::from_secs(2);
            }
            Err(e) => {
                error!(error = %e, "stream error, reconnecting in {:?}", backoff);
            }
        }
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(max_backoff);
    }
}

async fn consume_stream(
    response: reqwest::Response,
    tx: &watch::Sender<Option<Frame>>,
    seq: &mut u64,
) -> Result<(), CaptureError> {
    let mut byte_stream = response.bytes_stream();
    let mut parser = MjpegParser::new();

    while let Some(chunk) = byte_stream.next().await {
        let chunk = chunk.map_err(CaptureError::Stream)?;

        for jpeg in parser.push(&chunk) {
            let frame = Frame::new(jpeg, Utc::now().timestamp_millis(), *seq);
            *seq += 1;
            if !frame.looks_like_jpeg() {
                warn!(seq = frame.seq, "multipart body is not a JPEG, publishing anyway");
            }
            debug!(seq = frame.seq, bytes = frame.payload_size(), "camera frame");
            if tx.send(Some(frame)).is_err() {
                return Ok(());
            }
        }
    }

    Ok(())
}

/// Find the position of `needle` in `haystack`.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
