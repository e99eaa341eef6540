//! MJPEG stream client
//!
//! Opens a stream endpoint with `reqwest` and drives [`PartDecoder`] over
//! the response body, yielding one JPEG payload per multipart part.

use bytes::Bytes;
use futures_util::stream::{BoxStream, StreamExt, TryStreamExt};
use reqwest::header::{HeaderMap, ACCEPT, CONTENT_TYPE};
use reqwest::StatusCode;
use std::fmt;
use std::io;
use std::time::{Duration, Instant};
use tokio_util::codec::FramedRead;
use tokio_util::io::StreamReader;

use crate::codec::{PartDecoder, MULTIPART_CONTENT_TYPE};
use crate::constants::DEFAULT_MAX_FRAME_BYTES;
use crate::error::ClientError;

/// TCP connect limit for a new stream
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

type BodyReader = StreamReader<BoxStream<'static, io::Result<Bytes>>, Bytes>;

/// Extract the boundary parameter of a multipart content type
fn multipart_boundary(content_type: &str) -> Option<String> {
    let (mime, params) = content_type.split_once(';')?;
    if !mime.trim().eq_ignore_ascii_case("multipart/x-mixed-replace") {
        return None;
    }
    params.split(';').find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("boundary")
            .then(|| value.trim().trim_matches('"').trim_start_matches("--").to_string())
    })
}

/// Client statistics
#[derive(Debug, Clone, Default)]
pub struct ClientStats {
    pub frames_received: u64,
    pub bytes_received: u64,
    pub elapsed_secs: f64,
}

impl ClientStats {
    pub fn fps(&self) -> f64 {
        if self.elapsed_secs > 0.0 {
            self.frames_received as f64 / self.elapsed_secs
        } else {
            0.0
        }
    }
}

/// An open MJPEG stream
pub struct StreamClient {
    frames: FramedRead<BodyReader, PartDecoder>,
    headers: HeaderMap,
    started: Instant,
}

impl StreamClient {
    /// Open `http://{authority}{path}` and validate the response
    pub async fn connect(authority: impl fmt::Display, path: &str) -> Result<Self, ClientError> {
        let url = format!("http://{}{}", authority, path);

        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| ClientError::ConnectionFailed(e.to_string()))?;

        let response = client
            .get(&url)
            .header(ACCEPT, MULTIPART_CONTENT_TYPE)
            .send()
            .await
            .map_err(|e| ClientError::ConnectionFailed(e.to_string()))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(ClientError::BadStatus(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        let boundary = multipart_boundary(content_type)
            .ok_or_else(|| ClientError::NotMultipart(content_type.to_string()))?;
        tracing::debug!("Opened stream {} (boundary '{}')", url, boundary);

        let headers = response.headers().clone();
        let body = response
            .bytes_stream()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
            .boxed();

        Ok(Self {
            frames: FramedRead::new(
                StreamReader::new(body),
                PartDecoder::with_boundary(&boundary, DEFAULT_MAX_FRAME_BYTES),
            ),
            headers,
            started: Instant::now(),
        })
    }

    /// Value of a response header
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Wait for the next frame; `None` once the server ends the stream
    pub async fn next_frame(&mut self) -> Result<Option<Bytes>, ClientError> {
        self.frames.next().await.transpose()
    }

    pub fn stats(&self) -> ClientStats {
        let decoder = self.frames.decoder();
        ClientStats {
            frames_received: decoder.parts_decoded(),
            bytes_received: decoder.bytes_decoded(),
            elapsed_secs: self.started.elapsed().as_secs_f64(),
        }
    }
}
