use std::io::Read;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use tracing::{info, warn};

use super::{FrameSource, SourceError};

const BOUNDARY: &[u8] = b"--frame\r\n";
const HEADER_END: &[u8] = b"\r\n\r\n";

const RECONNECT_BACKOFF: Duration = Duration::from_secs(2);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Parse state for the MJPEG multipart stream.
enum ParseState {
    /// Looking for the boundary marker `--frame\r\n`.
    SeekingBoundary,
    /// Found boundary, now looking for end of headers `\r\n\r\n`.
    SeekingHeaderEnd,
    /// Collecting JPEG bytes until the next boundary.
    CollectingJpeg,
}

/// Incremental splitter for an MJPEG multipart stream: socket bytes go in
/// through [`MultipartParser::feed`], complete JPEG payloads come out of
/// [`MultipartParser::next_jpeg`]. Part headers are discarded.
struct MultipartParser {
    buffer: BytesMut,
    state: ParseState,
    jpeg_start: usize,
}

impl MultipartParser {
    fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(256 * 1024),
            state: ParseState::SeekingBoundary,
            jpeg_start: 0,
        }
    }

    fn feed(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Drive the state machine until a full JPEG is available or the
    /// buffered bytes run dry.
    fn next_jpeg(&mut self) -> Option<Vec<u8>> {
        loop {
            match self.state {
                ParseState::SeekingBoundary => {
                    if let Some(pos) = find_subsequence(&self.buffer, BOUNDARY) {
                        // Discard everything up to and including the boundary
                        let _ = self.buffer.split_to(pos + BOUNDARY.len());
                        self.state = ParseState::SeekingHeaderEnd;
                    } else {
                        // Keep last few bytes in case the boundary spans chunks
                        if self.buffer.len() > BOUNDARY.len() {
                            let _ = self.buffer.split_to(self.buffer.len() - BOUNDARY.len());
                        }
                        return None;
                    }
                }
                ParseState::SeekingHeaderEnd => {
                    if let Some(pos) = find_subsequence(&self.buffer, HEADER_END) {
                        // Discard part headers
                        let _ = self.buffer.split_to(pos + HEADER_END.len());
                        self.jpeg_start = 0;
                        self.state = ParseState::CollectingJpeg;
                    } else {
                        return None;
                    }
                }
                ParseState::CollectingJpeg => {
                    // The next boundary marks where this JPEG ends
                    if let Some(pos) = find_subsequence(&self.buffer[self.jpeg_start..], BOUNDARY) {
                        let jpeg_end = self.jpeg_start + pos;
                        // Strip trailing \r\n before the boundary
                        let end = if jpeg_end >= 2
                            && self.buffer[jpeg_end - 2] == b'\r'
                            && self.buffer[jpeg_end - 1] == b'\n'
                        {
                            jpeg_end - 2
                        } else {
                            jpeg_end
                        };

                        let jpeg = self.buffer[..end].to_vec();

                        // Advance past the boundary; headers come next
                        let _ = self.buffer.split_to(jpeg_end + BOUNDARY.len());
                        self.state = ParseState::SeekingHeaderEnd;

                        if !jpeg.is_empty() {
                            return Some(jpeg);
                        }
                    } else {
                        // No boundary yet; remember where to resume scanning
                        self.jpeg_start = if self.buffer.len() > BOUNDARY.len() {
                            self.buffer.len() - BOUNDARY.len()
                        } else {
                            0
                        };
                        return None;
                    }
                }
            }
        }
    }
}

/// Find the position of `needle` in `haystack`.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

// Decode one JPEG into a packed RGB24 buffer at the configured geometry.
fn decode_jpeg(jpeg: &[u8], want_w: u32, want_h: u32) -> Result<Vec<u8>, SourceError> {
    let rgb = image::load_from_memory(jpeg)?.into_rgb8();
    let (got_w, got_h) = rgb.dimensions();
    if (got_w, got_h) != (want_w, want_h) {
        return Err(SourceError::GeometryMismatch {
            got_w,
            got_h,
            want_w,
            want_h,
        });
    }
    Ok(rgb.into_raw())
}

struct ActiveStream {
    response: reqwest::blocking::Response,
    parser: MultipartParser,
}

impl ActiveStream {
    /// Block until a complete JPEG part is assembled.
    fn read_jpeg(&mut self) -> Result<Vec<u8>, SourceError> {
        let mut chunk = [0u8; 16 * 1024];
        loop {
            if let Some(jpeg) = self.parser.next_jpeg() {
                return Ok(jpeg);
            }
            let n = self.response.read(&mut chunk)?;
            if n == 0 {
                return Err(SourceError::StreamEnded);
            }
            self.parser.feed(&chunk[..n]);
        }
    }
}

/// Reads an MJPEG multipart stream over HTTP and decodes each part into a
/// packed RGB24 buffer. Reconnects with exponential backoff when the stream
/// drops; every failed attempt surfaces as one `Err` so the core loop can
/// count skipped ticks.
pub struct MjpegSource {
    url: String,
    width: u32,
    height: u32,
    bottom_up: bool,
    connect_timeout: Duration,
    stream: Option<ActiveStream>,
    backoff: Duration,
}

impl MjpegSource {
    pub fn new(
        url: impl Into<String>,
        width: u32,
        height: u32,
        bottom_up: bool,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            url: url.into(),
            width,
            height,
            bottom_up,
            connect_timeout,
            stream: None,
            backoff: RECONNECT_BACKOFF,
        }
    }

    // Built on the acquisition thread: a blocking client must never be
    // created or driven on the async runtime.
    fn connect(&self) -> Result<ActiveStream, SourceError> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(self.connect_timeout)
            // The stream stays open for as long as the camera serves it.
            .timeout(None)
            .build()
            .map_err(SourceError::HttpConnect)?;
        let response = client
            .get(&self.url)
            .send()
            .map_err(SourceError::HttpConnect)?;
        if !response.status().is_success() {
            return Err(SourceError::HttpStatus(response.status().as_u16()));
        }
        info!(url = self.url, status = %response.status(), "connected to MJPEG stream");
        Ok(ActiveStream {
            response,
            parser: MultipartParser::new(),
        })
    }
}

impl FrameSource for MjpegSource {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn stride(&self) -> usize {
        self.width as usize * 3
    }

    fn bottom_up(&self) -> bool {
        self.bottom_up
    }

    fn next_frame(&mut self) -> Result<Vec<u8>, SourceError> {
        if self.stream.is_none() {
            match self.connect() {
                Ok(stream) => self.stream = Some(stream),
                Err(e) => {
                    warn!(
                        error = %e,
                        backoff_secs = self.backoff.as_secs(),
                        "MJPEG connect failed, backing off"
                    );
                    std::thread::sleep(self.backoff);
                    self.backoff = (self.backoff * 2).min(MAX_BACKOFF);
                    return Err(e);
                }
            }
        }

        let read = match self.stream.as_mut() {
            Some(stream) => stream.read_jpeg(),
            None => Err(SourceError::StreamEnded),
        };
        match read {
            Ok(jpeg) => {
                // The backoff resets only once a frame actually arrives; a
                // camera that accepts connections but drops the stream keeps
                // doubling. A decode failure is per-frame; the stream stays up.
                self.backoff = RECONNECT_BACKOFF;
                decode_jpeg(&jpeg, self.width, self.height)
            }
            Err(e) => {
                warn!(
                    error = %e,
                    backoff_secs = self.backoff.as_secs(),
                    "MJPEG stream dropped, backing off before reconnect"
                );
                self.stream = None;
                std::thread::sleep(self.backoff);
                self.backoff = (self.backoff * 2).min(MAX_BACKOFF);
                Err(e)
            }
        }
    }
}

/// Polling fallback for cameras that only expose a still-image endpoint:
/// one GET per frame, paced by `interval`.
pub struct SnapshotSource {
    url: String,
    width: u32,
    height: u32,
    bottom_up: bool,
    interval: Duration,
    connect_timeout: Duration,
    client: Option<reqwest::blocking::Client>,
    last_fetch: Option<Instant>,
}

impl SnapshotSource {
    pub fn new(
        url: impl Into<String>,
        width: u32,
        height: u32,
        bottom_up: bool,
        interval: Duration,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            url: url.into(),
            width,
            height,
            bottom_up,
            interval,
            connect_timeout,
            client: None,
            last_fetch: None,
        }
    }

    // Lazy for the same reason as MjpegSource::connect.
    fn client(&mut self) -> Result<reqwest::blocking::Client, SourceError> {
        if let Some(client) = &self.client {
            return Ok(client.clone());
        }
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(self.connect_timeout)
            .build()
            .map_err(SourceError::HttpConnect)?;
        self.client = Some(client.clone());
        Ok(client)
    }
}

impl FrameSource for SnapshotSource {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn stride(&self) -> usize {
        self.width as usize * 3
    }

    fn bottom_up(&self) -> bool {
        self.bottom_up
    }

    fn next_frame(&mut self) -> Result<Vec<u8>, SourceError> {
        // Pace requests so a fast camera does not turn this into a busy loop.
        if let Some(last) = self.last_fetch {
            let elapsed = last.elapsed();
            if elapsed < self.interval {
                std::thread::sleep(self.interval - elapsed);
            }
        }
        self.last_fetch = Some(Instant::now());

        let response = self
            .client()?
            .get(&self.url)
            .send()
            .map_err(SourceError::HttpConnect)?;
        if !response.status().is_success() {
            return Err(SourceError::HttpStatus(response.status().as_u16()));
        }
        let body = response.bytes().map_err(SourceError::HttpBody)?;
        decode_jpeg(&body, self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(BOUNDARY);
        out.extend_from_slice(b"Content-Type: image/jpeg\r\n\r\n");
        out.extend_from_slice(payload);
        out.extend_from_slice(b"\r\n");
        out
    }

    fn drain(parser: &mut MultipartParser) -> Vec<Vec<u8>> {
        let mut parts = Vec::new();
        while let Some(jpeg) = parser.next_jpeg() {
            parts.push(jpeg);
        }
        parts
    }

    #[test]
    fn splits_parts_fed_in_tiny_chunks() {
        let mut stream = Vec::new();
        stream.extend_from_slice(&part(b"AAA"));
        stream.extend_from_slice(&part(b"BBBB"));
        stream.extend_from_slice(BOUNDARY); // terminates the second part

        let mut parser = MultipartParser::new();
        let mut parts = Vec::new();
        for chunk in stream.chunks(3) {
            parser.feed(chunk);
            parts.extend(drain(&mut parser));
        }

        assert_eq!(parts, vec![b"AAA".to_vec(), b"BBBB".to_vec()]);
    }

    #[test]
    fn skips_preamble_before_the_first_boundary() {
        let mut stream = b"HTTP junk the camera sent first".to_vec();
        stream.extend_from_slice(&part(b"payload"));
        stream.extend_from_slice(BOUNDARY);

        let mut parser = MultipartParser::new();
        parser.feed(&stream);
        assert_eq!(drain(&mut parser), vec![b"payload".to_vec()]);
    }

    #[test]
    fn keeps_payload_without_trailing_crlf() {
        let mut stream = Vec::new();
        stream.extend_from_slice(BOUNDARY);
        stream.extend_from_slice(b"X-Ignored: 1\r\n\r\n");
        stream.extend_from_slice(b"RAW"); // no \r\n before next boundary
        stream.extend_from_slice(BOUNDARY);

        let mut parser = MultipartParser::new();
        parser.feed(&stream);
        assert_eq!(drain(&mut parser), vec![b"RAW".to_vec()]);
    }

    #[test]
    fn empty_parts_are_dropped() {
        let mut stream = Vec::new();
        stream.extend_from_slice(&part(b""));
        stream.extend_from_slice(&part(b"after"));
        stream.extend_from_slice(BOUNDARY);

        let mut parser = MultipartParser::new();
        parser.feed(&stream);
        assert_eq!(drain(&mut parser), vec![b"after".to_vec()]);
    }

    #[test]
    fn decode_checks_the_configured_geometry() {
        let img = image::RgbImage::from_pixel(4, 2, image::Rgb([10, 20, 30]));
        let mut jpeg = std::io::Cursor::new(Vec::new());
        img.write_to(&mut jpeg, image::ImageFormat::Jpeg).unwrap();
        let jpeg = jpeg.into_inner();

        let raw = decode_jpeg(&jpeg, 4, 2).unwrap();
        assert_eq!(raw.len(), 4 * 2 * 3);

        let err = decode_jpeg(&jpeg, 8, 8).unwrap_err();
        assert!(matches!(
            err,
            SourceError::GeometryMismatch {
                got_w: 4,
                got_h: 2,
                want_w: 8,
                want_h: 8,
            }
        ));
    }

    #[test]
    fn garbage_bytes_fail_decode_without_panicking() {
        assert!(matches!(
            decode_jpeg(b"not a jpeg", 4, 2),
            Err(SourceError::Decode(_))
        ));
    }

    const STREAM_HEADER: &[u8] =
        b"HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace; boundary=frame\r\n\r\n";

    /// Accepts `accepts` connections; each gets the multipart header plus
    /// `body`, then a clean close.
    fn serve_then_close(body: Vec<u8>, accepts: usize) -> String {
        use std::io::Write as _;

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            for _ in 0..accepts {
                let Ok((mut socket, _)) = listener.accept() else {
                    return;
                };
                // Drain the request head so the close is a FIN, not a reset.
                let mut buf = [0u8; 1024];
                let mut head: Vec<u8> = Vec::new();
                while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => head.extend_from_slice(&buf[..n]),
                    }
                }
                let _ = socket.write_all(STREAM_HEADER);
                let _ = socket.write_all(&body);
            }
        });
        format!("http://{addr}/")
    }

    #[test]
    fn stream_drops_back_off_before_reconnecting() {
        // Server accepts and serves the header, then closes with no parts.
        let url = serve_then_close(Vec::new(), 2);
        let mut source = MjpegSource::new(url, 4, 2, false, Duration::from_secs(5));
        source.backoff = Duration::from_millis(40);

        let started = Instant::now();
        assert!(source.next_frame().is_err());
        assert!(source.next_frame().is_err());
        let elapsed = started.elapsed();

        // 40 ms slept after the first drop, 80 ms after the second.
        assert!(
            elapsed >= Duration::from_millis(120),
            "two drop cycles finished in {elapsed:?} with no backoff"
        );
        assert_eq!(source.backoff, Duration::from_millis(160));
    }

    #[test]
    fn a_received_frame_resets_the_backoff() {
        let img = image::RgbImage::from_pixel(4, 2, image::Rgb([9, 9, 9]));
        let mut jpeg = std::io::Cursor::new(Vec::new());
        img.write_to(&mut jpeg, image::ImageFormat::Jpeg).unwrap();
        let mut body = part(&jpeg.into_inner());
        body.extend_from_slice(BOUNDARY); // terminates the part

        let url = serve_then_close(body, 1);
        let mut source = MjpegSource::new(url, 4, 2, false, Duration::from_secs(5));
        source.backoff = Duration::from_millis(640);

        let raw = source.next_frame().unwrap();
        assert_eq!(raw.len(), 4 * 2 * 3);
        assert_eq!(source.backoff, RECONNECT_BACKOFF);
    }
}
