//! Incremental record decoding.
//!
//! Turns the raw bytes of one archive record into payload bytes without
//! ever holding the whole record:
//!
//! 1. gzip members are detected by their magic bytes and inflated in small
//!    slices (plain records pass through)
//! 2. WARC and HTTP header blocks are parsed as they arrive and stripped
//! 3. the body is handed on as soon as it is available, bounded by the
//!    WARC `Content-Length`
//!
//! [`Utf8Decoder`] then turns payload bytes into text, carrying split
//! multi-byte sequences between chunks.

use flate2::write::GzDecoder;
use std::io::Write;

use crate::error::{FetchError, FetchResult};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Compressed bytes handed to the inflater per write.
const INFLATE_SLICE: usize = 4 * 1024;

enum Inflater {
    /// Not enough bytes yet to tell gzip from plain
    Detecting(Vec<u8>),
    Gzip {
        decoder: Box<GzDecoder<Vec<u8>>>,
        member_done: bool,
    },
    Plain,
}

impl Inflater {
    fn feed(&mut self, input: &[u8]) -> FetchResult<Vec<u8>> {
        if let Inflater::Detecting(pending) = self {
            pending.extend_from_slice(input);
            if pending.len() < GZIP_MAGIC.len() {
                return Ok(Vec::new());
            }
            let buffered = std::mem::take(pending);
            *self = if buffered.starts_with(&GZIP_MAGIC) {
                Inflater::Gzip {
                    decoder: Box::new(GzDecoder::new(Vec::new())),
                    member_done: false,
                }
            } else {
                Inflater::Plain
            };
            return self.feed(&buffered);
        }

        match self {
            Inflater::Plain => Ok(input.to_vec()),
            Inflater::Gzip {
                decoder,
                member_done,
            } => {
                let mut rest = input;
                while !rest.is_empty() && !*member_done {
                    let slice = &rest[..rest.len().min(INFLATE_SLICE)];
                    let written = decoder
                        .write(slice)
                        .map_err(|e| FetchError::Decode(format!("gzip: {}", e)))?;
                    if written == 0 {
                        // Member finished; trailing bytes belong to nothing we fetch
                        *member_done = true;
                    }
                    rest = &rest[written..];
                }
                Ok(std::mem::take(decoder.get_mut()))
            }
            Inflater::Detecting(_) => Ok(Vec::new()),
        }
    }

    fn finish(&mut self) -> FetchResult<Vec<u8>> {
        match self {
            Inflater::Detecting(pending) => Ok(std::mem::take(pending)),
            Inflater::Plain => Ok(Vec::new()),
            Inflater::Gzip { decoder, .. } => {
                decoder
                    .try_finish()
                    .map_err(|e| FetchError::Decode(format!("truncated gzip member: {}", e)))?;
                Ok(std::mem::take(decoder.get_mut()))
            }
        }
    }
}

/// Headers of the WARC record and, for responses, of the captured HTTP
/// exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordMeta {
    pub warc_type: Option<String>,
    pub target_uri: Option<String>,
    pub http_status: Option<u16>,
    /// Content type of the payload itself
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Frame {
    /// Sniffing the first bytes
    Start,
    WarcHeader,
    /// `remaining` is what is left of the WARC block (None for bare HTTP)
    HttpHeader { remaining: Option<u64> },
    Body { remaining: Option<u64> },
    Done,
}

/// Strips WARC and HTTP headers from inflated record bytes.
struct RecordFramer {
    state: Frame,
    header: Vec<u8>,
    max_header_bytes: usize,
    meta: RecordMeta,
}

impl RecordFramer {
    fn new(max_header_bytes: usize) -> Self {
        Self {
            state: Frame::Start,
            header: Vec::new(),
            max_header_bytes,
            meta: RecordMeta::default(),
        }
    }

    fn feed(&mut self, input: &[u8], payload: &mut Vec<u8>) -> FetchResult<()> {
        let mut input = input;
        while !input.is_empty() {
            match self.state {
                Frame::Start => {
                    self.header.extend_from_slice(input);
                    input = &input[input.len()..];
                    if self.header.len() < 5 {
                        break;
                    }
                    let buffered = std::mem::take(&mut self.header);
                    self.state = sniff(&buffered);
                    self.feed(&buffered, payload)?;
                }
                Frame::WarcHeader | Frame::HttpHeader { .. } => {
                    let start = self.header.len();
                    self.header.extend_from_slice(input);
                    let Some(end) = header_end(&self.header) else {
                        if self.header.len() > self.max_header_bytes {
                            return Err(FetchError::Decode(format!(
                                "record header exceeds {} bytes",
                                self.max_header_bytes
                            )));
                        }
                        break;
                    };
                    // Bytes of `input` that belonged to the header block
                    let used = end - start;
                    let block = std::mem::take(&mut self.header);
                    self.state = self.parse_header(&block[..end])?;
                    input = &input[used..];
                }
                Frame::Body { remaining } => {
                    let take = match remaining {
                        Some(left) => input.len().min(usize::try_from(left).unwrap_or(usize::MAX)),
                        None => input.len(),
                    };
                    payload.extend_from_slice(&input[..take]);
                    input = &input[take..];
                    if let Some(left) = remaining {
                        let left = left - take as u64;
                        self.state = if left == 0 {
                            Frame::Done
                        } else {
                            Frame::Body {
                                remaining: Some(left),
                            }
                        };
                    }
                }
                Frame::Done => break,
            }
        }
        Ok(())
    }

    fn parse_header(&mut self, block: &[u8]) -> FetchResult<Frame> {
        let text = String::from_utf8_lossy(block);
        let mut lines = text.lines();
        let first = lines.next().unwrap_or_default().trim();
        let fields: Vec<(String, String)> = lines
            .filter_map(|line| line.split_once(':'))
            .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim().to_string()))
            .collect();
        let field = |name: &str| {
            fields
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.clone())
        };

        match self.state {
            Frame::WarcHeader => {
                let length: u64 = field("content-length")
                    .and_then(|v| v.parse().ok())
                    .ok_or_else(|| {
                        FetchError::Decode("WARC header without Content-Length".to_string())
                    })?;
                let warc_type = field("warc-type");
                let block_type = field("content-type").unwrap_or_default();
                self.meta.target_uri = field("warc-target-uri");
                self.meta.warc_type = warc_type.clone();

                let is_http_response = warc_type.as_deref() == Some("response")
                    && block_type.contains("application/http");
                if length == 0 {
                    Ok(Frame::Done)
                } else if is_http_response {
                    Ok(Frame::HttpHeader {
                        remaining: Some(length),
                    })
                } else {
                    self.meta.content_type = Some(block_type).filter(|t| !t.is_empty());
                    Ok(Frame::Body {
                        remaining: Some(length),
                    })
                }
            }
            Frame::HttpHeader { remaining } => {
                self.meta.http_status = first
                    .split_whitespace()
                    .nth(1)
                    .and_then(|code| code.parse().ok());
                self.meta.content_type = field("content-type");

                let remaining = match remaining {
                    Some(left) => {
                        let left = left.checked_sub(block.len() as u64).ok_or_else(|| {
                            FetchError::Decode("HTTP header overruns WARC block".to_string())
                        })?;
                        if left == 0 {
                            return Ok(Frame::Done);
                        }
                        Some(left)
                    }
                    None => None,
                };
                Ok(Frame::Body { remaining })
            }
            state => Err(FetchError::Decode(format!(
                "unexpected header in state {:?}",
                state
            ))),
        }
    }

    fn finish(&mut self, payload: &mut Vec<u8>) -> FetchResult<()> {
        match self.state {
            Frame::Start => {
                payload.append(&mut self.header);
                self.state = Frame::Done;
                Ok(())
            }
            Frame::WarcHeader | Frame::HttpHeader { .. } => {
                Err(FetchError::Decode("truncated record header".to_string()))
            }
            Frame::Body {
                remaining: Some(left),
            } => Err(FetchError::Decode(format!(
                "truncated record body ({} bytes missing)",
                left
            ))),
            Frame::Body { remaining: None } | Frame::Done => {
                self.state = Frame::Done;
                Ok(())
            }
        }
    }
}

fn sniff(head: &[u8]) -> Frame {
    if head.starts_with(b"WARC/") {
        Frame::WarcHeader
    } else if head.starts_with(b"HTTP/") {
        Frame::HttpHeader { remaining: None }
    } else {
        Frame::Body { remaining: None }
    }
}

/// Position just past the blank line ending a header block.
fn header_end(buf: &[u8]) -> Option<usize> {
    let crlf = buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4);
    let lf = buf.windows(2).position(|w| w == b"\n\n").map(|p| p + 2);
    match (crlf, lf) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// Decodes one archive record into payload bytes, chunk by chunk.
pub struct RecordDecoder {
    inflater: Inflater,
    framer: RecordFramer,
}

impl RecordDecoder {
    pub fn new(max_header_bytes: usize) -> Self {
        Self {
            inflater: Inflater::Detecting(Vec::new()),
            framer: RecordFramer::new(max_header_bytes),
        }
    }

    /// Feed raw storage bytes; returns the payload bytes they completed.
    pub fn feed(&mut self, chunk: &[u8]) -> FetchResult<Vec<u8>> {
        let inflated = self.inflater.feed(chunk)?;
        let mut payload = Vec::new();
        self.framer.feed(&inflated, &mut payload)?;
        Ok(payload)
    }

    /// Flush the inflater and check the record was complete.
    pub fn finish(&mut self) -> FetchResult<Vec<u8>> {
        let inflated = self.inflater.finish()?;
        let mut payload = Vec::new();
        self.framer.feed(&inflated, &mut payload)?;
        self.framer.finish(&mut payload)?;
        Ok(payload)
    }

    pub fn meta(&self) -> &RecordMeta {
        &self.framer.meta
    }
}

/// Incremental UTF-8 decoding with lossy replacement of invalid bytes.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `bytes`, holding back an incomplete trailing sequence.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::with_capacity(self.pending.len());
        let mut input = self.pending.as_slice();

        loop {
            match std::str::from_utf8(input) {
                Ok(valid) => {
                    out.push_str(valid);
                    input = &input[input.len()..];
                    break;
                }
                Err(e) => {
                    let (valid, rest) = input.split_at(e.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            input = &rest[len..];
                        }
                        None => {
                            input = rest;
                            break;
                        }
                    }
                }
            }
        }

        self.pending = input.to_vec();
        out
    }

    /// Flush whatever is held back.
    pub fn finish(&mut self) -> String {
        let rest = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&rest).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;

    fn warc_response(body: &str) -> Vec<u8> {
        let http = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        format!(
            "WARC/1.0\r\nWARC-Type: response\r\nWARC-Target-URI: http://example.com/\r\nContent-Type: application/http; msgtype=response\r\nContent-Length: {}\r\n\r\n{}\r\n\r\n",
            http.len(),
            http
        )
        .into_bytes()
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn decode_in_chunks(data: &[u8], chunk: usize) -> FetchResult<(Vec<u8>, RecordMeta)> {
        let mut decoder = RecordDecoder::new(64 * 1024);
        let mut payload = Vec::new();
        for piece in data.chunks(chunk) {
            payload.extend(decoder.feed(piece)?);
        }
        payload.extend(decoder.finish()?);
        Ok((payload, decoder.meta().clone()))
    }

    #[test]
    fn test_gzipped_warc_response() {
        let body = "<html>call 555-0100 today</html>";
        let record = gzip(&warc_response(body));

        for chunk in [1, 7, 64, 4096] {
            let (payload, meta) = decode_in_chunks(&record, chunk).unwrap();
            assert_eq!(payload, body.as_bytes(), "chunk size {}", chunk);
            assert_eq!(meta.http_status, Some(200));
            assert_eq!(meta.warc_type.as_deref(), Some("response"));
            assert_eq!(meta.content_type.as_deref(), Some("text/html"));
        }
    }

    #[test]
    fn test_plain_payload_passes_through() {
        let (payload, meta) = decode_in_chunks(b"just some text", 3).unwrap();
        assert_eq!(payload, b"just some text");
        assert_eq!(meta, RecordMeta::default());

        let (tiny, _) = decode_in_chunks(b"ab", 1).unwrap();
        assert_eq!(tiny, b"ab");
    }

    #[test]
    fn test_bare_http_response() {
        let data = b"HTTP/1.1 404 Not Found\r\nContent-Type: text/plain\r\n\r\ngone";
        let (payload, meta) = decode_in_chunks(data, 5).unwrap();
        assert_eq!(payload, b"gone");
        assert_eq!(meta.http_status, Some(404));
    }

    #[test]
    fn test_non_response_record_keeps_block() {
        let data = b"WARC/1.0\r\nWARC-Type: metadata\r\nContent-Type: text/plain\r\nContent-Length: 5\r\n\r\nhello\r\n\r\n";
        let (payload, _) = decode_in_chunks(data, 9).unwrap();
        assert_eq!(payload, b"hello");
    }

    #[test]
    fn test_truncated_record_is_decode_error() {
        let record = warc_response("<html>complete body</html>");
        let cut = &record[..record.len() - 12];
        assert!(matches!(
            decode_in_chunks(cut, 16),
            Err(FetchError::Decode(_))
        ));

        let gz = gzip(&record);
        let cut = &gz[..gz.len() / 2];
        assert!(matches!(decode_in_chunks(cut, 16), Err(FetchError::Decode(_))));
    }

    #[test]
    fn test_header_limit() {
        let mut data = b"WARC/1.0\r\n".to_vec();
        data.extend(std::iter::repeat(b'x').take(200));
        let mut decoder = RecordDecoder::new(64);
        assert!(matches!(decoder.feed(&data), Err(FetchError::Decode(_))));
    }

    #[test]
    fn test_utf8_split_sequences() {
        let text = "caf\u{e9} \u{1f4de} 555";
        let bytes = text.as_bytes();
        let mut decoder = Utf8Decoder::new();
        let mut out = String::new();
        for byte in bytes {
            out.push_str(&decoder.decode(std::slice::from_ref(byte)));
        }
        out.push_str(&decoder.finish());
        assert_eq!(out, text);
    }

    #[test]
    fn test_utf8_invalid_bytes_replaced() {
        let mut decoder = Utf8Decoder::new();
        let out = decoder.decode(b"ok\xffok");
        assert_eq!(out, "ok\u{fffd}ok");
        assert_eq!(decoder.decode(b"\xe2\x82"), "");
        assert_eq!(decoder.finish(), "\u{fffd}");
    }
}
