//! Incremental `multipart/x-mixed-replace` decoder
//!
//! Sans-io: bytes go into a `BytesMut` as they arrive off the socket and
//! [`MultipartDecoder::decode`] pulls out whatever complete items are
//! there. Any split of the input yields the same events.

use bytes::{Buf, Bytes, BytesMut};

use crate::error::{AppError, Result};

/// Longest part header line accepted (excluding the line terminator)
pub const MAX_HEADER_LINE: usize = 256;

/// Longest response head accepted
pub const MAX_RESPONSE_HEAD: usize = 8 * 1024;

/// Status line and the headers the client cares about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u16,
    pub content_type: Option<String>,
    pub content_length: Option<usize>,
}

impl ResponseHead {
    /// Whether the head announces a multipart stream
    pub fn is_multipart(&self) -> bool {
        self.content_type
            .as_deref()
            .map(|ct| ct.to_ascii_lowercase().starts_with("multipart/x-mixed-replace"))
            .unwrap_or(false)
    }
}

/// Something decoded off the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// The HTTP response head; always the first event
    Head(ResponseHead),
    /// One complete part body
    Part(Bytes),
}

#[derive(Debug, Clone, Copy)]
enum DecodeState {
    ResponseHead,
    PartHeaders { content_length: Option<usize> },
    Body(usize),
}

/// Stateful decoder for one HTTP multipart response
#[derive(Debug, Clone)]
pub struct MultipartDecoder {
    state: DecodeState,
    max_frame_size: usize,
}

impl MultipartDecoder {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            state: DecodeState::ResponseHead,
            max_frame_size,
        }
    }

    /// Decode the next event from `src`, consuming what it used
    ///
    /// `Ok(None)` means more input is needed. After an error the decoder is
    /// in an unspecified state and the connection should be dropped.
    pub fn decode(&mut self, src: &mut BytesMut) -> Result<Option<StreamEvent>> {
        loop {
            match self.state {
                DecodeState::ResponseHead => {
                    return match self.decode_head(src)? {
                        Some(head) => {
                            self.state = DecodeState::PartHeaders {
                                content_length: None,
                            };
                            Ok(Some(StreamEvent::Head(head)))
                        }
                        None => Ok(None),
                    };
                }
                DecodeState::PartHeaders { content_length } => {
                    let Some(line) = take_line(src)? else {
                        return Ok(None);
                    };
                    self.state = self.on_header_line(&line, content_length)?;
                }
                DecodeState::Body(n) => {
                    if src.len() < n {
                        src.reserve(n - src.len());
                        return Ok(None);
                    }
                    let data = src.split_to(n).freeze();
                    self.state = DecodeState::PartHeaders {
                        content_length: None,
                    };
                    return Ok(Some(StreamEvent::Part(data)));
                }
            }
        }
    }

    fn decode_head(&self, src: &mut BytesMut) -> Result<Option<ResponseHead>> {
        let Some(end) = find_head_end(src) else {
            if src.len() > MAX_RESPONSE_HEAD {
                return Err(AppError::Protocol("response head too large".to_string()));
            }
            return Ok(None);
        };

        let head = parse_response_head(&src[..end])?;
        src.advance(end);
        Ok(Some(head))
    }

    fn on_header_line(&self, line: &str, content_length: Option<usize>) -> Result<DecodeState> {
        if line.is_empty() {
            // Blank lines before a length is known are separators, not the
            // end of a part's headers
            return Ok(match content_length {
                Some(n) => DecodeState::Body(n),
                None => DecodeState::PartHeaders { content_length },
            });
        }

        match header_value(line, "content-length") {
            Some(value) => {
                let n = self.check_length(value)?;
                Ok(DecodeState::PartHeaders {
                    content_length: Some(n),
                })
            }
            // Boundary, Content-Type and anything else
            None => Ok(DecodeState::PartHeaders { content_length }),
        }
    }

    fn check_length(&self, value: &str) -> Result<usize> {
        let declared: usize = value
            .parse()
            .map_err(|_| AppError::Protocol(format!("invalid Content-Length: {:?}", value)))?;
        if declared == 0 || declared > self.max_frame_size {
            return Err(AppError::FrameTooLarge {
                declared,
                max: self.max_frame_size,
            });
        }
        Ok(declared)
    }
}

/// Split one line off `src`, without its `\n` or `\r\n`
fn take_line(src: &mut BytesMut) -> Result<Option<String>> {
    let Some(pos) = src.iter().position(|&b| b == b'\n') else {
        if src.len() > MAX_HEADER_LINE + 1 {
            return Err(AppError::Protocol("header line too long".to_string()));
        }
        return Ok(None);
    };

    let raw = src.split_to(pos + 1);
    let mut line = &raw[..pos];
    if line.last() == Some(&b'\r') {
        line = &line[..line.len() - 1];
    }
    if line.len() > MAX_HEADER_LINE {
        return Err(AppError::Protocol("header line too long".to_string()));
    }
    Ok(Some(String::from_utf8_lossy(line).into_owned()))
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    let crlf = buf
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|pos| pos + 4);
    let lf = buf.windows(2).position(|w| w == b"\n\n").map(|pos| pos + 2);
    match (crlf, lf) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// Value of `name` if `line` is that header (name matched case-insensitively)
fn header_value<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    let (key, value) = line.split_once(':')?;
    if key.trim().eq_ignore_ascii_case(name) {
        Some(value.trim())
    } else {
        None
    }
}

/// Parse an HTTP response head (status line plus headers)
pub fn parse_response_head(head: &[u8]) -> Result<ResponseHead> {
    let text = String::from_utf8_lossy(head);
    let mut lines = text.lines();

    let status_line = lines
        .next()
        .ok_or_else(|| AppError::Protocol("empty response".to_string()))?;
    let mut parts = status_line.split_whitespace();
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/") {
        return Err(AppError::Protocol(format!(
            "invalid status line: {:?}",
            status_line
        )));
    }
    let status = parts
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| AppError::Protocol(format!("invalid status line: {:?}", status_line)))?;

    let mut response = ResponseHead {
        status,
        content_type: None,
        content_length: None,
    };
    for line in lines {
        if let Some(value) = header_value(line, "content-type") {
            response.content_type = Some(value.to_string());
        } else if let Some(value) = header_value(line, "content-length") {
            response.content_length = Some(value.parse().map_err(|_| {
                AppError::Protocol(format!("invalid Content-Length: {:?}", value))
            })?);
        }
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEAD: &[u8] = b"HTTP/1.1 200 OK\r\n\
Content-Type: multipart/x-mixed-replace; boundary=frame\r\n\
Cache-Control: no-cache, no-store\r\n\
Connection: close\r\n\r\n";

    fn part(data: &[u8]) -> Vec<u8> {
        let mut out = format!(
            "--frame\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
            data.len()
        )
        .into_bytes();
        out.extend_from_slice(data);
        out.extend_from_slice(b"\r\n");
        out
    }

    fn decode_all(decoder: &mut MultipartDecoder, buf: &mut BytesMut) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(event) = decoder.decode(buf).unwrap() {
            events.push(event);
        }
        events
    }

    fn stream_bytes(parts: &[&[u8]]) -> Vec<u8> {
        let mut wire = HEAD.to_vec();
        for data in parts {
            wire.extend(part(data));
        }
        wire
    }

    #[test]
    fn test_decode_head_and_parts() {
        let mut decoder = MultipartDecoder::new(1024);
        let mut buf = BytesMut::from(&stream_bytes(&[b"first", b"second"])[..]);

        let events = decode_all(&mut decoder, &mut buf);
        assert_eq!(events.len(), 3);
        match &events[0] {
            StreamEvent::Head(head) => {
                assert_eq!(head.status, 200);
                assert!(head.is_multipart());
            }
            other => panic!("expected head, got {:?}", other),
        }
        assert_eq!(events[1], StreamEvent::Part(Bytes::from_static(b"first")));
        assert_eq!(events[2], StreamEvent::Part(Bytes::from_static(b"second")));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_any_chunking_gives_same_parts() {
        let payloads: Vec<Vec<u8>> = (0..5u8).map(|i| vec![i; 100 + i as usize * 37]).collect();
        let refs: Vec<&[u8]> = payloads.iter().map(|p| p.as_slice()).collect();
        let wire = stream_bytes(&refs);

        for chunk_size in [1, 2, 3, 7, 64, wire.len()] {
            let mut decoder = MultipartDecoder::new(4096);
            let mut buf = BytesMut::new();
            let mut parts = Vec::new();

            for chunk in wire.chunks(chunk_size) {
                buf.extend_from_slice(chunk);
                while let Some(event) = decoder.decode(&mut buf).unwrap() {
                    if let StreamEvent::Part(data) = event {
                        parts.push(data.to_vec());
                    }
                }
            }
            assert_eq!(parts, payloads, "chunk size {}", chunk_size);
        }
    }

    #[test]
    fn test_content_length_case_insensitive_and_bare_newlines() {
        let mut decoder = MultipartDecoder::new(1024);
        let mut buf = BytesMut::from(
            &b"HTTP/1.0 200 OK\nContent-Type: multipart/x-mixed-replace;boundary=x\n\n\
\n--x\ncontent-type: image/jpeg\nCONTENT-LENGTH:   4\n\nabcd\n"[..],
        );

        let events = decode_all(&mut decoder, &mut buf);
        assert_eq!(events.len(), 2);
        assert_eq!(events[1], StreamEvent::Part(Bytes::from_static(b"abcd")));
    }

    #[test]
    fn test_oversized_length_rejected() {
        let mut decoder = MultipartDecoder::new(1024 * 1024);
        let mut buf = BytesMut::from(HEAD);
        buf.extend_from_slice(b"--frame\r\nContent-Length: 2097152\r\n\r\n");

        assert!(matches!(
            decoder.decode(&mut buf),
            Ok(Some(StreamEvent::Head(_)))
        ));
        let err = decoder.decode(&mut buf).unwrap_err();
        assert!(matches!(
            err,
            AppError::FrameTooLarge {
                declared: 2097152,
                max: 1048576
            }
        ));
        assert!(err.is_protocol());
    }

    #[test]
    fn test_zero_and_garbage_lengths_rejected() {
        let headers: [&[u8]; 3] = [
            b"Content-Length: 0\r\n",
            b"Content-Length: -5\r\n",
            b"Content-Length: ten\r\n",
        ];
        for header in headers {
            let mut decoder = MultipartDecoder::new(1024);
            let mut buf = BytesMut::from(HEAD);
            buf.extend_from_slice(header);
            decoder.decode(&mut buf).unwrap();
            let err = decoder.decode(&mut buf).unwrap_err();
            assert!(err.is_protocol(), "{:?} should be a protocol error", header);
        }
    }

    #[test]
    fn test_long_header_line_rejected() {
        let mut decoder = MultipartDecoder::new(1024);
        let mut buf = BytesMut::from(HEAD);
        decoder.decode(&mut buf).unwrap();

        // Unterminated and already too long
        buf.extend_from_slice(&[b'x'; MAX_HEADER_LINE + 10]);
        assert!(matches!(decoder.decode(&mut buf), Err(AppError::Protocol(_))));
    }

    #[test]
    fn test_body_is_not_parsed_as_headers() {
        // A body containing CRLFs and a fake length header is taken verbatim
        let body = b"\r\nContent-Length: 99999999\r\n\r\n";
        let mut decoder = MultipartDecoder::new(64);
        let mut buf = BytesMut::from(&stream_bytes(&[body])[..]);

        let events = decode_all(&mut decoder, &mut buf);
        assert_eq!(events[1], StreamEvent::Part(Bytes::copy_from_slice(body)));
    }

    #[test]
    fn test_parse_response_head() {
        let head = parse_response_head(
            b"HTTP/1.1 503 Service Unavailable\r\nContent-Type: text/plain\r\nContent-Length: 22\r\n\r\n",
        )
        .unwrap();
        assert_eq!(head.status, 503);
        assert_eq!(head.content_type.as_deref(), Some("text/plain"));
        assert_eq!(head.content_length, Some(22));
        assert!(!head.is_multipart());

        assert!(parse_response_head(b"garbage\r\n\r\n").is_err());
        assert!(parse_response_head(b"HTTP/1.1 abc\r\n\r\n").is_err());
    }
}
