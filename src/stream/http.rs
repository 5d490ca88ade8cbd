//! Minimal HTTP/1.1 plumbing for the stream server
//!
//! The server only needs the method and path, so the request head is read
//! raw and everything but the request line is discarded. Responses are
//! prebuilt byte blobs.

use bytes::{BufMut, Bytes, BytesMut};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::video::Frame;

/// Multipart boundary token
pub const BOUNDARY: &str = "frame";

/// Largest request head accepted before giving up on it
pub const MAX_REQUEST_HEAD: usize = 8 * 1024;

/// Response head of a `/stream` session, sent once before the first part
pub const STREAM_RESPONSE_HEAD: &[u8] = b"HTTP/1.1 200 OK\r\n\
Content-Type: multipart/x-mixed-replace; boundary=frame\r\n\
Cache-Control: no-cache, no-store\r\n\
Connection: close\r\n\
\r\n";

const NO_FRAME_BODY: &str = "No frame available yet";

const INDEX_HTML: &str = "<!DOCTYPE html>\n\
<html>\n\
<head><title>glass-stream</title></head>\n\
<body style=\"margin:0;background:#000\">\n\
<img src=\"/stream\" style=\"width:100%;height:auto\" alt=\"live stream\">\n\
</body>\n\
</html>\n";

/// What a connection asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// `/stream`: endless multipart JPEG response
    Stream,
    /// `/snapshot`: the latest frame as a single JPEG
    Snapshot,
    /// Anything else: the static viewer page
    Index,
}

impl Route {
    /// Match a request path; query string and fragment are ignored
    pub fn from_path(path: &str) -> Self {
        let path = path
            .split(|c: char| c == '?' || c == '#')
            .next()
            .unwrap_or_default();
        match path {
            "/stream" => Route::Stream,
            "/snapshot" => Route::Snapshot,
            _ => Route::Index,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Route::Stream => "stream",
            Route::Snapshot => "snapshot",
            Route::Index => "index",
        }
    }
}

/// A request as far as the server cares about it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    pub route: Route,
    /// `HEAD` request: answer with the response head only
    pub head_only: bool,
}

impl Request {
    pub fn new(route: Route) -> Self {
        Self {
            route,
            head_only: false,
        }
    }
}

/// Parse a request line such as `GET /stream HTTP/1.1`
///
/// Only the method and path matter; a line without a path falls back to
/// the index.
pub fn parse_request_line(line: &str) -> Request {
    let mut parts = line.split_whitespace();
    let method = parts.next();
    let route = match parts.next() {
        Some(path) if path.starts_with('/') => Route::from_path(path),
        _ => Route::Index,
    };
    Request {
        route,
        head_only: method == Some("HEAD"),
    }
}

/// Read a request head and parse its request line
///
/// Returns `Ok(None)` only when the peer sent nothing at all before closing
/// or before `timeout`. A peer that closes mid-head is served whatever its
/// first line names, as if that line had been terminated. A head that
/// overflows [`MAX_REQUEST_HEAD`] or stalls is answered with the index page.
pub async fn read_request<S: AsyncRead + Unpin>(
    stream: &mut S,
    timeout: Duration,
) -> std::io::Result<Option<Request>> {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut buf = BytesMut::with_capacity(1024);

    loop {
        if let Some(end) = find_head_end(&buf) {
            return Ok(Some(parse_request_line(&request_line(&buf[..end]))));
        }

        if buf.len() >= MAX_REQUEST_HEAD {
            return Ok(Some(Request::new(Route::Index)));
        }

        let read = tokio::time::timeout_at(deadline, stream.read_buf(&mut buf)).await;
        match read {
            Ok(Ok(0)) if buf.is_empty() => return Ok(None),
            Ok(Ok(0)) => return Ok(Some(parse_request_line(&request_line(&buf)))),
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) if buf.is_empty() => return Ok(None),
            Err(_) => return Ok(Some(Request::new(Route::Index))),
        }
    }
}

/// Offset just past the blank line ending the head, for `\r\n` or bare `\n`
fn find_head_end(buf: &[u8]) -> Option<usize> {
    let crlf = find_bytes(buf, b"\r\n\r\n").map(|pos| pos + 4);
    let lf = find_bytes(buf, b"\n\n").map(|pos| pos + 2);
    match (crlf, lf) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// First line of `buf`, or all of it when no line ending arrived
fn request_line(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == b'\n').unwrap_or(buf.len());
    let line = String::from_utf8_lossy(&buf[..end]);
    line.trim_end_matches('\r').to_string()
}

pub(crate) fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Append one multipart part carrying `data` to `buf`
pub fn encode_part(data: &[u8], buf: &mut BytesMut) {
    buf.reserve(96 + data.len());

    buf.put_slice(b"--");
    buf.put_slice(BOUNDARY.as_bytes());
    buf.put_slice(b"\r\n");
    buf.put_slice(b"Content-Type: image/jpeg\r\n");
    buf.put_slice(format!("Content-Length: {}\r\n", data.len()).as_bytes());
    buf.put_slice(b"\r\n");

    buf.put_slice(data);
    buf.put_slice(b"\r\n");
}

/// Full response for `/snapshot`
pub fn snapshot_response(frame: Option<&Frame>) -> Bytes {
    match frame {
        Some(frame) => {
            let mut buf = BytesMut::with_capacity(160 + frame.len());
            buf.put_slice(b"HTTP/1.1 200 OK\r\n");
            buf.put_slice(b"Content-Type: image/jpeg\r\n");
            buf.put_slice(format!("Content-Length: {}\r\n", frame.len()).as_bytes());
            buf.put_slice(b"Cache-Control: no-cache, no-store\r\n");
            buf.put_slice(b"Connection: close\r\n\r\n");
            buf.put_slice(frame.data());
            buf.freeze()
        }
        None => simple_response(
            "503 Service Unavailable",
            "text/plain; charset=utf-8",
            NO_FRAME_BODY.as_bytes(),
        ),
    }
}

/// Full response for every path other than `/stream` and `/snapshot`
pub fn index_response() -> Bytes {
    simple_response("200 OK", "text/html; charset=utf-8", INDEX_HTML.as_bytes())
}

fn simple_response(status: &str, content_type: &str, body: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(128 + body.len());
    buf.put_slice(format!("HTTP/1.1 {}\r\n", status).as_bytes());
    buf.put_slice(format!("Content-Type: {}\r\n", content_type).as_bytes());
    buf.put_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
    buf.put_slice(b"Connection: close\r\n\r\n");
    buf.put_slice(body);
    buf.freeze()
}

/// Status line and headers of a prebuilt response, without the body
pub fn response_head(response: &[u8]) -> &[u8] {
    match find_bytes(response, b"\r\n\r\n") {
        Some(pos) => &response[..pos + 4],
        None => response,
    }
}

/// Write a whole response and flush it
pub async fn send_response<W: AsyncWrite + Unpin>(
    stream: &mut W,
    response: &[u8],
) -> std::io::Result<()> {
    stream.write_all(response).await?;
    stream.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[test]
    fn test_route_from_path() {
        assert_eq!(Route::from_path("/stream"), Route::Stream);
        assert_eq!(Route::from_path("/stream?t=123"), Route::Stream);
        assert_eq!(Route::from_path("/snapshot"), Route::Snapshot);
        assert_eq!(Route::from_path("/snapshot#x"), Route::Snapshot);
        assert_eq!(Route::from_path("/"), Route::Index);
        assert_eq!(Route::from_path("/streams"), Route::Index);
    }

    #[test]
    fn test_parse_request_line() {
        assert_eq!(parse_request_line("GET /stream HTTP/1.1").route, Route::Stream);
        assert_eq!(parse_request_line("GET").route, Route::Index);
        assert_eq!(parse_request_line("").route, Route::Index);
        assert_eq!(parse_request_line("\u{1}\u{2} garbage").route, Route::Index);

        let head = parse_request_line("HEAD /snapshot HTTP/1.0");
        assert_eq!(head.route, Route::Snapshot);
        assert!(head.head_only);
        assert!(!parse_request_line("GET /snapshot HTTP/1.0").head_only);
    }

    #[test]
    fn test_response_head_drops_body() {
        let frame = Frame::from_vec(vec![0xFF, 0xD8, 1, 2, 3]);
        let resp = snapshot_response(Some(&frame));
        let head = response_head(&resp);
        assert!(head.ends_with(b"Content-Length: 5\r\nCache-Control: no-cache, no-store\r\nConnection: close\r\n\r\n"));
        assert_eq!(head.len(), resp.len() - 5);
        assert_eq!(response_head(STREAM_RESPONSE_HEAD), STREAM_RESPONSE_HEAD);
    }

    #[test]
    fn test_encode_part_layout() {
        let mut buf = BytesMut::new();
        encode_part(b"JPEGDATA", &mut buf);
        assert_eq!(
            &buf[..],
            b"--frame\r\nContent-Type: image/jpeg\r\nContent-Length: 8\r\n\r\nJPEGDATA\r\n"
        );
    }

    #[test]
    fn test_snapshot_without_frame() {
        let resp = snapshot_response(None);
        let text = String::from_utf8(resp.to_vec()).unwrap();
        assert!(text.starts_with("HTTP/1.1 503 Service Unavailable\r\n"));
        assert!(text.contains("Content-Type: text/plain"));
        assert!(text.ends_with("\r\n\r\nNo frame available yet"));
    }

    #[test]
    fn test_snapshot_with_frame() {
        let frame = Frame::from_vec(vec![0xFF, 0xD8, 1, 2, 3]);
        let resp = snapshot_response(Some(&frame));
        assert!(resp.starts_with(b"HTTP/1.1 200 OK\r\n"));
        let head_end = find_bytes(&resp, b"\r\n\r\n").unwrap() + 4;
        let head = std::str::from_utf8(&resp[..head_end]).unwrap();
        assert!(head.contains("Content-Type: image/jpeg\r\n"));
        assert!(head.contains("Content-Length: 5\r\n"));
        assert_eq!(&resp[head_end..], &[0xFF, 0xD8, 1, 2, 3]);
    }

    #[test]
    fn test_index_embeds_stream() {
        let resp = index_response();
        let text = String::from_utf8(resp.to_vec()).unwrap();
        assert!(text.contains("text/html"));
        assert!(text.contains("<img src=\"/stream\""));
    }

    async fn read_route<S: AsyncRead + Unpin>(stream: &mut S, timeout: Duration) -> Option<Route> {
        read_request(stream, timeout)
            .await
            .unwrap()
            .map(|request| request.route)
    }

    #[tokio::test]
    async fn test_read_request_full_head() {
        let (mut client, mut server) = duplex(1024);
        client
            .write_all(b"GET /snapshot HTTP/1.1\r\nHost: x\r\nAccept: */*\r\n\r\n")
            .await
            .unwrap();

        let request = read_request(&mut server, Duration::from_secs(1)).await.unwrap();
        assert_eq!(request, Some(Request::new(Route::Snapshot)));
    }

    #[tokio::test]
    async fn test_read_request_head_method() {
        let (mut client, mut server) = duplex(1024);
        client.write_all(b"HEAD / HTTP/1.1\r\n\r\n").await.unwrap();

        let request = read_request(&mut server, Duration::from_secs(1)).await.unwrap();
        assert_eq!(
            request,
            Some(Request {
                route: Route::Index,
                head_only: true
            })
        );
    }

    #[tokio::test]
    async fn test_read_route_bare_newlines_in_pieces() {
        let (mut client, mut server) = duplex(1024);
        let reader =
            tokio::spawn(async move { read_route(&mut server, Duration::from_secs(1)).await });

        let pieces: [&[u8]; 4] = [b"GET /str", b"eam HTTP/1.1\n", b"Host: x\n", b"\n"];
        for piece in pieces {
            client.write_all(piece).await.unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(reader.await.unwrap(), Some(Route::Stream));
    }

    #[tokio::test]
    async fn test_read_route_split_reads() {
        let mut mock = tokio_test::io::Builder::new()
            .read(b"GET /snapshot?ts=1 HTTP/1.1\r\n")
            .read(b"Host: cam\r\n\r\n")
            .build();
        let route = read_route(&mut mock, Duration::from_secs(1)).await;
        assert_eq!(route, Some(Route::Snapshot));
    }

    #[tokio::test]
    async fn test_send_response_writes_everything() {
        let response = index_response();
        let mut mock = tokio_test::io::Builder::new().write(&response).build();
        send_response(&mut mock, &response).await.unwrap();
    }

    #[tokio::test]
    async fn test_read_route_immediate_close() {
        let (client, mut server) = duplex(1024);
        drop(client);
        let route = read_route(&mut server, Duration::from_secs(1)).await;
        assert_eq!(route, None);
    }

    #[tokio::test]
    async fn test_read_route_unterminated_garbage_then_close() {
        let (mut client, mut server) = duplex(1024);
        client.write_all(b"garbage").await.unwrap();
        drop(client);
        let route = read_route(&mut server, Duration::from_secs(1)).await;
        assert_eq!(route, Some(Route::Index));
    }

    #[tokio::test]
    async fn test_read_route_unterminated_line_then_close() {
        let (mut client, mut server) = duplex(1024);
        client.write_all(b"GET /snapshot HTTP/1.1").await.unwrap();
        drop(client);
        let route = read_route(&mut server, Duration::from_secs(1)).await;
        assert_eq!(route, Some(Route::Snapshot));
    }

    #[tokio::test]
    async fn test_read_route_unterminated_line_times_out_to_index() {
        let (mut client, mut server) = duplex(1024);
        client.write_all(b"GET /stream").await.unwrap();
        let route = read_route(&mut server, Duration::from_millis(50)).await;
        assert_eq!(route, Some(Route::Index));
        drop(client);
    }

    #[tokio::test]
    async fn test_read_route_stalled_head_falls_back_to_index() {
        let (mut client, mut server) = duplex(1024);
        client.write_all(b"GET /stream HTTP/1.1\r\nHost: x\r\n").await.unwrap();

        let route = read_route(&mut server, Duration::from_millis(50)).await;
        assert_eq!(route, Some(Route::Index));
        drop(client);
    }

    #[tokio::test]
    async fn test_read_route_silent_peer_times_out() {
        let (client, mut server) = duplex(1024);
        let route = read_route(&mut server, Duration::from_millis(50)).await;
        assert_eq!(route, None);
        drop(client);
    }

    #[tokio::test]
    async fn test_read_route_oversized_head() {
        let (mut client, mut server) = duplex(64 * 1024);
        let mut head = b"GET /stream HTTP/1.1\r\n".to_vec();
        head.extend(std::iter::repeat(b'a').take(MAX_REQUEST_HEAD * 2));
        client.write_all(&head).await.unwrap();

        let route = read_route(&mut server, Duration::from_secs(1)).await;
        assert_eq!(route, Some(Route::Index));
    }
}
