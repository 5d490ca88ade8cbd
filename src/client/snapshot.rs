use bytes::Bytes;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use super::endpoint::StreamEndpoint;
use super::multipart::parse_response_head;
use crate::error::{AppError, Result};
use crate::stream::http::find_bytes;

/// Path served by the snapshot route
pub const SNAPSHOT_PATH: &str = "/snapshot";

/// Largest snapshot response accepted
const MAX_SNAPSHOT_RESPONSE: u64 = 16 * 1024 * 1024;

/// Fetch one JPEG from the server's snapshot route
///
/// Only host and port of `endpoint` are used. A non-200 answer (503 before
/// the first frame is published) comes back as [`AppError::HttpStatus`].
pub async fn fetch_snapshot(endpoint: &StreamEndpoint, timeout: Duration) -> Result<Bytes> {
    let target = endpoint.with_path(SNAPSHOT_PATH);
    tokio::time::timeout(timeout, fetch(&target))
        .await
        .map_err(|_| AppError::Timeout(format!("snapshot from {}", target)))?
}

async fn fetch(target: &StreamEndpoint) -> Result<Bytes> {
    let mut stream = TcpStream::connect(target.address()).await?;
    stream
        .write_all(target.request("image/jpeg").as_bytes())
        .await?;

    let mut response = Vec::new();
    (&mut stream)
        .take(MAX_SNAPSHOT_RESPONSE)
        .read_to_end(&mut response)
        .await?;

    let head_end = find_bytes(&response, b"\r\n\r\n")
        .map(|pos| pos + 4)
        .ok_or_else(|| AppError::Protocol("incomplete response head".to_string()))?;
    let head = parse_response_head(&response[..head_end])?;
    if head.status != 200 {
        return Err(AppError::HttpStatus(head.status));
    }

    let mut body = Bytes::from(response).split_off(head_end);
    if let Some(len) = head.content_length {
        if body.len() < len {
            return Err(AppError::Protocol(format!(
                "truncated snapshot: {} of {} bytes",
                body.len(),
                len
            )));
        }
        body.truncate(len);
    }

    debug!("Fetched {} byte snapshot from {}", body.len(), target);
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::stream::StreamServer;
    use crate::video::{Frame, LatestFrameBuffer};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_fetch_snapshot() {
        let buffer = Arc::new(LatestFrameBuffer::new());
        let server = StreamServer::new(
            ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 0,
                ..Default::default()
            },
            buffer.clone(),
        );
        let addr = server.start().await.unwrap();
        let endpoint = StreamEndpoint::new("127.0.0.1", addr.port(), "/stream");

        let result = fetch_snapshot(&endpoint, Duration::from_secs(2)).await;
        assert!(matches!(result, Err(AppError::HttpStatus(503))));

        buffer.publish(Frame::from_vec(b"\xFF\xD8snapshot\xFF\xD9".to_vec()));
        let body = fetch_snapshot(&endpoint, Duration::from_secs(2)).await.unwrap();
        assert_eq!(&body[..], b"\xFF\xD8snapshot\xFF\xD9");

        server.stop();
    }

    #[tokio::test]
    async fn test_connection_refused() {
        // Bind and drop to get a port nobody listens on
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let endpoint = StreamEndpoint::new("127.0.0.1", port, "/");
        let result = fetch_snapshot(&endpoint, Duration::from_secs(2)).await;
        assert!(matches!(result, Err(AppError::Io(_))));
    }
}
