//! MJPEG stream server
//!
//! One tokio task per connection. Every stream session pulls from the
//! shared [`LatestFrameBuffer`] at its own pace, so a slow viewer only
//! ever skips frames and never holds back the producer or other viewers.

use bytes::BytesMut;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::http::{self, Route};
use crate::config::ServerConfig;
use crate::error::{AppError, Result};
use crate::utils::{bind_tcp_listener, resolve_bind_addr};
use crate::video::LatestFrameBuffer;

/// Server statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerStats {
    pub running: bool,
    /// Live `/stream` sessions
    pub clients: usize,
    /// Latest published frame version
    pub version: u64,
    pub local_addr: Option<SocketAddr>,
}

/// Keeps the live-client counter in step with the session's lifetime
pub(crate) struct ClientGuard {
    counter: Arc<AtomicUsize>,
}

impl ClientGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self { counter }
    }
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

/// State shared by the accept loop and every session
struct Shared {
    buffer: Arc<LatestFrameBuffer>,
    running: AtomicBool,
    clients: Arc<AtomicUsize>,
    wait_timeout: Duration,
    request_timeout: Duration,
}

pub struct StreamServer {
    config: ServerConfig,
    shared: Arc<Shared>,
    shutdown_tx: broadcast::Sender<()>,
    local_addr: Mutex<Option<SocketAddr>>,
    server_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
    client_handles: Arc<Mutex<Vec<tokio::task::JoinHandle<()>>>>,
}

impl StreamServer {
    pub fn new(config: ServerConfig, buffer: Arc<LatestFrameBuffer>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let shared = Arc::new(Shared {
            buffer,
            running: AtomicBool::new(false),
            clients: Arc::new(AtomicUsize::new(0)),
            wait_timeout: config.wait_timeout(),
            request_timeout: config.request_timeout(),
        });

        Self {
            config,
            shared,
            shutdown_tx,
            local_addr: Mutex::new(None),
            server_handle: Mutex::new(None),
            client_handles: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Bind and start accepting; returns the bound address
    ///
    /// Must be called from within a tokio runtime. A bind failure is
    /// returned as is and leaves the server stopped.
    pub async fn start(&self) -> Result<SocketAddr> {
        if self.shared.running.load(Ordering::SeqCst) {
            return Err(AppError::AlreadyRunning("stream server"));
        }

        let bind_addr = resolve_bind_addr(&self.config.bind_address, self.config.port)?;
        let std_listener = bind_tcp_listener(bind_addr).map_err(|e| {
            AppError::Io(std::io::Error::new(
                e.kind(),
                format!("stream server bind {} failed: {}", bind_addr, e),
            ))
        })?;
        let listener = TcpListener::from_std(std_listener)?;
        let local_addr = listener.local_addr()?;

        self.shared.running.store(true, Ordering::SeqCst);
        *self.local_addr.lock() = Some(local_addr);

        let shared = self.shared.clone();
        let client_handles = self.client_handles.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            info!("Stream server listening on http://{}", local_addr);

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("Stream server shutdown signal received");
                        break;
                    }
                    result = listener.accept() => {
                        match result {
                            Ok((stream, addr)) => {
                                let shared = shared.clone();
                                let handle = tokio::spawn(async move {
                                    handle_connection(stream, addr, shared).await;
                                });
                                let mut handles = client_handles.lock();
                                handles.retain(|task| !task.is_finished());
                                handles.push(handle);
                            }
                            Err(e) => {
                                warn!("Stream server accept failed: {}", e);
                            }
                        }
                    }
                }
            }

            info!("Stream server stopped");
        });

        *self.server_handle.lock() = Some(handle);
        Ok(local_addr)
    }

    /// Stop accepting and close every session
    pub fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }

        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.server_handle.lock().take() {
            handle.abort();
        }
        for handle in self.client_handles.lock().drain(..) {
            handle.abort();
        }
        *self.local_addr.lock() = None;
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Number of live stream sessions
    pub fn client_count(&self) -> usize {
        self.shared.clients.load(Ordering::SeqCst)
    }

    /// Address actually bound, while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            running: self.is_running(),
            clients: self.client_count(),
            version: self.shared.buffer.version(),
            local_addr: self.local_addr(),
        }
    }
}

impl Drop for StreamServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn handle_connection(mut stream: TcpStream, addr: SocketAddr, shared: Arc<Shared>) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Failed to set TCP_NODELAY for {}: {}", addr, e);
    }

    if let Err(e) = serve(&mut stream, addr, &shared).await {
        debug!("Connection {} closed: {}", addr, e);
    }
}

/// Serve one connection on any byte stream
async fn serve<S>(stream: &mut S, addr: SocketAddr, shared: &Shared) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let Some(request) = http::read_request(stream, shared.request_timeout).await? else {
        debug!("Connection {} sent no request", addr);
        return Ok(());
    };
    debug!("Connection {} requested {}", addr, request.route.as_str());

    let response = match request.route {
        Route::Stream if request.head_only => {
            return http::send_response(stream, http::STREAM_RESPONSE_HEAD).await;
        }
        Route::Stream => return stream_session(stream, addr, shared).await,
        Route::Snapshot => http::snapshot_response(shared.buffer.latest().as_ref()),
        Route::Index => http::index_response(),
    };

    if request.head_only {
        http::send_response(stream, http::response_head(&response)).await
    } else {
        http::send_response(stream, &response).await
    }
}

async fn stream_session<S>(stream: &mut S, addr: SocketAddr, shared: &Shared) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let _guard = ClientGuard::new(shared.clients.clone());
    info!(
        "Stream client {} connected (total: {})",
        addr,
        shared.clients.load(Ordering::SeqCst)
    );

    let started = Instant::now();
    let mut frames_sent = 0u64;
    let result = stream_frames(stream, shared, &mut frames_sent).await;

    let elapsed = started.elapsed().as_secs_f64();
    let avg_fps = if elapsed > 0.0 {
        frames_sent as f64 / elapsed
    } else {
        0.0
    };
    info!(
        "Stream client {} disconnected after {:.1}s: {} frames sent, {:.1} fps avg",
        addr, elapsed, frames_sent, avg_fps
    );
    result
}

async fn stream_frames<S>(stream: &mut S, shared: &Shared, frames_sent: &mut u64) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(http::STREAM_RESPONSE_HEAD).await?;
    stream.flush().await?;

    let mut last_version = 0u64;
    let mut part = BytesMut::new();

    while shared.running.load(Ordering::SeqCst) {
        let Some(frame) = shared.buffer.wait_next(last_version, shared.wait_timeout).await else {
            continue;
        };

        part.clear();
        http::encode_part(frame.data(), &mut part);
        stream.write_all(&part).await?;
        stream.flush().await?;

        last_version = frame.version;
        *frames_sent += 1;
    }

    Ok(())
}
