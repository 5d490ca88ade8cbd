//! MJPEG viewer client
//!
//! Connects to a stream endpoint, decodes every part and hands the images
//! to a [`Renderer`]. Any failure drops the connection, and after a fixed
//! delay the client connects again, until [`StreamClient::stop`] is called.
//!
//! ```text
//! Disconnected ──start──▶ Connecting ──200 + head──▶ Connected
//!      ▲                      │                         │
//!      └──── failure ─────────┴──── read/parse error ───┘
//!      └──── after reconnect delay ──▶ Connecting
//! ```

use bytes::BytesMut;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::endpoint::StreamEndpoint;
use super::multipart::{MultipartDecoder, StreamEvent};
use super::render::Renderer;
use crate::config::ClientConfig;
use crate::error::{AppError, Result};
use crate::utils::{FpsWindow, LogThrottler};
use crate::video::{FrameDecoder, MjpegTurboDecoder};
use crate::warn_throttled;

const ACCEPT: &str = "multipart/x-mixed-replace";

/// Viewer connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}

/// Notifications for an observer such as a UI status line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    StateChanged(ConnectionState),
    /// Frames rendered during the last full one-second window
    Fps(u32),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientStats {
    pub state: ConnectionState,
    pub frames_rendered: u64,
    pub decode_failures: u64,
    pub connection_attempts: u64,
    /// Connections dropped because the server broke the wire format
    pub protocol_errors: u64,
    pub fps: u32,
}

/// State shared between the handle and the receive task
struct Inner {
    state_tx: watch::Sender<ConnectionState>,
    fps_tx: watch::Sender<u32>,
    event_tx: broadcast::Sender<ClientEvent>,
    frames_rendered: AtomicU64,
    decode_failures: AtomicU64,
    connection_attempts: AtomicU64,
    protocol_errors: AtomicU64,
    throttler: LogThrottler,
}

impl Inner {
    fn set_state(&self, state: ConnectionState) {
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            debug!("Viewer state: {}", state);
            let _ = self.event_tx.send(ClientEvent::StateChanged(state));
        }
    }

    fn set_fps(&self, fps: u32) {
        self.fps_tx.send_replace(fps);
        let _ = self.event_tx.send(ClientEvent::Fps(fps));
    }
}

pub struct StreamClient {
    endpoint: StreamEndpoint,
    config: ClientConfig,
    inner: Arc<Inner>,
    cancel: Mutex<Option<CancellationToken>>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl StreamClient {
    pub fn new(endpoint: StreamEndpoint, config: ClientConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (fps_tx, _) = watch::channel(0);
        let (event_tx, _) = broadcast::channel(64);

        Self {
            endpoint,
            config,
            inner: Arc::new(Inner {
                state_tx,
                fps_tx,
                event_tx,
                frames_rendered: AtomicU64::new(0),
                decode_failures: AtomicU64::new(0),
                connection_attempts: AtomicU64::new(0),
                protocol_errors: AtomicU64::new(0),
                throttler: LogThrottler::with_secs(10),
            }),
            cancel: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    pub fn endpoint(&self) -> &StreamEndpoint {
        &self.endpoint
    }

    /// Start receiving with the turbojpeg decoder
    pub fn start<R: Renderer>(&self, renderer: R) -> Result<()> {
        self.start_with_decoder(MjpegTurboDecoder::new(), renderer)
    }

    /// Start the receive task; must be called from within a tokio runtime
    pub fn start_with_decoder<D, R>(&self, decoder: D, renderer: R) -> Result<()>
    where
        D: FrameDecoder,
        R: Renderer,
    {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return Err(AppError::AlreadyRunning("stream client"));
        }

        let cancel = CancellationToken::new();
        let receive_loop = ReceiveLoop {
            endpoint: self.endpoint.clone(),
            config: self.config.clone(),
            inner: self.inner.clone(),
            decoder,
            renderer,
        };
        *task = Some(tokio::spawn(receive_loop.run(cancel.clone())));
        *self.cancel.lock() = Some(cancel);

        info!("Viewer started for {}", self.endpoint);
        Ok(())
    }

    /// Stop the receive task, dropping any open connection
    pub async fn stop(&self) {
        if let Some(cancel) = self.cancel.lock().take() {
            cancel.cancel();
        }
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
            info!("Viewer stopped");
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Watch the connection state from another task or thread
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn fps_watch(&self) -> watch::Receiver<u32> {
        self.inner.fps_tx.subscribe()
    }

    /// Every state change and FPS report, in order
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.event_tx.subscribe()
    }

    pub fn stats(&self) -> ClientStats {
        ClientStats {
            state: self.state(),
            frames_rendered: self.inner.frames_rendered.load(Ordering::Relaxed),
            decode_failures: self.inner.decode_failures.load(Ordering::Relaxed),
            connection_attempts: self.inner.connection_attempts.load(Ordering::Relaxed),
            protocol_errors: self.inner.protocol_errors.load(Ordering::Relaxed),
            fps: *self.inner.fps_tx.borrow(),
        }
    }
}

impl Drop for StreamClient {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.lock().take() {
            cancel.cancel();
        }
    }
}

/// Everything the receive task owns
struct ReceiveLoop<D, R> {
    endpoint: StreamEndpoint,
    config: ClientConfig,
    inner: Arc<Inner>,
    decoder: D,
    renderer: R,
}

impl<D: FrameDecoder, R: Renderer> ReceiveLoop<D, R> {
    async fn run(mut self, cancel: CancellationToken) {
        loop {
            self.inner.set_state(ConnectionState::Connecting);
            self.inner.connection_attempts.fetch_add(1, Ordering::Relaxed);

            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.session() => result,
            };
            match result {
                Err(e) if e.is_protocol() => {
                    self.inner.protocol_errors.fetch_add(1, Ordering::Relaxed);
                    warn_throttled!(
                        self.inner.throttler,
                        "protocol",
                        "Stream {} sent malformed data: {}",
                        self.endpoint,
                        e
                    );
                }
                Err(e) => {
                    warn_throttled!(
                        self.inner.throttler,
                        "connection",
                        "Stream {} failed: {}",
                        self.endpoint,
                        e
                    );
                }
                Ok(()) => {}
            }

            self.inner.set_state(ConnectionState::Disconnected);
            self.inner.set_fps(0);

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.reconnect_delay()) => {}
            }
        }

        self.inner.set_state(ConnectionState::Disconnected);
    }

    /// One connection, from connect to the first failure
    async fn session(&mut self) -> Result<()> {
        let address = self.endpoint.address();
        let mut stream = tokio::time::timeout(
            self.config.connect_timeout(),
            TcpStream::connect(&address),
        )
        .await
        .map_err(|_| AppError::Timeout(format!("connect to {}", address)))??;
        let _ = stream.set_nodelay(true);

        stream
            .write_all(self.endpoint.request(ACCEPT).as_bytes())
            .await?;

        let mut parser = MultipartDecoder::new(self.config.max_frame_size);
        let mut buf = BytesMut::with_capacity(64 * 1024);
        let mut fps = FpsWindow::new();

        loop {
            while let Some(event) = parser.decode(&mut buf)? {
                match event {
                    StreamEvent::Head(head) => {
                        if head.status != 200 {
                            return Err(AppError::HttpStatus(head.status));
                        }
                        if !head.is_multipart() {
                            debug!(
                                "Unexpected content type from {}: {:?}",
                                self.endpoint, head.content_type
                            );
                        }
                        self.inner.set_state(ConnectionState::Connected);
                        self.inner.throttler.clear("connection");
                        self.inner.throttler.clear("protocol");
                        info!("Connected to {}", self.endpoint);
                        fps = FpsWindow::new();
                    }
                    StreamEvent::Part(data) => self.on_frame(&data, &mut fps),
                }
            }

            let n = tokio::time::timeout(self.config.read_timeout(), stream.read_buf(&mut buf))
                .await
                .map_err(|_| {
                    AppError::Timeout(format!(
                        "no data for {}ms",
                        self.config.read_timeout().as_millis()
                    ))
                })??;
            if n == 0 {
                return Err(AppError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "server closed the connection",
                )));
            }
        }
    }

    fn on_frame(&mut self, data: &[u8], fps: &mut FpsWindow) {
        match self.decoder.decode(data) {
            Ok(image) => {
                self.inner.frames_rendered.fetch_add(1, Ordering::Relaxed);
                self.renderer.render(image);
                if let Some(current) = fps.tick() {
                    debug!("Viewer: {} fps", current);
                    self.inner.set_fps(current);
                }
            }
            Err(e) => {
                self.inner.decode_failures.fetch_add(1, Ordering::Relaxed);
                warn_throttled!(
                    self.inner.throttler,
                    "decode",
                    "Skipping frame of {} bytes: {}",
                    data.len(),
                    e
                );
            }
        }
    }
}
