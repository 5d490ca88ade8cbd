//! Frame sources
//!
//! A [`FrameSource`] is whatever produces compressed frames: a camera, a
//! screen grabber, a file replayer. The core only starts and stops it and
//! receives frames through the [`FrameSink`] it is handed.
//!
//! Two sources ship with the crate:
//! - [`TestPatternSource`] renders and JPEG-encodes a moving pattern on a
//!   dedicated thread, the way a camera preview callback would.
//! - [`DirectorySource`] replays the `.jpg`/`.jpeg` files of a directory.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::buffer::LatestFrameBuffer;
use super::frame::Frame;
use crate::config::{SourceConfig, SourceKind};
use crate::error::{AppError, Result};
use crate::utils::FpsCalculator;

/// Producer side of the pipeline
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Human readable source name for logs
    fn name(&self) -> &str;

    /// Begin producing frames into `sink`
    async fn start(&self, sink: FrameSink) -> Result<()>;

    /// Stop producing frames; a no-op if not running
    async fn stop(&self) -> Result<()>;
}

/// Callback handle given to a frame source
///
/// Delivering a frame publishes it into the shared buffer and never waits
/// on viewers.
#[derive(Clone)]
pub struct FrameSink {
    buffer: Arc<LatestFrameBuffer>,
    fps: Arc<Mutex<FpsCalculator>>,
}

impl FrameSink {
    pub fn new(buffer: Arc<LatestFrameBuffer>) -> Self {
        Self {
            buffer,
            fps: Arc::new(Mutex::new(FpsCalculator::new())),
        }
    }

    /// Hand over one encoded frame; returns its published version
    pub fn deliver(&self, data: Bytes, capture_ts: Instant) -> u64 {
        self.fps.lock().record_frame_at(capture_ts);
        self.buffer.publish(Frame::new(data, capture_ts))
    }

    /// Frames delivered during the last second
    pub fn capture_fps(&self) -> u32 {
        self.fps.lock().fps_now()
    }

    pub fn buffer(&self) -> &Arc<LatestFrameBuffer> {
        &self.buffer
    }
}

/// Build the source selected by `config`
pub fn create_source(config: &SourceConfig) -> Result<Box<dyn FrameSource>> {
    match config.kind {
        SourceKind::TestPattern => Ok(Box::new(TestPatternSource::new(config.clone()))),
        SourceKind::Directory => {
            let dir = config.directory.as_deref().ok_or_else(|| {
                AppError::Config("directory source requires source.directory".to_string())
            })?;
            Ok(Box::new(DirectorySource::new(dir, config.frame_interval())))
        }
    }
}

// ============================================================================
// Test pattern
// ============================================================================

/// Render the RGB24 test pattern for frame number `tick`
///
/// A diagonal gradient with a white bar sweeping left to right, so motion
/// (and stalls) are obvious in a viewer.
pub fn render_test_pattern(width: usize, height: usize, tick: u64) -> Vec<u8> {
    let mut pixels = vec![0u8; width * height * 3];
    let bar_width = (width / 16).max(1);
    let bar_x = (tick as usize * 4) % width.max(1);

    for y in 0..height {
        for x in 0..width {
            let offset = (y * width + x) * 3;
            let in_bar = x >= bar_x && x < bar_x + bar_width;
            if in_bar {
                pixels[offset..offset + 3].copy_from_slice(&[255, 255, 255]);
            } else {
                pixels[offset] = (x * 255 / width.max(1)) as u8;
                pixels[offset + 1] = (y * 255 / height.max(1)) as u8;
                pixels[offset + 2] = (tick % 256) as u8;
            }
        }
    }
    pixels
}

/// Render and JPEG-encode one test pattern frame
pub fn encode_test_pattern(width: usize, height: usize, tick: u64, quality: u8) -> Result<Vec<u8>> {
    let pixels = render_test_pattern(width, height, tick);
    let image = turbojpeg::Image {
        pixels: pixels.as_slice(),
        width,
        pitch: width * 3,
        height,
        format: turbojpeg::PixelFormat::RGB,
    };

    let jpeg = turbojpeg::compress(image, quality.clamp(1, 100) as i32, turbojpeg::Subsamp::Sub2x2)
        .map_err(|e| AppError::Source(format!("turbojpeg compress failed: {}", e)))?;
    Ok(jpeg.to_vec())
}

/// Synthetic camera producing a moving pattern at a fixed rate
pub struct TestPatternSource {
    config: SourceConfig,
    running: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl TestPatternSource {
    pub fn new(config: SourceConfig) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
            thread: Mutex::new(None),
        }
    }

    fn produce(config: SourceConfig, running: Arc<AtomicBool>, sink: FrameSink) {
        let interval = config.frame_interval();
        let (width, height) = (config.width as usize, config.height as usize);
        let mut tick = 0u64;
        let mut next = Instant::now();

        while running.load(Ordering::SeqCst) {
            match encode_test_pattern(width, height, tick, config.quality) {
                Ok(jpeg) => {
                    sink.deliver(Bytes::from(jpeg), Instant::now());
                }
                Err(e) => {
                    warn!("Test pattern encode failed: {}", e);
                }
            }
            tick += 1;

            next += interval;
            let now = Instant::now();
            if next > now {
                std::thread::sleep(next - now);
            } else {
                // Encoding can't keep up; don't try to catch up in a burst
                next = now;
            }
        }
        debug!("Test pattern thread exiting after {} frames", tick);
    }
}

#[async_trait]
impl FrameSource for TestPatternSource {
    fn name(&self) -> &str {
        "test-pattern"
    }

    async fn start(&self, sink: FrameSink) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(AppError::AlreadyRunning("test pattern source"));
        }

        let config = self.config.clone();
        let running = self.running.clone();
        let handle = std::thread::Builder::new()
            .name("test-pattern".to_string())
            .spawn(move || Self::produce(config, running, sink))
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                AppError::Source(format!("failed to spawn producer thread: {}", e))
            })?;
        *self.thread.lock() = Some(handle);

        info!(
            "Test pattern source started: {}x{} @ {} fps, quality {}",
            self.config.width, self.config.height, self.config.fps, self.config.quality
        );
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            tokio::task::spawn_blocking(move || handle.join())
                .await
                .map_err(|e| AppError::Source(format!("join failed: {}", e)))?
                .map_err(|_| AppError::Source("producer thread panicked".to_string()))?;
            info!("Test pattern source stopped");
        }
        Ok(())
    }
}

// ============================================================================
// Directory replay
// ============================================================================

/// Replays the JPEG files of a directory in name order, looping forever
pub struct DirectorySource {
    dir: PathBuf,
    interval: Duration,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl DirectorySource {
    pub fn new(dir: impl AsRef<Path>, interval: Duration) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            interval,
            task: Mutex::new(None),
        }
    }

    /// List the JPEG files of `dir`, sorted by file name
    pub async fn list_frames(dir: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(dir).await?;
        let mut files = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_jpeg = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"))
                .unwrap_or(false);
            if is_jpeg && entry.file_type().await?.is_file() {
                files.push(path);
            }
        }

        files.sort();
        Ok(files)
    }
}

#[async_trait]
impl FrameSource for DirectorySource {
    fn name(&self) -> &str {
        "directory"
    }

    async fn start(&self, sink: FrameSink) -> Result<()> {
        if self.task.lock().as_ref().is_some_and(|t| !t.is_finished()) {
            return Err(AppError::AlreadyRunning("directory source"));
        }

        let files = Self::list_frames(&self.dir).await?;
        if files.is_empty() {
            return Err(AppError::Source(format!(
                "no .jpg/.jpeg files in {}",
                self.dir.display()
            )));
        }
        info!(
            "Directory source started: {} frames from {}",
            files.len(),
            self.dir.display()
        );

        let interval = self.interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            for path in files.iter().cycle() {
                ticker.tick().await;
                match tokio::fs::read(path).await {
                    Ok(data) => {
                        sink.deliver(Bytes::from(data), Instant::now());
                    }
                    Err(e) => warn!("Failed to read frame {}: {}", path.display(), e),
                }
            }
        });
        *self.task.lock() = Some(handle);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let task = self.task.lock().take();
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
            info!("Directory source stopped");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_pattern_moves() {
        let a = render_test_pattern(32, 8, 0);
        let b = render_test_pattern(32, 8, 1);
        assert_eq!(a.len(), 32 * 8 * 3);
        assert_ne!(a, b);
    }

    #[test]
    fn test_encode_produces_jpeg() {
        let jpeg = encode_test_pattern(32, 16, 0, 70).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(&jpeg[jpeg.len() - 2..], &[0xFF, 0xD9]);
    }

    #[test]
    fn test_sink_publishes_and_counts() {
        let buffer = Arc::new(LatestFrameBuffer::new());
        let sink = FrameSink::new(buffer.clone());

        assert_eq!(sink.deliver(Bytes::from_static(b"one"), Instant::now()), 1);
        assert_eq!(sink.deliver(Bytes::from_static(b"two"), Instant::now()), 2);
        assert_eq!(buffer.latest().unwrap().data(), b"two");
        assert_eq!(sink.capture_fps(), 2);
    }

    #[tokio::test]
    async fn test_pattern_source_lifecycle() {
        let buffer = Arc::new(LatestFrameBuffer::new());
        let source = TestPatternSource::new(SourceConfig {
            width: 64,
            height: 32,
            fps: 50,
            ..Default::default()
        });

        source.start(FrameSink::new(buffer.clone())).await.unwrap();
        assert!(matches!(
            source.start(FrameSink::new(buffer.clone())).await,
            Err(AppError::AlreadyRunning(_))
        ));

        let frame = buffer
            .wait_next(0, Duration::from_secs(2))
            .await
            .expect("test pattern should publish");
        assert!(frame.has_jpeg_header());

        source.stop().await.unwrap();
        let stopped_at = buffer.version();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(buffer.version(), stopped_at);
    }

    #[tokio::test]
    async fn test_directory_source_replays_files() {
        let dir = tempdir().unwrap();
        tokio::fs::write(dir.path().join("b.jpg"), b"second").await.unwrap();
        tokio::fs::write(dir.path().join("a.JPEG"), b"first").await.unwrap();
        tokio::fs::write(dir.path().join("notes.txt"), b"skip me").await.unwrap();

        let files = DirectorySource::list_frames(dir.path()).await.unwrap();
        assert_eq!(files.len(), 2);

        let buffer = Arc::new(LatestFrameBuffer::new());
        let source = DirectorySource::new(dir.path(), Duration::from_millis(10));
        source.start(FrameSink::new(buffer.clone())).await.unwrap();

        let first = buffer.wait_next(0, Duration::from_secs(2)).await.unwrap();
        let mut last = first.version;
        let mut seen_second = first.data() == b"second";
        for _ in 0..10 {
            if seen_second {
                break;
            }
            let frame = buffer.wait_next(last, Duration::from_secs(2)).await.unwrap();
            last = frame.version;
            if frame.data() == b"second" {
                seen_second = true;
                break;
            }
        }
        assert!(seen_second);

        source.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_directory_source_rejects_empty_dir() {
        let dir = tempdir().unwrap();
        let source = DirectorySource::new(dir.path(), Duration::from_millis(10));
        let buffer = Arc::new(LatestFrameBuffer::new());
        assert!(matches!(
            source.start(FrameSink::new(buffer)).await,
            Err(AppError::Source(_))
        ));
    }
}
