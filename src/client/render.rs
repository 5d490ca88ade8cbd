//! Display side of the viewer
//!
//! The client calls [`Renderer::render`] once per decoded frame, in order,
//! from its receive task. A renderer that must touch a UI thread hands the
//! image over itself.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::video::DecodedImage;

pub trait Renderer: Send + 'static {
    fn render(&mut self, image: DecodedImage);
}

impl<F> Renderer for F
where
    F: FnMut(DecodedImage) + Send + 'static,
{
    fn render(&mut self, image: DecodedImage) {
        self(image)
    }
}

/// Headless renderer: logs every frame and optionally keeps the latest one
/// on disk as a PPM image
pub struct LogRenderer {
    save_path: Option<PathBuf>,
    save_interval: Duration,
    last_saved: Option<Instant>,
    frames: u64,
}

impl LogRenderer {
    pub fn new(save_path: Option<PathBuf>) -> Self {
        Self {
            save_path,
            save_interval: Duration::from_secs(1),
            last_saved: None,
            frames: 0,
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    fn should_save(&self, now: Instant) -> bool {
        match self.last_saved {
            Some(last) => now.duration_since(last) >= self.save_interval,
            None => true,
        }
    }
}

impl Renderer for LogRenderer {
    fn render(&mut self, image: DecodedImage) {
        self.frames += 1;
        debug!(
            "Frame {}: {}x{} ({} bytes RGB)",
            self.frames,
            image.width,
            image.height,
            image.pixels.len()
        );

        let now = Instant::now();
        if let Some(path) = self.save_path.as_deref() {
            if self.should_save(now) {
                if let Err(e) = write_ppm(path, &image) {
                    warn!("Failed to save frame to {}: {}", path.display(), e);
                }
                self.last_saved = Some(now);
            }
        }
    }
}

/// Write `image` as a binary PPM (P6), replacing `path` atomically
pub fn write_ppm(path: &Path, image: &DecodedImage) -> std::io::Result<()> {
    let tmp = path.with_extension("ppm.tmp");
    {
        let mut file = std::io::BufWriter::new(std::fs::File::create(&tmp)?);
        write!(file, "P6\n{} {}\n255\n", image.width, image.height)?;
        file.write_all(&image.pixels)?;
        file.flush()?;
    }
    std::fs::rename(&tmp, path)
}
