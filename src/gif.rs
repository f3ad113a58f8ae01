//! Animated GIF output encoder.
//!
//! The dreamed clip leaves the system as a single looping GIF: RGB
//! frames at a fixed frame rate, repeating indefinitely.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use image::codecs::gif::{GifEncoder, Repeat};
use image::{Delay, Frame, RgbaImage};

use crate::error::{EnsonarError, Result};
use crate::video::RgbFrame;

/// Writes frame sequences as looping animated GIFs.
#[derive(Debug, Clone, Copy)]
pub struct GifSink {
    fps: u32,
}

impl GifSink {
    /// A sink at the default 30 fps (≈33 ms per frame).
    #[must_use]
    pub fn new() -> Self {
        Self { fps: 30 }
    }

    /// A sink at a custom frame rate.
    ///
    /// # Panics
    ///
    /// Panics if `fps` is zero.
    #[must_use]
    pub fn with_fps(fps: u32) -> Self {
        assert!(fps > 0, "fps must be positive");
        Self { fps }
    }

    /// Frame duration in milliseconds.
    #[must_use]
    pub fn frame_duration_ms(&self) -> f32 {
        1000.0 / self.fps as f32
    }

    /// Encode `frames` to `path` as an infinitely looping GIF.
    ///
    /// # Errors
    ///
    /// Fails on an empty frame list or any I/O / encoding failure.
    pub fn write<P: AsRef<Path>>(&self, path: P, frames: &[RgbFrame]) -> Result<()> {
        if frames.is_empty() {
            return Err(EnsonarError::Other(
                "cannot encode a GIF from zero frames".into(),
            ));
        }

        let file = File::create(path)?;
        let mut encoder = GifEncoder::new(BufWriter::new(file));
        encoder
            .set_repeat(Repeat::Infinite)
            .map_err(|e| EnsonarError::Other(format!("GIF encoder setup failed: {e}")))?;

        for frame in frames {
            let width = frame.width() as u32;
            let height = frame.height() as u32;

            let mut rgba = Vec::with_capacity(frame.data().len() / 3 * 4);
            for pixel in frame.data().chunks_exact(3) {
                rgba.extend_from_slice(pixel);
                rgba.push(255);
            }
            let buffer = RgbaImage::from_raw(width, height, rgba)
                .expect("buffer sized to width * height * 4");

            let delay = Delay::from_numer_denom_ms(1000, self.fps);
            encoder
                .encode_frame(Frame::from_parts(buffer, 0, 0, delay))
                .map_err(|e| EnsonarError::Other(format!("GIF frame encoding failed: {e}")))?;
        }

        Ok(())
    }
}

impl Default for GifSink {
    fn default() -> Self {
        Self::new()
    }
}
