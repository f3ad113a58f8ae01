//! Video frame sources and clip datasets.
//!
//! Decoding is delegated to an external `ffmpeg` process streaming raw
//! RGB24 frames over a pipe; dimensions are probed with `ffprobe`. The
//! binaries can be overridden with the `ENSONAR_FFMPEG` and
//! `ENSONAR_FFPROBE` environment variables. A synthetic source covers
//! tests and the weights-free demo path.

use std::collections::VecDeque;
use std::io::Read;
use std::path::Path;
use std::process::{Child, ChildStdout, Command, Stdio};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{EnsonarError, Result};

/// One decoded RGB frame, 8 bits per channel, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbFrame {
    width: usize,
    height: usize,
    data: Vec<u8>,
}

impl RgbFrame {
    /// Wrap a raw RGB24 buffer.
    ///
    /// # Errors
    ///
    /// Fails if the buffer length is not `width * height * 3`.
    pub fn new(width: usize, height: usize, data: Vec<u8>) -> Result<Self> {
        if data.len() != width * height * 3 {
            return Err(EnsonarError::Decode(format!(
                "frame buffer of {} bytes doesn't match {width}x{height} RGB24",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Frame width in pixels.
    #[must_use]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Frame height in pixels.
    #[must_use]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Raw RGB24 bytes, row-major.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// A stream of decoded frames.
pub trait FrameSource {
    /// (width, height) of every frame this source yields.
    fn dimensions(&self) -> (usize, usize);

    /// The next decoded frame, or `None` when the stream is exhausted.
    fn next_frame(&mut self) -> Result<Option<RgbFrame>>;
}

/// Frame source backed by an `ffmpeg` child process.
pub struct FfmpegDecoder {
    child: Child,
    stdout: ChildStdout,
    width: usize,
    height: usize,
}

impl std::fmt::Debug for FfmpegDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FfmpegDecoder")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}

impl FfmpegDecoder {
    /// Open a video file for decoding.
    ///
    /// # Errors
    ///
    /// Fails if `ffprobe` can't report a video stream or `ffmpeg`
    /// can't be spawned.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(EnsonarError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("video file not found: {}", path.display()),
            )));
        }

        let (width, height) = probe_dimensions(path)?;

        let ffmpeg = std::env::var("ENSONAR_FFMPEG").unwrap_or_else(|_| "ffmpeg".into());
        let mut child = Command::new(&ffmpeg)
            .arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-i")
            .arg(path)
            .arg("-f")
            .arg("rawvideo")
            .arg("-pix_fmt")
            .arg("rgb24")
            .arg("pipe:1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| EnsonarError::Decode(format!("failed to spawn {ffmpeg}: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EnsonarError::Decode("ffmpeg stdout not captured".into()))?;

        Ok(Self {
            child,
            stdout,
            width,
            height,
        })
    }
}

impl FrameSource for FfmpegDecoder {
    fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    fn next_frame(&mut self) -> Result<Option<RgbFrame>> {
        let frame_len = self.width * self.height * 3;
        let mut buffer = vec![0u8; frame_len];
        let mut filled = 0;

        while filled < frame_len {
            let n = self.stdout.read(&mut buffer[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        if filled == 0 {
            return Ok(None);
        }
        if filled < frame_len {
            return Err(EnsonarError::Decode(format!(
                "truncated frame: got {filled} of {frame_len} bytes"
            )));
        }

        Ok(Some(RgbFrame::new(self.width, self.height, buffer)?))
    }
}

impl Drop for FfmpegDecoder {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Probe (width, height) of the first video stream via `ffprobe`.
fn probe_dimensions(path: &Path) -> Result<(usize, usize)> {
    let ffprobe = std::env::var("ENSONAR_FFPROBE").unwrap_or_else(|_| "ffprobe".into());
    let output = Command::new(&ffprobe)
        .arg("-v")
        .arg("error")
        .arg("-select_streams")
        .arg("v:0")
        .arg("-show_entries")
        .arg("stream=width,height")
        .arg("-of")
        .arg("csv=p=0")
        .arg(path)
        .output()
        .map_err(|e| EnsonarError::Decode(format!("failed to run {ffprobe}: {e}")))?;

    if !output.status.success() {
        return Err(EnsonarError::Decode(format!(
            "{ffprobe} failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let text = String::from_utf8_lossy(&output.stdout);
    let mut parts = text.trim().split(',');
    let width = parts
        .next()
        .and_then(|w| w.trim().parse::<usize>().ok())
        .ok_or_else(|| EnsonarError::Decode(format!("unparsable ffprobe output: {text}")))?;
    let height = parts
        .next()
        .and_then(|h| h.trim().parse::<usize>().ok())
        .ok_or_else(|| EnsonarError::Decode(format!("unparsable ffprobe output: {text}")))?;

    if width == 0 || height == 0 {
        return Err(EnsonarError::Decode(format!(
            "degenerate video dimensions {width}x{height}"
        )));
    }
    Ok((width, height))
}

/// Frame source over an in-memory frame list.
pub struct InMemorySource {
    frames: VecDeque<RgbFrame>,
    width: usize,
    height: usize,
}

impl InMemorySource {
    /// Wrap a list of equally sized frames.
    ///
    /// # Panics
    ///
    /// Panics on an empty list or mixed frame sizes.
    #[must_use]
    pub fn new(frames: Vec<RgbFrame>) -> Self {
        assert!(!frames.is_empty(), "InMemorySource needs at least one frame");
        let width = frames[0].width();
        let height = frames[0].height();
        assert!(
            frames
                .iter()
                .all(|f| f.width() == width && f.height() == height),
            "all frames must share dimensions"
        );
        Self {
            frames: frames.into(),
            width,
            height,
        }
    }
}

impl FrameSource for InMemorySource {
    fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    fn next_frame(&mut self) -> Result<Option<RgbFrame>> {
        Ok(self.frames.pop_front())
    }
}

/// Deterministic synthetic clips for tests and the weights-free demo.
#[derive(Debug, Clone)]
pub struct SyntheticClip {
    frames: Vec<RgbFrame>,
}

impl SyntheticClip {
    /// Uniform-noise frames from a seeded generator.
    #[must_use]
    pub fn noise(width: usize, height: usize, frames: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let frames = (0..frames)
            .map(|_| {
                let data: Vec<u8> = (0..width * height * 3).map(|_| rng.gen::<u8>()).collect();
                RgbFrame::new(width, height, data).expect("buffer sized to frame")
            })
            .collect();
        Self { frames }
    }

    /// Cycle a short frame pattern out to `count` frames.
    ///
    /// # Panics
    ///
    /// Panics on an empty pattern.
    #[must_use]
    pub fn repeating(pattern: Vec<RgbFrame>, count: usize) -> Self {
        assert!(!pattern.is_empty(), "pattern needs at least one frame");
        let frames = (0..count)
            .map(|i| pattern[i % pattern.len()].clone())
            .collect();
        Self { frames }
    }

    /// The generated frames.
    #[must_use]
    pub fn frames(self) -> Vec<RgbFrame> {
        self.frames
    }

    /// The generated frames as a [`FrameSource`].
    #[must_use]
    pub fn into_source(self) -> InMemorySource {
        InMemorySource::new(self.frames)
    }
}

/// Chunks a frame source into fixed-length clips.
///
/// A trailing partial clip is dropped, matching the contract that every
/// clip handed to the dreamer has exactly `clip_len` frames.
pub struct VideoDataset<S: FrameSource> {
    source: S,
    clip_len: usize,
}

impl VideoDataset<FfmpegDecoder> {
    /// Open a video file as a dataset of `clip_len`-frame clips.
    ///
    /// # Errors
    ///
    /// Propagates probe/spawn failures from the decoder.
    pub fn open<P: AsRef<Path>>(path: P, clip_len: usize) -> Result<Self> {
        Ok(Self::new(FfmpegDecoder::open(path)?, clip_len))
    }
}

impl<S: FrameSource> VideoDataset<S> {
    /// Wrap any frame source.
    ///
    /// # Panics
    ///
    /// Panics if `clip_len` is zero.
    #[must_use]
    pub fn new(source: S, clip_len: usize) -> Self {
        assert!(clip_len > 0, "clip_len must be positive");
        Self { source, clip_len }
    }

    /// Frames per clip.
    #[must_use]
    pub fn clip_len(&self) -> usize {
        self.clip_len
    }

    /// The next full clip, or `None` when the source is exhausted.
    ///
    /// # Errors
    ///
    /// Propagates decode failures.
    pub fn next_clip(&mut self) -> Result<Option<Vec<RgbFrame>>> {
        let mut clip = Vec::with_capacity(self.clip_len);
        while clip.len() < self.clip_len {
            match self.source.next_frame()? {
                Some(frame) => clip.push(frame),
                None => return Ok(None),
            }
        }
        Ok(Some(clip))
    }

    /// The first full clip of the stream.
    ///
    /// # Errors
    ///
    /// Fails if the stream holds fewer than `clip_len` frames.
    pub fn first_clip(mut self) -> Result<Vec<RgbFrame>> {
        self.next_clip()?.ok_or_else(|| {
            EnsonarError::Decode(format!(
                "stream ended before the first {}-frame clip",
                self.clip_len
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgb_frame_validates_length() {
        assert!(RgbFrame::new(2, 2, vec![0; 12]).is_ok());
        assert!(RgbFrame::new(2, 2, vec![0; 11]).is_err());
    }

    #[test]
    fn test_synthetic_noise_is_deterministic() {
        let a = SyntheticClip::noise(4, 4, 3, 9).frames();
        let b = SyntheticClip::noise(4, 4, 3, 9).frames();
        assert_eq!(a, b);

        let c = SyntheticClip::noise(4, 4, 3, 10).frames();
        assert_ne!(a, c);
    }

    #[test]
    fn test_synthetic_repeating_cycles_pattern() {
        let a = RgbFrame::new(1, 1, vec![10, 20, 30]).unwrap();
        let b = RgbFrame::new(1, 1, vec![200, 100, 0]).unwrap();
        let clip = SyntheticClip::repeating(vec![a.clone(), b.clone()], 5).frames();
        assert_eq!(clip.len(), 5);
        assert_eq!(clip[0], a);
        assert_eq!(clip[1], b);
        assert_eq!(clip[2], a);
        assert_eq!(clip[4], a);
    }

    #[test]
    fn test_dataset_chunks_and_drops_partial() {
        let frames = SyntheticClip::noise(2, 2, 7, 0).frames();
        let mut dataset = VideoDataset::new(InMemorySource::new(frames), 3);

        assert_eq!(dataset.next_clip().unwrap().unwrap().len(), 3);
        assert_eq!(dataset.next_clip().unwrap().unwrap().len(), 3);
        // One frame left: partial clip is dropped.
        assert!(dataset.next_clip().unwrap().is_none());
    }

    #[test]
    fn test_first_clip_needs_enough_frames() {
        let frames = SyntheticClip::noise(2, 2, 4, 0).frames();
        let dataset = VideoDataset::new(InMemorySource::new(frames), 8);
        assert!(dataset.first_clip().is_err());

        let frames = SyntheticClip::noise(2, 2, 8, 0).frames();
        let dataset = VideoDataset::new(InMemorySource::new(frames), 8);
        assert_eq!(dataset.first_clip().unwrap().len(), 8);
    }

    #[test]
    fn test_missing_video_file_is_io_error() {
        let err = FfmpegDecoder::open("/nonexistent/clip.mp4").unwrap_err();
        assert!(matches!(err, EnsonarError::Io(_)));
    }
}
