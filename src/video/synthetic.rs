//! Synthetic video backend.
//!
//! A "video" is a small JSON document describing the container metadata and
//! how many frames to generate. Output is a line-oriented text file: a header
//! line written with the first frame, then one line per frame. Used for tests
//! and dry runs on hosts without FFmpeg.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use image::{Rgb, RgbImage};
use serde::{Deserialize, Serialize};

use super::{FrameSink, FrameSource, StreamFormat, VideoBackend};

const HEADER_PREFIX: &str = "synthetic-video";

fn default_seekable() -> bool {
    true
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyntheticClip {
    /// Container-reported width; may be zero or negative to simulate bad metadata.
    pub reported_width: i64,
    pub reported_height: i64,
    #[serde(default)]
    pub reported_fps: Option<f64>,
    /// Geometry of the frames actually produced.
    pub frame_width: u32,
    pub frame_height: u32,
    pub frames: u32,
    #[serde(default = "default_seekable")]
    pub seekable: bool,
}

impl SyntheticClip {
    pub fn new(width: u32, height: u32, frames: u32) -> Self {
        Self {
            reported_width: i64::from(width),
            reported_height: i64::from(height),
            reported_fps: Some(25.0),
            frame_width: width,
            frame_height: height,
            frames,
            seekable: true,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).context("serialize synthetic clip")
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).context("parse synthetic clip")
    }
}

/// Deterministic frame content: a flat fill derived from the frame index.
pub fn synthetic_frame(index: u32, width: u32, height: u32) -> RgbImage {
    let shade = (index % 251) as u8;
    RgbImage::from_pixel(width, height, Rgb([shade, shade.wrapping_mul(3), 64]))
}

pub struct SyntheticBackend;

impl VideoBackend for SyntheticBackend {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read synthetic clip {}", path.display()))?;
        let clip = SyntheticClip::from_bytes(&bytes)
            .with_context(|| format!("{} is not a synthetic clip", path.display()))?;
        Ok(Box::new(SyntheticSource::new(clip)))
    }

    fn create_sink(&self, path: &Path, format: StreamFormat) -> Result<Box<dyn FrameSink>> {
        Ok(Box::new(SyntheticSink::create(path, format)?))
    }
}

pub struct SyntheticSource {
    clip: SyntheticClip,
    position: u32,
}

impl SyntheticSource {
    pub fn new(clip: SyntheticClip) -> Self {
        Self { clip, position: 0 }
    }
}

impl FrameSource for SyntheticSource {
    fn reported_dimensions(&self) -> (i64, i64) {
        (self.clip.reported_width, self.clip.reported_height)
    }

    fn reported_frame_rate(&self) -> Option<f64> {
        self.clip.reported_fps
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        if self.position >= self.clip.frames {
            return Ok(None);
        }
        let frame = synthetic_frame(self.position, self.clip.frame_width, self.clip.frame_height);
        self.position += 1;
        Ok(Some(frame))
    }

    fn rewind(&mut self) -> Result<bool> {
        if !self.clip.seekable {
            return Ok(false);
        }
        self.position = 0;
        Ok(true)
    }
}

pub struct SyntheticSink {
    writer: Option<BufWriter<File>>,
    format: StreamFormat,
    frames_written: u64,
}

impl SyntheticSink {
    /// Creates (or truncates) the output file immediately.
    pub fn create(path: &Path, format: StreamFormat) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        Ok(Self {
            writer: Some(BufWriter::new(file)),
            format,
            frames_written: 0,
        })
    }
}

impl FrameSink for SyntheticSink {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            bail!("synthetic writer already finished");
        };
        if self.frames_written == 0 {
            writeln!(
                writer,
                "{} {}x{}@{}",
                HEADER_PREFIX, self.format.width, self.format.height, self.format.fps
            )?;
        }
        let pixel = frame.get_pixel_checked(0, 0).copied().unwrap_or(Rgb([0, 0, 0]));
        writeln!(
            writer,
            "frame {} {}x{} {:02x}{:02x}{:02x}",
            self.frames_written,
            frame.width(),
            frame.height(),
            pixel[0],
            pixel[1],
            pixel[2]
        )?;
        self.frames_written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush().context("flush synthetic output")?;
        }
        Ok(())
    }
}

/// Parsed synthetic output, for inspection in tests and dry runs.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticRecording {
    pub format: StreamFormat,
    /// Width and height of every recorded frame.
    pub frames: Vec<(u32, u32)>,
}

impl SyntheticRecording {
    pub fn read(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let mut lines = BufReader::new(file).lines();
        let header = lines
            .next()
            .transpose()?
            .ok_or_else(|| anyhow!("{} is empty", path.display()))?;
        let spec = header
            .strip_prefix(HEADER_PREFIX)
            .map(str::trim)
            .ok_or_else(|| anyhow!("missing synthetic header in {}", path.display()))?;
        let (size, fps) = spec
            .split_once('@')
            .ok_or_else(|| anyhow!("malformed synthetic header '{}'", header))?;
        let (width, height) = parse_size(size)?;
        let format = StreamFormat {
            width,
            height,
            fps: fps.parse().context("synthetic header fps")?,
        };

        let mut frames = Vec::new();
        for line in lines {
            let line = line?;
            let size = line
                .split_whitespace()
                .nth(2)
                .ok_or_else(|| anyhow!("malformed frame line '{}'", line))?;
            frames.push(parse_size(size)?);
        }
        Ok(Self { format, frames })
    }
}

fn parse_size(text: &str) -> Result<(u32, u32)> {
    let (w, h) = text
        .split_once('x')
        .ok_or_else(|| anyhow!("malformed size '{}'", text))?;
    Ok((w.parse()?, h.parse()?))
}
