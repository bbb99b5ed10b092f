use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use image::RgbImage;

use super::{FrameSink, FrameSource, StreamFormat, VideoBackend, DEFAULT_FRAME_RATE};

/// One decoded input stream plus, once requested, one encoded output stream.
///
/// Opening recovers unusable container metadata before any writer can be
/// created:
/// - width or height <= 0: one frame is decoded to measure it, then the source
///   is rewound. When the source cannot seek, that first frame is lost.
/// - frame rate missing or <= 0: `DEFAULT_FRAME_RATE` is used.
///
/// Both streams are closed by `release`, which is idempotent and also runs on
/// drop.
pub struct VideoStreamAdapter {
    source: Option<Box<dyn FrameSource>>,
    sink: Option<Box<dyn FrameSink>>,
    output_path: Option<PathBuf>,
    format: StreamFormat,
}

impl VideoStreamAdapter {
    pub fn open(backend: &dyn VideoBackend, path: &Path) -> Result<Self> {
        let source = backend
            .open(path)
            .with_context(|| format!("failed to open video stream {}", path.display()))?;
        Self::from_source(source)
    }

    pub fn from_source(mut source: Box<dyn FrameSource>) -> Result<Self> {
        let (reported_width, reported_height) = source.reported_dimensions();
        let (width, height) = if reported_width <= 0 || reported_height <= 0 {
            recover_dimensions(source.as_mut(), reported_width, reported_height)?
        } else {
            (
                u32::try_from(reported_width).context("reported width out of range")?,
                u32::try_from(reported_height).context("reported height out of range")?,
            )
        };

        let fps = match source.reported_frame_rate() {
            Some(fps) if fps.is_finite() && fps > 0.0 => fps,
            other => {
                log::debug!(
                    "frame rate {:?} unusable, falling back to {}",
                    other,
                    DEFAULT_FRAME_RATE
                );
                DEFAULT_FRAME_RATE
            }
        };

        Ok(Self {
            source: Some(source),
            sink: None,
            output_path: None,
            format: StreamFormat { width, height, fps },
        })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.format.width, self.format.height)
    }

    pub fn frame_rate(&self) -> f64 {
        self.format.fps
    }

    pub fn format(&self) -> StreamFormat {
        self.format
    }

    /// Next frame, or `None` at end of stream. An empty frame is treated as
    /// end of stream.
    pub fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        let Some(source) = self.source.as_mut() else {
            return Ok(None);
        };
        match source.next_frame()? {
            Some(frame) if frame.width() > 0 && frame.height() > 0 => Ok(Some(frame)),
            Some(_) => {
                log::warn!("decoder returned an empty frame, treating as end of stream");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Create the output stream using the recovered format.
    pub fn open_writer(&mut self, backend: &dyn VideoBackend, path: &Path) -> Result<()> {
        if self.sink.is_some() {
            return Err(anyhow!("a writer is already open for this stream"));
        }
        let sink = backend
            .create_sink(path, self.format)
            .with_context(|| format!("failed to create video writer {}", path.display()))?;
        self.sink = Some(sink);
        self.output_path = Some(path.to_path_buf());
        Ok(())
    }

    pub fn output_path(&self) -> Option<&Path> {
        self.output_path.as_deref()
    }

    pub fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        let sink = self
            .sink
            .as_mut()
            .ok_or_else(|| anyhow!("no writer open for this stream"))?;
        sink.write_frame(frame)
    }

    /// Close the reader and flush/close the writer. Safe to call repeatedly.
    pub fn release(&mut self) -> Result<()> {
        self.source = None;
        match self.sink.take() {
            Some(mut sink) => sink.finish(),
            None => Ok(()),
        }
    }
}

impl Drop for VideoStreamAdapter {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            log::warn!("failed to finalize video writer: {:#}", e);
        }
    }
}

fn recover_dimensions(
    source: &mut dyn FrameSource,
    reported_width: i64,
    reported_height: i64,
) -> Result<(u32, u32)> {
    let Some(frame) = source.next_frame()? else {
        log::warn!(
            "stream reports {}x{} and has no frames to measure",
            reported_width,
            reported_height
        );
        return Ok((0, 0));
    };
    let (width, height) = frame.dimensions();
    log::info!(
        "stream reports {}x{}, using {}x{} from first frame",
        reported_width,
        reported_height,
        width,
        height
    );
    match source.rewind() {
        Ok(true) => {}
        Ok(false) => log::warn!("stream cannot seek; first frame will be skipped"),
        Err(e) => log::warn!("rewind failed ({:#}); first frame will be skipped", e),
    }
    Ok((width, height))
}
