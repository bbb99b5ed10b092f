//! Video stream plumbing.
//!
//! This module provides:
//! - `FrameSource` / `FrameSink`: pull-based decode and push-based encode of RGB24 frames
//! - `VideoBackend`: opens sources and creates sinks for a codec implementation
//! - `VideoStreamAdapter`: metadata recovery and guaranteed release around one source/sink pair
//! - Backends: FFmpeg (feature: video-ffmpeg) and a synthetic backend (testing, dry runs)

mod adapter;
#[cfg(feature = "video-ffmpeg")]
mod ffmpeg;
pub mod synthetic;

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use image::RgbImage;

pub use adapter::VideoStreamAdapter;
#[cfg(feature = "video-ffmpeg")]
pub use ffmpeg::FfmpegBackend;
pub use synthetic::{SyntheticBackend, SyntheticClip};

/// Frame rate substituted when the container reports none.
pub const DEFAULT_FRAME_RATE: f64 = 25.0;

/// Geometry and timing used to create a writer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StreamFormat {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

/// Decoded frame stream.
pub trait FrameSource {
    /// Width and height as the container reports them. Either may be zero or
    /// negative when the metadata is missing or corrupt.
    fn reported_dimensions(&self) -> (i64, i64);

    /// Frame rate as the container reports it, if at all.
    fn reported_frame_rate(&self) -> Option<f64>;

    /// Next decoded frame, or `None` at end of stream.
    fn next_frame(&mut self) -> Result<Option<RgbImage>>;

    /// Seek back to the first frame. Returns `Ok(false)` when the source cannot seek.
    fn rewind(&mut self) -> Result<bool>;
}

/// Encoded frame writer.
///
/// Sources and sinks are opened and driven on a single worker thread, so
/// neither trait requires `Send`.
pub trait FrameSink {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()>;

    /// Flush and close the output. Must be safe to call more than once.
    fn finish(&mut self) -> Result<()>;
}

pub trait VideoBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>>;

    fn create_sink(&self, path: &Path, format: StreamFormat) -> Result<Box<dyn FrameSink>>;
}

/// Resolve a video backend by its configured name.
pub fn backend_by_name(name: &str) -> Result<Arc<dyn VideoBackend>> {
    match name {
        "synthetic" => Ok(Arc::new(SyntheticBackend)),
        "ffmpeg" => {
            #[cfg(feature = "video-ffmpeg")]
            {
                Ok(Arc::new(FfmpegBackend::new()?))
            }
            #[cfg(not(feature = "video-ffmpeg"))]
            {
                Err(anyhow!(
                    "the ffmpeg video backend requires the video-ffmpeg feature"
                ))
            }
        }
        other => Err(anyhow!("unknown video backend '{}'", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_synthetic_backend() {
        let backend = backend_by_name("synthetic").unwrap();
        assert_eq!(backend.name(), "synthetic");
        assert!(backend_by_name("gstreamer").is_err());
    }
}
