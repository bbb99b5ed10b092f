//! FFmpeg-backed decode and MPEG-4 encode.
//!
//! Decoded frames are converted to RGB24 in memory. The encoder is opened
//! lazily on the first written frame so a job that produces no frames leaves
//! an empty output file behind.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{
    codec, encoder, format, frame, media, software::scaling, util::rational::Rational,
};
use image::RgbImage;

use super::{FrameSink, FrameSource, StreamFormat, VideoBackend};

const ENCODE_FORMAT: format::Pixel = format::Pixel::YUV420P;
const SCALE_FLAGS: scaling::Flags = scaling::Flags::BILINEAR;

pub struct FfmpegBackend;

impl FfmpegBackend {
    pub fn new() -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        Ok(Self)
    }
}

impl VideoBackend for FfmpegBackend {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>> {
        Ok(Box::new(FfmpegSource::open(path)?))
    }

    fn create_sink(&self, path: &Path, format: StreamFormat) -> Result<Box<dyn FrameSink>> {
        Ok(Box::new(FfmpegSink::create(path, format)?))
    }
}

struct FfmpegSource {
    input: format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: Option<(scaling::Context, u32, u32, format::Pixel)>,
    reported_width: i64,
    reported_height: i64,
    reported_fps: Option<f64>,
    eof: bool,
}

impl FfmpegSource {
    fn open(path: &Path) -> Result<Self> {
        let input = format::input(&path)
            .with_context(|| format!("failed to open video '{}' with ffmpeg", path.display()))?;
        let stream = input
            .streams()
            .best(media::Type::Video)
            .ok_or_else(|| anyhow!("'{}' has no video track", path.display()))?;
        let stream_index = stream.index();
        let rate = stream.avg_frame_rate();
        let reported_fps = (rate.numerator() > 0 && rate.denominator() > 0)
            .then(|| f64::from(rate));

        let context = codec::context::Context::from_parameters(stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        log::info!(
            "opened {} ({}x{}, fps {:?})",
            path.display(),
            decoder.width(),
            decoder.height(),
            reported_fps
        );

        Ok(Self {
            reported_width: i64::from(decoder.width()),
            reported_height: i64::from(decoder.height()),
            input,
            stream_index,
            decoder,
            scaler: None,
            reported_fps,
            eof: false,
        })
    }

    fn to_rgb(&mut self, decoded: &frame::Video) -> Result<RgbImage> {
        let (width, height, pixel) = (decoded.width(), decoded.height(), decoded.format());
        let stale = match &self.scaler {
            Some((_, w, h, p)) => (*w, *h, *p) != (width, height, pixel),
            None => true,
        };
        if stale {
            let scaler = scaling::Context::get(
                pixel,
                width,
                height,
                format::Pixel::RGB24,
                width,
                height,
                SCALE_FLAGS,
            )
            .context("create ffmpeg scaler")?;
            self.scaler = Some((scaler, width, height, pixel));
        }
        let Some((scaler, _, _, _)) = self.scaler.as_mut() else {
            bail!("ffmpeg scaler missing");
        };

        let mut rgb = frame::Video::empty();
        scaler.run(decoded, &mut rgb).context("scale frame to RGB")?;
        let pixels = frame_to_pixels(&rgb)?;
        RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("decoded frame buffer does not match {}x{}", width, height))
    }
}

impl FrameSource for FfmpegSource {
    fn reported_dimensions(&self) -> (i64, i64) {
        (self.reported_width, self.reported_height)
    }

    fn reported_frame_rate(&self) -> Option<f64> {
        self.reported_fps
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        let mut decoded = frame::Video::empty();
        loop {
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                return self.to_rgb(&decoded).map(Some);
            }
            if self.eof {
                return Ok(None);
            }

            let stream_index = self.stream_index;
            let packet = self
                .input
                .packets()
                .find_map(|(stream, packet)| (stream.index() == stream_index).then_some(packet));
            match packet {
                Some(packet) => {
                    if let Err(e) = self.decoder.send_packet(&packet) {
                        log::warn!("ffmpeg decode error, ending stream: {}", e);
                        self.eof = true;
                        return Ok(None);
                    }
                }
                None => {
                    self.eof = true;
                    let _ = self.decoder.send_eof();
                }
            }
        }
    }

    fn rewind(&mut self) -> Result<bool> {
        match self.input.seek(0, ..1) {
            Ok(()) => {
                self.decoder.flush();
                self.eof = false;
                Ok(true)
            }
            Err(e) => {
                log::debug!("ffmpeg seek to start failed: {}", e);
                Ok(false)
            }
        }
    }
}

fn frame_to_pixels(frame: &frame::Video) -> Result<Vec<u8>> {
    let width = frame.width() as usize;
    let height = frame.height() as usize;
    let row_bytes = width * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        return Ok(data[..row_bytes * height].to_vec());
    }

    let mut pixels = Vec::with_capacity(row_bytes * height);
    for row in 0..height {
        let start = row * stride;
        pixels.extend_from_slice(
            data.get(start..start + row_bytes)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }
    Ok(pixels)
}

struct EncoderState {
    encoder: encoder::Video,
    to_yuv: Option<(scaling::Context, u32, u32)>,
    rgb_frame: frame::Video,
    yuv_frame: frame::Video,
    stream_index: usize,
    width: u32,
    height: u32,
    time_base: Rational,
}

struct FfmpegSink {
    path: PathBuf,
    output: Option<format::context::Output>,
    format: StreamFormat,
    state: Option<EncoderState>,
    next_pts: i64,
}

impl FfmpegSink {
    fn create(path: &Path, format: StreamFormat) -> Result<Self> {
        let output = format::output(&path)
            .with_context(|| format!("could not create output '{}'", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            output: Some(output),
            format,
            state: None,
            next_pts: 0,
        })
    }

    fn open_encoder(
        output: &mut format::context::Output,
        format: StreamFormat,
        width: u32,
        height: u32,
    ) -> Result<EncoderState> {
        let global_header = output
            .format()
            .flags()
            .contains(format::flag::Flags::GLOBAL_HEADER);
        let codec = encoder::find(codec::Id::MPEG4).context("MPEG-4 encoder not found")?;

        let frame_rate = Rational::new((format.fps * 1000.0).round() as i32, 1000).reduce();
        let time_base = frame_rate.invert();

        let mut stream = output.add_stream(codec)?;
        let mut builder = codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()?;
        builder.set_width(width);
        builder.set_height(height);
        builder.set_format(ENCODE_FORMAT);
        builder.set_time_base(time_base);
        builder.set_frame_rate(Some(frame_rate));
        if global_header {
            builder.set_flags(codec::flag::Flags::GLOBAL_HEADER);
        }
        let encoder = builder.open_as(codec).context("failed to open MPEG-4 encoder")?;
        stream.set_parameters(&encoder);
        let stream_index = stream.index();

        output
            .write_header()
            .context("failed to write output header")?;
        log::info!("encoding {}x{} @ {:.2} fps", width, height, format.fps);

        Ok(EncoderState {
            encoder,
            to_yuv: None,
            rgb_frame: frame::Video::empty(),
            yuv_frame: frame::Video::empty(),
            stream_index,
            width,
            height,
            time_base,
        })
    }
}

impl EncoderState {
    fn encode(
        &mut self,
        output: &mut format::context::Output,
        image: &RgbImage,
        pts: i64,
    ) -> Result<()> {
        let (width, height) = image.dimensions();
        let stale = match &self.to_yuv {
            Some((_, w, h)) => (*w, *h) != (width, height),
            None => true,
        };
        if stale {
            // Frames of a different size are scaled to the encoder's geometry.
            let scaler = scaling::Context::get(
                format::Pixel::RGB24,
                width,
                height,
                ENCODE_FORMAT,
                self.width,
                self.height,
                SCALE_FLAGS,
            )
            .context("failed to create to-YUV scaler")?;
            self.to_yuv = Some((scaler, width, height));
            self.rgb_frame = frame::Video::new(format::Pixel::RGB24, width, height);
        }

        let row_bytes = width as usize * 3;
        let stride = self.rgb_frame.stride(0);
        let plane = self.rgb_frame.data_mut(0);
        for (row, src) in image.as_raw().chunks_exact(row_bytes).enumerate() {
            let start = row * stride;
            plane[start..start + row_bytes].copy_from_slice(src);
        }

        let Some((scaler, _, _)) = self.to_yuv.as_mut() else {
            bail!("ffmpeg scaler missing");
        };
        scaler
            .run(&self.rgb_frame, &mut self.yuv_frame)
            .context("to-YUV scaling failed")?;
        self.yuv_frame.set_pts(Some(pts));
        self.encoder
            .send_frame(&self.yuv_frame)
            .context("encoder send_frame")?;
        self.drain(output)
    }

    fn drain(&mut self, output: &mut format::context::Output) -> Result<()> {
        let mut packet = ffmpeg::Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            let stream_time_base = output
                .stream(self.stream_index)
                .map(|s| s.time_base())
                .ok_or_else(|| anyhow!("output stream {} missing", self.stream_index))?;
            packet.set_stream(self.stream_index);
            packet.rescale_ts(self.time_base, stream_time_base);
            packet
                .write_interleaved(output)
                .context("failed to write encoded packet")?;
        }
        Ok(())
    }
}

impl FrameSink for FfmpegSink {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        let Some(output) = self.output.as_mut() else {
            bail!("video writer for '{}' is already closed", self.path.display());
        };
        if self.state.is_none() {
            let (width, height) = if self.format.width > 0 && self.format.height > 0 {
                (self.format.width, self.format.height)
            } else {
                frame.dimensions()
            };
            self.state = Some(Self::open_encoder(output, self.format, width, height)?);
        }
        let Some(state) = self.state.as_mut() else {
            bail!("encoder not initialised");
        };
        state.encode(output, frame, self.next_pts)?;
        self.next_pts += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let Some(mut output) = self.output.take() else {
            return Ok(());
        };
        if let Some(mut state) = self.state.take() {
            let _ = state.encoder.send_eof();
            state.drain(&mut output)?;
            output
                .write_trailer()
                .context("failed to write output trailer")?;
            log::info!("wrote {} frames to {}", self.next_pts, self.path.display());
        }
        Ok(())
    }
}
