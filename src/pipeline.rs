//! Frame loop for one job.
//!
//! Frames are pulled, detected, counted, annotated and written strictly in
//! sequence. Nothing but the last written frame is retained.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use image::{ImageFormat, RgbImage};

use crate::annotate::{Annotator, ZoneOverlay};
use crate::detect::{BoundingBox, SharedDetector};
use crate::engine::{FrameOccupancy, ZoneOccupancyEngine};
use crate::video::VideoStreamAdapter;
use crate::zone::ZoneLayout;

const SNAPSHOT_SUFFIX: &str = "_inference.jpg";

/// Called after every processed frame with the number of frames so far.
pub type ProgressFn = Box<dyn Fn(u64) + Send + Sync>;

#[derive(Debug, Default)]
pub struct PipelineOutcome {
    /// Sum of every zone count over every processed frame.
    pub total_count: u64,
    /// One line per processed frame.
    pub logs: Vec<String>,
    pub frames_processed: u64,
    pub frames_written: u64,
    /// Last written frame, kept only when at least one frame was written.
    pub snapshot: Option<RgbImage>,
    pub snapshot_jpeg: Option<Vec<u8>>,
    pub snapshot_path: Option<PathBuf>,
    /// Output video, absent when nothing was written (the file is deleted).
    pub output_path: Option<PathBuf>,
}

#[derive(Default)]
struct Accumulator {
    total_count: u64,
    logs: Vec<String>,
    frames_processed: u64,
    frames_written: u64,
    last_frame: Option<RgbImage>,
}

pub struct Pipeline {
    detector: SharedDetector,
    annotator: Arc<dyn Annotator>,
    progress: Option<ProgressFn>,
}

impl Pipeline {
    pub fn new(detector: SharedDetector, annotator: Arc<dyn Annotator>) -> Self {
        Self {
            detector,
            annotator,
            progress: None,
        }
    }

    pub fn with_progress<F>(mut self, progress: F) -> Self
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        self.progress = Some(Box::new(progress));
        self
    }

    /// Process every frame of `adapter`, writing annotated frames to its open
    /// writer. The adapter is released on every exit path.
    pub fn run(
        &self,
        layout: &ZoneLayout,
        adapter: &mut VideoStreamAdapter,
        confidence_threshold: f32,
    ) -> Result<PipelineOutcome> {
        let mut acc = Accumulator::default();
        let looped = self.process_frames(layout, adapter, confidence_threshold, &mut acc);
        let released = adapter.release();
        looped?;
        released.context("failed to finalize output video")?;

        let output_path = adapter.output_path().map(Path::to_path_buf);
        finalize(acc, output_path)
    }

    fn process_frames(
        &self,
        layout: &ZoneLayout,
        adapter: &mut VideoStreamAdapter,
        confidence_threshold: f32,
        acc: &mut Accumulator,
    ) -> Result<()> {
        let mut engine = ZoneOccupancyEngine::with_threshold(layout, confidence_threshold);

        while let Some(frame) = adapter.next_frame()? {
            let detections = self.detect(&frame)?;
            let occupancy = engine.evaluate(&detections);
            let annotated = self.annotate(layout, frame, &occupancy)?;

            if annotated.width() > 0 && annotated.height() > 0 {
                adapter.write_frame(&annotated)?;
                acc.frames_written += 1;
                acc.last_frame = Some(annotated);
            }

            acc.total_count += occupancy.total as u64;
            acc.logs.push(occupancy.log_line);
            acc.frames_processed += 1;
            log::debug!(
                "frame {}: {}",
                acc.frames_processed,
                acc.logs.last().map(String::as_str).unwrap_or_default()
            );
            if let Some(progress) = &self.progress {
                progress(acc.frames_processed);
            }
        }
        Ok(())
    }

    fn detect(&self, frame: &RgbImage) -> Result<Vec<BoundingBox>> {
        let mut detector = self
            .detector
            .lock()
            .map_err(|_| anyhow!("detector lock poisoned"))?;
        detector
            .detect(frame)
            .with_context(|| format!("{} detector failed", detector.name()))
    }

    fn annotate(
        &self,
        layout: &ZoneLayout,
        mut frame: RgbImage,
        occupancy: &FrameOccupancy,
    ) -> Result<RgbImage> {
        let multi_zone = layout.is_multi_zone();
        let labels: Option<Vec<String>> =
            (!multi_zone).then(|| occupancy.persons.iter().map(BoundingBox::label).collect());

        for (spec, zone) in layout.zones().iter().zip(&occupancy.zones) {
            let detections = if multi_zone {
                zone.detections.as_slice()
            } else {
                occupancy.persons.as_slice()
            };
            let overlay = ZoneOverlay {
                zone: spec,
                count: zone.count(),
                detections,
                labels: labels.as_deref(),
            };
            frame = self.annotator.annotate(frame, &overlay)?;
            if frame.width() == 0 || frame.height() == 0 {
                break;
            }
        }
        Ok(frame)
    }
}

fn finalize(acc: Accumulator, output_path: Option<PathBuf>) -> Result<PipelineOutcome> {
    let mut outcome = PipelineOutcome {
        total_count: acc.total_count,
        logs: acc.logs,
        frames_processed: acc.frames_processed,
        frames_written: acc.frames_written,
        ..PipelineOutcome::default()
    };

    let (Some(last_frame), Some(output_path)) = (acc.last_frame, output_path.clone()) else {
        if let Some(path) = output_path.filter(|p| p.exists()) {
            std::fs::remove_file(&path)
                .with_context(|| format!("failed to remove empty output {}", path.display()))?;
            log::info!("no frames written, removed {}", path.display());
        }
        return Ok(outcome);
    };

    let jpeg = encode_jpeg(&last_frame)?;
    let snapshot_path = snapshot_path_for(&output_path);
    std::fs::write(&snapshot_path, &jpeg)
        .with_context(|| format!("failed to write snapshot {}", snapshot_path.display()))?;

    outcome.snapshot = Some(last_frame);
    outcome.snapshot_jpeg = Some(jpeg);
    outcome.snapshot_path = Some(snapshot_path);
    outcome.output_path = Some(output_path);
    Ok(outcome)
}

pub fn encode_jpeg(frame: &RgbImage) -> Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    frame
        .write_to(&mut buf, ImageFormat::Jpeg)
        .context("failed to encode snapshot as JPEG")?;
    Ok(buf.into_inner())
}

/// `result_ab12cd34.mp4` -> `result_ab12cd34_inference.jpg`, in the same directory.
pub fn snapshot_path_for(video: &Path) -> PathBuf {
    let stem = video
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    video.with_file_name(format!("{stem}{SNAPSHOT_SUFFIX}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::Mutex;

    use crate::annotate::OverlayAnnotator;
    use crate::detect::{DetectorBackend, ObjectClass, StubBackend};
    use crate::video::synthetic::{synthetic_frame, SyntheticRecording, SyntheticSource};
    use crate::video::{
        FrameSink, FrameSource, StreamFormat, SyntheticBackend, SyntheticClip, VideoBackend,
    };
    use crate::zone::SiteType;

    struct ScriptedDetector {
        frames: VecDeque<Vec<BoundingBox>>,
    }

    impl DetectorBackend for ScriptedDetector {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn detect(&mut self, _frame: &RgbImage) -> Result<Vec<BoundingBox>> {
            Ok(self.frames.pop_front().unwrap_or_default())
        }
    }

    struct FailingDetector;

    impl DetectorBackend for FailingDetector {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn detect(&mut self, _frame: &RgbImage) -> Result<Vec<BoundingBox>> {
            Err(anyhow!("model exploded"))
        }
    }

    struct BlankingAnnotator;

    impl Annotator for BlankingAnnotator {
        fn annotate(&self, _frame: RgbImage, _overlay: &ZoneOverlay<'_>) -> Result<RgbImage> {
            Ok(RgbImage::new(0, 0))
        }
    }

    struct TrackingSink {
        finished: Arc<AtomicBool>,
    }

    impl FrameSink for TrackingSink {
        fn write_frame(&mut self, _frame: &RgbImage) -> Result<()> {
            Ok(())
        }

        fn finish(&mut self) -> Result<()> {
            self.finished.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct TrackingBackend {
        finished: Arc<AtomicBool>,
    }

    impl VideoBackend for TrackingBackend {
        fn name(&self) -> &'static str {
            "tracking"
        }

        fn open(&self, _path: &Path) -> Result<Box<dyn FrameSource>> {
            Ok(Box::new(SyntheticSource::new(SyntheticClip::new(16, 16, 3))))
        }

        fn create_sink(&self, _path: &Path, _format: StreamFormat) -> Result<Box<dyn FrameSink>> {
            Ok(Box::new(TrackingSink {
                finished: Arc::clone(&self.finished),
            }))
        }
    }

    fn checkout_person() -> BoundingBox {
        BoundingBox::new(2180.0, 1680.0, 2220.0, 1800.0, ObjectClass::Person, 0.8)
    }

    fn shared(detector: impl DetectorBackend + 'static) -> SharedDetector {
        Arc::new(Mutex::new(detector))
    }

    fn synthetic_adapter(dir: &Path, clip: SyntheticClip) -> VideoStreamAdapter {
        let mut adapter =
            VideoStreamAdapter::from_source(Box::new(SyntheticSource::new(clip))).unwrap();
        adapter
            .open_writer(&SyntheticBackend, &dir.join("result_0000abcd.mp4"))
            .unwrap();
        adapter
    }

    #[test]
    fn five_frame_grocery_run() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ZoneLayout::for_site(SiteType::GroceryStore).unwrap();
        let detector = shared(ScriptedDetector {
            frames: VecDeque::from(vec![
                vec![checkout_person()],
                vec![checkout_person()],
                vec![checkout_person()],
            ]),
        });
        let seen = Arc::new(AtomicU64::new(0));
        let seen_by_progress = Arc::clone(&seen);
        let pipeline = Pipeline::new(detector, Arc::new(OverlayAnnotator::default()))
            .with_progress(move |n| seen_by_progress.store(n, Ordering::SeqCst));

        let mut adapter = synthetic_adapter(dir.path(), SyntheticClip::new(64, 48, 5));
        let outcome = pipeline
            .run(&layout, &mut adapter, layout.confidence_threshold())
            .unwrap();

        assert_eq!(outcome.total_count, 3);
        assert_eq!(
            outcome.logs,
            vec![
                "1 persons detected",
                "1 persons detected",
                "1 persons detected",
                "0 persons detected",
                "0 persons detected",
            ]
        );
        assert_eq!(outcome.frames_written, 5);
        assert_eq!(seen.load(Ordering::SeqCst), 5);

        let output = outcome.output_path.unwrap();
        assert_eq!(SyntheticRecording::read(&output).unwrap().frames.len(), 5);
        let snapshot_path = outcome.snapshot_path.unwrap();
        assert_eq!(
            snapshot_path.file_name().unwrap(),
            "result_0000abcd_inference.jpg"
        );
        assert!(snapshot_path.exists());
        // The frame is far smaller than the zone table, so nothing is drawn on it.
        assert_eq!(outcome.snapshot.unwrap(), synthetic_frame(4, 64, 48));
        assert!(!outcome.snapshot_jpeg.unwrap().is_empty());
    }

    #[test]
    fn nothing_written_removes_output() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ZoneLayout::for_site(SiteType::Subway).unwrap();
        let pipeline = Pipeline::new(shared(StubBackend::new()), Arc::new(BlankingAnnotator));
        let mut adapter = synthetic_adapter(dir.path(), SyntheticClip::new(32, 32, 2));

        let outcome = pipeline.run(&layout, &mut adapter, 0.0).unwrap();
        assert_eq!(outcome.frames_processed, 2);
        assert_eq!(outcome.frames_written, 0);
        assert_eq!(outcome.logs.len(), 2);
        assert!(outcome.output_path.is_none());
        assert!(outcome.snapshot_path.is_none());
        assert!(!dir.path().join("result_0000abcd.mp4").exists());
        assert!(!dir.path().join("result_0000abcd_inference.jpg").exists());
    }

    #[test]
    fn empty_stream_produces_no_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ZoneLayout::for_site(SiteType::MarketSquare).unwrap();
        let pipeline = Pipeline::new(
            shared(StubBackend::new()),
            Arc::new(OverlayAnnotator::default()),
        );
        let mut adapter = synthetic_adapter(dir.path(), SyntheticClip::new(32, 32, 0));

        let outcome = pipeline.run(&layout, &mut adapter, 0.5).unwrap();
        assert_eq!(outcome.total_count, 0);
        assert!(outcome.logs.is_empty());
        assert!(outcome.output_path.is_none());
        assert!(!dir.path().join("result_0000abcd.mp4").exists());
    }

    #[test]
    fn detector_failure_still_releases_writer() {
        let dir = tempfile::tempdir().unwrap();
        let finished = Arc::new(AtomicBool::new(false));
        let backend = TrackingBackend {
            finished: Arc::clone(&finished),
        };
        let input = dir.path().join("temp_0000abcd.mp4");
        let mut adapter = VideoStreamAdapter::open(&backend, &input).unwrap();
        adapter
            .open_writer(&backend, &dir.path().join("result_0000abcd.mp4"))
            .unwrap();

        let layout = ZoneLayout::for_site(SiteType::GroceryStore).unwrap();
        let pipeline = Pipeline::new(
            shared(FailingDetector),
            Arc::new(OverlayAnnotator::default()),
        );
        let err = pipeline.run(&layout, &mut adapter, 0.0).unwrap_err();
        assert!(format!("{err:#}").contains("model exploded"));
        assert!(finished.load(Ordering::SeqCst));
        assert!(adapter.next_frame().unwrap().is_none());
    }

    #[test]
    fn snapshot_name_follows_result_name() {
        assert_eq!(
            snapshot_path_for(Path::new("/work/result_1a2b3c4d.mov")),
            PathBuf::from("/work/result_1a2b3c4d_inference.jpg")
        );
    }
}
