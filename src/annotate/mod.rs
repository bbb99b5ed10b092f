//! Frame annotation.
//!
//! The pipeline asks the annotator to draw one zone at a time: the zone's
//! outline and current count, the detections attributed to it, and (for
//! single-zone layouts) a `"<class> <confidence>"` caption per detection.

mod overlay;

use anyhow::Result;
use image::RgbImage;

use crate::detect::BoundingBox;
use crate::zone::ZoneSpec;

pub use overlay::{OverlayAnnotator, OverlayStyle};

/// Everything needed to draw one zone on one frame.
pub struct ZoneOverlay<'a> {
    pub zone: &'a ZoneSpec,
    /// People counted in the zone this frame.
    pub count: usize,
    pub detections: &'a [BoundingBox],
    /// Captions aligned with `detections`, when the layout shows them.
    pub labels: Option<&'a [String]>,
}

/// Annotation capability injected into the pipeline.
///
/// Implementations take ownership of the frame and hand back the annotated
/// one. Returning an empty (0x0) image tells the pipeline there is nothing to
/// write for this frame.
pub trait Annotator: Send + Sync {
    fn annotate(&self, frame: RgbImage, overlay: &ZoneOverlay<'_>) -> Result<RgbImage>;
}
