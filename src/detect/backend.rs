use std::sync::{Arc, Mutex};

use anyhow::Result;
use image::RgbImage;

use crate::detect::result::BoundingBox;

/// Detector backend trait.
///
/// Backends turn one decoded RGB frame into bounding boxes in that frame's
/// pixel coordinates. They are called synchronously once per frame.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<BoundingBox>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Detector shared between concurrently running jobs.
pub type SharedDetector = Arc<Mutex<dyn DetectorBackend>>;
