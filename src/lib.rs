//! Zone occupancy counting for uploaded videos.
//!
//! Every frame of a video is run through a person detector, each detection's
//! ground anchor (bottom-centre of its box) is tested against the polygonal
//! zones of a fixed site layout, and the per-zone counts are drawn onto the
//! frame and written to an annotated copy of the video.
//!
//! # Module Structure
//!
//! - `zone`: polygons, containment, and the fixed site layouts
//! - `detect`: detector trait, backends, and `BoundingBox`
//! - `engine`: per-frame zone occupancy and log lines
//! - `annotate`: drawing zones, boxes and counts onto frames
//! - `video`: decode/encode backends and the metadata-recovering stream adapter
//! - `pipeline`: the frame loop for one job
//! - `job`: upload lifecycle, artifact naming and cleanup
//! - `api`: HTTP surface
//! - `config`: file + environment configuration

pub mod annotate;
pub mod api;
pub mod config;
pub mod detect;
pub mod engine;
pub mod job;
pub mod pipeline;
pub mod video;
pub mod zone;

pub use annotate::{Annotator, OverlayAnnotator, ZoneOverlay};
pub use detect::{BackendRegistry, BoundingBox, DetectorBackend, ObjectClass, SharedDetector};
pub use engine::{FrameOccupancy, ZoneOccupancyEngine};
pub use job::{JobError, JobManager, JobResult, JobSettings};
pub use pipeline::{Pipeline, PipelineOutcome};
pub use video::{VideoBackend, VideoStreamAdapter};
pub use zone::{Polygon, PolygonZone, SiteType, ZoneLayout};
