//! Regions of interest.
//!
//! - `Polygon` / `PolygonZone`: containment testing against detection anchors.
//! - `SiteType` / `ZoneLayout`: the fixed zone tables for each supported site.

mod layout;
mod polygon;

pub use layout::{SiteType, UnknownSiteType, ZoneLayout, ZoneSpec};
pub use polygon::{Point, Polygon, PolygonZone};
