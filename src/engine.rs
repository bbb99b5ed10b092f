//! Per-frame zone occupancy.
//!
//! The engine owns one `PolygonZone` per layout zone for the lifetime of a job.
//! Each call to `evaluate` filters the frame's detections down to confident
//! persons, triggers every zone in layout order, and summarises the result.

use crate::detect::{BoundingBox, ObjectClass};
use crate::zone::{PolygonZone, ZoneLayout};

/// Detections attributed to one zone for one frame.
#[derive(Clone, Debug, Default)]
pub struct ZoneOccupancy {
    pub detections: Vec<BoundingBox>,
}

impl ZoneOccupancy {
    pub fn count(&self) -> usize {
        self.detections.len()
    }
}

/// Occupancy of every zone for a single frame.
#[derive(Clone, Debug)]
pub struct FrameOccupancy {
    /// Person detections that survived class and confidence filtering.
    pub persons: Vec<BoundingBox>,
    /// One entry per layout zone, in layout order.
    pub zones: Vec<ZoneOccupancy>,
    /// Sum of the per-zone counts. A person standing in two overlapping zones
    /// contributes to both.
    pub total: usize,
    pub log_line: String,
}

impl FrameOccupancy {
    pub fn zone_counts(&self) -> Vec<usize> {
        self.zones.iter().map(ZoneOccupancy::count).collect()
    }
}

pub struct ZoneOccupancyEngine {
    zones: Vec<PolygonZone>,
    multi_zone: bool,
    confidence_threshold: f32,
}

impl ZoneOccupancyEngine {
    /// Build an engine using the layout's own confidence threshold.
    pub fn new(layout: &ZoneLayout) -> Self {
        Self::with_threshold(layout, layout.confidence_threshold())
    }

    pub fn with_threshold(layout: &ZoneLayout, confidence_threshold: f32) -> Self {
        Self {
            zones: layout
                .zones()
                .iter()
                .map(|spec| PolygonZone::new(spec.polygon.clone()))
                .collect(),
            multi_zone: layout.is_multi_zone(),
            confidence_threshold,
        }
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    pub fn zones(&self) -> &[PolygonZone] {
        &self.zones
    }

    pub fn evaluate(&mut self, detections: &[BoundingBox]) -> FrameOccupancy {
        let persons: Vec<BoundingBox> = detections
            .iter()
            .filter(|det| {
                det.class == ObjectClass::Person && det.confidence > self.confidence_threshold
            })
            .cloned()
            .collect();

        let mut zones = Vec::with_capacity(self.zones.len());
        let mut total = 0;
        for zone in &mut self.zones {
            zone.trigger(&persons);
            let occupancy = ZoneOccupancy {
                detections: zone.contained(&persons),
            };
            total += occupancy.count();
            zones.push(occupancy);
        }

        let log_line = if self.multi_zone {
            zones
                .iter()
                .map(|zone| format!("{} persons in zone", zone.count()))
                .collect::<Vec<_>>()
                .join(", ")
        } else {
            format!("{total} persons detected")
        };

        FrameOccupancy {
            persons,
            zones,
            total,
            log_line,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zone::SiteType;

    fn person(anchor_x: f32, anchor_y: f32, confidence: f32) -> BoundingBox {
        BoundingBox::new(
            anchor_x - 20.0,
            anchor_y - 120.0,
            anchor_x + 20.0,
            anchor_y,
            ObjectClass::Person,
            confidence,
        )
    }

    fn engine_for(site: SiteType) -> ZoneOccupancyEngine {
        ZoneOccupancyEngine::new(&ZoneLayout::for_site(site).unwrap())
    }

    #[test]
    fn grocery_counts_people_in_checkout_zone() {
        let mut engine = engine_for(SiteType::GroceryStore);
        let frame = engine.evaluate(&[
            person(2200.0, 1800.0, 0.3),
            person(2200.0, 1800.0, 0.05),
            person(100.0, 100.0, 0.9),
        ]);
        assert_eq!(frame.persons.len(), 3);
        assert_eq!(frame.zone_counts(), vec![2]);
        assert_eq!(frame.total, 2);
        assert_eq!(frame.log_line, "2 persons detected");
    }

    #[test]
    fn non_person_classes_never_reach_the_zones() {
        let mut engine = engine_for(SiteType::Subway);
        let mut cart = person(900.0, 2000.0, 0.99);
        cart.class = ObjectClass::Vehicle;
        let frame = engine.evaluate(&[cart, person(900.0, 2000.0, 0.4)]);
        assert_eq!(frame.persons.len(), 1);
        assert_eq!(frame.total, 1);
        assert_eq!(engine.zones()[0].mask().len(), 1);
    }

    #[test]
    fn empty_frame_still_produces_a_log_line() {
        let mut grocery = engine_for(SiteType::GroceryStore);
        let frame = grocery.evaluate(&[]);
        assert_eq!(frame.total, 0);
        assert_eq!(frame.zone_counts(), vec![0]);
        assert_eq!(frame.log_line, "0 persons detected");

        let mut market = engine_for(SiteType::MarketSquare);
        let frame = market.evaluate(&[]);
        assert_eq!(frame.zone_counts(), vec![0; 7]);
        assert_eq!(frame.log_line, vec!["0 persons in zone"; 7].join(", "));
    }

    #[test]
    fn market_square_applies_confidence_threshold() {
        let mut engine = engine_for(SiteType::MarketSquare);
        let frame = engine.evaluate(&[
            person(1080.0, 1920.0, 0.51),
            person(1080.0, 1920.0, 0.5),
            person(1080.0, 1920.0, 0.2),
        ]);
        assert_eq!(frame.persons.len(), 1);
        assert_eq!(frame.zone_counts(), vec![1, 0, 0, 0, 0, 0, 0]);
        assert_eq!(
            frame.log_line,
            "1 persons in zone, 0 persons in zone, 0 persons in zone, 0 persons in zone, \
             0 persons in zone, 0 persons in zone, 0 persons in zone"
        );
    }

    #[test]
    fn shared_boundary_counts_toward_both_zones() {
        let mut engine = engine_for(SiteType::MarketSquare);
        // (540, 985) is a vertex shared by center, upper_left and top.
        let frame = engine.evaluate(&[person(540.0, 985.0, 0.9)]);
        assert_eq!(frame.zone_counts(), vec![1, 1, 0, 1, 0, 0, 0]);
        assert_eq!(frame.total, 3);
        assert_eq!(frame.total, frame.zone_counts().iter().sum::<usize>());

        // Same input, same answer.
        let again = engine.evaluate(&[person(540.0, 985.0, 0.9)]);
        assert_eq!(again.zone_counts(), frame.zone_counts());
    }

    #[test]
    fn threshold_override_is_respected() {
        let layout = ZoneLayout::for_site(SiteType::GroceryStore).unwrap();
        let mut engine = ZoneOccupancyEngine::with_threshold(&layout, 0.8);
        let frame = engine.evaluate(&[person(2200.0, 1800.0, 0.7), person(2200.0, 1800.0, 0.9)]);
        assert_eq!(frame.total, 1);
    }
}
