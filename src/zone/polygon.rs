use anyhow::{anyhow, Result};

use crate::detect::BoundingBox;

/// Tolerance used when deciding whether an anchor lies on a polygon edge.
const EDGE_EPSILON: f64 = 1e-9;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    fn as_f64(self) -> (f64, f64) {
        (self.x as f64, self.y as f64)
    }
}

/// Closed polygon in native camera pixel coordinates.
///
/// Edges run between consecutive points and from the last point back to the first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Polygon {
    points: Vec<Point>,
}

impl Polygon {
    pub fn new(points: Vec<Point>) -> Result<Self> {
        if points.len() < 3 {
            return Err(anyhow!(
                "polygon needs at least 3 points, got {}",
                points.len()
            ));
        }
        Ok(Self { points })
    }

    pub fn from_table(table: &[(i32, i32)]) -> Result<Self> {
        Self::new(table.iter().map(|&(x, y)| Point::new(x, y)).collect())
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Even-odd containment test. Points on an edge or vertex count as inside.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        let n = self.points.len();
        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let (xi, yi) = self.points[i].as_f64();
            let (xj, yj) = self.points[j].as_f64();
            if on_segment(x, y, (xi, yi), (xj, yj)) {
                return true;
            }
            if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
                inside = !inside;
            }
            j = i;
        }
        inside
    }

    /// Arithmetic mean of the vertices; used to place zone captions.
    pub fn centroid(&self) -> (f32, f32) {
        let n = self.points.len() as f32;
        let (sx, sy) = self
            .points
            .iter()
            .fold((0.0f32, 0.0f32), |(sx, sy), p| (sx + p.x as f32, sy + p.y as f32));
        (sx / n, sy / n)
    }
}

fn on_segment(px: f64, py: f64, a: (f64, f64), b: (f64, f64)) -> bool {
    let (ax, ay) = a;
    let (bx, by) = b;
    let cross = (bx - ax) * (py - ay) - (by - ay) * (px - ax);
    let scale = ((bx - ax).abs() + (by - ay).abs()).max(1.0);
    if cross.abs() > EDGE_EPSILON * scale {
        return false;
    }
    px >= ax.min(bx) - EDGE_EPSILON
        && px <= ax.max(bx) + EDGE_EPSILON
        && py >= ay.min(by) - EDGE_EPSILON
        && py <= ay.max(by) + EDGE_EPSILON
}

/// One region of interest plus the membership state of the frame last evaluated.
///
/// The mask is rebuilt on every `trigger` call and always has one entry per
/// detection passed in, in input order.
#[derive(Clone, Debug)]
pub struct PolygonZone {
    polygon: Polygon,
    mask: Vec<bool>,
    current_count: usize,
}

impl PolygonZone {
    pub fn new(polygon: Polygon) -> Self {
        Self {
            polygon,
            mask: Vec::new(),
            current_count: 0,
        }
    }

    pub fn polygon(&self) -> &Polygon {
        &self.polygon
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        self.polygon.contains(x, y)
    }

    /// Test every detection's bottom-center anchor and record the result.
    pub fn trigger(&mut self, detections: &[BoundingBox]) -> &[bool] {
        self.mask.clear();
        self.mask.extend(detections.iter().map(|det| {
            let (x, y) = det.anchor();
            self.polygon.contains(x, y)
        }));
        self.current_count = self.mask.iter().filter(|&&hit| hit).count();
        &self.mask
    }

    /// Detections flagged by the last `trigger` call.
    pub fn contained(&self, detections: &[BoundingBox]) -> Vec<BoundingBox> {
        detections
            .iter()
            .zip(&self.mask)
            .filter(|(_, &hit)| hit)
            .map(|(det, _)| det.clone())
            .collect()
    }

    pub fn current_count(&self) -> usize {
        self.current_count
    }

    pub fn mask(&self) -> &[bool] {
        &self.mask
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::ObjectClass;

    fn square() -> Polygon {
        Polygon::from_table(&[(0, 0), (100, 0), (100, 100), (0, 100)]).unwrap()
    }

    fn person_at(x: f32, y: f32) -> BoundingBox {
        BoundingBox::new(x - 10.0, y - 40.0, x + 10.0, y, ObjectClass::Person, 0.9)
    }

    #[test]
    fn rejects_degenerate_polygons() {
        assert!(Polygon::from_table(&[(0, 0), (1, 1)]).is_err());
    }

    #[test]
    fn strict_interior_and_exterior() {
        let poly = square();
        assert!(poly.contains(50.0, 50.0));
        assert!(!poly.contains(150.0, 50.0));
        assert!(!poly.contains(-0.5, 50.0));
        assert!(!poly.contains(50.0, 100.5));
    }

    #[test]
    fn boundary_counts_as_inside() {
        let poly = square();
        assert!(poly.contains(0.0, 50.0));
        assert!(poly.contains(100.0, 50.0));
        assert!(poly.contains(50.0, 0.0));
        assert!(poly.contains(50.0, 100.0));
        assert!(poly.contains(100.0, 100.0));
        assert!(poly.contains(0.0, 0.0));
    }

    #[test]
    fn slanted_edges_are_handled() {
        let tri = Polygon::from_table(&[(0, 0), (100, 0), (0, 100)]).unwrap();
        assert!(tri.contains(50.0, 50.0));
        assert!(tri.contains(10.0, 10.0));
        assert!(!tri.contains(60.0, 60.0));
    }

    #[test]
    fn trigger_uses_bottom_center_anchor() {
        let mut zone = PolygonZone::new(square());
        // Box body outside the zone, feet inside.
        let feet_inside = BoundingBox::new(40.0, -80.0, 60.0, 10.0, ObjectClass::Person, 0.8);
        // Box mostly inside, feet below the zone.
        let feet_outside = BoundingBox::new(40.0, 50.0, 60.0, 140.0, ObjectClass::Person, 0.8);
        let mask = zone.trigger(&[feet_inside, feet_outside]).to_vec();
        assert_eq!(mask, vec![true, false]);
        assert_eq!(zone.current_count(), 1);
    }

    #[test]
    fn mask_is_reset_every_frame() {
        let mut zone = PolygonZone::new(square());
        let dets = vec![person_at(50.0, 50.0), person_at(20.0, 90.0), person_at(500.0, 5.0)];
        zone.trigger(&dets);
        assert_eq!(zone.mask().len(), 3);
        assert_eq!(zone.current_count(), 2);
        assert_eq!(zone.contained(&dets).len(), 2);

        zone.trigger(&[]);
        assert!(zone.mask().is_empty());
        assert_eq!(zone.current_count(), 0);
    }
}
