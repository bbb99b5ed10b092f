use std::fmt;

/// Axis-aligned detection in frame pixel coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct BoundingBox {
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
    pub class: ObjectClass,
    /// Detector score in 0.0..=1.0.
    pub confidence: f32,
}

impl BoundingBox {
    pub fn new(
        x_min: f32,
        y_min: f32,
        x_max: f32,
        y_max: f32,
        class: ObjectClass,
        confidence: f32,
    ) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
            class,
            confidence,
        }
    }

    /// Bottom-center point, approximating where the object touches the ground.
    pub fn anchor(&self) -> (f64, f64) {
        (
            (self.x_min as f64 + self.x_max as f64) / 2.0,
            self.y_max as f64,
        )
    }

    pub fn width(&self) -> f32 {
        (self.x_max - self.x_min).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y_max - self.y_min).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix = (self.x_max.min(other.x_max) - self.x_min.max(other.x_min)).max(0.0);
        let iy = (self.y_max.min(other.y_max) - self.y_min.max(other.y_min)).max(0.0);
        let inter = ix * iy;
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }

    /// Caption drawn next to the box, e.g. `person 0.87`.
    pub fn label(&self) -> String {
        format!("{} {:.2}", self.class, self.confidence)
    }
}

/// Object classes the service distinguishes. Only `Person` is ever counted.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectClass {
    Person,
    Vehicle,
    Animal,
    Other(u16),
}

impl ObjectClass {
    /// Map a COCO-80 class index, as emitted by YOLO exports.
    pub fn from_coco_index(index: usize) -> Self {
        match index {
            0 => ObjectClass::Person,
            1..=8 => ObjectClass::Vehicle,
            14..=23 => ObjectClass::Animal,
            other => ObjectClass::Other(other as u16),
        }
    }
}

impl fmt::Display for ObjectClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectClass::Person => f.write_str("person"),
            ObjectClass::Vehicle => f.write_str("vehicle"),
            ObjectClass::Animal => f.write_str("animal"),
            ObjectClass::Other(index) => write!(f, "class_{index}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anchor_is_bottom_center() {
        let bbox = BoundingBox::new(10.0, 20.0, 30.0, 80.0, ObjectClass::Person, 0.5);
        assert_eq!(bbox.anchor(), (20.0, 80.0));
    }

    #[test]
    fn label_uses_two_decimals() {
        let bbox = BoundingBox::new(0.0, 0.0, 1.0, 1.0, ObjectClass::Person, 0.876);
        assert_eq!(bbox.label(), "person 0.88");
    }

    #[test]
    fn iou_of_disjoint_and_identical_boxes() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0, ObjectClass::Person, 0.9);
        let b = BoundingBox::new(20.0, 20.0, 30.0, 30.0, ObjectClass::Person, 0.9);
        assert_eq!(a.iou(&b), 0.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn coco_index_mapping() {
        assert_eq!(ObjectClass::from_coco_index(0), ObjectClass::Person);
        assert_eq!(ObjectClass::from_coco_index(2), ObjectClass::Vehicle);
        assert_eq!(ObjectClass::from_coco_index(16), ObjectClass::Animal);
        assert_eq!(ObjectClass::from_coco_index(56), ObjectClass::Other(56));
    }
}
