use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use anyhow::{anyhow, Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{
    draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut, text_size,
};
use imageproc::rect::Rect;

use super::{Annotator, ZoneOverlay};
use crate::detect::BoundingBox;

const NEUTRAL: Rgb<u8> = Rgb([255, 255, 255]);
const TEXT_ON_COLOR: Rgb<u8> = Rgb([0, 0, 0]);

const PALETTE: [Rgb<u8>; 10] = [
    Rgb([163, 81, 251]),
    Rgb([255, 64, 64]),
    Rgb([255, 161, 160]),
    Rgb([255, 118, 51]),
    Rgb([255, 182, 51]),
    Rgb([209, 212, 53]),
    Rgb([76, 251, 18]),
    Rgb([148, 207, 26]),
    Rgb([64, 222, 138]),
    Rgb([27, 150, 64]),
];

/// Stroke widths and text sizes, in pixels of the native frame.
#[derive(Clone, Debug)]
pub struct OverlayStyle {
    pub box_thickness: u32,
    pub zone_thickness: u32,
    pub label_scale: f32,
    pub count_scale: f32,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            box_thickness: 4,
            zone_thickness: 6,
            label_scale: 48.0,
            count_scale: 96.0,
        }
    }
}

/// Draws boxes, captions and zone outlines directly onto the frame.
///
/// Text is only rendered when a font has been loaded; outlines and boxes are
/// always drawn.
#[derive(Clone, Default)]
pub struct OverlayAnnotator {
    style: OverlayStyle,
    font: Option<FontArc>,
}

impl OverlayAnnotator {
    pub fn new(style: OverlayStyle) -> Self {
        Self { style, font: None }
    }

    pub fn with_font(mut self, font: FontArc) -> Self {
        self.font = Some(font);
        self
    }

    pub fn with_font_file(self, path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read font file {}", path.display()))?;
        let font = FontArc::try_from_vec(bytes)
            .map_err(|e| anyhow!("invalid font file {}: {}", path.display(), e))?;
        Ok(self.with_font(font))
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    fn zone_color(color_index: Option<usize>) -> Rgb<u8> {
        color_index
            .map(|index| PALETTE[index % PALETTE.len()])
            .unwrap_or(NEUTRAL)
    }

    fn draw_box(&self, frame: &mut RgbImage, bbox: &BoundingBox, color: Rgb<u8>) {
        let x = bbox.x_min.round() as i32;
        let y = bbox.y_min.round() as i32;
        let w = bbox.width().round() as u32;
        let h = bbox.height().round() as u32;
        if w == 0 || h == 0 {
            return;
        }
        for t in 0..self.style.box_thickness {
            let rect = Rect::at(x - t as i32, y - t as i32).of_size(w + 2 * t, h + 2 * t);
            draw_hollow_rect_mut(frame, rect, color);
        }
    }

    fn draw_caption(
        &self,
        frame: &mut RgbImage,
        text: &str,
        x: i32,
        y: i32,
        scale: f32,
        background: Rgb<u8>,
    ) {
        let Some(font) = &self.font else {
            return;
        };
        let scale = PxScale::from(scale);
        let (tw, th) = text_size(scale, font, text);
        if tw > 0 && th > 0 {
            draw_filled_rect_mut(frame, Rect::at(x, y).of_size(tw + 8, th + 8), background);
        }
        draw_text_mut(frame, TEXT_ON_COLOR, x + 4, y + 4, scale, font, text);
    }

    fn draw_outline(&self, frame: &mut RgbImage, overlay: &ZoneOverlay<'_>, color: Rgb<u8>) {
        let points = overlay.zone.polygon.points();
        let half = (self.style.zone_thickness / 2) as i32;
        for (i, start) in points.iter().enumerate() {
            let end = points[(i + 1) % points.len()];
            for offset in -half..=half {
                let o = offset as f32;
                draw_line_segment_mut(
                    frame,
                    (start.x as f32 + o, start.y as f32),
                    (end.x as f32 + o, end.y as f32),
                    color,
                );
                draw_line_segment_mut(
                    frame,
                    (start.x as f32, start.y as f32 + o),
                    (end.x as f32, end.y as f32 + o),
                    color,
                );
            }
        }
    }
}

impl Annotator for OverlayAnnotator {
    fn annotate(&self, mut frame: RgbImage, overlay: &ZoneOverlay<'_>) -> Result<RgbImage> {
        if frame.width() == 0 || frame.height() == 0 {
            return Ok(frame);
        }
        let color = Self::zone_color(overlay.zone.color_index);

        for bbox in overlay.detections {
            self.draw_box(&mut frame, bbox, color);
        }
        if let Some(labels) = overlay.labels {
            for (bbox, label) in overlay.detections.iter().zip(labels) {
                let y = bbox.y_min.round() as i32 - (self.style.label_scale as i32 + 8);
                self.draw_caption(
                    &mut frame,
                    label,
                    bbox.x_min.round() as i32,
                    y.max(0),
                    self.style.label_scale,
                    color,
                );
            }
        }

        self.draw_outline(&mut frame, overlay, color);
        let (cx, cy) = overlay.zone.polygon.centroid();
        self.draw_caption(
            &mut frame,
            &overlay.count.to_string(),
            cx.round() as i32,
            cy.round() as i32,
            self.style.count_scale,
            color,
        );
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::ObjectClass;
    use crate::zone::{Polygon, ZoneSpec};

    fn zone(color_index: Option<usize>) -> ZoneSpec {
        ZoneSpec {
            name: "test",
            polygon: Polygon::from_table(&[(10, 10), (90, 10), (90, 90), (10, 90)]).unwrap(),
            color_index,
        }
    }

    #[test]
    fn draws_outline_and_boxes() {
        let annotator = OverlayAnnotator::default();
        let zone = zone(None);
        let bbox = BoundingBox::new(30.0, 30.0, 60.0, 70.0, ObjectClass::Person, 0.9);
        let overlay = ZoneOverlay {
            zone: &zone,
            count: 1,
            detections: std::slice::from_ref(&bbox),
            labels: None,
        };
        let frame = annotator.annotate(RgbImage::new(100, 100), &overlay).unwrap();
        assert_eq!(frame.dimensions(), (100, 100));
        assert_eq!(*frame.get_pixel(50, 10), NEUTRAL);
        assert_eq!(*frame.get_pixel(30, 50), NEUTRAL);
        assert_eq!(*frame.get_pixel(45, 50), Rgb([0, 0, 0]));
    }

    #[test]
    fn palette_colour_follows_zone_index() {
        let annotator = OverlayAnnotator::default();
        let zone = zone(Some(1));
        let overlay = ZoneOverlay {
            zone: &zone,
            count: 0,
            detections: &[],
            labels: None,
        };
        let frame = annotator.annotate(RgbImage::new(100, 100), &overlay).unwrap();
        assert_eq!(*frame.get_pixel(10, 50), PALETTE[1]);
    }

    #[test]
    fn empty_frames_pass_through() {
        let annotator = OverlayAnnotator::default();
        let zone = zone(None);
        let overlay = ZoneOverlay {
            zone: &zone,
            count: 0,
            detections: &[],
            labels: None,
        };
        let frame = annotator.annotate(RgbImage::new(0, 0), &overlay).unwrap();
        assert_eq!(frame.dimensions(), (0, 0));
    }
}
