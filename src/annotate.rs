use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, Rgb, RgbImage};

use crate::detection::{Detection, DetectionSet, Label};
use crate::error::Error;
use crate::frame::Frame;

pub const BOX_THICKNESS: u32 = 2;
const TAG_HEIGHT: u32 = 6;
const TAG_MAX_WIDTH: u32 = 60;

/// Produces the display copy of a frame with detections burned in. The
/// result is what the preview shows and what clips and snapshots record.
pub trait Annotator: Send + Sync {
    fn annotate(&self, frame: &Frame, detections: &DetectionSet) -> Frame;
}

/// Draws a box around every confident detection plus a tag above it whose
/// colour encodes the label and whose length encodes the confidence.
#[derive(Debug, Clone)]
pub struct BoxAnnotator {
    threshold: f32,
}

impl BoxAnnotator {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }
}

pub fn label_color(label: Label) -> Rgb<u8> {
    match label {
        Label::Fire => Rgb([255, 0, 0]),
        Label::Smoke => Rgb([160, 160, 160]),
        Label::Other => Rgb([255, 255, 0]),
    }
}

impl Annotator for BoxAnnotator {
    fn annotate(&self, frame: &Frame, detections: &DetectionSet) -> Frame {
        let mut confident = detections.confident(self.threshold).peekable();
        if confident.peek().is_none() {
            return frame.clone();
        }

        let mut img = (*frame.pixels).clone();
        for det in confident {
            draw_detection(&mut img, det);
        }

        frame.with_pixels(img)
    }
}

fn draw_detection(img: &mut RgbImage, det: &Detection) {
    let (w, h) = img.dimensions();
    let (x1, y1, x2, y2) = match det.bbox.clamped(w, h) {
        Some(corners) => corners,
        None => return,
    };

    draw_rect(img, (x1, y1, x2, y2), Rgb([255, 0, 0]), BOX_THICKNESS);

    let tag_len = ((TAG_MAX_WIDTH as f32 * det.confidence).round() as u32).max(1);
    let tag_bottom = y1.saturating_sub(1);
    let tag_top = tag_bottom.saturating_sub(TAG_HEIGHT - 1);
    let tag_right = (x1 + tag_len - 1).min(w - 1);
    fill_rect(img, (x1, tag_top, tag_right, tag_bottom), label_color(det.label));
}

/// Outline of an inclusive rectangle, growing inwards with `thickness`.
pub fn draw_rect(
    img: &mut RgbImage,
    (x1, y1, x2, y2): (u32, u32, u32, u32),
    color: Rgb<u8>,
    thickness: u32,
) {
    for t in 0..thickness {
        let (l, tp) = (x1 + t, y1 + t);
        let (r, b) = (x2.saturating_sub(t), y2.saturating_sub(t));
        if l > r || tp > b {
            break;
        }

        for x in l..=r {
            img.put_pixel(x, tp, color);
            img.put_pixel(x, b, color);
        }

        for y in tp..=b {
            img.put_pixel(l, y, color);
            img.put_pixel(r, y, color);
        }
    }
}

pub fn fill_rect(img: &mut RgbImage, (x1, y1, x2, y2): (u32, u32, u32, u32), color: Rgb<u8>) {
    for y in y1..=y2.min(img.height().saturating_sub(1)) {
        for x in x1..=x2.min(img.width().saturating_sub(1)) {
            img.put_pixel(x, y, color);
        }
    }
}

pub fn encode_jpeg(img: &RgbImage, quality: u8) -> Result<Vec<u8>, Error> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100)).encode(
        img.as_raw(),
        img.width(),
        img.height(),
        ColorType::Rgb8,
    )?;

    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bbox::BBox;
    use chrono::Local;

    fn frame() -> Frame {
        Frame::blank(3, Local::now(), 64, 64)
    }

    #[test]
    fn untouched_without_confident_detections() {
        let f = frame();
        let set = DetectionSet::new(vec![Detection::new(
            Label::Fire,
            0.1,
            BBox::ltrb(10.0, 10.0, 20.0, 20.0),
        )]);

        let out = BoxAnnotator::new(0.3).annotate(&f, &set);
        assert!(std::sync::Arc::ptr_eq(&out.pixels, &f.pixels));
    }

    #[test]
    fn draws_box_and_tag() {
        let f = frame();
        let set = DetectionSet::new(vec![Detection::new(
            Label::Smoke,
            0.5,
            BBox::ltrb(10.0, 20.0, 30.0, 40.0),
        )]);

        let out = BoxAnnotator::new(0.3).annotate(&f, &set);
        assert_eq!(out.index, 3);
        assert_eq!(out.pixels.get_pixel(10, 20), &Rgb([255, 0, 0]));
        assert_eq!(out.pixels.get_pixel(30, 40), &Rgb([255, 0, 0]));
        assert_eq!(out.pixels.get_pixel(20, 30), &Rgb([0, 0, 0]));
        assert_eq!(out.pixels.get_pixel(10, 19), &label_color(Label::Smoke));

        // input frame keeps its pixels
        assert_eq!(f.pixels.get_pixel(10, 20), &Rgb([0, 0, 0]));
    }

    #[test]
    fn box_outside_frame_is_skipped() {
        let f = frame();
        let set = DetectionSet::new(vec![Detection::new(
            Label::Fire,
            0.9,
            BBox::ltrb(100.0, 100.0, 120.0, 120.0),
        )]);

        let out = BoxAnnotator::new(0.3).annotate(&f, &set);
        assert!(out.pixels.pixels().all(|p| p == &Rgb([0, 0, 0])));
    }

    #[test]
    fn jpeg_has_markers() {
        let jpeg = encode_jpeg(&RgbImage::new(16, 16), 80).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(&jpeg[jpeg.len() - 2..], &[0xFF, 0xD9]);
    }
}
