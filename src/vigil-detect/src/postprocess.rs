//! Frame preprocessing and YOLO output decoding
//!
//! The model sees a square letterboxed frame. Boxes come back in that
//! square's coordinates and are mapped onto the original frame here.

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use ndarray::{Array4, ArrayViewD};

use crate::error::{DetectError, Result};
use crate::labels::{class_name, PERSON};

/// Padding colour used around letterboxed frames
const PAD_VALUE: u8 = 114;

/// Axis-aligned box in original frame pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn intersection_area(&self, other: &BBox) -> f32 {
        let w = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let h = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        w * h
    }

    pub fn iou(&self, other: &BBox) -> f32 {
        let inter = self.intersection_area(other);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

/// One detected object
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub class_id: usize,
    pub label: &'static str,
    pub confidence: f32,
    pub bbox: BBox,
}

/// Whether any detection is a person scoring strictly above `threshold`
pub fn person_present(detections: &[Detection], threshold: f32) -> bool {
    detections
        .iter()
        .any(|d| d.label == PERSON && d.confidence > threshold)
}

/// Geometry of a letterbox transform
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub frame_width: u32,
    pub frame_height: u32,
}

impl Letterbox {
    /// Map a model-space box back onto the original frame
    fn unmap(&self, cx: f32, cy: f32, w: f32, h: f32) -> BBox {
        let fw = self.frame_width as f32;
        let fh = self.frame_height as f32;
        let x = |v: f32| ((v - self.pad_x) / self.scale).clamp(0.0, fw);
        let y = |v: f32| ((v - self.pad_y) / self.scale).clamp(0.0, fh);
        BBox {
            x1: x(cx - w / 2.0),
            y1: y(cy - h / 2.0),
            x2: x(cx + w / 2.0),
            y2: y(cy + h / 2.0),
        }
    }
}

/// Letterbox `frame` into a `size` x `size` NCHW tensor scaled to [0, 1]
pub fn preprocess(frame: &RgbImage, size: u32) -> (Array4<f32>, Letterbox) {
    let (fw, fh) = frame.dimensions();
    let scale = (size as f32 / fw.max(1) as f32).min(size as f32 / fh.max(1) as f32);
    let new_w = ((fw as f32 * scale).round() as u32).clamp(1, size);
    let new_h = ((fh as f32 * scale).round() as u32).clamp(1, size);
    let pad_x = (size - new_w) / 2;
    let pad_y = (size - new_h) / 2;

    let resized = imageops::resize(frame, new_w, new_h, FilterType::Triangle);
    let mut canvas = RgbImage::from_pixel(size, size, Rgb([PAD_VALUE; 3]));
    imageops::overlay(&mut canvas, &resized, pad_x as i64, pad_y as i64);

    let s = size as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, s, s));
    for (x, y, pixel) in canvas.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = pixel.0[c] as f32 / 255.0;
        }
    }

    let letterbox = Letterbox {
        scale,
        pad_x: pad_x as f32,
        pad_y: pad_y as f32,
        frame_width: fw,
        frame_height: fh,
    };
    (tensor, letterbox)
}

/// Decode a YOLOv8-style output of shape `[1, 4 + classes, anchors]`.
///
/// The transposed `[1, anchors, 4 + classes]` layout is accepted as well.
/// Candidates scoring below `score_floor` are dropped before NMS.
pub fn decode_output(
    output: &ArrayViewD<f32>,
    letterbox: &Letterbox,
    score_floor: f32,
) -> Result<Vec<Detection>> {
    let shape = output.shape();
    if shape.len() != 3 || shape[0] != 1 {
        return Err(DetectError::Inference(format!(
            "unexpected output shape {:?}",
            shape
        )));
    }

    let transposed = shape[1] > shape[2];
    let (attrs, anchors) = if transposed {
        (shape[2], shape[1])
    } else {
        (shape[1], shape[2])
    };
    if attrs < 5 {
        return Err(DetectError::Inference(format!(
            "output has {} attributes per anchor, need at least 5",
            attrs
        )));
    }

    let value = |attr: usize, anchor: usize| {
        if transposed {
            output[[0, anchor, attr]]
        } else {
            output[[0, attr, anchor]]
        }
    };

    let mut detections = Vec::new();
    for anchor in 0..anchors {
        let (class_id, confidence) = (4..attrs)
            .map(|attr| (attr - 4, value(attr, anchor)))
            .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });

        if confidence < score_floor {
            continue;
        }

        let bbox = letterbox.unmap(
            value(0, anchor),
            value(1, anchor),
            value(2, anchor),
            value(3, anchor),
        );
        detections.push(Detection {
            class_id,
            label: class_name(class_id),
            confidence,
            bbox,
        });
    }

    Ok(detections)
}

/// Per-class non-maximum suppression, highest confidence first
pub fn non_max_suppression(detections: &mut Vec<Detection>, iou_threshold: f32) {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept = 0;
    for index in 0..detections.len() {
        let suppressed = (0..kept).any(|prev| {
            detections[prev].class_id == detections[index].class_id
                && detections[prev].bbox.iou(&detections[index].bbox) > iou_threshold
        });
        if !suppressed {
            detections.swap(kept, index);
            kept += 1;
        }
    }
    detections.truncate(kept);
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn identity() -> Letterbox {
        Letterbox {
            scale: 1.0,
            pad_x: 0.0,
            pad_y: 0.0,
            frame_width: 640,
            frame_height: 640,
        }
    }

    fn detection(class_id: usize, confidence: f32, x1: f32, y1: f32, x2: f32, y2: f32) -> Detection {
        Detection {
            class_id,
            label: class_name(class_id),
            confidence,
            bbox: BBox { x1, y1, x2, y2 },
        }
    }

    #[test]
    fn test_iou() {
        let a = BBox { x1: 0.0, y1: 0.0, x2: 10.0, y2: 10.0 };
        let b = BBox { x1: 5.0, y1: 0.0, x2: 15.0, y2: 10.0 };
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
        assert_eq!(a.iou(&a), 1.0);

        let far = BBox { x1: 100.0, y1: 100.0, x2: 110.0, y2: 110.0 };
        assert_eq!(a.iou(&far), 0.0);
    }

    #[test]
    fn test_preprocess_letterbox_wide_frame() {
        let frame = RgbImage::from_pixel(200, 100, Rgb([255, 0, 0]));
        let (tensor, letterbox) = preprocess(&frame, 64);

        assert_eq!(tensor.shape(), &[1, 3, 64, 64]);
        assert_eq!(letterbox.scale, 0.32);
        assert_eq!(letterbox.pad_x, 0.0);
        assert_eq!(letterbox.pad_y, 16.0);

        // padding rows are grey, content rows keep the frame colour
        let grey = PAD_VALUE as f32 / 255.0;
        assert!((tensor[[0, 0, 0, 10]] - grey).abs() < 1e-6);
        assert!((tensor[[0, 0, 32, 10]] - 1.0).abs() < 0.01);
        assert!(tensor[[0, 1, 32, 10]].abs() < 0.01);
    }

    #[test]
    fn test_decode_picks_best_class_and_unmaps() {
        let mut raw = Array3::<f32>::zeros((1, 84, 3));
        // anchor 0: person at 0.9
        raw[[0, 0, 0]] = 100.0;
        raw[[0, 1, 0]] = 116.0;
        raw[[0, 2, 0]] = 20.0;
        raw[[0, 3, 0]] = 40.0;
        raw[[0, 4, 0]] = 0.9;
        raw[[0, 6, 0]] = 0.3;
        // anchor 1: car at 0.6
        raw[[0, 4 + 2, 1]] = 0.6;
        // anchor 2: below the floor
        raw[[0, 4, 2]] = 0.1;

        let letterbox = Letterbox {
            scale: 0.5,
            pad_x: 0.0,
            pad_y: 16.0,
            frame_width: 400,
            frame_height: 400,
        };
        let raw = raw.into_dyn();
        let detections = decode_output(&raw.view(), &letterbox, 0.25).unwrap();

        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].label, "person");
        assert_eq!(detections[0].confidence, 0.9);
        assert_eq!(
            detections[0].bbox,
            BBox { x1: 180.0, y1: 160.0, x2: 220.0, y2: 240.0 }
        );
        assert_eq!(detections[1].label, "car");
    }

    #[test]
    fn test_decode_transposed_layout() {
        let mut raw = Array3::<f32>::zeros((1, 100, 84));
        raw[[0, 3, 0]] = 320.0;
        raw[[0, 3, 1]] = 320.0;
        raw[[0, 3, 2]] = 50.0;
        raw[[0, 3, 3]] = 50.0;
        raw[[0, 3, 4]] = 0.8;

        let raw = raw.into_dyn();
        let detections = decode_output(&raw.view(), &identity(), 0.25).unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].class_id, 0);
        assert_eq!(detections[0].bbox.width(), 50.0);
    }

    #[test]
    fn test_decode_rejects_bad_shape() {
        let raw = ndarray::Array2::<f32>::zeros((84, 10)).into_dyn();
        assert!(matches!(
            decode_output(&raw.view(), &identity(), 0.25),
            Err(DetectError::Inference(_))
        ));
    }

    #[test]
    fn test_nms_suppresses_same_class_overlap_only() {
        let mut detections = vec![
            detection(0, 0.7, 0.0, 0.0, 100.0, 100.0),
            detection(0, 0.9, 5.0, 5.0, 105.0, 105.0),
            detection(2, 0.8, 0.0, 0.0, 100.0, 100.0),
            detection(0, 0.6, 300.0, 300.0, 400.0, 400.0),
        ];
        non_max_suppression(&mut detections, 0.45);

        let kept: Vec<(usize, f32)> = detections.iter().map(|d| (d.class_id, d.confidence)).collect();
        assert_eq!(kept, vec![(0, 0.9), (2, 0.8), (0, 0.6)]);
    }

    #[test]
    fn test_person_present_is_strict() {
        let detections = vec![
            detection(0, 0.5, 0.0, 0.0, 1.0, 1.0),
            detection(2, 0.99, 0.0, 0.0, 1.0, 1.0),
        ];
        assert!(!person_present(&detections, 0.5));
        assert!(person_present(&detections, 0.49));
        assert!(!person_present(&[], 0.0));
    }
}
