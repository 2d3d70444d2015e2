//! YOLOv8 post-processing: letterbox geometry, output decoding and NMS.
//!
//! Kept free of ONNX Runtime types so the math is testable without a model.
//!
//! ## Output layout
//!
//! Ultralytics exports produce `[1, 4 + nc, N]`: for each of `N` anchors, a
//! centre-format box `(cx, cy, w, h)` in letterboxed input pixels followed by
//! `nc` per-class scores (already sigmoid-activated). Some exports transpose
//! this to `[1, N, 4 + nc]`; the smaller of the two trailing dims is taken as
//! the attribute axis.

use crate::detect::{BoundingBox, RawDetection};
use crate::error::{Result, VigilError};

/// Padding value for the letterbox border (Ultralytics uses grey 114).
pub const PAD_VALUE: u8 = 114;

/// Mapping between source pixels and the square model input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub resized_width: u32,
    pub resized_height: u32,
    pub source_width: u32,
    pub source_height: u32,
}

impl Letterbox {
    /// Fit `width x height` into a `size x size` square, preserving aspect.
    pub fn fit(width: u32, height: u32, size: u32) -> Self {
        let size = size.max(1);
        let w = width.max(1) as f32;
        let h = height.max(1) as f32;
        let scale = (size as f32 / w).min(size as f32 / h);
        let resized_width = ((w * scale).round() as u32).clamp(1, size);
        let resized_height = ((h * scale).round() as u32).clamp(1, size);
        Self {
            scale,
            pad_x: ((size - resized_width) / 2) as f32,
            pad_y: ((size - resized_height) / 2) as f32,
            resized_width,
            resized_height,
            source_width: width,
            source_height: height,
        }
    }

    /// Map a centre-format box in model space back to clamped source pixels.
    pub fn unmap(&self, cx: f32, cy: f32, w: f32, h: f32) -> BoundingBox {
        let sw = self.source_width as f32;
        let sh = self.source_height as f32;
        let x1 = ((cx - w / 2.0 - self.pad_x) / self.scale).clamp(0.0, sw);
        let y1 = ((cy - h / 2.0 - self.pad_y) / self.scale).clamp(0.0, sh);
        let x2 = ((cx + w / 2.0 - self.pad_x) / self.scale).clamp(0.0, sw);
        let y2 = ((cy + h / 2.0 - self.pad_y) / self.scale).clamp(0.0, sh);
        BoundingBox::from_corners(x1, y1, x2, y2)
    }
}

#[derive(Debug, Clone)]
pub struct DecodeParams<'a> {
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
    pub class_names: &'a [String],
}

/// Decode a raw YOLOv8 output tensor into source-space detections.
///
/// Result order: descending score after per-class NMS.
pub fn decode_output(
    shape: &[i64],
    data: &[f32],
    letterbox: &Letterbox,
    params: &DecodeParams<'_>,
) -> Result<Vec<RawDetection>> {
    let (d1, d2) = match shape {
        [1, a, b] | [a, b] => (*a as usize, *b as usize),
        _ => {
            return Err(VigilError::MalformedOutput(format!(
                "unexpected YOLO output shape {shape:?}"
            )))
        }
    };
    if d1.saturating_mul(d2) != data.len() {
        return Err(VigilError::MalformedOutput(format!(
            "YOLO output shape {shape:?} does not match {} values",
            data.len()
        )));
    }

    // Attribute axis is the short one: 4 + nc (e.g. 84) vs N anchors (e.g. 8400).
    let channels_first = d1 <= d2;
    let (attrs, anchors) = if channels_first { (d1, d2) } else { (d2, d1) };
    if attrs < 5 {
        return Err(VigilError::MalformedOutput(format!(
            "YOLO output has {attrs} attributes per anchor; need at least 5"
        )));
    }
    let num_classes = attrs - 4;
    let at = |attr: usize, anchor: usize| -> f32 {
        if channels_first {
            data[attr * anchors + anchor]
        } else {
            data[anchor * attrs + attr]
        }
    };

    let mut candidates: Vec<(usize, f32, BoundingBox)> = Vec::new();
    for anchor in 0..anchors {
        let (class_id, score) = (0..num_classes)
            .map(|c| (c, at(4 + c, anchor)))
            .fold((0, f32::NEG_INFINITY), |best, cur| {
                if cur.1 > best.1 {
                    cur
                } else {
                    best
                }
            });
        if !score.is_finite() || score < params.confidence_threshold {
            continue;
        }
        let bbox = letterbox.unmap(at(0, anchor), at(1, anchor), at(2, anchor), at(3, anchor));
        if bbox.area() <= 0.0 {
            continue;
        }
        candidates.push((class_id, score, bbox));
    }

    let kept = non_max_suppression(candidates, params.iou_threshold, params.max_detections);
    Ok(kept
        .into_iter()
        .map(|(class_id, score, bbox)| {
            RawDetection::new(class_label(params.class_names, class_id), score, bbox)
        })
        .collect())
}

/// Greedy per-class NMS. Input order is irrelevant; output is score-descending.
pub fn non_max_suppression(
    mut candidates: Vec<(usize, f32, BoundingBox)>,
    iou_threshold: f32,
    max_detections: usize,
) -> Vec<(usize, f32, BoundingBox)> {
    candidates.sort_by(|a, b| b.1.total_cmp(&a.1));
    let mut kept: Vec<(usize, f32, BoundingBox)> = Vec::new();
    for cand in candidates {
        if kept.len() >= max_detections {
            break;
        }
        let suppressed = kept
            .iter()
            .any(|k| k.0 == cand.0 && k.2.iou(&cand.2) > iou_threshold);
        if !suppressed {
            kept.push(cand);
        }
    }
    kept
}

fn class_label(names: &[String], class_id: usize) -> String {
    names
        .get(class_id)
        .cloned()
        .unwrap_or_else(|| format!("class_{class_id}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn letterbox_fits_wide_frame() {
        let lb = Letterbox::fit(1280, 720, 640);
        assert_relative_eq!(lb.scale, 0.5);
        assert_eq!(lb.resized_width, 640);
        assert_eq!(lb.resized_height, 360);
        assert_relative_eq!(lb.pad_x, 0.0);
        assert_relative_eq!(lb.pad_y, 140.0);
    }

    #[test]
    fn letterbox_tolerates_zero_size() {
        let lb = Letterbox::fit(1280, 720, 0);
        assert_eq!(lb.resized_width, 1);
        assert_eq!(lb.resized_height, 1);
        assert!(lb.scale.is_finite());
    }

    #[test]
    fn unmap_inverts_letterbox() {
        let lb = Letterbox::fit(1280, 720, 640);
        // Box centred at (320, 320) in model space, 100x50.
        let b = lb.unmap(320.0, 320.0, 100.0, 50.0);
        assert_relative_eq!(b.x, 540.0);
        assert_relative_eq!(b.y, 310.0);
        assert_relative_eq!(b.width, 200.0);
        assert_relative_eq!(b.height, 100.0);
    }

    fn names() -> Vec<String> {
        vec!["fire".into(), "smoke".into()]
    }

    #[test]
    fn decodes_channels_first_output() {
        let lb = Letterbox::fit(640, 640, 640);
        // 6 attributes (4 box + 2 classes) x 8 anchors; anchors 3.. are empty.
        let anchors = 8;
        let mut data = vec![0.0f32; 6 * anchors];
        let mut set = |attr: usize, values: [f32; 3]| {
            data[attr * anchors..attr * anchors + 3].copy_from_slice(&values);
        };
        set(0, [100.0, 300.0, 500.0]); // cx
        set(1, [100.0, 300.0, 500.0]); // cy
        set(2, [40.0, 40.0, 40.0]); // w
        set(3, [40.0, 40.0, 40.0]); // h
        set(4, [0.9, 0.1, 0.0]); // fire
        set(5, [0.0, 0.6, 0.2]); // smoke
        let n = names();
        let params = DecodeParams {
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
            max_detections: 10,
            class_names: &n,
        };
        let out = decode_output(&[1, 6, 8], &data, &lb, &params).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].label, "fire");
        assert_relative_eq!(out[0].confidence, 0.9);
        assert_eq!(out[1].label, "smoke");
        assert_relative_eq!(out[1].bbox.x, 280.0);
    }

    #[test]
    fn decodes_transposed_output() {
        let lb = Letterbox::fit(640, 640, 640);
        // 6 anchors x 5 attributes (single class).
        let mut data = vec![0.0f32; 6 * 5];
        data[..5].copy_from_slice(&[50.0, 50.0, 20.0, 20.0, 0.8]);
        data[5..10].copy_from_slice(&[60.0, 60.0, 20.0, 20.0, 0.1]);
        let params = DecodeParams {
            confidence_threshold: 0.5,
            iou_threshold: 0.45,
            max_detections: 10,
            class_names: &[],
        };
        let out = decode_output(&[1, 6, 5], &data, &lb, &params).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].label, "class_0");
    }

    #[test]
    fn nms_suppresses_overlaps_within_class_only() {
        let a = BoundingBox::from_corners(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::from_corners(1.0, 1.0, 11.0, 11.0);
        let kept = non_max_suppression(vec![(0, 0.6, b), (0, 0.9, a), (1, 0.5, b)], 0.45, 10);
        assert_eq!(kept.len(), 2);
        assert_relative_eq!(kept[0].1, 0.9);
        assert_eq!(kept[1].0, 1);
    }

    #[test]
    fn shape_mismatch_is_malformed() {
        let lb = Letterbox::fit(640, 640, 640);
        let params = DecodeParams {
            confidence_threshold: 0.5,
            iou_threshold: 0.45,
            max_detections: 10,
            class_names: &[],
        };
        assert!(decode_output(&[1, 6, 3], &[0.0; 5], &lb, &params).is_err());
        assert!(decode_output(&[1, 2, 3, 4], &[0.0; 24], &lb, &params).is_err());
    }
}
