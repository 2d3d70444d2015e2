//! Parser for JSON detection responses from hosted inference endpoints.
//!
//! Accepted top-level shapes:
//!
//! | Shape | Example |
//! |-------|---------|
//! | bare list | `[{"label": "fire", "score": 0.8, "box": {...}}]` |
//! | `predictions` / `results` | `{"predictions": [...]}` (object or list) |
//! | columnar | `{"boxes": [[x1,y1,x2,y2]], "labels": ["fire"], "scores": [0.8]}` |
//! | single entry | `{"label": "fire", "score": 0.8, "box": {...}}` |
//! | service error | `{"error": "Model is loading"}` → `VigilError::Detection` |
//!
//! Per entry, the label comes from `label`, `class` or `name`; the score from
//! `score`, `confidence` or `probability`; the box from `box`, `bbox` or
//! `bounding_box` in `xmin/ymin/xmax/ymax`, `x1/y1/x2/y2`,
//! `left/top/right/bottom` or `x/y/width/height` form, or as a 4-element
//! corner array. Missing pieces fall back to the caller's default label,
//! score 0 and an empty box.

use serde_json::{Map, Value};

use crate::detect::{BoundingBox, RawDetection};
use crate::error::{Result, VigilError};

const LABEL_KEYS: &[&str] = &["label", "class", "name"];
const SCORE_KEYS: &[&str] = &["score", "confidence", "probability"];
const BOX_KEYS: &[&str] = &["box", "bbox", "bounding_box"];

/// Score assumed for columnar responses that omit `scores`.
const COLUMNAR_DEFAULT_SCORE: f32 = 0.5;

pub fn parse_str(body: &str, default_label: &str) -> Result<Vec<RawDetection>> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| VigilError::MalformedOutput(format!("invalid JSON: {e}")))?;
    parse_value(&value, default_label)
}

pub fn parse_value(value: &Value, default_label: &str) -> Result<Vec<RawDetection>> {
    match value {
        Value::Array(entries) => Ok(parse_entries(entries, default_label)),
        Value::Object(map) => {
            if let Some(err) = map.get("error").and_then(Value::as_str) {
                return Err(VigilError::Detection(err.to_string()));
            }
            for key in ["predictions", "results"] {
                if let Some(inner) = map.get(key) {
                    return Ok(match inner {
                        Value::Array(entries) => parse_entries(entries, default_label),
                        Value::Object(entry) => parse_entry(entry, default_label).into_iter().collect(),
                        _ => Vec::new(),
                    });
                }
            }
            if map.contains_key("boxes") || map.contains_key("labels") {
                return Ok(parse_columnar(map, default_label));
            }
            Ok(parse_entry(map, default_label).into_iter().collect())
        }
        Value::Null => Ok(Vec::new()),
        other => Err(VigilError::MalformedOutput(format!(
            "expected an object or list, got {}",
            type_name(other)
        ))),
    }
}

fn parse_entries(entries: &[Value], default_label: &str) -> Vec<RawDetection> {
    entries
        .iter()
        .filter_map(Value::as_object)
        .filter_map(|entry| parse_entry(entry, default_label))
        .collect()
}

fn parse_entry(entry: &Map<String, Value>, default_label: &str) -> Option<RawDetection> {
    let label = first_str(entry, LABEL_KEYS);
    let score = first_f32(entry, SCORE_KEYS);
    let bbox = BOX_KEYS.iter().find_map(|k| entry.get(*k)).map(parse_box);

    // An object with none of the known keys is not a detection.
    if label.is_none() && score.is_none() && bbox.is_none() {
        return None;
    }

    Some(RawDetection::new(
        label.unwrap_or(default_label),
        score.unwrap_or(0.0),
        bbox.unwrap_or_default(),
    ))
}

fn parse_columnar(map: &Map<String, Value>, default_label: &str) -> Vec<RawDetection> {
    let empty = Vec::new();
    let boxes = map.get("boxes").and_then(Value::as_array).unwrap_or(&empty);
    let labels = map.get("labels").and_then(Value::as_array).unwrap_or(&empty);
    let scores = map.get("scores").and_then(Value::as_array).unwrap_or(&empty);

    boxes
        .iter()
        .enumerate()
        .map(|(i, b)| {
            let label = labels
                .get(i)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .unwrap_or(default_label);
            let score = scores
                .get(i)
                .and_then(Value::as_f64)
                .map(|s| s as f32)
                .unwrap_or(COLUMNAR_DEFAULT_SCORE);
            RawDetection::new(label, score, parse_box(b))
        })
        .collect()
}

fn parse_box(value: &Value) -> BoundingBox {
    match value {
        Value::Array(coords) if coords.len() >= 4 => {
            let c: Vec<f32> = coords
                .iter()
                .take(4)
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect();
            BoundingBox::from_corners(c[0], c[1], c[2], c[3])
        }
        Value::Object(b) => {
            let left = first_f32(b, &["xmin", "x1", "left", "x"]).unwrap_or(0.0);
            let top = first_f32(b, &["ymin", "y1", "top", "y"]).unwrap_or(0.0);
            let right = first_f32(b, &["xmax", "x2", "right"])
                .or_else(|| first_f32(b, &["width", "w"]).map(|w| left + w))
                .unwrap_or(left);
            let bottom = first_f32(b, &["ymax", "y2", "bottom"])
                .or_else(|| first_f32(b, &["height", "h"]).map(|h| top + h))
                .unwrap_or(top);
            BoundingBox::from_corners(left, top, right, bottom)
        }
        _ => BoundingBox::default(),
    }
}

fn first_str<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| map.get(*k))
        .filter_map(Value::as_str)
        .find(|s| !s.trim().is_empty())
}

fn first_f32(map: &Map<String, Value>, keys: &[&str]) -> Option<f32> {
    keys.iter()
        .filter_map(|k| map.get(*k))
        .find_map(|v| match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        })
        .map(|v| v as f32)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
