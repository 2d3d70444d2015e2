//! YOLOv8 ONNX detector via the `ort` crate.
//!
//! Targets the Ultralytics export (`yolo export format=onnx`):
//! - input `images [1,3,S,S]`: RGB, [0,1], letterboxed with grey 114 padding
//! - output `output0 [1,4+nc,N]`: see [`crate::detect::yolo`]
//!
//! Path inputs are decoded with the `image` crate (JPEG / PNG); pixel buffers
//! are used as-is after BGR→RGB swizzling.

use std::path::{Path, PathBuf};

use image::{imageops, imageops::FilterType, Rgb, RgbImage};
use ndarray::Array4;
use ort::session::builder::SessionBuilder;
use ort::session::{Session, SessionInputValue};
use ort::value::Value;
use tracing::{debug, info};

use crate::detect::yolo::{decode_output, DecodeParams, Letterbox, PAD_VALUE};
use crate::detect::{ImageInput, ObjectDetector, PixelBuffer, PixelFormat, RawDetection};
use crate::error::{Result, VigilError};

#[derive(Debug, Clone)]
pub struct YoloDetectorConfig {
    pub model_path: PathBuf,
    /// Square input edge. Default: 640.
    pub input_size: u32,
    /// NMS IoU threshold. Default: 0.45.
    pub iou_threshold: f32,
    /// Cap on detections per frame after NMS. Default: 300.
    pub max_detections: usize,
    /// Class names by index. Unknown ids become `class_<id>`.
    pub class_names: Vec<String>,
}

impl YoloDetectorConfig {
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            input_size: 640,
            iou_threshold: 0.45,
            max_detections: 300,
            class_names: Vec::new(),
        }
    }

    /// # Errors
    /// `VigilError::InvalidConfig` for a zero input size or an IoU threshold
    /// outside (0, 1].
    pub fn validate(&self) -> Result<()> {
        if self.input_size == 0 {
            return Err(VigilError::InvalidConfig(
                "YOLO input size must be at least 1".into(),
            ));
        }
        if !(self.iou_threshold > 0.0 && self.iou_threshold <= 1.0) {
            return Err(VigilError::InvalidConfig(format!(
                "YOLO IoU threshold {} is outside (0, 1]",
                self.iou_threshold
            )));
        }
        Ok(())
    }
}

pub struct YoloDetector {
    config: YoloDetectorConfig,
    session: Option<Session>,
    input_name: String,
}

impl YoloDetector {
    /// Does not touch the model file; the session opens in `warm_up`.
    pub fn new(config: YoloDetectorConfig) -> Self {
        Self {
            config,
            session: None,
            input_name: "images".to_string(),
        }
    }

    fn open_session(path: &Path) -> Result<Session> {
        if !path.is_file() {
            return Err(VigilError::AssetUnavailable {
                path: path.to_path_buf(),
            });
        }
        SessionBuilder::new()
            .map_err(|e| VigilError::OnnxSession(e.to_string()))?
            .commit_from_file(path)
            .map_err(|e| VigilError::OnnxSession(e.to_string()))
    }

    fn load_rgb(image: &ImageInput) -> Result<RgbImage> {
        match image {
            ImageInput::Path(path) => {
                if !path.is_file() {
                    return Err(VigilError::AssetUnavailable { path: path.clone() });
                }
                let decoded = image::open(path)
                    .map_err(|e| VigilError::Detection(format!("{}: {e}", path.display())))?;
                Ok(decoded.to_rgb8())
            }
            ImageInput::Pixels(buf) => pixels_to_rgb(buf),
        }
    }

    fn build_input(&self, rgb: &RgbImage, letterbox: &Letterbox) -> Result<Array4<f32>> {
        let size = self.config.input_size;
        let resized = imageops::resize(
            rgb,
            letterbox.resized_width,
            letterbox.resized_height,
            FilterType::Triangle,
        );
        let mut canvas = RgbImage::from_pixel(size, size, Rgb([PAD_VALUE; 3]));
        imageops::overlay(
            &mut canvas,
            &resized,
            letterbox.pad_x as i64,
            letterbox.pad_y as i64,
        );

        let s = size as usize;
        Ok(Array4::from_shape_fn((1, 3, s, s), |(_, c, y, x)| {
            canvas.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        }))
    }

    fn run(&mut self, input: Array4<f32>) -> Result<(Vec<i64>, Vec<f32>)> {
        let input_val = Value::from_array(input)
            .map_err(|e: ort::Error| VigilError::OnnxSession(e.to_string()))?;
        let inputs: Vec<(String, SessionInputValue<'_>)> =
            vec![(self.input_name.clone(), input_val.into())];

        let session = self
            .session
            .as_mut()
            .ok_or_else(|| VigilError::OnnxSession("session not initialised".into()))?;
        let outputs = session
            .run(inputs)
            .map_err(|e| VigilError::OnnxSession(e.to_string()))?;
        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| VigilError::OnnxSession(e.to_string()))?;
        Ok((shape.to_vec(), data.to_vec()))
    }
}

impl ObjectDetector for YoloDetector {
    fn warm_up(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Ok(());
        }
        self.config.validate()?;
        let path = self.config.model_path.clone();
        let size_mb = std::fs::metadata(&path)
            .map(|m| m.len() as f64 / (1024.0 * 1024.0))
            .unwrap_or(0.0);

        let session = Self::open_session(&path)?;
        let input_names: Vec<String> = session
            .inputs()
            .iter()
            .map(|outlet| outlet.name().to_string())
            .collect();
        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|outlet| outlet.name().to_string())
            .collect();
        self.input_name = input_names
            .first()
            .cloned()
            .ok_or_else(|| VigilError::OnnxSession("detector model has no inputs".into()))?;
        if output_names.is_empty() {
            return Err(VigilError::OnnxSession("detector model has no outputs".into()));
        }

        info!("=== YoloDetector Startup Report ===");
        info!("  path: {:?}", path);
        info!("  size: {:.2} MB", size_mb);
        info!("  input size: {}", self.config.input_size);
        info!("  inputs: {:?}", input_names);
        info!("  outputs: {:?}", output_names);
        info!("  classes: {}", self.config.class_names.len());

        self.session = Some(session);

        // Dummy pass so the first real frame does not pay allocation cost.
        let s = self.config.input_size as usize;
        let t0 = std::time::Instant::now();
        self.run(Array4::<f32>::zeros((1, 3, s, s)))?;
        info!("  warm-up inference: {} ms", t0.elapsed().as_millis());
        info!("=== YoloDetector ready ===");
        Ok(())
    }

    fn detect(&mut self, image: &ImageInput, confidence_threshold: f32) -> Result<Vec<RawDetection>> {
        if self.session.is_none() {
            self.warm_up()?;
        }
        let rgb = Self::load_rgb(image)?;
        let letterbox = Letterbox::fit(rgb.width(), rgb.height(), self.config.input_size);
        let input = self.build_input(&rgb, &letterbox)?;

        let t0 = std::time::Instant::now();
        let (shape, data) = self.run(input)?;
        let params = DecodeParams {
            confidence_threshold,
            iou_threshold: self.config.iou_threshold,
            max_detections: self.config.max_detections,
            class_names: &self.config.class_names,
        };
        let detections = decode_output(&shape, &data, &letterbox, &params)?;
        debug!(
            image = %image.describe(),
            detections = detections.len(),
            inference_ms = t0.elapsed().as_millis() as u64,
            "YoloDetector::detect"
        );
        Ok(detections)
    }

    fn class_names(&self) -> Vec<String> {
        self.config.class_names.clone()
    }
}

fn pixels_to_rgb(buf: &PixelBuffer) -> Result<RgbImage> {
    if !buf.is_well_formed() {
        return Err(VigilError::Detection(format!(
            "pixel buffer holds {} bytes; expected {}x{}x3",
            buf.data.len(),
            buf.width,
            buf.height
        )));
    }
    let mut bytes = buf.data.to_vec();
    if buf.format == PixelFormat::Bgr8 {
        for px in bytes.chunks_exact_mut(3) {
            px.swap(0, 2);
        }
    }
    RgbImage::from_raw(buf.width, buf.height, bytes)
        .ok_or_else(|| VigilError::Detection("pixel buffer dimensions rejected".into()))
}
