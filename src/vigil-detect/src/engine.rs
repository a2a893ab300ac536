//! Object detector using ONNX Runtime
//!
//! Wraps a YOLOv8-family model exported with a single `images` input and a
//! single `output0` output.

use image::RgbImage;
use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::session::Session;
use ort::value::Tensor;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{DetectError, Result};
use crate::postprocess::{decode_output, non_max_suppression, preprocess, Detection};

const INPUT_NAME: &str = "images";
const OUTPUT_NAME: &str = "output0";

/// Configuration for the detector
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Path to the ONNX model file
    pub model_path: PathBuf,
    /// Square input edge the model was exported with
    pub input_size: u32,
    /// Whether to try CUDA before CPU
    pub use_gpu: bool,
    /// Number of threads for CPU inference
    pub num_threads: usize,
    /// Candidates below this score are discarded before NMS
    pub score_floor: f32,
    pub iou_threshold: f32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("yolov8n.onnx"),
            input_size: 640,
            use_gpu: true,
            num_threads: 4,
            score_floor: 0.25,
            iou_threshold: 0.45,
        }
    }
}

/// Loaded detection model
pub struct Detector {
    config: DetectorConfig,
    session: Mutex<Session>,
}

impl Detector {
    /// Load the model. Fails when the file is missing or unloadable.
    pub fn new(config: DetectorConfig) -> Result<Self> {
        info!("loading detection model from {:?}", config.model_path);

        if !config.model_path.is_file() {
            return Err(DetectError::ModelNotFound {
                path: config.model_path.display().to_string(),
                message: "run 'vigil download-model' or set YOLO_MODEL".to_string(),
            });
        }

        let (builder, is_gpu_enabled) = Self::session_builder(&config)?;
        let session = builder
            .commit_from_file(&config.model_path)
            .map_err(|e| DetectError::ModelLoad(e.to_string()))?;

        info!(
            "detector ready ({} input, execution provider: {})",
            config.input_size,
            if is_gpu_enabled { "CUDA" } else { "CPU" }
        );

        Ok(Self {
            config,
            session: Mutex::new(session),
        })
    }

    fn session_builder(config: &DetectorConfig) -> Result<(SessionBuilder, bool)> {
        let cpu_builder = || -> Result<SessionBuilder> {
            Session::builder()
                .map_err(|e| DetectError::ModelLoad(e.to_string()))?
                .with_optimization_level(GraphOptimizationLevel::Level3)
                .map_err(|e| DetectError::ModelLoad(e.to_string()))?
                .with_intra_threads(config.num_threads)
                .map_err(|e| DetectError::ModelLoad(e.to_string()))
        };

        if !config.use_gpu {
            return Ok((cpu_builder()?, false));
        }

        match cpu_builder()?.with_execution_providers([
            ort::execution_providers::CUDAExecutionProvider::default().build(),
        ]) {
            Ok(builder) => {
                info!("CUDA execution provider enabled");
                Ok((builder, true))
            }
            Err(e) => {
                warn!("failed to enable CUDA, falling back to CPU: {}", e);
                Ok((cpu_builder()?, false))
            }
        }
    }

    /// Run the model over one frame and return the surviving detections
    pub fn detect(&self, frame: &RgbImage) -> Result<Vec<Detection>> {
        let start = Instant::now();
        let (input, letterbox) = preprocess(frame, self.config.input_size);
        let input_tensor = Tensor::from_array(input)?;

        let mut session = lock_session(&self.session);
        let outputs = session.run(ort::inputs![INPUT_NAME => input_tensor])?;
        let output = outputs[OUTPUT_NAME].try_extract_array::<f32>()?;

        let mut detections = decode_output(&output, &letterbox, self.config.score_floor)?;
        non_max_suppression(&mut detections, self.config.iou_threshold);

        debug!(
            "{} detection(s) in {}ms",
            detections.len(),
            start.elapsed().as_millis()
        );
        Ok(detections)
    }
}

/// A panic mid-inference leaves nothing half-updated in the session
fn lock_session<T>(session: &Mutex<T>) -> MutexGuard<'_, T> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}
