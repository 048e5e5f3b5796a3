use crate::{
    config::{FallbackModelConfig, ModelConfig},
    detection::{non_max_suppression, BoundingBox, DetectionCandidate},
    fetch::ensure_fallback_artifact,
    labels::{load_labels_file, parse_names_metadata, ClassLabels},
    model_service::{InferenceError, ModelService},
    resolver::{ModelLoadError, ModelLoader},
};
use async_trait::async_trait;
use image::{imageops::FilterType, RgbImage};
use ndarray::{s, Array, Axis, Ix3, Ix4};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::{
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

fn transform_image(image: &RgbImage, input_size: u32) -> Array<f32, Ix4> {
    let resized = image::imageops::resize(image, input_size, input_size, FilterType::CatmullRom);

    let side = input_size as usize;
    let mut input = Array::zeros((1, 3, side, side));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let x = x as usize;
        let y = y as usize;
        let [r, g, b] = pixel.0;
        input[[0, 0, y, x]] = (r as f32) / 255.;
        input[[0, 1, y, x]] = (g as f32) / 255.;
        input[[0, 2, y, x]] = (b as f32) / 255.;
    }

    input
}

#[derive(Debug, Clone, Copy)]
struct DecodeParams {
    input_size: u32,
    min_probability: f32,
    iou_threshold: f32,
}

/// Decodes a YOLOv8 `[1, 4 + classes, anchors]` output into candidates in
/// source image coordinates.
fn decode_output(
    outputs: &ndarray::ArrayD<f32>,
    labels: &ClassLabels,
    params: DecodeParams,
    img_width: u32,
    img_height: u32,
) -> Result<Vec<DetectionCandidate>, InferenceError> {
    let shape = outputs.shape();
    if shape.len() != 3 || shape[0] != 1 || shape[1] <= 4 {
        return Err(InferenceError::Output(format!(
            "expected [1, 4 + classes, anchors], got {:?}",
            shape
        )));
    }
    let outputs = outputs
        .view()
        .into_dimensionality::<Ix3>()
        .map_err(|e| InferenceError::Output(e.to_string()))?;

    let scale_x = img_width as f32 / params.input_size as f32;
    let scale_y = img_height as f32 / params.input_size as f32;
    let output = outputs.index_axis(Axis(0), 0);

    let mut boxes = Vec::new();
    for anchor in output.axis_iter(Axis(1)) {
        let scores = anchor.slice(s![4..]);
        let Some((class_id, prob)) = scores
            .iter()
            .copied()
            .enumerate()
            .reduce(|accum, row| if row.1 > accum.1 { row } else { accum })
        else {
            continue;
        };

        if prob < params.min_probability {
            continue;
        }

        let xc = anchor[0] * scale_x;
        let yc = anchor[1] * scale_y;
        let w = anchor[2] * scale_x;
        let h = anchor[3] * scale_y;
        let class_id = class_id as u32;

        boxes.push(DetectionCandidate {
            class_id,
            class_name: labels.name_of(class_id),
            confidence: prob,
            bounding_box: BoundingBox {
                x1: xc - w / 2.,
                y1: yc - h / 2.,
                x2: xc + w / 2.,
                y2: yc + h / 2.,
            },
        });
    }

    Ok(non_max_suppression(boxes, params.iou_threshold))
}

#[derive(Clone)]
pub struct OrtModelService {
    sessions: Arc<Vec<Arc<Mutex<Session>>>>,
    counter: Arc<AtomicUsize>,
    labels: Arc<ClassLabels>,
    params: DecodeParams,
}

impl OrtModelService {
    pub fn from_file(model_config: &ModelConfig, path: &Path) -> Result<Self, ModelLoadError> {
        let runtime_err = |e: ort::Error| ModelLoadError::Runtime {
            path: path.to_path_buf(),
            reason: e.to_string(),
        };

        let num_instances = model_config.num_instances.max(1);
        let sessions = (0..num_instances)
            .map(|_| {
                let session = Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .commit_from_file(path)?;
                Ok(Arc::new(Mutex::new(session)))
            })
            .collect::<Result<Vec<_>, ort::Error>>()
            .map_err(runtime_err)?;

        let labels = Self::class_labels(model_config, &sessions[0])?;
        tracing::info!(
            "Created {} ONNX sessions for {} ({} classes)",
            num_instances,
            path.display(),
            labels.len()
        );

        Ok(Self {
            sessions: Arc::new(sessions),
            counter: Arc::new(AtomicUsize::new(0)),
            labels: Arc::new(labels),
            params: DecodeParams {
                input_size: model_config.input_size,
                min_probability: model_config.min_probability,
                iou_threshold: model_config.iou_threshold,
            },
        })
    }

    /// Class names embedded by the exporter win over a configured labels file.
    fn class_labels(
        model_config: &ModelConfig,
        session: &Mutex<Session>,
    ) -> Result<ClassLabels, ModelLoadError> {
        let embedded = match session.lock() {
            Ok(session) => match session.metadata() {
                Ok(metadata) => metadata.custom("names").ok().flatten(),
                Err(e) => {
                    tracing::warn!("Could not read model metadata: {}", e);
                    None
                }
            },
            Err(_) => None,
        };

        if let Some(raw) = embedded {
            match parse_names_metadata(&raw) {
                Ok(labels) => return Ok(labels),
                Err(e) => tracing::warn!("Ignoring embedded class names: {}", e),
            }
        }

        match &model_config.labels_file {
            Some(path) => load_labels_file(path).map_err(|source| ModelLoadError::Io {
                path: path.clone(),
                source,
            }),
            None => {
                tracing::warn!("Model carries no class names and no labels file is configured");
                Ok(ClassLabels::default())
            }
        }
    }

    fn run_inference(&self, input: &Array<f32, Ix4>) -> Result<ndarray::ArrayD<f32>, InferenceError> {
        let index = self.counter.fetch_add(1, Ordering::SeqCst) % self.sessions.len();
        let mut session = self.sessions[index]
            .lock()
            .map_err(|e| InferenceError::Run(format!("session mutex poisoned: {}", e)))?;

        tracing::debug!("Handling request with session {}", index);
        let tensor_ref = TensorRef::from_array_view(input.view())
            .map_err(|e| InferenceError::Tensor(e.to_string()))?;

        let outputs = session
            .run(ort::inputs![tensor_ref])
            .map_err(|e| InferenceError::Run(e.to_string()))?;

        let (shape, data) = outputs["output0"]
            .try_extract_tensor::<f32>()
            .map_err(|e| InferenceError::Output(e.to_string()))?;

        ndarray::ArrayD::from_shape_vec(shape.to_ixdyn(), data.to_vec())
            .map_err(|e| InferenceError::Output(format!("invalid tensor shape: {}", e)))
    }

    fn detect(&self, image: &RgbImage) -> Result<Vec<DetectionCandidate>, InferenceError> {
        let input = transform_image(image, self.params.input_size);
        let outputs = self.run_inference(&input)?;
        decode_output(
            &outputs,
            &self.labels,
            self.params,
            image.width(),
            image.height(),
        )
    }
}

#[async_trait]
impl ModelService for OrtModelService {
    async fn predict(&self, image: RgbImage) -> Result<Vec<DetectionCandidate>, InferenceError> {
        let service = self.clone();
        tokio::task::spawn_blocking(move || service.detect(&image))
            .await
            .map_err(|e| InferenceError::Aborted(e.to_string()))?
    }
}

pub struct OrtModelLoader<'a> {
    model_config: &'a ModelConfig,
}

impl<'a> OrtModelLoader<'a> {
    pub fn new(model_config: &'a ModelConfig) -> Self {
        Self { model_config }
    }
}

impl ModelLoader for OrtModelLoader<'_> {
    type Model = OrtModelService;

    fn load_custom(&self, path: &Path) -> Result<OrtModelService, ModelLoadError> {
        OrtModelService::from_file(self.model_config, path)
    }

    fn load_pretrained(
        &self,
        fallback: &FallbackModelConfig,
    ) -> Result<OrtModelService, ModelLoadError> {
        let path = ensure_fallback_artifact(fallback, self.model_config.custom.min_bytes)?;
        OrtModelService::from_file(self.model_config, &path)
    }
}
