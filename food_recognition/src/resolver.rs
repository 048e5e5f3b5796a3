use crate::config::{FallbackModelConfig, ModelConfig};
use std::{fmt, path::Path, path::PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelLoadError {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },
    #[error("checksum mismatch for {path:?}: expected {expected}, got {actual}")]
    Checksum {
        path: PathBuf,
        expected: String,
        actual: String,
    },
    #[error("runtime rejected model {path:?}: {reason}")]
    Runtime { path: PathBuf, reason: String },
}

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("no detection model available (custom: {custom}; fallback: {fallback})")]
    ModelUnavailable {
        custom: String,
        fallback: ModelLoadError,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModelSource {
    Custom(PathBuf),
    Pretrained(String),
}

impl ModelSource {
    pub fn tag(&self) -> String {
        match self {
            ModelSource::Custom(_) => "custom".to_string(),
            ModelSource::Pretrained(identifier) => format!("pretrained-{}", identifier),
        }
    }
}

impl fmt::Display for ModelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelSource::Custom(path) => write!(f, "custom model {}", path.display()),
            ModelSource::Pretrained(identifier) => write!(f, "pretrained model {}", identifier),
        }
    }
}

/// Turns model artifacts into runnable models.
pub trait ModelLoader {
    type Model;

    fn load_custom(&self, path: &Path) -> Result<Self::Model, ModelLoadError>;

    /// Loads the fallback, fetching it first when it is not cached locally.
    fn load_pretrained(&self, fallback: &FallbackModelConfig)
        -> Result<Self::Model, ModelLoadError>;
}

pub struct ResolvedModel<M> {
    pub model: M,
    pub source: ModelSource,
}

/// Size of the file at `path`, or `None` if there is nothing there.
pub fn artifact_size(path: &Path) -> Option<u64> {
    std::fs::metadata(path)
        .ok()
        .filter(|m| m.is_file())
        .map(|m| m.len())
}

/// Picks the custom artifact when it is present and larger than
/// `min_bytes`, otherwise the pretrained fallback.
pub fn resolve<L: ModelLoader>(
    config: &ModelConfig,
    loader: &L,
) -> Result<ResolvedModel<L::Model>, ResolveError> {
    let custom_path = &config.custom.path;

    let custom_outcome = match artifact_size(custom_path) {
        Some(size) if size > config.custom.min_bytes => {
            tracing::info!("Loading custom model from {}", custom_path.display());
            match loader.load_custom(custom_path) {
                Ok(model) => {
                    tracing::info!("Custom detection model loaded");
                    return Ok(ResolvedModel {
                        model,
                        source: ModelSource::Custom(custom_path.clone()),
                    });
                }
                Err(e) => {
                    tracing::error!("Failed to load custom model: {}", e);
                    e.to_string()
                }
            }
        }
        size => {
            let size = size.unwrap_or(0);
            tracing::warn!(
                "Custom model not found or invalid at {} (size: {} bytes)",
                custom_path.display(),
                size
            );
            format!("missing or too small ({} bytes)", size)
        }
    };

    let identifier = &config.fallback.identifier;
    tracing::info!("Loading fallback model {}", identifier);
    match loader.load_pretrained(&config.fallback) {
        Ok(model) => {
            tracing::info!("Pretrained model {} loaded", identifier);
            Ok(ResolvedModel {
                model,
                source: ModelSource::Pretrained(identifier.clone()),
            })
        }
        Err(e) => {
            tracing::error!("Failed to load fallback model: {}", e);
            Err(ResolveError::ModelUnavailable {
                custom: custom_outcome,
                fallback: e,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CustomModelConfig;
    use std::cell::RefCell;

    #[derive(Debug, PartialEq)]
    enum Loaded {
        Custom,
        Pretrained,
    }

    struct MockLoader {
        custom_ok: bool,
        pretrained_ok: bool,
        calls: RefCell<Vec<&'static str>>,
    }

    impl MockLoader {
        fn new(custom_ok: bool, pretrained_ok: bool) -> Self {
            Self {
                custom_ok,
                pretrained_ok,
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl ModelLoader for MockLoader {
        type Model = Loaded;

        fn load_custom(&self, path: &Path) -> Result<Loaded, ModelLoadError> {
            self.calls.borrow_mut().push("custom");
            if self.custom_ok {
                Ok(Loaded::Custom)
            } else {
                Err(ModelLoadError::Runtime {
                    path: path.to_path_buf(),
                    reason: "corrupt protobuf".to_string(),
                })
            }
        }

        fn load_pretrained(&self, fallback: &FallbackModelConfig) -> Result<Loaded, ModelLoadError> {
            self.calls.borrow_mut().push("pretrained");
            if self.pretrained_ok {
                Ok(Loaded::Pretrained)
            } else {
                Err(ModelLoadError::Fetch {
                    url: fallback.url.clone(),
                    reason: "offline".to_string(),
                })
            }
        }
    }

    struct Artifact(PathBuf);

    impl Artifact {
        fn with_size(name: &str, size: usize) -> Self {
            let path = std::env::temp_dir()
                .join(format!("food-resolver-{}-{}.onnx", std::process::id(), name));
            std::fs::write(&path, vec![0u8; size]).unwrap();
            Self(path)
        }
    }

    impl Drop for Artifact {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.0);
        }
    }

    fn model_config(custom_path: PathBuf) -> ModelConfig {
        ModelConfig {
            custom: CustomModelConfig {
                path: custom_path,
                min_bytes: 1000,
            },
            fallback: FallbackModelConfig {
                identifier: "yolov8n".to_string(),
                url: "https://example.invalid/yolov8n.onnx".to_string(),
                cache_dir: std::env::temp_dir(),
                sha256: None,
            },
            num_instances: 1,
            input_size: 640,
            min_probability: 0.25,
            iou_threshold: 0.7,
            labels_file: None,
            require_on_startup: true,
        }
    }

    #[test]
    fn test_absent_custom_model_uses_fallback() {
        let config = model_config(PathBuf::from("/nonexistent/best_food.onnx"));
        let loader = MockLoader::new(true, true);

        let resolved = resolve(&config, &loader).unwrap();

        assert_eq!(resolved.model, Loaded::Pretrained);
        assert_eq!(resolved.source.tag(), "pretrained-yolov8n");
        assert_eq!(*loader.calls.borrow(), vec!["pretrained"]);
    }

    #[test]
    fn test_undersized_custom_model_uses_fallback() {
        let artifact = Artifact::with_size("small", 1000);
        let config = model_config(artifact.0.clone());
        let loader = MockLoader::new(true, true);

        let resolved = resolve(&config, &loader).unwrap();

        assert_eq!(resolved.source, ModelSource::Pretrained("yolov8n".to_string()));
        assert_eq!(*loader.calls.borrow(), vec!["pretrained"]);
    }

    #[test]
    fn test_valid_custom_model_is_preferred() {
        let artifact = Artifact::with_size("valid", 1001);
        let config = model_config(artifact.0.clone());
        let loader = MockLoader::new(true, true);

        let resolved = resolve(&config, &loader).unwrap();

        assert_eq!(resolved.model, Loaded::Custom);
        assert_eq!(resolved.source.tag(), "custom");
        assert_eq!(*loader.calls.borrow(), vec!["custom"]);
    }

    #[test]
    fn test_corrupt_custom_model_falls_back() {
        let artifact = Artifact::with_size("corrupt", 4096);
        let config = model_config(artifact.0.clone());
        let loader = MockLoader::new(false, true);

        let resolved = resolve(&config, &loader).unwrap();

        assert_eq!(resolved.source.tag(), "pretrained-yolov8n");
        assert_eq!(*loader.calls.borrow(), vec!["custom", "pretrained"]);
    }

    #[test]
    fn test_both_failures_are_unavailable() {
        let artifact = Artifact::with_size("both", 4096);
        let config = model_config(artifact.0.clone());
        let loader = MockLoader::new(false, false);

        let err = resolve(&config, &loader).err().unwrap();

        let ResolveError::ModelUnavailable { custom, fallback } = err;
        assert!(custom.contains("corrupt protobuf"));
        assert!(matches!(fallback, ModelLoadError::Fetch { .. }));
    }

    #[test]
    fn test_directory_is_not_an_artifact() {
        assert_eq!(artifact_size(&std::env::temp_dir()), None);
    }
}
