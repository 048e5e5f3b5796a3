use crate::resolver::artifact_size;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: LogLevel,
    pub model: ModelConfig,
}

fn deserialize_log_level<'de, D>(deserializer: D) -> Result<LogLevel, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.try_into().map_err(serde::de::Error::custom)
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Upper bound on a request body; base64 camera photos run to several MB.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_max_body_bytes() -> usize {
    32 * 1024 * 1024
}

impl ServerConfig {
    pub fn get_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    pub custom: CustomModelConfig,
    pub fallback: FallbackModelConfig,
    #[serde(default = "default_model_instances")]
    pub num_instances: usize,
    #[serde(default = "default_input_size")]
    pub input_size: u32,
    #[serde(default = "default_min_probability")]
    pub min_probability: f32,
    #[serde(default = "default_iou_threshold")]
    pub iou_threshold: f32,
    #[serde(default)]
    pub labels_file: Option<PathBuf>,
    /// Abort startup when no model can be resolved. When false the service
    /// still binds and reports itself unhealthy.
    #[serde(default = "default_require_on_startup")]
    pub require_on_startup: bool,
}

/// The fine-tuned artifact, preferred over the fallback when plausible.
#[derive(Debug, Deserialize, Clone)]
pub struct CustomModelConfig {
    pub path: PathBuf,
    #[serde(default = "default_min_bytes")]
    pub min_bytes: u64,
}

/// Generic pretrained model, fetched on demand into `cache_dir`.
#[derive(Debug, Deserialize, Clone)]
pub struct FallbackModelConfig {
    pub identifier: String,
    #[serde(default)]
    pub url: String,
    pub cache_dir: PathBuf,
    #[serde(default)]
    pub sha256: Option<String>,
}

impl FallbackModelConfig {
    pub fn get_cached_path(&self) -> PathBuf {
        self.cache_dir.join(format!("{}.onnx", self.identifier))
    }
}

impl ModelConfig {
    /// The fallback must be reachable: either already cached or downloadable
    /// from an http(s) URL.
    pub fn validate(&self) -> Result<(), String> {
        let fallback = &self.fallback;
        let url = fallback.url.trim();

        if url.is_empty() {
            let cached = fallback.get_cached_path();
            if artifact_size(&cached).is_some_and(|size| size > self.custom.min_bytes) {
                return Ok(());
            }
            return Err(format!(
                "model.fallback.url is not set and {} is not cached. Set APP_MODEL__FALLBACK__URL \
                 to an ONNX export of {} or place the file at {}",
                fallback.identifier,
                fallback.identifier,
                cached.display()
            ));
        }

        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(format!(
                "model.fallback.url must be an http(s) URL, got `{}`",
                url
            ));
        }

        Ok(())
    }
}

fn default_model_instances() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_input_size() -> u32 {
    640
}

fn default_min_probability() -> f32 {
    0.25
}

fn default_iou_threshold() -> f32 {
    0.7
}

fn default_min_bytes() -> u64 {
    1000
}

fn default_require_on_startup() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub enum LogLevel {
    Debug,
    Info,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            other => Err(format!(
                "{} is not a supported minimum log level. Use either `debug` or `info`.",
                other
            )),
        }
    }
}

pub fn get_configuration() -> Result<Config, config::ConfigError> {
    let base_path = std::env::current_dir()
        .map_err(|e| config::ConfigError::Message(format!("no current directory: {}", e)))?;
    let configuration_directory = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(config::ConfigError::Message)?;

    let config = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join("base.yaml"),
        ))
        .add_source(
            config::File::from(
                configuration_directory.join(format!("{}.yaml", environment.as_str())),
            )
            .required(false),
        )
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    let config = config.try_deserialize::<Config>()?;
    if let Err(e) = config.model.validate() {
        tracing::error!("Configuration validation failed: {}", e);
        return Err(config::ConfigError::Message(e));
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = r#"
log_level: info
server:
  host: 0.0.0.0
  port: 8000
model:
  custom:
    path: best_food.onnx
  fallback:
    identifier: yolov8n
    url: https://example.invalid/yolov8n.onnx
    cache_dir: models
"#;

    fn from_yaml(yaml: &str) -> Config {
        config::Config::builder()
            .add_source(config::File::from_str(yaml, config::FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize::<Config>()
            .unwrap()
    }

    #[test]
    fn test_model_defaults() {
        let config = from_yaml(BASE);

        assert_eq!(config.model.custom.min_bytes, 1000);
        assert_eq!(config.model.input_size, 640);
        assert_eq!(config.model.min_probability, 0.25);
        assert_eq!(config.model.iou_threshold, 0.7);
        assert!(config.model.require_on_startup);
        assert!(config.model.labels_file.is_none());
        assert!(config.model.fallback.sha256.is_none());
        assert!(config.model.num_instances >= 1);
        assert_eq!(config.log_level, LogLevel::Info);
        assert_eq!(config.server.get_address(), "0.0.0.0:8000");
        assert_eq!(config.server.max_body_bytes, 32 * 1024 * 1024);
    }

    #[test]
    fn test_fallback_cached_path() {
        let config = from_yaml(BASE);

        assert_eq!(
            config.model.fallback.get_cached_path(),
            PathBuf::from("models").join("yolov8n.onnx")
        );
    }

    #[test]
    fn test_unknown_log_level_is_rejected() {
        let yaml = BASE.replace("log_level: info", "log_level: trace");
        let result = config::Config::builder()
            .add_source(config::File::from_str(&yaml, config::FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize::<Config>();

        assert!(result.is_err());
    }

    #[test]
    fn test_https_fallback_url_is_valid() {
        assert!(from_yaml(BASE).model.validate().is_ok());
    }

    #[test]
    fn test_missing_fallback_url_is_rejected() {
        let mut config = from_yaml(BASE).model;
        config.fallback.url = String::new();
        config.fallback.cache_dir =
            std::env::temp_dir().join(format!("food-config-empty-{}", std::process::id()));

        let err = config.validate().unwrap_err();

        assert!(err.contains("APP_MODEL__FALLBACK__URL"));
    }

    #[test]
    fn test_missing_fallback_url_is_fine_when_cached() {
        let dir = std::env::temp_dir().join(format!("food-config-cached-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let mut config = from_yaml(BASE).model;
        config.fallback.url = String::new();
        config.fallback.cache_dir = dir.clone();
        std::fs::write(config.fallback.get_cached_path(), vec![0u8; 2048]).unwrap();

        let result = config.validate();
        std::fs::remove_dir_all(&dir).unwrap();

        assert!(result.is_ok());
    }

    #[test]
    fn test_non_http_fallback_url_is_rejected() {
        let mut config = from_yaml(BASE).model;
        config.fallback.url = "ftp://mirror/yolov8n.onnx".to_string();

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_environment_parsing() {
        assert!(matches!(
            Environment::try_from("Production".to_string()),
            Ok(Environment::Production)
        ));
        assert!(Environment::try_from("staging".to_string()).is_err());
    }
}
