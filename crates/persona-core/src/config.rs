use crate::extractor::DEFAULT_FEATURE_VECTOR_SIZE;
use crate::mapper::{MapError, Rotation, Size};
use crate::matcher::DEFAULT_RECOGNITION_THRESHOLD;
use crate::normalizer::{
    ImageNormalizer, TensorLayout, DEFAULT_NORM_MEAN, DEFAULT_NORM_STD, DEFAULT_TARGET_SIZE,
};
use crate::store::StoreLayout;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// How long a recognized verdict is shown before frames resume.
pub const DEFAULT_COOLDOWN_MS: u64 = 1000;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Pipeline configuration.
///
/// Loaded from defaults, then an optional TOML file named by `PERSONA_CONFIG`,
/// then `PERSONA_*` environment variables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// ONNX feature-vector model.
    pub model_path: PathBuf,
    /// SQLite database file.
    pub db_path: PathBuf,
    pub store_layout: StoreLayout,
    /// Side of the square model input.
    pub target_size: u32,
    /// Embedding length produced by the model.
    pub feature_vector_size: usize,
    /// Euclidean distance below which a match is accepted.
    pub recognition_threshold: f32,
    pub norm_mean: f32,
    pub norm_std: f32,
    pub tensor_layout: TensorLayout,
    /// Delay after a recognized verdict before frames resume.
    pub cooldown_ms: u64,
    /// Directory replayed as the frame stream.
    pub frames_dir: Option<PathBuf>,
    pub frame_interval_ms: u64,
    /// Clockwise degrees that turn the sensor image upright.
    pub rotation: u32,
    /// Overlay view dimensions.
    pub view_width: u32,
    pub view_height: u32,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            model_path: data_dir.join("models").join("feature_vector.onnx"),
            db_path: data_dir.join("faces.db"),
            store_layout: StoreLayout::default(),
            target_size: DEFAULT_TARGET_SIZE,
            feature_vector_size: DEFAULT_FEATURE_VECTOR_SIZE,
            recognition_threshold: DEFAULT_RECOGNITION_THRESHOLD,
            norm_mean: DEFAULT_NORM_MEAN,
            norm_std: DEFAULT_NORM_STD,
            tensor_layout: TensorLayout::default(),
            cooldown_ms: DEFAULT_COOLDOWN_MS,
            frames_dir: None,
            frame_interval_ms: 100,
            rotation: 0,
            view_width: 1080,
            view_height: 1920,
        }
    }
}

impl Config {
    /// Defaults, then `$PERSONA_CONFIG`, then `PERSONA_*` overrides, validated.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var_os("PERSONA_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), "config file loaded");
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Apply `PERSONA_*` overrides from `lookup`. Unparseable values are
    /// logged and ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("PERSONA_MODEL_PATH") {
            self.model_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("PERSONA_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("PERSONA_FRAMES_DIR") {
            self.frames_dir = Some(PathBuf::from(v));
        }

        override_parsed(&lookup, "PERSONA_STORE_LAYOUT", &mut self.store_layout);
        override_parsed(&lookup, "PERSONA_TARGET_SIZE", &mut self.target_size);
        override_parsed(&lookup, "PERSONA_FEATURE_VECTOR_SIZE", &mut self.feature_vector_size);
        override_parsed(&lookup, "PERSONA_RECOGNITION_THRESHOLD", &mut self.recognition_threshold);
        override_parsed(&lookup, "PERSONA_NORM_MEAN", &mut self.norm_mean);
        override_parsed(&lookup, "PERSONA_NORM_STD", &mut self.norm_std);
        override_parsed(&lookup, "PERSONA_COOLDOWN_MS", &mut self.cooldown_ms);
        override_parsed(&lookup, "PERSONA_FRAME_INTERVAL_MS", &mut self.frame_interval_ms);
        override_parsed(&lookup, "PERSONA_ROTATION", &mut self.rotation);
        override_parsed(&lookup, "PERSONA_VIEW_WIDTH", &mut self.view_width);
        override_parsed(&lookup, "PERSONA_VIEW_HEIGHT", &mut self.view_height);

        if let Some(v) = lookup("PERSONA_TENSOR_LAYOUT") {
            match v.trim().to_ascii_lowercase().as_str() {
                "nhwc" => self.tensor_layout = TensorLayout::Nhwc,
                "nchw" => self.tensor_layout = TensorLayout::Nchw,
                _ => tracing::warn!(
                    key = "PERSONA_TENSOR_LAYOUT",
                    value = %v,
                    "ignoring unparseable override"
                ),
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.target_size == 0 {
            return Err(ConfigError::Invalid("target_size must be positive".into()));
        }
        if self.feature_vector_size == 0 {
            return Err(ConfigError::Invalid("feature_vector_size must be positive".into()));
        }
        if !(self.norm_std.is_finite() && self.norm_std > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "norm_std must be positive, got {}",
                self.norm_std
            )));
        }
        if !self.norm_mean.is_finite() {
            return Err(ConfigError::Invalid("norm_mean must be finite".into()));
        }
        if !(self.recognition_threshold.is_finite() && self.recognition_threshold > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "recognition_threshold must be positive, got {}",
                self.recognition_threshold
            )));
        }
        if self.view_width == 0 || self.view_height == 0 {
            return Err(ConfigError::Invalid("view size must be non-zero".into()));
        }
        self.rotation()
            .map_err(|e: MapError| ConfigError::Invalid(e.to_string()))?;
        Ok(())
    }

    pub fn normalizer(&self) -> ImageNormalizer {
        ImageNormalizer::new(self.target_size, self.norm_mean, self.norm_std, self.tensor_layout)
    }

    pub fn rotation(&self) -> Result<Rotation, MapError> {
        Rotation::from_degrees(self.rotation)
    }

    pub fn view_size(&self) -> Size {
        Size::new(self.view_width, self.view_height)
    }

    pub fn model_path_str(&self) -> String {
        self.model_path.to_string_lossy().into_owned()
    }
}

/// `$XDG_DATA_HOME/persona`, falling back to `~/.local/share/persona`.
pub fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("persona")
}

fn override_parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => *slot = value,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable override"),
    }
}
