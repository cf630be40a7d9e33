use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CLASS_NAMES: [&str; 5] =
    ["aadhar", "driving_license", "pan", "passport", "voter_id"];
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderChoice {
    Auto,
    Cpu,
    DirectML,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub model_path: PathBuf,
    pub class_names: Vec<String>,
    pub confidence_threshold: f32,
    pub provider: ProviderChoice,
    pub device_id: Option<u32>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("model/document_classifier.onnx"),
            class_names: DEFAULT_CLASS_NAMES.iter().map(|s| s.to_string()).collect(),
            confidence_threshold: 0.70,
            provider: ProviderChoice::Auto,
            device_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessingConfig {
    pub enable_card_detection: bool,
    pub image_size: u32,
    pub mean: [f32; 3],
    pub std: [f32; 3],
    pub supported_formats: Vec<String>,
}

impl Default for PreprocessingConfig {
    fn default() -> Self {
        Self {
            enable_card_detection: true,
            image_size: 224,
            mean: IMAGENET_MEAN,
            std: IMAGENET_STD,
            supported_formats: default_supported_formats(),
        }
    }
}

fn default_supported_formats() -> Vec<String> {
    ["jpg", "jpeg", "png", "bmp", "tiff"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl PreprocessingConfig {
    /// Boundary check on a caller-supplied file name or path.
    pub fn check_format(&self, path: &Path) -> Result<()> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase())
            .unwrap_or_default();
        if self
            .supported_formats
            .iter()
            .any(|fmt| fmt.trim_start_matches('.').eq_ignore_ascii_case(&extension))
        {
            return Ok(());
        }
        Err(Error::UnsupportedFormat {
            extension,
            supported: self.supported_formats.clone(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub app_name: String,
    pub version: String,
    pub model: ModelConfig,
    pub preprocessing: PreprocessingConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_name: "KYC Document Classifier".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            model: ModelConfig::default(),
            preprocessing: PreprocessingConfig::default(),
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        let settings: Settings = serde_json::from_str(&contents)?;
        settings.validate()?;
        log::info!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        let threshold = self.model.confidence_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(Error::Config(format!(
                "confidence_threshold must lie in [0, 1], got {threshold}"
            )));
        }
        if self.preprocessing.image_size == 0 {
            return Err(Error::Config("image_size must be positive".into()));
        }
        if self.preprocessing.std.iter().any(|s| !s.is_finite() || *s == 0.0) {
            return Err(Error::Config(format!(
                "std values must be finite and non-zero, got {:?}",
                self.preprocessing.std
            )));
        }
        if self.preprocessing.supported_formats.is_empty() {
            return Err(Error::Config("supported_formats must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{"model": {"confidence_threshold": 0.5}}"#).unwrap();
        assert_eq!(settings.model.confidence_threshold, 0.5);
        assert_eq!(settings.model.class_names.len(), 5);
        assert_eq!(settings.preprocessing.image_size, 224);
        assert!(settings.preprocessing.enable_card_detection);
        assert_eq!(settings.model.provider, ProviderChoice::Auto);
    }

    #[test]
    fn provider_parses_lowercase() {
        let settings: Settings =
            serde_json::from_str(r#"{"model": {"provider": "directml"}}"#).unwrap();
        assert_eq!(settings.model.provider, ProviderChoice::DirectML);
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let mut settings = Settings::default();
        settings.model.confidence_threshold = 1.5;
        assert!(matches!(settings.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn rejects_zero_std() {
        let mut settings = Settings::default();
        settings.preprocessing.std = [0.229, 0.0, 0.225];
        assert!(settings.validate().is_err());
    }

    #[test]
    fn format_check_is_case_insensitive() {
        let cfg = PreprocessingConfig::default();
        assert!(cfg.check_format(Path::new("card.JPG")).is_ok());
        assert!(cfg.check_format(Path::new("/tmp/scan.tiff")).is_ok());
        match cfg.check_format(Path::new("notes.txt")) {
            Err(Error::UnsupportedFormat { extension, supported }) => {
                assert_eq!(extension, "txt");
                assert!(supported.contains(&"png".to_string()));
            }
            other => panic!("expected unsupported format, got {other:?}"),
        }
        assert!(cfg.check_format(Path::new("no_extension")).is_err());
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app_config.json");
        std::fs::write(
            &path,
            r#"{"app_name": "Test", "preprocessing": {"enable_card_detection": false}}"#,
        )
        .unwrap();
        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.app_name, "Test");
        assert!(!settings.preprocessing.enable_card_detection);
    }

    #[test]
    fn load_missing_file_is_config_error() {
        let err = Settings::load(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
