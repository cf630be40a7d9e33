use crate::classifier::DocumentClassifier;
use crate::config::Settings;
use crate::detection::CardDetector;
use crate::error::{Error, Result};
use crate::labels::ClassNames;
use crate::models::{ModelInfo, PredictionResult};
use crate::onnx::{OnnxModel, OrtRuntimeConfig};
use crate::preprocess::Preprocessor;
use image::RgbImage;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::time::Instant;

/// Detection, preprocessing and classification behind one shareable handle.
///
/// Every `predict_*` call returns a [`PredictionResult`]; pipeline errors and
/// panics are reported inside the result rather than propagated.
#[derive(Debug)]
pub struct Engine {
    settings: Settings,
    detector: CardDetector,
    preprocessor: Preprocessor,
    classifier: DocumentClassifier,
}

impl Engine {
    pub fn from_settings(settings: Settings) -> Result<Self> {
        settings.validate().map_err(|e| Error::Init(e.to_string()))?;
        let model_path = settings.model.model_path.clone();
        log::info!("Initializing classifier from {}", model_path.display());

        let class_names = ClassNames::resolve(&model_path, &settings.model.class_names)?;
        let model = OnnxModel::load(
            &model_path,
            OrtRuntimeConfig {
                provider: settings.model.provider,
                device_id: settings.model.device_id,
            },
        )?;
        let classifier = DocumentClassifier::new(Box::new(model), class_names)?;
        Self::new(settings, classifier)
    }

    pub fn new(settings: Settings, classifier: DocumentClassifier) -> Result<Self> {
        settings.validate().map_err(|e| Error::Init(e.to_string()))?;
        let preprocessor = Preprocessor::from_config(&settings.preprocessing)
            .map_err(|e| Error::Init(e.to_string()))?;
        classifier.check_input_size(preprocessor.size())?;
        log::info!(
            "Classifier ready: {} classes from {}, backend {}, card detection {}",
            classifier.class_names().len(),
            classifier.class_names().source(),
            classifier.backend(),
            if settings.preprocessing.enable_card_detection {
                "enabled"
            } else {
                "disabled"
            }
        );
        Ok(Self {
            settings,
            detector: CardDetector::default(),
            preprocessor,
            classifier,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn class_names(&self) -> &[String] {
        self.classifier.class_names().names()
    }

    pub fn info(&self) -> ModelInfo {
        let names = self.classifier.class_names();
        ModelInfo {
            app: self.settings.app_name.clone(),
            version: self.settings.version.clone(),
            model_path: self.settings.model.model_path.clone(),
            classes: names.names().to_vec(),
            num_classes: names.len(),
            class_names_source: names.source().to_string(),
            confidence_threshold: self.settings.model.confidence_threshold,
            card_detection_enabled: self.settings.preprocessing.enable_card_detection,
            provider: self.classifier.backend(),
            image_size: self.preprocessor.size(),
            supported_formats: self.settings.preprocessing.supported_formats.clone(),
        }
    }

    pub fn predict_path(&self, path: &Path) -> PredictionResult {
        let label = path.display().to_string();
        self.safe_run(&label, || {
            let bytes = std::fs::read(path)?;
            self.run_bytes(&bytes)
        })
    }

    pub fn predict_bytes(&self, bytes: &[u8]) -> PredictionResult {
        self.safe_run("<bytes>", || self.run_bytes(bytes))
    }

    pub fn predict_image(&self, image: &RgbImage) -> PredictionResult {
        self.safe_run("<image>", || self.run_image(image))
    }

    fn run_bytes(&self, bytes: &[u8]) -> Result<PredictionResult> {
        if bytes.is_empty() {
            return Err(Error::Decode("input is empty".into()));
        }
        let image = image::load_from_memory(bytes)
            .map_err(|e| Error::Decode(e.to_string()))?
            .to_rgb8();
        self.run_image(&image)
    }

    fn run_image(&self, image: &RgbImage) -> Result<PredictionResult> {
        if image.width() == 0 || image.height() == 0 {
            return Err(Error::Decode("image has no pixels".into()));
        }
        let detect = self.settings.preprocessing.enable_card_detection;
        let tensor = if detect {
            let cropped = self.detector.detect(image);
            if let Some(region) = cropped.region {
                log::debug!(
                    "Card found at ({}, {}) {}x{}",
                    region.x,
                    region.y,
                    region.width,
                    region.height
                );
            }
            self.preprocessor.preprocess(&cropped.image)?
        } else {
            self.preprocessor.preprocess(image)?
        };
        let probabilities = self.classifier.classify(&tensor)?;
        Ok(PredictionResult::from_probabilities(
            &probabilities,
            self.settings.model.confidence_threshold,
            detect,
        ))
    }

    fn safe_run<F>(&self, label: &str, f: F) -> PredictionResult
    where
        F: FnOnce() -> Result<PredictionResult>,
    {
        let start = Instant::now();
        let result = match catch_unwind(AssertUnwindSafe(f)) {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => PredictionResult::failure(err.to_string()),
            Err(_) => PredictionResult::failure("Prediction panicked"),
        };
        let elapsed = start.elapsed().as_secs_f64() * 1000.0;
        match (&result.predicted_class, &result.error) {
            (Some(class), _) => log::info!(
                "{label}: {class} ({:.3}, threshold met: {}) in {elapsed:.1} ms",
                result.confidence,
                result.threshold_met
            ),
            (None, err) => log::error!(
                "{label}: prediction failed in {elapsed:.1} ms: {}",
                err.as_deref().unwrap_or("unknown error")
            ),
        }
        result
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::classifier::testing::stub_classifier;

    pub fn stub_engine(card_detection: bool) -> Engine {
        let mut settings = Settings::default();
        settings.preprocessing.enable_card_detection = card_detection;
        Engine::new(settings, stub_classifier()).unwrap()
    }
}
