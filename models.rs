use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Oriented rectangle in image coordinates. `angle` is in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrientedBox {
    pub center: (f64, f64),
    pub width: f64,
    pub height: f64,
    pub angle: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct DetectionCandidate {
    pub rect: OrientedBox,
    pub aspect_ratio_score: f64,
    pub rectangularity: f64,
    pub composite_score: f64,
}

/// Output of the card detector. `region` is `None` when the original image
/// was passed through untouched.
#[derive(Debug, Clone)]
pub struct CroppedImage {
    pub image: RgbImage,
    pub region: Option<CropRegion>,
}

impl CroppedImage {
    pub fn is_cropped(&self) -> bool {
        self.region.is_some()
    }
}

/// Class probabilities in model output order.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassProbabilities {
    pub entries: Vec<(String, f32)>,
}

impl ClassProbabilities {
    pub fn top1(&self) -> Option<(&str, f32)> {
        self.entries
            .iter()
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(name, prob)| (name.as_str(), *prob))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub success: bool,
    pub predicted_class: Option<String>,
    pub confidence: f32,
    pub all_probabilities: BTreeMap<String, f32>,
    pub threshold_met: bool,
    pub card_detection_used: bool,
    pub error: Option<String>,
}

impl PredictionResult {
    pub fn from_probabilities(
        probabilities: &ClassProbabilities,
        confidence_threshold: f32,
        card_detection_used: bool,
    ) -> Self {
        let Some((name, confidence)) = probabilities.top1() else {
            return Self::failure("Model produced no class probabilities");
        };
        let confidence = confidence.clamp(0.0, 1.0);
        Self {
            success: true,
            predicted_class: Some(name.to_string()),
            confidence,
            all_probabilities: probabilities.entries.iter().cloned().collect(),
            threshold_met: confidence >= confidence_threshold,
            card_detection_used,
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        let mut message = message.into();
        if message.trim().is_empty() {
            message = "Prediction failed".to_string();
        }
        Self {
            success: false,
            predicted_class: None,
            confidence: 0.0,
            all_probabilities: BTreeMap::new(),
            threshold_met: false,
            card_detection_used: false,
            error: Some(message),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub app: String,
    pub version: String,
    pub model_path: PathBuf,
    pub classes: Vec<String>,
    pub num_classes: usize,
    pub class_names_source: String,
    pub confidence_threshold: f32,
    pub card_detection_enabled: bool,
    pub provider: String,
    pub image_size: u32,
    pub supported_formats: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probs(values: &[(&str, f32)]) -> ClassProbabilities {
        ClassProbabilities {
            entries: values.iter().map(|(n, p)| (n.to_string(), *p)).collect(),
        }
    }

    #[test]
    fn picks_argmax_and_threshold() {
        let p = probs(&[("aadhar", 0.1), ("pan", 0.75), ("passport", 0.15)]);
        let result = PredictionResult::from_probabilities(&p, 0.7, true);
        assert!(result.success);
        assert_eq!(result.predicted_class.as_deref(), Some("pan"));
        assert!((result.confidence - 0.75).abs() < 1e-6);
        assert!(result.threshold_met);
        assert!(result.card_detection_used);
        assert_eq!(result.all_probabilities.len(), 3);
        assert!(result.error.is_none());

        let below = PredictionResult::from_probabilities(&p, 0.8, false);
        assert!(!below.threshold_met);
        assert!(!below.card_detection_used);
    }

    #[test]
    fn threshold_is_inclusive() {
        let p = probs(&[("aadhar", 0.5), ("pan", 0.5)]);
        let result = PredictionResult::from_probabilities(&p, 0.5, false);
        assert!(result.threshold_met);
    }

    #[test]
    fn empty_probabilities_become_failure() {
        let result = PredictionResult::from_probabilities(&probs(&[]), 0.7, true);
        assert!(!result.success);
        assert!(result.predicted_class.is_none());
        assert!(result.error.is_some());
    }

    #[test]
    fn failure_serializes_nulls() {
        let value = serde_json::to_value(PredictionResult::failure("bad input")).unwrap();
        assert_eq!(value["success"], false);
        assert!(value["predicted_class"].is_null());
        assert_eq!(value["confidence"], 0.0);
        assert_eq!(value["error"], "bad input");
    }

    #[test]
    fn blank_failure_message_is_replaced() {
        let result = PredictionResult::failure("  ");
        assert_eq!(result.error.as_deref(), Some("Prediction failed"));
    }
}
