use crate::error::{Error, Result};
use crate::labels::ClassNames;
use crate::models::ClassProbabilities;
use crate::preprocess::NormalizedTensor;

/// A network that maps a normalized `[1, 3, S, S]` tensor to one logit per class.
pub trait LogitsModel: Send + Sync {
    fn logits(&self, input: &NormalizedTensor) -> Result<Vec<f32>>;

    /// Class dimension of the output, when the model declares a fixed one.
    fn output_classes(&self) -> Option<usize>;

    /// Fixed `(width, height)` input, when the model declares one.
    fn input_size(&self) -> Option<(u32, u32)> {
        None
    }

    /// Execution backend, for logs and `info`.
    fn describe(&self) -> String;
}

pub struct DocumentClassifier {
    model: Box<dyn LogitsModel>,
    class_names: ClassNames,
}

impl std::fmt::Debug for DocumentClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentClassifier")
            .field("backend", &self.model.describe())
            .field("class_names", &self.class_names)
            .finish()
    }
}

impl DocumentClassifier {
    pub fn new(model: Box<dyn LogitsModel>, class_names: ClassNames) -> Result<Self> {
        if let Some(outputs) = model.output_classes() {
            if outputs != class_names.len() {
                return Err(Error::Init(format!(
                    "model outputs {outputs} classes but {} class names were loaded ({})",
                    class_names.len(),
                    class_names.source()
                )));
            }
        }
        Ok(Self { model, class_names })
    }

    /// Rejects a preprocessing size the model cannot accept.
    pub fn check_input_size(&self, size: u32) -> Result<()> {
        match self.model.input_size() {
            Some((w, h)) if w != size || h != size => Err(Error::Init(format!(
                "model expects {w}x{h} input but image_size is {size}"
            ))),
            _ => Ok(()),
        }
    }

    pub fn class_names(&self) -> &ClassNames {
        &self.class_names
    }

    pub fn backend(&self) -> String {
        self.model.describe()
    }

    pub fn classify(&self, input: &NormalizedTensor) -> Result<ClassProbabilities> {
        let logits = self.model.logits(input)?;
        if logits.len() != self.class_names.len() {
            return Err(Error::Inference(format!(
                "expected {} logits, model returned {}",
                self.class_names.len(),
                logits.len()
            )));
        }
        if logits.iter().any(|v| !v.is_finite()) {
            return Err(Error::Inference("model returned non-finite logits".into()));
        }
        let entries = self
            .class_names
            .names()
            .iter()
            .cloned()
            .zip(softmax(&logits))
            .collect();
        Ok(ClassProbabilities { entries })
    }
}

fn softmax(values: &[f32]) -> Vec<f32> {
    if values.is_empty() {
        return Vec::new();
    }
    let max_val = values.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let mut exps = Vec::with_capacity(values.len());
    let mut sum = 0.0;
    for v in values {
        let e = (v - max_val).exp();
        exps.push(e);
        sum += e;
    }
    if sum <= 0.0 {
        return vec![0.0; values.len()];
    }
    exps.iter().map(|e| e / sum).collect()
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::config::{IMAGENET_MEAN, IMAGENET_STD};
    use crate::preprocess::Preprocessor;
    use image::{Rgb, RgbImage};

    struct FixedLogits(Vec<f32>);

    impl LogitsModel for FixedLogits {
        fn logits(&self, _input: &NormalizedTensor) -> Result<Vec<f32>> {
            Ok(self.0.clone())
        }
        fn output_classes(&self) -> Option<usize> {
            None
        }
        fn describe(&self) -> String {
            "fixed".into()
        }
    }

    fn tensor() -> NormalizedTensor {
        let img = RgbImage::from_pixel(40, 30, Rgb([200, 120, 40]));
        Preprocessor::new(16, IMAGENET_MEAN, IMAGENET_STD)
            .unwrap()
            .preprocess(&img)
            .unwrap()
    }

    #[test]
    fn class_count_mismatch_is_fatal() {
        let err =
            DocumentClassifier::new(Box::new(StubModel::new(4)), default_names()).unwrap_err();
        assert!(matches!(err, Error::Init(_)));
    }

    #[test]
    fn dynamic_output_is_checked_at_inference() {
        let model = Box::new(FixedLogits(vec![1.0, 2.0]));
        let classifier = DocumentClassifier::new(model, default_names()).unwrap();
        assert!(matches!(classifier.classify(&tensor()), Err(Error::Inference(_))));
    }

    #[test]
    fn probabilities_follow_class_order_and_sum_to_one() {
        let classifier = DocumentClassifier::new(
            Box::new(FixedLogits(vec![0.1, 0.2, 3.0, 0.3, -1.0])),
            default_names(),
        )
        .unwrap();
        let probs = classifier.classify(&tensor()).unwrap();
        let names: Vec<&str> = probs.entries.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["aadhar", "driving_license", "pan", "passport", "voter_id"]);
        let sum: f32 = probs.entries.iter().map(|(_, p)| p).sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert_eq!(probs.top1().map(|(n, _)| n), Some("pan"));
    }

    #[test]
    fn softmax_is_stable_for_large_logits() {
        let probs = softmax(&[1000.0, 1001.0, 999.0]);
        assert!(probs.iter().all(|p| p.is_finite()));
        assert!(probs[1] > probs[0] && probs[0] > probs[2]);
        assert!((probs.iter().sum::<f32>() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn non_finite_logits_are_rejected() {
        let classifier = DocumentClassifier::new(
            Box::new(FixedLogits(vec![0.0, f32::NAN, 0.0, 0.0, 0.0])),
            default_names(),
        )
        .unwrap();
        assert!(classifier.classify(&tensor()).is_err());
    }

    #[test]
    fn declared_input_size_must_match() {
        let mut model = StubModel::new(5);
        model.declared_input = Some((256, 256));
        let classifier = DocumentClassifier::new(Box::new(model), default_names()).unwrap();
        assert!(classifier.check_input_size(224).is_err());
        assert!(classifier.check_input_size(256).is_ok());
        assert!(stub_classifier().check_input_size(224).is_ok());
    }
}
