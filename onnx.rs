use crate::classifier::LogitsModel;
use crate::config::ProviderChoice;
use crate::error::{Error, Result};
use crate::preprocess::NormalizedTensor;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::{TensorRef, ValueType};

#[cfg(target_os = "windows")]
use ort::execution_providers::{DirectMLExecutionProvider, ExecutionProvider};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InferenceProvider {
    Cpu,
    DirectML { device_id: u32 },
}

impl InferenceProvider {
    pub fn label(self) -> &'static str {
        match self {
            Self::Cpu => "CPU",
            Self::DirectML { .. } => "GPU (DirectML)",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OrtRuntimeConfig {
    pub provider: ProviderChoice,
    pub device_id: Option<u32>,
}

impl OrtRuntimeConfig {
    #[cfg_attr(not(target_os = "windows"), allow(dead_code))]
    fn resolved_device_id(self) -> u32 {
        self.device_id.unwrap_or(0)
    }
}

fn ensure_environment() -> Result<()> {
    let committed = ort::init()
        .with_name("kyc-doc-classifier")
        .commit()
        .map_err(|e| Error::Init(format!("Failed to init ORT environment: {e}")))?;
    if committed {
        if let Ok(env) = ort::environment::get_environment() {
            env.set_log_level(ort::logging::LogLevel::Warning);
        }
    }
    Ok(())
}

fn init_err(e: impl std::fmt::Display) -> Error {
    Error::Init(e.to_string())
}

/// Commits one session from `model_path`, on DirectML when `dml_device` is set.
#[cfg_attr(not(target_os = "windows"), allow(unused_mut))]
fn open_session(model_path: &Path, dml_device: Option<u32>) -> Result<Session> {
    let build = || -> Result<Session> {
        let mut builder = Session::builder()
            .map_err(init_err)?
            .with_optimization_level(GraphOptimizationLevel::Level1)
            .map_err(init_err)?
            .with_parallel_execution(false)
            .map_err(init_err)?;
        #[cfg(target_os = "windows")]
        if let Some(device_id) = dml_device {
            let ep = DirectMLExecutionProvider::default()
                .with_device_id(device_id as i32)
                .build();
            builder = builder
                .with_memory_pattern(false)
                .map_err(init_err)?
                .with_execution_providers([ep])
                .map_err(init_err)?;
        }
        #[cfg(not(target_os = "windows"))]
        let _ = dml_device;
        builder
            .commit_from_file(model_path)
            .map_err(|e| Error::Init(format!("Failed to load {}: {e}", model_path.display())))
    };
    catch_unwind(AssertUnwindSafe(build)).unwrap_or_else(|_| {
        Err(Error::Init(
            "ONNX Runtime panicked while building session".into(),
        ))
    })
}

pub fn build_session(
    model_path: &Path,
    cfg: OrtRuntimeConfig,
) -> Result<(Session, InferenceProvider)> {
    if !model_path.is_file() {
        return Err(Error::Init(format!(
            "Model not found: {}",
            model_path.display()
        )));
    }
    ensure_environment()?;

    let wants_dml = matches!(cfg.provider, ProviderChoice::Auto | ProviderChoice::DirectML);
    #[cfg(target_os = "windows")]
    if wants_dml && matches!(DirectMLExecutionProvider::default().is_available(), Ok(true)) {
        let device_id = cfg.resolved_device_id();
        match open_session(model_path, Some(device_id)) {
            Ok(session) => return Ok((session, InferenceProvider::DirectML { device_id })),
            Err(err) => log::debug!("DirectML session failed: {err}"),
        }
    }

    if wants_dml {
        log::warn!(
            "DirectML execution provider unavailable; falling back to CPU for {}",
            model_path.display()
        );
    }
    let session = open_session(model_path, None)?;
    Ok((session, InferenceProvider::Cpu))
}

/// Document classifier network served by ONNX Runtime.
///
/// `Session::run` needs exclusive access, so concurrent callers are
/// serialized on the session mutex.
pub struct OnnxModel {
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
    input_dims: Vec<i64>,
    output_dims: Vec<i64>,
    provider: InferenceProvider,
    model_path: PathBuf,
}

impl std::fmt::Debug for OnnxModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxModel")
            .field("input_name", &self.input_name)
            .field("output_name", &self.output_name)
            .field("input_dims", &self.input_dims)
            .field("output_dims", &self.output_dims)
            .field("provider", &self.provider)
            .field("model_path", &self.model_path)
            .finish()
    }
}

impl OnnxModel {
    pub fn load(model_path: &Path, cfg: OrtRuntimeConfig) -> Result<Self> {
        let loaded = catch_unwind(AssertUnwindSafe(|| build_session(model_path, cfg)));
        let (session, provider) = match loaded {
            Ok(res) => res?,
            Err(_) => {
                return Err(Error::Init(format!(
                    "ONNX Runtime panicked while loading {}",
                    model_path.display()
                )))
            }
        };

        let input = session
            .inputs
            .first()
            .ok_or_else(|| Error::Init("Model declares no inputs".into()))?;
        let output = session
            .outputs
            .first()
            .ok_or_else(|| Error::Init("Model declares no outputs".into()))?;
        let input_name = input.name.clone();
        let output_name = output.name.clone();
        let input_dims = tensor_dims(&input.input_type);
        let output_dims = tensor_dims(&output.output_type);

        log::info!(
            "Loaded model {} on {} (input '{}' {:?}, output '{}' {:?})",
            model_path.display(),
            provider.label(),
            input_name,
            input_dims,
            output_name,
            output_dims
        );

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            output_name,
            input_dims,
            output_dims,
            provider,
            model_path: model_path.to_path_buf(),
        })
    }
}

fn tensor_dims(value_type: &ValueType) -> Vec<i64> {
    match value_type {
        ValueType::Tensor { shape, .. } => shape.iter().copied().collect(),
        _ => Vec::new(),
    }
}

fn fixed_dim(dims: &[i64], idx: usize) -> Option<usize> {
    dims.get(idx).copied().filter(|d| *d > 0).map(|d| d as usize)
}

impl LogitsModel for OnnxModel {
    fn logits(&self, input: &NormalizedTensor) -> Result<Vec<f32>> {
        let tensor = TensorRef::from_array_view(input.view())?;
        let mut session = self.session.lock().unwrap_or_else(|poisoned| {
            log::warn!("Session mutex poisoned by an earlier panic; continuing");
            poisoned.into_inner()
        });
        let outputs = session.run(ort::inputs![self.input_name.as_str() => tensor])?;
        let (_, data) = outputs[self.output_name.as_str()].try_extract_tensor::<f32>()?;
        if data.is_empty() {
            return Err(Error::Inference("Model returned an empty output".into()));
        }
        Ok(data.to_vec())
    }

    fn output_classes(&self) -> Option<usize> {
        match self.output_dims.len() {
            0 => None,
            n => fixed_dim(&self.output_dims, n - 1),
        }
    }

    fn input_size(&self) -> Option<(u32, u32)> {
        // NCHW: [batch, 3, height, width]
        if self.input_dims.len() != 4 {
            return None;
        }
        let h = fixed_dim(&self.input_dims, 2)?;
        let w = fixed_dim(&self.input_dims, 3)?;
        Some((w as u32, h as u32))
    }

    fn describe(&self) -> String {
        self.provider.label().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cpu() -> OrtRuntimeConfig {
        OrtRuntimeConfig {
            provider: ProviderChoice::Cpu,
            device_id: None,
        }
    }

    #[test]
    fn missing_model_fails_fast() {
        let err = OnnxModel::load(Path::new("/no/such/model.onnx"), cpu()).unwrap_err();
        match err {
            Error::Init(msg) => assert!(msg.contains("Model not found")),
            other => panic!("expected init error, got {other:?}"),
        }
    }

    #[test]
    fn corrupt_model_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.onnx");
        std::fs::write(&path, b"this is not a protobuf model").unwrap();
        assert!(matches!(OnnxModel::load(&path, cpu()), Err(Error::Init(_))));
    }

    #[test]
    fn fixed_dims_ignore_dynamic_axes() {
        assert_eq!(fixed_dim(&[-1, 5], 1), Some(5));
        assert_eq!(fixed_dim(&[-1, 5], 0), None);
        assert_eq!(fixed_dim(&[1], 3), None);
    }
}
