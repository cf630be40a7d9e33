pub mod batch;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod detection;
pub mod engine;
pub mod error;
pub mod geometry;
pub mod labels;
pub mod models;
pub mod onnx;
pub mod preprocess;

pub use classifier::{DocumentClassifier, LogitsModel};
pub use cli::{Cli, Command};
pub use config::Settings;
pub use detection::CardDetector;
pub use engine::Engine;
pub use error::{Error, Result};
pub use models::{ModelInfo, PredictionResult};
