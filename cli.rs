use crate::config::{ProviderChoice, Settings};
use crate::error::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "kyc-doc-classifier")]
#[command(version, about = "Classify Indian identity documents from photos")]
pub struct Cli {
    /// JSON settings file [default: built-in settings]
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// ONNX model path, overrides the settings file
    #[arg(short, long, global = true)]
    pub model: Option<PathBuf>,

    /// Confidence threshold in [0, 1]
    #[arg(short, long, global = true, value_parser = parse_threshold)]
    pub threshold: Option<f32>,

    /// Classify the whole image without looking for a card first
    #[arg(long, global = true)]
    pub no_card_detection: bool,

    /// Execution provider: auto, cpu or directml
    #[arg(long, global = true, value_parser = parse_provider)]
    pub provider: Option<ProviderChoice>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Classify image files or every supported image under a directory
    Classify {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Worker threads
        #[arg(short, long, default_value = "1")]
        workers: usize,

        /// Print a pretty JSON array instead of JSON lines
        #[arg(long)]
        pretty: bool,
    },
    /// Print model and configuration details
    Info,
    /// Print the class names the model predicts
    Classes,
}

impl Cli {
    /// Settings file (or defaults) with command-line overrides applied.
    pub fn settings(&self) -> Result<Settings> {
        let mut settings = match &self.config {
            Some(path) => Settings::load(path)?,
            None => Settings::default(),
        };
        if let Some(model) = &self.model {
            settings.model.model_path = model.clone();
        }
        if let Some(threshold) = self.threshold {
            settings.model.confidence_threshold = threshold;
        }
        if self.no_card_detection {
            settings.preprocessing.enable_card_detection = false;
        }
        if let Some(provider) = self.provider {
            settings.model.provider = provider;
        }
        settings.validate()?;
        Ok(settings)
    }
}

fn parse_threshold(s: &str) -> std::result::Result<f32, String> {
    let value: f32 = s
        .parse()
        .map_err(|_| format!("Invalid threshold: {}", s))?;
    if !(0.0..=1.0).contains(&value) {
        return Err(format!("Threshold must lie in [0, 1], got {}", value));
    }
    Ok(value)
}

fn parse_provider(s: &str) -> std::result::Result<ProviderChoice, String> {
    match s.to_ascii_lowercase().as_str() {
        "auto" => Ok(ProviderChoice::Auto),
        "cpu" => Ok(ProviderChoice::Cpu),
        "directml" | "dml" => Ok(ProviderChoice::DirectML),
        other => Err(format!(
            "Unknown provider '{}', expected auto, cpu or directml",
            other
        )),
    }
}
