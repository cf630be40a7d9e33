use crate::error::{Error, Result};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

pub const CLASS_INDICES_FILE: &str = "class_indices.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassNameSource {
    File(PathBuf),
    ConfigDefaults,
}

impl fmt::Display for ClassNameSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "file:{}", path.display()),
            Self::ConfigDefaults => write!(f, "config-defaults"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassNames {
    names: Vec<String>,
    source: ClassNameSource,
}

#[derive(Deserialize)]
struct ClassIndices {
    class_names: Vec<String>,
}

impl ClassNames {
    pub fn new(names: Vec<String>, source: ClassNameSource) -> Result<Self> {
        let names: Vec<String> = names.into_iter().map(|n| n.trim().to_string()).collect();
        if names.is_empty() {
            return Err(Error::Init("class name list is empty".into()));
        }
        if let Some(blank) = names.iter().position(|n| n.is_empty()) {
            return Err(Error::Init(format!("class name at index {blank} is blank")));
        }
        for (i, name) in names.iter().enumerate() {
            if names[..i].contains(name) {
                return Err(Error::Init(format!("duplicate class name '{name}'")));
            }
        }
        Ok(Self { names, source })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Init(format!("Failed to read class names from {}: {e}", path.display()))
        })?;
        let parsed: ClassIndices = serde_json::from_str(&contents).map_err(|e| {
            Error::Init(format!("Invalid class index file {}: {e}", path.display()))
        })?;
        Self::new(parsed.class_names, ClassNameSource::File(path.to_path_buf()))
    }

    /// Companion `class_indices.json` next to the model, or the configured
    /// defaults when that file does not exist. A file that exists but cannot be
    /// parsed is an error, not a fallback.
    pub fn resolve(model_path: &Path, defaults: &[String]) -> Result<Self> {
        let companion = companion_path(model_path);
        if companion.exists() {
            let names = Self::from_file(&companion)?;
            log::info!(
                "Loaded {} class names from {}",
                names.len(),
                companion.display()
            );
            return Ok(names);
        }
        log::warn!(
            "{} not found next to {}; using {} class names from configuration",
            CLASS_INDICES_FILE,
            model_path.display(),
            defaults.len()
        );
        Self::new(defaults.to_vec(), ClassNameSource::ConfigDefaults)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn source(&self) -> &ClassNameSource {
        &self.source
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

pub fn companion_path(model_path: &Path) -> PathBuf {
    model_path
        .parent()
        .unwrap_or(Path::new("."))
        .join(CLASS_INDICES_FILE)
}
