use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Json Error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("Unsupported file type '{extension}'. Supported formats: {}", supported.join(", "))]
    UnsupportedFormat {
        extension: String,
        supported: Vec<String>,
    },

    #[error("Inference Failed: {0}")]
    Inference(String),

    #[error("Invalid Configuration: {0}")]
    Config(String),

    #[error("Initialization Failed: {0}")]
    Init(String),
}

impl From<ort::Error> for Error {
    fn from(e: ort::Error) -> Self {
        Error::Inference(format!("{e}"))
    }
}
