use sticker_contracts::grid::GridError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Failure kinds of one user-triggered action. None of them is retried.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{0}")]
    Auth(String),
    #[error("{0}")]
    ServerConfig(String),
    #[error("upstream request failed ({status}): {body}")]
    Upstream { status: u16, body: String },
    #[error("image codec error: {0}")]
    Codec(String),
    #[error("{0}")]
    Extraction(String),
    #[error("invalid grid: {0}")]
    InvalidGrid(#[from] GridError),
    #[error("packaging failed: {0}")]
    Packaging(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("generation cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Stable label used in event payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Auth(_) => "auth",
            PipelineError::ServerConfig(_) => "server_config",
            PipelineError::Upstream { .. } => "upstream",
            PipelineError::Codec(_) => "codec",
            PipelineError::Extraction(_) => "extraction",
            PipelineError::InvalidGrid(_) => "invalid_grid",
            PipelineError::Packaging(_) => "packaging",
            PipelineError::Transport(_) => "transport",
            PipelineError::Cancelled => "cancelled",
        }
    }
}

impl From<image::ImageError> for PipelineError {
    fn from(err: image::ImageError) -> Self {
        PipelineError::Codec(err.to_string())
    }
}

impl From<zip::result::ZipError> for PipelineError {
    fn from(err: zip::result::ZipError) -> Self {
        PipelineError::Packaging(err.to_string())
    }
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
