use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

pub const INVALID_EVENT: &str = "INVALID_EVENT";
pub const INVALID_SPEED: &str = "INVALID_SPEED";
pub const INVALID_TRIM: &str = "INVALID_TRIM";
pub const INVALID_SCALE: &str = "INVALID_SCALE";
pub const STAGING_FAILURE: &str = "STAGING_FAILURE";
pub const ENGINE_FAILURE: &str = "ENGINE_FAILURE";
pub const ARTIFACT_CLEANUP_FAILURE: &str = "ARTIFACT_CLEANUP_FAILURE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Captions,
    Shapes,
    DetailCaptions,
    Arrows,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Captions => "captions",
            Self::Shapes => "shapes",
            Self::DetailCaptions => "detailCaptions",
            Self::Arrows => "arrows",
        };
        f.write_str(name)
    }
}

/// Errors raised while compiling a request, before any render pass starts.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error("invalid event at {track}[{index}]: {reason}")]
    InvalidEvent {
        track: TrackKind,
        index: usize,
        reason: String,
    },
    #[error("invalid speed {0}: must be a finite value > 0")]
    InvalidSpeed(f64),
    #[error("invalid trim window (start={start}, duration={duration}): {reason}")]
    InvalidTrim {
        start: f64,
        duration: f64,
        reason: &'static str,
    },
    #[error("invalid video scale {0}")]
    InvalidScale(String),
}

impl CompileError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidEvent { .. } => INVALID_EVENT,
            Self::InvalidSpeed(_) => INVALID_SPEED,
            Self::InvalidTrim { .. } => INVALID_TRIM,
            Self::InvalidScale(_) => INVALID_SCALE,
        }
    }
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error("failed to stage render artifacts: {0}")]
    Staging(#[source] std::io::Error),
    /// Opaque failure reported by the rendering engine. The message is kept verbatim.
    #[error("{message}")]
    EngineFailure { pass: usize, message: String },
}

impl RenderError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Compile(error) => error.code(),
            Self::Staging(_) => STAGING_FAILURE,
            Self::EngineFailure { .. } => ENGINE_FAILURE,
        }
    }
}

/// Structured outcome handed back to the caller of a render request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
}

impl RenderResult {
    pub fn succeeded(output_path: &Path) -> Self {
        Self {
            success: true,
            output_path: Some(output_path.to_path_buf()),
            error: None,
            code: None,
        }
    }

    pub fn failed(error: &RenderError) -> Self {
        Self {
            success: false,
            output_path: None,
            error: Some(error.to_string()),
            code: Some(error.code()),
        }
    }
}

pub fn find_render_error(error: &anyhow::Error) -> Option<&RenderError> {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<RenderError>())
}
