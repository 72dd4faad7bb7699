//! Renderer error type.
//!
//! Only construction-time misconfiguration and device/graph failures surface as errors.
//! Running out of light slots, cache slots or grid capacity is not an error: extra entries
//! are dropped for the frame.

#[derive(thiserror::Error, Debug)]
pub enum RenderError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Device error: {0}")]
    Device(String),

    #[error("Render graph error: {0}")]
    Graph(String),

    #[error("Resource error: {0}")]
    Resource(String),
}

impl RenderError {
    pub fn device<T: ToString>(msg: T) -> Self {
        RenderError::Device(msg.to_string())
    }

    pub fn graph<T: ToString>(msg: T) -> Self {
        RenderError::Graph(msg.to_string())
    }

    pub fn resource<T: ToString>(msg: T) -> Self {
        RenderError::Resource(msg.to_string())
    }
}

/// Result type alias for renderer operations.
pub type RenderResult<T> = Result<T, RenderError>;
