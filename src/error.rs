//! Error types for live2d-stage

use thiserror::Error;

/// Main error type for live2d-stage
#[derive(Error, Debug)]
pub enum Live2dStageError {
    #[error("Native module error: {0}")]
    Native(#[from] NativeError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Web server error: {0}")]
    Web(#[from] WebError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors reported by the native Live2D rendering surface
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NativeError {
    #[error("Live2D native module is unavailable")]
    Unavailable,

    #[error("Failed to construct viewer: {0}")]
    ViewerConstruction(String),

    #[error("Failed to initialize viewer: {0}")]
    Initialize(String),

    #[error("Failed to load model assets: {0}")]
    AssetLoad(String),
}

/// Model lifecycle errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("Viewer is not initialized")]
    ViewerNotInitialized,

    #[error("Failed to load model {name}: {reason}")]
    LoadFailed { name: String, reason: String },
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadFile(String),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid configuration value: {field} - {message}")]
    InvalidValue { field: String, message: String },
}

/// Web server errors
#[derive(Error, Debug)]
pub enum WebError {
    #[error("Failed to bind to address: {0}")]
    Bind(String),

    #[error("Server startup failed: {0}")]
    Startup(String),
}

/// Result type alias for live2d-stage operations
pub type Result<T> = std::result::Result<T, Live2dStageError>;
