//! Error types for the newsroom pipeline

use thiserror::Error;

#[derive(Error, Debug)]
pub enum NewsroomError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON parsing failed: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("XML parsing failed: {0}")]
    XmlError(String),

    #[error("Unrecognised date format: {input:?}")]
    DateParseError { input: String },

    #[error("Provider {name} failed: {detail}")]
    ProviderError { name: String, detail: String },

    #[error("{}", join_errors(.0))]
    PartialFetch(Vec<NewsroomError>),

    #[error("Contract violation: {0}")]
    ContractViolation(String),

    #[error("Malformed metadata for {hash}: {detail}")]
    MalformedMetadata { hash: String, detail: String },

    #[error("API error: {code} - {message}")]
    ApiError { code: String, message: String },

    #[error("Publish failed: {0}")]
    PublishError(String),

    #[error("Composer error: {0}")]
    ComposerError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Invalid data: {0}")]
    ValidationError(String),

    #[error("Timed out: {0}")]
    Timeout(String),
}

fn join_errors(errors: &[NewsroomError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl NewsroomError {
    /// Wraps any displayable failure as a provider error attributed to `name`.
    pub fn provider(name: impl Into<String>, detail: impl std::fmt::Display) -> Self {
        Self::ProviderError {
            name: name.into(),
            detail: detail.to_string(),
        }
    }

    /// Short machine-friendly label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::HttpError(_) => "http",
            Self::JsonError(_) => "json",
            Self::DatabaseError(_) => "database",
            Self::ConfigError(_) => "config",
            Self::IoError(_) => "io",
            Self::XmlError(_) => "xml",
            Self::DateParseError { .. } => "date_parse",
            Self::ProviderError { .. } => "provider",
            Self::PartialFetch(_) => "partial_fetch",
            Self::ContractViolation(_) => "contract_violation",
            Self::MalformedMetadata { .. } => "malformed_metadata",
            Self::ApiError { .. } => "api",
            Self::PublishError(_) => "publish",
            Self::ComposerError(_) => "composer",
            Self::StorageError(_) => "storage",
            Self::ValidationError(_) => "validation",
            Self::Timeout(_) => "timeout",
        }
    }
}

pub type Result<T> = std::result::Result<T, NewsroomError>;
