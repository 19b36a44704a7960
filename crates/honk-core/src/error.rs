use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("SHA256 mismatch for {url}: expected {expected}, got {actual}")]
    Integrity {
        url: String,
        expected: String,
        actual: String,
    },

    #[error("download failed after {attempts} attempts: {url}: {message}")]
    Network {
        url: String,
        attempts: u32,
        message: String,
    },

    #[error("process '{program}' exited with {}.\n{output}", exit_label(.code))]
    ProcessExecution {
        program: String,
        code: Option<i32>,
        output: String,
    },

    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {code}"),
        None => "a signal".to_string(),
    }
}

/// Taxonomy class of an [`InstallError`], used by callers that only care
/// about the category of failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Integrity,
    Network,
    ProcessExecution,
    Validation,
    NotFound,
    Io,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Integrity => "integrity",
            ErrorKind::Network => "network",
            ErrorKind::ProcessExecution => "process",
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Io => "io",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl InstallError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            InstallError::Configuration(_) => ErrorKind::Configuration,
            InstallError::Integrity { .. } => ErrorKind::Integrity,
            InstallError::Network { .. } => ErrorKind::Network,
            InstallError::ProcessExecution { .. } | InstallError::Spawn { .. } => {
                ErrorKind::ProcessExecution
            }
            InstallError::Validation(_) => ErrorKind::Validation,
            InstallError::NotFound(_) => ErrorKind::NotFound,
            InstallError::Io(_) | InstallError::Json(_) => ErrorKind::Io,
        }
    }
}

pub type Result<T> = std::result::Result<T, InstallError>;
