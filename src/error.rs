use serde::Serialize;
use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("IO error at {path}: {source}")]
    FileIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Transfer error at {path}: {message}")]
    Transfer { path: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("No connection profile configured")]
    ProfileNotSet,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification of [`AppError`], one per client-facing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connection,
    Execution,
    Io,
    Config,
    Internal,
}

impl AppError {
    pub fn file_io(path: impl Into<String>, source: std::io::Error) -> Self {
        AppError::FileIo {
            path: path.into(),
            source,
        }
    }

    pub fn transfer(path: impl Into<String>, message: impl std::fmt::Display) -> Self {
        AppError::Transfer {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Connection(_) => ErrorKind::Connection,
            AppError::Execution(_) => ErrorKind::Execution,
            AppError::FileIo { .. } | AppError::Transfer { .. } | AppError::Io(_) => ErrorKind::Io,
            AppError::Config(_) | AppError::ProfileNotSet => ErrorKind::Config,
            AppError::Serialization(_) | AppError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// HTTP-style status a front end should report for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::Connection(_) => 502,
            AppError::Execution(_) => 500,
            AppError::FileIo { source, .. } | AppError::Io(source) => match source.kind() {
                std::io::ErrorKind::NotFound => 404,
                std::io::ErrorKind::PermissionDenied => 403,
                _ => 500,
            },
            AppError::Transfer { message, .. } => {
                let lower = message.to_lowercase();
                if lower.contains("no such file") {
                    404
                } else if lower.contains("permission denied") {
                    403
                } else {
                    500
                }
            }
            AppError::Config(_) | AppError::ProfileNotSet => 400,
            AppError::Serialization(_) | AppError::Internal(_) => 500,
        }
    }
}

/// Serializable error for front ends
#[derive(Debug, Serialize)]
pub struct SerializableError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl From<&AppError> for SerializableError {
    fn from(err: &AppError) -> Self {
        let (code, message, details) = match err {
            AppError::Connection(msg) => ("CONNECTION_ERROR", msg.clone(), None),
            AppError::Execution(msg) => ("EXECUTION_ERROR", msg.clone(), None),
            AppError::FileIo { path, source } => {
                ("IO_ERROR", source.to_string(), Some(path.clone()))
            }
            AppError::Transfer { path, message } => {
                ("IO_ERROR", message.clone(), Some(path.clone()))
            }
            AppError::Io(e) => ("IO_ERROR", e.to_string(), None),
            AppError::Config(msg) => ("CONFIG_ERROR", msg.clone(), None),
            AppError::ProfileNotSet => ("CONFIG_ERROR", err.to_string(), None),
            AppError::Serialization(msg) => ("SERIALIZATION_ERROR", msg.clone(), None),
            AppError::Internal(msg) => ("INTERNAL_ERROR", msg.clone(), None),
        };

        SerializableError {
            code: code.to_string(),
            message: crate::logging::sanitize(&message),
            details,
        }
    }
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        SerializableError::from(self).serialize(serializer)
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for AppError {
    fn from(err: toml::ser::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        AppError::Internal(format!("Background task failed: {}", err))
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(AppError::Connection("refused".into()).kind(), ErrorKind::Connection);
        assert_eq!(AppError::Execution("exit 1".into()).kind(), ErrorKind::Execution);
        assert_eq!(AppError::transfer("/tmp/x", "broken pipe").kind(), ErrorKind::Io);
        assert_eq!(AppError::ProfileNotSet.kind(), ErrorKind::Config);
    }

    #[test]
    fn test_status_codes() {
        let missing = AppError::file_io(
            "/nope",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert_eq!(missing.status_code(), 404);

        let denied = AppError::file_io(
            "/root",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(denied.status_code(), 403);

        assert_eq!(AppError::transfer("/x", "no such file").status_code(), 404);
        assert_eq!(AppError::Connection("timeout".into()).status_code(), 502);
        assert_eq!(AppError::Config("bad".into()).status_code(), 400);
    }

    #[test]
    fn test_serializable_error_carries_path() {
        let err = AppError::transfer("/srv/data.bin", "Failed to open file");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], "IO_ERROR");
        assert_eq!(json["details"], "/srv/data.bin");
    }

    #[test]
    fn test_serializable_error_redacts_secrets() {
        let err = AppError::Execution("Command failed: mysql password=hunter2".into());
        let json = serde_json::to_value(&err).unwrap();
        let message = json["message"].as_str().unwrap();
        assert!(!message.contains("hunter2"));
        assert!(message.contains("[REDACTED]"));
    }
}
