use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("malformed url {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("request to {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: Box<ureq::Error>,
    },

    #[error("request to {url} returned status {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("image error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("unsupported image format at {path}")]
    UnsupportedImage { path: PathBuf },

    #[error("invalid font: {0}")]
    Font(#[from] ab_glyph::InvalidFont),

    #[error("could not find db file {path}: {source}")]
    DatabaseMissing {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write metadata {path}: {message}")]
    Metadata { path: PathBuf, message: String },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Coarse failure category, stable across variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    Network,
    Filesystem,
    Codec,
    Precondition,
    Config,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::InvalidInput(_) | EngineError::InvalidUrl { .. } => ErrorKind::InvalidInput,
            EngineError::Network { .. } | EngineError::HttpStatus { .. } => ErrorKind::Network,
            EngineError::Io { .. } | EngineError::Metadata { .. } => ErrorKind::Filesystem,
            EngineError::Image { .. }
            | EngineError::UnsupportedImage { .. }
            | EngineError::Font(_) => ErrorKind::Codec,
            EngineError::DatabaseMissing { .. } => ErrorKind::Precondition,
            EngineError::Json(_) | EngineError::Config(_) => ErrorKind::Config,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EngineError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn network(url: &str, source: ureq::Error) -> Self {
        EngineError::Network {
            url: url.to_string(),
            source: Box::new(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_report_the_offending_path() {
        let err = EngineError::io(
            "/data/show/ep.mp3",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(err.kind(), ErrorKind::Filesystem);
        assert!(err.to_string().contains("/data/show/ep.mp3"));
    }

    #[test]
    fn missing_database_is_a_precondition_failure() {
        let err = EngineError::DatabaseMissing {
            path: PathBuf::from("/config/podgrab.db"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert_eq!(err.kind(), ErrorKind::Precondition);
        assert!(err.to_string().contains("podgrab.db"));
    }
}
