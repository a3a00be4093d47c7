pub mod backup;
pub mod config;
pub mod download;
mod error;
pub mod files;
pub mod metadata;
pub mod outcome;
pub mod ownership;
pub mod paths;
pub mod watermark;

pub use error::{EngineError, ErrorKind, Result};
