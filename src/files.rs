use crate::paths::PathResolver;
use crate::{EngineError, Result};
use std::path::Path;

pub fn file_exists(path: &Path) -> bool {
    std::fs::metadata(path).is_ok()
}

pub fn file_size(path: &Path) -> Result<u64> {
    let meta = std::fs::metadata(path).map_err(|e| EngineError::io(path, e))?;
    Ok(meta.len())
}

/// Removes a single file. A missing file is reported, not ignored.
pub fn delete_file(path: &Path) -> Result<()> {
    std::fs::remove_file(path).map_err(|e| EngineError::io(path, e))
}

pub fn delete_collection_folder(resolver: &PathResolver, collection: &str) -> Result<()> {
    let folder = resolver.collection_dir(collection);
    if !folder.exists() {
        return Ok(());
    }
    std::fs::remove_dir_all(&folder).map_err(|e| EngineError::io(&folder, e))?;
    tracing::info!(path = %folder.display(), "deleted podcast folder");
    Ok(())
}
