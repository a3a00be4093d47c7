//! Rotating `.tar.gz` snapshots of the application database.

use crate::config::EngineConfig;
use crate::outcome::{Outcome, SideEffect, SideEffectFailure};
use crate::paths::PathResolver;
use crate::{EngineError, Result};
use chrono::{Local, NaiveDateTime};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{File, Metadata, OpenOptions};
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;

pub const BACKUP_RETENTION: usize = 5;
const BACKUPS_FOLDER: &str = "backups";
const BACKUP_PREFIX: &str = "podgrab_backup_";
const BACKUP_SUFFIX: &str = ".tar.gz";
const TIMESTAMP_FORMAT: &str = "%Y.%m.%d_%H%M%S";

/// Archive names sort chronologically because the timestamp is zero padded, most significant first.
pub fn backup_file_name(at: NaiveDateTime) -> String {
    format!("{BACKUP_PREFIX}{}{BACKUP_SUFFIX}", at.format(TIMESTAMP_FORMAT))
}

#[derive(Debug, Clone)]
pub struct BackupManager {
    resolver: PathResolver,
    database_path: PathBuf,
    backups_dir: PathBuf,
    retention: usize,
}

impl BackupManager {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            resolver: PathResolver::new(config),
            database_path: config.database_path(),
            backups_dir: config.backups_dir(),
            retention: BACKUP_RETENTION,
        }
    }

    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = retention;
        self
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn create_backup(&self) -> Result<Outcome<String>> {
        self.create_backup_at(Local::now().naive_local())
    }

    /// Archives the database under a name stamped with `at`, then prunes old archives.
    /// Prune failures end up as warnings on the returned outcome.
    pub fn create_backup_at(&self, at: NaiveDateTime) -> Result<Outcome<String>> {
        std::fs::metadata(&self.database_path).map_err(|source| EngineError::DatabaseMissing {
            path: self.database_path.clone(),
            source,
        })?;

        let mut outcome = Outcome::clean(());
        let folder = outcome.absorb(self.resolver.config_folder(BACKUPS_FOLDER)?);
        let name = backup_file_name(at);
        let archive_path = folder.join(&name);

        write_archive(&archive_path, &self.database_path)?;
        self.resolver
            .ownership()
            .normalize_into(&archive_path, &mut outcome);
        tracing::info!(path = %archive_path.display(), "created backup");

        for warning in self.prune_backups(self.retention) {
            outcome.push(warning);
        }
        Ok(outcome.map(|_| name))
    }

    /// Files directly inside the backups folder, newest name first.
    pub fn list_backups(&self) -> Result<Vec<PathBuf>> {
        if !self.backups_dir.exists() {
            return Ok(Vec::new());
        }
        let entries =
            std::fs::read_dir(&self.backups_dir).map_err(|e| EngineError::io(&self.backups_dir, e))?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| EngineError::io(&self.backups_dir, e))?;
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            if is_file {
                files.push(entry.path());
            }
        }
        files.sort_by(|a, b| b.file_name().cmp(&a.file_name()));
        Ok(files)
    }

    /// Deletes everything past the `keep` newest backups. One failed delete does not stop the rest.
    pub fn prune_backups(&self, keep: usize) -> Vec<SideEffectFailure> {
        let files = match self.list_backups() {
            Ok(files) => files,
            Err(err) => {
                return vec![SideEffectFailure::new(
                    &self.backups_dir,
                    SideEffect::Retention,
                    err.to_string(),
                )]
            }
        };

        let mut failures = Vec::new();
        for stale in files.iter().skip(keep) {
            match std::fs::remove_file(stale) {
                Ok(()) => tracing::info!(path = %stale.display(), "deleted old backup"),
                Err(e) => failures.push(SideEffectFailure::new(
                    stale,
                    SideEffect::Retention,
                    format!("failed to delete old backup: {e}"),
                )),
            }
        }
        failures
    }
}

/// Never overwrites an existing archive; a partial archive this call created is removed on failure.
fn write_archive(archive_path: &Path, source: &Path) -> Result<()> {
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(archive_path)
        .map_err(|e| EngineError::io(archive_path, e))?;
    if let Err(err) = fill_archive(file, archive_path, source) {
        let _ = std::fs::remove_file(archive_path);
        return Err(err);
    }
    Ok(())
}

/// gzip(tar(db)). The tar footer is flushed before the gzip trailer, and both before the file is synced.
fn fill_archive(file: File, archive_path: &Path, source: &Path) -> Result<()> {
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));

    append_file(&mut builder, source)?;

    let encoder = builder
        .into_inner()
        .map_err(|e| EngineError::io(archive_path, e))?;
    let file = encoder
        .finish()
        .map_err(|e| EngineError::io(archive_path, e))?;
    file.sync_all()
        .map_err(|e| EngineError::io(archive_path, e))?;
    Ok(())
}

fn append_file<W: Write>(builder: &mut tar::Builder<W>, source: &Path) -> Result<()> {
    let file = File::open(source).map_err(|e| EngineError::io(source, e))?;
    let meta = file.metadata().map_err(|e| EngineError::io(source, e))?;

    let mut header = tar::Header::new_ustar();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_size(meta.len());
    header.set_mode(file_mode(&meta));
    header.set_mtime(modified_secs(&meta));

    // Header size is fixed up front; never copy more than it promises.
    let mut data = file.take(meta.len());
    builder
        .append_data(&mut header, entry_name(source), &mut data)
        .map_err(|e| EngineError::io(source, e))?;
    Ok(())
}

/// The source path with its root stripped; tar members must be relative.
pub fn entry_name(source: &Path) -> PathBuf {
    source
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect()
}

#[cfg(unix)]
fn file_mode(meta: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(_meta: &Metadata) -> u32 {
    0o644
}

fn modified_secs(meta: &Metadata) -> u64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
