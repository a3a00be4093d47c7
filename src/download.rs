//! Network-to-disk acquisition of episode audio and artwork.
//!
//! Existence on disk is the only record of a finished download, so a second
//! acquisition of the same asset is a no-op without a request. Two callers racing
//! on the same missing asset both download it; each opens the target in truncate
//! mode and the last writer wins. Callers wanting more should hold a per-path lock
//! around `acquire`.

use crate::config::{effective_user_agent, EngineConfig};
use crate::outcome::{Outcome, SideEffect, SideEffectFailure};
use crate::paths::{AssetKind, PathResolver, RemoteAsset};
use crate::watermark::ImageLabeler;
use crate::{EngineError, Result};
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

const COPY_BUFFER_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acquisition {
    pub path: PathBuf,
    /// False when the file was already on disk and nothing was requested.
    pub fetched: bool,
    pub bytes: Option<u64>,
}

#[derive(Clone)]
pub struct AssetDownloader {
    config: EngineConfig,
    resolver: PathResolver,
    labeler: ImageLabeler,
    agent: ureq::Agent,
}

impl AssetDownloader {
    pub fn new(config: EngineConfig) -> Result<Self> {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(config.request_timeout))
            .build()
            .into();
        Ok(Self {
            resolver: PathResolver::new(&config),
            labeler: ImageLabeler::new()?,
            config,
            agent,
        })
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    pub fn acquire(&self, asset: &RemoteAsset) -> Result<Outcome<Acquisition>> {
        if asset.url.trim().is_empty() {
            return Err(EngineError::InvalidInput("download url is empty".to_string()));
        }
        if asset.kind == AssetKind::CollectionMetadata {
            return Err(EngineError::InvalidInput(
                "collection metadata is written locally, not downloaded".to_string(),
            ));
        }

        let mut outcome = Outcome::clean(());
        let local = outcome.absorb(self.resolver.resolve(asset)?);
        let ownership = self.resolver.ownership();

        if local.exists {
            tracing::debug!(path = %local.path.display(), kind = asset.kind.as_str(), "already downloaded");
            ownership.normalize_into(&local.path, &mut outcome);
            return Ok(outcome.map(|_| Acquisition {
                path: local.path,
                fetched: false,
                bytes: None,
            }));
        }

        let bytes = self.fetch_to(&asset.url, &local.path)?;
        tracing::info!(
            path = %local.path.display(),
            kind = asset.kind.as_str(),
            bytes,
            "downloaded"
        );

        // Labeling swaps in a new file, so ownership goes on afterwards.
        if asset.kind.is_image() {
            if let Err(err) = self.labeler.label(&local.path) {
                outcome.push(SideEffectFailure::new(
                    &local.path,
                    SideEffect::Watermark,
                    err.to_string(),
                ));
            }
        }
        ownership.normalize_into(&local.path, &mut outcome);

        Ok(outcome.map(|_| Acquisition {
            path: local.path,
            fetched: true,
            bytes: Some(bytes),
        }))
    }

    pub fn download_episode(
        &self,
        url: &str,
        title: &str,
        collection: &str,
        prefix: Option<&str>,
    ) -> Result<Outcome<Acquisition>> {
        let mut asset = RemoteAsset::new(AssetKind::EpisodeAudio, url, title, collection);
        if let Some(prefix) = prefix {
            asset = asset.with_prefix(prefix);
        }
        self.acquire(&asset)
    }

    pub fn download_cover(&self, url: &str, collection: &str) -> Result<Outcome<Acquisition>> {
        self.acquire(&RemoteAsset::new(
            AssetKind::CollectionCover,
            url,
            crate::paths::COVER_STEM,
            collection,
        ))
    }

    pub fn download_episode_image(
        &self,
        url: &str,
        episode_id: &str,
        collection: &str,
    ) -> Result<Outcome<Acquisition>> {
        self.acquire(&RemoteAsset::new(
            AssetKind::EpisodeImage,
            url,
            episode_id,
            collection,
        ))
    }

    /// `Content-Length` reported by a HEAD request; anything but `200 OK` is an error.
    pub fn remote_file_size(&self, url: &str) -> Result<u64> {
        let mut request = self.agent.head(url);
        if let Some(user_agent) = effective_user_agent(&self.config) {
            request = request.header("User-Agent", user_agent);
        }
        let response = request.call().map_err(|e| EngineError::network(url, e))?;

        let status = response.status().as_u16();
        if status != 200 {
            return Err(EngineError::HttpStatus {
                url: url.to_string(),
                status,
            });
        }

        response
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .ok_or_else(|| {
                EngineError::InvalidInput(format!("no usable content-length from {url}"))
            })
    }

    fn get(&self, url: &str) -> Result<ureq::http::Response<ureq::Body>> {
        let mut request = self.agent.get(url);
        if let Some(user_agent) = effective_user_agent(&self.config) {
            request = request.header("User-Agent", user_agent);
        }
        let response = request.call().map_err(|e| EngineError::network(url, e))?;

        let status = response.status().as_u16();
        if status >= 400 {
            return Err(EngineError::HttpStatus {
                url: url.to_string(),
                status,
            });
        }
        Ok(response)
    }

    /// Streams `url` into `path`. A partial file never survives a failure.
    fn fetch_to(&self, url: &str, path: &Path) -> Result<u64> {
        let response = self.get(url)?;
        let mut reader = response.into_body().into_reader();

        let file = File::create(path).map_err(|e| EngineError::io(path, e))?;
        let mut writer = BufWriter::new(file);
        let copied = copy_body(url, path, &mut reader, &mut writer);
        drop(writer);

        if copied.is_err() {
            let _ = std::fs::remove_file(path);
        }
        copied
    }
}

fn copy_body(
    url: &str,
    path: &Path,
    reader: &mut impl Read,
    writer: &mut BufWriter<File>,
) -> Result<u64> {
    let mut total = 0_u64;
    let mut buf = vec![0_u8; COPY_BUFFER_BYTES];
    loop {
        let n = reader
            .read(&mut buf)
            .map_err(|e| EngineError::network(url, ureq::Error::Io(e)))?;
        if n == 0 {
            break;
        }
        writer
            .write_all(&buf[..n])
            .map_err(|e| EngineError::io(path, e))?;
        total += n as u64;
    }
    writer.flush().map_err(|e| EngineError::io(path, e))?;
    writer
        .get_ref()
        .sync_all()
        .map_err(|e| EngineError::io(path, e))?;
    Ok(total)
}
