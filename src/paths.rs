use crate::config::EngineConfig;
use crate::outcome::Outcome;
use crate::ownership::OwnershipNormalizer;
use crate::{EngineError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use url::Url;

pub const DEFAULT_AUDIO_EXT: &str = ".mp3";
pub const DEFAULT_IMAGE_EXT: &str = ".jpg";
pub const COVER_STEM: &str = "folder";
pub const METADATA_FILE_NAME: &str = "album.nfo";
pub const IMAGES_FOLDER: &str = "images";
const FALLBACK_SLUG: &str = "untitled";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetKind {
    EpisodeAudio,
    EpisodeImage,
    CollectionCover,
    CollectionMetadata,
}

impl AssetKind {
    pub fn is_image(self) -> bool {
        matches!(self, AssetKind::EpisodeImage | AssetKind::CollectionCover)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AssetKind::EpisodeAudio => "episode-audio",
            AssetKind::EpisodeImage => "episode-image",
            AssetKind::CollectionCover => "collection-cover",
            AssetKind::CollectionMetadata => "collection-metadata",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "episode-audio" => Some(AssetKind::EpisodeAudio),
            "episode-image" => Some(AssetKind::EpisodeImage),
            "collection-cover" => Some(AssetKind::CollectionCover),
            "collection-metadata" => Some(AssetKind::CollectionMetadata),
            _ => None,
        }
    }
}

/// A remote resource to acquire. Lives for one acquisition call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAsset {
    pub url: String,
    /// Episode title, or episode id for episode images. Ignored for collection-level kinds.
    pub title: String,
    pub collection: String,
    pub kind: AssetKind,
    /// Prepended to the file name as `{prefix}-`, e.g. an episode number.
    pub prefix: Option<String>,
}

impl RemoteAsset {
    pub fn new(
        kind: AssetKind,
        url: impl Into<String>,
        title: impl Into<String>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            collection: collection.into(),
            kind,
            prefix: None,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalAsset {
    pub path: PathBuf,
    pub exists: bool,
}

#[derive(Debug, Clone)]
pub struct PathResolver {
    data_root: PathBuf,
    config_root: PathBuf,
    ownership: OwnershipNormalizer,
}

impl PathResolver {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            data_root: config.data_root.clone(),
            config_root: config.config_root.clone(),
            ownership: OwnershipNormalizer::new(config.owner),
        }
    }

    pub fn ownership(&self) -> &OwnershipNormalizer {
        &self.ownership
    }

    /// Path of the collection folder without creating it.
    pub fn collection_dir(&self, collection: &str) -> PathBuf {
        self.data_root.join(slugify(collection))
    }

    pub fn data_folder(&self, collection: &str) -> Result<Outcome<PathBuf>> {
        self.ensure_folder(&self.data_root, collection)
    }

    pub fn config_folder(&self, name: &str) -> Result<Outcome<PathBuf>> {
        self.ensure_folder(&self.config_root, name)
    }

    /// Creates `parent/slug(name)` if absent. Ownership is normalised only by the call that created it.
    pub fn ensure_folder(&self, parent: &Path, name: &str) -> Result<Outcome<PathBuf>> {
        let folder = parent.join(slugify(name));
        if folder.is_dir() {
            return Ok(Outcome::clean(folder));
        }

        create_dir_permissive(&folder).map_err(|e| EngineError::io(&folder, e))?;
        tracing::debug!(path = %folder.display(), "created folder");

        let mut outcome = Outcome::clean(folder.clone());
        self.ownership.normalize_into(&folder, &mut outcome);
        Ok(outcome)
    }

    pub fn resolve(&self, asset: &RemoteAsset) -> Result<Outcome<LocalAsset>> {
        let file_name = match asset.kind {
            AssetKind::EpisodeAudio => {
                let name = file_name(&asset.url, &asset.title, DEFAULT_AUDIO_EXT)?;
                match asset.prefix.as_deref().map(str::trim) {
                    Some(prefix) if !prefix.is_empty() => format!("{prefix}-{name}"),
                    _ => name,
                }
            }
            AssetKind::EpisodeImage => file_name(&asset.url, &asset.title, DEFAULT_IMAGE_EXT)?,
            AssetKind::CollectionCover => file_name(&asset.url, COVER_STEM, DEFAULT_IMAGE_EXT)?,
            AssetKind::CollectionMetadata => METADATA_FILE_NAME.to_string(),
        };

        let mut outcome = Outcome::clean(());
        let mut folder = outcome.absorb(self.data_folder(&asset.collection)?);
        if asset.kind == AssetKind::EpisodeImage {
            folder = outcome.absorb(self.ensure_folder(&folder, IMAGES_FOLDER)?);
        }

        let path = folder.join(file_name);
        let exists = path.exists();
        Ok(outcome.map(|_| LocalAsset { path, exists }))
    }

    /// Where the cover for `collection` lives, without downloading it.
    pub fn local_cover_path(&self, url: &str, collection: &str) -> Result<Outcome<PathBuf>> {
        let asset = RemoteAsset::new(AssetKind::CollectionCover, url, COVER_STEM, collection);
        Ok(self.resolve(&asset)?.map(|local| local.path))
    }
}

#[cfg(unix)]
fn create_dir_permissive(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o777)
        .create(path)
}

#[cfg(not(unix))]
fn create_dir_permissive(path: &Path) -> std::io::Result<()> {
    std::fs::DirBuilder::new().recursive(true).create(path)
}

/// `slug(title)` plus the URL's path extension, or `default_ext` when it has none.
pub fn file_name(url: &str, title: &str, default_ext: &str) -> Result<String> {
    let parsed = Url::parse(url).map_err(|source| EngineError::InvalidUrl {
        url: url.to_string(),
        source,
    })?;

    let ext = Path::new(parsed.path())
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .filter(|e| !e.is_empty())
        .map(|e| format!(".{e}"))
        .unwrap_or_else(|| default_ext.to_string());

    Ok(format!("{}{ext}", slugify(title)))
}

static ILLEGAL_NAME_CHARS: OnceLock<Regex> = OnceLock::new();

/// Drops characters that are unsafe in file names. Path separators become spaces.
pub fn sanitize_name(original: &str) -> String {
    let re = ILLEGAL_NAME_CHARS.get_or_init(|| Regex::new(r"[^\w\s.-]").unwrap());
    let separated = original.replace(['/', '\\'], " ");
    re.replace_all(&separated, "")
        .trim_matches(|ch: char| ch.is_whitespace() || ch == '.')
        .to_string()
}

/// Lowercase, hyphen-separated rendering of `title`. Never empty.
pub fn slugify(title: &str) -> String {
    let clean = sanitize_name(title);
    let mut words: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;

    for ch in clean.chars() {
        if !ch.is_alphanumeric() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if ch.is_uppercase() && prev_lower && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        prev_lower = ch.is_lowercase() || ch.is_numeric();
        current.extend(ch.to_lowercase());
    }
    if !current.is_empty() {
        words.push(current);
    }

    if words.is_empty() {
        FALLBACK_SLUG.to_string()
    } else {
        words.join("-")
    }
}
