use std::collections::{BTreeSet, HashMap};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::{Headers, PathSpec};

const CACHE_VERSION: u32 = 1;

/// Slim header pairs stored for one canonical message id
pub type HeaderRecord = Vec<(String, String)>;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("not in header cache: {0}")]
    NotFound(String),
    #[error("cache key {key} does not match Message-Id {message_id}")]
    Consistency { key: String, message_id: String },
    #[error("message has no Message-Id header")]
    MissingMessageId,
    #[error("cache file version {found}, expected {expected}")]
    VersionMismatch { expected: u32, found: u32 },
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache encoding error: {0}")]
    Encoding(#[from] bincode::Error),
}

/// Either a canonical message id or a provider locator resolving to one
#[derive(Debug, Clone, Copy)]
pub enum CacheKey<'a> {
    Id(&'a str),
    Path(&'a PathSpec),
}

impl<'a> From<&'a str> for CacheKey<'a> {
    fn from(id: &'a str) -> Self {
        CacheKey::Id(id)
    }
}

impl<'a> From<&'a String> for CacheKey<'a> {
    fn from(id: &'a String) -> Self {
        CacheKey::Id(id)
    }
}

impl<'a> From<&'a PathSpec> for CacheKey<'a> {
    fn from(spec: &'a PathSpec) -> Self {
        CacheKey::Path(spec)
    }
}

#[derive(Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    messages: HashMap<String, HeaderRecord>,
    resolve: HashMap<PathSpec, String>,
    index: HashMap<String, BTreeSet<PathSpec>>,
}

/// Durable store of slim header records.
///
/// `resolve` maps every known locator to its canonical id and `index` holds
/// the reverse; the two always mirror each other. Entries only accumulate.
#[derive(Debug, Default)]
pub struct HeaderCache {
    path: PathBuf,
    messages: HashMap<String, HeaderRecord>,
    resolve: HashMap<PathSpec, String>,
    index: HashMap<String, BTreeSet<PathSpec>>,
}

impl HeaderCache {
    /// Empty cache backed by `path`. Nothing is read until `load`.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Default location under the user cache directory
    pub fn default_path() -> Option<PathBuf> {
        dirs::cache_dir().map(|p| p.join("mailthread/headers.bin"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of cached messages
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn canonical_id<'a>(&'a self, key: CacheKey<'a>) -> Result<&'a str, CacheError> {
        match key {
            CacheKey::Id(id) => Ok(id),
            CacheKey::Path(spec) => self
                .resolve
                .get(spec)
                .map(String::as_str)
                .ok_or_else(|| CacheError::NotFound(spec.to_string())),
        }
    }

    pub fn get<'a>(&self, key: impl Into<CacheKey<'a>>) -> Result<&HeaderRecord, CacheError> {
        let id = self.canonical_id(key.into())?;
        self.messages
            .get(id)
            .ok_or_else(|| CacheError::NotFound(id.to_string()))
    }

    /// Store the whitelisted headers of `value` under its Message-Id.
    ///
    /// A locator key is also recorded in both directions of the index. A bare
    /// id key must equal the Message-Id exactly.
    pub fn put<'a>(
        &mut self,
        key: impl Into<CacheKey<'a>>,
        value: &impl Headers,
    ) -> Result<(), CacheError> {
        let message_id = value.message_id().ok_or(CacheError::MissingMessageId)?;

        match key.into() {
            CacheKey::Path(spec) => self.link(spec.clone(), message_id.to_string()),
            CacheKey::Id(id) => {
                if id != message_id {
                    return Err(CacheError::Consistency {
                        key: id.to_string(),
                        message_id: message_id.to_string(),
                    });
                }
            }
        }

        log::trace!("caching headers for {}", message_id);
        self.messages
            .insert(message_id.to_string(), value.slim_headers());
        Ok(())
    }

    /// Point `spec` at `message_id` in both directions of the index. A locator
    /// that held a different message is dropped from that message's set.
    fn link(&mut self, spec: PathSpec, message_id: String) {
        if let Some(previous) = self.resolve.get(&spec).filter(|id| **id != message_id) {
            if let Some(specs) = self.index.get_mut(previous) {
                specs.remove(&spec);
            }
        }
        self.index
            .entry(message_id.clone())
            .or_default()
            .insert(spec.clone());
        self.resolve.insert(spec, message_id);
    }

    /// Every known locator of a message id, empty when none
    pub fn lookup(&self, message_id: &str) -> BTreeSet<PathSpec> {
        self.index.get(message_id).cloned().unwrap_or_default()
    }

    /// Merge the cache file into memory. Existing entries are kept unless the
    /// file holds the same key.
    pub fn load(&mut self) -> Result<(), CacheError> {
        log::debug!("loading header cache from {}", self.path.display());

        let file = File::open(&self.path)?;
        let stored: CacheFile = bincode::deserialize_from(BufReader::new(file))?;

        if stored.version != CACHE_VERSION {
            return Err(CacheError::VersionMismatch {
                expected: CACHE_VERSION,
                found: stored.version,
            });
        }

        self.messages.extend(stored.messages);
        // The stored index mirrors the stored resolve map, so it is rebuilt
        // from there rather than merged separately.
        for (spec, message_id) in stored.resolve {
            self.link(spec, message_id);
        }

        log::info!(
            "loaded header cache: {} messages, {} locators",
            self.messages.len(),
            self.resolve.len()
        );
        Ok(())
    }

    /// Write the whole cache. Failures are logged and swallowed.
    pub fn save(&self) {
        if let Err(e) = self.try_save() {
            log::error!("could not save header cache {}: {}", self.path.display(), e);
        }
    }

    /// Write the whole cache to its file, owner-only, through a temporary
    /// file renamed into place.
    pub fn try_save(&self) -> Result<(), CacheError> {
        log::debug!("saving header cache to {}", self.path.display());

        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        if !dir.exists() {
            create_private_dir(dir)?;
        }

        let stored = CacheFile {
            version: CACHE_VERSION,
            messages: self.messages.clone(),
            resolve: self.resolve.clone(),
            index: self.index.clone(),
        };

        // NamedTempFile is created with mode 0600
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            bincode::serialize_into(&mut writer, &stored)?;
            writer.flush()?;
        }
        tmp.persist(&self.path).map_err(|e| CacheError::Io(e.error))?;

        log::info!(
            "saved header cache: {} messages, {} locators",
            self.messages.len(),
            self.resolve.len()
        );
        Ok(())
    }
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new().recursive(true).mode(0o700).create(dir)
}

#[cfg(not(unix))]
fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dir)
}
