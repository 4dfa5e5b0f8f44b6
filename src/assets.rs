//! Static asset sources.
//!
//! An [`AssetSource`] resolves URL paths to [`Asset`]s from one of three
//! places: resources packaged into the binary (or any other
//! [`ResourceLoader`]), a directory on disk, or a single pinned file.
//! Construction failures (missing directory, missing webjar descriptor) are
//! fatal [`AssetError`]s; per-request misses are `None` and render as 404 by
//! whatever handler serves the source.
//!
//! Every lookup is read-only and traversal-safe: a resolved asset can never
//! sit outside the configured base, no matter how many `..` segments the
//! request smuggles in.

use crate::error::AssetError;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info};

/// Where an asset's bytes live.
#[derive(Debug, Clone)]
pub enum AssetData {
    /// A file on disk, read on demand.
    File(PathBuf),
    /// Bytes held by a resource loader.
    Bytes(Arc<[u8]>),
}

/// A resolved static asset.
#[derive(Debug, Clone)]
pub struct Asset {
    /// The path it was resolved under.
    pub path: String,
    /// Content length in bytes.
    pub length: u64,
    /// Last modification time, when the backing store knows it.
    pub modified: Option<SystemTime>,
    /// Content type guessed from the file extension.
    pub content_type: &'static str,
    /// The bytes, by reference or by location.
    pub data: AssetData,
}

impl Asset {
    /// Materialize the asset content.
    pub fn bytes(&self) -> io::Result<Vec<u8>> {
        match &self.data {
            AssetData::File(path) => fs::read(path),
            AssetData::Bytes(bytes) => Ok(bytes.to_vec()),
        }
    }
}

/// Provider of named read-only resources, the packaged-resource analogue of
/// a class path. Implementations must be cheap to call; lookups happen per
/// request.
pub trait ResourceLoader: Send + Sync {
    /// Bytes of the resource at `path`, or `None`.
    fn load(&self, path: &str) -> Option<Arc<[u8]>>;

    fn contains(&self, path: &str) -> bool {
        self.load(path).is_some()
    }
}

/// In-memory [`ResourceLoader`] backed by a map. The usual carrier for
/// resources embedded at build time, and for tests.
#[derive(Debug, Clone, Default)]
pub struct EmbeddedResources {
    entries: HashMap<String, Arc<[u8]>>,
}

impl EmbeddedResources {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: &str, bytes: impl Into<Arc<[u8]>>) {
        self.entries
            .insert(path.trim_start_matches('/').to_string(), bytes.into());
    }

    #[must_use]
    pub fn with(mut self, path: &str, bytes: &[u8]) -> Self {
        self.insert(path, bytes);
        self
    }
}

impl ResourceLoader for EmbeddedResources {
    fn load(&self, path: &str) -> Option<Arc<[u8]>> {
        self.entries
            .get(path.trim_start_matches('/'))
            .map(Arc::clone)
    }
}

/// A collection of assets resolvable by path.
#[derive(Clone)]
pub enum AssetSource {
    /// Resources under a base prefix inside a [`ResourceLoader`].
    Packaged {
        loader: Arc<dyn ResourceLoader>,
        base: String,
    },
    /// Files under a directory on disk.
    Directory { root: PathBuf },
    /// One pinned file served under its own name.
    SingleFile { name: String, file: PathBuf },
}

impl AssetSource {
    /// Source over packaged resources rooted at `base`.
    #[must_use]
    pub fn packaged(loader: Arc<dyn ResourceLoader>, base: &str) -> Self {
        AssetSource::Packaged {
            loader,
            base: base.trim_matches('/').to_string(),
        }
    }

    /// Source over the file system. A directory serves its tree; a regular
    /// file serves exactly itself; anything else fails construction.
    pub fn from_path(location: &Path) -> Result<Self, AssetError> {
        if location.is_dir() {
            let root = location
                .canonicalize()
                .map_err(|e| AssetError::Io {
                    location: location.display().to_string(),
                    source: e,
                })?;
            info!(root = %root.display(), "directory asset source created");
            Ok(AssetSource::Directory { root })
        } else if location.is_file() {
            let name = location
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            Ok(AssetSource::SingleFile {
                name,
                file: location.to_path_buf(),
            })
        } else {
            Err(AssetError::NotFound {
                location: location.display().to_string(),
            })
        }
    }

    /// Source over a packaged webjar.
    ///
    /// Probes the jar's Maven descriptor to discover the packaged version,
    /// then roots the source at the versioned resource directory. A missing
    /// descriptor means the webjar is not on the class path and construction
    /// fails.
    pub fn webjar(loader: Arc<dyn ResourceLoader>, name: &str) -> Result<Self, AssetError> {
        let candidates = [
            format!("META-INF/maven/org.webjars/{name}/pom.properties"),
            format!("META-INF/maven/org.webjars.npm/{name}/pom.properties"),
        ];
        let (descriptor_path, descriptor) = candidates
            .iter()
            .find_map(|p| loader.load(p).map(|bytes| (p.clone(), bytes)))
            .ok_or_else(|| AssetError::NotFound {
                location: candidates.join(", "),
            })?;
        let version =
            property_value(&descriptor, "version").ok_or_else(|| AssetError::NotFound {
                location: format!("{descriptor_path}#version"),
            })?;
        let base = format!("META-INF/resources/webjars/{name}/{version}");
        info!(webjar = name, version = %version, base = %base, "webjar asset source created");
        Ok(AssetSource::Packaged { loader, base })
    }

    /// Resolve a URL path to an asset. `None` when nothing is there or the
    /// path escapes the source. Read-only and repeatable: resolving the same
    /// path twice yields the same asset.
    #[must_use]
    pub fn resolve(&self, path: &str) -> Option<Asset> {
        match self {
            AssetSource::Packaged { loader, base } => {
                let full = join_within_base(base, path)?;
                let bytes = loader.load(&full)?;
                debug!(path = %path, resource = %full, "packaged asset resolved");
                Some(Asset {
                    path: path.to_string(),
                    length: bytes.len() as u64,
                    modified: None,
                    content_type: content_type_for(path),
                    data: AssetData::Bytes(bytes),
                })
            }
            AssetSource::Directory { root } => {
                let file = map_path(root, path)?;
                let meta = fs::metadata(&file).ok()?;
                if !meta.is_file() {
                    return None;
                }
                debug!(path = %path, file = %file.display(), "disk asset resolved");
                Some(Asset {
                    path: path.to_string(),
                    length: meta.len(),
                    modified: meta.modified().ok(),
                    content_type: content_type_for(path),
                    data: AssetData::File(file),
                })
            }
            AssetSource::SingleFile { name, file } => {
                if path.trim_matches('/') != name {
                    return None;
                }
                let meta = fs::metadata(file).ok()?;
                Some(Asset {
                    path: path.to_string(),
                    length: meta.len(),
                    modified: meta.modified().ok(),
                    content_type: content_type_for(name),
                    data: AssetData::File(file.clone()),
                })
            }
        }
    }
}

impl std::fmt::Debug for AssetSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssetSource::Packaged { base, .. } => {
                f.debug_struct("Packaged").field("base", base).finish()
            }
            AssetSource::Directory { root } => {
                f.debug_struct("Directory").field("root", root).finish()
            }
            AssetSource::SingleFile { name, file } => f
                .debug_struct("SingleFile")
                .field("name", name)
                .field("file", file)
                .finish(),
        }
    }
}

/// Join a request path onto a base prefix, resolving `.` and `..` lexically.
/// `None` when the path would climb above the base.
fn join_within_base(base: &str, path: &str) -> Option<String> {
    let mut stack: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                stack.pop()?;
            }
            other => stack.push(other),
        }
    }
    if base.is_empty() {
        Some(stack.join("/"))
    } else if stack.is_empty() {
        Some(base.to_string())
    } else {
        Some(format!("{base}/{}", stack.join("/")))
    }
}

/// Map a URL path into a directory root, admitting only normal components.
/// Anything resembling traversal (`..`, root, prefixes) is rejected.
fn map_path(root: &Path, url_path: &str) -> Option<PathBuf> {
    let mut mapped = root.to_path_buf();
    for comp in Path::new(url_path.trim_start_matches('/')).components() {
        match comp {
            Component::Normal(s) => mapped.push(s),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(mapped)
}

/// Read one `key=value` property from a Java-style properties file.
fn property_value(bytes: &[u8], key: &str) -> Option<String> {
    let text = String::from_utf8_lossy(bytes);
    text.lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#') && !line.starts_with('!'))
        .find_map(|line| {
            let (k, v) = line.split_once('=')?;
            if k.trim() == key {
                Some(v.trim().to_string())
            } else {
                None
            }
        })
}

fn content_type_for(path: &str) -> &'static str {
    let ext = path
        .rsplit_once('.')
        .map(|(_, e)| e)
        .unwrap_or("")
        .to_ascii_lowercase();
    match ext.as_str() {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" | "mjs" => "application/javascript",
        "json" => "application/json",
        "txt" => "text/plain",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "ico" => "image/x-icon",
        "woff2" => "font/woff2",
        "wasm" => "application/wasm",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}
