// ABOUTME: In-memory media reference store mapping opaque media:// refs to local files.
// ABOUTME: References are grouped into lifetime scopes and evicted by release_all or a TTL cleaner.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Prefix of every media reference handed out by the store.
pub const MEDIA_REF_PREFIX: &str = "media://";

/// Metadata attached to a stored media file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaMeta {
    pub filename: String,
    /// Where the file came from (adapter name, "download", ...).
    pub source: String,
    pub content_type: String,
}

impl MediaMeta {
    pub fn new(filename: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            source: source.into(),
            content_type: String::new(),
        }
    }
}

/// Media store failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MediaError {
    #[error("unknown media reference: {0}")]
    NotFound(String),
}

struct Entry {
    path: PathBuf,
    meta: MediaMeta,
    scope: String,
    created_at: Instant,
}

/// In-memory map from opaque `media://<uuid>` references to local file paths.
///
/// Every reference belongs to a scope (one scope per inbound event); releasing
/// a scope removes all of its references and deletes the backing files.
/// An optional background cleaner evicts references older than a TTL, which
/// bounds disk usage when the agent never releases a scope.
pub struct MediaStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MediaStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Store a local file under a fresh opaque reference.
    ///
    /// When `meta.content_type` is empty it is inferred from the file name.
    pub fn store(&self, path: impl Into<PathBuf>, mut meta: MediaMeta, scope: &str) -> String {
        let path = path.into();
        if meta.content_type.is_empty() {
            let name = if meta.filename.is_empty() {
                path.to_string_lossy().to_string()
            } else {
                meta.filename.clone()
            };
            meta.content_type = mime_guess::from_path(&name).first_or_octet_stream().to_string();
        }

        let media_ref = format!("{}{}", MEDIA_REF_PREFIX, Uuid::new_v4());
        let entry = Entry {
            path,
            meta,
            scope: scope.to_string(),
            created_at: Instant::now(),
        };
        self.entries
            .write()
            .expect("media store lock poisoned")
            .insert(media_ref.clone(), entry);
        media_ref
    }

    /// Resolve a reference to its local file path.
    pub fn resolve(&self, media_ref: &str) -> Result<PathBuf, MediaError> {
        self.entries
            .read()
            .expect("media store lock poisoned")
            .get(media_ref)
            .map(|e| e.path.clone())
            .ok_or_else(|| MediaError::NotFound(media_ref.to_string()))
    }

    /// Resolve a reference to its local file path and metadata.
    pub fn resolve_with_meta(&self, media_ref: &str) -> Result<(PathBuf, MediaMeta), MediaError> {
        self.entries
            .read()
            .expect("media store lock poisoned")
            .get(media_ref)
            .map(|e| (e.path.clone(), e.meta.clone()))
            .ok_or_else(|| MediaError::NotFound(media_ref.to_string()))
    }

    /// Number of live references, across all scopes.
    pub fn len(&self) -> usize {
        self.entries.read().expect("media store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Release every reference in a scope and delete the backing files.
    ///
    /// Two phases: matching entries are collected and removed under the write
    /// lock, then the files are deleted outside it. File deletion is
    /// best-effort per file. Returns the number of references released.
    pub fn release_all(&self, scope: &str) -> usize {
        let removed = self.remove_matching(|e| e.scope == scope);
        delete_files(&removed);
        removed.len()
    }

    /// Evict references older than `ttl`. Used by the background cleaner.
    pub fn release_older_than(&self, ttl: Duration) -> usize {
        let now = Instant::now();
        let removed = self.remove_matching(|e| now.duration_since(e.created_at) >= ttl);
        if !removed.is_empty() {
            tracing::debug!(count = removed.len(), "evicted expired media references");
        }
        delete_files(&removed);
        removed.len()
    }

    fn remove_matching(&self, matches: impl Fn(&Entry) -> bool) -> Vec<PathBuf> {
        let mut entries = self.entries.write().expect("media store lock poisoned");
        let refs: Vec<String> = entries
            .iter()
            .filter(|(_, e)| matches(e))
            .map(|(r, _)| r.clone())
            .collect();
        refs.iter()
            .filter_map(|r| entries.remove(r))
            .map(|e| e.path)
            .collect()
    }

    /// Spawn the background TTL cleaner. Runs until `cancel` fires.
    pub fn spawn_cleaner(
        self: &Arc<Self>,
        ttl: Duration,
        interval: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        store.release_older_than(ttl);
                    }
                    _ = cancel.cancelled() => break,
                }
            }
        })
    }
}

impl Default for MediaStore {
    fn default() -> Self {
        Self::new()
    }
}

fn delete_files(paths: &[PathBuf]) {
    for path in paths {
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), error = %e, "failed to delete released media file");
            }
        }
    }
}

/// True when a string looks like a store reference rather than a raw path.
pub fn is_media_ref(s: &str) -> bool {
    s.starts_with(MEDIA_REF_PREFIX)
}
