//! Persistent prompt-cache store.
//!
//! Maps `(model, fingerprint, precision)` to a file under a per-model
//! directory:
//!
//! ```text
//! {cache_root}/
//! └── mlx-community/
//!     └── Qwen3-4B-Instruct/
//!         ├── prompt.<64 hex>.8bit.safetensors
//!         └── prompt.<64 hex>.bf16.safetensors
//! ```
//!
//! A file that exists but cannot be decoded is deleted and reported as a
//! miss, so the caller simply recomputes. Write failures are returned.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::{FilechatError, Result};
use crate::kv::{CacheEntry, CachePrecision};
use crate::utils::sanitize::model_dir;

use super::container;
use super::fingerprint::Fingerprint;

const FILE_PREFIX: &str = "prompt.";
const FILE_EXTENSION: &str = "safetensors";

/// Full lookup key of a persisted prompt cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub model_id: String,
    pub fingerprint: Fingerprint,
    pub precision: CachePrecision,
}

/// One cache file found on disk.
#[derive(Debug, Clone)]
pub struct CachedPrompt {
    pub key: CacheKey,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// Prompt caches for a single model.
#[derive(Debug, Clone)]
pub struct PromptCacheStore {
    model_id: String,
    dir: PathBuf,
}

impl PromptCacheStore {
    /// Create a store for `model_id` rooted at `cache_root`.
    ///
    /// The model directory is created lazily on first write.
    pub fn new(cache_root: impl AsRef<Path>, model_id: &str) -> Self {
        Self {
            model_id: model_id.to_string(),
            dir: cache_root.as_ref().join(model_dir(model_id)),
        }
    }

    /// Default cache root: `<user cache dir>/filechat` (e.g. `~/.cache/filechat`).
    pub fn default_root() -> PathBuf {
        dirs::cache_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join(".cache")))
            .unwrap_or_else(|| PathBuf::from("."))
            .join("filechat")
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Directory holding this model's cache files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn key(&self, fingerprint: Fingerprint, precision: CachePrecision) -> CacheKey {
        CacheKey {
            model_id: self.model_id.clone(),
            fingerprint,
            precision,
        }
    }

    /// Deterministic location of the cache file for `(fingerprint, precision)`.
    pub fn cache_path(&self, fingerprint: &Fingerprint, precision: CachePrecision) -> PathBuf {
        self.dir.join(format!(
            "{FILE_PREFIX}{}.{}.{FILE_EXTENSION}",
            fingerprint.to_hex(),
            precision.tag()
        ))
    }

    /// Load a cached entry. Returns `None` on a miss or a corrupt file
    /// (which is deleted).
    pub async fn load(
        &self,
        fingerprint: &Fingerprint,
        precision: CachePrecision,
    ) -> Option<CacheEntry> {
        let path = self.cache_path(fingerprint, precision);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(fingerprint = %fingerprint.short(), %precision, "Prompt cache miss");
                return None;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read prompt cache");
                return None;
            }
        };

        let size = bytes.len();
        let decoded = tokio::task::spawn_blocking(move || container::decode(&bytes))
            .await
            .map_err(|e| FilechatError::CacheFormat(format!("decode task failed: {e}")))
            .and_then(|inner| inner);

        match decoded {
            Ok(entry) => {
                info!(
                    path = %path.display(),
                    layers = entry.num_layers(),
                    bytes = size,
                    "Loaded prompt cache"
                );
                Some(entry)
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Prompt cache file is corrupt, removing"
                );
                if let Err(rm) = fs::remove_file(&path).await {
                    warn!(path = %path.display(), error = %rm, "Failed to remove corrupt prompt cache");
                }
                None
            }
        }
    }

    /// Convert `entry` to `precision` layer by layer and write it, replacing
    /// any existing file. Returns the written path.
    pub async fn persist(
        &self,
        entry: &CacheEntry,
        fingerprint: &Fingerprint,
        precision: CachePrecision,
    ) -> Result<PathBuf> {
        let path = self.cache_path(fingerprint, precision);
        fs::create_dir_all(&self.dir).await?;

        let entry = entry.clone();
        let bytes = tokio::task::spawn_blocking(move || {
            container::encode(&precision.convert(&entry))
        })
        .await
        .map_err(|e| FilechatError::CacheFormat(format!("encode task failed: {e}")))??;

        // Write next to the target and rename so readers never see a partial file.
        let tmp = path.with_extension(format!("{FILE_EXTENSION}.tmp"));
        if let Err(e) = fs::write(&tmp, &bytes).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        info!(
            path = %path.display(),
            bytes = bytes.len(),
            %precision,
            "Persisted prompt cache"
        );
        Ok(path)
    }

    /// Delete the cache file for `(fingerprint, precision)`. Returns whether
    /// a file was removed.
    pub async fn remove(
        &self,
        fingerprint: &Fingerprint,
        precision: CachePrecision,
    ) -> Result<bool> {
        match fs::remove_file(self.cache_path(fingerprint, precision)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// List cache files for this model, sorted by file name.
    pub fn list(&self) -> Result<Vec<CachedPrompt>> {
        let read_dir = match std::fs::read_dir(&self.dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut found = Vec::new();
        for dir_entry in read_dir {
            let dir_entry = dir_entry?;
            let name = dir_entry.file_name();
            let Some((fingerprint, precision)) = name.to_str().and_then(parse_file_name) else {
                continue;
            };
            let meta = dir_entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            found.push(CachedPrompt {
                key: self.key(fingerprint, precision),
                path: dir_entry.path(),
                size_bytes: meta.len(),
                modified: meta.modified().ok().map(DateTime::<Utc>::from),
            });
        }
        found.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(found)
    }

    /// Delete every cache file for this model. Returns the number removed.
    pub fn clear(&self) -> Result<usize> {
        let entries = self.list()?;
        for entry in &entries {
            std::fs::remove_file(&entry.path)?;
        }
        Ok(entries.len())
    }
}

/// Parse `prompt.<hex>.<tag>.safetensors`.
fn parse_file_name(name: &str) -> Option<(Fingerprint, CachePrecision)> {
    let stem = name
        .strip_prefix(FILE_PREFIX)?
        .strip_suffix(FILE_EXTENSION)?
        .strip_suffix('.')?;
    let (hex, tag) = stem.split_once('.')?;
    let precision = match tag {
        "8bit" => CachePrecision::ReducedBit,
        "bf16" => CachePrecision::HalfPrecision,
        _ => return None,
    };
    Some((Fingerprint::from_hex(hex).ok()?, precision))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{LayerCache, LayerKind, Tensor};
    use tempfile::TempDir;

    fn sample_entry() -> CacheEntry {
        let values: Vec<f32> = (0..5 * 128).map(|i| ((i * 3) % 17) as f32 * 0.5).collect();
        let t = Tensor::from_f32(5, 128, &values).unwrap();
        let mut dense = LayerCache::dense(128);
        dense.append(&t, &t).unwrap();
        let mut ring = LayerCache::chunked(128, 4);
        ring.append(&t, &t).unwrap();
        CacheEntry::new(vec![dense.clone(), ring, dense.to_quantized(64, 4)])
    }

    fn store(tmp: &TempDir) -> PromptCacheStore {
        PromptCacheStore::new(tmp.path(), "mlx-community/test-model")
    }

    #[test]
    fn test_cache_path_layout() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let fp = Fingerprint::of("context");
        let path = store.cache_path(&fp, CachePrecision::ReducedBit);
        assert_eq!(
            path,
            tmp.path()
                .join("mlx-community")
                .join("test-model")
                .join(format!("prompt.{}.8bit.safetensors", fp.to_hex()))
        );
        assert_eq!(path, store.cache_path(&fp, CachePrecision::ReducedBit));
        assert_ne!(path, store.cache_path(&fp, CachePrecision::HalfPrecision));
        assert!(!store.dir().exists(), "cache_path must not touch the filesystem");
    }

    #[tokio::test]
    async fn test_load_missing_returns_none() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        assert!(store
            .load(&Fingerprint::of("nothing"), CachePrecision::ReducedBit)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_persist_then_load_applies_precision() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let fp = Fingerprint::of("docs");
        let entry = sample_entry();

        for precision in [CachePrecision::ReducedBit, CachePrecision::HalfPrecision] {
            let path = store.persist(&entry, &fp, precision).await.unwrap();
            assert!(path.exists());
            let loaded = store.load(&fp, precision).await.unwrap();
            assert_eq!(loaded, precision.convert(&entry));
            assert_eq!(precision.convert(&loaded), loaded);
        }

        let reduced = store.load(&fp, CachePrecision::ReducedBit).await.unwrap();
        assert!(reduced
            .layers()
            .iter()
            .all(|l| l.kind() == LayerKind::Quantized { group_size: 64, bits: 8 }));
    }

    #[tokio::test]
    async fn test_persist_overwrites() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let fp = Fingerprint::of("docs");
        store
            .persist(&sample_entry(), &fp, CachePrecision::HalfPrecision)
            .await
            .unwrap();
        store
            .persist(&CacheEntry::default(), &fp, CachePrecision::HalfPrecision)
            .await
            .unwrap();
        let loaded = store.load(&fp, CachePrecision::HalfPrecision).await.unwrap();
        assert!(loaded.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_deleted() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let fp = Fingerprint::of("docs");
        let path = store
            .persist(&sample_entry(), &fp, CachePrecision::ReducedBit)
            .await
            .unwrap();

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();

        assert!(store.load(&fp, CachePrecision::ReducedBit).await.is_none());
        assert!(!path.exists(), "corrupt cache file should be removed");
    }

    #[tokio::test]
    async fn test_garbage_file_is_deleted() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let fp = Fingerprint::of("docs");
        let path = store.cache_path(&fp, CachePrecision::HalfPrecision);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"garbage").unwrap();

        assert!(store.load(&fp, CachePrecision::HalfPrecision).await.is_none());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_persist_write_failure_is_surfaced() {
        let tmp = TempDir::new().unwrap();
        // A regular file where the model directory should be.
        let blocker = tmp.path().join("blocked");
        std::fs::write(&blocker, b"").unwrap();
        let store = PromptCacheStore::new(&blocker, "model");
        let err = store
            .persist(&sample_entry(), &Fingerprint::of("x"), CachePrecision::ReducedBit)
            .await
            .unwrap_err();
        assert!(matches!(err, FilechatError::Io(_)));
    }

    #[tokio::test]
    async fn test_persist_rename_failure_removes_tmp() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let fp = Fingerprint::of("x");
        let path = store.cache_path(&fp, CachePrecision::ReducedBit);
        // A non-empty directory at the target makes the rename fail.
        std::fs::create_dir_all(path.join("occupied")).unwrap();

        let err = store
            .persist(&sample_entry(), &fp, CachePrecision::ReducedBit)
            .await
            .unwrap_err();
        assert!(matches!(err, FilechatError::Io(_)));
        let leftovers: Vec<_> = std::fs::read_dir(store.dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_distinct_model_ids_do_not_share_files() {
        let tmp = TempDir::new().unwrap();
        let fp = Fingerprint::of("docs");
        let spaced = PromptCacheStore::new(tmp.path(), "org/model v2");
        spaced
            .persist(&sample_entry(), &fp, CachePrecision::ReducedBit)
            .await
            .unwrap();

        for other in ["org/model_v2", "org//model_v2"] {
            let store = PromptCacheStore::new(tmp.path(), other);
            assert_ne!(store.dir(), spaced.dir());
            assert!(store.load(&fp, CachePrecision::ReducedBit).await.is_none());
        }
        assert!(spaced.load(&fp, CachePrecision::ReducedBit).await.is_some());
    }

    #[tokio::test]
    async fn test_list_remove_clear() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        assert!(store.list().unwrap().is_empty());

        let a = Fingerprint::of("a");
        let b = Fingerprint::of("b");
        store
            .persist(&CacheEntry::default(), &a, CachePrecision::ReducedBit)
            .await
            .unwrap();
        store
            .persist(&CacheEntry::default(), &b, CachePrecision::HalfPrecision)
            .await
            .unwrap();
        std::fs::write(store.dir().join("notes.txt"), b"ignored").unwrap();

        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed
            .iter()
            .any(|p| p.key == store.key(a, CachePrecision::ReducedBit)));
        assert!(listed.iter().all(|p| p.size_bytes > 0));

        assert!(store.remove(&a, CachePrecision::ReducedBit).await.unwrap());
        assert!(!store.remove(&a, CachePrecision::ReducedBit).await.unwrap());
        assert_eq!(store.clear().unwrap(), 1);
        assert!(store.list().unwrap().is_empty());
        assert!(store.dir().join("notes.txt").exists());
    }

    #[test]
    fn test_parse_file_name() {
        let fp = Fingerprint::of("x");
        let name = format!("prompt.{}.bf16.safetensors", fp.to_hex());
        assert_eq!(
            parse_file_name(&name),
            Some((fp, CachePrecision::HalfPrecision))
        );
        assert_eq!(parse_file_name("prompt.abc.8bit.safetensors"), None);
        assert_eq!(
            parse_file_name(&format!("prompt.{}.fp32.safetensors", fp.to_hex())),
            None
        );
        assert_eq!(
            parse_file_name(&format!("prompt.{}.8bit.safetensors.tmp", fp.to_hex())),
            None
        );
    }
}
