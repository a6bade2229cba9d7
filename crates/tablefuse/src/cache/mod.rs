//! On-disk cache of prior table outcomes.
//!
//! Entries are msgpack files named by a 16-hex-digit `ahash` of the table's
//! geometry, source payloads (image bytes included), the outcome-relevant
//! configuration sections and the clients the pipeline runs with. Writes go to a temp file first and are renamed into
//! place, so concurrent readers never see a partial entry.

use crate::collect::TableSources;
use crate::core::config::PipelineConfig;
use crate::grid::GeometryRecord;
use crate::plugins::Plugin;
use crate::types::TableOutcome;
use crate::{Result, TableFuseError};
use ahash::AHasher;
use serde::Serialize;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

const CACHE_EXTENSION: &str = "msgpack";

/// Hash arbitrary bytes to a 16-hex-digit key.
pub fn compute_hash(data: &[u8]) -> String {
    let mut hasher = AHasher::default();
    data.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Name and version of a plugin involved in producing an outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginIdentity {
    pub name: String,
    pub version: String,
}

impl PluginIdentity {
    pub fn of<P: Plugin + ?Sized>(plugin: &P) -> Self {
        Self {
            name: plugin.name().to_string(),
            version: plugin.version(),
        }
    }
}

/// Clients configured on a pipeline (None = not configured).
///
/// Adding, removing or upgrading a client changes every cache key, so an
/// outcome produced without repair is never served to a pipeline that repairs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClientFingerprint {
    pub vision: Option<PluginIdentity>,
    pub repair: Option<PluginIdentity>,
    pub cell_ocr: Option<PluginIdentity>,
}

#[derive(Serialize)]
struct KeyMaterial<'a> {
    records: &'a [GeometryRecord],
    sources: &'a TableSources,
    collection: &'a crate::core::config::CollectionConfig,
    validation: &'a crate::core::config::ValidationConfig,
    repair: &'a crate::core::config::RepairConfig,
    header: &'a crate::core::config::HeaderConfig,
    pivot: &'a crate::core::config::PivotConfig,
    preprocessing: &'a crate::core::config::PreprocessingConfig,
    clients: &'a ClientFingerprint,
}

/// Cache key of one table. Concurrency and cache settings do not affect the key.
pub fn cache_key(
    records: &[GeometryRecord],
    sources: &TableSources,
    config: &PipelineConfig,
    clients: &ClientFingerprint,
) -> Result<String> {
    let material = KeyMaterial {
        records,
        sources,
        clients,
        collection: &config.collection,
        validation: &config.validation,
        repair: &config.repair,
        header: &config.header,
        pivot: &config.pivot,
        preprocessing: &config.preprocessing,
    };
    let bytes = rmp_serde::to_vec(&material)?;
    Ok(compute_hash(&bytes))
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    pub total_files: usize,
    pub total_size_mb: f64,
}

/// Directory-backed store of [`TableOutcome`]s.
pub struct ResultCache {
    cache_dir: PathBuf,
}

impl ResultCache {
    /// Open (creating if needed) the cache at `cache_dir`, or at
    /// `.tablefuse/cache` under the working directory.
    pub fn new(cache_dir: Option<PathBuf>) -> Result<Self> {
        let cache_dir = cache_dir.unwrap_or_else(|| {
            let mut path = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
            path.push(".tablefuse");
            path.push("cache");
            path
        });

        fs::create_dir_all(&cache_dir)
            .map_err(|e| TableFuseError::cache_with_source("Failed to create cache directory", e))?;

        Ok(Self { cache_dir })
    }

    pub fn dir(&self) -> &Path {
        &self.cache_dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.{}", key, CACHE_EXTENSION))
    }

    pub fn get(&self, key: &str) -> Result<Option<TableOutcome>> {
        let path = self.entry_path(key);
        if !path.exists() {
            return Ok(None);
        }

        let bytes = fs::read(&path).map_err(|e| TableFuseError::cache_with_source("Failed to read cache file", e))?;
        let outcome = rmp_serde::from_slice(&bytes)
            .map_err(|e| TableFuseError::cache_with_source("Failed to deserialize cache entry", e))?;

        tracing::debug!("Cache hit for key {}", key);
        Ok(Some(outcome))
    }

    pub fn set(&self, key: &str, outcome: &TableOutcome) -> Result<()> {
        let serialized = rmp_serde::to_vec_named(outcome)
            .map_err(|e| TableFuseError::cache_with_source("Failed to serialize cache entry", e))?;

        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let temp_name = format!(
            "{}.tmp.{}.{:?}.{}",
            key,
            std::process::id(),
            std::thread::current().id(),
            timestamp
        );
        let temp_path = self.cache_dir.join(temp_name);

        fs::write(&temp_path, &serialized)
            .map_err(|e| TableFuseError::cache_with_source("Failed to write temp cache file", e))?;

        fs::rename(&temp_path, self.entry_path(key)).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            TableFuseError::cache_with_source("Failed to rename cache file", e)
        })?;

        Ok(())
    }

    fn entries(&self) -> Result<Vec<fs::DirEntry>> {
        if !self.cache_dir.exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&self.cache_dir)
            .map_err(|e| TableFuseError::cache_with_source("Failed to read cache directory", e))?;

        Ok(entries
            .flatten()
            .filter(|entry| entry.path().extension().is_some_and(|ext| ext == CACHE_EXTENSION))
            .collect())
    }

    /// Remove every cache entry. Returns the number of removed files.
    pub fn clear(&self) -> Result<usize> {
        let mut removed = 0;
        for entry in self.entries()? {
            if fs::remove_file(entry.path()).is_ok() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub fn stats(&self) -> Result<CacheStats> {
        let entries = self.entries()?;
        let total_size_bytes: u64 = entries.iter().filter_map(|e| e.metadata().ok()).map(|m| m.len()).sum();

        Ok(CacheStats {
            total_files: entries.len(),
            total_size_mb: total_size_bytes as f64 / 1024.0 / 1024.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::CellGeometry;
    use crate::types::{BBox, SkippedTable, UnrepairableTable};

    fn records() -> Vec<GeometryRecord> {
        vec![GeometryRecord {
            panel_id: "p0".to_string(),
            canonical_id: "t1".to_string(),
            page_index: 0,
            cell_map: vec![CellGeometry {
                row: 0,
                col: 0,
                bbox: BBox::new(0.0, 0.0, 10.0, 10.0),
                rowspan: None,
                colspan: None,
            }],
        }]
    }

    #[test]
    fn test_get_set_round_trip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::new(Some(temp_dir.path().to_path_buf())).unwrap();
        let outcome = TableOutcome::Unrepairable(UnrepairableTable {
            ref_id: "t1".to_string(),
            reason: "column count varies per row".to_string(),
            validation: Default::default(),
        });

        cache.set("abc123", &outcome).unwrap();
        assert_eq!(cache.get("abc123").unwrap(), Some(outcome));
    }

    #[test]
    fn test_miss() {
        let temp_dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::new(Some(temp_dir.path().to_path_buf())).unwrap();
        assert!(cache.get("nonexistent").unwrap().is_none());
    }

    #[test]
    fn test_clear_and_stats() {
        let temp_dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::new(Some(temp_dir.path().to_path_buf())).unwrap();
        let outcome = TableOutcome::Skipped(SkippedTable {
            ref_id: "t".to_string(),
            reason: "no candidates".to_string(),
        });
        cache.set("a", &outcome).unwrap();
        cache.set("b", &outcome).unwrap();

        let stats = cache.stats().unwrap();
        assert_eq!(stats.total_files, 2);
        assert!(stats.total_size_mb > 0.0);

        assert_eq!(cache.clear().unwrap(), 2);
        assert!(cache.get("a").unwrap().is_none());
        assert_eq!(cache.stats().unwrap().total_files, 0);
    }

    #[test]
    fn test_corrupt_entry_is_cache_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::new(Some(temp_dir.path().to_path_buf())).unwrap();
        fs::write(temp_dir.path().join("bad.msgpack"), b"\xc1not msgpack").unwrap();

        let err = cache.get("bad").unwrap_err();
        assert!(matches!(err, TableFuseError::Cache { .. }));
    }

    #[test]
    fn test_key_depends_on_inputs() {
        let config = PipelineConfig::default();
        let sources = TableSources::default();
        let clients = ClientFingerprint::default();
        let base = cache_key(&records(), &sources, &config, &clients).unwrap();
        assert_eq!(base.len(), 16);
        assert_eq!(base, cache_key(&records(), &sources, &config, &clients).unwrap());

        let with_image = TableSources {
            image: Some(vec![1, 2, 3]),
            ..Default::default()
        };
        assert_ne!(base, cache_key(&records(), &with_image, &config, &clients).unwrap());

        let mut stricter = config.clone();
        stricter.validation.empty_ratio_warning = 0.1;
        assert_ne!(base, cache_key(&records(), &sources, &stricter, &clients).unwrap());

        let mut more_workers = config.clone();
        more_workers.max_concurrent_tables = Some(64);
        assert_eq!(base, cache_key(&records(), &sources, &more_workers, &clients).unwrap());
    }

    struct NamedPlugin(&'static str, &'static str);

    impl Plugin for NamedPlugin {
        fn name(&self) -> &str {
            self.0
        }

        fn version(&self) -> String {
            self.1.to_string()
        }
    }

    #[test]
    fn test_key_depends_on_configured_clients() {
        let config = PipelineConfig::default();
        let sources = TableSources::default();
        let without = cache_key(&records(), &sources, &config, &ClientFingerprint::default()).unwrap();

        let with_repair = ClientFingerprint {
            repair: Some(PluginIdentity::of(&NamedPlugin("gpt-repair", "1.0.0"))),
            ..Default::default()
        };
        let repair_key = cache_key(&records(), &sources, &config, &with_repair).unwrap();
        assert_ne!(without, repair_key);

        let upgraded = ClientFingerprint {
            repair: Some(PluginIdentity::of(&NamedPlugin("gpt-repair", "1.1.0"))),
            ..Default::default()
        };
        assert_ne!(repair_key, cache_key(&records(), &sources, &config, &upgraded).unwrap());

        let as_vision = ClientFingerprint {
            vision: with_repair.repair.clone(),
            ..Default::default()
        };
        assert_ne!(repair_key, cache_key(&records(), &sources, &config, &as_vision).unwrap());
    }
}
