// =============================================================================
// File-backed Decision Store — One JSON document per key, atomic writes
// =============================================================================
//
// Each (instrument, horizon) key maps to its own JSON file under the store
// directory.  Writes go to a `.tmp` sibling first and are renamed into
// place, so a crash mid-write leaves the previously committed document
// intact.  A write-through in-memory cache serves reads; the directory is
// only scanned once, at open.
//
// Documents that fail to parse at open (e.g. a partial write from a crashed
// process that never reached the rename) are skipped with a warning rather
// than failing the whole store.
// =============================================================================

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parking_lot::RwLock;
use tracing::{info, warn};

use crate::decision::Decision;
use crate::types::DecisionKey;

use super::{archive_replaced, DecisionStore};

pub struct FileDecisionStore {
    dir: PathBuf,
    cache: RwLock<HashMap<DecisionKey, Decision>>,
    history_cap: usize,
}

impl FileDecisionStore {
    /// Open (or create) a store rooted at `dir`, loading every readable
    /// decision document into the cache.
    pub fn open(dir: impl AsRef<Path>, history_cap: usize) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create store directory {}", dir.display()))?;

        let mut cache = HashMap::new();
        let entries = std::fs::read_dir(&dir)
            .with_context(|| format!("failed to read store directory {}", dir.display()))?;

        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read_document(&path) {
                Ok(decision) => {
                    cache.insert(decision.key(), decision);
                }
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "skipping unreadable decision document"
                    );
                }
            }
        }

        info!(
            dir = %dir.display(),
            decisions = cache.len(),
            "file decision store opened"
        );

        Ok(Self {
            dir,
            cache: RwLock::new(cache),
            history_cap,
        })
    }

    fn read_document(path: &Path) -> Result<Decision> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let decision: Decision = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(decision)
    }

    /// File name for a key.  Instrument ids are sanitized so exotic symbols
    /// cannot escape the store directory.
    fn path_for(&self, key: &DecisionKey) -> PathBuf {
        let sanitized: String = key
            .instrument_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir
            .join(format!("{}__{}.json", sanitized, key.horizon.as_str()))
    }

    /// Write the document atomically: tmp sibling first, then rename.
    fn write_document(&self, key: &DecisionKey, decision: &Decision) -> Result<()> {
        let path = self.path_for(key);
        let content = serde_json::to_string_pretty(decision)
            .with_context(|| format!("failed to serialise decision for {}", key))?;

        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp document {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &path)
            .with_context(|| format!("failed to rename tmp document to {}", path.display()))?;
        Ok(())
    }
}

impl DecisionStore for FileDecisionStore {
    fn get(&self, key: &DecisionKey) -> Result<Option<Decision>> {
        Ok(self.cache.read().get(key).cloned())
    }

    fn put(&self, mut decision: Decision) -> Result<()> {
        let key = decision.key();
        let mut cache = self.cache.write();

        if let Some(previous) = cache.get(&key) {
            archive_replaced(&mut decision, previous, self.history_cap);
        }

        // Durable write first: if it fails, the cache still holds the last
        // committed value and the caller sees the error.
        self.write_document(&key, &decision)?;
        cache.insert(key, decision);
        Ok(())
    }

    fn all_active(&self) -> Result<Vec<Decision>> {
        Ok(self.cache.read().values().cloned().collect())
    }
}

// =============================================================================
// Tests
// =============================================================================
