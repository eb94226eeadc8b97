//! Dataset size cache.
//!
//! Counting a dataset's items means loading it, which is slow for large
//! benchmarks. Known counts are kept in a JSON object file
//! (`{"gsm8k": 1319, ...}`) so work entries can omit `items`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{PartitionError, PartitionResult};

#[derive(Debug, Clone, Default)]
pub struct SizeCache {
    path: Option<PathBuf>,
    sizes: BTreeMap<String, u64>,
}

impl SizeCache {
    /// In-memory cache with no backing file.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the cache file. A missing file yields an empty cache bound to
    /// `path`, so a later [`save`](Self::save) creates it.
    pub fn load(path: &Path) -> PartitionResult<Self> {
        let sizes = match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| PartitionError::SizeCache(format!("{}: {e}", path.display())))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(PartitionError::SizeCache(format!("{}: {e}", path.display())));
            }
        };
        debug!(path = %path.display(), entries = sizes.len(), "size cache loaded");
        Ok(Self {
            path: Some(path.to_path_buf()),
            sizes,
        })
    }

    pub fn get(&self, dataset: &str) -> Option<u64> {
        self.sizes.get(dataset).copied()
    }

    pub fn insert(&mut self, dataset: impl Into<String>, items: u64) {
        self.sizes.insert(dataset.into(), items);
    }

    pub fn len(&self) -> usize {
        self.sizes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sizes.is_empty()
    }

    /// Write the cache back to its file. No-op for in-memory caches.
    pub fn save(&self) -> PartitionResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let content = serde_json::to_string_pretty(&self.sizes)
            .map_err(|e| PartitionError::SizeCache(e.to_string()))?;
        std::fs::write(path, content)
            .map_err(|e| PartitionError::SizeCache(format!("{}: {e}", path.display())))?;
        Ok(())
    }
}
