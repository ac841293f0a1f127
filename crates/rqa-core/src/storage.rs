//! Read/write document store snapshots from disk.

use crate::document::{Document, Metadata};
use crate::store::InMemoryStore;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

const RQA_DIR: &str = ".rqa";
const STORE_FILE: &str = "store.json";
const CURRENT_VERSION: &str = "1";

/// On-disk form: collections of `{content, metadata}` records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: String,
    pub collections: BTreeMap<String, Vec<SnapshotRecord>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Snapshot {
    pub fn from_store(store: &InMemoryStore) -> Self {
        let collections = store
            .collections()
            .iter()
            .map(|(name, docs)| {
                let records = docs
                    .iter()
                    .map(|d| SnapshotRecord {
                        content: d.content.clone(),
                        metadata: d.metadata.clone(),
                    })
                    .collect();
                (name.clone(), records)
            })
            .collect();
        Self {
            version: CURRENT_VERSION.to_string(),
            collections,
        }
    }

    pub fn into_store(self) -> InMemoryStore {
        let mut store = InMemoryStore::new();
        for (name, records) in self.collections {
            for record in records {
                store.insert(Document {
                    source_collection: name.clone(),
                    content: record.content,
                    metadata: record.metadata,
                });
            }
        }
        store
    }
}

/// Get the path to the rqa directory for a given project root.
pub fn rqa_dir(project_root: &Path) -> PathBuf {
    project_root.join(RQA_DIR)
}

/// Get the path to the store snapshot for a given project root.
pub fn store_file(project_root: &Path) -> PathBuf {
    rqa_dir(project_root).join(STORE_FILE)
}

/// Check if a snapshot exists for the given project root.
pub fn store_exists(project_root: &Path) -> bool {
    store_file(project_root).exists()
}

/// Load the project's snapshot.
pub fn load(project_root: &Path) -> Result<InMemoryStore> {
    load_file(&store_file(project_root))
}

/// Load a snapshot from an explicit path.
pub fn load_file(path: &Path) -> Result<InMemoryStore> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("failed to read store snapshot from {}", path.display()))?;
    let snapshot: Snapshot =
        serde_json::from_str(&json).context("failed to deserialize store snapshot")?;
    if snapshot.version != CURRENT_VERSION {
        anyhow::bail!(
            "store snapshot version mismatch: expected {}, found {}",
            CURRENT_VERSION,
            snapshot.version
        );
    }
    let store = snapshot.into_store();
    tracing::debug!("loaded {} records from {}", store.len(), path.display());
    Ok(store)
}

/// Save a snapshot, creating the .rqa directory if needed.
pub fn save(project_root: &Path, store: &InMemoryStore) -> Result<()> {
    let dir = rqa_dir(project_root);
    fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create rqa directory {}", dir.display()))?;

    let path = store_file(project_root);
    let json = serde_json::to_string_pretty(&Snapshot::from_store(store))
        .context("failed to serialize store snapshot")?;
    fs::write(&path, json)
        .with_context(|| format!("failed to write store snapshot to {}", path.display()))?;

    Ok(())
}
