//! Durable storage behind the registry

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::model::ModelArtifact;
use crate::registry::{ModelId, ModelMetadata, RegisteredModel};
use crate::{ModelKind, Result};

/// One registry change: at most one new entry, the ids leaving, and the
/// resulting ordered index with its best pointer
#[derive(Debug, Clone, Copy)]
pub struct Commit<'a> {
    pub kind: ModelKind,
    pub added: Option<&'a RegisteredModel>,
    pub removed: &'a [ModelId],
    pub entries: &'a [ModelMetadata],
    pub best: Option<ModelId>,
}

/// Load-at-open, persist-on-change storage for one or more registries
pub trait RegistryStore: Send + Sync {
    /// Location the artifact of `id` is (or will be) stored at
    fn artifact_ref(&self, kind: ModelKind, id: ModelId) -> String;

    /// All stored entries of `kind`, in insertion order
    fn load(&self, kind: ModelKind) -> Result<Vec<RegisteredModel>>;

    /// Apply a change entirely or not at all
    fn commit(&self, commit: &Commit<'_>) -> Result<()>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryIndex {
    best_model_id: Option<ModelId>,
    models: Vec<ModelMetadata>,
}

/// Directory of JSON files: `registry_<kind>.json` plus `artifacts/<kind>_<id>.json`
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join("artifacts"))?;
        Ok(JsonFileStore { root })
    }

    fn index_path(&self, kind: ModelKind) -> PathBuf {
        self.root.join(format!("registry_{}.json", kind))
    }

    fn artifact_path(&self, kind: ModelKind, id: ModelId) -> PathBuf {
        self.root
            .join("artifacts")
            .join(format!("{}_{}.json", kind, id))
    }

    fn read_index(&self, kind: ModelKind) -> Result<RegistryIndex> {
        let path = self.index_path(kind);
        if !path.exists() {
            return Ok(RegistryIndex::default());
        }
        let content = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Write to a sibling temp file and rename over the target
fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

impl RegistryStore for JsonFileStore {
    fn artifact_ref(&self, kind: ModelKind, id: ModelId) -> String {
        self.artifact_path(kind, id).display().to_string()
    }

    fn load(&self, kind: ModelKind) -> Result<Vec<RegisteredModel>> {
        let index = self.read_index(kind)?;
        let mut entries = Vec::with_capacity(index.models.len());
        for metadata in index.models {
            let path = self.artifact_path(kind, metadata.model_id);
            if !path.exists() {
                log::warn!(
                    "Artifact for {} model {} missing at {}, skipping",
                    kind,
                    metadata.model_id,
                    path.display()
                );
                continue;
            }
            let artifact: ModelArtifact = serde_json::from_str(&fs::read_to_string(&path)?)?;
            entries.push(RegisteredModel { metadata, artifact });
        }
        Ok(entries)
    }

    /// The index file is the commit point: artifacts are written before it
    /// and unlinked after it
    fn commit(&self, commit: &Commit<'_>) -> Result<()> {
        let written = match commit.added {
            Some(entry) => {
                let path = self.artifact_path(commit.kind, entry.metadata.model_id);
                write_atomic(&path, &serde_json::to_string(&entry.artifact)?)?;
                Some(path)
            }
            None => None,
        };

        let index = RegistryIndex {
            best_model_id: commit.best,
            models: commit.entries.to_vec(),
        };
        let saved = serde_json::to_string_pretty(&index)
            .map_err(Into::into)
            .and_then(|content| write_atomic(&self.index_path(commit.kind), &content));
        if let Err(e) = saved {
            if let Some(path) = written {
                if let Err(cleanup) = fs::remove_file(&path) {
                    log::warn!("Could not remove uncommitted artifact {}: {}", path.display(), cleanup);
                }
            }
            return Err(e);
        }

        for id in commit.removed {
            let path = self.artifact_path(commit.kind, *id);
            if path.exists() {
                // Unlisted artifacts are never loaded
                if let Err(e) = fs::remove_file(&path) {
                    log::warn!("Could not remove artifact {}: {}", path.display(), e);
                }
            }
        }
        Ok(())
    }
}
