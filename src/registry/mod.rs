//! Versioned model registry
//!
//! One registry per [`ModelKind`]. Readers take a cheap clone of the current
//! [`RegistrySnapshot`]; writers serialize on a mutex, persist through a
//! [`RegistryStore`], build a new snapshot and swap it in. The read lock is only
//! ever held for the pointer copy or swap, so training never blocks inference
//! and a reader can never observe metadata without its artifact.

pub mod storage;

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::model::ModelArtifact;
use crate::training::{EvaluationResult, Hyperparameters};
use crate::{FlashError, ModelKind, RegistryConfig, Result};

pub use storage::{Commit, JsonFileStore, RegistryStore};

/// Registry-unique model identifier, derived from creation time in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelId(pub u64);

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ModelId {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.parse::<u64>()
            .map(ModelId)
            .map_err(|_| format!("Invalid model id: {}", s))
    }
}

/// Where the training examples came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedOn {
    pub feature_source_id: String,
    pub example_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub model_id: ModelId,
    pub kind: ModelKind,
    pub artifact_ref: String,
    pub evaluation: EvaluationResult,
    pub trained_on: TrainedOn,
    pub hyperparameters: Hyperparameters,
    pub created_at: DateTime<Utc>,
}

impl ModelMetadata {
    /// Value of the metric that ranks this kind of model
    pub fn primary_metric(&self) -> Option<f64> {
        self.evaluation
            .metric(self.kind.primary_metric())
            .filter(|v| v.is_finite())
    }
}

/// A metadata and artifact pair; immutable once registered
#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredModel {
    pub metadata: ModelMetadata,
    pub artifact: ModelArtifact,
}

/// Consistent view of the registry at one point in time
#[derive(Debug, Default)]
pub struct RegistrySnapshot {
    /// Insertion (training) order
    pub entries: Vec<Arc<RegisteredModel>>,
    pub best_model_id: Option<ModelId>,
}

impl RegistrySnapshot {
    pub fn get(&self, id: ModelId) -> Option<&Arc<RegisteredModel>> {
        self.entries.iter().find(|e| e.metadata.model_id == id)
    }

    pub fn best(&self) -> Option<&Arc<RegisteredModel>> {
        self.best_model_id.and_then(|id| self.get(id))
    }
}

/// Thresholds for `clean`
#[derive(Debug, Clone, PartialEq)]
pub struct CleanPolicy {
    /// Entries evaluated on fewer examples are removed
    pub min_samples: usize,
    /// Accuracy at or above this, on fewer than `suspicious_sample_threshold`
    /// examples, indicates leakage or a degenerate evaluation
    pub suspicious_accuracy: f64,
    pub suspicious_sample_threshold: usize,
}

impl CleanPolicy {
    pub fn from_config(min_samples: usize, config: &RegistryConfig) -> Self {
        CleanPolicy {
            min_samples,
            suspicious_accuracy: config.suspicious_accuracy,
            suspicious_sample_threshold: config.suspicious_sample_threshold,
        }
    }

    pub fn is_problematic(&self, metadata: &ModelMetadata) -> bool {
        let samples = metadata.evaluation.sample_count;
        if samples < self.min_samples {
            return true;
        }
        let accuracy = metadata.evaluation.metric("accuracy").unwrap_or(0.0);
        accuracy >= self.suspicious_accuracy && samples < self.suspicious_sample_threshold
    }
}

struct WriterState {
    last_id: u64,
}

pub struct ModelRegistry {
    kind: ModelKind,
    min_samples: usize,
    store: Box<dyn RegistryStore>,
    current: RwLock<Arc<RegistrySnapshot>>,
    writer: Mutex<WriterState>,
}

impl ModelRegistry {
    /// Load every stored entry of `kind` and compute the best pointer
    pub fn open(kind: ModelKind, store: Box<dyn RegistryStore>, min_samples: usize) -> Result<Self> {
        let entries: Vec<Arc<RegisteredModel>> =
            store.load(kind)?.into_iter().map(Arc::new).collect();
        let last_id = entries
            .iter()
            .map(|e| e.metadata.model_id.0)
            .max()
            .unwrap_or(0);
        let best_model_id = select_best(kind, min_samples, &entries);
        log::debug!(
            "Loaded {} {} models, best: {:?}",
            entries.len(),
            kind,
            best_model_id
        );

        Ok(ModelRegistry {
            kind,
            min_samples,
            store,
            current: RwLock::new(Arc::new(RegistrySnapshot {
                entries,
                best_model_id,
            })),
            writer: Mutex::new(WriterState { last_id }),
        })
    }

    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    /// The current published state
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.current.read().clone()
    }

    pub fn get_best(&self) -> Option<Arc<RegisteredModel>> {
        self.snapshot().best().cloned()
    }

    pub fn get(&self, id: ModelId) -> Option<Arc<RegisteredModel>> {
        self.snapshot().get(id).cloned()
    }

    pub fn list(&self) -> Vec<ModelMetadata> {
        self.snapshot()
            .entries
            .iter()
            .map(|e| e.metadata.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.snapshot().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a trained model, persist it and recompute the best pointer
    pub fn register(
        &self,
        artifact: ModelArtifact,
        evaluation: EvaluationResult,
        trained_on: TrainedOn,
        hyperparameters: Hyperparameters,
    ) -> Result<ModelId> {
        if artifact.kind() != self.kind {
            return Err(FlashError::WrongModelKind {
                expected: self.kind,
                found: artifact.kind(),
            });
        }

        let mut writer = self.writer.lock();
        let created_at = Utc::now();
        let millis = created_at.timestamp_millis().max(0) as u64;
        let model_id = ModelId(millis.max(writer.last_id + 1));

        let entry = Arc::new(RegisteredModel {
            metadata: ModelMetadata {
                model_id,
                kind: self.kind,
                artifact_ref: self.store.artifact_ref(self.kind, model_id),
                evaluation,
                trained_on,
                hyperparameters,
                created_at,
            },
            artifact,
        });

        let mut entries = self.snapshot().entries.clone();
        entries.push(entry.clone());
        self.publish(entries, Some(entry.as_ref()), &[])?;
        writer.last_id = model_id.0;

        log::info!("Registered {} model {}", self.kind, model_id);
        Ok(model_id)
    }

    /// Re-derive the best pointer from the current entries
    pub fn recompute_best(&self) -> Result<Option<ModelId>> {
        let _writer = self.writer.lock();
        let entries = self.snapshot().entries.clone();
        self.publish(entries, None, &[])
    }

    pub fn remove(&self, id: ModelId) -> Result<()> {
        let _writer = self.writer.lock();
        let previous = self.snapshot();
        if previous.get(id).is_none() {
            return Err(FlashError::UnknownModel(id.to_string()));
        }

        let entries: Vec<Arc<RegisteredModel>> = previous
            .entries
            .iter()
            .filter(|e| e.metadata.model_id != id)
            .cloned()
            .collect();
        self.publish(entries, None, &[id])?;
        log::info!("Removed {} model {}", self.kind, id);
        Ok(())
    }

    /// Remove every entry matching `predicate` and recompute the best pointer.
    ///
    /// Returns the removed ids; a second run with the same predicate removes nothing.
    pub fn clean<P>(&self, predicate: P) -> Result<Vec<ModelId>>
    where
        P: Fn(&ModelMetadata) -> bool,
    {
        let _writer = self.writer.lock();
        let previous = self.snapshot();

        let (doomed, kept): (Vec<_>, Vec<_>) = previous
            .entries
            .iter()
            .cloned()
            .partition(|e| predicate(&e.metadata));
        let removed: Vec<ModelId> = doomed.iter().map(|e| e.metadata.model_id).collect();

        self.publish(kept, None, &removed)?;
        if !removed.is_empty() {
            log::info!("Cleaned {} {} models", removed.len(), self.kind);
        }
        Ok(removed)
    }

    /// Compute the best pointer for `entries`, commit the change to the store
    /// and only then swap the snapshot in. A failed commit leaves both the
    /// store and the published snapshot as they were. Callers hold the writer
    /// lock.
    fn publish(
        &self,
        entries: Vec<Arc<RegisteredModel>>,
        added: Option<&RegisteredModel>,
        removed: &[ModelId],
    ) -> Result<Option<ModelId>> {
        let best_model_id = select_best(self.kind, self.min_samples, &entries);
        let metadata: Vec<ModelMetadata> = entries.iter().map(|e| e.metadata.clone()).collect();
        self.store.commit(&Commit {
            kind: self.kind,
            added,
            removed,
            entries: &metadata,
            best: best_model_id,
        })?;

        let snapshot = Arc::new(RegistrySnapshot {
            entries,
            best_model_id,
        });
        *self.current.write() = snapshot;
        Ok(best_model_id)
    }
}

/// Best primary metric among entries that passed the sample guard.
///
/// Ties go to the most recent `created_at`, then to the later insertion.
fn select_best(
    kind: ModelKind,
    min_samples: usize,
    entries: &[Arc<RegisteredModel>],
) -> Option<ModelId> {
    let mut best: Option<(f64, DateTime<Utc>, ModelId)> = None;
    for entry in entries {
        let meta = &entry.metadata;
        if meta.evaluation.sample_count < min_samples {
            continue;
        }
        let Some(metric) = meta.primary_metric() else {
            continue;
        };
        let score = if kind.higher_is_better() { metric } else { -metric };

        let replace = match &best {
            None => true,
            Some((best_score, best_created, _)) => score
                .total_cmp(best_score)
                .then(meta.created_at.cmp(best_created))
                .is_ge(),
        };
        if replace {
            best = Some((score, meta.created_at, meta.model_id));
        }
    }
    best.map(|(_, _, id)| id)
}
