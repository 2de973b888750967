//! SQLite storage for the model registry and saved predictions

use crate::model::ModelArtifact;
use crate::predict::history::{HistoryEntry, HistoryFilter, PredictionRecord, PredictionStore};
use crate::registry::{Commit, ModelId, ModelMetadata, RegisteredModel, RegistryStore};
use crate::{ModelKind, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

/// Registry store backed by a SQLite database file
pub struct SqliteStore {
    conn: Mutex<Connection>,
    location: String,
}

impl SqliteStore {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let store = SqliteStore {
            conn: Mutex::new(conn),
            location: path.display().to_string(),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory database (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = SqliteStore {
            conn: Mutex::new(conn),
            location: ":memory:".to_string(),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<()> {
        self.conn.lock().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS models (
                model_id INTEGER NOT NULL,
                kind TEXT NOT NULL,
                seq INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                metadata TEXT NOT NULL,
                artifact TEXT NOT NULL,
                PRIMARY KEY (kind, model_id)
            );

            CREATE TABLE IF NOT EXISTS registry_state (
                kind TEXT PRIMARY KEY,
                best_model_id INTEGER,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_models_kind ON models(kind, seq);

            CREATE TABLE IF NOT EXISTS predictions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                fixture_time TEXT NOT NULL,
                record TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS prediction_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                home_player_id INTEGER NOT NULL,
                away_player_id INTEGER NOT NULL,
                fixture_date TEXT NOT NULL,
                saved_at TEXT NOT NULL,
                record TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_history_home ON prediction_history(home_player_id);
            CREATE INDEX IF NOT EXISTS idx_history_away ON prediction_history(away_player_id);
            CREATE INDEX IF NOT EXISTS idx_history_date ON prediction_history(fixture_date);
            "#,
        )?;
        Ok(())
    }

    /// Stored best pointer for a kind, as last persisted
    pub fn best_model_id(&self, kind: ModelKind) -> Result<Option<ModelId>> {
        let best: Option<Option<i64>> = self
            .conn
            .lock()
            .query_row(
                "SELECT best_model_id FROM registry_state WHERE kind = ?1",
                params![kind.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(best.flatten().map(|id| ModelId(id as u64)))
    }

    pub fn get_stats(&self) -> Result<StoreStats> {
        let conn = self.conn.lock();
        let count = |kind: ModelKind| -> rusqlite::Result<i64> {
            conn.query_row(
                "SELECT COUNT(*) FROM models WHERE kind = ?1",
                params![kind.as_str()],
                |row| row.get(0),
            )
        };

        let history: i64 =
            conn.query_row("SELECT COUNT(*) FROM prediction_history", [], |row| row.get(0))?;

        Ok(StoreStats {
            winner_models: count(ModelKind::Winner)? as usize,
            score_models: count(ModelKind::Score)? as usize,
            saved_predictions: history as usize,
        })
    }
}

impl RegistryStore for SqliteStore {
    fn artifact_ref(&self, kind: ModelKind, id: ModelId) -> String {
        format!("sqlite:{}#{}/{}", self.location, kind, id)
    }

    fn load(&self, kind: ModelKind) -> Result<Vec<RegisteredModel>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT metadata, artifact FROM models WHERE kind = ?1 ORDER BY seq",
        )?;
        let rows = stmt
            .query_map(params![kind.as_str()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut entries = Vec::with_capacity(rows.len());
        for (metadata_json, artifact_json) in rows {
            let metadata: ModelMetadata = serde_json::from_str(&metadata_json)?;
            let artifact: ModelArtifact = serde_json::from_str(&artifact_json)?;
            entries.push(RegisteredModel { metadata, artifact });
        }
        Ok(entries)
    }

    fn commit(&self, commit: &Commit<'_>) -> Result<()> {
        let kind = commit.kind.as_str();
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        if let Some(entry) = commit.added {
            tx.execute(
                "INSERT INTO models (model_id, kind, seq, created_at, metadata, artifact)
                 VALUES (?1, ?2, (SELECT COALESCE(MAX(seq), 0) + 1 FROM models WHERE kind = ?2), ?3, ?4, ?5)",
                params![
                    entry.metadata.model_id.0 as i64,
                    kind,
                    entry.metadata.created_at,
                    serde_json::to_string(&entry.metadata)?,
                    serde_json::to_string(&entry.artifact)?
                ],
            )?;
        }
        for id in commit.removed {
            tx.execute(
                "DELETE FROM models WHERE kind = ?1 AND model_id = ?2",
                params![kind, id.0 as i64],
            )?;
        }
        // Entry order lives in the seq column; only the pointer needs writing
        tx.execute(
            "INSERT INTO registry_state (kind, best_model_id, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(kind) DO UPDATE SET best_model_id = excluded.best_model_id,
                                             updated_at = excluded.updated_at",
            params![kind, commit.best.map(|id| id.0 as i64), Utc::now()],
        )?;

        tx.commit()?;
        Ok(())
    }
}

impl PredictionStore for SqliteStore {
    fn save_predictions(&self, records: &[PredictionRecord], saved_at: DateTime<Utc>) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM predictions", [])?;
        for record in records {
            let json = serde_json::to_string(record)?;
            let fixture = &record.fixture;
            tx.execute(
                "INSERT INTO predictions (fixture_time, record) VALUES (?1, ?2)",
                params![fixture.fixture_time, json],
            )?;
            tx.execute(
                "INSERT INTO prediction_history
                 (home_player_id, away_player_id, fixture_date, saved_at, record)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    fixture.home_player_id.0,
                    fixture.away_player_id.0,
                    fixture.fixture_time.date_naive().to_string(),
                    saved_at,
                    json
                ],
            )?;
        }

        tx.commit()?;
        log::info!("Saved {} predictions", records.len());
        Ok(())
    }

    fn current_predictions(&self, after: Option<DateTime<Utc>>) -> Result<Vec<PredictionRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT record FROM predictions ORDER BY id")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut records = Vec::with_capacity(rows.len());
        for json in rows {
            let record: PredictionRecord = serde_json::from_str(&json)?;
            if after.map_or(true, |t| record.fixture.fixture_time > t) {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn prediction_history(&self, filter: &HistoryFilter) -> Result<Vec<HistoryEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT saved_at, record FROM prediction_history
             WHERE (?1 IS NULL OR home_player_id = ?1 OR away_player_id = ?1)
               AND (?2 IS NULL OR fixture_date = ?2)
             ORDER BY id",
        )?;
        let rows = stmt
            .query_map(
                params![
                    filter.player.map(|p| p.0),
                    filter.date.map(|d| d.to_string())
                ],
                |row| Ok((row.get::<_, DateTime<Utc>>(0)?, row.get::<_, String>(1)?)),
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut entries = Vec::with_capacity(rows.len());
        for (saved_at, json) in rows {
            entries.push(HistoryEntry {
                saved_at,
                record: serde_json::from_str(&json)?,
            });
        }
        Ok(entries)
    }
}

/// Row counts: models per kind and prediction history
#[derive(Debug, Clone)]
pub struct StoreStats {
    pub winner_models: usize,
    pub score_models: usize,
    pub saved_predictions: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predict::history::tests::record;
    use crate::registry::tests::{evaluation, tiny_winner_artifact};
    use crate::registry::{ModelRegistry, TrainedOn};
    use crate::training::Hyperparameters;
    use crate::PlayerId;
    use chrono::Duration;

    fn entry(kind: ModelKind, id: u64) -> RegisteredModel {
        RegisteredModel {
            metadata: ModelMetadata {
                model_id: ModelId(id),
                kind,
                artifact_ref: String::new(),
                evaluation: evaluation(kind.primary_metric(), 0.6, 50),
                trained_on: TrainedOn {
                    feature_source_id: "db-test".to_string(),
                    example_count: 50,
                },
                hyperparameters: Hyperparameters::new(),
                created_at: Utc::now(),
            },
            artifact: tiny_winner_artifact(),
        }
    }

    fn add(store: &SqliteStore, entry: &RegisteredModel) -> Result<()> {
        store.commit(&Commit {
            kind: entry.metadata.kind,
            added: Some(entry),
            removed: &[],
            entries: &[],
            best: Some(entry.metadata.model_id),
        })
    }

    #[test]
    fn test_create_database() {
        let store = SqliteStore::in_memory().unwrap();
        let stats = store.get_stats().unwrap();
        assert_eq!(stats.winner_models, 0);
        assert_eq!(stats.score_models, 0);
        assert_eq!(stats.saved_predictions, 0);
        assert!(store.load(ModelKind::Winner).unwrap().is_empty());
    }

    #[test]
    fn test_same_id_in_both_kinds() {
        let store = SqliteStore::in_memory().unwrap();
        let id = 1_792_249_480_007;
        add(&store, &entry(ModelKind::Winner, id)).unwrap();
        add(&store, &entry(ModelKind::Score, id)).unwrap();

        assert_eq!(store.load(ModelKind::Winner).unwrap().len(), 1);
        assert_eq!(store.load(ModelKind::Score).unwrap().len(), 1);
        assert_eq!(store.best_model_id(ModelKind::Score).unwrap(), Some(ModelId(id)));

        // Deleting one kind leaves the other alone
        store
            .commit(&Commit {
                kind: ModelKind::Winner,
                added: None,
                removed: &[ModelId(id)],
                entries: &[],
                best: None,
            })
            .unwrap();
        assert!(store.load(ModelKind::Winner).unwrap().is_empty());
        assert_eq!(store.load(ModelKind::Score).unwrap().len(), 1);

        // Within one kind the id is still unique
        assert!(add(&store, &entry(ModelKind::Score, id)).is_err());
    }

    #[test]
    fn test_failed_commit_rolls_back() {
        let store = SqliteStore::in_memory().unwrap();
        add(&store, &entry(ModelKind::Winner, 1)).unwrap();

        // The insert and delete succeed, then the pointer update fails
        store
            .conn
            .lock()
            .execute_batch("DROP TABLE registry_state")
            .unwrap();
        let result = store.commit(&Commit {
            kind: ModelKind::Winner,
            added: Some(&entry(ModelKind::Winner, 2)),
            removed: &[ModelId(1)],
            entries: &[],
            best: Some(ModelId(2)),
        });
        assert!(result.is_err());

        let ids: Vec<ModelId> = store
            .load(ModelKind::Winner)
            .unwrap()
            .iter()
            .map(|e| e.metadata.model_id)
            .collect();
        assert_eq!(ids, vec![ModelId(1)]);
    }

    #[test]
    fn test_registry_on_file_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.db");

        let (first, second) = {
            let registry =
                ModelRegistry::open(ModelKind::Winner, Box::new(SqliteStore::open(&path).unwrap()), 10)
                    .unwrap();
            let register = |acc: f64| {
                registry
                    .register(
                        tiny_winner_artifact(),
                        evaluation("accuracy", acc, 50),
                        TrainedOn {
                            feature_source_id: "db-test".to_string(),
                            example_count: 50,
                        },
                        Hyperparameters::new(),
                    )
                    .unwrap()
            };
            (register(0.7), register(0.6))
        };

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.best_model_id(ModelKind::Winner).unwrap(), Some(first));
        assert_eq!(store.get_stats().unwrap().winner_models, 2);

        let loaded = store.load(ModelKind::Winner).unwrap();
        let ids: Vec<ModelId> = loaded.iter().map(|e| e.metadata.model_id).collect();
        assert_eq!(ids, vec![first, second]);
        assert_eq!(loaded[0].metadata.trained_on.feature_source_id, "db-test");
    }

    #[test]
    fn test_delete_removes_row() {
        let store = SqliteStore::in_memory().unwrap();
        let registry = ModelRegistry::open(ModelKind::Winner, Box::new(store), 10).unwrap();
        let id = registry
            .register(
                tiny_winner_artifact(),
                evaluation("accuracy", 0.6, 50),
                TrainedOn {
                    feature_source_id: "db-test".to_string(),
                    example_count: 50,
                },
                Hyperparameters::new(),
            )
            .unwrap();
        registry.remove(id).unwrap();
        assert!(registry.is_empty());
        assert!(registry.get_best().is_none());
    }

    #[test]
    fn test_save_predictions_replaces_current_and_appends_history() {
        let store = SqliteStore::in_memory().unwrap();
        let first_batch = vec![record(1, 2, 10), record(3, 1, 11)];
        let second_batch = vec![record(2, 3, 12)];
        let t0 = Utc::now();
        store.save_predictions(&first_batch, t0).unwrap();
        store
            .save_predictions(&second_batch, t0 + Duration::hours(1))
            .unwrap();

        assert_eq!(store.current_predictions(None).unwrap(), second_batch);

        let history = store.prediction_history(&HistoryFilter::default()).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].record, first_batch[0]);
        assert_eq!(history[2].saved_at, t0 + Duration::hours(1));
        assert_eq!(store.get_stats().unwrap().saved_predictions, 3);
    }

    #[test]
    fn test_current_predictions_after_cutoff() {
        let store = SqliteStore::in_memory().unwrap();
        let batch = vec![record(1, 2, 10), record(1, 3, 20)];
        store.save_predictions(&batch, Utc::now()).unwrap();

        let cutoff = batch[0].fixture.fixture_time;
        let upcoming = store.current_predictions(Some(cutoff)).unwrap();
        assert_eq!(upcoming, vec![batch[1].clone()]);
    }

    #[test]
    fn test_history_filters() {
        let store = SqliteStore::in_memory().unwrap();
        let batch = vec![record(1, 2, 10), record(3, 1, 11), record(2, 3, 11)];
        store.save_predictions(&batch, Utc::now()).unwrap();

        let player_one = store
            .prediction_history(&HistoryFilter {
                player: Some(PlayerId(1)),
                date: None,
            })
            .unwrap();
        assert_eq!(player_one.len(), 2);

        let day = batch[1].fixture.fixture_time.date_naive();
        let on_day = store
            .prediction_history(&HistoryFilter {
                player: None,
                date: Some(day),
            })
            .unwrap();
        let records: Vec<PredictionRecord> = on_day.into_iter().map(|e| e.record).collect();
        assert_eq!(records, vec![batch[1].clone(), batch[2].clone()]);

        let both = store
            .prediction_history(&HistoryFilter {
                player: Some(PlayerId(2)),
                date: Some(day),
            })
            .unwrap();
        assert_eq!(both.len(), 1);
        assert_eq!(both[0].record, batch[2]);
    }
}
