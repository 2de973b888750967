//! Background model refresh
//!
//! A refresh loads training data, optionally searches hyperparameters,
//! trains both model families and registers the results, then scores the
//! upcoming fixtures and saves those predictions. At most one refresh runs at
//! a time; inference keeps reading the registries throughout.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;

use crate::data::{TrainingData, TrainingDataSource};
use crate::features::ExampleSet;
use crate::model::ModelArtifact;
use crate::predict::{PredictionService, PredictionStore};
use crate::registry::{ModelId, ModelRegistry, TrainedOn};
use crate::training::{
    optimize, score_objective, train_score_model, train_winner_model, winner_objective,
    EvaluationResult, Hyperparameters, SearchSpace,
};
use crate::{Config, FlashError, ModelKind, Result};

/// What a refresh did for one model family
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FamilyOutcome {
    Registered { model_id: ModelId, primary_metric: f64 },
    /// Too little data; the previous best model stays in place
    Skipped { reason: String },
    Failed { reason: String },
}

/// What a refresh did with the upcoming fixtures
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PredictionBatch {
    Saved { count: usize },
    Skipped { reason: String },
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshReport {
    pub example_count: usize,
    pub winner: FamilyOutcome,
    pub score: FamilyOutcome,
    pub predictions: PredictionBatch,
}

/// Clears the in-progress flag when a refresh ends, however it ends
struct RefreshGuard<'a>(&'a AtomicBool);

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct RefreshService {
    source: Arc<dyn TrainingDataSource>,
    winner: Arc<ModelRegistry>,
    score: Arc<ModelRegistry>,
    config: Config,
    winner_defaults: Hyperparameters,
    score_defaults: Hyperparameters,
    predictions: Option<Arc<dyn PredictionStore>>,
    in_progress: AtomicBool,
}

impl RefreshService {
    pub fn new(
        source: Arc<dyn TrainingDataSource>,
        winner: Arc<ModelRegistry>,
        score: Arc<ModelRegistry>,
        config: Config,
    ) -> Self {
        RefreshService {
            source,
            winner,
            score,
            config,
            winner_defaults: Hyperparameters::new(),
            score_defaults: Hyperparameters::new(),
            predictions: None,
            in_progress: AtomicBool::new(false),
        }
    }

    /// Save a prediction batch for the upcoming fixtures after each refresh
    pub fn with_prediction_store(mut self, store: Arc<dyn PredictionStore>) -> Self {
        self.predictions = Some(store);
        self
    }

    /// Hyperparameters used when nothing better is known
    pub fn with_default_hyperparameters(mut self, winner: Hyperparameters, score: Hyperparameters) -> Self {
        self.winner_defaults = winner;
        self.score_defaults = score;
        self
    }

    pub fn is_refreshing(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    /// Run one refresh now, or fail with `AlreadyRefreshing` if one is running
    pub fn trigger(&self) -> Result<RefreshReport> {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(FlashError::AlreadyRefreshing);
        }
        let _guard = RefreshGuard(&self.in_progress);

        let data = self.source.load().map_err(|e| {
            log::error!("Refresh aborted, could not load training data: {}", e);
            e
        })?;
        let examples = data.examples(self.config.data.recent_window);
        log::info!(
            "Refreshing models from {} examples ({})",
            examples.len(),
            examples.source_id
        );

        let winner = self.refresh_family(&self.winner, &examples);
        let score = self.refresh_family(&self.score, &examples);
        let predictions = self.predict_upcoming(&data);
        Ok(RefreshReport {
            example_count: examples.len(),
            winner,
            score,
            predictions,
        })
    }

    fn predict_upcoming(&self, data: &TrainingData) -> PredictionBatch {
        let skipped = |reason: &str| PredictionBatch::Skipped {
            reason: reason.to_string(),
        };
        let Some(store) = &self.predictions else {
            return skipped("no prediction store");
        };
        if data.upcoming.is_empty() {
            return skipped("no upcoming fixtures");
        }
        if self.winner.get_best().is_none() && self.score.get_best().is_none() {
            log::warn!("No trained models, not predicting {} fixtures", data.upcoming.len());
            return skipped("no trained models");
        }

        let service = PredictionService::new(self.winner.clone(), self.score.clone());
        let saved = service
            .predict_fixtures(&data.upcoming, &data.player_stats)
            .and_then(|records| {
                store.save_predictions(&records, Utc::now())?;
                Ok(records.len())
            });
        match saved {
            Ok(count) => {
                log::info!("Saved predictions for {} upcoming fixtures", count);
                PredictionBatch::Saved { count }
            }
            Err(e) => {
                log::error!("Prediction batch failed: {}", e);
                PredictionBatch::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    fn refresh_family(&self, registry: &ModelRegistry, examples: &ExampleSet) -> FamilyOutcome {
        let kind = registry.kind();
        match self.train_family(registry, examples) {
            Ok((model_id, primary_metric)) => FamilyOutcome::Registered {
                model_id,
                primary_metric,
            },
            Err(e @ FlashError::InsufficientData { .. }) => {
                log::warn!("Skipping {} model refresh: {}", kind, e);
                FamilyOutcome::Skipped {
                    reason: e.to_string(),
                }
            }
            Err(e) => {
                log::error!("{} model refresh failed: {}", kind, e);
                FamilyOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    fn train_family(&self, registry: &ModelRegistry, examples: &ExampleSet) -> Result<(ModelId, f64)> {
        let kind = registry.kind();
        let params = self.hyperparameters_for(registry, examples)?;
        let (artifact, evaluation): (ModelArtifact, EvaluationResult) = match kind {
            ModelKind::Winner => train_winner_model(examples, &params, &self.config)?,
            ModelKind::Score => train_score_model(examples, &params, &self.config)?,
        };

        let primary_metric = evaluation.metric(kind.primary_metric()).unwrap_or(f64::NAN);
        let model_id = registry.register(
            artifact,
            evaluation,
            TrainedOn {
                feature_source_id: examples.source_id.clone(),
                example_count: examples.len(),
            },
            params,
        )?;
        Ok((model_id, primary_metric))
    }

    /// Optimizer result when enabled, else the current best model's settings,
    /// else the configured defaults
    fn hyperparameters_for(&self, registry: &ModelRegistry, examples: &ExampleSet) -> Result<Hyperparameters> {
        let kind = registry.kind();
        if self.config.refresh.optimize {
            // Fail fast rather than spend the whole trial budget on doomed trials
            if examples.len() < self.config.evaluation.min_samples {
                return Err(FlashError::InsufficientData {
                    available: examples.len(),
                    required: self.config.evaluation.min_samples,
                });
            }
            let budget = self.config.optimizer.trial_budget;
            let outcome = match kind {
                ModelKind::Winner => optimize(
                    winner_objective(examples, &self.config),
                    &SearchSpace::winner_default(),
                    budget,
                    &self.config.optimizer,
                )?,
                ModelKind::Score => optimize(
                    score_objective(examples, &self.config),
                    &SearchSpace::score_default(),
                    budget,
                    &self.config.optimizer,
                )?,
            };
            return Ok(outcome.best.hyperparameters);
        }

        if let Some(best) = registry.get_best() {
            return Ok(best.metadata.hyperparameters.clone());
        }
        Ok(match kind {
            ModelKind::Winner => self.winner_defaults.clone(),
            ModelKind::Score => self.score_defaults.clone(),
        })
    }

    /// Refresh every `config.refresh.interval_secs` on a background thread
    pub fn spawn_scheduled(self: Arc<Self>) -> RefreshHandle {
        let interval = Duration::from_secs(self.config.refresh.interval_secs.max(1));
        self.spawn_every(interval)
    }

    pub fn spawn_every(self: Arc<Self>, interval: Duration) -> RefreshHandle {
        let (shutdown, ticks) = mpsc::channel::<()>();
        let thread = thread::spawn(move || loop {
            match ticks.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => match self.trigger() {
                    Ok(report) => log::info!(
                        "Scheduled refresh done: winner {:?}, score {:?}, predictions {:?}",
                        report.winner,
                        report.score,
                        report.predictions
                    ),
                    Err(FlashError::AlreadyRefreshing) => {
                        log::info!("Refresh still running, skipping scheduled tick")
                    }
                    Err(e) => log::error!("Scheduled refresh failed: {}", e),
                },
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        });

        RefreshHandle { shutdown, thread }
    }
}

/// Running scheduled refresh; stopping waits for an in-flight refresh to end
pub struct RefreshHandle {
    shutdown: mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

impl RefreshHandle {
    pub fn stop(self) {
        let _ = self.shutdown.send(());
        if self.thread.join().is_err() {
            log::error!("Refresh thread panicked");
        }
    }
}
