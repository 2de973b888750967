//! Fixture scoring against the registries' current best models

use std::sync::Arc;

use chrono::Utc;

use crate::features::{live_features, FeatureSchema, PlayerStatsMap};
use crate::predict::history::PredictionRecord;
use crate::registry::ModelRegistry;
use crate::{Fixture, PredictionOutcome, Result, ScorePrediction, WinnerPrediction};

/// Serves predictions from the winner and score registries
///
/// Each call reads the best entry once, so the artifact and metadata used for
/// a prediction always belong together even while a refresh swaps models.
pub struct PredictionService {
    winner: Arc<ModelRegistry>,
    score: Arc<ModelRegistry>,
}

impl PredictionService {
    pub fn new(winner: Arc<ModelRegistry>, score: Arc<ModelRegistry>) -> Self {
        PredictionService { winner, score }
    }

    pub fn predict_winner(
        &self,
        fixture: &Fixture,
        player_stats: &PlayerStatsMap,
    ) -> Result<PredictionOutcome<WinnerPrediction>> {
        let Some(best) = self.winner.get_best() else {
            log::debug!("No winner model available");
            return Ok(PredictionOutcome::NoModelAvailable);
        };

        let live = live_features(fixture, player_stats);
        let prediction = best
            .artifact
            .predict_winner(&FeatureSchema::standard(), &live)?;
        Ok(PredictionOutcome::Available {
            model_id: best.metadata.model_id,
            prediction,
        })
    }

    pub fn predict_score(
        &self,
        fixture: &Fixture,
        player_stats: &PlayerStatsMap,
    ) -> Result<PredictionOutcome<ScorePrediction>> {
        let Some(best) = self.score.get_best() else {
            log::debug!("No score model available");
            return Ok(PredictionOutcome::NoModelAvailable);
        };

        let live = live_features(fixture, player_stats);
        let prediction = best
            .artifact
            .predict_score(&FeatureSchema::standard(), &live)?;
        Ok(PredictionOutcome::Available {
            model_id: best.metadata.model_id,
            prediction,
        })
    }

    /// Score every fixture with both families
    pub fn predict_fixtures(
        &self,
        fixtures: &[Fixture],
        player_stats: &PlayerStatsMap,
    ) -> Result<Vec<PredictionRecord>> {
        let generated_at = Utc::now();
        fixtures
            .iter()
            .map(|fixture| {
                Ok(PredictionRecord {
                    fixture: fixture.clone(),
                    winner: self.predict_winner(fixture, player_stats)?,
                    score: self.predict_score(fixture, player_stats)?,
                    generated_at,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SqliteStore;
    use crate::features::player_stats::tests::make_match;
    use crate::features::{build_examples, compute_player_stats, FeatureVector};
    use crate::model::ModelArtifact;
    use crate::registry::tests::{evaluation, tiny_winner_artifact};
    use crate::registry::TrainedOn;
    use crate::training::{train_winner_model, Hyperparameters, ParamValue};
    use crate::{Config, FlashError, MatchRecord, ModelKind};

    fn registry(kind: ModelKind) -> Arc<ModelRegistry> {
        let store = SqliteStore::in_memory().unwrap();
        Arc::new(ModelRegistry::open(kind, Box::new(store), 10).unwrap())
    }

    /// Player 1 beats everyone, players 2-4 trade results
    fn history() -> Vec<MatchRecord> {
        let mut matches = Vec::new();
        for day in 0..60 {
            let opponent = 2 + (day % 3);
            if day % 2 == 0 {
                matches.push(make_match(1, opponent, 70, 50, day));
            } else {
                matches.push(make_match(opponent, 1, 48, 66, day));
            }
            let (a, b) = (2 + (day % 3), 2 + ((day + 1) % 3));
            matches.push(make_match(a, b, 55 + (day % 7) as u32, 55, day));
        }
        matches
    }

    #[test]
    fn test_no_model_is_explicit_outcome() {
        let service = PredictionService::new(registry(ModelKind::Winner), registry(ModelKind::Score));
        let fixture = make_match(1, 2, 0, 0, 100).fixture();
        let stats = PlayerStatsMap::new();

        assert_eq!(
            service.predict_winner(&fixture, &stats).unwrap(),
            PredictionOutcome::NoModelAvailable
        );
        assert_eq!(
            service.predict_score(&fixture, &stats).unwrap(),
            PredictionOutcome::NoModelAvailable
        );
    }

    #[test]
    fn test_registered_model_predictions_round_trip() {
        let matches = history();
        let stats = compute_player_stats(&matches, 5);
        let examples = build_examples(&matches, &stats, 5);

        let mut config = Config::default();
        config.evaluation.min_samples = 20;
        let params = Hyperparameters::new()
            .with("n_estimators", ParamValue::Int(15))
            .with("max_depth", ParamValue::Int(5));
        let (artifact, result) = train_winner_model(&examples, &params, &config).unwrap();

        let fixture = make_match(1, 3, 0, 0, 100).fixture();
        let direct = artifact
            .predict_winner(&FeatureSchema::standard(), &live_features(&fixture, &stats))
            .unwrap();

        let winners = registry(ModelKind::Winner);
        let id = winners
            .register(
                artifact,
                result,
                TrainedOn {
                    feature_source_id: examples.source_id.clone(),
                    example_count: examples.len(),
                },
                params,
            )
            .unwrap();

        let service = PredictionService::new(winners, registry(ModelKind::Score));
        let outcome = service.predict_winner(&fixture, &stats).unwrap();
        assert_eq!(
            outcome,
            PredictionOutcome::Available {
                model_id: id,
                prediction: direct.clone(),
            }
        );
        let p = outcome.prediction().unwrap();
        assert!((p.confidence - p.home_win_probability.max(p.away_win_probability)).abs() < 1e-12);
    }

    #[test]
    fn test_batch_uses_one_model_per_family() {
        let winners = registry(ModelKind::Winner);
        let id = winners
            .register(
                tiny_winner_artifact(),
                evaluation("accuracy", 0.6, 50),
                TrainedOn {
                    feature_source_id: "test".to_string(),
                    example_count: 50,
                },
                Hyperparameters::new(),
            )
            .unwrap();
        let service = PredictionService::new(winners, registry(ModelKind::Score));
        let fixtures = vec![
            make_match(1, 2, 0, 0, 100).fixture(),
            make_match(3, 4, 0, 0, 101).fixture(),
        ];

        let records = service.predict_fixtures(&fixtures, &PlayerStatsMap::new()).unwrap();
        assert_eq!(records.len(), 2);
        for (record, fixture) in records.iter().zip(&fixtures) {
            assert_eq!(&record.fixture, fixture);
            assert!(matches!(record.winner, PredictionOutcome::Available { model_id, .. } if model_id == id));
            assert_eq!(record.score, PredictionOutcome::NoModelAvailable);
            assert!(record.has_prediction());
        }
        assert_eq!(records[0].generated_at, records[1].generated_at);
        assert!(service.predict_fixtures(&[], &PlayerStatsMap::new()).unwrap().is_empty());
    }

    #[test]
    fn test_schema_mismatch_is_per_call_error() {
        // A model fit on a feature the live schema does not produce
        let artifact = ModelArtifact {
            schema: FeatureSchema::new(vec!["retired_feature".to_string()]),
            ..tiny_winner_artifact()
        };
        assert!(artifact
            .predict_winner(&FeatureSchema::standard(), &FeatureVector::new(vec![0.0; 29]))
            .is_err());

        let winners = registry(ModelKind::Winner);
        winners
            .register(
                artifact,
                evaluation("accuracy", 0.6, 50),
                TrainedOn {
                    feature_source_id: "test".to_string(),
                    example_count: 50,
                },
                Hyperparameters::new(),
            )
            .unwrap();

        let service = PredictionService::new(winners, registry(ModelKind::Score));
        let fixture = make_match(1, 2, 0, 0, 100).fixture();
        let result = service.predict_winner(&fixture, &PlayerStatsMap::new());
        assert!(matches!(
            result,
            Err(FlashError::SchemaMismatch { ref feature }) if feature == "retired_feature"
        ));
        // Score side is unaffected
        assert_eq!(
            service.predict_score(&fixture, &PlayerStatsMap::new()).unwrap(),
            PredictionOutcome::NoModelAvailable
        );
    }
}
