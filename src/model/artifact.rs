//! Serialized trained models

use serde::{Deserialize, Serialize};

use crate::features::{FeatureSchema, FeatureVector};
use crate::model::forest::RandomForest;
use crate::model::stacking::ScorePipeline;
use crate::training::Hyperparameters;
use crate::{FlashError, ModelKind, Result, ScorePrediction, WinnerPrediction};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub name: String,
    pub importance: f64,
}

/// Fitted winner classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WinnerModel {
    pub forest: RandomForest,
    /// Importance of every candidate feature, highest first
    pub feature_importances: Vec<FeatureImportance>,
}

impl WinnerModel {
    pub fn home_win_probability(&self, row: &[f64]) -> f64 {
        self.forest.predict_proba(row)
    }
}

/// Fitted score regressor: one pipeline per side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreModel {
    pub home: ScorePipeline,
    pub away: ScorePipeline,
}

impl ScoreModel {
    pub fn predict_raw(&self, row: &[f64]) -> (f64, f64) {
        (self.home.predict(row), self.away.predict(row))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Predictor {
    Winner(WinnerModel),
    Score(ScoreModel),
}

/// Everything needed to serve a trained model
///
/// `schema` is the exact feature layout the predictor was fit on. Live
/// vectors are projected onto it by name before prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub schema: FeatureSchema,
    pub hyperparameters: Hyperparameters,
    pub predictor: Predictor,
}

impl ModelArtifact {
    pub fn kind(&self) -> ModelKind {
        match self.predictor {
            Predictor::Winner(_) => ModelKind::Winner,
            Predictor::Score(_) => ModelKind::Score,
        }
    }

    pub fn predict_winner(
        &self,
        source: &FeatureSchema,
        vector: &FeatureVector,
    ) -> Result<WinnerPrediction> {
        let Predictor::Winner(model) = &self.predictor else {
            return Err(self.wrong_kind(ModelKind::Winner));
        };
        let projected = self.schema.project(source, vector)?;
        Ok(WinnerPrediction::from_probability(
            model.home_win_probability(&projected.values),
        ))
    }

    pub fn predict_score(
        &self,
        source: &FeatureSchema,
        vector: &FeatureVector,
    ) -> Result<ScorePrediction> {
        let Predictor::Score(model) = &self.predictor else {
            return Err(self.wrong_kind(ModelKind::Score));
        };
        let projected = self.schema.project(source, vector)?;
        let (home, away) = model.predict_raw(&projected.values);
        Ok(ScorePrediction::from_raw(home, away))
    }

    fn wrong_kind(&self, expected: ModelKind) -> FlashError {
        FlashError::WrongModelKind {
            expected,
            found: self.kind(),
        }
    }
}
