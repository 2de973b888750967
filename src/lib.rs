//! eSports head-to-head match prediction
//!
//! Turns player match history into feature vectors, trains a winner classifier
//! and a score regressor, tunes them with Bayesian search and keeps a versioned
//! registry of trained models for serving.

pub mod data;
pub mod features;
pub mod model;
pub mod predict;
pub mod registry;
pub mod training;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Unique identifier for a player
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PlayerId(pub i64);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Player({})", self.0)
    }
}

/// Unique identifier for a team a player can pick
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TeamId(pub i64);

impl fmt::Display for TeamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Team({})", self.0)
    }
}

/// A completed match as delivered by the data fetcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub home_player_id: PlayerId,
    pub away_player_id: PlayerId,
    pub home_team_id: TeamId,
    pub away_team_id: TeamId,
    pub home_score: u32,
    pub away_score: u32,
    pub fixture_time: DateTime<Utc>,
}

impl MatchRecord {
    /// True when the home player won (draws count as not winning)
    pub fn home_win(&self) -> bool {
        self.home_score > self.away_score
    }

    /// Check whether the player took part in this match
    pub fn involves(&self, player: PlayerId) -> bool {
        self.home_player_id == player || self.away_player_id == player
    }

    /// Check if the given player won this match
    pub fn did_win(&self, player: PlayerId) -> Option<bool> {
        if player == self.home_player_id {
            Some(self.home_score > self.away_score)
        } else if player == self.away_player_id {
            Some(self.away_score > self.home_score)
        } else {
            None
        }
    }

    /// Get score for a specific player
    pub fn score_for(&self, player: PlayerId) -> Option<u32> {
        if player == self.home_player_id {
            Some(self.home_score)
        } else if player == self.away_player_id {
            Some(self.away_score)
        } else {
            None
        }
    }

    /// The fixture this result was played from
    pub fn fixture(&self) -> Fixture {
        Fixture {
            id: None,
            home_player_id: self.home_player_id,
            away_player_id: self.away_player_id,
            home_team_id: self.home_team_id,
            away_team_id: self.away_team_id,
            fixture_time: self.fixture_time,
        }
    }
}

/// An upcoming match to be scored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub id: Option<i64>,
    pub home_player_id: PlayerId,
    pub away_player_id: PlayerId,
    pub home_team_id: TeamId,
    pub away_team_id: TeamId,
    pub fixture_time: DateTime<Utc>,
}

/// The two model families kept in the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Winner,
    Score,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Winner => "winner",
            ModelKind::Score => "score",
        }
    }

    /// Name of the metric that ranks models of this kind
    pub fn primary_metric(&self) -> &'static str {
        match self {
            ModelKind::Winner => "accuracy",
            ModelKind::Score => "mae",
        }
    }

    /// Whether a larger primary metric is better
    pub fn higher_is_better(&self) -> bool {
        matches!(self, ModelKind::Winner)
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ModelKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "winner" => Ok(ModelKind::Winner),
            "score" => Ok(ModelKind::Score),
            _ => Err(format!("Unknown model kind: {}. Use winner or score.", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Home,
    Away,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Home => write!(f, "home"),
            Side::Away => write!(f, "away"),
        }
    }
}

/// Winner model output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WinnerPrediction {
    pub predicted_winner: Side,
    pub home_win_probability: f64,
    pub away_win_probability: f64,
    pub confidence: f64,
}

impl WinnerPrediction {
    pub fn from_probability(p_home: f64) -> Self {
        let p_home = p_home.clamp(0.0, 1.0);
        WinnerPrediction {
            predicted_winner: if p_home > 0.5 { Side::Home } else { Side::Away },
            home_win_probability: p_home,
            away_win_probability: 1.0 - p_home,
            confidence: p_home.max(1.0 - p_home),
        }
    }
}

/// Score model output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScorePrediction {
    pub home_score: u32,
    pub away_score: u32,
    pub total_score: u32,
    pub score_diff: i64,
}

impl ScorePrediction {
    /// Round raw regressor outputs to non-negative scores and derive totals
    pub fn from_raw(home: f64, away: f64) -> Self {
        let home_score = home.max(0.0).round() as u32;
        let away_score = away.max(0.0).round() as u32;
        ScorePrediction {
            home_score,
            away_score,
            total_score: home_score + away_score,
            score_diff: home_score as i64 - away_score as i64,
        }
    }
}

/// Result handed to the serving layer: either a prediction or an explicit absence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PredictionOutcome<T> {
    Available {
        model_id: registry::ModelId,
        prediction: T,
    },
    NoModelAvailable,
}

impl<T> PredictionOutcome<T> {
    pub fn prediction(&self) -> Option<&T> {
        match self {
            PredictionOutcome::Available { prediction, .. } => Some(prediction),
            PredictionOutcome::NoModelAvailable => None,
        }
    }
}

/// Application-wide errors
#[derive(Debug, Error)]
pub enum FlashError {
    #[error("Insufficient data: {available} examples, need at least {required}")]
    InsufficientData { available: usize, required: usize },

    #[error("Degenerate fold after {attempts} attempts: a fold holds a single label class")]
    DegenerateFold { attempts: usize },

    #[error("Trial {trial_index} failed: {message}")]
    TrialFailure { trial_index: usize, message: String },

    #[error("All {trials} optimization trials failed")]
    AllTrialsFailed { trials: usize },

    #[error("Schema mismatch: feature '{feature}' required by the model is not available")]
    SchemaMismatch { feature: String },

    #[error("Invalid hyperparameter {name}: {reason}")]
    InvalidHyperparameter { name: String, reason: String },

    #[error("Wrong model kind: expected {expected}, found {found}")]
    WrongModelKind { expected: ModelKind, found: ModelKind },

    #[error("Numerical failure: {0}")]
    Numerical(String),

    #[error("A refresh is already in progress")]
    AlreadyRefreshing,

    #[error("Model not found in registry: {0}")]
    UnknownModel(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, FlashError>;

/// Application configuration loaded from config.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    #[serde(default)]
    pub winner: WinnerConfig,
    #[serde(default)]
    pub score: ScoreConfig,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub data: DataConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfig {
    pub k_folds: usize,
    /// Below this many examples evaluation refuses to report a score
    pub min_samples: usize,
    pub max_fold_retries: usize,
    pub seed: u64,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        EvaluationConfig {
            k_folds: 5,
            min_samples: 100,
            max_fold_retries: 5,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WinnerConfig {
    /// Features whose share of total importance falls below this are dropped
    pub importance_threshold: f64,
    pub min_features: usize,
}

impl Default for WinnerConfig {
    fn default() -> Self {
        WinnerConfig {
            importance_threshold: 0.01,
            min_features: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreConfig {
    /// Internal folds used to build out-of-fold meta features
    pub stacking_folds: usize,
}

impl Default for ScoreConfig {
    fn default() -> Self {
        ScoreConfig { stacking_folds: 5 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    pub trial_budget: usize,
    pub initial_trials: usize,
    pub patience: usize,
    /// Worker threads for trial evaluation (0 = available cores)
    pub workers: usize,
    /// Candidates proposed per round
    pub batch_size: usize,
    pub candidate_pool: usize,
    pub xi: f64,
    pub length_scale: f64,
    pub seed: u64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        OptimizerConfig {
            trial_budget: 30,
            initial_trials: 8,
            patience: 10,
            workers: 0,
            batch_size: 4,
            candidate_pool: 512,
            xi: 0.01,
            length_scale: 0.25,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Json,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub store: StoreKind,
    /// Directory for the JSON store, database file for SQLite
    pub path: String,
    pub suspicious_accuracy: f64,
    pub suspicious_sample_threshold: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig {
            store: StoreKind::Json,
            path: "models".to_string(),
            suspicious_accuracy: 0.99,
            suspicious_sample_threshold: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshConfig {
    pub interval_secs: u64,
    /// Run hyperparameter search before each scheduled training pass
    pub optimize: bool,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        RefreshConfig {
            interval_secs: 3600,
            optimize: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    pub match_history_path: String,
    pub player_stats_path: String,
    pub recent_window: usize,
    /// Fixtures scored after each refresh; missing file means none
    #[serde(default = "default_upcoming_path")]
    pub upcoming_fixtures_path: String,
    /// SQLite file holding saved predictions and their history
    #[serde(default = "default_predictions_path")]
    pub predictions_path: String,
}

fn default_upcoming_path() -> String {
    "output/upcoming_matches.json".to_string()
}

fn default_predictions_path() -> String {
    "output/predictions.db".to_string()
}

impl Default for DataConfig {
    fn default() -> Self {
        DataConfig {
            match_history_path: "output/match_history.json".to_string(),
            player_stats_path: "output/player_stats.json".to_string(),
            recent_window: 5,
            upcoming_fixtures_path: default_upcoming_path(),
            predictions_path: default_predictions_path(),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            FlashError::Config(format!("Failed to read config file {}: {}", path, e))
        })?;
        toml::from_str(&content)
            .map_err(|e| FlashError::Config(format!("Failed to parse config: {}", e)))
    }

    pub fn save(&self, path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| FlashError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
