//! Stored predictions for upcoming fixtures
//!
//! Each batch replaces the current prediction set and is appended, with the
//! time it was saved, to a history that can be filtered by player and date.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    Fixture, PlayerId, PredictionOutcome, Result, ScorePrediction, WinnerPrediction,
};

/// Both model outputs for one fixture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub fixture: Fixture,
    pub winner: PredictionOutcome<WinnerPrediction>,
    pub score: PredictionOutcome<ScorePrediction>,
    pub generated_at: DateTime<Utc>,
}

impl PredictionRecord {
    pub fn involves(&self, player: PlayerId) -> bool {
        self.fixture.home_player_id == player || self.fixture.away_player_id == player
    }

    /// False when neither model could be used
    pub fn has_prediction(&self) -> bool {
        self.winner.prediction().is_some() || self.score.prediction().is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub saved_at: DateTime<Utc>,
    pub record: PredictionRecord,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryFilter {
    /// Fixtures this player took part in, home or away
    pub player: Option<PlayerId>,
    /// Fixtures starting on this UTC date
    pub date: Option<NaiveDate>,
}

impl HistoryFilter {
    pub fn matches(&self, record: &PredictionRecord) -> bool {
        self.player.map_or(true, |p| record.involves(p))
            && self
                .date
                .map_or(true, |d| record.fixture.fixture_time.date_naive() == d)
    }
}

/// Persistence for prediction batches
pub trait PredictionStore: Send + Sync {
    /// Replace the current set with `records` and append them to the history
    fn save_predictions(&self, records: &[PredictionRecord], saved_at: DateTime<Utc>) -> Result<()>;

    /// The current set, in saved order; with `after`, only fixtures starting later
    fn current_predictions(&self, after: Option<DateTime<Utc>>) -> Result<Vec<PredictionRecord>>;

    /// History entries matching `filter`, oldest first
    fn prediction_history(&self, filter: &HistoryFilter) -> Result<Vec<HistoryEntry>>;
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::features::player_stats::tests::make_match;

    pub(crate) fn record(home: i64, away: i64, day: i64) -> PredictionRecord {
        PredictionRecord {
            fixture: make_match(home, away, 0, 0, day).fixture(),
            winner: PredictionOutcome::NoModelAvailable,
            score: PredictionOutcome::NoModelAvailable,
            generated_at: Utc::now(),
        }
    }

    #[test]
    fn test_filter_by_player_and_date() {
        let r = record(3, 7, 10);
        let day = r.fixture.fixture_time.date_naive();

        assert!(HistoryFilter::default().matches(&r));
        assert!(HistoryFilter { player: Some(PlayerId(7)), date: None }.matches(&r));
        assert!(!HistoryFilter { player: Some(PlayerId(4)), date: None }.matches(&r));
        assert!(HistoryFilter { player: Some(PlayerId(3)), date: Some(day) }.matches(&r));
        assert!(!HistoryFilter {
            player: None,
            date: day.succ_opt(),
        }
        .matches(&r));
    }

    #[test]
    fn test_record_without_models_has_no_prediction() {
        let mut r = record(1, 2, 0);
        assert!(!r.has_prediction());
        r.winner = PredictionOutcome::Available {
            model_id: crate::registry::ModelId(5),
            prediction: WinnerPrediction::from_probability(0.7),
        };
        assert!(r.has_prediction());
    }
}
