//! Feature vectors for matches and fixtures
//!
//! The standard schema is a fixed, ordered list of named features. Trained
//! models record the (possibly reduced) schema they were fit on and project
//! live vectors onto it at inference time.

use crate::features::form::{FormSummary, MatchHistoryIndex};
use crate::features::player_stats::{PlayerStats, PlayerStatsMap};
use crate::{FlashError, Fixture, MatchRecord, Result};
use serde::{Deserialize, Serialize};

/// Names of the standard features, in vector order
pub const FEATURE_NAMES: [&str; 29] = [
    // Overall player record
    "home_win_rate",
    "away_win_rate",
    "home_avg_score",
    "away_avg_score",
    "home_matches_played",
    "away_matches_played",
    // Record with the team picked for this match
    "home_team_win_rate",
    "away_team_win_rate",
    "home_team_avg_score",
    "away_team_avg_score",
    "home_team_matches",
    "away_team_matches",
    "home_team_experience",
    "away_team_experience",
    // Head to head
    "home_h2h_win_rate",
    "away_h2h_win_rate",
    "h2h_matches",
    "home_h2h_avg_score",
    "away_h2h_avg_score",
    // Recent form
    "home_recent_win_rate",
    "away_recent_win_rate",
    "home_recent_avg_score",
    "away_recent_avg_score",
    "home_score_variance",
    "away_score_variance",
    "home_momentum",
    "away_momentum",
    // Differences
    "win_rate_diff",
    "avg_score_diff",
];

/// Ordered feature names a vector (or a model) is laid out by
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    names: Vec<String>,
}

impl FeatureSchema {
    pub fn new(names: Vec<String>) -> Self {
        FeatureSchema { names }
    }

    /// The schema produced by [`fixture_features`]
    pub fn standard() -> Self {
        FeatureSchema {
            names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Sub-schema keeping the given column indices, in the given order
    pub fn select(&self, indices: &[usize]) -> Self {
        FeatureSchema {
            names: indices.iter().map(|&i| self.names[i].clone()).collect(),
        }
    }

    /// Re-lay a vector built under `source` into this schema
    pub fn project(&self, source: &FeatureSchema, vector: &FeatureVector) -> Result<FeatureVector> {
        let mut values = Vec::with_capacity(self.names.len());
        for name in &self.names {
            let idx = source
                .position(name)
                .filter(|&i| i < vector.values.len())
                .ok_or_else(|| FlashError::SchemaMismatch {
                    feature: name.clone(),
                })?;
            values.push(vector.values[idx]);
        }
        Ok(FeatureVector { values })
    }
}

/// Numeric features for one match, laid out by some [`FeatureSchema`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub values: Vec<f64>,
}

impl FeatureVector {
    pub fn new(values: Vec<f64>) -> Self {
        FeatureVector { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A feature vector with the match outcome it led to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingExample {
    pub features: FeatureVector,
    pub home_score: u32,
    pub away_score: u32,
}

impl TrainingExample {
    /// Winner label: did the home player win
    pub fn home_win(&self) -> bool {
        self.home_score > self.away_score
    }

    /// Score label
    pub fn scores(&self) -> (u32, u32) {
        (self.home_score, self.away_score)
    }
}

/// Training examples sharing one schema, tagged with where they came from
#[derive(Debug, Clone, PartialEq)]
pub struct ExampleSet {
    pub schema: FeatureSchema,
    pub examples: Vec<TrainingExample>,
    pub source_id: String,
}

impl ExampleSet {
    pub fn new(schema: FeatureSchema, examples: Vec<TrainingExample>) -> Self {
        ExampleSet {
            schema,
            examples,
            source_id: "inline".to_string(),
        }
    }

    pub fn with_source(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = source_id.into();
        self
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    /// Feature rows as plain vectors
    pub fn rows(&self) -> Vec<Vec<f64>> {
        self.examples
            .iter()
            .map(|e| e.features.values.clone())
            .collect()
    }

    /// Subset by example index, keeping the schema
    pub fn subset(&self, indices: &[usize]) -> ExampleSet {
        ExampleSet {
            schema: self.schema.clone(),
            examples: indices.iter().map(|&i| self.examples[i].clone()).collect(),
            source_id: self.source_id.clone(),
        }
    }
}

/// Build the standard feature vector for a fixture.
///
/// Statistics the players lack (unknown team, never met) contribute 0.
pub fn fixture_features(
    fixture: &Fixture,
    home: &PlayerStats,
    away: &PlayerStats,
    home_form: &FormSummary,
    away_form: &FormSummary,
) -> FeatureVector {
    let home_team = home.team(fixture.home_team_id);
    let away_team = away.team(fixture.away_team_id);
    let home_h2h = home.against(fixture.away_player_id);
    let away_h2h = away.against(fixture.home_player_id);

    let experience = |team_matches: u32, total: u32| team_matches as f64 / total.max(1) as f64;

    let values = vec![
        home.win_rate(),
        away.win_rate(),
        home.avg_score(),
        away.avg_score(),
        home.total_matches() as f64,
        away.total_matches() as f64,
        home_team.win_rate(),
        away_team.win_rate(),
        home_team.avg_score(),
        away_team.avg_score(),
        home_team.matches as f64,
        away_team.matches as f64,
        experience(home_team.matches, home.total_matches()),
        experience(away_team.matches, away.total_matches()),
        home_h2h.win_rate(),
        away_h2h.win_rate(),
        home_h2h.matches as f64,
        home_h2h.avg_score(),
        away_h2h.avg_score(),
        home_form.win_rate,
        away_form.win_rate,
        home_form.avg_score,
        away_form.avg_score,
        home_form.score_variance,
        away_form.score_variance,
        home_form.momentum,
        away_form.momentum,
        home.win_rate() - away.win_rate(),
        home.avg_score() - away.avg_score(),
    ];
    debug_assert_eq!(values.len(), FEATURE_NAMES.len());

    FeatureVector { values }
}

/// Features for an upcoming fixture, using the recent results stored with the stats
pub fn live_features(fixture: &Fixture, player_stats: &PlayerStatsMap) -> FeatureVector {
    let default = PlayerStats::default();
    let home = player_stats.get(&fixture.home_player_id).unwrap_or(&default);
    let away = player_stats.get(&fixture.away_player_id).unwrap_or(&default);
    let home_form = FormSummary::from_results(&home.recent);
    let away_form = FormSummary::from_results(&away.recent);
    fixture_features(fixture, home, away, &home_form, &away_form)
}

/// Turn completed matches into training examples under the standard schema.
///
/// Matches with a player missing from `player_stats` are skipped. Recent form
/// only looks at matches strictly before each match's fixture time.
pub fn build_examples(
    matches: &[MatchRecord],
    player_stats: &PlayerStatsMap,
    recent_window: usize,
) -> ExampleSet {
    let history = MatchHistoryIndex::new(matches, recent_window);
    let mut examples = Vec::with_capacity(matches.len());
    let mut skipped = 0usize;

    for record in matches {
        let (Some(home), Some(away)) = (
            player_stats.get(&record.home_player_id),
            player_stats.get(&record.away_player_id),
        ) else {
            log::debug!(
                "Skipping match {} vs {}: missing player statistics",
                record.home_player_id,
                record.away_player_id
            );
            skipped += 1;
            continue;
        };

        let home_form = history.form_before(record.home_player_id, record.fixture_time);
        let away_form = history.form_before(record.away_player_id, record.fixture_time);
        let features = fixture_features(&record.fixture(), home, away, &home_form, &away_form);

        examples.push(TrainingExample {
            features,
            home_score: record.home_score,
            away_score: record.away_score,
        });
    }

    if skipped > 0 {
        log::warn!(
            "Skipped {} of {} matches without player statistics",
            skipped,
            matches.len()
        );
    }

    ExampleSet::new(FeatureSchema::standard(), examples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::player_stats::compute_player_stats;
    use crate::features::player_stats::tests::make_match;
    use crate::PlayerId;

    fn sample_matches() -> Vec<MatchRecord> {
        vec![
            make_match(1, 2, 60, 50, 0),
            make_match(2, 1, 44, 58, 1),
            make_match(1, 3, 70, 72, 2),
            make_match(3, 2, 61, 40, 3),
            make_match(1, 2, 55, 54, 4),
        ]
    }

    #[test]
    fn test_build_examples_is_deterministic() {
        let matches = sample_matches();
        let stats = compute_player_stats(&matches, 5);

        let first = build_examples(&matches, &stats, 5);
        let second = build_examples(&matches, &stats, 5);
        assert_eq!(first, second);

        let bits = |set: &ExampleSet| -> Vec<u64> {
            set.examples
                .iter()
                .flat_map(|e| e.features.values.iter().map(|v| v.to_bits()))
                .collect()
        };
        assert_eq!(bits(&first), bits(&second));
    }

    #[test]
    fn test_build_examples_skips_unknown_players() {
        let matches = sample_matches();
        let mut stats = compute_player_stats(&matches, 5);
        stats.remove(&PlayerId(3));

        let set = build_examples(&matches, &stats, 5);
        assert_eq!(set.len(), 3);
        assert!(set.examples.iter().all(|e| e.features.len() == FEATURE_NAMES.len()));
    }

    #[test]
    fn test_labels_follow_scores() {
        let matches = sample_matches();
        let stats = compute_player_stats(&matches, 5);
        let set = build_examples(&matches, &stats, 5);
        assert!(set.examples[0].home_win());
        assert!(!set.examples[1].home_win());
        assert_eq!(set.examples[2].scores(), (70, 72));
    }

    #[test]
    fn test_first_match_has_no_recent_form() {
        let matches = sample_matches();
        let stats = compute_player_stats(&matches, 5);
        let set = build_examples(&matches, &stats, 5);
        let schema = FeatureSchema::standard();
        let recent = schema.position("home_recent_win_rate").unwrap();
        assert_eq!(set.examples[0].features.values[recent], 0.0);
        assert!(set.examples[2].features.values[recent] > 0.0);
    }

    #[test]
    fn test_project_reorders_and_detects_missing() {
        let source = FeatureSchema::new(vec!["a".into(), "b".into(), "c".into()]);
        let vector = FeatureVector::new(vec![1.0, 2.0, 3.0]);

        let target = FeatureSchema::new(vec!["c".into(), "a".into()]);
        assert_eq!(target.project(&source, &vector).unwrap().values, vec![3.0, 1.0]);

        let drifted = FeatureSchema::new(vec!["a".into(), "z".into()]);
        match drifted.project(&source, &vector) {
            Err(FlashError::SchemaMismatch { feature }) => assert_eq!(feature, "z"),
            other => panic!("expected schema mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_live_features_default_missing_players_to_zero() {
        let fixture = make_match(8, 9, 0, 0, 0).fixture();
        let vector = live_features(&fixture, &PlayerStatsMap::new());
        assert_eq!(vector.len(), FEATURE_NAMES.len());
        assert!(vector.values.iter().all(|v| *v == 0.0));
    }
}
