//! Recent form
//!
//! Rolling window over each player's latest results: win rate, scoring,
//! consistency and momentum.

use crate::{MatchRecord, PlayerId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One result from a player's point of view
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecentResult {
    pub score: u32,
    pub won: bool,
}

impl RecentResult {
    pub fn for_player(record: &MatchRecord, player: PlayerId) -> Option<Self> {
        Some(RecentResult {
            score: record.score_for(player)?,
            won: record.did_win(player)?,
        })
    }
}

/// Summary of a window of results (most recent first)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FormSummary {
    pub win_rate: f64,
    pub avg_score: f64,
    /// Population variance of scores, 0 with fewer than two results
    pub score_variance: f64,
    /// Recency-weighted win rate minus plain win rate
    pub momentum: f64,
}

impl FormSummary {
    pub fn from_results(results: &[RecentResult]) -> Self {
        if results.is_empty() {
            return Self::default();
        }

        let n = results.len() as f64;
        let wins = results.iter().filter(|r| r.won).count() as f64;
        let win_rate = wins / n;
        let avg_score = results.iter().map(|r| r.score as f64).sum::<f64>() / n;

        if results.len() < 2 {
            return FormSummary {
                win_rate,
                avg_score,
                score_variance: 0.0,
                momentum: 0.0,
            };
        }

        let score_variance = results
            .iter()
            .map(|r| (r.score as f64 - avg_score).powi(2))
            .sum::<f64>()
            / n;

        // Most recent result weighs n, the oldest weighs 1
        let mut total_weight = 0.0;
        let mut weighted_wins = 0.0;
        for (i, result) in results.iter().enumerate() {
            let weight = (results.len() - i) as f64;
            total_weight += weight;
            if result.won {
                weighted_wins += weight;
            }
        }

        FormSummary {
            win_rate,
            avg_score,
            score_variance,
            momentum: weighted_wins / total_weight - win_rate,
        }
    }
}

/// Per-player match timelines for "results before time t" lookups
pub struct MatchHistoryIndex {
    timelines: HashMap<PlayerId, Vec<(DateTime<Utc>, RecentResult)>>,
    window: usize,
}

impl MatchHistoryIndex {
    pub fn new(matches: &[MatchRecord], window: usize) -> Self {
        let mut timelines: HashMap<PlayerId, Vec<(DateTime<Utc>, RecentResult)>> = HashMap::new();

        for record in matches {
            for player in [record.home_player_id, record.away_player_id] {
                if let Some(result) = RecentResult::for_player(record, player) {
                    timelines
                        .entry(player)
                        .or_default()
                        .push((record.fixture_time, result));
                }
            }
        }

        // Stable sort keeps input order among equal timestamps
        for timeline in timelines.values_mut() {
            timeline.sort_by_key(|(time, _)| *time);
        }

        MatchHistoryIndex { timelines, window }
    }

    /// Up to `window` results strictly before `before`, most recent first
    pub fn recent_before(&self, player: PlayerId, before: DateTime<Utc>) -> Vec<RecentResult> {
        let Some(timeline) = self.timelines.get(&player) else {
            return Vec::new();
        };
        let end = timeline.partition_point(|(time, _)| *time < before);
        timeline[..end]
            .iter()
            .rev()
            .take(self.window)
            .map(|(_, result)| *result)
            .collect()
    }

    pub fn form_before(&self, player: PlayerId, before: DateTime<Utc>) -> FormSummary {
        FormSummary::from_results(&self.recent_before(player, before))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::player_stats::tests::make_match;

    fn result(score: u32, won: bool) -> RecentResult {
        RecentResult { score, won }
    }

    #[test]
    fn test_empty_form_is_zero() {
        assert_eq!(FormSummary::from_results(&[]), FormSummary::default());
    }

    #[test]
    fn test_form_summary_values() {
        let form = FormSummary::from_results(&[result(60, true), result(40, false)]);
        assert!((form.win_rate - 0.5).abs() < 1e-12);
        assert!((form.avg_score - 50.0).abs() < 1e-12);
        assert!((form.score_variance - 100.0).abs() < 1e-12);
        // weighted: 2 / 3, unweighted: 1 / 2
        assert!((form.momentum - (2.0 / 3.0 - 0.5)).abs() < 1e-12);
    }

    #[test]
    fn test_single_result_has_no_variance_or_momentum() {
        let form = FormSummary::from_results(&[result(70, true)]);
        assert_eq!(form.score_variance, 0.0);
        assert_eq!(form.momentum, 0.0);
        assert_eq!(form.win_rate, 1.0);
    }

    #[test]
    fn test_history_index_excludes_current_and_future() {
        let matches = vec![
            make_match(1, 2, 60, 50, 0),
            make_match(1, 2, 40, 50, 1),
            make_match(1, 3, 70, 20, 2),
        ];
        let index = MatchHistoryIndex::new(&matches, 5);

        let before_second = index.recent_before(PlayerId(1), matches[1].fixture_time);
        assert_eq!(before_second, vec![result(60, true)]);

        let before_third = index.recent_before(PlayerId(1), matches[2].fixture_time);
        assert_eq!(before_third, vec![result(40, false), result(60, true)]);

        assert!(index.recent_before(PlayerId(9), matches[2].fixture_time).is_empty());
    }
}
