//! Player statistics computation
//!
//! Aggregate, per-team and per-opponent records for every player, built from
//! match history.

use crate::features::form::RecentResult;
use crate::{MatchRecord, PlayerId, TeamId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Player statistics keyed by player
pub type PlayerStatsMap = BTreeMap<PlayerId, PlayerStats>;

/// Win/loss/score tallies over some set of matches
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordSummary {
    pub matches: u32,
    pub wins: u32,
    pub losses: u32,
    pub total_score: u64,
}

impl RecordSummary {
    /// Record a single result
    pub fn update(&mut self, score: u32, won: bool) {
        self.matches += 1;
        self.total_score += score as u64;
        if won {
            self.wins += 1;
        } else {
            self.losses += 1;
        }
    }

    /// Win ratio (0-1), 0 when nothing was played
    pub fn win_rate(&self) -> f64 {
        if self.matches == 0 {
            0.0
        } else {
            self.wins as f64 / self.matches as f64
        }
    }

    /// Average points scored per match
    pub fn avg_score(&self) -> f64 {
        if self.matches == 0 {
            0.0
        } else {
            self.total_score as f64 / self.matches as f64
        }
    }
}

/// Statistics for one player
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerStats {
    pub overall: RecordSummary,
    /// Records with each team the player has used
    #[serde(default)]
    pub teams_used: BTreeMap<TeamId, RecordSummary>,
    /// Records against each opponent
    #[serde(default)]
    pub opponents_faced: BTreeMap<PlayerId, RecordSummary>,
    /// Most recent results first
    #[serde(default)]
    pub recent: Vec<RecentResult>,
}

impl PlayerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn win_rate(&self) -> f64 {
        self.overall.win_rate()
    }

    pub fn avg_score(&self) -> f64 {
        self.overall.avg_score()
    }

    pub fn total_matches(&self) -> u32 {
        self.overall.matches
    }

    /// Record with a team, or an empty record if never used
    pub fn team(&self, team: TeamId) -> RecordSummary {
        self.teams_used.get(&team).cloned().unwrap_or_default()
    }

    /// Record against an opponent, or an empty record if never faced
    pub fn against(&self, opponent: PlayerId) -> RecordSummary {
        self.opponents_faced.get(&opponent).cloned().unwrap_or_default()
    }

    /// Update statistics with a match result
    pub fn update(&mut self, record: &MatchRecord, player: PlayerId) {
        let is_home = record.home_player_id == player;
        let (score, team, opponent) = if is_home {
            (record.home_score, record.home_team_id, record.away_player_id)
        } else {
            (record.away_score, record.away_team_id, record.home_player_id)
        };
        let won = record.did_win(player).unwrap_or(false);

        self.overall.update(score, won);
        self.teams_used.entry(team).or_default().update(score, won);
        self.opponents_faced
            .entry(opponent)
            .or_default()
            .update(score, won);
    }
}

/// Compute statistics for all players over a set of matches
pub struct PlayerStatsComputer {
    stats: PlayerStatsMap,
    recent_window: usize,
}

impl PlayerStatsComputer {
    pub fn new(recent_window: usize) -> Self {
        PlayerStatsComputer {
            stats: BTreeMap::new(),
            recent_window,
        }
    }

    /// Process matches and build statistics
    pub fn process_matches(&mut self, matches: &[MatchRecord]) {
        let mut ordered: Vec<&MatchRecord> = matches.iter().collect();
        ordered.sort_by_key(|m| m.fixture_time);

        for record in ordered {
            for player in [record.home_player_id, record.away_player_id] {
                let stats = self.stats.entry(player).or_default();
                stats.update(record, player);

                let result = RecentResult::for_player(record, player);
                if let Some(result) = result {
                    stats.recent.insert(0, result);
                    stats.recent.truncate(self.recent_window);
                }
            }
        }
    }

    /// Get statistics for a player
    pub fn get(&self, player: PlayerId) -> Option<&PlayerStats> {
        self.stats.get(&player)
    }

    pub fn into_map(self) -> PlayerStatsMap {
        self.stats
    }
}

/// Build player statistics from a full match history
pub fn compute_player_stats(matches: &[MatchRecord], recent_window: usize) -> PlayerStatsMap {
    let mut computer = PlayerStatsComputer::new(recent_window);
    computer.process_matches(matches);
    log::info!(
        "Computed statistics for {} players from {} matches",
        computer.stats.len(),
        matches.len()
    );
    computer.into_map()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    pub(crate) fn make_match(
        home: i64,
        away: i64,
        home_score: u32,
        away_score: u32,
        day: i64,
    ) -> MatchRecord {
        MatchRecord {
            home_player_id: PlayerId(home),
            away_player_id: PlayerId(away),
            home_team_id: TeamId(home * 10),
            away_team_id: TeamId(away * 10),
            home_score,
            away_score,
            fixture_time: Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap()
                + Duration::days(day),
        }
    }

    #[test]
    fn test_player_statistics() {
        let mut stats = PlayerStats::new();

        // Home win
        stats.update(&make_match(1, 2, 60, 50, 0), PlayerId(1));
        assert_eq!(stats.overall.wins, 1);
        assert_eq!(stats.overall.total_score, 60);
        assert_eq!(stats.team(TeamId(10)).matches, 1);

        // Away loss
        stats.update(&make_match(2, 1, 55, 45, 1), PlayerId(1));
        assert_eq!(stats.overall.losses, 1);
        assert_eq!(stats.against(PlayerId(2)).matches, 2);
        assert!((stats.win_rate() - 0.5).abs() < 1e-12);
        assert!((stats.avg_score() - 52.5).abs() < 1e-12);
    }

    #[test]
    fn test_missing_records_default_to_zero() {
        let stats = PlayerStats::new();
        assert_eq!(stats.win_rate(), 0.0);
        assert_eq!(stats.team(TeamId(99)).avg_score(), 0.0);
        assert_eq!(stats.against(PlayerId(7)).win_rate(), 0.0);
    }

    #[test]
    fn test_computer_keeps_recent_window_newest_first() {
        let matches = vec![
            make_match(1, 2, 40, 50, 2),
            make_match(1, 2, 60, 50, 0),
            make_match(2, 1, 30, 70, 1),
            make_match(1, 3, 80, 20, 3),
        ];
        let stats = compute_player_stats(&matches, 3);
        let p1 = &stats[&PlayerId(1)];
        assert_eq!(p1.total_matches(), 4);
        assert_eq!(p1.recent.len(), 3);
        assert_eq!(p1.recent[0].score, 80);
        assert_eq!(p1.recent[1].score, 40);
        assert_eq!(p1.recent[2].score, 70);
    }

    #[test]
    fn test_stats_json_roundtrip_keeps_integer_keys() {
        let stats = compute_player_stats(&[make_match(1, 2, 60, 50, 0)], 5);
        let json = serde_json::to_string(&stats).unwrap();
        let back: PlayerStatsMap = serde_json::from_str(&json).unwrap();
        assert_eq!(back, stats);
    }
}
