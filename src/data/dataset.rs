//! Training data loaded from the fetcher's JSON output
//!
//! Match history is a JSON array of [`MatchRecord`]s. Player statistics are a
//! JSON object keyed by player id; when that file is absent they are computed
//! from the match history. Upcoming fixtures, if present, are a JSON array of
//! [`Fixture`]s scored once the models are refreshed.

use std::fs;
use std::path::{Path, PathBuf};

use crate::features::{build_examples, compute_player_stats, ExampleSet, PlayerStatsMap};
use crate::{DataConfig, Fixture, MatchRecord, Result};

/// Everything a training pass consumes
#[derive(Debug, Clone)]
pub struct TrainingData {
    pub matches: Vec<MatchRecord>,
    pub player_stats: PlayerStatsMap,
    /// Identifies this snapshot of the data in model metadata
    pub source_id: String,
    pub upcoming: Vec<Fixture>,
}

impl TrainingData {
    pub fn examples(&self, recent_window: usize) -> ExampleSet {
        build_examples(&self.matches, &self.player_stats, recent_window)
            .with_source(self.source_id.clone())
    }
}

/// Provider of training data for the refresh loop
pub trait TrainingDataSource: Send + Sync {
    fn load(&self) -> Result<TrainingData>;
}

pub struct JsonDataSource {
    match_history_path: PathBuf,
    player_stats_path: PathBuf,
    upcoming_path: Option<PathBuf>,
    recent_window: usize,
}

impl JsonDataSource {
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(
        match_history_path: P,
        player_stats_path: Q,
        recent_window: usize,
    ) -> Self {
        JsonDataSource {
            match_history_path: match_history_path.as_ref().to_path_buf(),
            player_stats_path: player_stats_path.as_ref().to_path_buf(),
            upcoming_path: None,
            recent_window,
        }
    }

    pub fn with_upcoming<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.upcoming_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn from_config(config: &DataConfig) -> Self {
        Self::new(
            &config.match_history_path,
            &config.player_stats_path,
            config.recent_window,
        )
        .with_upcoming(&config.upcoming_fixtures_path)
    }
}

impl TrainingDataSource for JsonDataSource {
    fn load(&self) -> Result<TrainingData> {
        let matches = load_matches(&self.match_history_path)?;
        let player_stats = if self.player_stats_path.exists() {
            load_player_stats(&self.player_stats_path)?
        } else {
            log::info!(
                "No player statistics at {}, computing from {} matches",
                self.player_stats_path.display(),
                matches.len()
            );
            compute_player_stats(&matches, self.recent_window)
        };

        let latest = matches
            .iter()
            .map(|m| m.fixture_time)
            .max()
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "empty".to_string());
        let source_id = format!(
            "{}:{}@{}",
            self.match_history_path.display(),
            matches.len(),
            latest
        );

        let upcoming = match &self.upcoming_path {
            Some(path) if path.exists() => load_fixtures(path)?,
            _ => Vec::new(),
        };

        log::info!(
            "Loaded {} matches, {} players and {} upcoming fixtures",
            matches.len(),
            player_stats.len(),
            upcoming.len()
        );
        Ok(TrainingData {
            matches,
            player_stats,
            source_id,
            upcoming,
        })
    }
}

pub fn load_matches<P: AsRef<Path>>(path: P) -> Result<Vec<MatchRecord>> {
    let content = fs::read_to_string(path.as_ref())?;
    Ok(serde_json::from_str(&content)?)
}

pub fn load_fixtures<P: AsRef<Path>>(path: P) -> Result<Vec<Fixture>> {
    let content = fs::read_to_string(path.as_ref())?;
    Ok(serde_json::from_str(&content)?)
}

pub fn load_player_stats<P: AsRef<Path>>(path: P) -> Result<PlayerStatsMap> {
    let content = fs::read_to_string(path.as_ref())?;
    Ok(serde_json::from_str(&content)?)
}

pub fn save_player_stats<P: AsRef<Path>>(path: P, stats: &PlayerStatsMap) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(stats)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::player_stats::tests::make_match;
    use crate::PlayerId;

    fn write_matches(dir: &Path) -> PathBuf {
        let matches = vec![
            make_match(1, 2, 60, 50, 0),
            make_match(2, 1, 44, 58, 1),
            make_match(1, 3, 70, 72, 2),
        ];
        let path = dir.join("match_history.json");
        fs::write(&path, serde_json::to_string(&matches).unwrap()).unwrap();
        path
    }

    #[test]
    fn test_computes_stats_when_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let history = write_matches(dir.path());
        let source = JsonDataSource::new(&history, dir.path().join("player_stats.json"), 5);

        let data = source.load().unwrap();
        assert_eq!(data.matches.len(), 3);
        assert_eq!(data.player_stats[&PlayerId(1)].total_matches(), 3);
        assert!(data.source_id.contains(":3@"));

        let examples = data.examples(5);
        assert_eq!(examples.len(), 3);
        assert_eq!(examples.source_id, data.source_id);
    }

    #[test]
    fn test_player_stats_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let history = write_matches(dir.path());
        let stats_path = dir.path().join("out").join("player_stats.json");

        let stats = compute_player_stats(&load_matches(&history).unwrap(), 5);
        save_player_stats(&stats_path, &stats).unwrap();
        assert_eq!(load_player_stats(&stats_path).unwrap(), stats);

        let data = JsonDataSource::new(&history, &stats_path, 5).load().unwrap();
        assert_eq!(data.player_stats, stats);
    }

    #[test]
    fn test_upcoming_fixtures_are_optional() {
        let dir = tempfile::tempdir().unwrap();
        let history = write_matches(dir.path());
        let upcoming = dir.path().join("upcoming_matches.json");
        let source =
            JsonDataSource::new(&history, dir.path().join("s.json"), 5).with_upcoming(&upcoming);
        assert!(source.load().unwrap().upcoming.is_empty());

        let fixtures = vec![
            make_match(1, 2, 0, 0, 10).fixture(),
            make_match(3, 1, 0, 0, 11).fixture(),
        ];
        fs::write(&upcoming, serde_json::to_string(&fixtures).unwrap()).unwrap();
        assert_eq!(source.load().unwrap().upcoming, fixtures);
    }

    #[test]
    fn test_missing_history_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = JsonDataSource::new(dir.path().join("nope.json"), dir.path().join("s.json"), 5);
        assert!(source.load().is_err());
    }
}
