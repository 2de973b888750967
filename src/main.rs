//! Flash CLI
//!
//! Train, tune, register and serve eSports match prediction models.

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use flash::registry::ModelId;
use flash::{Config, ModelKind, Result};

#[derive(Parser)]
#[command(name = "flash")]
#[command(about = "eSports head-to-head match prediction", long_about = None)]
struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new project with default config
    Init,
    /// Recompute player statistics from match history
    Stats,
    /// Train and register models with the current hyperparameters
    Train {
        /// winner, score or all
        #[arg(default_value = "all")]
        target: TrainTarget,
    },
    /// Search hyperparameters, then train and register the best setting
    Optimize {
        /// winner or score
        kind: ModelKind,
        /// Override the configured trial budget
        #[arg(long)]
        trials: Option<usize>,
    },
    /// Predict match outcomes
    Predict {
        /// Input fixture file (JSON object or array)
        #[arg(long)]
        fixture: String,
        /// Output format
        #[arg(long, default_value = "table")]
        format: OutputFormat,
        /// Also save these predictions as the current set
        #[arg(long)]
        save: bool,
    },
    /// Saved prediction commands
    Predictions {
        #[command(subcommand)]
        action: PredictionCommands,
    },
    /// Model registry commands
    Model {
        #[command(subcommand)]
        action: ModelCommands,
    },
    /// Retrain both models now; with --watch keep refreshing on the configured interval
    Refresh {
        #[arg(long)]
        watch: bool,
    },
}

#[derive(Subcommand)]
enum ModelCommands {
    /// List registered models
    List {
        /// Only this kind
        kind: Option<ModelKind>,
    },
    /// Show one model, or the current best of a kind
    Info {
        kind: ModelKind,
        /// Model id (defaults to the current best)
        #[arg(long)]
        id: Option<ModelId>,
    },
    /// Remove models with too few samples or suspicious accuracy
    Clean {
        /// Override the minimum evaluated sample count
        #[arg(long)]
        min_samples: Option<usize>,
        /// Override the suspicious accuracy threshold
        #[arg(long)]
        suspicious_accuracy: Option<f64>,
    },
}

#[derive(Subcommand)]
enum PredictionCommands {
    /// Show the current predictions for upcoming fixtures
    Upcoming {
        /// Include fixtures that have already started
        #[arg(long)]
        all: bool,
        #[arg(long, default_value = "table")]
        format: OutputFormat,
    },
    /// Show every saved prediction batch
    History {
        /// Only fixtures with this player, home or away
        #[arg(long)]
        player: Option<i64>,
        /// Only fixtures on this date (YYYY-MM-DD, UTC)
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long, default_value = "table")]
        format: OutputFormat,
    },
}

#[derive(Clone, Copy, Debug)]
enum TrainTarget {
    Winner,
    Score,
    All,
}

impl TrainTarget {
    fn kinds(&self) -> Vec<ModelKind> {
        match self {
            TrainTarget::Winner => vec![ModelKind::Winner],
            TrainTarget::Score => vec![ModelKind::Score],
            TrainTarget::All => vec![ModelKind::Winner, ModelKind::Score],
        }
    }
}

impl std::str::FromStr for TrainTarget {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "winner" => Ok(TrainTarget::Winner),
            "score" => Ok(TrainTarget::Score),
            "all" => Ok(TrainTarget::All),
            _ => Err(format!("Unknown target: {}. Use winner, score, or all.", s)),
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum OutputFormat {
    Table,
    Json,
    Csv,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            "csv" => Ok(OutputFormat::Csv),
            _ => Err(format!("Unknown format: {}. Use table, json, or csv.", s)),
        }
    }
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load or create config
    let config = if std::path::Path::new(&cli.config).exists() {
        match Config::load(&cli.config) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Error loading config: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        Config::default()
    };

    // Run command
    let result = match cli.command {
        Commands::Init => commands::init(&cli.config),
        Commands::Stats => commands::stats(&config),
        Commands::Train { target } => commands::train(&config, target),
        Commands::Optimize { kind, trials } => commands::optimize(&config, kind, trials),
        Commands::Predict {
            fixture,
            format,
            save,
        } => commands::predict(&config, &fixture, format, save),
        Commands::Predictions { action } => match action {
            PredictionCommands::Upcoming { all, format } => {
                commands::predictions_upcoming(&config, all, format)
            }
            PredictionCommands::History {
                player,
                date,
                format,
            } => commands::predictions_history(&config, player, date, format),
        },
        Commands::Model { action } => match action {
            ModelCommands::List { kind } => commands::model_list(&config, kind),
            ModelCommands::Info { kind, id } => commands::model_info(&config, kind, id),
            ModelCommands::Clean {
                min_samples,
                suspicious_accuracy,
            } => commands::model_clean(&config, min_samples, suspicious_accuracy),
        },
        Commands::Refresh { watch } => commands::refresh(&config, watch),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

mod commands {
    use super::*;
    use flash::data::dataset::{load_matches, save_player_stats};
    use flash::data::{JsonDataSource, SqliteStore, TrainingDataSource};
    use flash::features::compute_player_stats;
    use flash::model::Predictor;
    use chrono::{DateTime, Utc};
    use flash::predict::{
        HistoryFilter, PredictionRecord, PredictionService, PredictionStore, RefreshService,
    };
    use flash::registry::{CleanPolicy, JsonFileStore, ModelRegistry, RegistryStore, TrainedOn};
    use flash::training::{
        optimize as run_optimizer, score_objective, train_score_model, train_winner_model,
        winner_objective, Hyperparameters, SearchSpace,
    };
    use flash::{Fixture, FlashError, PlayerId, StoreKind};
    use std::path::Path;
    use std::sync::Arc;

    fn open_store(config: &Config) -> Result<Box<dyn RegistryStore>> {
        Ok(match config.registry.store {
            StoreKind::Json => Box::new(JsonFileStore::new(&config.registry.path)?),
            StoreKind::Sqlite => Box::new(SqliteStore::open(&config.registry.path)?),
        })
    }

    fn open_registry(config: &Config, kind: ModelKind) -> Result<Arc<ModelRegistry>> {
        Ok(Arc::new(ModelRegistry::open(
            kind,
            open_store(config)?,
            config.evaluation.min_samples,
        )?))
    }

    fn open_predictions(config: &Config) -> Result<Arc<SqliteStore>> {
        if let Some(parent) = Path::new(&config.data.predictions_path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Arc::new(SqliteStore::open(&config.data.predictions_path)?))
    }

    pub fn init(config_path: &str) -> Result<()> {
        let config = Config::default();
        config.save(config_path)?;
        println!("Created default config at {}", config_path);

        std::fs::create_dir_all("output")?;
        if config.registry.store == StoreKind::Json {
            std::fs::create_dir_all(&config.registry.path)?;
        }
        println!("Created output/ and {}/ directories", config.registry.path);

        println!("\nNext steps:");
        println!("  1. Edit {} to customize settings", config_path);
        println!(
            "  2. Place match history at {}",
            config.data.match_history_path
        );
        println!("  3. Run 'flash train' to train and register models");

        Ok(())
    }

    pub fn stats(config: &Config) -> Result<()> {
        let matches = load_matches(&config.data.match_history_path)?;
        let stats = compute_player_stats(&matches, config.data.recent_window);
        save_player_stats(&config.data.player_stats_path, &stats)?;

        println!(
            "Computed statistics for {} players from {} matches",
            stats.len(),
            matches.len()
        );
        println!("Saved to {}", config.data.player_stats_path);
        Ok(())
    }

    pub fn train(config: &Config, target: TrainTarget) -> Result<()> {
        let data = JsonDataSource::from_config(&config.data).load()?;
        let examples = data.examples(config.data.recent_window);

        for kind in target.kinds() {
            let registry = open_registry(config, kind)?;
            // Reuse the settings of the current best model when there is one
            let params = registry
                .get_best()
                .map(|best| best.metadata.hyperparameters.clone())
                .unwrap_or_default();
            let (artifact, evaluation) = match kind {
                ModelKind::Winner => train_winner_model(&examples, &params, config)?,
                ModelKind::Score => train_score_model(&examples, &params, config)?,
            };

            let metric = evaluation.metric(kind.primary_metric()).unwrap_or(f64::NAN);
            let id = registry.register(
                artifact,
                evaluation,
                TrainedOn {
                    feature_source_id: examples.source_id.clone(),
                    example_count: examples.len(),
                },
                params,
            )?;

            println!(
                "Registered {} model {} ({} = {:.4})",
                kind,
                id,
                kind.primary_metric(),
                metric
            );
            print_best(&registry);
        }
        Ok(())
    }

    pub fn optimize(config: &Config, kind: ModelKind, trials: Option<usize>) -> Result<()> {
        let data = JsonDataSource::from_config(&config.data).load()?;
        let examples = data.examples(config.data.recent_window);
        let budget = trials.unwrap_or(config.optimizer.trial_budget);

        println!("Optimizing {} model over {} trials...", kind, budget);
        let outcome = match kind {
            ModelKind::Winner => run_optimizer(
                winner_objective(&examples, config),
                &SearchSpace::winner_default(),
                budget,
                &config.optimizer,
            )?,
            ModelKind::Score => run_optimizer(
                score_objective(&examples, config),
                &SearchSpace::score_default(),
                budget,
                &config.optimizer,
            )?,
        };

        let failed = outcome.trials.iter().filter(|t| t.failed()).count();
        println!("\nOptimization complete!");
        println!("  Trials run:     {}", outcome.trials.len());
        println!("  Failed trials:  {}", failed);
        println!("  Stopped early:  {}", outcome.stopped_early);
        println!("  Best trial:     {}", outcome.best.trial_index);
        println!("  Best objective: {:.4}", outcome.best.objective);
        println!("  Parameters:     {}", outcome.best.hyperparameters);

        let params: Hyperparameters = outcome.best.hyperparameters;
        let (artifact, evaluation) = match kind {
            ModelKind::Winner => train_winner_model(&examples, &params, config)?,
            ModelKind::Score => train_score_model(&examples, &params, config)?,
        };
        let registry = open_registry(config, kind)?;
        let id = registry.register(
            artifact,
            evaluation,
            TrainedOn {
                feature_source_id: examples.source_id.clone(),
                example_count: examples.len(),
            },
            params,
        )?;
        println!("\nRegistered {} model {}", kind, id);
        print_best(&registry);
        Ok(())
    }

    #[derive(serde::Deserialize)]
    #[serde(untagged)]
    enum FixtureInput {
        Many(Vec<Fixture>),
        One(Fixture),
    }

    pub fn predict(
        config: &Config,
        fixture_path: &str,
        format: OutputFormat,
        save: bool,
    ) -> Result<()> {
        let content = std::fs::read_to_string(fixture_path)?;
        let fixtures = match serde_json::from_str(&content)? {
            FixtureInput::Many(list) => list,
            FixtureInput::One(fixture) => vec![fixture],
        };

        let data = JsonDataSource::from_config(&config.data).load()?;
        let service = PredictionService::new(
            open_registry(config, ModelKind::Winner)?,
            open_registry(config, ModelKind::Score)?,
        );
        let records = service.predict_fixtures(&fixtures, &data.player_stats)?;
        print_records(&unsaved(&records), format)?;

        if records
            .iter()
            .any(|r| r.winner.prediction().is_none() || r.score.prediction().is_none())
        {
            eprintln!("Run 'flash train' to register the missing models");
        }
        if save {
            open_predictions(config)?.save_predictions(&records, Utc::now())?;
            eprintln!(
                "Saved {} predictions to {}",
                records.len(),
                config.data.predictions_path
            );
        }
        Ok(())
    }

    pub fn predictions_upcoming(config: &Config, all: bool, format: OutputFormat) -> Result<()> {
        let after = if all { None } else { Some(Utc::now()) };
        let records = open_predictions(config)?.current_predictions(after)?;
        if records.is_empty() {
            println!("No saved predictions. Run 'flash refresh' or 'flash predict --save'.");
            return Ok(());
        }
        print_records(&unsaved(&records), format)
    }

    pub fn predictions_history(
        config: &Config,
        player: Option<i64>,
        date: Option<NaiveDate>,
        format: OutputFormat,
    ) -> Result<()> {
        let filter = HistoryFilter {
            player: player.map(PlayerId),
            date,
        };
        let history = open_predictions(config)?.prediction_history(&filter)?;
        if history.is_empty() {
            println!("No saved predictions match");
            return Ok(());
        }
        let rows: Vec<_> = history
            .iter()
            .map(|h| (Some(h.saved_at), &h.record))
            .collect();
        print_records(&rows, format)
    }

    fn unsaved(records: &[PredictionRecord]) -> Vec<(Option<DateTime<Utc>>, &PredictionRecord)> {
        records.iter().map(|r| (None, r)).collect()
    }

    /// Print records, each with the time it was saved when known
    fn print_records(
        rows: &[(Option<DateTime<Utc>>, &PredictionRecord)],
        format: OutputFormat,
    ) -> Result<()> {
        if let OutputFormat::Csv = format {
            println!("saved_at,fixture_time,home,away,predicted_winner,home_win_prob,confidence,home_score,away_score,total_score,score_diff");
        }
        for (saved_at, record) in rows {
            let fixture = &record.fixture;
            match format {
                OutputFormat::Table => {
                    println!(
                        "{} vs {}  ({})",
                        fixture.home_player_id,
                        fixture.away_player_id,
                        fixture.fixture_time.format("%Y-%m-%d %H:%M")
                    );
                    println!("───────────────────────────────");
                    if let Some(at) = saved_at {
                        println!("  Saved:       {}", at.format("%Y-%m-%d %H:%M:%S"));
                    }
                    match record.winner.prediction() {
                        Some(p) => {
                            println!("  Winner:      {}", p.predicted_winner);
                            println!("  Home win:    {:.1}%", p.home_win_probability * 100.0);
                            println!("  Confidence:  {:.1}%", p.confidence * 100.0);
                        }
                        None => println!("  Winner:      no model available"),
                    }
                    match record.score.prediction() {
                        Some(p) => {
                            println!("  Score:       {} - {}", p.home_score, p.away_score);
                            println!("  Total:       {}", p.total_score);
                            println!("  Difference:  {:+}", p.score_diff);
                        }
                        None => println!("  Score:       no model available"),
                    }
                    println!();
                }
                OutputFormat::Json => {
                    let json = serde_json::json!({
                        "saved_at": saved_at,
                        "fixture": fixture,
                        "winner": record.winner,
                        "score": record.score,
                        "generated_at": record.generated_at,
                    });
                    println!("{}", serde_json::to_string_pretty(&json)?);
                }
                OutputFormat::Csv => {
                    let w = record.winner.prediction();
                    let s = record.score.prediction();
                    println!(
                        "{},{},{},{},{},{},{},{},{},{},{}",
                        saved_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
                        fixture.fixture_time.to_rfc3339(),
                        fixture.home_player_id.0,
                        fixture.away_player_id.0,
                        w.map(|p| p.predicted_winner.to_string()).unwrap_or_default(),
                        w.map(|p| format!("{:.3}", p.home_win_probability)).unwrap_or_default(),
                        w.map(|p| format!("{:.3}", p.confidence)).unwrap_or_default(),
                        s.map(|p| p.home_score.to_string()).unwrap_or_default(),
                        s.map(|p| p.away_score.to_string()).unwrap_or_default(),
                        s.map(|p| p.total_score.to_string()).unwrap_or_default(),
                        s.map(|p| p.score_diff.to_string()).unwrap_or_default(),
                    );
                }
            }
        }
        Ok(())
    }

    fn print_best(registry: &ModelRegistry) {
        match registry.get_best() {
            Some(best) => println!(
                "Current best {} model: {} ({} = {:.4})",
                registry.kind(),
                best.metadata.model_id,
                registry.kind().primary_metric(),
                best.metadata.primary_metric().unwrap_or(f64::NAN)
            ),
            None => println!("No {} model passes the sample guard yet", registry.kind()),
        }
    }

    pub fn model_list(config: &Config, kind: Option<ModelKind>) -> Result<()> {
        let kinds = match kind {
            Some(k) => vec![k],
            None => vec![ModelKind::Winner, ModelKind::Score],
        };

        for kind in kinds {
            let registry = open_registry(config, kind)?;
            let snapshot = registry.snapshot();
            println!("{} models ({})", kind, snapshot.entries.len());
            println!("───────────────────────────────────────────────────────────");
            for entry in &snapshot.entries {
                let meta = &entry.metadata;
                let marker = if snapshot.best_model_id == Some(meta.model_id) {
                    "*"
                } else {
                    " "
                };
                println!(
                    "{} {:<15} {:>8} = {:<8.4} samples {:<6} {}",
                    marker,
                    meta.model_id,
                    kind.primary_metric(),
                    meta.primary_metric().unwrap_or(f64::NAN),
                    meta.evaluation.sample_count,
                    meta.created_at.format("%Y-%m-%d %H:%M")
                );
            }
            println!();
        }
        Ok(())
    }

    pub fn model_info(config: &Config, kind: ModelKind, id: Option<ModelId>) -> Result<()> {
        let registry = open_registry(config, kind)?;
        let entry = match id {
            Some(id) => registry
                .get(id)
                .ok_or_else(|| FlashError::UnknownModel(id.to_string()))?,
            None => registry
                .get_best()
                .ok_or_else(|| FlashError::UnknownModel(format!("best {} model", kind)))?,
        };
        let meta = &entry.metadata;

        println!("Model Information");
        println!("───────────────────────────────");
        println!("  Id:             {}", meta.model_id);
        println!("  Kind:           {}", meta.kind);
        println!("  Created:        {}", meta.created_at.to_rfc3339());
        println!("  Artifact:       {}", meta.artifact_ref);
        println!("  Trained on:     {} ({} examples)", meta.trained_on.feature_source_id, meta.trained_on.example_count);
        println!("  Folds:          {}", meta.evaluation.folds);
        println!("  Samples:        {}", meta.evaluation.sample_count);
        if let Some(balance) = meta.evaluation.class_balance {
            println!("  Home win rate:  {:.1}%", balance * 100.0);
        }
        println!("  Parameters:     {}", meta.hyperparameters);
        println!("  Features:       {}", entry.artifact.schema.len());
        println!("\nMetrics (mean ± std over folds)");
        for (name, value) in &meta.evaluation.metrics {
            let var = meta.evaluation.variances.get(name).copied().unwrap_or(0.0);
            println!("  {:<16} {:.4} ± {:.4}", name, value, var.sqrt());
        }

        if let Predictor::Winner(model) = &entry.artifact.predictor {
            println!("\nTop features");
            for feature in model.feature_importances.iter().take(10) {
                println!("  {:<24} {:.4}", feature.name, feature.importance);
            }
        }
        Ok(())
    }

    pub fn model_clean(
        config: &Config,
        min_samples: Option<usize>,
        suspicious_accuracy: Option<f64>,
    ) -> Result<()> {
        let mut policy = CleanPolicy::from_config(config.evaluation.min_samples, &config.registry);
        if let Some(min) = min_samples {
            policy.min_samples = min;
        }
        if let Some(acc) = suspicious_accuracy {
            policy.suspicious_accuracy = acc;
        }

        for kind in [ModelKind::Winner, ModelKind::Score] {
            let registry = open_registry(config, kind)?;
            let removed = registry.clean(|meta| policy.is_problematic(meta))?;
            println!("Removed {} {} models", removed.len(), kind);
            for id in &removed {
                println!("  - {}", id);
            }
            print_best(&registry);
        }
        Ok(())
    }

    pub fn refresh(config: &Config, watch: bool) -> Result<()> {
        let source: Arc<dyn TrainingDataSource> = Arc::new(JsonDataSource::from_config(&config.data));
        let service = Arc::new(
            RefreshService::new(
                source,
                open_registry(config, ModelKind::Winner)?,
                open_registry(config, ModelKind::Score)?,
                config.clone(),
            )
            .with_prediction_store(open_predictions(config)?),
        );

        let report = service.trigger()?;
        println!("{}", serde_json::to_string_pretty(&report)?);

        if watch {
            let handle = service.clone().spawn_scheduled();
            println!(
                "Refreshing every {}s. Press Enter to stop.",
                config.refresh.interval_secs
            );
            let mut line = String::new();
            std::io::stdin().read_line(&mut line)?;
            handle.stop();
        }
        Ok(())
    }
}
