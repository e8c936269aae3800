//! Wardrisk CLI - ward flood risk scoring, preparedness and model training

// Global invariants enforced:
// - Deterministic output ordering
// - Identical input yields byte-for-byte identical output
// - All file I/O happens here; the core only sees materialized data

use anyhow::Context;
use chrono::NaiveDateTime;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;
use wardrisk_core::artifact::ModelArtifact;
use wardrisk_core::config::{self, ResolvedConfig};
use wardrisk_core::report::{render_issues_text, render_preparedness_text, render_zones_text};
use wardrisk_core::{
    load_model, load_observations, load_registry, load_report, load_weather, render_json,
    render_text, CalibratedClassifier, ScoringCycle, Trainer, TrainingSettings,
};

#[derive(Parser)]
#[command(name = "wardrisk")]
#[command(about = "Ward-level flood risk and monsoon preparedness scoring")]
#[command(version = env!("WARDRISK_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score every ward against a weather snapshot
    Score {
        /// Ward registry (JSON array of wards)
        #[arg(long)]
        wards: PathBuf,

        /// Weather snapshot (JSON)
        #[arg(long)]
        weather: PathBuf,

        /// Classifier artifact (.json or .json.zst); omitted means degraded mode
        #[arg(long)]
        model: Option<PathBuf>,

        /// Previous cycle report; wards with bad weather keep their record as stale
        #[arg(long)]
        previous: Option<PathBuf>,

        /// Cycle timestamp, e.g. 2024-07-28T16:00:00 (default: now, local time)
        #[arg(long)]
        at: Option<String>,

        /// Output format
        #[arg(long, default_value = "text")]
        format: OutputFormat,

        /// Show only the top N risk wards (text output)
        #[arg(long)]
        top: Option<usize>,

        /// Also write the JSON report to this file
        #[arg(long)]
        output: Option<PathBuf>,

        /// Path to config file (default: auto-discover)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Assess static monsoon preparedness; needs no weather or model
    Preparedness {
        /// Ward registry (JSON array of wards)
        #[arg(long)]
        wards: PathBuf,

        /// Output format
        #[arg(long, default_value = "text")]
        format: OutputFormat,

        /// Show only the N least prepared wards (text output)
        #[arg(long)]
        top: Option<usize>,

        /// Path to config file (default: auto-discover)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Train and calibrate a classifier artifact from historical observations
    Train {
        /// Ward registry (JSON array of wards)
        #[arg(long)]
        wards: PathBuf,

        /// Training observations (JSON array)
        #[arg(long)]
        observations: PathBuf,

        /// Artifact file to write; a .zst extension compresses it
        #[arg(long)]
        output: PathBuf,

        /// Version tag stored in the artifact
        #[arg(long, default_value = "wardrisk-gbdt-1")]
        model_version: String,

        /// Seed for synthetic label draws
        #[arg(long, default_value = "7")]
        label_seed: u64,

        /// Calibration season (requires --evaluation-season)
        #[arg(long)]
        calibration_season: Option<i32>,

        /// Evaluation season (requires --calibration-season)
        #[arg(long)]
        evaluation_season: Option<i32>,

        /// Positive-class weight (default: negatives / positives)
        #[arg(long)]
        positive_weight: Option<f64>,

        /// Path to config file (default: auto-discover)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Show artifact metadata, metrics and feature importance
    ModelInfo {
        /// Classifier artifact (.json or .json.zst)
        path: PathBuf,

        /// Output format
        #[arg(long, default_value = "text")]
        format: OutputFormat,

        /// Number of features to list by importance
        #[arg(long, default_value = "10")]
        importance: usize,
    },
    /// Validate or show configuration
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Validate a config file without scoring
    Validate {
        /// Path to config file (default: auto-discover from current directory)
        #[arg(long)]
        path: Option<PathBuf>,
    },
    /// Show the effective configuration (defaults merged with the config file)
    Show {
        /// Path to config file (default: auto-discover from current directory)
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, PartialEq, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn main() -> anyhow::Result<()> {
    init_logger();
    let cli = Cli::parse();

    match cli.command {
        Commands::Score {
            wards,
            weather,
            model,
            previous,
            at,
            format,
            top,
            output,
            config: config_path,
        } => {
            let resolved = load_config(config_path.as_deref())?;
            let registry = load_registry(&wards)?;
            let snapshot = load_weather(&weather)?;
            let previous = previous
                .as_deref()
                .map(load_report)
                .transpose()
                .context("failed to load previous report")?;
            let timestamp = match at {
                Some(s) => parse_timestamp(&s)?,
                None => chrono::Local::now().naive_local(),
            };

            let cycle = ScoringCycle::new(&registry, &resolved, load_model(model.as_deref()));
            let report = cycle.run(&snapshot, timestamp, previous.as_ref());

            if let Some(path) = output {
                std::fs::write(&path, render_json(&report))
                    .with_context(|| format!("failed to write report: {}", path.display()))?;
                log::info!("report written to {}", path.display());
            }

            match format {
                OutputFormat::Text => print!("{}", render_text(&report, top)),
                OutputFormat::Json => println!("{}", render_json(&report)),
            }
        }
        Commands::Preparedness {
            wards,
            format,
            top,
            config: config_path,
        } => {
            let resolved = load_config(config_path.as_deref())?;
            let registry = load_registry(&wards)?;
            let cycle = ScoringCycle::new(&registry, &resolved, load_model(None));
            let assessment = cycle.assess_preparedness();

            match format {
                OutputFormat::Text => {
                    print!("{}", render_preparedness_text(&assessment.records, top));
                    if !assessment.zones.is_empty() {
                        println!();
                        print!("{}", render_zones_text(&assessment.zones));
                    }
                    if !assessment.issues.is_empty() {
                        println!("\n{} issue(s):", assessment.issues.len());
                        print!("{}", render_issues_text(&assessment.issues));
                    }
                }
                OutputFormat::Json => {
                    let value = serde_json::json!({
                        "wards": assessment.records,
                        "zones": assessment.zones,
                        "issues": assessment.issues,
                    });
                    println!("{}", render_json(&value));
                }
            }
        }
        Commands::Train {
            wards,
            observations,
            output,
            model_version,
            label_seed,
            calibration_season,
            evaluation_season,
            positive_weight,
            config: config_path,
        } => {
            let resolved = load_config(config_path.as_deref())?;
            let registry = load_registry(&wards)?;
            let rows = load_observations(&observations)?;
            log::info!(
                "{} observations for {} wards",
                rows.len(),
                registry.len()
            );

            let settings = TrainingSettings {
                params: resolved.training.clone(),
                positive_weight,
                label_seed,
                calibration_season,
                evaluation_season,
                imputation: resolved.imputation,
                model_version,
                data_dir: observations.parent().map(Path::to_path_buf),
                artifact_dir: output.parent().map(Path::to_path_buf),
            };

            let spinner = ProgressBar::new_spinner();
            spinner.set_style(ProgressStyle::with_template("{spinner} {msg} [{elapsed}]")?);
            spinner.set_message(format!(
                "training {} trees",
                settings.params.n_trees
            ));
            spinner.enable_steady_tick(Duration::from_millis(120));
            let outcome = Trainer::new(&resolved.features, &resolved.labels)
                .train(&registry, &rows, &settings);
            spinner.finish_and_clear();
            let outcome = outcome.context("training failed")?;

            for issue in &outcome.issues {
                log::warn!("skipped {}: {}", issue.ward_id, issue.detail);
            }
            outcome.artifact.save(&output)?;
            println!(
                "Model {} written to {} (train {:?}, calibrate {}, evaluate {})",
                outcome.artifact.model_version,
                output.display(),
                outcome.split.training,
                outcome.split.calibration,
                outcome.split.evaluation
            );
            if let Some(m) = &outcome.artifact.metadata.metrics {
                println!(
                    "Hold-out: brier {:.4}, log loss {:.4}, auc {}",
                    m.brier_score,
                    m.log_loss,
                    format_auc(m.roc_auc)
                );
            }
        }
        Commands::ModelInfo {
            path,
            format,
            importance,
        } => {
            let artifact = ModelArtifact::load(&path)
                .with_context(|| format!("failed to load model: {}", path.display()))?;
            let classifier =
                CalibratedClassifier::new(artifact).context("model cannot be used for scoring")?;
            let ranked = classifier.feature_importance();
            match format {
                OutputFormat::Text => print_model_info(&classifier, &ranked, importance),
                OutputFormat::Json => {
                    let top: Vec<_> = ranked.iter().take(importance).collect();
                    let value = serde_json::json!({
                        "model_version": classifier.model_version(),
                        "format_version": classifier.artifact().format_version,
                        "feature_names": classifier.artifact().feature_names,
                        "metadata": classifier.artifact().metadata,
                        "feature_importance": top,
                    });
                    println!("{}", render_json(&value));
                }
            }
        }
        Commands::Config { action } => match action {
            ConfigAction::Validate { path } => {
                let project_root = std::env::current_dir()?;
                let resolved = config::load_and_resolve(&project_root, path.as_deref());

                match resolved {
                    Ok(config) => {
                        if let Some(ref p) = config.config_path {
                            println!("Config valid: {}", p.display());
                        } else {
                            println!("No config file found. Using defaults.");
                        }
                    }
                    Err(e) => {
                        eprintln!("Config validation failed: {:#}", e);
                        std::process::exit(1);
                    }
                }
            }
            ConfigAction::Show { path } => {
                let project_root = std::env::current_dir()?;
                let (engine_config, source) = config::load_config(&project_root, path.as_deref())
                    .context("failed to load configuration")?;
                engine_config
                    .resolve()
                    .context("configuration is invalid")?;

                match source {
                    Some(p) => eprintln!("Source: {}", p.display()),
                    None => eprintln!("Source: defaults (no config file found)"),
                }
                println!("{}", render_json(&engine_config));
            }
        },
    }

    Ok(())
}

fn init_logger() {
    pretty_env_logger::formatted_builder()
        .filter_level(log::LevelFilter::Info)
        .parse_env("RUST_LOG")
        .try_init()
        .ok();
}

fn load_config(config_path: Option<&Path>) -> anyhow::Result<ResolvedConfig> {
    let project_root = std::env::current_dir()?;
    let resolved = config::load_and_resolve(&project_root, config_path)
        .context("failed to load configuration")?;
    if let Some(path) = &resolved.config_path {
        log::info!("using config: {}", path.display());
    }
    Ok(resolved)
}

fn parse_timestamp(s: &str) -> anyhow::Result<NaiveDateTime> {
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .with_context(|| format!("invalid timestamp '{}', expected YYYY-MM-DDTHH:MM[:SS]", s))
}

fn format_auc(auc: Option<f64>) -> String {
    auc.map_or_else(|| "n/a".to_string(), |a| format!("{:.3}", a))
}

fn print_model_info(classifier: &CalibratedClassifier, ranked: &[(String, f64)], top: usize) {
    let artifact = classifier.artifact();
    let meta = &artifact.metadata;

    println!("Model: {}", artifact.model_version);
    println!("  Format version: {}", artifact.format_version);
    println!("  Trained at: {}", meta.trained_at);
    println!("  Trees: {}", artifact.ensemble.trees.len());
    println!(
        "  Seasons: train {:?}, calibrate {}, evaluate {}",
        meta.training_seasons, meta.calibration_season, meta.evaluation_season
    );
    println!(
        "  Rows: {} training, {} calibration (positive weight {:.2})",
        meta.n_train, meta.n_calibration, meta.positive_weight
    );
    if let Some(dir) = meta.data_dir_path() {
        println!("  Data dir: {}", dir.display());
    }
    if let Some(dir) = meta.artifact_dir_path() {
        println!("  Artifact dir: {}", dir.display());
    }
    if let Some(m) = &meta.metrics {
        println!();
        println!("Hold-out ({} rows, {:.1}% positive):", m.n_samples, m.positive_rate * 100.0);
        println!("  brier: {:.4}", m.brier_score);
        println!("  log loss: {:.4}", m.log_loss);
        println!("  auc: {}", format_auc(m.roc_auc));
    }

    println!();
    println!("Feature importance:");
    for (name, share) in ranked.iter().take(top) {
        println!("  {:<24} {:>6.1}%", name, share * 100.0);
    }
}
