use std::env;
use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result, anyhow, bail};
use review_sentiment_worker::config::Config;
use review_sentiment_worker::replay::{ReplayConfig, replay_reviews};

#[tokio::main]
async fn main() -> Result<()> {
    let config = parse_args()?;
    let summary = replay_reviews(config).await?;
    let rendered =
        serde_json::to_string_pretty(&summary).context("failed to render replay summary")?;
    println!("{rendered}");
    Ok(())
}

fn parse_args() -> Result<ReplayConfig> {
    let mut dataset = None;
    let mut app_id = None;
    let mut model_dir = None;
    let mut overrides = None;
    let mut language = None;
    let mut engine_version = None;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--dataset" => {
                let value = args.next().context("--dataset requires a path argument")?;
                dataset = Some(PathBuf::from(value));
            }
            "--app-id" => {
                let value = args.next().context("--app-id requires a Steam app id")?;
                let parsed = value
                    .parse::<u64>()
                    .context("--app-id must be an integer")?;
                app_id = Some(parsed);
            }
            "--model-dir" => {
                let value = args.next().context("--model-dir requires a path argument")?;
                model_dir = Some(PathBuf::from(value));
            }
            "--overrides" => {
                let value = args.next().context("--overrides requires a path argument")?;
                overrides = Some(PathBuf::from(value));
            }
            "--language" => {
                let value = args
                    .next()
                    .context("--language requires an ISO 639-1 code (e.g. en)")?;
                language = Some(value);
            }
            "--engine-version" => {
                let value = args.next().context("--engine-version requires a label")?;
                engine_version = Some(value);
            }
            "--help" => {
                print_usage();
                process::exit(0);
            }
            _ => {
                bail!("unknown argument: {}", arg);
            }
        }
    }

    let dataset = dataset.ok_or_else(|| anyhow!("--dataset is required"))?;
    let env_config = Config::from_env().context("failed to load REVIEW_* configuration")?;
    let mut config = ReplayConfig::from_config(dataset, &env_config);
    config.app_id = app_id;
    if overrides.is_some() {
        config.lexicon_overrides = overrides;
    }
    if model_dir.is_some() {
        config.model_dir = model_dir;
    }
    if let Some(language) = language {
        config.gate.target_language = language.trim().to_lowercase();
    }
    if let Some(engine_version) = engine_version {
        config.engine_version = engine_version;
    }

    Ok(config)
}

fn print_usage() {
    eprintln!(
        "Usage: replay_reviews --dataset <path> [--app-id <id>] [--model-dir <dir>] [--overrides <yaml>] [--language en] [--engine-version hybrid_v2]\n\n\
         Gate, lexicon and context settings come from the same REVIEW_* environment as the server.\n\
         Command-line flags take precedence over the environment."
    );
}
