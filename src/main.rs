mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use tracing::warn;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use dirscraper_core::config::AppConfig;

use crate::cli::{Cli, Commands};

fn main() -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async_main())
}

async fn async_main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config_str = std::fs::read_to_string(&cli.config).unwrap_or_else(|_| {
        warn!(path = %cli.config, "config file not found, using defaults");
        include_str!("../config/default.toml").to_string()
    });
    let mut config: AppConfig = toml::from_str(&config_str)?;

    // Environment overrides for the knobs operators actually tune per run.
    if let Ok(v) = std::env::var("DATABASE_URL") {
        config.database.url = v;
    }
    if let Ok(v) = std::env::var("WORKERS") {
        if let Ok(n) = v.parse::<usize>() {
            if n > 0 && n <= 64 {
                config.general.workers = n;
            }
        }
    }
    if let Ok(v) = std::env::var("STATES") {
        let states: Vec<String> = v
            .split(',')
            .map(|s| s.trim().to_ascii_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
        if !states.is_empty() {
            config.general.states = states;
        }
    }
    if let Ok(v) = std::env::var("MAX_PER_STATE") {
        if let Ok(n) = v.parse::<i64>() {
            if n > 0 {
                config.general.max_per_state = n;
            }
        }
    }
    if let Ok(v) = std::env::var("USE_BROWSER") {
        config.fetch.use_browser = v != "0" && v.to_lowercase() != "false";
    }
    if let Ok(v) = std::env::var("MIN_SCORE") {
        if let Ok(n) = v.parse::<u8>() {
            config.filter.min_score = n.min(100);
        }
    }

    match cli.command {
        Commands::Run {
            workers,
            states,
            use_browser,
            graceful_secs,
        } => {
            if let Some(n) = workers {
                config.general.workers = n;
            }
            if let Some(states) = states {
                config.general.states =
                    states.into_iter().map(|s| s.to_ascii_uppercase()).collect();
            }
            if use_browser {
                config.fetch.use_browser = true;
            }
            config.validate()?;
            commands::run::run(config, graceful_secs).await?;
        }
        Commands::Seed {
            cities,
            categories,
            max_pages,
        } => {
            if let Some(path) = cities {
                config.seed.cities_path = path;
            }
            if let Some(path) = categories {
                config.seed.categories_path = path;
            }
            if let Some(cap) = max_pages {
                config.general.max_pages_override = Some(cap);
            }
            commands::seed::run(config).await?;
        }
        Commands::Status => {
            commands::status::run(config).await?;
        }
        Commands::Recover { timeout_minutes } => {
            if let Some(mins) = timeout_minutes {
                config.general.orphan_timeout_minutes = mins;
            }
            commands::recover::run(config).await?;
        }
        Commands::ResetFailed => {
            commands::recover::reset_failed(config).await?;
        }
        Commands::Park { state } => {
            commands::recover::park(config, &state).await?;
        }
    }

    Ok(())
}
