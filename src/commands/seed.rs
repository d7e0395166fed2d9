use anyhow::{Context, Result};
use tracing::info;

use dirscraper_core::config::AppConfig;
use dirscraper_parser::YellowPages;
use dirscraper_storage::{CityRow, Storage};

/// `state,city,population` per line; blank lines and `#` comments skipped.
fn parse_cities(content: &str) -> Result<Vec<CityRow>> {
    let mut cities = Vec::new();
    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let parts: Vec<&str> = line.split(',').map(|p| p.trim()).collect();
        let [state, city, population] = parts.as_slice() else {
            anyhow::bail!("cities line {}: expected state,city,population", lineno + 1);
        };
        if state.len() != 2 {
            anyhow::bail!("cities line {}: bad state code {state:?}", lineno + 1);
        }
        cities.push(CityRow {
            state: state.to_ascii_uppercase(),
            city: city.to_string(),
            population: population
                .parse()
                .with_context(|| format!("cities line {}: bad population", lineno + 1))?,
        });
    }
    Ok(cities)
}

fn parse_categories(content: &str) -> Vec<String> {
    content
        .lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(|l| l.to_string())
        .collect()
}

pub async fn run(config: AppConfig) -> Result<()> {
    let cities_raw = std::fs::read_to_string(&config.seed.cities_path)
        .with_context(|| format!("reading {}", config.seed.cities_path))?;
    let categories_raw = std::fs::read_to_string(&config.seed.categories_path)
        .with_context(|| format!("reading {}", config.seed.categories_path))?;

    let wanted_states: Vec<String> = config
        .general
        .states
        .iter()
        .map(|s| s.to_ascii_uppercase())
        .collect();
    let cities: Vec<CityRow> = parse_cities(&cities_raw)?
        .into_iter()
        .filter(|c| wanted_states.contains(&c.state))
        .collect();
    let categories = parse_categories(&categories_raw);
    if cities.is_empty() {
        anyhow::bail!("no cities matched the configured states");
    }
    if categories.is_empty() {
        anyhow::bail!("category list is empty");
    }

    let storage = Storage::new(&config.database.url).await?;
    storage.run_migrations().await?;

    let directory = YellowPages::new(&config.directory.base_url);
    let inserted = storage
        .seed_targets(
            &cities,
            &categories,
            &directory,
            config.general.max_pages_override,
        )
        .await?;

    info!(
        inserted,
        cities = cities.len(),
        categories = categories.len(),
        "seeding complete"
    );
    println!(
        "Seeded {} new targets ({} cities x {} categories).",
        inserted,
        cities.len(),
        categories.len()
    );
    Ok(())
}
