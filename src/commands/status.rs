use anyhow::Result;

use dirscraper_core::config::AppConfig;
use dirscraper_storage::Storage;

pub async fn run(config: AppConfig) -> Result<()> {
    let storage = Storage::new(&config.database.url).await?;

    match storage.check_connectivity().await {
        Ok(()) => println!("Database: connected"),
        Err(e) => {
            println!("Database: ERROR - {}", e);
            return Ok(());
        }
    }

    storage.run_migrations().await?;

    let counts = storage.status_counts().await?;
    let companies = storage.company_count().await?;

    println!("\n╔══════════════════════════════════════════════╗");
    println!("║            DirScraper Status                 ║");
    println!("╠══════════════════════════════════════════════╣");
    println!("║ Targets planned:     {:>19}    ║", counts.planned);
    println!("║ Targets in progress: {:>19}    ║", counts.in_progress);
    println!("║ Targets done:        {:>19}    ║", counts.done);
    println!("║ Targets failed:      {:>19}    ║", counts.failed);
    println!("║ Targets stuck:       {:>19}    ║", counts.stuck);
    println!("║ Targets parked:      {:>19}    ║", counts.parked);
    println!("║ Companies stored:    {:>19}    ║", companies);
    println!("╚══════════════════════════════════════════════╝\n");

    Ok(())
}
