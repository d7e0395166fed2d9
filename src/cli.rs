use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "dirscraper", about = "Business-directory scraping worker pool")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config/default.toml")]
    pub config: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the worker pool
    Run {
        /// Worker count override
        #[arg(short, long)]
        workers: Option<usize>,

        /// State codes to crawl (comma-separated), overriding config
        #[arg(long, value_delimiter = ',')]
        states: Option<Vec<String>>,

        /// Prefer the headless-browser fetch mode
        #[arg(long)]
        use_browser: bool,

        /// Seconds to wait for workers after a stop signal
        #[arg(long, default_value = "90")]
        graceful_secs: u64,
    },
    /// Seed targets from the city registry and category list
    Seed {
        /// Override cities file (state,city,population per line)
        #[arg(long)]
        cities: Option<String>,

        /// Override categories file (one per line)
        #[arg(long)]
        categories: Option<String>,

        /// Cap page_target for every seeded row
        #[arg(long)]
        max_pages: Option<i16>,
    },
    /// Show queue and store counts
    Status,
    /// Reclaim orphaned in-progress targets
    Recover {
        /// Staleness cutoff in minutes
        #[arg(long)]
        timeout_minutes: Option<i64>,
    },
    /// Return failed targets to the queue
    ResetFailed,
    /// Take a state's planned targets out of rotation
    Park {
        /// Two-letter state code
        #[arg(long)]
        state: String,
    },
}
