use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};

use favgraph::config::{Config, SIMILAR_SENTINEL};
use favgraph::crawler::{self, CrawlPlan, CrawlStats};
use favgraph::ratelimit::RateGate;
use favgraph::remote::HttpCatalog;
use favgraph::sampler::{self, SampleStats};
use favgraph::similar;
use favgraph::store::Store;

/// Id span re-walked by `run` so recent favorite counts stay fresh.
const RUN_REWALK_SPAN: i64 = 1000;

#[derive(Parser)]
#[command(author, version = env!("CARGO_PKG_VERSION"), about = "Catalog crawler and shared-favoriter similarity engine", long_about = None)]
struct Cli {
    /// Database file
    #[arg(long, global = true)]
    db: Option<String>,

    /// Remote catalog base URL
    #[arg(long, global = true)]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema
    Init,

    /// Walk the catalog downward between explicit id bounds
    Crawl {
        /// Start below this id (default: the newest remote item)
        #[arg(long)]
        before_id: Option<i64>,

        /// Stop once a page dips below this id
        #[arg(long, default_value = "0")]
        after_id: i64,

        /// Stop after fetching at least this many items
        #[arg(long)]
        max_items: Option<usize>,
    },

    /// Extend the catalog downward from the oldest stored item
    Backfill,

    /// Fetch items newer than the newest stored item
    Update {
        /// Also re-walk this many of the newest known ids
        #[arg(long, default_value = "0")]
        rewalk: i64,
    },

    /// Fetch the newest items
    Recent {
        /// How many items to fetch
        #[arg(default_value = "1000")]
        count: usize,
    },

    /// Sample favoriter sets for items that still lack them
    Sample,

    /// Show the most similar items for a source id
    Similar {
        /// Source item id
        id: i64,

        /// Recompute cached results older than this many hours
        #[arg(long)]
        max_age_hours: Option<u64>,

        /// Print content URLs instead of ids
        #[arg(long)]
        urls: bool,
    },

    /// Print content URLs for item ids
    Urls {
        /// Item ids
        #[arg(required = true)]
        ids: Vec<i64>,
    },

    /// Update (or first-crawl) the catalog, then sample favorites
    Run,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::default();
    if let Some(db) = cli.db {
        config.db_path = db;
    }
    if let Some(base_url) = cli.base_url {
        config.base_url = base_url;
    }

    match cli.command {
        Commands::Init => {
            let mut store = Store::open(&config.db_path)?;
            if store.initialize_schema()? {
                println!("Initialized {}", config.db_path);
            } else {
                println!("Schema already present in {}", config.db_path);
            }
        }

        Commands::Crawl {
            before_id,
            after_id,
            max_items,
        } => {
            let mut store = open_store(&config)?;
            let source = HttpCatalog::new(&config)?;
            let gate = RateGate::new(config.page_interval);
            let plan = CrawlPlan {
                before_id,
                after_id,
                max_items,
            };
            report_crawl(crawler::crawl(&mut store, &source, &gate, &plan)?);
        }

        Commands::Backfill => {
            let mut store = open_store(&config)?;
            let source = HttpCatalog::new(&config)?;
            let gate = RateGate::new(config.page_interval);
            report_crawl(crawler::backfill(&mut store, &source, &gate)?);
        }

        Commands::Update { rewalk } => {
            let mut store = open_store(&config)?;
            let source = HttpCatalog::new(&config)?;
            let gate = RateGate::new(config.page_interval);
            report_crawl(crawler::update_rewalking(&mut store, &source, &gate, rewalk)?);
        }

        Commands::Recent { count } => {
            let mut store = open_store(&config)?;
            let source = HttpCatalog::new(&config)?;
            let gate = RateGate::new(config.page_interval);
            report_crawl(crawler::recent(&mut store, &source, &gate, count)?);
        }

        Commands::Sample => {
            let mut store = open_store(&config)?;
            let source = HttpCatalog::new(&config)?;
            let gate = RateGate::new(config.favorites_interval);
            report_sample(sampler::sample_favorites(&mut store, &source, &gate)?);
        }

        Commands::Similar {
            id,
            max_age_hours,
            urls,
        } => {
            let mut store = open_store(&config)?;
            let max_age = max_age_hours
                .map(|hours| Duration::from_secs(hours * 3600))
                .unwrap_or(config.similar_max_age);
            let ranked: Vec<i64> = similar::get_similar(&mut store, id, max_age)?
                .into_iter()
                .filter(|&candidate| candidate != SIMILAR_SENTINEL)
                .collect();
            if ranked.is_empty() {
                println!("No similar items recorded for {}", id);
            } else if urls {
                for url in store.get_content_urls(&ranked)? {
                    println!("{}", url);
                }
            } else {
                for candidate in ranked {
                    println!("{}", candidate);
                }
            }
        }

        Commands::Urls { ids } => {
            let store = open_store(&config)?;
            for url in store.get_content_urls(&ids)? {
                println!("{}", url);
            }
        }

        Commands::Run => {
            let mut store = Store::open(&config.db_path)?;
            let fresh = store.initialize_schema()?;
            let source = HttpCatalog::new(&config)?;
            let page_gate = RateGate::new(config.page_interval);

            let stats = if fresh {
                println!("New database; walking the full catalog.");
                crawler::crawl(&mut store, &source, &page_gate, &CrawlPlan::default())?
            } else {
                crawler::update_rewalking(&mut store, &source, &page_gate, RUN_REWALK_SPAN)?
            };
            report_crawl(stats);

            let fav_gate = RateGate::new(config.favorites_interval);
            report_sample(sampler::sample_favorites(&mut store, &source, &fav_gate)?);
        }
    }

    Ok(())
}

/// Open the database and make sure the schema exists.
fn open_store(config: &Config) -> Result<Store> {
    let mut store = Store::open(&config.db_path)?;
    store.initialize_schema()?;
    Ok(store)
}

fn report_crawl(stats: CrawlStats) {
    println!("Crawled {} items across {} pages.", stats.items, stats.pages);
}

fn report_sample(stats: SampleStats) {
    println!(
        "Sampled {} items ({} favoriter edges).",
        stats.sampled, stats.edges
    );
}
