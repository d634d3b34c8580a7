//! Fill a development database with demo catalog, users and loans
//!
//! Usage:
//!   libris-seed --users 25 --loans 75
//!   libris-seed --clear

use anyhow::Context;
use clap::Parser;
use rand::{rngs::StdRng, SeedableRng};
use sqlx::postgres::PgPoolOptions;

use libris_server::{
    clock::{Clock, SystemClock},
    config::AppConfig,
    seed::{self, SeedOptions},
};

#[derive(Parser, Debug)]
#[command(name = "libris-seed")]
#[command(about = "Seed the Libris database with demo data")]
#[command(version)]
struct Args {
    /// Delete loans, catalog and non-staff users first
    #[arg(long)]
    clear: bool,

    /// Readers to create
    #[arg(long, default_value_t = 25)]
    users: usize,

    /// Loan records to create
    #[arg(long, default_value_t = 75)]
    loans: usize,

    /// Random seed, for a reproducible data set
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let config = AppConfig::load().context("Failed to load configuration")?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("libris_server={},libris_seed=info", config.logging.level).into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(&config.database.url)
        .await
        .context("Failed to connect to database")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let options = SeedOptions {
        users: args.users,
        loans: args.loans,
    };
    let plan = seed::plan(&mut rng, &options, SystemClock.now());

    let summary = seed::apply(&pool, &plan, args.clear)
        .await
        .context("Failed to seed database")?;

    tracing::info!(
        categories = summary.categories,
        authors = summary.authors,
        books = summary.books,
        users = summary.users,
        loans = summary.loans,
        "Database seeded"
    );

    Ok(())
}
