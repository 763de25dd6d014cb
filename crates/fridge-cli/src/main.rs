use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fridge_core::SystemClock;
use fridge_identity::{JwtConfig, JwtIdentity};
use fridge_lifecycle::{apply_seed, load_seed_file, ExpirySweeper, LifecycleConfig, ListingService};
use fridge_storage::{PgStore, StoreBackend, Stores};
use fridge_web::{AppState, WebConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "fridge-cli")]
#[command(about = "Community fridge listing service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the HTTP API.
    Serve {
        /// YAML file of users and listings to load before serving.
        #[arg(long)]
        seed: Option<PathBuf>,
    },
    /// Apply the embedded SQL migrations to DATABASE_URL.
    Migrate,
    /// Move overdue available listings to expired, once.
    Sweep,
    /// Load users and listings from a YAML file.
    Seed { path: PathBuf },
    /// Mint a bearer token for a user id.
    Token {
        user_id: Uuid,
        #[arg(long, default_value_t = 24)]
        ttl_hours: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve { seed: None }) {
        Commands::Serve { seed } => serve(seed.as_deref()).await?,
        Commands::Migrate => {
            let StoreBackend::Postgres { database_url } = StoreBackend::from_env() else {
                anyhow::bail!("migrate needs DATABASE_URL pointing at PostgreSQL");
            };
            let store = PgStore::connect(&database_url).await.context("connecting to postgres")?;
            store.migrate().await.context("applying migrations")?;
            println!("migrations applied");
        }
        Commands::Sweep => {
            let stores = open_stores().await?;
            let sweeper = ExpirySweeper::new(stores.listings.clone(), Arc::new(SystemClock));
            let moved = sweeper.sweep_once().await.context("running expiry sweep")?;
            println!("expiry sweep complete: expired={moved}");
        }
        Commands::Seed { path } => {
            let backend = StoreBackend::from_env();
            if matches!(backend, StoreBackend::Memory) {
                warn!("seeding the in-memory store; data is discarded on exit, use `serve --seed` instead");
            }
            let stores = Stores::connect(&backend).await.context("opening store")?;
            let service = ListingService::new(&stores, LifecycleConfig::from_env());
            let summary = seed(&stores, &service, &path).await?;
            println!(
                "seed complete: users_created={} users_existing={} listings_created={}",
                summary.users_created, summary.users_existing, summary.listings_created
            );
        }
        Commands::Token { user_id, ttl_hours } => {
            let identity = JwtIdentity::new(&JwtConfig::from_env());
            let token = identity
                .issue(user_id, chrono::Duration::hours(ttl_hours))
                .context("minting token")?;
            println!("{token}");
        }
    }

    Ok(())
}

async fn open_stores() -> Result<Stores> {
    Stores::connect(&StoreBackend::from_env()).await.context("opening store")
}

async fn seed(stores: &Stores, service: &ListingService, path: &Path) -> Result<fridge_lifecycle::SeedSummary> {
    let file = load_seed_file(path).await?;
    apply_seed(stores.users.as_ref(), service, &file).await
}

async fn serve(seed_path: Option<&Path>) -> Result<()> {
    let stores = open_stores().await?;
    let config = LifecycleConfig::from_env();
    let service = ListingService::new(&stores, config.clone());

    if let Some(path) = seed_path {
        let summary = seed(&stores, &service, path).await?;
        info!(
            users_created = summary.users_created,
            listings_created = summary.listings_created,
            "preloaded seed data"
        );
    }

    let sweeper = ExpirySweeper::new(stores.listings.clone(), Arc::new(SystemClock));
    let mut scheduler = sweeper.maybe_build_scheduler(&config).await?;
    if let Some(sched) = &scheduler {
        sched.start().await.context("starting expiry sweep scheduler")?;
    }

    let identity = Arc::new(JwtIdentity::new(&JwtConfig::from_env()));
    let result = fridge_web::serve(AppState::new(service, identity), WebConfig::from_env()).await;

    if let Some(sched) = scheduler.as_mut() {
        sched.shutdown().await.context("stopping expiry sweep scheduler")?;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_is_the_default_command() {
        let cli = Cli::try_parse_from(["fridge-cli"]).unwrap();
        assert!(cli.command.is_none());

        let cli = Cli::try_parse_from(["fridge-cli", "serve", "--seed", "seed/sample.yaml"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Serve { seed: Some(_) })));
    }

    #[test]
    fn token_takes_a_user_id_and_ttl() {
        let id = Uuid::new_v4();
        let cli = Cli::try_parse_from(["fridge-cli", "token", &id.to_string(), "--ttl-hours", "2"]).unwrap();
        match cli.command {
            Some(Commands::Token { user_id, ttl_hours }) => {
                assert_eq!(user_id, id);
                assert_eq!(ttl_hours, 2);
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert!(Cli::try_parse_from(["fridge-cli", "token", "not-a-uuid"]).is_err());
    }
}
