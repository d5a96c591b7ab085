//! Keyward operator CLI.
//!
//! Runs migrations, performs the refresh-session retention pass for an
//! external scheduler, and mints signing secrets.

// Import and re-export the `error` module
pub use self::error::{Error, Result};
mod error;

use std::sync::Arc;

use clap::Parser;
use cli::{Cli, Commands, DbArgs};
use keyward_core::auth::AuthService;
use keyward_core::auth::jwt::generate_secret;
use keyward_core::auth::mailer::LogMailer;
use keyward_core::config::AuthConfig;
use keyward_core::refresh::{PgRefreshTokenRepository, RefreshTokenService};
use keyward_core::store::{MemoryStore, TokenStore};
use keyward_core::users::PgUserRepository;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};

mod cli;
mod logging;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    logging::init();

    if let Err(e) = run(Cli::parse()).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(args: Cli) -> Result<()> {
    match args.command {
        Commands::Migrate { db } => {
            let pool = connect(&db).await?;
            info!("running database migrations");
            keyward_core::migrate::migrate(&pool).await?;
            info!("migrations applied");
        }
        Commands::Cleanup {
            db,
            revoked_older_than_days,
        } => {
            if revoked_older_than_days == 0 {
                return Err(Error::Custom(
                    "--revoked-older-than-days must be at least 1".into(),
                ));
            }
            let pool = connect(&db).await?;
            let sessions = session_service(pool);
            let expired = sessions.delete_expired().await?;
            let revoked = sessions
                .delete_revoked(chrono::Duration::days(i64::from(revoked_older_than_days)))
                .await?;
            println!(
                "{}",
                serde_json::json!({ "expiredDeleted": expired, "revokedDeleted": revoked })
            );
        }
        Commands::GenSecret => {
            println!("{}", generate_secret());
        }
        Commands::Version => {
            println!("{} {}", env!("CARGO_PKG_NAME"), keyward_core::version());
        }
    }

    Ok(())
}

async fn connect(db: &DbArgs) -> Result<PgPool> {
    info!(max_connections = db.max_connections, "connecting to database");
    let pool = PgPoolOptions::new()
        .max_connections(db.max_connections)
        .acquire_timeout(std::time::Duration::from_secs(30))
        .connect(&db.database_url)
        .await?;
    Ok(pool)
}

fn session_service(pool: PgPool) -> RefreshTokenService {
    // Retention never signs tokens, so no signing secret is resolved here.
    let config = AuthConfig::from_lookup(String::new(), |k| std::env::var(k).ok());
    let auth = AuthService::new(
        Arc::new(PgUserRepository::new(pool.clone())),
        TokenStore::new(Arc::new(MemoryStore::new())),
        Arc::new(LogMailer),
        config,
    );
    RefreshTokenService::new(Arc::new(PgRefreshTokenRepository::new(pool)), Arc::new(auth))
}
