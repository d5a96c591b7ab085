use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "keyward", about = "Keyward operator tooling", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Apply embedded database migrations.
    Migrate {
        #[command(flatten)]
        db: DbArgs,
    },

    /// Delete expired refresh sessions and long-revoked ones. Meant to be
    /// run by an external scheduler.
    Cleanup {
        #[command(flatten)]
        db: DbArgs,

        /// Revoked sessions older than this many days are deleted.
        #[arg(long, default_value_t = 30)]
        revoked_older_than_days: u32,
    },

    /// Print a fresh random signing secret.
    GenSecret,

    /// Print version information.
    Version,
}

#[derive(clap::Args, Debug)]
pub struct DbArgs {
    /// PostgreSQL connection URL.
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "postgres://localhost:5432/keyward"
    )]
    pub database_url: String,

    /// Maximum number of database connections in the pool.
    #[arg(long, default_value_t = 2)]
    pub max_connections: u32,
}
