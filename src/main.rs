// AKIG - administration CLI
// Schema setup, demo data, bulk payment imports and arrears recomputation.

use akig::logging::init_logger;
use akig::models::user::insert_user;
use akig::services::arrears::recompute_all;
use akig::services::auth::hash_password;
use akig::services::seed::seed_demo_data;
use akig::{ensure_default_agency, import_file, open_database, Config, Role};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(
    name = "akig",
    version,
    about = "AKIG property management - administration commands"
)]
struct Cli {
    /// SQLite database path (overrides DATABASE_URL)
    #[arg(long, global = true)]
    database: Option<String>,

    /// Agency id (defaults to the first agency, created if missing)
    #[arg(long, global = true)]
    agency: Option<i64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    Migrate,

    /// Load demo owners, sites, tenants and leases
    Seed,

    /// Import a CSV or JSON payment export
    Import {
        /// Path to the file
        file: PathBuf,
    },

    /// Recompute the yearly arrears snapshots
    #[command(name = "recompute-arrears")]
    RecomputeArrears,

    /// Create a user account
    #[command(name = "create-user")]
    CreateUser {
        #[arg(short, long)]
        email: String,
        #[arg(short, long)]
        name: String,
        /// admin, manager, agent, accountant or owner
        #[arg(short, long, default_value = "agent")]
        role: Role,
        /// At least 8 characters
        #[arg(short, long, env = "AKIG_USER_PASSWORD", hide_env_values = true)]
        password: String,
    },
}

fn open(config: &Config) -> Result<Connection> {
    open_database(&config.database_url)
        .with_context(|| format!("failed to open database {}", config.database_url))
}

fn agency_id(conn: &Connection, requested: Option<i64>) -> Result<i64> {
    match requested {
        Some(id) => {
            akig::models::agency::get_agency(conn, id)?;
            Ok(id)
        }
        None => Ok(ensure_default_agency(conn)?),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::from_env().context("invalid configuration")?;
    if let Some(database) = cli.database {
        config.database_url = database;
    }
    init_logger(config.log_format, "akig=info");

    let conn = open(&config)?;
    let agency = agency_id(&conn, cli.agency)?;

    match cli.command {
        Commands::Migrate => {
            info!(database = %config.database_url, "schema applied");
            println!("✓ Database ready: {} (agency {})", config.database_url, agency);
        }
        Commands::Seed => {
            let summary = seed_demo_data(&conn, agency)?;
            println!(
                "🌱 Seeded {} contracts and {} templates",
                summary.contracts_created, summary.templates_created
            );
        }
        Commands::Import { file } => {
            println!("📂 Importing {}...", file.display());
            let report = import_file(&conn, agency, &file, "cli")
                .with_context(|| format!("import of {} failed", file.display()))?;

            println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
            println!("Run #{} ({})", report.run_id, report.status.as_str());
            println!("  rows:       {}", report.counts.rows_total);
            println!("  inserted:   {}", report.counts.rows_inserted);
            println!("  duplicates: {}", report.counts.rows_duplicated);
            println!("  failed:     {}", report.counts.rows_failed);
            for error in &report.errors {
                println!("  ⚠️  {}", error);
            }
            match &report.arrears {
                Some(summary) => println!(
                    "✓ Arrears recomputed: {} snapshots over {} contracts",
                    summary.snapshots, summary.contracts
                ),
                None => println!("⚠️  Arrears not recomputed, run `akig recompute-arrears`"),
            }
        }
        Commands::RecomputeArrears => {
            let summary = recompute_all(&conn, Some(agency))?;
            println!(
                "✓ {} snapshots recomputed ({} contracts, years {:?})",
                summary.snapshots, summary.contracts, summary.years
            );
        }
        Commands::CreateUser {
            email,
            name,
            role,
            password,
        } => {
            let hash = hash_password(&password)?;
            let id = insert_user(&conn, agency, &email, &hash, &name, role)?;
            info!(user_id = id, %role, "user created");
            println!("✓ User #{} created ({}, {})", id, email.trim().to_lowercase(), role);
        }
    }

    Ok(())
}
