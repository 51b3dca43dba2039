mod commands;
mod composer_client;
mod config;
mod server;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

use crate::commands::{
    cmd_catalog_import, cmd_family_add, cmd_profile_set, cmd_profile_show, cmd_week_generate,
    cmd_week_show,
};
use crate::composer_client::HttpComposer;
use crate::config::Config;
use dietweek_core::composer::DiversityLevel;
use dietweek_core::db::Database;
use dietweek_core::service::{GenerateRequest, WeeklyDietService};

#[derive(Parser)]
#[command(
    name = "dietweek",
    version,
    about = "Weekly diet plan backend: generation, storage and nutrition checks"
)]
struct Cli {
    /// Directory holding the database and API key (default: platform data dir)
    #[arg(long, global = true, env = "DIETWEEK_DATA_DIR", value_name = "PATH")]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the REST API server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080", env = "DIETWEEK_PORT")]
        port: u16,
        /// Address to bind to (default: 127.0.0.1, use 0.0.0.0 to expose to network)
        #[arg(short, long, default_value = "127.0.0.1", env = "DIETWEEK_BIND")]
        bind: String,
        /// Disable API key authentication (for development/testing)
        #[arg(long, env = "DIETWEEK_NO_AUTH")]
        no_auth: bool,
        /// URL the meal composer accepts plan requests on
        #[arg(long, env = "DIETWEEK_COMPOSER_URL")]
        composer_url: String,
        /// Hide error details from API responses
        #[arg(long, env = "DIETWEEK_PRODUCTION")]
        production: bool,
    },
    /// Manage a user's health profile
    Profile {
        #[command(subcommand)]
        command: ProfileCommands,
    },
    /// Manage a user's family members
    Family {
        #[command(subcommand)]
        command: FamilyCommands,
    },
    /// Manage the recipe catalog used for nutrition checks
    Catalog {
        #[command(subcommand)]
        command: CatalogCommands,
    },
    /// Show or generate weekly plans
    Week {
        #[command(subcommand)]
        command: WeekCommands,
    },
}

#[derive(Subcommand)]
enum ProfileCommands {
    /// Store a health profile from a JSON file (creates the user if needed)
    Set {
        /// Authenticated subject id of the user
        auth_id: String,
        /// Path to the profile JSON
        file: PathBuf,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the stored health profile and family members
    Show {
        /// Authenticated subject id of the user
        auth_id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum FamilyCommands {
    /// Add a family member
    Add {
        /// Authenticated subject id of the user
        auth_id: String,
        /// Member name
        name: String,
        /// Optional path to the member's profile JSON
        file: Option<PathBuf>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum CatalogCommands {
    /// Import recipes from a JSON file (array, or object with a `recipes` array)
    Import {
        /// Path to the catalog JSON
        file: PathBuf,
        /// Parse the file without writing to the database
        #[arg(long)]
        dry_run: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum WeekCommands {
    /// Show a stored week
    Show {
        /// Authenticated subject id of the user
        auth_id: String,
        /// this, next, YYYY-MM-DD or YYYY-Www
        #[arg(default_value = "this")]
        week: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Generate (or regenerate) a week through the meal composer
    Generate {
        /// Authenticated subject id of the user
        auth_id: String,
        /// this, next, YYYY-MM-DD or YYYY-Www
        #[arg(default_value = "this")]
        week: String,
        /// URL the meal composer accepts plan requests on
        #[arg(long, env = "DIETWEEK_COMPOSER_URL")]
        composer_url: String,
        /// Allow recipes used in the previous version of the week
        #[arg(long)]
        allow_repeats: bool,
        /// Diversity level: low, medium, high
        #[arg(long)]
        diversity: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.data_dir.as_deref())?;
    let db = Database::open(&config.db_path)?;

    match cli.command {
        Commands::Serve {
            port,
            bind,
            no_auth,
            composer_url,
            production,
        } => {
            let api_key = if no_auth {
                None
            } else {
                Some(config.load_or_create_api_key()?.0)
            };
            let composer = HttpComposer::new(&composer_url)?;
            let service = WeeklyDietService::new(Arc::new(Mutex::new(db)), Arc::new(composer));
            server::start_server(service, port, &bind, api_key, production).await
        }
        Commands::Profile { command } => match command {
            ProfileCommands::Set {
                auth_id,
                file,
                json,
            } => cmd_profile_set(&db, &auth_id, &file, json),
            ProfileCommands::Show { auth_id, json } => cmd_profile_show(&db, &auth_id, json),
        },
        Commands::Family { command } => match command {
            FamilyCommands::Add {
                auth_id,
                name,
                file,
                json,
            } => cmd_family_add(&db, &auth_id, &name, file.as_deref(), json),
        },
        Commands::Catalog { command } => match command {
            CatalogCommands::Import {
                file,
                dry_run,
                json,
            } => cmd_catalog_import(&db, &file, dry_run, json),
        },
        Commands::Week { command } => match command {
            WeekCommands::Show {
                auth_id,
                week,
                json,
            } => cmd_week_show(&Arc::new(Mutex::new(db)), &auth_id, &week, json).await,
            WeekCommands::Generate {
                auth_id,
                week,
                composer_url,
                allow_repeats,
                diversity,
                json,
            } => {
                let diversity_level = diversity
                    .as_deref()
                    .map(str::parse::<DiversityLevel>)
                    .transpose()?;
                let composer = HttpComposer::new(&composer_url)?;
                let service = WeeklyDietService::new(Arc::new(Mutex::new(db)), Arc::new(composer));
                let request = GenerateRequest {
                    week_start_date: Some(week),
                    week_type: None,
                    avoid_recent_recipes: Some(!allow_repeats),
                    diversity_level,
                };
                cmd_week_generate(&service, &auth_id, &request, json).await
            }
        },
    }
}
