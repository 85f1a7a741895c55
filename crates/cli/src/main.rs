mod bundle_commands;
mod db_commands;
mod doctor_commands;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    tracing::debug,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use bundle_commands::{KindArg, TypeArg};

#[derive(Parser)]
#[command(name = "plinth", about = "Plinth: plugin and theme bundle manager", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Custom config directory (overrides default ~/.config/plinth/).
    #[arg(long, global = true, env = "PLINTH_CONFIG_DIR")]
    config_dir: Option<PathBuf>,
    /// Custom data directory holding the database, modules and assets.
    #[arg(long, global = true, env = "PLINTH_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Install a bundle from a zip archive.
    Install {
        /// Path to the uploaded `.zip`.
        archive: PathBuf,
        /// Reject the archive unless its manifest declares this kind.
        #[arg(long, value_enum)]
        kind: Option<KindArg>,
    },
    /// Activate an installed bundle.
    Activate { slug: String },
    /// Deactivate an active bundle.
    Deactivate { slug: String },
    /// Remove a bundle, its files and its record.
    Uninstall { slug: String },
    /// List installed bundles.
    List {
        #[arg(long, value_enum)]
        kind: Option<KindArg>,
        /// Only show active bundles.
        #[arg(long, default_value_t = false)]
        active: bool,
        /// Print records as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Show one bundle's record.
    Show {
        slug: String,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Create an empty bundle to start developing from.
    Scaffold {
        /// Display name, e.g. "Media Core".
        name: String,
        #[arg(long = "type", value_enum, default_value_t = TypeArg::Plugin)]
        bundle_type: TypeArg,
    },
    /// Config validation and consistency audit.
    Doctor {
        /// Delete orphan module directories and host entries.
        #[arg(long, default_value_t = false)]
        prune: bool,
    },
    /// Database management.
    Db {
        #[command(subcommand)]
        action: db_commands::DbAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_telemetry(&cli);

    if let Some(ref dir) = cli.config_dir {
        plinth_config::set_config_dir(dir.clone());
    }
    if let Some(ref dir) = cli.data_dir {
        plinth_config::set_data_dir(dir.clone());
    }

    debug!(version = env!("CARGO_PKG_VERSION"), "plinth starting");

    match cli.command {
        Commands::Install { archive, kind } => {
            bundle_commands::install(&archive, kind.map(Into::into)).await
        },
        Commands::Activate { slug } => bundle_commands::activate(&slug).await,
        Commands::Deactivate { slug } => bundle_commands::deactivate(&slug).await,
        Commands::Uninstall { slug } => bundle_commands::uninstall(&slug).await,
        Commands::List { kind, active, json } => {
            bundle_commands::list(kind.map(Into::into), active, json).await
        },
        Commands::Show { slug, json } => bundle_commands::show(&slug, json).await,
        Commands::Scaffold { name, bundle_type } => {
            bundle_commands::scaffold(&name, bundle_type.into()).await
        },
        Commands::Doctor { prune } => doctor_commands::handle_doctor(prune).await,
        Commands::Db { action } => db_commands::handle_db(action).await,
    }
}
