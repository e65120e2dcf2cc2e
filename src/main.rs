use clap::{Parser, Subcommand};
use proclens::cli::ingest::IngestArgs;
use proclens::config::load_or_default;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "proclens")]
#[command(about = "Process listing ingestion and query", long_about = None)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a ps/tasklist listing, stage it and materialize it
    Ingest {
        /// linux, unix, mac or windows
        #[arg(long)]
        os_type: String,
        /// Listing file, `-` for stdin
        #[arg(long, default_value = "-")]
        file: PathBuf,
        /// Defaults to the local host name
        #[arg(long)]
        machine_name: Option<String>,
        /// Defaults to the machine name
        #[arg(long)]
        machine_id: Option<String>,
        /// Capture time (ISO-8601); defaults to now
        #[arg(long)]
        timestamp: Option<String>,
    },
    /// Materialize a batch left staged by an earlier run
    Materialize { batch_id: String },
    /// Run a query given as a JSON object (argument or stdin)
    Query { params: Option<String> },
    /// Print one stored process record
    Show { id: i64 },
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Init {
        #[arg(long)]
        stdout: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "proclens=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    if let Commands::Config { action } = &cli.command {
        match action {
            ConfigAction::Init { stdout } => proclens::cli::config::init(*stdout)?,
        }
        return Ok(());
    }

    let (config, _) = load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Ingest {
            os_type,
            file,
            machine_name,
            machine_id,
            timestamp,
        } => {
            let args = IngestArgs {
                os_type,
                file,
                machine_name,
                machine_id,
                timestamp,
            };
            proclens::cli::ingest::run_ingest(&config, args).await?;
        }
        Commands::Materialize { batch_id } => {
            proclens::cli::ingest::run_materialize(&config, &batch_id).await?;
        }
        Commands::Query { params } => {
            proclens::cli::query::run_query(&config, params.as_deref()).await?;
        }
        Commands::Show { id } => {
            proclens::cli::query::run_show(&config, id).await?;
        }
        Commands::Config { .. } => {}
    }

    Ok(())
}
