use basin_hydro::backend::Backend;
use basin_hydro::config::Config;
use basin_hydro::pipeline::Pipeline;
use basin_hydro::request::build_snapshot_request;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(
    name = "basin-hydro",
    version,
    about = "Water basin extraction and per-basin time series assembly"
)]
struct Cli {
    /// Path to the YAML configuration
    #[arg(short, long, global = true, default_value = "config/config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the export requests of this run as JSON
    Plan {
        /// Only print a single-snapshot request for this variable
        #[arg(long, requires = "snapshot")]
        variable: Option<String>,
        /// Snapshot index, e.g. 201503
        #[arg(long, requires = "variable")]
        snapshot: Option<String>,
    },
    /// Submit every job not yet submitted
    Submit,
    /// Poll unfinished jobs once and print their states
    Status,
    /// Resubmit a failed job
    Resubmit { name: String },
    /// Parse synced exports and write the assembled tables
    Assemble,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,basin_hydro=debug")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = Config::load(&cli.config).map_err(|e| {
        anyhow::anyhow!(
            "Failed to load configuration from {}: {}\n\n\
             Make sure:\n\
             1. The file exists (see --config)\n\
             2. All referenced environment variables are set (check .env.example)",
            cli.config.display(),
            e
        )
    })?;
    info!("Configuration loaded for run '{}'", config.export.run_prefix);

    let pipeline = Pipeline::new(config);

    match cli.command {
        Command::Plan { variable, snapshot } => {
            let requests = match (variable, snapshot) {
                (Some(variable), Some(snapshot)) => {
                    vec![build_snapshot_request(pipeline.config(), &variable, &snapshot)?]
                }
                _ => pipeline.plan()?,
            };
            let named: serde_json::Map<String, serde_json::Value> = requests
                .into_iter()
                .map(|(name, request)| Ok((name, serde_json::to_value(request)?)))
                .collect::<Result<_, serde_json::Error>>()?;
            println!("{}", serde_json::to_string_pretty(&named)?);
        }
        Command::Submit => {
            let backend = Backend::new(&pipeline.config().backend)?;
            let (registry, summary) = pipeline.submit(&backend).await?;
            println!(
                "submitted {}, skipped {}, {} jobs registered",
                summary.submitted.len(),
                summary.skipped.len(),
                registry.len()
            );
        }
        Command::Status => {
            let backend = Backend::new(&pipeline.config().backend)?;
            let (registry, summary) = pipeline.status(&backend).await?;
            for job in registry.jobs() {
                match &job.error {
                    Some(error) => println!("{:<20} {:<10} {}", job.name, job.state, error),
                    None => println!("{:<20} {:<10} {}", job.name, job.state, job.id),
                }
            }
            if summary.unreachable > 0 {
                println!("{} jobs could not be queried", summary.unreachable);
            }
            if registry.all_completed() && !registry.is_empty() {
                println!("all jobs completed");
            }
        }
        Command::Resubmit { name } => {
            let backend = Backend::new(&pipeline.config().backend)?;
            let job = pipeline.resubmit(&backend, &name).await?;
            println!("resubmitted {} as {}", job.name, job.id);
        }
        Command::Assemble => {
            let assembly = pipeline.assemble()?;
            println!(
                "{} basins, {} timesteps of {}, {} undefined cells after masking",
                assembly.basins.len(),
                assembly.masked.n_rows(),
                pipeline.config().assembly.water_variable,
                assembly.masked.undefined_count()
            );
        }
    }

    Ok(())
}
