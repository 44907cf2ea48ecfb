//! Throttle CLI tool.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "throttle")]
#[command(about = "Concurrency throttle admission controller", long_about = None)]
struct Cli {
    /// Throttle configuration file
    #[arg(long, global = true, env = "THROTTLE_CONFIG", default_value = "throttle.kdl")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a throttle configuration
    Validate,
    /// Explain whether a job would be admitted
    Explain {
        /// Job to check
        #[arg(long)]
        job: String,
        /// Node or label the job asks for
        #[arg(long)]
        node: Option<String>,
        /// Runs already holding a node, as <job>@<node>
        #[arg(long = "running")]
        running: Vec<String>,
        /// Build parameters of the checked job, as NAME=VALUE
        #[arg(long = "param")]
        params: Vec<String>,
        /// Print the decision as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate => {
            commands::validate(&cli.config)?;
        }
        Commands::Explain {
            job,
            node,
            running,
            params,
            json,
        } => {
            let request = commands::explain::ExplainRequest {
                job,
                node,
                running,
                params,
            };
            commands::explain::run(&cli.config, &request, json)?;
        }
    }

    Ok(())
}
