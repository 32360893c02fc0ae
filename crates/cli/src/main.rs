use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;
mod job;
mod render;
mod spinner;

use job::RenderOptions;
use render::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "kfjob")]
#[command(about = "kfjob - Submit code as a distributed training job on Kubeflow")]
struct Args {
    /// Config file (defaults to ~/.kfjob/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build and submit a source file, then follow its logs
    Run {
        /// Source file with %framework/%ps/%worker/%master lines
        file: PathBuf,
    },
    /// Print the job a source file would create, without submitting it
    Render {
        file: PathBuf,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        namespace: Option<String>,
        /// Image identifier to render with (defaults to the job name)
        #[arg(long)]
        image: Option<String>,
        #[arg(short, long, value_enum, default_value = "table")]
        output: OutputFormat,
    },
    /// Print the TFJob and PyTorchJob CRDs
    Crd,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if args.verbose { "debug" } else { "info" }));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    if let Err(e) = dispatch(args).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn dispatch(args: Args) -> anyhow::Result<()> {
    match args.command {
        Commands::Run { file } => {
            let settings = config::load_settings(args.config.as_deref())?;
            job::handle_run(&file, settings).await
        }
        Commands::Render {
            file,
            name,
            namespace,
            image,
            output,
        } => {
            let settings = config::load_settings(args.config.as_deref())?;
            let options = RenderOptions {
                name,
                namespace,
                image,
            };
            job::handle_render(&file, &options, output, &settings)
        }
        Commands::Crd => job::handle_crd(),
    }
}
