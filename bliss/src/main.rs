use bliss::config::BlissConfig;
use bliss::host::Bliss;
use bliss::shutdown::{run_shutdown_hooks, shutdown};
use bliss::VERSION;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand, strum_macros::Display)]
enum Commands {
    /// serve every structure's routes until ctrl-c
    Run {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// print the compiled route table
    Routes {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    Version,
}

fn config(path: Option<PathBuf>) -> anyhow::Result<BlissConfig> {
    Ok(match path {
        Some(path) => BlissConfig::load_from(path)?,
        None => BlissConfig::load()?,
    })
}

fn logging(config: &BlissConfig) {
    let filter = EnvFilter::try_new(config.log.as_str()).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config: path } => {
            let config = config(path)?;
            logging(&config);
            ctrlc::set_handler(move || shutdown(0))?;

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            let code = runtime.block_on(async move {
                let code = bliss::server::run(config).await?;
                run_shutdown_hooks(Duration::from_secs(15)).await;
                Ok::<i32, anyhow::Error>(code)
            })?;
            if code != 0 {
                process::exit(code);
            }
        }
        Commands::Routes { config: path } => {
            let config = config(path)?;
            logging(&config);
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            runtime.block_on(async move {
                let bliss = Bliss::new(&config).await?;
                let snapshot = bliss.routes().snapshot();
                println!("generation {}", snapshot.generation());
                for route in snapshot.routes() {
                    println!(
                        "{:<8} {:<40} structure {} route {}",
                        route.verb.to_string(),
                        route.pattern.source(),
                        route.structure_id,
                        route.route_id
                    );
                }
                bliss.catalog().close().await;
                Ok::<(), anyhow::Error>(())
            })?;
        }
        Commands::Version => {
            println!("{}", VERSION);
        }
    }

    Ok(())
}
