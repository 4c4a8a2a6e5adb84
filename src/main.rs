//! sia CLI: rule mining and link prediction over knowledge graphs.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::Result;

use sia::engine::Engine;
use sia::settings::Settings;

#[derive(Parser)]
#[command(
    name = "sia",
    version,
    about = "Rule mining and link prediction over knowledge graphs"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mine rules and predict missing edges for the configured targets.
    Run {
        /// Path to the JSON configuration file.
        #[arg(long)]
        config: PathBuf,

        /// Re-create the train/test splits before mining.
        #[arg(long)]
        resplit: bool,
    },

    /// Create train/test splits for the configured targets without mining.
    Split {
        /// Path to the JSON configuration file.
        #[arg(long)]
        config: PathBuf,
    },

    /// Load the graph and print its statistics.
    Info {
        /// Path to the JSON configuration file.
        #[arg(long)]
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run { config, resplit } => {
            let settings = Settings::load(&config)?;
            let engine = Engine::new(settings)?;
            let report = engine.run(resplit)?;
            println!("{report}");
        }
        Commands::Split { config } => {
            let settings = Settings::load(&config)?;
            let engine = Engine::new(settings)?;
            engine.split()?;
        }
        Commands::Info { config } => {
            let settings = Settings::load(&config)?;
            let engine = Engine::new(settings)?;
            let store = engine.store();
            let types = store.relation_types().len();
            println!("nodes:          {}", store.node_count());
            println!("edges:          {}", store.edge_count());
            println!("relation types: {types}");
            if types > 0 {
                println!(
                    "instance density: {:.3}",
                    store.edge_count() as f64 / types as f64
                );
            }
            if store.node_count() > 0 {
                println!(
                    "degree:           {:.3}",
                    store.edge_count() as f64 / store.node_count() as f64
                );
            }
        }
    }
    Ok(())
}
