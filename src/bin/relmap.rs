//! relmap CLI
//!
//! Loads a setup from configuration, then checks, lists, plans or graphs it.

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use relmap::{ComponentKind, Setup, SetupConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "relmap")]
#[command(about = "Check, inspect and plan relmap setups")]
struct Cli {
    /// Config file layered over the default locations
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Finalize the setup and report what was built
    Check,

    /// List component keys after finalize
    Keys {
        /// Only this kind (e.g. relations, command)
        #[arg(short, long)]
        kind: Option<String>,
    },

    /// Print the build order without building anything
    Plan,

    /// Export the build plan to DOT
    Graph {
        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show or create configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the merged configuration as TOML
    Show,

    /// Write a starter relmap.toml
    Init {
        #[arg(default_value = "relmap.toml")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("❌ {:#}", e);
        std::process::exit(1);
    }
}

fn load(path: Option<&str>) -> anyhow::Result<(SetupConfig, Setup)> {
    let config = SetupConfig::load_from(path).context("Failed to load configuration")?;
    let setup = Setup::from_config(&config).context("Failed to declare components")?;
    Ok((config, setup))
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let path = cli.config.as_deref();

    match cli.command {
        Commands::Check => {
            let (_, mut setup) = load(path)?;
            println!("🔍 Finalizing setup {}...", setup.provider());
            let runtime = setup.finalize()?;
            for kind in ComponentKind::ALL {
                let count = runtime.elements().keys(kind).len();
                if count > 0 {
                    println!("  ✅ {} {}", count, kind);
                }
            }
            println!();
            println!("✅ Finalized {} components", runtime.build_order().len());
            println!("   fingerprint {}", runtime.fingerprint());
        }

        Commands::Keys { kind } => {
            let kinds = match kind {
                Some(name) => match name.parse::<ComponentKind>() {
                    Ok(kind) => vec![kind],
                    Err(e) => bail!(e),
                },
                None => ComponentKind::ALL.to_vec(),
            };
            let (_, mut setup) = load(path)?;
            let runtime = setup.finalize()?;
            for kind in kinds {
                let keys = runtime.elements().keys(kind);
                if keys.is_empty() {
                    continue;
                }
                println!("{}:", kind);
                for key in keys {
                    println!("  {}", key);
                }
            }
        }

        Commands::Plan => {
            let (_, setup) = load(path)?;
            let plan = setup.plan()?;
            println!("📋 Build plan: {} components, {} dependencies", plan.len(), plan.edge_count());
            for (step, node) in plan.order().enumerate() {
                let deps: Vec<String> = plan
                    .dependencies_of(node.kind, &node.key)
                    .into_iter()
                    .map(|d| d.label())
                    .collect();
                if deps.is_empty() {
                    println!("  {:>3}. {}", step + 1, node.label());
                } else {
                    println!("  {:>3}. {}  ← {}", step + 1, node.label(), deps.join(", "));
                }
            }
        }

        Commands::Graph { output } => {
            let (_, setup) = load(path)?;
            let dot = setup.plan()?.to_dot();
            match output {
                Some(output) => {
                    std::fs::write(&output, &dot)
                        .with_context(|| format!("Failed to write {:?}", output))?;
                    println!("✅ Exported DOT to: {:?}", output);
                }
                None => print!("{}", dot),
            }
        }

        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let config = SetupConfig::load_from(path).context("Failed to load configuration")?;
                print!("{}", toml::to_string_pretty(&config)?);
            }
            ConfigAction::Init { path, force } => {
                if path.exists() && !force {
                    bail!("{:?} already exists (use --force to overwrite)", path);
                }
                SetupConfig::sample().save(&path)?;
                println!("✅ Wrote {:?}", path);
            }
        },
    }

    Ok(())
}
