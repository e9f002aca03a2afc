use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use colored::Colorize;

use droidpilot::driver::AdbDevice;
use droidpilot::{load_action_book, ActionEngine, EngineConfig};

#[derive(Parser)]
#[command(name = "droidpilot")]
#[command(version)]
#[command(about = "Declarative Android UI action engine over adb", long_about = None)]
struct Cli {
    /// Device serial, if more than one device is connected
    #[arg(short, long, global = true)]
    device: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a named action from an action book
    Run {
        /// Path to the YAML action book
        book: PathBuf,

        /// Action id to execute
        action: String,

        /// Directory for failure artifacts
        #[arg(short, long, default_value = "./artifacts")]
        output: PathBuf,
    },

    /// List the actions defined in an action book
    Actions {
        /// Path to the YAML action book
        book: PathBuf,
    },

    /// Report device and boot readiness
    Readiness {
        /// Print the report as JSON
        #[arg(long, default_value = "false")]
        json: bool,
    },
}

fn build_engine(serial: Option<String>, config: EngineConfig) -> anyhow::Result<ActionEngine> {
    build_engine_with(serial, config, Default::default())
}

fn build_engine_with(
    serial: Option<String>,
    config: EngineConfig,
    book: droidpilot::ActionBook,
) -> anyhow::Result<ActionEngine> {
    let device = Arc::new(AdbDevice::new(
        serial,
        Duration::from_millis(config.adb_command_timeout_ms),
    )?);
    Ok(ActionEngine::new(device, book, config))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            book,
            action,
            output,
        } => {
            let book = load_action_book(&book)?;
            let config = EngineConfig {
                artifact_dir: output,
                ..EngineConfig::default()
            };
            let engine = build_engine_with(cli.device, config, book)?;

            println!("{} Running action: {}", "▶".green().bold(), action.cyan());
            match engine.run_action(&action).await {
                Ok(result) => {
                    println!(
                        "{} {} finished in {}ms",
                        "✓".green().bold(),
                        action.cyan(),
                        result.duration_ms
                    );
                }
                Err(err) => {
                    println!("{} {} failed: {}", "✗".red().bold(), action.cyan(), err);
                    std::process::exit(1);
                }
            }
        }

        Commands::Actions { book } => {
            let book = load_action_book(&book)?;
            let mut entries: Vec<_> = book.actions.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            for (id, action) in entries {
                match &action.description {
                    Some(description) => println!("  {}  {}", id.cyan(), description),
                    None => println!("  {}", id.cyan()),
                }
            }
        }

        Commands::Readiness { json } => {
            let engine = build_engine(cli.device, EngineConfig::default())?;
            let readiness = engine.readiness().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&readiness)?);
            } else {
                println!("  device reachable: {}", yes_no(readiness.device_reachable));
                println!("  boot completed:   {}", yes_no(readiness.boot_completed));
            }
        }
    }

    Ok(())
}

fn yes_no(value: bool) -> colored::ColoredString {
    if value {
        "yes".green()
    } else {
        "no".red()
    }
}
