use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use quotesync::cli::setup::{setup, setup_at_path};
use quotesync::core::log::init_logging;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

impl From<Commands> for quotesync::AppCommand {
    fn from(cmd: Commands) -> quotesync::AppCommand {
        match cmd {
            Commands::Quotes => quotesync::AppCommand::Quotes,
            Commands::Rates => quotesync::AppCommand::Rates,
            Commands::Show => quotesync::AppCommand::Show,
            Commands::Setup => unreachable!("Setup command should be handled separately"),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// Download security prices
    Quotes,
    /// Download currency exchange rates
    Rates,
    /// Display stored prices and rates
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let result = match cli.command {
        Some(Commands::Setup) => match cli.config_path.as_deref() {
            Some(path) => setup_at_path(path),
            None => setup(),
        },
        Some(cmd) => quotesync::run_command(cmd.into(), cli.config_path.as_deref()).await,
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Application failed");
    }
    result
}
