use anyhow::Result;
use clap::Parser;

use hidscope::cli::{Cli, Commands};
use hidscope::commands;
use hidscope::printer::{OutputFormat, PrinterConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Diagnostics go to stderr so stdout stays clean for envelope output
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("hidscope=info".parse()?)
                .add_directive("hidscope_capture=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let filter = commands::build_filter(cli.filter, &cli.categories)?;

    match cli.command.unwrap_or(Commands::Monitor {
        vid: None,
        pid: None,
    }) {
        Commands::Monitor { vid, pid } => commands::monitor::run(vid, pid, filter, cli.hex).await,
        Commands::Log {
            vid,
            pid,
            json,
            output,
        } => {
            let config = PrinterConfig {
                show_hex: cli.hex,
                format: if json {
                    OutputFormat::Json
                } else {
                    OutputFormat::Text
                },
                filter,
            };
            commands::log::run(vid, pid, config, output).await
        }
        Commands::Replay { file, json } => {
            let config = PrinterConfig {
                show_hex: cli.hex,
                format: if json {
                    OutputFormat::Json
                } else {
                    OutputFormat::Text
                },
                filter,
            };
            commands::replay::run(file, config).await
        }
        Commands::Devices => commands::devices::run(),
    }
}
