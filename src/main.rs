mod cli;
mod core;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::core::config::AppConfig;

#[derive(Parser)]
#[command(name = "azcost", about = "Azure subscription cost reports", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file (default: $XDG_CONFIG_HOME/azcost/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true)]
    format: Option<String>,

    /// Shorthand for --format json
    #[arg(short = 'j', long = "json", global = true)]
    json: bool,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pretty: bool,

    /// Disable ANSI colors
    #[arg(long, global = true)]
    no_color: bool,

    /// Verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// No logging
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch costs, render the report and deliver it
    Report {
        /// Also write the HTML report to this file
        #[arg(long, value_name = "PATH")]
        preview: Option<PathBuf>,

        /// Do not send email or webhook notifications
        #[arg(long)]
        no_send: bool,

        /// Only report on this subscription (repeatable)
        #[arg(short, long = "subscription", value_name = "ID")]
        subscriptions: Vec<String>,
    },
    /// Manage the cached API token
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum TokenAction {
    /// Delete the cached token and its encryption key
    Clear,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Generate a config file template
    Init,
    /// Validate config file and environment
    Check,
    /// Print the effective config with secrets masked
    Show,
}

fn setup_logging(verbose: bool, quiet: bool) {
    if quiet {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("azcost=debug,info")
        } else {
            EnvFilter::new("azcost=info,warn")
        }
    });

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .without_time()
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    setup_logging(cli.verbose, cli.quiet);

    let output_opts = cli::output::OutputOptions {
        format: if cli.json {
            cli::output::OutputFormat::Json
        } else {
            match cli.format.as_deref() {
                Some("json") => cli::output::OutputFormat::Json,
                _ => cli::output::OutputFormat::Text,
            }
        },
        pretty: cli.pretty,
        use_color: cli::output::detect_color(!cli.no_color),
        verbose: cli.verbose,
        quiet: cli.quiet,
    };

    let config_path = cli.config.clone().unwrap_or_else(AppConfig::config_path);

    match cli.command {
        None => {
            let config = AppConfig::load(Some(config_path.as_path()))?;
            let args = cli::report_cmd::ReportArgs::default();
            cli::report_cmd::run(&config, &args, &output_opts).await?;
        }
        Some(Commands::Report {
            preview,
            no_send,
            subscriptions,
        }) => {
            let config = AppConfig::load(Some(config_path.as_path()))?;
            let args = cli::report_cmd::ReportArgs {
                preview,
                no_send,
                subscriptions,
            };
            cli::report_cmd::run(&config, &args, &output_opts).await?;
        }
        Some(Commands::Token { action }) => match action {
            TokenAction::Clear => {
                let config = AppConfig::load(Some(config_path.as_path()))?;
                cli::token_cmd::clear(&config, &output_opts).await?;
            }
        },
        Some(Commands::Config { action }) => match action {
            ConfigAction::Init => cli::config_cmd::init(&config_path, &output_opts)?,
            ConfigAction::Check => {
                let config = AppConfig::load(Some(config_path.as_path()))?;
                cli::config_cmd::check(&config_path, &config, &output_opts)?;
            }
            ConfigAction::Show => {
                let config = AppConfig::load(Some(config_path.as_path()))?;
                cli::config_cmd::show(&config, &output_opts)?;
            }
        },
    }

    Ok(())
}
