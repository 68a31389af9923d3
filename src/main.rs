use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;

use hostlock::cli::{self, Cli, Commands, exit_code, exit_codes};
use hostlock::config::Config;

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Background leader start must fork BEFORE the Tokio runtime exists
    #[cfg(unix)]
    if let Commands::Leader(ref args) = cli.command
        && let cli::leader::LeaderCommands::Start {
            foreground: false,
            ref sockets_path,
        } = args.command
    {
        return report(cli::leader::daemonize_and_run(
            cli.config.as_deref(),
            sockets_path.as_deref(),
        ));
    }

    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(anyhow::Error::from)
        .and_then(|runtime| runtime.block_on(async_main(cli)));
    report(result)
}

async fn async_main(cli: Cli) -> Result<()> {
    init_logging(&cli);

    let config_override = cli.config.as_deref();
    match cli.command {
        Commands::Lock(args) => cli::lock::run(args, config_override).await,
        Commands::Leader(args) => cli::leader::run(args, config_override).await,
        Commands::Config(args) => cli::config::run(args, config_override).await,
        Commands::Paths => cli::paths::run(config_override),
    }
}

/// Logs go to stderr so command output on stdout stays clean.
fn init_logging(cli: &Cli) {
    let log_level = if cli.verbose {
        "debug".to_string()
    } else {
        // A broken config file is reported by the command itself
        Config::load_with_override(cli.config.as_deref())
            .map(|config| config.logging.level)
            .unwrap_or_else(|_| "info".to_string())
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn report(result: Result<()>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::from(exit_codes::SUCCESS),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}
