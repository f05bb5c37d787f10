//! focusdns CLI
//!
//! Command-line interface for the DNS-level website blocker.

mod args;
mod commands;
mod logging;
mod session;

use anyhow::Result;
use clap::Parser;
use focusdns_core::config::LoggingConfig;
use focusdns_core::Config;
use tracing::error;

use args::Args;
use commands::Command;

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging; the guard flushes the log file on exit
    let logging = logging_config(&args);
    let _guard = logging::init(&args, &logging)?;

    if matches!(args.command, Command::Run(_)) && !args.quiet {
        print_banner();
    }

    let result = run(args);

    if let Err(ref e) = result {
        error!("Fatal error: {:#}", e);
    }

    result
}

fn run(args: Args) -> Result<()> {
    match args.command {
        Command::Run(run_args) => commands::run::execute(run_args),
        Command::Config(config_args) => commands::config::execute(config_args),
        Command::Check(check_args) => commands::check::execute(check_args),
        Command::Completions(comp_args) => commands::completions::execute(&comp_args),
    }
}

/// `[logging]` section of the config the command will use, if readable
fn logging_config(args: &Args) -> LoggingConfig {
    args.command
        .config_path()
        .map(std::path::Path::to_path_buf)
        .or_else(commands::config::find_config_file)
        .and_then(|path| Config::load(path).ok())
        .map(|config| config.logging)
        .unwrap_or_default()
}

fn print_banner() {
    use colored::Colorize;

    println!();
    println!("{}", "╔═══════════════════════════════════════════╗".cyan());
    println!(
        "{}{}{}",
        "║  ".cyan(),
        format!("focusdns v{:<32}", env!("CARGO_PKG_VERSION")).green().bold(),
        " ║".cyan()
    );
    println!(
        "{}{}{}",
        "║  ".cyan(),
        "DNS-level website blocker                ".white(),
        "║".cyan()
    );
    println!("{}", "╚═══════════════════════════════════════════╝".cyan());
    println!();
}
