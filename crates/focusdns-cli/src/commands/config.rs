//! Config command - configuration management

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use focusdns_core::filter::MatchKind;
use focusdns_core::{Config, RuleSpec};
use std::path::{Path, PathBuf};
use tracing::info;

use super::{collect_rules, report_rejections, resolve_config};

/// Config file name looked up in each search location
const CONFIG_FILE_NAME: &str = "focusdns.toml";

/// Config command arguments
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show {
        /// Config file to show (default: detect)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Generate a configuration file
    Generate {
        /// Output file path
        #[arg(short, long, default_value = CONFIG_FILE_NAME)]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Validate a configuration file and its rules
    Validate {
        /// Config file to validate
        file: PathBuf,

        /// Additional rules file (JSON or TOML)
        #[arg(short, long, value_name = "FILE")]
        rules: Option<PathBuf>,
    },

    /// Show config file locations
    Paths,
}

/// Execute config command
pub fn execute(args: ConfigArgs) -> Result<()> {
    match args.action {
        ConfigAction::Show { file } => show_config(file.as_deref()),
        ConfigAction::Generate { output, force } => generate_config(&output, force),
        ConfigAction::Validate { file, rules } => validate_config(&file, rules.as_deref()),
        ConfigAction::Paths => {
            show_paths();
            Ok(())
        }
    }
}

fn show_config(file: Option<&Path>) -> Result<()> {
    let (config, path) = resolve_config(file)?;
    match path {
        Some(path) => eprintln!("# Loaded from {}", path.display()),
        None => eprintln!("# No config file found, showing defaults"),
    }

    let toml_str = config.to_toml().context("Failed to serialize config")?;
    println!("{toml_str}");
    Ok(())
}

/// Default configuration plus a few sample rules
pub fn sample_config() -> Config {
    Config {
        rules: vec![
            RuleSpec::new("video.example", MatchKind::Subdomain),
            RuleSpec::new("news.example", MatchKind::Exact),
            RuleSpec::new("casino", MatchKind::Keyword).with_active(false),
            RuleSpec::pattern("shorts", r"^shorts\."),
        ],
        ..Config::default()
    }
}

fn generate_config(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", output.display());
    }

    let toml_str = sample_config()
        .to_toml()
        .context("Failed to serialize config")?;

    let content = format!(
        "# focusdns configuration\n\
         # Rule kinds: exact, subdomain, keyword, pattern\n\
         # Critical infrastructure domains are never blocked\n\n\
         {toml_str}"
    );

    std::fs::write(output, content)
        .with_context(|| format!("Failed to write config to {}", output.display()))?;

    info!(path = %output.display(), "Generated config file");
    println!("Configuration file generated: {}", output.display());
    Ok(())
}

fn validate_config(file: &Path, rules_file: Option<&Path>) -> Result<()> {
    let config = Config::load(file)
        .with_context(|| format!("Failed to load config from {}", file.display()))?;

    config
        .validate()
        .context("Configuration validation failed")?;

    let rules = collect_rules(&config, rules_file)?;
    let rejected = focusdns_core::config::check_rules(&rules);
    report_rejections(&rejected);
    if !rejected.is_empty() {
        bail!("{} of {} rules are invalid", rejected.len(), rules.len());
    }

    let active = rules.iter().filter(|r| r.active).count();
    println!("{} Configuration is valid", "✓".green());
    println!("  Profile: {}", config.general.name);
    println!("  Rules: {} ({} active)", rules.len(), active);
    println!("  Interface: {} ({}/{})", config.tunnel.name, config.tunnel.address, config.tunnel.prefix_len);
    println!("  Sinkhole: {}", config.engine.sinkhole_address);
    println!("  Extra critical domains: {}", config.critical.extra_domains.len());
    Ok(())
}

fn show_paths() {
    println!("Configuration file search paths:");
    println!();
    println!("  1. ./{CONFIG_FILE_NAME}");

    if let Some(dirs) = project_dirs() {
        println!("  2. {}", dirs.config_dir().join(CONFIG_FILE_NAME).display());
    }

    #[cfg(unix)]
    {
        println!("  3. /etc/focusdns/{CONFIG_FILE_NAME}");
    }

    println!();
    println!("Rules files are passed with --rules (.json or .toml)");
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", "focusdns")
}

/// First existing config file in the search paths
pub fn find_config_file() -> Option<PathBuf> {
    let mut candidates = vec![PathBuf::from(CONFIG_FILE_NAME)];
    if let Some(dirs) = project_dirs() {
        candidates.push(dirs.config_dir().join(CONFIG_FILE_NAME));
    }
    #[cfg(unix)]
    {
        candidates.push(Path::new("/etc/focusdns").join(CONFIG_FILE_NAME));
    }

    candidates.into_iter().find(|path| path.exists())
}
