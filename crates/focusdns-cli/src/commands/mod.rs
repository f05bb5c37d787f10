//! CLI commands

pub mod check;
pub mod completions;
pub mod config;
pub mod run;

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use focusdns_core::config::load_rules;
use focusdns_core::filter::RuleRejection;
use focusdns_core::{Config, RuleSpec};
use std::path::{Path, PathBuf};

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Block sites for a focus session (main command)
    Run(run::RunArgs),

    /// Configuration management
    Config(config::ConfigArgs),

    /// Check how domains would be classified
    Check(check::CheckArgs),

    /// Generate shell completions
    Completions(completions::CompletionsArgs),
}

impl Command {
    /// Config file named on the command line, if any
    pub fn config_path(&self) -> Option<&Path> {
        match self {
            Command::Run(args) => args.config.as_deref(),
            Command::Check(args) => args.config.as_deref(),
            Command::Config(_) | Command::Completions(_) => None,
        }
    }
}

/// Load `path`, else the first config file found, else the defaults
pub fn resolve_config(path: Option<&Path>) -> Result<(Config, Option<PathBuf>)> {
    let path = match path {
        Some(path) => Some(path.to_path_buf()),
        None => config::find_config_file(),
    };

    match path {
        Some(path) => {
            let config = Config::load(&path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?;
            Ok((config, Some(path)))
        }
        None => Ok((Config::default(), None)),
    }
}

/// Rules from the config file followed by those of an optional rules file
pub fn collect_rules(config: &Config, rules_file: Option<&Path>) -> Result<Vec<RuleSpec>> {
    let mut rules = config.rules.clone();
    if let Some(path) = rules_file {
        let extra = load_rules(path)
            .with_context(|| format!("Failed to load rules from {}", path.display()))?;
        rules.extend(extra);
    }
    Ok(rules)
}

/// Print rejected rule entries to stderr
pub fn report_rejections(rejected: &[RuleRejection]) {
    for rejection in rejected {
        eprintln!(
            "{} rule #{} '{}': {}",
            "Skipped".yellow().bold(),
            rejection.index + 1,
            rejection.domain,
            rejection.error
        );
    }
}
