//! Check command - classify domains offline
//!
//! Applies the configured rules to a registry without creating an
//! interface and prints the decision for each domain. With `--dump` the
//! synthetic query and the spoofed answer are printed as hex.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use focusdns_core::engine::EngineOptions;
use focusdns_core::filter::{normalize_query_name, CriticalDomainSet, Decision, DomainBlockRegistry};
use focusdns_core::packet::{build_block_response, build_dns_query, inspect_dns_query, ResponseOptions};
use std::path::PathBuf;

use super::{collect_rules, report_rejections, resolve_config};

/// Transaction ID used for synthetic queries
const DUMP_TRANSACTION_ID: u16 = 0x1234;

/// Check command arguments
#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Domains to check
    #[arg(required = true, value_name = "DOMAIN")]
    pub domains: Vec<String>,

    /// Configuration file
    #[arg(short = 'c', long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Rules file (JSON or TOML)
    #[arg(short = 'r', long, value_name = "FILE")]
    pub rules: Option<PathBuf>,

    /// Print the query and spoofed response packets as hex
    #[arg(long)]
    pub dump: bool,
}

/// Execute the check command
pub fn execute(args: CheckArgs) -> Result<()> {
    let (config, _) = resolve_config(args.config.as_deref())?;
    let rules = collect_rules(&config, args.rules.as_deref())?;

    let registry = DomainBlockRegistry::new(CriticalDomainSet::with_extra(
        &config.critical.extra_domains,
    ));
    let update = registry.replace_rules(&rules);
    report_rejections(&update.rejected);

    let response = EngineOptions::from(&config.engine).response;

    for domain in &args.domains {
        let name = normalize_query_name(domain);
        let decision = registry.classify(&name);
        match &decision {
            Decision::Blocked(rule) => {
                println!("{} {} ({})", "BLOCKED ".red().bold(), name, rule);
            }
            Decision::Critical => {
                println!("{} {} (critical domain)", "CRITICAL".blue().bold(), name);
            }
            Decision::Allowed => println!("{} {}", "ALLOWED ".green().bold(), name),
        }

        if args.dump {
            dump_packets(&name, decision.is_blocked(), &response)?;
        }
    }

    Ok(())
}

fn dump_packets(name: &str, blocked: bool, options: &ResponseOptions) -> Result<()> {
    let query = build_dns_query(name, DUMP_TRANSACTION_ID)
        .with_context(|| format!("Cannot encode a query for '{name}'"))?;
    println!("  query    {}", hex::encode(&query));

    if !blocked {
        return Ok(());
    }

    let dns = inspect_dns_query(&query).context("Synthetic query did not parse")?;
    let response = build_block_response(
        &query,
        dns.ip.header_len(),
        dns.dns_offset(),
        &dns.query,
        options,
    )
    .context("Failed to build spoofed response")?;
    println!("  response {}", hex::encode(&response));
    Ok(())
}
