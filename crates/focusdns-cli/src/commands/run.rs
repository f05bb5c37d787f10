//! Run command - block sites for a focus session

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use focusdns_core::config::check_rules;
use focusdns_core::{BlockingEngine, Config, EngineState, SessionMonitor};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use super::{collect_rules, report_rejections, resolve_config};
use crate::session::{ConsoleNotifier, RulesWatcher, TimedSession};

/// How often the control loop wakes up
const TICK: Duration = Duration::from_millis(250);

/// Run command arguments
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Configuration file
    #[arg(short = 'c', long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Rules file (JSON or TOML), reloaded when it changes
    #[arg(short = 'r', long, value_name = "FILE")]
    pub rules: Option<PathBuf>,

    /// Session length in minutes (0 = until interrupted)
    #[arg(short = 'd', long, value_name = "MINUTES")]
    pub duration: Option<u64>,

    /// Dry run (load and check everything, don't touch the network)
    #[arg(long)]
    pub dry_run: bool,
}

/// Execute the run command
pub fn execute(args: RunArgs) -> Result<()> {
    let (config, path) = resolve_config(args.config.as_deref())?;
    config.validate().context("Configuration validation failed")?;
    info!(
        profile = %config.general.name,
        path = ?path,
        "Loaded configuration"
    );

    let rules = collect_rules(&config, args.rules.as_deref())?;
    let minutes = args.duration.unwrap_or(config.general.session_minutes);

    if args.dry_run {
        warn!("Dry run mode - no interface will be created");
        let rejected = check_rules(&rules);
        report_rejections(&rejected);
        println!(
            "{} {} rules ({} rejected), session {}",
            "Dry run:".cyan().bold(),
            rules.len(),
            rejected.len(),
            describe_minutes(minutes)
        );
        return Ok(());
    }

    // Set up signal handler
    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        info!("Received interrupt signal, shutting down...");
        r.store(false, Ordering::SeqCst);
    })
    .context("Failed to set signal handler")?;

    let session = Arc::new(TimedSession::new(minutes, running));
    let engine = BlockingEngine::builder(focusdns_platform::default_provider())
        .with_config(&config)
        .session_monitor(Arc::clone(&session) as Arc<dyn SessionMonitor>)
        .notifier(Arc::new(ConsoleNotifier))
        .build()
        .context("Failed to create blocking engine")?;

    let update = engine
        .start(rules)
        .context("Failed to start blocking engine (are you root?)")?;
    report_rejections(&update.rejected);
    println!(
        "{} {} rules active, session {}",
        "Blocking started:".green().bold(),
        engine.registry().snapshot().active_len(),
        describe_minutes(minutes)
    );

    let watcher = args.rules.as_deref().map(RulesWatcher::new);
    control_loop(&engine, &session, &config, args.rules.as_deref(), watcher);

    engine.stop();
    print_summary(&engine, &session);
    info!("focusdns stopped");
    Ok(())
}

fn control_loop(
    engine: &BlockingEngine,
    session: &TimedSession,
    config: &Config,
    rules_path: Option<&Path>,
    mut watcher: Option<RulesWatcher>,
) {
    let reload_interval = Duration::from_secs(config.general.reload_interval_secs.max(1));
    let mut last_check = Instant::now();

    while session.should_remain_active() {
        thread::sleep(TICK);

        if engine.state() == EngineState::Stopped && !engine.restart_pending() {
            warn!("Blocking engine stopped, ending session");
            break;
        }

        if last_check.elapsed() < reload_interval {
            continue;
        }
        last_check = Instant::now();

        let Some(watcher) = watcher.as_mut() else {
            continue;
        };
        if !watcher.changed() {
            continue;
        }

        info!(path = %watcher.path().display(), "Rules file changed, reloading");
        match collect_rules(config, rules_path) {
            Ok(rules) => {
                let update = engine.update_rules(rules);
                report_rejections(&update.rejected);
                println!(
                    "{} {} rules applied, {} rejected",
                    "Rules reloaded:".cyan().bold(),
                    update.applied,
                    update.rejected.len()
                );
            }
            Err(e) => warn!(error = ?e, "Keeping current rules"),
        }
    }
}

fn print_summary(engine: &BlockingEngine, session: &TimedSession) {
    let stats = engine.stats();
    println!();
    println!("{}", "Session summary".bold());
    println!("  Duration:          {:.1} min", session.elapsed().as_secs_f64() / 60.0);
    println!("  Blocked attempts:  {}", session.interruptions());
    println!("  DNS queries:       {}", stats.dns_queries);
    println!("  Queries blocked:   {}", stats.queries_blocked);
    println!("  Packets forwarded: {}", stats.packets_forwarded);
    if stats.restarts > 0 || stats.io_errors > 0 {
        println!("  Restarts:          {} ({} I/O errors)", stats.restarts, stats.io_errors);
    }
    if stats.events_dropped > 0 {
        println!("  Dropped notices:   {}", stats.events_dropped);
    }
}

fn describe_minutes(minutes: u64) -> String {
    if minutes == 0 {
        "until interrupted".to_string()
    } else {
        format!("for {minutes} min")
    }
}
