//! Policy routing for the virtual interface
//!
//! Traffic is steered into the tunnel through a dedicated routing table and
//! a set of `ip rule` entries:
//!
//! | priority | rule | purpose |
//! |----------|------|---------|
//! | base     | `uidrange U-U lookup main` | keep our own traffic off the tunnel |
//! | base + 1 | `iif <tun> lookup main`    | packets written back leave normally |
//! | base + 2 | `lookup <table>`           | everything else enters the tunnel  |
//!
//! DNS servers are pushed to systemd-resolved on a best-effort basis.
//!
//! Packets written back to the tunnel still carry the interface's own
//! source address, which the kernel drops as martians by default. Setup
//! therefore sets, best effort, on the tunnel interface:
//!
//! | sysctl | value |
//! |--------|-------|
//! | `net.ipv4.conf.<tun>.accept_local` | 1 |
//! | `net.ipv4.conf.<tun>.rp_filter`    | 0 |
//!
//! These vanish with the interface. The effective `rp_filter` is the
//! maximum of the interface and `all` values, so a host running
//! `net.ipv4.conf.all.rp_filter=1` must lower it to 2 or 0 itself. NAT for
//! forwarded traffic is host configuration and is not installed here.

use crate::error::{PlatformError, Result};
use focusdns_core::TunnelConfig;
use std::fmt;
use std::process::Command;
use tracing::{debug, info, warn};

/// Routing table holding the tunnel routes
pub const ROUTE_TABLE: u32 = 7553;

/// Priority of the first `ip rule` entry
pub const RULE_PRIORITY_BASE: u32 = 7550;

/// A single external command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpCommand {
    /// Program to run
    pub program: &'static str,
    /// Arguments
    pub args: Vec<String>,
    /// Failure is logged instead of aborting setup
    pub best_effort: bool,
}

impl IpCommand {
    fn ip<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: "ip",
            args: args.into_iter().map(Into::into).collect(),
            best_effort: false,
        }
    }

    fn sysctl(interface: &str, key: &str, value: u8) -> Self {
        Self {
            program: "sysctl",
            args: vec![
                "-w".to_string(),
                format!("net.ipv4.conf.{interface}.{key}={value}"),
            ],
            best_effort: true,
        }
    }

    fn resolvectl<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: "resolvectl",
            args: args.into_iter().map(Into::into).collect(),
            best_effort: true,
        }
    }

    fn best_effort(mut self) -> Self {
        self.best_effort = true;
        self
    }
}

impl fmt::Display for IpCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Executes external commands
pub trait CommandRunner: Send + Sync {
    /// Run `command` to completion
    fn run(&self, command: &IpCommand) -> Result<()>;
}

/// Runs commands with [`std::process::Command`]
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, command: &IpCommand) -> Result<()> {
        debug!(command = %command, "Running");
        let output = Command::new(command.program)
            .args(&command.args)
            .output()
            .map_err(|source| PlatformError::CommandSpawn {
                program: command.program.to_string(),
                source,
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(PlatformError::CommandFailed {
                command: command.to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

/// Commands that set up routing for one interface, and undo it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePlan {
    interface: String,
    install: Vec<IpCommand>,
    remove: Vec<IpCommand>,
}

impl RoutePlan {
    /// Plan routing for `config`, excluding traffic of `uid` when asked to
    pub fn new(config: &TunnelConfig, uid: u32) -> Self {
        let dev = config.name.as_str();
        let table = ROUTE_TABLE.to_string();
        let mut install = vec![
            IpCommand::sysctl(dev, "accept_local", 1),
            IpCommand::sysctl(dev, "rp_filter", 0),
        ];
        let mut remove = Vec::new();

        for route in &config.routes {
            let route = route.to_string();
            install.push(IpCommand::ip([
                "route", "replace", &route, "dev", dev, "table", &table,
            ]));
            remove.push(
                IpCommand::ip(["route", "del", &route, "dev", dev, "table", &table]).best_effort(),
            );
        }

        let mut rule = |priority: u32, selector: Vec<String>, lookup: &str| {
            let priority = priority.to_string();
            let mut args = vec!["rule".to_string(), "add".to_string()];
            args.extend(selector);
            args.extend(["lookup".into(), lookup.into(), "priority".into(), priority.clone()]);
            install.push(IpCommand::ip(args));
            remove.push(IpCommand::ip(["rule", "del", "priority", &priority]).best_effort());
        };

        if config.exclude_self {
            rule(
                RULE_PRIORITY_BASE,
                vec!["uidrange".into(), format!("{uid}-{uid}")],
                "main",
            );
        }
        rule(
            RULE_PRIORITY_BASE + 1,
            vec!["iif".into(), dev.to_string()],
            "main",
        );
        rule(RULE_PRIORITY_BASE + 2, Vec::new(), &table);

        if !config.dns_servers.is_empty() {
            let mut args = vec!["dns".to_string(), dev.to_string()];
            args.extend(config.dns_servers.iter().map(ToString::to_string));
            install.push(IpCommand::resolvectl(args));
            install.push(IpCommand::resolvectl(["domain", dev, "~."]));
            remove.push(IpCommand::resolvectl(["revert", dev]));
        }

        // Undo in reverse order of installation
        remove.reverse();

        Self {
            interface: dev.to_string(),
            install,
            remove,
        }
    }

    /// Setup commands in execution order
    pub fn install_commands(&self) -> &[IpCommand] {
        &self.install
    }

    /// Teardown commands in execution order
    pub fn remove_commands(&self) -> &[IpCommand] {
        &self.remove
    }

    /// Run the setup commands
    ///
    /// On a hard failure everything is rolled back and the error returned;
    /// best-effort commands only log.
    pub fn apply(&self, runner: &dyn CommandRunner) -> Result<()> {
        for command in &self.install {
            match runner.run(command) {
                Ok(()) => {}
                Err(e) if command.best_effort => {
                    warn!(command = %command, error = %e, "Optional network setup failed");
                }
                Err(e) => {
                    self.revert(runner);
                    return Err(e);
                }
            }
        }
        info!(interface = %self.interface, table = ROUTE_TABLE, "Routes installed");
        Ok(())
    }

    /// Run the teardown commands, logging failures
    pub fn revert(&self, runner: &dyn CommandRunner) {
        for command in &self.remove {
            if let Err(e) = runner.run(command) {
                debug!(command = %command, error = %e, "Teardown command failed");
            }
        }
        debug!(interface = %self.interface, "Routes removed");
    }
}
