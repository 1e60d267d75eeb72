use crate::config_file::FileConfig;
use crate::policy::PortMatcher;
use clap::Parser;
use eyre::eyre;
use std::path::PathBuf;

type Result<T> = color_eyre::eyre::Result<T>;

/// Routes a child process's TCP traffic through a mesh-VPN overlay
#[derive(Parser)]
#[command(name = "tailproxy")]
#[command(about = "Routes a child process's TCP traffic through a mesh-VPN overlay")]
#[command(version)]
pub struct Cli {
    /// Overlay peer (name or address) to route outbound traffic through
    #[arg(long, default_value = "")]
    pub exit_node: String,

    /// Load configuration from a JSON file; explicit flags override it
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Overlay identity; also selects the state directory
    #[arg(long, default_value = "tailproxy")]
    pub hostname: String,

    /// Pre-shared token for unattended authentication
    #[arg(long, default_value = "")]
    pub authkey: String,

    /// TCP port for the SOCKS5 listener on loopback
    #[arg(long, default_value = "1080")]
    pub port: u16,

    /// Enable diagnostic tracing
    #[arg(long)]
    pub verbose: bool,

    /// Activate the export-listeners subsystem
    #[arg(long)]
    pub export_listeners: bool,

    /// Port-matcher spec: ports allowed to be exported
    #[arg(long, default_value = "")]
    pub export_allow_ports: String,

    /// Port-matcher spec: ports denied from export, evaluated first
    #[arg(long, default_value = "")]
    pub export_deny_ports: String,

    /// Maximum number of simultaneously exported ports
    #[arg(long, default_value = "32")]
    pub export_max: usize,

    /// Validate configuration and exit without bringing up the mesh node
    /// or opening any socket
    #[arg(long)]
    pub dry_run: bool,

    /// Command to execute as the supervised child
    pub command: Option<String>,

    /// Arguments for the child command
    pub args: Vec<String>,
}

/// Fully resolved, validated configuration the rest of the supervisor uses
#[derive(Debug, Clone)]
pub struct Config {
    pub exit_node: Option<String>,
    pub hostname: String,
    pub authkey: Option<String>,
    pub proxy_port: u16,
    pub verbose: bool,
    pub export: ExportConfig,
    pub command: Option<String>,
    pub args: Vec<String>,
    pub dry_run: bool,
}

#[derive(Debug, Clone)]
pub struct ExportConfig {
    pub enabled: bool,
    pub allow: PortMatcher,
    pub deny: PortMatcher,
    pub max: usize,
}

impl Config {
    /// Merges CLI flags over an optional JSON config file over built-in
    /// defaults, then validates the result. clap doesn't tell us whether a
    /// flag was explicitly passed or left at its default, so a flag is only
    /// treated as "set" when it differs from that default; ties go to the
    /// config file.
    pub fn from_cli(cli: Cli) -> Result<Self> {
        let file = match &cli.config {
            Some(path) => Some(FileConfig::load(path)?),
            None => None,
        };

        let exit_node = non_empty(&cli.exit_node)
            .or_else(|| file.as_ref().and_then(|f| f.exit_node.clone()));

        let hostname = if cli.hostname != "tailproxy" {
            cli.hostname
        } else {
            file.as_ref()
                .and_then(|f| f.hostname.clone())
                .unwrap_or(cli.hostname)
        };

        let authkey =
            non_empty(&cli.authkey).or_else(|| file.as_ref().and_then(|f| f.authkey.clone()));

        let proxy_port = if cli.port != 1080 {
            cli.port
        } else {
            file.as_ref().and_then(|f| f.proxy_port).unwrap_or(cli.port)
        };

        let verbose = cli.verbose || file.as_ref().map(|f| f.verbose).unwrap_or(false);

        let export_enabled =
            cli.export_listeners || file.as_ref().map(|f| f.export_listeners).unwrap_or(false);

        let allow_spec = non_empty(&cli.export_allow_ports)
            .or_else(|| file.as_ref().and_then(|f| f.export_allow_ports.clone()))
            .unwrap_or_default();
        let deny_spec = non_empty(&cli.export_deny_ports)
            .or_else(|| file.as_ref().and_then(|f| f.export_deny_ports.clone()))
            .unwrap_or_default();

        let export_max = if cli.export_max != 32 {
            cli.export_max
        } else {
            file.as_ref()
                .and_then(|f| f.export_max)
                .unwrap_or(cli.export_max)
        };

        if export_max == 0 {
            return Err(eyre!("export-max must be at least 1"));
        }

        let allow = PortMatcher::parse(&allow_spec)
            .map_err(|e| eyre!("invalid export-allow-ports {allow_spec:?}: {e}"))?;
        let deny = PortMatcher::parse(&deny_spec)
            .map_err(|e| eyre!("invalid export-deny-ports {deny_spec:?}: {e}"))?;

        if cli.command.is_none() && !cli.args.is_empty() {
            return Err(eyre!("arguments given without a command to run"));
        }

        Ok(Config {
            exit_node,
            hostname,
            authkey,
            proxy_port,
            verbose,
            export: ExportConfig {
                enabled: export_enabled,
                allow,
                deny,
                max: export_max,
            },
            command: cli.command,
            args: cli.args,
            dry_run: cli.dry_run,
        })
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}
