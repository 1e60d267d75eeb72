//! Proxy configuration read once from the environment the supervisor
//! injected into the child (spec.md §3, §6).

use std::sync::OnceLock;

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
    pub verbose: bool,
    pub export_enabled: bool,
    pub control_sock: Option<String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1080,
            verbose: false,
            export_enabled: false,
            control_sock: None,
        }
    }
}

impl ProxyConfig {
    fn from_env() -> Self {
        let mut cfg = ProxyConfig::default();
        if let Ok(host) = std::env::var("TAILPROXY_HOST") {
            if !host.is_empty() {
                cfg.host = host;
            }
        }
        if let Ok(port) = std::env::var("TAILPROXY_PORT") {
            if let Ok(port) = port.parse() {
                cfg.port = port;
            }
        }
        cfg.verbose = std::env::var_os("TAILPROXY_VERBOSE").is_some();
        cfg.export_enabled = std::env::var_os("TAILPROXY_EXPORT_LISTENERS").is_some();
        cfg.control_sock = std::env::var("TAILPROXY_CONTROL_SOCK").ok();
        cfg
    }
}

/// Returns the process-wide configuration, computed lazily from the
/// environment on first access and immutable thereafter (spec.md §3:
/// "Immutable after init").
pub fn config() -> &'static ProxyConfig {
    static CONFIG: OnceLock<ProxyConfig> = OnceLock::new();
    CONFIG.get_or_init(ProxyConfig::from_env)
}

/// Emits a diagnostic line to stderr when verbose mode is enabled. Verbose
/// mode never changes behavior, only whether this fires.
macro_rules! vlog {
    ($($arg:tt)*) => {
        if $crate::proxy_config::config().verbose {
            eprintln!("[tailproxy-interpose] {}", format!($($arg)*));
        }
    };
}

pub(crate) use vlog;
