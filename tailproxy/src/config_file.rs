//! JSON configuration file support (spec.md §6). Every field is optional;
//! absence means "defer to the CLI default or built-in default" per the
//! merge order implemented in [`crate::cli::Config::from_cli`].

use eyre::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub exit_node: Option<String>,
    pub hostname: Option<String>,
    pub authkey: Option<String>,
    pub proxy_port: Option<u16>,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default)]
    pub export_listeners: bool,
    pub export_allow_ports: Option<String>,
    pub export_deny_ports: Option<String>,
    pub export_max: Option<usize>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .wrap_err_with(|| format!("reading config file {}", path.display()))?;
        serde_json::from_str(&raw)
            .wrap_err_with(|| format!("parsing config file {}", path.display()))
    }
}
