//! State directory resolution (spec.md §4.H, §6): where the supervisor
//! keeps overlay-identity state between runs.
//!
//! Resolution order: `$TAILPROXY_STATE_DIR`, then
//! `$XDG_STATE_HOME/tailproxy/<hostname>`, then
//! `$HOME/.local/state/tailproxy/<hostname>`, then a temp-dir fallback.
//! The chosen directory is created with `0700` permissions if it doesn't
//! already exist.

use eyre::{Context, Result};
use std::env;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

pub fn resolve(hostname: &str) -> PathBuf {
    if let Ok(dir) = env::var("TAILPROXY_STATE_DIR") {
        return PathBuf::from(dir);
    }
    if let Ok(xdg) = env::var("XDG_STATE_HOME") {
        return PathBuf::from(xdg).join("tailproxy").join(hostname);
    }
    if let Ok(home) = env::var("HOME") {
        return PathBuf::from(home)
            .join(".local/state/tailproxy")
            .join(hostname);
    }
    env::temp_dir().join(format!("tailproxy-{hostname}"))
}

/// Resolves and ensures the state directory exists with `0700` permissions.
pub fn ensure(hostname: &str) -> Result<PathBuf> {
    let dir = resolve(hostname);
    fs::create_dir_all(&dir)
        .wrap_err_with(|| format!("creating state directory {}", dir.display()))?;
    let mut perms = fs::metadata(&dir)?.permissions();
    perms.set_mode(0o700);
    fs::set_permissions(&dir, perms)
        .wrap_err_with(|| format!("setting permissions on {}", dir.display()))?;
    Ok(dir)
}
