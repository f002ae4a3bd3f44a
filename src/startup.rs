#![forbid(unsafe_code)]

//! Preflight checks run before the listener binds.

use std::path::Path;

use anyhow::{Result, bail};
use nix::unistd::Uid;

/// Fails fast when the server is started as root. The backend only ever
/// reads media files, so a dedicated unprivileged service account is the
/// right shape for every deployment.
pub fn ensure_not_root(process: &str) -> Result<()> {
    ensure_not_root_for(Uid::current(), process)
}

fn ensure_not_root_for(uid: Uid, process: &str) -> Result<()> {
    if uid.is_root() {
        bail!(
            "{process} must not be run as root; use a regular user or a dedicated service account"
        );
    }
    Ok(())
}

/// Verifies the configured media root exists and is a directory, so a typo
/// in MEDIA_ROOT fails at startup instead of as 404s on every stream.
pub fn ensure_media_root(path: &Path) -> Result<()> {
    if !path.is_dir() {
        bail!("media root {} is not a directory", path.display());
    }
    Ok(())
}
