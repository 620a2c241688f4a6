#![forbid(unsafe_code)]

//! Shared security helpers used by the tubelink binaries.

use anyhow::{Result, bail};
use nix::unistd::Uid;

/// Fails fast when a binary is started as root. The API server only shells
/// out to yt-dlp and never needs elevated privileges, so a root invocation is
/// always a deployment mistake.
pub fn ensure_not_root(process: &str) -> Result<()> {
    if Uid::current().is_root() {
        bail!("{process} must not be run as root; please use an unprivileged service account");
    }
    Ok(())
}
