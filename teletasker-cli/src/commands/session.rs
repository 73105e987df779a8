//! Bearer token storage in the platform config directory.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use directories::BaseDirs;

pub fn login(token: &str) -> Result<()> {
    let token = token.trim();
    if token.is_empty() {
        bail!("token must not be empty");
    }

    let path = session_path();
    ensure_parent(&path)?;
    fs::write(&path, token)
        .with_context(|| format!("failed to write session token at {}", path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600))
            .context("failed to set session token permissions")?;
    }
    println!("Session token saved to {}", path.display());
    Ok(())
}

pub fn logout() -> Result<()> {
    let path = session_path();
    if path.exists() {
        fs::remove_file(&path)
            .with_context(|| format!("failed to remove session token {}", path.display()))?;
        println!("Removed session token at {}", path.display());
    } else {
        println!("No session token found at {}", path.display());
    }
    Ok(())
}

pub fn session_path() -> PathBuf {
    BaseDirs::new()
        .map(|dirs| dirs.config_dir().join("teletasker").join("session.token"))
        .unwrap_or_else(|| PathBuf::from("./session.token"))
}

/// `Ok(None)` when no token is stored.
pub fn read_token(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(contents) => {
            let token = contents.trim();
            Ok((!token.is_empty()).then(|| token.to_string()))
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => {
            Err(err).with_context(|| format!("failed to read session token {}", path.display()))
        }
    }
}

pub fn require_token() -> Result<String> {
    let path = session_path();
    read_token(&path)?.with_context(|| {
        format!(
            "no session token found at {}; run `teletasker login --token <TOKEN>` first",
            path.display()
        )
    })
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create session directory {}", parent.display()))?;
    }
    Ok(())
}
