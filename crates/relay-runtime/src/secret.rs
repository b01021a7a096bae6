//! Shared secret resolution.
//!
//! First match wins:
//!
//! 1. `HMAC_SECRET_KEY`, then `APP_SECRET_KEY`
//! 2. the file named by `SECRET_KEY_PATH`, trimmed
//! 3. the file named by `RELAY_AUTO_SECRET_PATH`, generated on first use
//!
//! With none of them set startup fails. A variable that is set but empty is
//! an error, not a fall-through.

use crate::config::ConfigError;
use relay_types::SharedSecret;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const SECRET_VARS: [&str; 2] = ["HMAC_SECRET_KEY", "APP_SECRET_KEY"];

/// Where the secret came from, for the startup log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretSource {
    Env(&'static str),
    File(PathBuf),
    Generated(PathBuf),
}

impl fmt::Display for SecretSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Env(var) => write!(f, "environment ({var})"),
            Self::File(path) => write!(f, "file {}", path.display()),
            Self::Generated(path) => write!(f, "auto-generated file {}", path.display()),
        }
    }
}

/// Resolve from the process environment.
///
/// # Errors
///
/// [`ConfigError`] if no source is configured or the chosen one is unusable.
pub fn resolve_secret() -> Result<(SharedSecret, SecretSource), ConfigError> {
    resolve_secret_with(|var| std::env::var(var).ok())
}

/// Resolve from an arbitrary variable source.
///
/// # Errors
///
/// [`ConfigError`] if no source is configured or the chosen one is unusable.
pub fn resolve_secret_with<F>(lookup: F) -> Result<(SharedSecret, SecretSource), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    for var in SECRET_VARS {
        if let Some(value) = lookup(var) {
            let secret = SharedSecret::new(value).map_err(|_| ConfigError::EmptySecret {
                source_name: var.to_string(),
            })?;
            return Ok((secret, SecretSource::Env(var)));
        }
    }

    if let Some(path) = lookup("SECRET_KEY_PATH") {
        let path = PathBuf::from(path);
        let secret = read_secret_file(&path)?;
        return Ok((secret, SecretSource::File(path)));
    }

    if let Some(path) = lookup("RELAY_AUTO_SECRET_PATH") {
        let path = PathBuf::from(path);
        if path.exists() {
            let secret = read_secret_file(&path)?;
            info!(path = %path.display(), "Loaded previously generated shared secret");
            return Ok((secret, SecretSource::File(path)));
        }
        let secret = SharedSecret::generate();
        persist_secret(&path, &secret)?;
        warn!(
            path = %path.display(),
            "Generated a new shared secret. Every producer and relay must use this same file"
        );
        return Ok((secret, SecretSource::Generated(path)));
    }

    Err(ConfigError::MissingSecret)
}

fn read_secret_file(path: &Path) -> Result<SharedSecret, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::SecretFile {
        path: path.to_path_buf(),
        source,
    })?;
    SharedSecret::new(contents.trim()).map_err(|_| ConfigError::EmptySecret {
        source_name: path.display().to_string(),
    })
}

/// Write a new secret file readable by the owner only.
fn persist_secret(path: &Path, secret: &SharedSecret) -> Result<(), ConfigError> {
    let io_err = |source| ConfigError::SecretFile {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o400);
    }

    let mut file = options.open(path).map_err(io_err)?;
    file.write_all(secret.expose().as_bytes()).map_err(io_err)?;
    file.sync_all().map_err(io_err)
}
