//! Load `.env` into the process environment and parse typed runtime [`Settings`].
//!
//! `.env` parsing is delegated to the `dotenv` crate, which never overrides
//! variables already present in the process environment — so deployments can
//! override a checked-in `.env`.

mod settings;

use std::path::Path;
use thiserror::Error;

pub use settings::{Settings, DEFAULT_LISTEN_ADDR};

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("read .env: {0}")]
    Dotenv(#[from] dotenv::Error),
    #[error("invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

/// Loads the project `.env` (if present) into the environment. Keys already
/// set in the environment always win.
///
/// * `override_dir`: if `Some`, look for `.env` in this directory instead of
///   `std::env::current_dir()`.
pub fn load_and_apply(override_dir: Option<&Path>) -> Result<(), LoadError> {
    let dir = match override_dir {
        Some(dir) => dir.to_path_buf(),
        None => match std::env::current_dir() {
            Ok(dir) => dir,
            Err(_) => return Ok(()),
        },
    };
    let path = dir.join(".env");
    if !path.is_file() {
        return Ok(());
    }
    dotenv::from_path(&path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    /// **Scenario**: A key already present in the environment is not overwritten by `.env`.
    #[test]
    fn existing_env_wins() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".env"), "OLAV_CFG_TEST_EXISTING=from_dotenv\n").unwrap();
        env::set_var("OLAV_CFG_TEST_EXISTING", "from_env");
        load_and_apply(Some(dir.path())).unwrap();
        assert_eq!(
            env::var("OLAV_CFG_TEST_EXISTING").as_deref(),
            Ok("from_env")
        );
        env::remove_var("OLAV_CFG_TEST_EXISTING");
    }

    /// **Scenario**: A missing key is filled from `.env`.
    #[test]
    fn dotenv_fills_missing_key() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".env"), "OLAV_CFG_TEST_MISSING=filled\n").unwrap();
        env::remove_var("OLAV_CFG_TEST_MISSING");
        load_and_apply(Some(dir.path())).unwrap();
        assert_eq!(env::var("OLAV_CFG_TEST_MISSING").as_deref(), Ok("filled"));
        env::remove_var("OLAV_CFG_TEST_MISSING");
    }

    /// **Scenario**: No `.env` file is not an error.
    #[test]
    fn load_and_apply_no_dotenv_ok() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_and_apply(Some(dir.path())).is_ok());
    }
}
