//! Runtime configuration loaded from environment variables.

use std::env;
use std::path::PathBuf;

const DEFAULT_DATABASE_PATH: &str = "nudge.db";

/// Runtime configuration for the todo core.
#[derive(Debug, Clone)]
pub struct Config {
    /// Where the SQLite database lives. `NUDGE_DATABASE_PATH` overrides the
    /// default of `nudge.db` in the working directory.
    pub database_path: PathBuf,
}

impl Config {
    /// Load configuration from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let database_path = env::var("NUDGE_DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_DATABASE_PATH));

        Config { database_path }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database_path: PathBuf::from(DEFAULT_DATABASE_PATH),
        }
    }
}
