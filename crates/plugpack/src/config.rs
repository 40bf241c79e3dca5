//! Build configuration
//!
//! Settings come from `plugpack.toml` (or the file named by `--config`) and
//! are then overridden by command-line flags. Every field has a default, so
//! an empty file, or no file at all, is a valid configuration.
//!
//! ```toml
//! units_dir = "plugins"
//! out_dir = "dist"
//! failure_policy = "abort"
//!
//! [bundle]
//! targets = "defaults"
//! minify = true
//! warnings = "discard"
//!
//! [bundle.externals]
//! prefixes = ["@vendetta", "@bunny"]
//! globals = { react = "window.React" }
//! ```

use std::{
    fs,
    path::{Path, PathBuf},
};

use log::debug;
use serde::Deserialize;

use crate::{
    bundler::BundleOptions,
    error::{BuildError, BuildResult},
};

/// Configuration file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "plugpack.toml";

/// What the orchestrator does after a unit fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Stop at the first failed unit; later units are not built
    #[default]
    Abort,
    /// Build every unit and report all failures at the end
    Continue,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Directory whose subdirectories are the units to build
    pub units_dir: PathBuf,
    /// Directory receiving one subdirectory of output per unit
    pub out_dir: PathBuf,
    pub failure_policy: FailurePolicy,
    pub bundle: BundleOptions,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            units_dir: PathBuf::from("plugins"),
            out_dir: PathBuf::from("dist"),
            failure_policy: FailurePolicy::default(),
            bundle: BundleOptions::default(),
        }
    }
}

impl Config {
    /// Load the configuration file at `path`
    pub fn load(path: &Path) -> BuildResult<Self> {
        let text = fs::read_to_string(path).map_err(|e| BuildError::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_toml(&text, path)
    }

    pub fn from_toml(text: &str, path: &Path) -> BuildResult<Self> {
        toml::from_str(text).map_err(|e| BuildError::Config {
            path: path.to_path_buf(),
            message: e.message().to_owned(),
        })
    }

    /// Load `explicit` if given, else the default file when it exists, else
    /// the built-in defaults
    pub fn discover(explicit: Option<&Path>) -> BuildResult<Self> {
        if let Some(path) = explicit {
            debug!("Loading configuration from {}", path.display());
            return Self::load(path);
        }
        let default_path = Path::new(DEFAULT_CONFIG_FILE);
        if default_path.is_file() {
            debug!("Loading configuration from {DEFAULT_CONFIG_FILE}");
            Self::load(default_path)
        } else {
            debug!("No {DEFAULT_CONFIG_FILE} found, using defaults");
            Ok(Self::default())
        }
    }
}
