//! Non-fatal bundler diagnostics
//!
//! Warnings never fail a build. Where they go is decided by a
//! [`WarningPolicy`]: dropped (the default), logged, or collected into the
//! [`BundleOutput`](crate::bundler::BundleOutput) so callers can assert on them.

use std::path::PathBuf;

use log::{trace, warn};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum WarningPolicy {
    #[default]
    Discard,
    Log,
    Collect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WarningKind {
    /// Two or more modules import each other
    CircularDependency,
    /// `import()` with a computed specifier; left untouched in the output
    DynamicImportExpression,
    /// Filename marks a dialect the transform stage does not handle
    DialectPassthrough,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleWarning {
    pub kind: WarningKind,
    pub module: PathBuf,
    pub message: String,
}

impl std::fmt::Display for BundleWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.module.display())
    }
}

/// Routes warnings according to a [`WarningPolicy`]
#[derive(Debug, Default)]
pub struct WarningSink {
    policy: WarningPolicy,
    collected: Vec<BundleWarning>,
}

impl WarningSink {
    pub fn new(policy: WarningPolicy) -> Self {
        Self {
            policy,
            collected: Vec::new(),
        }
    }

    pub fn emit(&mut self, kind: WarningKind, module: impl Into<PathBuf>, message: impl Into<String>) {
        let warning = BundleWarning {
            kind,
            module: module.into(),
            message: message.into(),
        };
        match self.policy {
            WarningPolicy::Discard => trace!("Discarding bundler warning: {warning}"),
            WarningPolicy::Log => warn!("{warning}"),
            WarningPolicy::Collect => self.collected.push(warning),
        }
    }

    pub fn into_collected(self) -> Vec<BundleWarning> {
        self.collected
    }
}
