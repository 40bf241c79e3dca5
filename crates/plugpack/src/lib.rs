//! plugpack: per-unit plugin build pipeline
//!
//! Every unit under the units root is transformed, bundled into one
//! self-executing artifact, fingerprinted with SHA-256, and published with a
//! rewritten manifest that references the artifact and its digest.

pub mod bundler;
pub mod code_generator;
pub mod config;
pub mod dialect;
pub mod error;
pub mod externals;
pub mod helpers;
pub mod integrity;
pub mod lowering;
pub mod manifest;
pub mod minify;
pub mod module_graph;
pub mod module_scan;
pub mod orchestrator;
pub mod output;
pub mod resolver;
pub mod source_edit;
pub mod transform;
pub mod types;
pub mod warnings;

pub use bundler::{BundleOptions, BundleOutput, bundle};
pub use config::{Config, FailurePolicy};
pub use error::{BuildError, BuildResult, ErrorKind};
pub use orchestrator::{BuildReport, Orchestrator, Unit, UnitStatus};
