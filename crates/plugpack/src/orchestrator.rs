//! Build orchestration
//!
//! Units are built one at a time in name order. Each unit goes through the
//! same sequence, and every step only runs once the previous one succeeded:
//!
//! 1. load the unit manifest
//! 2. bundle from the manifest's entry module
//! 3. write the artifact
//! 4. digest the artifact as persisted
//! 5. write the rewritten manifest
//!
//! A failure at any step rolls back what the attempt wrote, so the unit's
//! output directory is left exactly as it was before.

use std::{
    fmt, fs,
    path::{Path, PathBuf},
};

use log::{debug, error, info};

use crate::{
    bundler::bundle,
    config::{Config, FailurePolicy},
    error::{BuildError, BuildResult},
    integrity::digest_file,
    manifest::{ARTIFACT_FILE_NAME, MANIFEST_FILE_NAME, Manifest},
    output::UnitOutput,
    warnings::BundleWarning,
};

/// One independently buildable plugin source tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    /// Directory name, unique within the units root
    pub id: String,
    pub source_root: PathBuf,
    pub manifest_path: PathBuf,
}

impl Unit {
    pub fn new(id: impl Into<String>, source_root: PathBuf) -> Self {
        let manifest_path = source_root.join(MANIFEST_FILE_NAME);
        Self {
            id: id.into(),
            source_root,
            manifest_path,
        }
    }
}

/// What a successful unit build produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitBuild {
    /// `name` from the unit manifest
    pub name: String,
    pub artifact_path: PathBuf,
    pub manifest_path: PathBuf,
    pub digest: String,
    pub warnings: Vec<BundleWarning>,
}

#[derive(Debug)]
pub enum UnitStatus {
    Pending,
    Building,
    Succeeded(UnitBuild),
    Failed(BuildError),
}

impl UnitStatus {
    pub fn is_succeeded(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Building => f.write_str("building"),
            Self::Succeeded(_) => f.write_str("succeeded"),
            Self::Failed(_) => f.write_str("failed"),
        }
    }
}

#[derive(Debug)]
pub struct UnitReport {
    pub unit: Unit,
    pub status: UnitStatus,
}

/// Outcome of one orchestrator run, one entry per unit in build order
#[derive(Debug, Default)]
pub struct BuildReport {
    pub units: Vec<UnitReport>,
}

impl BuildReport {
    pub fn is_success(&self) -> bool {
        !self.units.iter().any(|report| report.status.is_failed())
    }

    pub fn succeeded(&self) -> impl Iterator<Item = (&Unit, &UnitBuild)> {
        self.units.iter().filter_map(|report| match &report.status {
            UnitStatus::Succeeded(build) => Some((&report.unit, build)),
            _ => None,
        })
    }

    pub fn failures(&self) -> impl Iterator<Item = (&Unit, &BuildError)> {
        self.units.iter().filter_map(|report| match &report.status {
            UnitStatus::Failed(err) => Some((&report.unit, err)),
            _ => None,
        })
    }

    pub fn status(&self, unit_id: &str) -> Option<&UnitStatus> {
        self.units
            .iter()
            .find(|report| report.unit.id == unit_id)
            .map(|report| &report.status)
    }
}

#[derive(Debug)]
pub struct Orchestrator {
    config: Config,
}

impl Orchestrator {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// List the units under the units root, sorted by id
    ///
    /// Entries that are not directories are skipped.
    pub fn discover_units(&self) -> BuildResult<Vec<Unit>> {
        let root = &self.config.units_dir;
        let discovery_error = |source| BuildError::Discovery {
            path: root.clone(),
            source,
        };

        let mut units = Vec::new();
        for entry in fs::read_dir(root).map_err(discovery_error)? {
            let entry = entry.map_err(discovery_error)?;
            let path = entry.path();
            if !path.is_dir() {
                debug!("Skipping non-directory {}", path.display());
                continue;
            }
            let id = entry.file_name().to_string_lossy().into_owned();
            units.push(Unit::new(id, path));
        }
        units.sort_by(|a, b| a.id.cmp(&b.id));
        debug!("Discovered {} units in {}", units.len(), root.display());
        Ok(units)
    }

    /// Discover and build every unit
    ///
    /// Only discovery problems are returned as errors; unit failures are
    /// recorded in the report.
    pub fn run(&self) -> BuildResult<BuildReport> {
        let units = self.discover_units()?;
        Ok(self.build_units(units))
    }

    /// Build `units` in order, applying the failure policy
    pub fn build_units(&self, units: Vec<Unit>) -> BuildReport {
        let mut report = BuildReport {
            units: units
                .into_iter()
                .map(|unit| UnitReport {
                    unit,
                    status: UnitStatus::Pending,
                })
                .collect(),
        };

        for entry in &mut report.units {
            entry.status = UnitStatus::Building;
            entry.status = match self.build_unit(&entry.unit) {
                Ok(build) => {
                    info!("Successfully built {}!", build.name);
                    UnitStatus::Succeeded(build)
                }
                Err(err) => {
                    error!("Failed to build {}: {err}", entry.unit.id);
                    UnitStatus::Failed(err)
                }
            };

            if entry.status.is_failed() && self.config.failure_policy == FailurePolicy::Abort {
                debug!("Aborting after failure of {}", entry.unit.id);
                break;
            }
        }
        report
    }

    /// Run the full pipeline for one unit
    pub fn build_unit(&self, unit: &Unit) -> BuildResult<UnitBuild> {
        debug!("Building {} from {}", unit.id, unit.source_root.display());
        let manifest = Manifest::load(&unit.manifest_path)?;
        let entry = manifest.entry_path(&unit.source_root);
        let bundled = bundle(&entry, &self.config.bundle)?;

        let mut output = UnitOutput::new(unit_output_dir(&self.config.out_dir, unit));
        match write_outputs(&mut output, &manifest, bundled.code.as_bytes()) {
            Ok((artifact_path, manifest_path, digest)) => Ok(UnitBuild {
                name: manifest.name().to_owned(),
                artifact_path,
                manifest_path,
                digest,
                warnings: bundled.warnings,
            }),
            Err(err) => {
                output.rollback();
                Err(err)
            }
        }
    }
}

/// Artifact first, then its digest, then the manifest that records both
fn write_outputs(
    output: &mut UnitOutput,
    manifest: &Manifest,
    code: &[u8],
) -> BuildResult<(PathBuf, PathBuf, String)> {
    let artifact_path = output.commit_artifact(code)?;
    let digest = digest_file(&artifact_path)?;
    debug!("Digest of {}: {digest}", artifact_path.display());
    let rewritten = manifest.rewrite(ARTIFACT_FILE_NAME, &digest);
    let manifest_path = output.commit_manifest(&rewritten)?;
    Ok((artifact_path, manifest_path, digest))
}

/// Output directory of `unit` under `out_dir`
pub fn unit_output_dir(out_dir: &Path, unit: &Unit) -> PathBuf {
    out_dir.join(&unit.id)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;
    use crate::error::ErrorKind;

    fn orchestrator(root: &Path) -> Orchestrator {
        Orchestrator::new(Config {
            units_dir: root.join("plugins"),
            out_dir: root.join("dist"),
            ..Config::default()
        })
    }

    #[test]
    fn test_units_are_sorted_and_files_skipped() {
        let temp = TempDir::new().unwrap();
        for id in ["zeta", "alpha", "Beta"] {
            fs::create_dir_all(temp.path().join("plugins").join(id)).unwrap();
        }
        fs::write(temp.path().join("plugins/README.md"), "notes").unwrap();

        let units = orchestrator(temp.path()).discover_units().unwrap();
        let ids: Vec<&str> = units.iter().map(|unit| unit.id.as_str()).collect();
        assert_eq!(ids, vec!["Beta", "alpha", "zeta"]);
        assert_eq!(
            units[1].manifest_path,
            temp.path().join("plugins/alpha/manifest.json")
        );
    }

    #[test]
    fn test_missing_units_root_is_a_discovery_error() {
        let temp = TempDir::new().unwrap();
        let err = orchestrator(temp.path()).run().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Discovery);
    }

    #[test]
    fn test_missing_manifest_fails_the_unit() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("plugins/empty")).unwrap();

        let report = orchestrator(temp.path()).run().unwrap();
        assert!(!report.is_success());
        let (unit, err) = report.failures().next().unwrap();
        assert_eq!(unit.id, "empty");
        assert_eq!(err.kind(), ErrorKind::Manifest);
        assert!(!temp.path().join("dist").exists());
    }

    #[test]
    fn test_empty_units_root_is_a_success() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("plugins")).unwrap();
        let report = orchestrator(temp.path()).run().unwrap();
        assert!(report.is_success());
        assert!(report.units.is_empty());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(UnitStatus::Pending.to_string(), "pending");
        assert_eq!(UnitStatus::Building.to_string(), "building");
    }
}
