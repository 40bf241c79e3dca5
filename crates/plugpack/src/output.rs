//! Per-unit output directory
//!
//! Files are replaced atomically: bytes go to a temporary file in the same
//! directory, are synced, then renamed over the destination. A reader
//! therefore sees either the old file or the new one, never a prefix.
//!
//! [`UnitOutput`] also remembers what a build attempt changed so a failed
//! attempt can be rolled back to the state it started from.

use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use log::{debug, warn};

use crate::{
    error::{BuildError, BuildResult},
    manifest::{ARTIFACT_FILE_NAME, MANIFEST_FILE_NAME, Manifest},
};

#[derive(Debug)]
pub struct UnitOutput {
    dir: PathBuf,
    /// Directories this attempt created, deepest first
    created_dirs: Vec<PathBuf>,
    /// Artifact bytes from before this attempt, if there was an artifact
    previous_artifact: Option<Vec<u8>>,
    artifact_written: bool,
}

impl UnitOutput {
    /// Output for the unit whose files live in `dir`; nothing is touched
    /// until the first commit
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            created_dirs: Vec::new(),
            previous_artifact: None,
            artifact_written: false,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn artifact_path(&self) -> PathBuf {
        self.dir.join(ARTIFACT_FILE_NAME)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.dir.join(MANIFEST_FILE_NAME)
    }

    /// Durably write the artifact, returning its path
    pub fn commit_artifact(&mut self, code: &[u8]) -> BuildResult<PathBuf> {
        let path = self.artifact_path();
        let write_error = |source| BuildError::BundleWrite {
            path: path.clone(),
            source,
        };

        self.ensure_dir().map_err(write_error)?;
        self.previous_artifact = match fs::read(&path) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(write_error(e)),
        };
        write_atomic(&path, code).map_err(write_error)?;
        self.artifact_written = true;
        debug!("Wrote {} ({} bytes)", path.display(), code.len());
        Ok(path)
    }

    /// Durably write the manifest
    pub fn commit_manifest(&mut self, manifest: &Manifest) -> BuildResult<PathBuf> {
        let path = self.manifest_path();
        self.ensure_dir()
            .and_then(|()| write_atomic(&path, manifest.to_json().as_bytes()))
            .map_err(|source| BuildError::ManifestIo {
                path: path.clone(),
                source,
            })?;
        debug!("Wrote {}", path.display());
        Ok(path)
    }

    /// Undo this attempt's writes
    ///
    /// Restores the previous artifact, or removes the new one, then removes
    /// any directories the attempt created. Problems are logged; the
    /// original build error is what gets reported.
    pub fn rollback(&mut self) {
        if self.artifact_written {
            let path = self.artifact_path();
            let restored = match &self.previous_artifact {
                Some(bytes) => write_atomic(&path, bytes),
                None => fs::remove_file(&path),
            };
            match restored {
                Ok(()) => debug!("Rolled back {}", path.display()),
                Err(e) => warn!("Failed to roll back {}: {e}", path.display()),
            }
            self.artifact_written = false;
        }

        for dir in self.created_dirs.drain(..) {
            if let Err(e) = fs::remove_dir(&dir) {
                warn!("Failed to remove {}: {e}", dir.display());
            }
        }
    }

    fn ensure_dir(&mut self) -> io::Result<()> {
        if self.dir.is_dir() {
            return Ok(());
        }
        let missing: Vec<PathBuf> = self
            .dir
            .ancestors()
            .take_while(|ancestor| !ancestor.as_os_str().is_empty() && !ancestor.exists())
            .map(Path::to_path_buf)
            .collect();
        fs::create_dir_all(&self.dir)?;
        self.created_dirs.extend(missing);
        Ok(())
    }
}

/// Replace `path` with `bytes` via a synced temporary file in the same
/// directory
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;

    fn manifest() -> Manifest {
        Manifest::parse(r#"{"name":"Alpha","main":"index.js"}"#, Path::new("manifest.json"))
            .unwrap()
    }

    #[test]
    fn test_commit_creates_output_directories() {
        let temp = TempDir::new().unwrap();
        let mut output = UnitOutput::new(temp.path().join("dist/alpha"));

        let artifact = output.commit_artifact(b"code").unwrap();
        let manifest_path = output.commit_manifest(&manifest()).unwrap();

        assert_eq!(fs::read(&artifact).unwrap(), b"code");
        assert_eq!(
            fs::read_to_string(manifest_path).unwrap(),
            r#"{"name":"Alpha","main":"index.js"}"#
        );
        let names: Vec<String> = fs::read_dir(output.dir())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 2, "no temporary files left: {names:?}");
    }

    #[test]
    fn test_rollback_removes_new_artifact_and_directories() {
        let temp = TempDir::new().unwrap();
        let mut output = UnitOutput::new(temp.path().join("dist/alpha"));

        output.commit_artifact(b"code").unwrap();
        output.rollback();

        assert!(!temp.path().join("dist").exists());
    }

    #[test]
    fn test_rollback_restores_previous_artifact() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("dist/alpha");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(ARTIFACT_FILE_NAME), b"old").unwrap();
        fs::write(dir.join(MANIFEST_FILE_NAME), b"{}").unwrap();

        let mut output = UnitOutput::new(dir.clone());
        output.commit_artifact(b"new").unwrap();
        assert_eq!(fs::read(dir.join(ARTIFACT_FILE_NAME)).unwrap(), b"new");
        output.rollback();

        assert_eq!(fs::read(dir.join(ARTIFACT_FILE_NAME)).unwrap(), b"old");
        assert_eq!(fs::read(dir.join(MANIFEST_FILE_NAME)).unwrap(), b"{}");
    }

    #[test]
    fn test_rollback_without_writes_is_a_no_op() {
        let temp = TempDir::new().unwrap();
        let mut output = UnitOutput::new(temp.path().join("dist/alpha"));
        output.rollback();
        assert!(!temp.path().join("dist").exists());
    }

    #[test]
    fn test_write_atomic_replaces_contents() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("file.txt");
        write_atomic(&path, b"first version").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");
    }
}
