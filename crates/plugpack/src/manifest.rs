//! Unit manifest model
//!
//! A manifest is kept as the JSON object it was read from, with typed access
//! to the two fields the pipeline needs. Rewriting sets `main` and `hash` and
//! leaves every other field, and the field order, untouched.

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde_json::{Map, Value};

use crate::error::{BuildError, BuildResult};

/// Filename of the built artifact inside a unit's output directory
pub const ARTIFACT_FILE_NAME: &str = "index.js";

/// Filename of the manifest, in both the source and the output directory
pub const MANIFEST_FILE_NAME: &str = "manifest.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    document: Map<String, Value>,
    name: String,
    main: String,
}

impl Manifest {
    /// Read and validate the manifest at `path`
    pub fn load(path: &Path) -> BuildResult<Self> {
        let text = fs::read_to_string(path).map_err(|source| BuildError::ManifestIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, path)
    }

    /// Parse manifest text; `path` is only used for error messages
    pub fn parse(text: &str, path: &Path) -> BuildResult<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| BuildError::manifest(path, format!("not valid JSON: {e}")))?;
        let Value::Object(document) = value else {
            return Err(BuildError::manifest(path, "expected a JSON object"));
        };

        let name = string_field(&document, "name", path)?;
        let main = string_field(&document, "main", path)?;
        Ok(Self {
            document,
            name,
            main,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Entry module path, relative to the unit's source root
    pub fn main(&self) -> &str {
        &self.main
    }

    pub fn hash(&self) -> Option<&str> {
        self.document.get("hash").and_then(Value::as_str)
    }

    pub fn entry_path(&self, source_root: &Path) -> PathBuf {
        source_root.join(&self.main)
    }

    /// Copy of this manifest pointing at a built artifact
    ///
    /// `hash` keeps its position when already present and is appended
    /// otherwise.
    pub fn rewrite(&self, artifact_name: &str, digest: &str) -> Self {
        let mut document = self.document.clone();
        document.insert("main".to_owned(), Value::from(artifact_name));
        document.insert("hash".to_owned(), Value::from(digest));
        Self {
            document,
            name: self.name.clone(),
            main: artifact_name.to_owned(),
        }
    }

    /// Compact JSON text, fields in document order
    pub fn to_json(&self) -> String {
        Value::Object(self.document.clone()).to_string()
    }
}

fn string_field(document: &Map<String, Value>, field: &str, path: &Path) -> BuildResult<String> {
    document
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| BuildError::manifest(path, format!("missing string field `{field}`")))
}
