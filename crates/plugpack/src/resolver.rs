use std::{
    ffi::OsString,
    hash::BuildHasherDefault,
    path::{Path, PathBuf},
};

use indexmap::IndexMap;
use log::{debug, trace, warn};
use rustc_hash::FxHasher;
use serde_json::Value;

type FxIndexMap<K, V> = IndexMap<K, V, BuildHasherDefault<FxHasher>>;

/// Extensions tried, in order, when a specifier names a file without one
pub const DEFAULT_EXTENSIONS: [&str; 9] = [
    ".ts", ".tsx", ".mts", ".cts", ".js", ".jsx", ".mjs", ".cjs", ".json",
];

/// `package.json` export conditions, in order of preference
const EXPORT_CONDITIONS: [&str; 4] = ["import", "module", "default", "require"];

/// Entry fields consulted when a package has no usable `exports`
const ENTRY_FIELDS: [&str; 2] = ["module", "main"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecifierKind {
    /// `./x` or `../x`
    Relative,
    /// `/abs/path/x`
    Absolute,
    /// A package name, optionally followed by a subpath
    Bare,
}

impl SpecifierKind {
    pub fn of(specifier: &str) -> Self {
        if specifier == "."
            || specifier == ".."
            || specifier.starts_with("./")
            || specifier.starts_with("../")
        {
            Self::Relative
        } else if Path::new(specifier).is_absolute() {
            Self::Absolute
        } else {
            Self::Bare
        }
    }
}

/// A bare specifier split into its package name and subpath
#[derive(Debug, PartialEq, Eq)]
struct PackageSpecifier<'a> {
    /// `lodash` or `@scope/pkg`
    name: &'a str,
    /// Everything after the package name, without the leading slash
    subpath: Option<&'a str>,
}

impl<'a> PackageSpecifier<'a> {
    fn parse(specifier: &'a str) -> Option<Self> {
        let name_segments = if specifier.starts_with('@') { 2 } else { 1 };
        let mut split_at = None;
        for (seen, (index, _)) in specifier.match_indices('/').enumerate() {
            if seen + 1 == name_segments {
                split_at = Some(index);
                break;
            }
        }

        let (name, subpath) = match split_at {
            Some(index) => (&specifier[..index], Some(&specifier[index + 1..])),
            None => (specifier, None),
        };
        if name.is_empty() || (name_segments == 2 && !name.contains('/')) {
            return None;
        }
        Some(Self {
            name,
            subpath: subpath.filter(|s| !s.is_empty()),
        })
    }
}

/// Resolves import specifiers to module files on disk
///
/// Relative and absolute specifiers are resolved against the importing file.
/// Bare specifiers are looked up in `node_modules` directories, walking up
/// from the importer.
#[derive(Debug)]
pub struct ModuleResolver {
    extensions: Vec<String>,
    /// Cache keyed by (importer directory, specifier)
    module_cache: FxIndexMap<(PathBuf, String), Option<PathBuf>>,
    /// Parsed `package.json` documents keyed by package directory
    package_cache: FxIndexMap<PathBuf, Option<Value>>,
}

impl Default for ModuleResolver {
    fn default() -> Self {
        Self::new(DEFAULT_EXTENSIONS.iter().map(|ext| (*ext).to_owned()).collect())
    }
}

impl ModuleResolver {
    pub fn new(extensions: Vec<String>) -> Self {
        Self {
            extensions,
            module_cache: FxIndexMap::default(),
            package_cache: FxIndexMap::default(),
        }
    }

    /// Canonicalize a path, handling errors gracefully
    fn canonicalize_path(path: PathBuf) -> PathBuf {
        match path.canonicalize() {
            Ok(canonical) => canonical,
            Err(e) => {
                warn!("Failed to canonicalize path {}: {}", path.display(), e);
                path
            }
        }
    }

    /// Resolve the entry module of a unit
    pub fn resolve_entry(&mut self, entry: &Path) -> Option<PathBuf> {
        self.resolve_path(entry).map(Self::canonicalize_path)
    }

    /// Resolve `specifier` as imported from the file at `importer`
    pub fn resolve(&mut self, specifier: &str, importer: &Path) -> Option<PathBuf> {
        let base_dir = importer.parent().unwrap_or_else(|| Path::new("."));
        let key = (base_dir.to_path_buf(), specifier.to_owned());
        if let Some(cached) = self.module_cache.get(&key) {
            return cached.clone();
        }

        let resolved = match SpecifierKind::of(specifier) {
            SpecifierKind::Relative => self.resolve_path(&base_dir.join(specifier)),
            SpecifierKind::Absolute => self.resolve_path(Path::new(specifier)),
            SpecifierKind::Bare => self.resolve_package(specifier, base_dir),
        }
        .map(Self::canonicalize_path);

        match &resolved {
            Some(path) => trace!("Resolved '{specifier}' to {}", path.display()),
            None => debug!(
                "Could not resolve '{specifier}' from {}",
                importer.display()
            ),
        }
        self.module_cache.insert(key, resolved.clone());
        resolved
    }

    /// Resolve a path as a file first, then as a directory
    fn resolve_path(&mut self, target: &Path) -> Option<PathBuf> {
        self.resolve_file(target)
            .or_else(|| self.resolve_directory(target))
    }

    /// Try the exact path, then the path with each known extension appended
    fn resolve_file(&self, target: &Path) -> Option<PathBuf> {
        if target.is_file() {
            return Some(target.to_path_buf());
        }
        self.extensions.iter().find_map(|extension| {
            let mut candidate = OsString::from(target.as_os_str());
            candidate.push(extension);
            let candidate = PathBuf::from(candidate);
            candidate.is_file().then_some(candidate)
        })
    }

    /// Resolve a directory through its `package.json` entry or its index file
    fn resolve_directory(&mut self, dir: &Path) -> Option<PathBuf> {
        if !dir.is_dir() {
            return None;
        }
        if let Some(entry) = self
            .package_json(dir)
            .and_then(|manifest| package_entry(&manifest))
        {
            let target = dir.join(entry);
            if let Some(found) = self.resolve_file(&target).or_else(|| self.resolve_index(&target)) {
                return Some(found);
            }
        }
        self.resolve_index(dir)
    }

    fn resolve_index(&self, dir: &Path) -> Option<PathBuf> {
        if dir.is_dir() {
            self.resolve_file(&dir.join("index"))
        } else {
            None
        }
    }

    /// Look the package up in `node_modules`, nearest directory first
    fn resolve_package(&mut self, specifier: &str, base_dir: &Path) -> Option<PathBuf> {
        let package = PackageSpecifier::parse(specifier)?;
        for ancestor in base_dir.ancestors() {
            let package_dir = ancestor.join("node_modules").join(package.name);
            if !package_dir.is_dir() {
                continue;
            }

            if let Some(target) = self
                .package_json(&package_dir)
                .and_then(|manifest| manifest.get("exports").cloned())
                .and_then(|exports| resolve_exports(&exports, package.subpath))
            {
                return self.resolve_path(&package_dir.join(target));
            }

            return match package.subpath {
                Some(subpath) => self.resolve_path(&package_dir.join(subpath)),
                None => self.resolve_directory(&package_dir),
            };
        }
        None
    }

    /// Read and cache `dir/package.json`
    fn package_json(&mut self, dir: &Path) -> Option<Value> {
        if let Some(cached) = self.package_cache.get(dir) {
            return cached.clone();
        }

        let path = dir.join("package.json");
        let manifest = if path.is_file() {
            match std::fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|text| serde_json::from_str::<Value>(&text).map_err(|e| e.to_string()))
            {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!("Ignoring unreadable {}: {e}", path.display());
                    None
                }
            }
        } else {
            None
        };
        self.package_cache.insert(dir.to_path_buf(), manifest.clone());
        manifest
    }
}

/// `module` or `main` field of a package manifest
fn package_entry(manifest: &Value) -> Option<String> {
    ENTRY_FIELDS
        .iter()
        .find_map(|field| manifest.get(*field).and_then(Value::as_str))
        .map(str::to_owned)
}

/// Resolve a subpath through a `package.json` `exports` field
fn resolve_exports(exports: &Value, subpath: Option<&str>) -> Option<String> {
    let key = subpath.map_or_else(|| ".".to_owned(), |subpath| format!("./{subpath}"));
    match exports {
        Value::Object(map) if map.keys().any(|k| k.starts_with('.')) => {
            map.get(&key).and_then(select_condition)
        }
        Value::String(_) | Value::Object(_) | Value::Array(_) if key == "." => {
            select_condition(exports)
        }
        _ => None,
    }
}

fn select_condition(target: &Value) -> Option<String> {
    match target {
        Value::String(path) => Some(path.clone()),
        Value::Object(conditions) => EXPORT_CONDITIONS
            .iter()
            .find_map(|condition| conditions.get(*condition).and_then(select_condition)),
        Value::Array(candidates) => candidates.iter().find_map(select_condition),
        _ => None,
    }
}

#[cfg(test)]
mod tests;
