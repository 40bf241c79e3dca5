//! Shared type definitions for the plugpack crate
//!
//! Types used by both the resolver and the code generator live here to
//! avoid circular module dependencies.

use std::path::Path;

/// Classification of a bundled module based on where it was found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleKind {
    /// Part of the unit's own source tree
    FirstParty,

    /// Installed package found under a `node_modules` directory
    ThirdParty,
}

impl ModuleKind {
    /// Classify a resolved module path
    pub fn of_path(path: &Path) -> Self {
        if path
            .components()
            .any(|component| component.as_os_str() == "node_modules")
        {
            Self::ThirdParty
        } else {
            Self::FirstParty
        }
    }
}

impl std::fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FirstParty => write!(f, "first-party"),
            Self::ThirdParty => write!(f, "third-party"),
        }
    }
}

/// How a module's code is wrapped in the bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleFormat {
    /// Uses `import`/`export` syntax; gets an `__esModule` marker and getters
    Esm,
    /// Plain script or CommonJS; `module`, `exports` and `require` are used as-is
    CommonJs,
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn test_node_modules_paths_are_third_party() {
        let vendored = PathBuf::from("plugins/alpha/node_modules/lodash/index.js");
        let local = PathBuf::from("plugins/alpha/src/util.ts");
        assert_eq!(ModuleKind::of_path(&vendored), ModuleKind::ThirdParty);
        assert_eq!(ModuleKind::of_path(&local), ModuleKind::FirstParty);
        assert_eq!(ModuleKind::ThirdParty.to_string(), "third-party");
    }
}
