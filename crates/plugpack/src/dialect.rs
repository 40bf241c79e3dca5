//! Source dialect detection from module filenames
//!
//! A module's extension is read as four independent markers:
//!
//! ```text
//! .  [m]  [c]  (ts|js)  [x]
//!     |    |      |      `-- component syntax (JSX / TSX)
//!     |    |      `--------- language: typed or untyped
//!     |    `---------------- legacy module (CommonJS goal)
//!     `--------------------- ES module system
//! ```
//!
//! The markers are parsed once into a [`Dialect`]. Combining either module
//! marker with component syntax (`.mtsx`, `.cjsx`, ...) is not a dialect the
//! parser supports, so those files get the [`Dialect::Inconsistent`] sentinel
//! and are passed through untransformed.

use std::path::Path;

use oxc::span::SourceType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleSystem {
    Classic,
    Esm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LegacyModule {
    Plain,
    Legacy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Typed,
    Untyped,
}

/// Component (JSX) syntax; the flavor always follows the [`Language`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentSyntax {
    None,
    TypedFlavor,
    UntypedFlavor,
}

/// A fully parsed, supported combination of extension markers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DialectSpec {
    pub module_system: ModuleSystem,
    pub legacy_module: LegacyModule,
    pub language: Language,
    pub component_syntax: ComponentSyntax,
}

/// Result of analysing a module filename
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    /// A script dialect the transform stage knows how to parse
    Script(DialectSpec),
    /// Module marker combined with component syntax; passed through as-is
    Inconsistent,
    /// Not a script extension at all (e.g. `.json`)
    Unrecognized,
}

impl Dialect {
    pub fn from_path(path: &Path) -> Self {
        path.file_name()
            .and_then(|name| name.to_str())
            .map_or(Self::Unrecognized, Self::from_file_name)
    }

    pub fn from_file_name(name: &str) -> Self {
        let Some((_, extension)) = name.rsplit_once('.') else {
            return Self::Unrecognized;
        };

        let (rest, has_component) = strip_marker(extension, "x");
        let (rest, language) = if let Some(rest) = rest.strip_suffix("ts") {
            (rest, Language::Typed)
        } else if let Some(rest) = rest.strip_suffix("js") {
            (rest, Language::Untyped)
        } else {
            return Self::Unrecognized;
        };
        let (rest, has_legacy) = strip_marker(rest, "c");
        let (rest, has_esm) = strip_marker(rest, "m");
        if !rest.is_empty() {
            return Self::Unrecognized;
        }

        if (has_esm || has_legacy) && has_component {
            return Self::Inconsistent;
        }

        let component_syntax = match (has_component, language) {
            (false, _) => ComponentSyntax::None,
            (true, Language::Typed) => ComponentSyntax::TypedFlavor,
            (true, Language::Untyped) => ComponentSyntax::UntypedFlavor,
        };

        Self::Script(DialectSpec {
            module_system: if has_esm {
                ModuleSystem::Esm
            } else {
                ModuleSystem::Classic
            },
            legacy_module: if has_legacy {
                LegacyModule::Legacy
            } else {
                LegacyModule::Plain
            },
            language,
            component_syntax,
        })
    }

    pub fn spec(self) -> Option<DialectSpec> {
        match self {
            Self::Script(spec) => Some(spec),
            Self::Inconsistent | Self::Unrecognized => None,
        }
    }
}

fn strip_marker<'a>(input: &'a str, marker: &str) -> (&'a str, bool) {
    input
        .strip_suffix(marker)
        .map_or((input, false), |rest| (rest, true))
}

impl DialectSpec {
    /// Parser configuration for this dialect
    ///
    /// Legacy (`.cjs`/`.cts`) files are parsed with the script goal; all
    /// other files are parsed as ES modules, which is what the bundler
    /// expects from sources that use `import`/`export`.
    pub fn source_type(self) -> SourceType {
        let is_module = self.legacy_module == LegacyModule::Plain;
        SourceType::mjs()
            .with_module(is_module)
            .with_typescript(self.language == Language::Typed)
            .with_jsx(self.component_syntax != ComponentSyntax::None)
    }
}

impl std::fmt::Display for DialectSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let module = match self.module_system {
            ModuleSystem::Esm => "m",
            ModuleSystem::Classic => "",
        };
        let legacy = match self.legacy_module {
            LegacyModule::Legacy => "c",
            LegacyModule::Plain => "",
        };
        let language = match self.language {
            Language::Typed => "ts",
            Language::Untyped => "js",
        };
        let component = match self.component_syntax {
            ComponentSyntax::None => "",
            ComponentSyntax::TypedFlavor | ComponentSyntax::UntypedFlavor => "x",
        };
        write!(f, ".{module}{legacy}{language}{component}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str) -> DialectSpec {
        match Dialect::from_file_name(name) {
            Dialect::Script(spec) => spec,
            other => panic!("expected a script dialect for {name}, got {other:?}"),
        }
    }

    #[test]
    fn test_plain_extensions() {
        let ts = spec("index.ts");
        assert_eq!(ts.language, Language::Typed);
        assert_eq!(ts.module_system, ModuleSystem::Classic);
        assert_eq!(ts.legacy_module, LegacyModule::Plain);
        assert_eq!(ts.component_syntax, ComponentSyntax::None);

        let js = spec("index.js");
        assert_eq!(js.language, Language::Untyped);
    }

    #[test]
    fn test_component_flavor_follows_language() {
        assert_eq!(spec("App.tsx").component_syntax, ComponentSyntax::TypedFlavor);
        assert_eq!(spec("App.jsx").component_syntax, ComponentSyntax::UntypedFlavor);
    }

    #[test]
    fn test_module_markers() {
        let mjs = spec("lib.mjs");
        assert_eq!(mjs.module_system, ModuleSystem::Esm);
        assert_eq!(mjs.legacy_module, LegacyModule::Plain);

        let cts = spec("lib.cts");
        assert_eq!(cts.legacy_module, LegacyModule::Legacy);
        assert_eq!(cts.language, Language::Typed);

        let both = spec("lib.mcjs");
        assert_eq!(both.module_system, ModuleSystem::Esm);
        assert_eq!(both.legacy_module, LegacyModule::Legacy);
    }

    #[test]
    fn test_module_marker_with_component_syntax_is_inconsistent() {
        for name in ["a.mtsx", "a.mjsx", "a.ctsx", "a.cjsx", "a.mctsx"] {
            assert_eq!(
                Dialect::from_file_name(name),
                Dialect::Inconsistent,
                "{name} should be inconsistent"
            );
        }
    }

    #[test]
    fn test_unrecognized_extensions() {
        for name in ["data.json", "README", "style.css", "a.cmjs", "a.tsxx"] {
            assert_eq!(Dialect::from_file_name(name), Dialect::Unrecognized, "{name}");
        }
    }

    #[test]
    fn test_source_type_mapping() {
        let tsx = spec("App.tsx").source_type();
        assert!(tsx.is_typescript());
        assert!(tsx.is_jsx());
        assert!(tsx.is_module());

        let cjs = spec("legacy.cjs").source_type();
        assert!(!cjs.is_typescript());
        assert!(!cjs.is_module());
    }

    #[test]
    fn test_display_round_trips_markers() {
        assert_eq!(spec("x.mts").to_string(), ".mts");
        assert_eq!(spec("x.jsx").to_string(), ".jsx");
        let from_path = Dialect::from_path(Path::new("dir/x.cjs")).spec();
        assert_eq!(from_path.map(|s| s.to_string()).as_deref(), Some(".cjs"));
    }
}
