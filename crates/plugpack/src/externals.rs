//! Externalization policy
//!
//! Some imports are provided by the host at runtime and must never be
//! bundled. They are recognised before module resolution runs:
//!
//! 1. Specifiers under a reserved namespace prefix map to a nested global
//!    derived from the specifier: `@vendetta/metro/common` becomes
//!    `vendetta.metro.common`.
//! 2. Specifiers listed in the globals table map to the configured path
//!    (`react` -> `window.React`).
//!
//! Anything else is bundled normally.

use indexmap::IndexMap;
use serde::Deserialize;

/// Reserved namespaces that always resolve to host globals
pub const DEFAULT_PREFIXES: [&str; 2] = ["@vendetta", "@bunny"];

/// Well-known packages the host exposes on `window`
pub const DEFAULT_GLOBALS: [(&str, &str); 1] = [("react", "window.React")];

/// A dotted property path to a pre-existing global, e.g. `vendetta.metro`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GlobalPath {
    segments: Vec<String>,
}

impl GlobalPath {
    pub fn parse(path: &str) -> Self {
        Self {
            segments: path.split('.').map(str::to_owned).collect(),
        }
    }

    /// Derive the global for a reserved-namespace specifier.
    ///
    /// The leading `@` is dropped and every `/` becomes a property access.
    pub fn from_namespaced_specifier(specifier: &str) -> Self {
        let stripped = specifier.strip_prefix('@').unwrap_or(specifier);
        Self {
            segments: stripped.split('/').map(str::to_owned).collect(),
        }
    }

    /// Render the path as a JavaScript expression.
    ///
    /// Segments that are not valid identifiers use computed member access so
    /// the expression always parses.
    pub fn to_expression(&self) -> String {
        let mut expression = String::new();
        for (index, segment) in self.segments.iter().enumerate() {
            match (index, is_identifier(segment)) {
                (0, true) => expression.push_str(segment),
                (0, false) => {
                    expression.push_str("globalThis");
                    push_computed(&mut expression, segment);
                }
                (_, true) => {
                    expression.push('.');
                    expression.push_str(segment);
                }
                (_, false) => push_computed(&mut expression, segment),
            }
        }
        expression
    }
}

impl std::fmt::Display for GlobalPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

fn push_computed(expression: &mut String, segment: &str) {
    expression.push('[');
    // serde_json string escaping is valid JavaScript string syntax
    expression.push_str(&serde_json::Value::from(segment).to_string());
    expression.push(']');
}

fn is_identifier(segment: &str) -> bool {
    let mut chars = segment.chars();
    chars
        .next()
        .is_some_and(|first| first == '_' || first == '$' || first.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c == '$' || c.is_ascii_alphanumeric())
}

/// Which import specifiers are replaced by host globals
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExternalPolicy {
    /// Namespace prefixes (e.g. `@vendetta`) whose imports map to nested globals
    pub prefixes: Vec<String>,
    /// Exact specifier to global path table
    pub globals: IndexMap<String, String>,
}

impl Default for ExternalPolicy {
    fn default() -> Self {
        Self {
            prefixes: DEFAULT_PREFIXES.iter().map(|p| (*p).to_owned()).collect(),
            globals: DEFAULT_GLOBALS
                .iter()
                .map(|(specifier, global)| ((*specifier).to_owned(), (*global).to_owned()))
                .collect(),
        }
    }
}

impl ExternalPolicy {
    /// Global that replaces `specifier`, or `None` when it should be bundled
    pub fn global_for(&self, specifier: &str) -> Option<GlobalPath> {
        if self
            .prefixes
            .iter()
            .any(|prefix| is_under_namespace(specifier, prefix))
        {
            return Some(GlobalPath::from_namespaced_specifier(specifier));
        }
        self.globals.get(specifier).map(|path| GlobalPath::parse(path))
    }
}

fn is_under_namespace(specifier: &str, prefix: &str) -> bool {
    specifier
        .strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}
