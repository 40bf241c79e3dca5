//! Syntax transform stage
//!
//! Every module the bundler visits goes through [`transform`] before it is
//! scanned for imports:
//! 1. Pick the parser dialect from the filename ([`Dialect`])
//! 2. Parse and run semantic syntax checks
//! 3. Lower a fixed set of syntax features for the target baseline
//! 4. Print plain JavaScript
//! 5. Lower classes and block scoping over the printed code ([`crate::lowering`])
//!
//! Parameter and optional-chaining lowering are always disabled; the
//! minifier that runs over the whole bundle expects those forms intact.
//! Lowered code calls runtime helpers as `babelHelpers.<name>`; the bundler
//! inlines the ones a bundle uses ([`crate::helpers`]).

use std::path::Path;

use log::trace;
use oxc::{
    codegen::Codegen,
    diagnostics::OxcDiagnostic,
    parser::Parser,
    semantic::SemanticBuilder,
    transformer::{
        ArrowFunctionsOptions, ClassPropertiesOptions, EnvOptions, HelperLoaderMode, JsxRuntime,
        TransformOptions, Transformer,
    },
};

use crate::{
    dialect::{Dialect, DialectSpec},
    error::{BuildError, BuildResult},
    lowering::{lower_block_scoping, lower_classes},
    module_scan::scan_source_type,
};

/// Browserslist query used when none is configured
pub const DEFAULT_TARGETS: &str = "defaults";

/// A syntax-lowering pass that can be requested from the transform engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoweringPass {
    Classes,
    ArrowFunctions,
    BlockScoping,
    ClassProperties,
    Parameters,
    OptionalChaining,
}

/// Passes forced on regardless of what the target baseline needs
pub const INCLUDED_PASSES: [LoweringPass; 4] = [
    LoweringPass::Classes,
    LoweringPass::ArrowFunctions,
    LoweringPass::BlockScoping,
    LoweringPass::ClassProperties,
];

/// Passes forced off regardless of what the target baseline needs
pub const EXCLUDED_PASSES: [LoweringPass; 2] =
    [LoweringPass::Parameters, LoweringPass::OptionalChaining];

impl LoweringPass {
    /// Switch this pass on or off in the engine's environment options.
    ///
    /// The engine has no class, block-scoping or parameter transforms. Class
    /// lowering is done by [`lower_classes`] and only needs static blocks
    /// folded into the class body first.
    fn apply(self, env: &mut EnvOptions, enabled: bool) {
        match self {
            Self::ArrowFunctions => {
                env.es2015.arrow_function = enabled.then(ArrowFunctionsOptions::default);
            }
            Self::ClassProperties => {
                env.es2022.class_properties = enabled.then(ClassPropertiesOptions::default);
            }
            Self::OptionalChaining => env.es2020.optional_chaining = enabled,
            Self::Classes => env.es2022.class_static_block = enabled,
            Self::BlockScoping | Self::Parameters => {}
        }
    }

    /// Lower this pass over printed code when the engine cannot
    fn lower(self, code: String, path: &Path, spec: DialectSpec) -> BuildResult<String> {
        let source_type = scan_source_type(spec.source_type().is_module());
        match self {
            Self::Classes => lower_classes(&code, path, source_type),
            Self::BlockScoping => lower_block_scoping(&code, path, source_type),
            Self::ArrowFunctions
            | Self::ClassProperties
            | Self::Parameters
            | Self::OptionalChaining => Ok(code),
        }
    }
}

/// Settings shared by every module transform in a build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformConfig {
    /// Browserslist query for baseline-driven decisions
    pub targets: String,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            targets: DEFAULT_TARGETS.to_owned(),
        }
    }
}

impl TransformConfig {
    fn transform_options(&self, path: &Path) -> BuildResult<TransformOptions> {
        let mut env = EnvOptions::from_browserslist_query(&self.targets).map_err(|e| {
            BuildError::transform(path, format!("invalid target query '{}': {e}", self.targets))
        })?;
        for pass in INCLUDED_PASSES {
            pass.apply(&mut env, true);
        }
        for pass in EXCLUDED_PASSES {
            pass.apply(&mut env, false);
        }

        let mut options = TransformOptions {
            env,
            ..TransformOptions::default()
        };
        options.jsx.jsx_plugin = true;
        options.jsx.runtime = JsxRuntime::Classic;
        options.helper_loader.mode = HelperLoaderMode::External;
        Ok(options)
    }
}

/// Transform one module.
///
/// Returns `Ok(None)` when the filename does not describe a supported script
/// dialect; the caller then uses the original source unchanged.
pub fn transform(source: &str, path: &Path, config: &TransformConfig) -> BuildResult<Option<String>> {
    match Dialect::from_path(path) {
        Dialect::Script(spec) => transform_script(source, path, spec, config).map(Some),
        Dialect::Inconsistent | Dialect::Unrecognized => {
            trace!("Passing {} through untransformed", path.display());
            Ok(None)
        }
    }
}

fn transform_script(
    source: &str,
    path: &Path,
    spec: DialectSpec,
    config: &TransformConfig,
) -> BuildResult<String> {
    trace!("Transforming {} as {spec}", path.display());
    let allocator = oxc_allocator::Allocator::default();

    let parsed = Parser::new(&allocator, source, spec.source_type()).parse();
    if parsed.panicked || !parsed.errors.is_empty() {
        return Err(diagnostics_error(path, "parse", &parsed.errors));
    }
    let mut program = parsed.program;

    let semantic = SemanticBuilder::new()
        .with_check_syntax_error(true)
        .build(&program);
    if !semantic.errors.is_empty() {
        return Err(diagnostics_error(path, "syntax", &semantic.errors));
    }
    let scoping = semantic.semantic.into_scoping();

    let options = config.transform_options(path)?;
    let transformed =
        Transformer::new(&allocator, path, &options).build_with_scoping(scoping, &mut program);
    if !transformed.errors.is_empty() {
        return Err(diagnostics_error(path, "transform", &transformed.errors));
    }

    let printed = Codegen::new().build(&program).code;
    INCLUDED_PASSES
        .into_iter()
        .try_fold(printed, |code, pass| pass.lower(code, path, spec))
}

pub(crate) fn diagnostics_error(path: &Path, phase: &str, errors: &[OxcDiagnostic]) -> BuildError {
    let messages: Vec<String> = errors.iter().map(|e| format!("{e}")).collect();
    BuildError::transform(path, format!("{phase} errors:\n{}", messages.join("\n")))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::error::ErrorKind;

    fn run(source: &str, name: &str) -> BuildResult<Option<String>> {
        transform(source, &PathBuf::from(name), &TransformConfig::default())
    }

    #[test]
    fn test_typescript_types_are_stripped() {
        let source = "interface Options { id: string }\nexport const id = (o: Options): string => o.id;\n";
        let code = run(source, "index.ts").unwrap().unwrap();
        assert!(!code.contains("interface"), "got: {code}");
        assert!(!code.contains(": string"), "got: {code}");
        assert!(code.contains("export var id"), "got: {code}");
    }

    #[test]
    fn test_classes_and_lexical_bindings_are_lowered() {
        let source = "export class Greeter {\n  constructor(name) { this.name = name; }\n  greet() { const prefix = \"hi \"; return prefix + this.name; }\n}\nexport let count = 0;\n";
        let code = run(source, "greeter.js").unwrap().unwrap();
        assert!(!code.contains("class "), "got: {code}");
        assert!(!code.contains("let "), "got: {code}");
        assert!(!code.contains("const "), "got: {code}");
        assert!(code.contains("babelHelpers.createClass(Greeter"), "got: {code}");
    }

    #[test]
    fn test_class_fields_use_external_helpers() {
        let code = run("export class Store { items = []; static #count = 0; }\n", "store.js")
            .unwrap()
            .unwrap();
        assert!(code.contains("babelHelpers.defineProperty"), "got: {code}");
        assert!(!code.contains("@oxc-project"), "got: {code}");
        assert!(!code.contains("import "), "got: {code}");
        assert!(!code.contains("class "), "got: {code}");
    }

    #[test]
    fn test_plain_field_needs_no_runtime_import() {
        let code = run("class A { x = 1 }\n", "a.js").unwrap().unwrap();
        assert!(code.contains("babelHelpers.defineProperty(this, "), "got: {code}");
        assert!(!code.contains("import "), "got: {code}");
        assert!(!code.contains("class A"), "got: {code}");
    }

    #[test]
    fn test_static_blocks_are_lowered() {
        let code = run("export class Registry { static { Registry.ready = true; } }\n", "registry.js")
            .unwrap()
            .unwrap();
        assert!(!code.contains("static"), "got: {code}");
        assert!(!code.contains("class "), "got: {code}");
    }

    #[test]
    fn test_loop_closures_get_their_own_binding() {
        let source = "export const make = () => {\n  const fns = [];\n  for (let i = 0; i < 3; i++) { fns.push(() => i); }\n  return fns;\n};\n";
        let code = run(source, "loops.js").unwrap().unwrap();
        assert!(code.contains(".call(this, i)"), "got: {code}");
        assert!(!code.contains("let "), "got: {code}");
    }

    #[test]
    fn test_arrow_functions_are_lowered() {
        let code = run("export const double = (n) => n * 2;\n", "math.js").unwrap().unwrap();
        assert!(!code.contains("=>"), "got: {code}");
        assert!(code.contains("function"), "got: {code}");
    }

    #[test]
    fn test_optional_chaining_is_kept() {
        let code = run("export function name(user) { return user?.profile?.name; }\n", "user.js")
            .unwrap()
            .unwrap();
        assert!(code.contains("?."), "got: {code}");
    }

    #[test]
    fn test_default_parameters_are_kept() {
        let code = run("export function greet(name = \"world\") { return name; }\n", "greet.js")
            .unwrap()
            .unwrap();
        assert!(code.contains("name = \"world\""), "got: {code}");
    }

    #[test]
    fn test_jsx_uses_classic_runtime() {
        let source = "import React from \"react\";\nexport const App = function() { return <div>hi</div>; };\n";
        let code = run(source, "App.jsx").unwrap().unwrap();
        assert!(code.contains("React.createElement"), "got: {code}");
    }

    #[test]
    fn test_inconsistent_dialect_passes_through() {
        let source = "export const App = () => <div/>;";
        assert_eq!(run(source, "App.mtsx").unwrap(), None);
        assert_eq!(run("{\"a\": 1}", "data.json").unwrap(), None);
    }

    #[test]
    fn test_syntax_error_is_a_transform_error() {
        let err = run("export const = ;\n", "broken.js").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transform);
        assert!(err.to_string().contains("broken.js"), "got: {err}");
    }

    #[test]
    fn test_invalid_target_query_is_reported() {
        let config = TransformConfig {
            targets: "unknownbrowser 99".to_owned(),
        };
        let err = transform("export {};", &PathBuf::from("a.js"), &config).unwrap_err();
        assert!(err.to_string().contains("invalid target query"), "got: {err}");
    }

    #[test]
    fn test_pass_lists_do_not_overlap() {
        for pass in EXCLUDED_PASSES {
            assert!(!INCLUDED_PASSES.contains(&pass));
        }
    }
}
