//! Bundle code generation
//!
//! Each module becomes a `function (module, exports, require)` entry in a
//! module table. ESM syntax is rewritten in place using the spans recorded by
//! [`scan_module`](crate::module_scan::scan_module):
//! - imports and re-exports are hoisted to the top of the module body as
//!   `require` calls bound to one temporary per statement
//! - every read of an imported binding becomes a member read on that
//!   temporary, so imports stay live through circular dependencies
//! - exported names become enumerable getters on `exports`
//! - `export` keywords are stripped from declarations
//!
//! The module table plus a small runtime forms the bundle program. The
//! program is finally wrapped in the immediately-invoked closure whose
//! parameters receive the host globals of every externalized import.

use std::fmt::Write as _;

use indexmap::IndexMap;
use rustc_hash::FxHashMap;

use crate::{
    externals::GlobalPath,
    module_graph::ModuleId,
    module_scan::{
        BindingReference, DefaultExport, ImportBinding, ModuleItem, ModuleReference, ModuleScan,
        ReferencePosition,
    },
    source_edit::SourceEdits,
    types::ModuleFormat,
};

/// Local name for the value of an `export default <expression>`
const DEFAULT_EXPORT_BINDING: &str = "__defaultExport";

/// Helpers shared by every module in the bundle
const RUNTIME_HELPERS: &str = r#"var __cache = [];
function require(id) {
  var cached = __cache[id];
  if (cached) return cached.exports;
  var module = __cache[id] = { exports: {} };
  __modules[id].call(module.exports, module, module.exports, require);
  return module.exports;
}
function __markEsm(target) {
  Object.defineProperty(target, "__esModule", { value: true });
}
function __export(target, getters) {
  for (var name in getters) Object.defineProperty(target, name, { enumerable: true, get: getters[name] });
}
function __reexportAll(target, source) {
  Object.keys(source).forEach(function (name) {
    if (name !== "default" && !Object.prototype.hasOwnProperty.call(target, name)) {
      Object.defineProperty(target, name, { enumerable: true, get: function () { return source[name]; } });
    }
  });
  return source;
}
function __interopDefault(source) {
  return source && source.__esModule ? source : { default: source };
}
"#;

/// Copies the entry module's exports onto the closure's `exports`
const ENTRY_EXPORTS: &str = r#"var __entry = require(0);
if (__entry && __entry.__esModule) __markEsm(exports);
Object.keys(__entry).forEach(function (name) {
  Object.defineProperty(exports, name, { enumerable: true, get: function () { return __entry[name]; } });
});
"#;

/// What a specifier refers to inside the bundle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportTarget {
    /// A bundled module
    Module(ModuleId),
    /// A closure parameter bound to a host global
    External(String),
}

impl ImportTarget {
    fn expression(&self) -> String {
        match self {
            Self::Module(id) => format!("require({id})"),
            Self::External(parameter) => parameter.clone(),
        }
    }
}

/// Rewrites one module's code into its module table entry
#[derive(Debug)]
struct ModuleRenderer<'a> {
    targets: &'a IndexMap<String, ImportTarget>,
    edits: SourceEdits,
    /// Hoisted import statements
    hoisted: Vec<String>,
    /// `(exported name, getter expression)` pairs
    getters: Vec<(String, String)>,
    /// Expression that reads each import binding, by local name
    live: FxHashMap<String, String>,
    next_temp: usize,
}

impl<'a> ModuleRenderer<'a> {
    fn new(targets: &'a IndexMap<String, ImportTarget>) -> Self {
        Self {
            targets,
            edits: SourceEdits::new(),
            hoisted: Vec::new(),
            getters: Vec::new(),
            live: FxHashMap::default(),
            next_temp: 0,
        }
    }

    fn temp(&mut self, prefix: &str) -> String {
        let name = format!("__{prefix}{}", self.next_temp);
        self.next_temp += 1;
        name
    }

    /// Expression that evaluates to the exports of `specifier`
    ///
    /// A specifier with no target is left for the runtime to reject.
    fn target(&self, specifier: &str) -> String {
        self.targets.get(specifier).map_or_else(
            || format!("require({})", js_string(specifier)),
            ImportTarget::expression,
        )
    }

    fn replace(&mut self, start: u32, end: u32, replacement: impl Into<String>) {
        self.edits.replace(start, end, replacement);
    }

    fn item(&mut self, item: &ModuleItem) {
        match item {
            ModuleItem::Import {
                span,
                specifier,
                bindings,
            } => {
                self.replace(span.start, span.end, "");
                self.import(specifier, bindings);
            }
            ModuleItem::ExportDeclaration {
                keyword_span,
                names,
            } => {
                self.replace(keyword_span.start, keyword_span.end, "");
                for name in names {
                    self.getters.push((name.clone(), name.clone()));
                }
            }
            ModuleItem::ExportDefault {
                keyword_span,
                value,
            } => match value {
                DefaultExport::Declaration(name) => {
                    self.replace(keyword_span.start, keyword_span.end, "");
                    self.getters.push(("default".to_owned(), name.clone()));
                }
                DefaultExport::AnonymousDeclaration { end } => {
                    self.replace(
                        keyword_span.start,
                        keyword_span.end,
                        format!("var {DEFAULT_EXPORT_BINDING} = "),
                    );
                    self.replace(*end, *end, ";");
                    self.getters
                        .push(("default".to_owned(), DEFAULT_EXPORT_BINDING.to_owned()));
                }
                DefaultExport::Expression => {
                    self.replace(
                        keyword_span.start,
                        keyword_span.end,
                        format!("var {DEFAULT_EXPORT_BINDING} = "),
                    );
                    self.getters
                        .push(("default".to_owned(), DEFAULT_EXPORT_BINDING.to_owned()));
                }
            },
            ModuleItem::ExportLocals { span, specifiers } => {
                self.replace(span.start, span.end, "");
                self.getters.extend(specifiers.iter().cloned());
            }
            ModuleItem::ReexportNamed {
                span,
                specifier,
                specifiers,
            } => {
                self.replace(span.start, span.end, "");
                let temp = self.temp("reexport");
                let target = self.target(specifier);
                self.hoisted.push(format!("var {temp} = {target};"));
                for (exported, imported) in specifiers {
                    let value = if imported == "default" {
                        format!("__interopDefault({temp}).default")
                    } else {
                        member(&temp, imported)
                    };
                    self.getters.push((exported.clone(), value));
                }
            }
            ModuleItem::ReexportAll {
                span,
                specifier,
                namespace,
            } => {
                self.replace(span.start, span.end, "");
                let target = self.target(specifier);
                match namespace {
                    Some(namespace) => {
                        let temp = self.temp("reexport");
                        self.hoisted.push(format!("var {temp} = {target};"));
                        self.getters.push((namespace.clone(), temp));
                    }
                    None => self
                        .hoisted
                        .push(format!("__reexportAll(exports, {target});")),
                }
            }
        }
    }

    fn import(&mut self, specifier: &str, bindings: &[ImportBinding]) {
        let target = self.target(specifier);
        if bindings.is_empty() {
            // Externals need no evaluation for side effects
            if matches!(self.targets.get(specifier), Some(ImportTarget::External(_))) {
                return;
            }
            self.hoisted.push(format!("{target};"));
            return;
        }

        let temp = self.temp("import");
        let mut statement = format!("var {temp} = {target};");
        for binding in bindings {
            let (local, value) = match binding {
                ImportBinding::Default(local) => {
                    let interop = format!("{temp}_default");
                    let _ = write!(statement, " var {interop} = __interopDefault({temp});");
                    (local, format!("{interop}.default"))
                }
                ImportBinding::Named { imported, local } => (local, member(&temp, imported)),
                ImportBinding::Namespace(local) => (local, temp.clone()),
            };
            self.live.insert(local.clone(), value);
        }
        self.hoisted.push(statement);
    }

    /// Point a read of an import binding at the imported module's exports
    fn binding_reference(&mut self, reference: &BindingReference) {
        let Some(value) = self.live.get(&reference.local) else {
            return;
        };
        let replacement = match reference.position {
            ReferencePosition::Value => value.clone(),
            ReferencePosition::Callee => format!("(0, {value})"),
            ReferencePosition::Shorthand => format!("{}: {value}", reference.local),
        };
        self.replace(reference.span.start, reference.span.end, replacement);
    }

    fn reference(&mut self, reference: &ModuleReference) {
        match reference {
            ModuleReference::Require { span, specifier } => {
                if let Some(target) = self.targets.get(specifier) {
                    let expression = target.expression();
                    self.replace(span.start, span.end, expression);
                }
            }
            ModuleReference::DynamicImport {
                span,
                specifier: Some(specifier),
            } => {
                let replacement = match self.targets.get(specifier) {
                    Some(ImportTarget::Module(id)) => format!(
                        "Promise.resolve().then(function () {{ return require({id}); }})"
                    ),
                    Some(ImportTarget::External(parameter)) => {
                        format!("Promise.resolve({parameter})")
                    }
                    None => return,
                };
                self.replace(span.start, span.end, replacement);
            }
            ModuleReference::DynamicImport {
                specifier: None, ..
            } => {}
        }
    }

    fn finish(mut self, code: &str, format: ModuleFormat) -> String {
        let body = self.edits.apply(code);
        // `export { imported }` re-exports the live binding
        for (_, value) in &mut self.getters {
            if let Some(live) = self.live.get(value.as_str()) {
                *value = live.clone();
            }
        }

        let mut rendered = String::from("function (module, exports, require) {\n");
        if format == ModuleFormat::Esm {
            rendered.push_str("__markEsm(exports);\n");
            if !self.getters.is_empty() {
                let getters: Vec<String> = self
                    .getters
                    .iter()
                    .map(|(name, value)| {
                        format!("{}: function () {{ return {value}; }}", js_string(name))
                    })
                    .collect();
                let _ = writeln!(rendered, "__export(exports, {{ {} }});", getters.join(", "));
            }
        }
        for statement in &self.hoisted {
            rendered.push_str(statement);
            rendered.push('\n');
        }
        rendered.push_str(&body);
        if !body.ends_with('\n') {
            rendered.push('\n');
        }
        rendered.push('}');
        rendered
    }
}

/// Render a script module's table entry
///
/// `targets` maps every specifier in `scan` to what it refers to.
pub fn render_module(
    code: &str,
    scan: &ModuleScan,
    format: ModuleFormat,
    targets: &IndexMap<String, ImportTarget>,
) -> String {
    let mut renderer = ModuleRenderer::new(targets);
    for item in &scan.items {
        renderer.item(item);
    }
    for reference in &scan.references {
        renderer.reference(reference);
    }
    for reference in &scan.import_references {
        renderer.binding_reference(reference);
    }
    renderer.finish(code, format)
}

/// Render a JSON module's table entry
pub fn render_json(source: &str) -> String {
    format!(
        "function (module, exports, require) {{\nmodule.exports = {};\n}}",
        source.trim()
    )
}

/// Assemble module table entries, in id order, into the bundle program
///
/// `helpers` is the rendered `babelHelpers` declaration, if any module
/// calls one; it must exist before the entry module runs.
pub fn render_program(modules: &[String], helpers: Option<&str>) -> String {
    let mut program = String::from("var __modules = [\n");
    program.push_str(&modules.join(",\n"));
    program.push_str("\n];\n");
    program.push_str(RUNTIME_HELPERS);
    if let Some(helpers) = helpers {
        program.push_str(helpers);
    }
    program.push_str(ENTRY_EXPORTS);
    program
}

/// Wrap a program in the closure that receives host globals
///
/// `externals` pairs each closure parameter with the global passed for it.
/// The result evaluates to the entry module's exports.
pub fn wrap_closure(program: &str, externals: &[(String, GlobalPath)]) -> String {
    let mut parameters = vec!["exports".to_owned()];
    let mut arguments = vec!["{}".to_owned()];
    for (parameter, global) in externals {
        parameters.push(parameter.clone());
        arguments.push(global.to_expression());
    }
    format!(
        "(function({}){{\"use strict\";{}\n;return exports}})({});\n",
        parameters.join(","),
        program.trim_end(),
        arguments.join(",")
    )
}

fn member(object: &str, property: &str) -> String {
    if is_identifier_name(property) {
        format!("{object}.{property}")
    } else {
        format!("{object}[{}]", js_string(property))
    }
}

fn is_identifier_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|first| first == '_' || first == '$' || first.is_alphabetic())
        && chars.all(|c| c == '_' || c == '$' || c.is_alphanumeric())
}

/// JSON string syntax is valid JavaScript string syntax
pub(crate) fn js_string(value: &str) -> String {
    serde_json::Value::from(value).to_string()
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::module_scan::{scan_module, scan_source_type};

    fn render(code: &str, targets: &[(&str, ImportTarget)]) -> String {
        let scan = scan_module(code, &PathBuf::from("test.js"), scan_source_type(true)).unwrap();
        let format = if scan.has_module_syntax() {
            ModuleFormat::Esm
        } else {
            ModuleFormat::CommonJs
        };
        let targets: IndexMap<String, ImportTarget> = targets
            .iter()
            .map(|(specifier, target)| ((*specifier).to_owned(), target.clone()))
            .collect();
        render_module(code, &scan, format, &targets)
    }

    #[test]
    fn test_imports_are_hoisted_requires() {
        let rendered = render(
            "console.log(a, b);\nimport a, { b } from \"./dep\";\n",
            &[("./dep", ImportTarget::Module(ModuleId::new(1)))],
        );
        insta::assert_snapshot!(rendered, @r#"
        function (module, exports, require) {
        __markEsm(exports);
        var __import0 = require(1); var __import0_default = __interopDefault(__import0);
        console.log(__import0_default.default, __import0.b);

        }
        "#);
    }

    #[test]
    fn test_import_reads_stay_live() {
        let rendered = render(
            "import { run, count } from \"./b\";\nexport function start() { return run(); }\nexport const snapshot = () => ({ count });\nexport { count };\nfunction shadow(run) { return run; }\n",
            &[("./b", ImportTarget::Module(ModuleId::new(1)))],
        );
        assert!(rendered.contains("return (0, __import0.run)();"), "got: {rendered}");
        assert!(rendered.contains("({ count: __import0.count })"), "got: {rendered}");
        assert!(
            rendered.contains("\"count\": function () { return __import0.count; }"),
            "got: {rendered}"
        );
        assert!(rendered.contains("function shadow(run) { return run; }"), "got: {rendered}");
        assert!(!rendered.contains("var run"), "got: {rendered}");
    }

    #[test]
    fn test_exports_become_getters() {
        let rendered = render(
            "export const name = \"alpha\";\nexport default function onLoad() {}\n",
            &[],
        );
        insta::assert_snapshot!(rendered, @r#"
        function (module, exports, require) {
        __markEsm(exports);
        __export(exports, { "name": function () { return name; }, "default": function () { return onLoad; } });
        const name = "alpha";
        function onLoad() {}
        }
        "#);
    }

    #[test]
    fn test_anonymous_default_export_is_bound() {
        let rendered = render("export default function () { return 1; }\n", &[]);
        assert!(
            rendered.contains("var __defaultExport = function () { return 1; };"),
            "got: {rendered}"
        );
        assert!(rendered.contains("\"default\": function () { return __defaultExport; }"));
    }

    #[test]
    fn test_externals_use_closure_parameters() {
        let rendered = render(
            "import { findByProps } from \"@vendetta/metro\";\nimport \"@vendetta/ui\";\nexport const api = findByProps(\"x\");\n",
            &[
                ("@vendetta/metro", ImportTarget::External("__ext0".to_owned())),
                ("@vendetta/ui", ImportTarget::External("__ext1".to_owned())),
            ],
        );
        assert!(rendered.contains("var __import0 = __ext0;\n"), "got: {rendered}");
        assert!(
            rendered.contains("const api = (0, __import0.findByProps)(\"x\");"),
            "got: {rendered}"
        );
        assert!(!rendered.contains("__ext1"), "got: {rendered}");
        assert!(!rendered.contains("import "), "got: {rendered}");
    }

    #[test]
    fn test_reexports() {
        let rendered = render(
            "export { x as y, default as z } from \"./x\";\nexport * from \"./all\";\nexport * as ns from \"./ns\";\n",
            &[
                ("./x", ImportTarget::Module(ModuleId::new(1))),
                ("./all", ImportTarget::Module(ModuleId::new(2))),
                ("./ns", ImportTarget::Module(ModuleId::new(3))),
            ],
        );
        assert!(rendered.contains("var __reexport0 = require(1);"), "got: {rendered}");
        assert!(rendered.contains("\"y\": function () { return __reexport0.x; }"));
        assert!(rendered.contains("\"z\": function () { return __interopDefault(__reexport0).default; }"));
        assert!(rendered.contains("__reexportAll(exports, require(2));"));
        assert!(rendered.contains("var __reexport1 = require(3);"));
        assert!(rendered.contains("\"ns\": function () { return __reexport1; }"));
    }

    #[test]
    fn test_commonjs_requires_and_dynamic_imports() {
        let rendered = render(
            "const dep = require(\"./dep\");\nconst React = require(\"react\");\nmodule.exports = function () { return import(\"./lazy\"); };\nimport(name);\n",
            &[
                ("./dep", ImportTarget::Module(ModuleId::new(1))),
                ("react", ImportTarget::External("__ext0".to_owned())),
                ("./lazy", ImportTarget::Module(ModuleId::new(2))),
            ],
        );
        assert!(!rendered.contains("__markEsm"), "got: {rendered}");
        assert!(rendered.contains("const dep = require(1);"), "got: {rendered}");
        assert!(rendered.contains("const React = __ext0;"), "got: {rendered}");
        assert!(rendered.contains(
            "return Promise.resolve().then(function () { return require(2); });"
        ));
        assert!(rendered.contains("import(name);"), "got: {rendered}");
    }

    #[test]
    fn test_json_module() {
        assert_eq!(
            render_json("{\"a\": 1}\n"),
            "function (module, exports, require) {\nmodule.exports = {\"a\": 1};\n}"
        );
    }

    #[test]
    fn test_closure_passes_globals_in_parameter_order() {
        let wrapped = wrap_closure(
            "var x = 1;\n",
            &[
                ("__ext0".to_owned(), GlobalPath::parse("window.React")),
                (
                    "__ext1".to_owned(),
                    GlobalPath::from_namespaced_specifier("@vendetta/metro"),
                ),
            ],
        );
        assert_eq!(
            wrapped,
            "(function(exports,__ext0,__ext1){\"use strict\";var x = 1;\n;return exports})({},window.React,vendetta.metro);\n"
        );
    }

    #[test]
    fn test_program_lists_modules_in_order() {
        let program = render_program(&["function () {}".to_owned(), "function () {}".to_owned()], None);
        assert!(program.starts_with("var __modules = [\nfunction () {},\nfunction () {}\n];\n"));
        assert!(program.contains("var __entry = require(0);"));
        assert!(!program.contains("babelHelpers"));
    }

    #[test]
    fn test_helpers_are_declared_before_the_entry_runs() {
        let program = render_program(&["function () {}".to_owned()], Some("var babelHelpers = {};\n"));
        let helpers = program.find("var babelHelpers").unwrap();
        let entry = program.find("var __entry").unwrap();
        assert!(helpers < entry, "got: {program}");
    }
}
