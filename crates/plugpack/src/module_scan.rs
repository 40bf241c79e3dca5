//! Import and export discovery for transformed modules
//!
//! The scanner parses a module once and records, with source spans, every
//! construct the code generator has to rewrite:
//! - top-level `import` / `export` statements ([`ModuleItem`])
//! - string-literal `require("x")` calls and `import()` expressions anywhere
//!   in the module ([`ModuleReference`])
//! - every read of an imported binding ([`BindingReference`]), resolved
//!   through the semantic model so shadowing names are left alone
//! - runtime helpers the module calls as `babelHelpers.<name>`
//!
//! Results are owned data so they outlive the parser's arena.

use std::path::Path;

use indexmap::IndexSet;
use oxc::{
    ast::ast::{
        Argument, CallExpression, Declaration, ExportDefaultDeclarationKind, Expression,
        IdentifierReference, ImportDeclarationSpecifier, ImportExpression, ObjectProperty,
        StaticMemberExpression, Statement, TaggedTemplateExpression,
    },
    ast_visit::{Visit, walk},
    parser::Parser,
    semantic::{Scoping, SemanticBuilder},
    span::{GetSpan, SourceType, Span},
    syntax::symbol::SymbolId,
};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::{error::BuildResult, transform::diagnostics_error};

/// A binding introduced by an `import` statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportBinding {
    /// `import x from "m"`
    Default(String),
    /// `import { imported as local } from "m"`
    Named { imported: String, local: String },
    /// `import * as x from "m"`
    Namespace(String),
}

/// What `export default` exports
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefaultExport {
    /// `export default function name() {}` / `export default class Name {}`
    Declaration(String),
    /// Anonymous function or class declaration ending at `end`
    AnonymousDeclaration { end: u32 },
    /// Any other expression
    Expression,
}

/// A top-level module syntax statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleItem {
    Import {
        span: Span,
        specifier: String,
        bindings: Vec<ImportBinding>,
    },
    /// `export <declaration>`; `keyword_span` covers the `export` keyword
    ExportDeclaration {
        keyword_span: Span,
        names: Vec<String>,
    },
    /// `keyword_span` covers `export default`
    ExportDefault {
        keyword_span: Span,
        value: DefaultExport,
    },
    /// `export { local as exported }` as `(exported, local)` pairs
    ExportLocals {
        span: Span,
        specifiers: Vec<(String, String)>,
    },
    /// `export { imported as exported } from "m"` as `(exported, imported)` pairs
    ReexportNamed {
        span: Span,
        specifier: String,
        specifiers: Vec<(String, String)>,
    },
    /// `export * from "m"` or `export * as namespace from "m"`
    ReexportAll {
        span: Span,
        specifier: String,
        namespace: Option<String>,
    },
}

impl ModuleItem {
    fn start(&self) -> u32 {
        match self {
            Self::Import { span, .. }
            | Self::ExportLocals { span, .. }
            | Self::ReexportNamed { span, .. }
            | Self::ReexportAll { span, .. } => span.start,
            Self::ExportDeclaration { keyword_span, .. }
            | Self::ExportDefault { keyword_span, .. } => keyword_span.start,
        }
    }

    fn specifier(&self) -> Option<&str> {
        match self {
            Self::Import { specifier, .. }
            | Self::ReexportNamed { specifier, .. }
            | Self::ReexportAll { specifier, .. } => Some(specifier),
            Self::ExportDeclaration { .. }
            | Self::ExportDefault { .. }
            | Self::ExportLocals { .. } => None,
        }
    }
}

/// A module reference inside an expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleReference {
    /// `import(...)`; `specifier` is `None` when it is not a string literal
    DynamicImport {
        span: Span,
        specifier: Option<String>,
    },
    /// `require("m")`
    Require { span: Span, specifier: String },
}

impl ModuleReference {
    pub fn span(&self) -> Span {
        match self {
            Self::DynamicImport { span, .. } | Self::Require { span, .. } => *span,
        }
    }

    fn specifier(&self) -> Option<&str> {
        match self {
            Self::DynamicImport { specifier, .. } => specifier.as_deref(),
            Self::Require { specifier, .. } => Some(specifier),
        }
    }
}

/// How an imported binding is used at a reference site
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferencePosition {
    /// Any plain read
    Value,
    /// Called directly (`name()` or a tagged template), so `this` is unbound
    Callee,
    /// Value of a shorthand property (`{ name }`)
    Shorthand,
}

/// A reference to a binding introduced by an `import` statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingReference {
    pub span: Span,
    /// Local name of the import binding
    pub local: String,
    pub position: ReferencePosition,
}

/// Object the lowering passes call runtime helpers on
pub const HELPER_OBJECT: &str = "babelHelpers";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleScan {
    pub items: Vec<ModuleItem>,
    pub references: Vec<ModuleReference>,
    pub import_references: Vec<BindingReference>,
    /// Runtime helpers called as `babelHelpers.<name>`, in source order
    pub helpers: IndexSet<String>,
}

impl ModuleScan {
    /// Whether the module uses `import`/`export` statements
    pub fn has_module_syntax(&self) -> bool {
        !self.items.is_empty()
    }

    /// Every distinct static specifier, in source order
    pub fn specifiers(&self) -> IndexSet<String> {
        let mut located: Vec<(u32, &str)> = self
            .items
            .iter()
            .filter_map(|item| item.specifier().map(|s| (item.start(), s)))
            .chain(
                self.references
                    .iter()
                    .filter_map(|r| r.specifier().map(|s| (r.span().start, s))),
            )
            .collect();
        located.sort_by_key(|(start, _)| *start);
        located
            .into_iter()
            .map(|(_, specifier)| specifier.to_owned())
            .collect()
    }

    /// `import()` expressions whose target cannot be known statically
    pub fn computed_dynamic_imports(&self) -> impl Iterator<Item = Span> + '_ {
        self.references.iter().filter_map(|reference| match reference {
            ModuleReference::DynamicImport {
                span,
                specifier: None,
            } => Some(*span),
            _ => None,
        })
    }
}

/// Parser settings for already-transformed code
///
/// Transformed output is plain JavaScript; only the module goal is kept
/// from the original dialect.
pub fn scan_source_type(is_module: bool) -> SourceType {
    SourceType::mjs().with_module(is_module)
}

/// Parse `code` and collect its module syntax
pub fn scan_module(code: &str, path: &Path, source_type: SourceType) -> BuildResult<ModuleScan> {
    let allocator = oxc_allocator::Allocator::default();
    let parsed = Parser::new(&allocator, code, source_type).parse();
    if parsed.panicked || !parsed.errors.is_empty() {
        return Err(diagnostics_error(path, "parse", &parsed.errors));
    }

    let mut scan = ModuleScan::default();
    for statement in &parsed.program.body {
        if let Some(item) = scan_statement(statement) {
            scan.items.push(item);
        }
    }

    let scoping = SemanticBuilder::new().build(&parsed.program).semantic.into_scoping();
    let mut collector = ReferenceCollector::new(&scoping, import_symbols(&parsed.program.body));
    collector.visit_program(&parsed.program);
    scan.references = collector.references;
    scan.import_references = collector.import_references;
    scan.helpers = collector.helpers;
    Ok(scan)
}

fn import_symbols(body: &[Statement<'_>]) -> FxHashSet<SymbolId> {
    body.iter()
        .filter_map(|statement| match statement {
            Statement::ImportDeclaration(decl) if !decl.import_kind.is_type() => {
                decl.specifiers.as_ref()
            }
            _ => None,
        })
        .flatten()
        .filter_map(|specifier| specifier.local().symbol_id.get())
        .collect()
}

fn scan_statement(statement: &Statement<'_>) -> Option<ModuleItem> {
    match statement {
        Statement::ImportDeclaration(decl) => {
            if decl.import_kind.is_type() {
                return None;
            }
            let bindings = decl
                .specifiers
                .iter()
                .flatten()
                .map(|specifier| match specifier {
                    ImportDeclarationSpecifier::ImportSpecifier(named) => ImportBinding::Named {
                        imported: named.imported.name().to_string(),
                        local: named.local.name.to_string(),
                    },
                    ImportDeclarationSpecifier::ImportDefaultSpecifier(default) => {
                        ImportBinding::Default(default.local.name.to_string())
                    }
                    ImportDeclarationSpecifier::ImportNamespaceSpecifier(namespace) => {
                        ImportBinding::Namespace(namespace.local.name.to_string())
                    }
                })
                .collect();
            Some(ModuleItem::Import {
                span: decl.span,
                specifier: decl.source.value.to_string(),
                bindings,
            })
        }
        Statement::ExportNamedDeclaration(decl) => {
            if decl.export_kind.is_type() {
                return None;
            }
            if let Some(declaration) = &decl.declaration {
                return Some(ModuleItem::ExportDeclaration {
                    keyword_span: Span::new(decl.span.start, declaration.span().start),
                    names: declared_names(declaration),
                });
            }
            let specifiers: Vec<(String, String)> = decl
                .specifiers
                .iter()
                .filter(|s| !s.export_kind.is_type())
                .map(|s| (s.exported.name().to_string(), s.local.name().to_string()))
                .collect();
            match &decl.source {
                Some(source) => Some(ModuleItem::ReexportNamed {
                    span: decl.span,
                    specifier: source.value.to_string(),
                    specifiers,
                }),
                None => Some(ModuleItem::ExportLocals {
                    span: decl.span,
                    specifiers,
                }),
            }
        }
        Statement::ExportDefaultDeclaration(decl) => {
            let value = match &decl.declaration {
                ExportDefaultDeclarationKind::FunctionDeclaration(function) => {
                    function.id.as_ref().map_or(
                        DefaultExport::AnonymousDeclaration {
                            end: function.span.end,
                        },
                        |id| DefaultExport::Declaration(id.name.to_string()),
                    )
                }
                ExportDefaultDeclarationKind::ClassDeclaration(class) => class.id.as_ref().map_or(
                    DefaultExport::AnonymousDeclaration {
                        end: class.span.end,
                    },
                    |id| DefaultExport::Declaration(id.name.to_string()),
                ),
                _ => DefaultExport::Expression,
            };
            Some(ModuleItem::ExportDefault {
                keyword_span: Span::new(decl.span.start, decl.declaration.span().start),
                value,
            })
        }
        Statement::ExportAllDeclaration(decl) => {
            if decl.export_kind.is_type() {
                return None;
            }
            Some(ModuleItem::ReexportAll {
                span: decl.span,
                specifier: decl.source.value.to_string(),
                namespace: decl.exported.as_ref().map(|name| name.name().to_string()),
            })
        }
        _ => None,
    }
}

fn declared_names(declaration: &Declaration<'_>) -> Vec<String> {
    match declaration {
        Declaration::VariableDeclaration(variables) => variables
            .declarations
            .iter()
            .flat_map(|declarator| declarator.id.get_binding_identifiers())
            .map(|id| id.name.to_string())
            .collect(),
        Declaration::FunctionDeclaration(function) => function
            .id
            .iter()
            .map(|id| id.name.to_string())
            .collect(),
        Declaration::ClassDeclaration(class) => {
            class.id.iter().map(|id| id.name.to_string()).collect()
        }
        _ => Vec::new(),
    }
}

/// Collects module references, import binding reads and helper calls at
/// any depth
struct ReferenceCollector<'s> {
    scoping: &'s Scoping,
    imports: FxHashSet<SymbolId>,
    references: Vec<ModuleReference>,
    import_references: Vec<BindingReference>,
    helpers: IndexSet<String>,
    /// Start offsets of identifiers in callee or shorthand position
    positions: FxHashMap<u32, ReferencePosition>,
}

impl<'s> ReferenceCollector<'s> {
    fn new(scoping: &'s Scoping, imports: FxHashSet<SymbolId>) -> Self {
        Self {
            scoping,
            imports,
            references: Vec::new(),
            import_references: Vec::new(),
            helpers: IndexSet::new(),
            positions: FxHashMap::default(),
        }
    }

    fn mark_callee(&mut self, callee: &Expression<'_>) {
        if let Expression::Identifier(identifier) = callee.get_inner_expression() {
            self.positions
                .insert(identifier.span.start, ReferencePosition::Callee);
        }
    }
}

impl<'a> Visit<'a> for ReferenceCollector<'_> {
    fn visit_identifier_reference(&mut self, it: &IdentifierReference<'a>) {
        let Some(symbol) = it
            .reference_id
            .get()
            .and_then(|reference| self.scoping.get_reference(reference).symbol_id())
        else {
            return;
        };
        if self.imports.contains(&symbol) {
            self.import_references.push(BindingReference {
                span: it.span,
                local: it.name.to_string(),
                position: self
                    .positions
                    .get(&it.span.start)
                    .copied()
                    .unwrap_or(ReferencePosition::Value),
            });
        }
    }

    fn visit_object_property(&mut self, it: &ObjectProperty<'a>) {
        if let (true, Expression::Identifier(value)) = (it.shorthand, &it.value) {
            self.positions
                .insert(value.span.start, ReferencePosition::Shorthand);
        }
        walk::walk_object_property(self, it);
    }

    fn visit_tagged_template_expression(&mut self, it: &TaggedTemplateExpression<'a>) {
        self.mark_callee(&it.tag);
        walk::walk_tagged_template_expression(self, it);
    }

    fn visit_static_member_expression(&mut self, it: &StaticMemberExpression<'a>) {
        if let Expression::Identifier(object) = &it.object {
            let unresolved = object
                .reference_id
                .get()
                .is_some_and(|reference| self.scoping.get_reference(reference).symbol_id().is_none());
            if unresolved && object.name.as_str() == HELPER_OBJECT {
                self.helpers.insert(it.property.name.to_string());
            }
        }
        walk::walk_static_member_expression(self, it);
    }

    fn visit_import_expression(&mut self, it: &ImportExpression<'a>) {
        let specifier = match &it.source {
            Expression::StringLiteral(literal) => Some(literal.value.to_string()),
            _ => None,
        };
        self.references.push(ModuleReference::DynamicImport {
            span: it.span,
            specifier,
        });
        walk::walk_import_expression(self, it);
    }

    fn visit_call_expression(&mut self, it: &CallExpression<'a>) {
        self.mark_callee(&it.callee);
        if let Expression::Identifier(callee) = &it.callee {
            if callee.name.as_str() == "require" && it.arguments.len() == 1 {
                if let Some(Argument::StringLiteral(literal)) = it.arguments.first() {
                    self.references.push(ModuleReference::Require {
                        span: it.span,
                        specifier: literal.value.to_string(),
                    });
                }
            }
        }
        walk::walk_call_expression(self, it);
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use pretty_assertions::assert_eq;

    use super::*;

    fn scan(code: &str) -> ModuleScan {
        scan_module(code, &PathBuf::from("test.js"), scan_source_type(true)).unwrap()
    }

    #[test]
    fn test_import_bindings() {
        let result = scan("import React, { useState as state } from \"react\";\nimport * as metro from \"@vendetta/metro\";\nimport \"./side-effect\";\n");
        assert_eq!(result.items.len(), 3);
        match &result.items[0] {
            ModuleItem::Import {
                specifier,
                bindings,
                ..
            } => {
                assert_eq!(specifier, "react");
                assert_eq!(
                    bindings,
                    &vec![
                        ImportBinding::Default("React".to_owned()),
                        ImportBinding::Named {
                            imported: "useState".to_owned(),
                            local: "state".to_owned(),
                        },
                    ]
                );
            }
            other => panic!("unexpected item {other:?}"),
        }
        match &result.items[2] {
            ModuleItem::Import { bindings, .. } => assert!(bindings.is_empty()),
            other => panic!("unexpected item {other:?}"),
        }
    }

    #[test]
    fn test_export_declarations_collect_names() {
        let code = "export const a = 1, { b, c: [d] } = obj;\nexport function f() {}\nexport class K {}\n";
        let result = scan(code);
        let names: Vec<Vec<String>> = result
            .items
            .iter()
            .map(|item| match item {
                ModuleItem::ExportDeclaration { names, .. } => names.clone(),
                other => panic!("unexpected item {other:?}"),
            })
            .collect();
        assert_eq!(
            names,
            vec![
                vec!["a".to_owned(), "b".to_owned(), "d".to_owned()],
                vec!["f".to_owned()],
                vec!["K".to_owned()],
            ]
        );
        match &result.items[0] {
            ModuleItem::ExportDeclaration { keyword_span, .. } => {
                assert_eq!(&code[keyword_span.start as usize..keyword_span.end as usize], "export ");
            }
            other => panic!("unexpected item {other:?}"),
        }
    }

    #[test]
    fn test_default_exports() {
        let named = scan("export default function onLoad() {}\n");
        assert!(matches!(
            &named.items[0],
            ModuleItem::ExportDefault { value: DefaultExport::Declaration(name), .. } if name == "onLoad"
        ));

        let anonymous = scan("export default class {}\n");
        assert!(matches!(
            &anonymous.items[0],
            ModuleItem::ExportDefault {
                value: DefaultExport::AnonymousDeclaration { .. },
                ..
            }
        ));

        let expression = scan("export default { onLoad() {} };\n");
        assert!(matches!(
            &expression.items[0],
            ModuleItem::ExportDefault {
                value: DefaultExport::Expression,
                ..
            }
        ));
    }

    #[test]
    fn test_export_lists_and_reexports() {
        let result = scan("const a = 1;\nexport { a, a as b };\nexport { x as y } from \"./x\";\nexport * from \"./all\";\nexport * as ns from \"./ns\";\n");
        assert!(matches!(
            &result.items[0],
            ModuleItem::ExportLocals { specifiers, .. } if specifiers == &vec![
                ("a".to_owned(), "a".to_owned()),
                ("b".to_owned(), "a".to_owned()),
            ]
        ));
        assert!(matches!(
            &result.items[1],
            ModuleItem::ReexportNamed { specifier, specifiers, .. }
                if specifier == "./x" && specifiers == &vec![("y".to_owned(), "x".to_owned())]
        ));
        assert!(matches!(
            &result.items[2],
            ModuleItem::ReexportAll { namespace: None, .. }
        ));
        assert!(matches!(
            &result.items[3],
            ModuleItem::ReexportAll { namespace: Some(ns), .. } if ns == "ns"
        ));
    }

    #[test]
    fn test_references_at_any_depth() {
        let code = "function load() { return import(\"./lazy\"); }\nconst dep = require(\"dep\");\nimport(name);\nrequire(name);\n";
        let result = scan(code);
        assert!(!result.has_module_syntax());
        assert_eq!(result.references.len(), 3);
        assert_eq!(result.computed_dynamic_imports().count(), 1);
        let specifiers: Vec<String> = result.specifiers().into_iter().collect();
        assert_eq!(specifiers, vec!["./lazy".to_owned(), "dep".to_owned()]);
    }

    #[test]
    fn test_specifiers_are_deduplicated_in_source_order() {
        let result = scan("import { a } from \"./b\";\nimport { c } from \"./a\";\nexport { d } from \"./b\";\n");
        let specifiers: Vec<String> = result.specifiers().into_iter().collect();
        assert_eq!(specifiers, vec!["./b".to_owned(), "./a".to_owned()]);
    }

    #[test]
    fn test_import_reads_are_resolved_through_scopes() {
        let code = "import run, { log } from \"./dep\";\nrun();\nconst o = { log };\nfunction f(log) { return log; }\nconsole.log(run);\n";
        let result = scan(code);
        let found: Vec<(&str, ReferencePosition)> = result
            .import_references
            .iter()
            .map(|reference| (reference.local.as_str(), reference.position))
            .collect();
        assert_eq!(
            found,
            vec![
                ("run", ReferencePosition::Callee),
                ("log", ReferencePosition::Shorthand),
                ("run", ReferencePosition::Value),
            ]
        );
        let first = &result.import_references[0];
        assert_eq!(&code[first.span.start as usize..first.span.end as usize], "run");
    }

    #[test]
    fn test_runtime_helpers_are_collected() {
        let result = scan("babelHelpers.classCallCheck(this, A);\nbabelHelpers.defineProperty(this, \"x\", 1);\nbabelHelpers.classCallCheck(this, B);\nfunction g(babelHelpers) { return babelHelpers.notAHelper; }\n");
        let helpers: Vec<&str> = result.helpers.iter().map(String::as_str).collect();
        assert_eq!(helpers, vec!["classCallCheck", "defineProperty"]);
    }

    #[test]
    fn test_parse_error_is_reported() {
        let err = scan_module("import {", &PathBuf::from("bad.js"), scan_source_type(true)).unwrap_err();
        assert!(err.to_string().contains("bad.js"));
    }
}
