//! Class-to-function lowering
//!
//! Classes are rewritten innermost first and the program is reparsed after
//! each round until no class remains. Every class becomes an
//! immediately-invoked function expression:
//!
//! ```text
//! let Name = (function (_super) {
//! function Name(value) { babelHelpers.classCallCheck(this, Name); ... }
//! babelHelpers.inherits(Name, _super);
//! return babelHelpers.createClass(Name, [prototype methods], [static methods]);
//! })(Base);
//! ```
//!
//! In a derived constructor `super(...)` becomes a `babelHelpers.callSuper`
//! call whose result stands in for `this`. `super.name` in methods reads
//! through `babelHelpers.superGet` with the class (static methods) or its
//! prototype as the home object.
//!
//! Fields, private members and static blocks are lowered by the engine
//! beforehand; a class that still has them is rejected.

use std::{fmt::Write as _, path::Path};

use log::trace;
use oxc::{
    ast::ast::{
        CallExpression, Class, ClassElement, ClassType, ComputedMemberExpression,
        ExportDefaultDeclaration, ExportDefaultDeclarationKind, Expression, Function,
        MethodDefinition, MethodDefinitionKind, ReturnStatement, StaticMemberExpression,
        ThisExpression, VariableDeclarator,
    },
    ast_visit::{Visit, walk},
    span::{GetSpan, SourceType, Span},
    syntax::scope::ScopeFlags,
};
use oxc_allocator::Allocator;

use super::{NameGenerator, ends_with_semicolon, parse};
use crate::{
    code_generator::js_string,
    error::{BuildError, BuildResult},
    source_edit::SourceEdits,
};

/// Rewrite every class in `code` into constructor functions
pub fn lower_classes(code: &str, path: &Path, source_type: SourceType) -> BuildResult<String> {
    let mut code = code.to_owned();
    let mut rounds = 0usize;
    while let Some(next) = lower_innermost(&code, path, source_type)? {
        code = next;
        rounds += 1;
    }
    if rounds > 0 {
        trace!("Lowered classes in {} in {rounds} rounds", path.display());
    }
    Ok(code)
}

/// Lower every class that contains no other class
///
/// Returns `None` once the program has no classes left.
fn lower_innermost(
    code: &str,
    path: &Path,
    source_type: SourceType,
) -> BuildResult<Option<String>> {
    let allocator = Allocator::default();
    let program = parse(&allocator, code, path, source_type)?;

    let mut spans = ClassSpans::default();
    spans.visit_program(&program);
    if spans.0.is_empty() {
        return Ok(None);
    }

    let mut lowering = ClassLowering {
        code,
        path,
        classes: &spans.0,
        names: NameGenerator::for_program(&program),
        edits: SourceEdits::new(),
        name_hint: None,
        error: None,
    };
    lowering.visit_program(&program);
    if let Some(error) = lowering.error {
        return Err(error);
    }
    if lowering.edits.is_empty() {
        return Err(BuildError::transform(path, "class lowering made no progress"));
    }
    Ok(Some(lowering.edits.apply(code)))
}

#[derive(Default)]
struct ClassSpans(Vec<Span>);

impl<'a> Visit<'a> for ClassSpans {
    fn visit_class(&mut self, it: &Class<'a>) {
        self.0.push(it.span);
        walk::walk_class(self, it);
    }
}

/// Where a class appears, which decides the shape of its replacement
#[derive(Debug, Clone, Copy)]
enum Placement {
    Declaration,
    Expression,
    /// `export default class ...`, spanning the whole export statement
    ExportDefault(Span),
}

struct ClassLowering<'s> {
    code: &'s str,
    path: &'s Path,
    /// Every class in the program
    classes: &'s [Span],
    names: NameGenerator,
    edits: SourceEdits,
    /// Binding name for the anonymous class expression starting at an offset
    name_hint: Option<(u32, String)>,
    error: Option<BuildError>,
}

impl ClassLowering<'_> {
    fn is_innermost(&self, span: Span) -> bool {
        !self
            .classes
            .iter()
            .any(|other| *other != span && span.start <= other.start && other.end <= span.end)
    }

    fn lower(&mut self, class: &Class<'_>, placement: Placement) {
        if self.error.is_some() {
            return;
        }
        let (name, expression) = match self.lower_class(class, placement) {
            Ok(lowered) => lowered,
            Err(error) => {
                self.error = Some(error);
                return;
            }
        };
        match placement {
            Placement::Declaration => self.edits.replace(
                class.span.start,
                class.span.end,
                format!("let {name} = {expression};"),
            ),
            Placement::Expression => self.edits.replace(class.span.start, class.span.end, expression),
            Placement::ExportDefault(span) if class.id.is_some() => self.edits.replace(
                span.start,
                span.end,
                format!("let {name} = {expression};\nexport {{ {name} as default }};"),
            ),
            Placement::ExportDefault(span) => {
                self.edits
                    .replace(span.start, span.end, format!("export default {expression};"));
            }
        }
    }

    /// Returns the class binding name and the expression replacing the class
    fn lower_class(
        &mut self,
        class: &Class<'_>,
        placement: Placement,
    ) -> BuildResult<(String, String)> {
        let hint = self
            .name_hint
            .take_if(|(start, _)| *start == class.span.start)
            .map(|(_, name)| name);
        let name = match (&class.id, hint) {
            (Some(id), _) => id.name.to_string(),
            (None, Some(hint)) => hint,
            (None, None) if matches!(placement, Placement::ExportDefault(_)) => {
                self.names.fresh("_default")
            }
            (None, None) => self.names.fresh("_Class"),
        };
        let super_binding = class.super_class.as_ref().map(|_| self.names.fresh("_super"));
        let this_binding = super_binding.as_ref().map(|_| self.names.fresh("_this"));

        let mut edits = SourceEdits::new();
        let mut methods = Vec::new();
        for element in &class.body.body {
            let ClassElement::MethodDefinition(method) = element else {
                return Err(self.unsupported(&name, element_kind(element)));
            };
            if method.key.is_private_identifier() {
                return Err(self.unsupported(&name, "private methods"));
            }
            let is_constructor = method.kind == MethodDefinitionKind::Constructor;
            let home = if method.r#static {
                name.clone()
            } else {
                format!("{name}.prototype")
            };
            let mut rewriter = BodyRewriter {
                code: self.code,
                edits: &mut edits,
                class_name: &name,
                home: &home,
                this_binding: if is_constructor {
                    this_binding.as_deref()
                } else {
                    None
                },
                function_depth: 0,
            };
            rewriter.visit_formal_parameters(&method.value.params);
            if let Some(body) = &method.value.body {
                rewriter.visit_function_body(body);
            }
            methods.push(&**method);
        }

        let mut constructor = None;
        let mut prototype = Vec::new();
        let mut statics = Vec::new();
        for method in methods {
            let kind = match method.kind {
                MethodDefinitionKind::Constructor => {
                    constructor = Some(method);
                    continue;
                }
                MethodDefinitionKind::Method => "value",
                MethodDefinitionKind::Get => "get",
                MethodDefinitionKind::Set => "set",
            };
            let descriptor = format!(
                "{{ key: {}, {kind}: {} }}",
                self.method_key(method),
                self.method_function(method, &mut edits, &name)?
            );
            if method.r#static {
                statics.push(descriptor);
            } else {
                prototype.push(descriptor);
            }
        }

        let constructor = match (constructor, &this_binding) {
            (Some(method), this_binding) => {
                let Some(body) = &method.value.body else {
                    return Err(self.unsupported(&name, "bodiless constructors"));
                };
                let mut prologue = format!("\nbabelHelpers.classCallCheck(this, {name});");
                if let Some(this_binding) = this_binding {
                    let _ = write!(prologue, "\nvar {this_binding};");
                    edits.insert(body.span.end - 1, format!("\nreturn {this_binding};\n"));
                }
                edits.insert(body.span.start + 1, prologue);
                let start = self.parameters_start(method, &name)?;
                format!(
                    "function {name}{}",
                    edits.apply_range(self.code, start, body.span.end)
                )
            }
            (None, Some(_)) => format!(
                "function {name}() {{\nbabelHelpers.classCallCheck(this, {name});\nreturn babelHelpers.callSuper(this, {name}, arguments);\n}}"
            ),
            (None, None) => {
                format!("function {name}() {{\nbabelHelpers.classCallCheck(this, {name});\n}}")
            }
        };

        let mut expression = format!(
            "(function ({}) {{\n{constructor}\n",
            super_binding.as_deref().unwrap_or_default()
        );
        if let Some(super_binding) = &super_binding {
            let _ = writeln!(expression, "babelHelpers.inherits({name}, {super_binding});");
        }
        let mut method_lists = String::new();
        if !prototype.is_empty() || !statics.is_empty() {
            let _ = write!(method_lists, ", [{}]", prototype.join(", "));
        }
        if !statics.is_empty() {
            let _ = write!(method_lists, ", [{}]", statics.join(", "));
        }
        let super_argument = class.super_class.as_ref().map_or("", |base| {
            let span = base.span();
            &self.code[span.start as usize..span.end as usize]
        });
        let _ = write!(
            expression,
            "return babelHelpers.createClass({name}{method_lists});\n}})({super_argument})"
        );
        Ok((name, expression))
    }

    fn method_key(&self, method: &MethodDefinition<'_>) -> String {
        let span = method.key.span();
        let source = &self.code[span.start as usize..span.end as usize];
        if method.computed {
            return source.to_owned();
        }
        method
            .key
            .static_name()
            .map_or_else(|| source.to_owned(), |name| js_string(&name))
    }

    /// Method as a function expression, with body edits applied
    fn method_function(
        &self,
        method: &MethodDefinition<'_>,
        edits: &mut SourceEdits,
        class_name: &str,
    ) -> BuildResult<String> {
        let function = &method.value;
        let Some(body) = &function.body else {
            return Err(self.unsupported(class_name, "bodiless methods"));
        };
        let keyword = match (function.r#async, function.generator) {
            (false, false) => "function ",
            (true, false) => "async function ",
            (false, true) => "function* ",
            (true, true) => "async function* ",
        };
        let start = self.parameters_start(method, class_name)?;
        Ok(format!(
            "{keyword}{}",
            edits.apply_range(self.code, start, body.span.end)
        ))
    }

    /// Offset of the parenthesis opening a method's parameter list
    fn parameters_start(&self, method: &MethodDefinition<'_>, class_name: &str) -> BuildResult<u32> {
        let key_end = method.key.span().end;
        open_paren(self.code, key_end)
            .ok_or_else(|| self.unsupported(class_name, "methods without a parameter list"))
    }

    fn unsupported(&self, class_name: &str, what: &str) -> BuildError {
        BuildError::transform(
            self.path,
            format!("cannot lower class `{class_name}`: {what} are not supported"),
        )
    }
}

impl<'a> Visit<'a> for ClassLowering<'_> {
    fn visit_export_default_declaration(&mut self, it: &ExportDefaultDeclaration<'a>) {
        if let ExportDefaultDeclarationKind::ClassDeclaration(class) = &it.declaration {
            if self.is_innermost(class.span) {
                self.lower(class, Placement::ExportDefault(it.span));
                return;
            }
        }
        walk::walk_export_default_declaration(self, it);
    }

    fn visit_variable_declarator(&mut self, it: &VariableDeclarator<'a>) {
        if let (Some(Expression::ClassExpression(class)), Some(id)) =
            (&it.init, it.id.get_binding_identifier())
        {
            if class.id.is_none() {
                self.name_hint = Some((class.span.start, id.name.to_string()));
            }
        }
        walk::walk_variable_declarator(self, it);
    }

    fn visit_class(&mut self, it: &Class<'a>) {
        if !self.is_innermost(it.span) {
            walk::walk_class(self, it);
            return;
        }
        let placement = match it.r#type {
            ClassType::ClassDeclaration => Placement::Declaration,
            ClassType::ClassExpression => Placement::Expression,
        };
        self.lower(it, placement);
    }
}

fn element_kind(element: &ClassElement<'_>) -> &'static str {
    match element {
        ClassElement::MethodDefinition(_) => "methods",
        ClassElement::PropertyDefinition(_) => "fields",
        ClassElement::AccessorProperty(_) => "accessor properties",
        ClassElement::StaticBlock(_) => "static blocks",
        ClassElement::TSIndexSignature(_) => "index signatures",
    }
}

fn open_paren(code: &str, from: u32) -> Option<u32> {
    code.get(from as usize..)?
        .find('(')
        .map(|offset| from + offset as u32)
}

/// Rewrites `this` and `super` inside one constructor or method
struct BodyRewriter<'s> {
    code: &'s str,
    edits: &'s mut SourceEdits,
    class_name: &'s str,
    /// Object whose prototype `super` property lookups start from
    home: &'s str,
    /// Binding standing in for `this` in a derived constructor
    this_binding: Option<&'s str>,
    /// Nesting depth of non-arrow functions inside the method
    function_depth: u32,
}

impl BodyRewriter<'_> {
    fn receiver(&self) -> String {
        self.this_binding.unwrap_or("this").to_owned()
    }

    /// Pass the receiver as the first argument of a `.call`
    fn insert_receiver(&mut self, callee_end: u32, has_arguments: bool) {
        if let Some(paren) = open_paren(self.code, callee_end) {
            let separator = if has_arguments { ", " } else { "" };
            let receiver = self.receiver();
            self.edits.insert(paren + 1, format!("{receiver}{separator}"));
        }
    }
}

impl<'a> Visit<'a> for BodyRewriter<'_> {
    fn visit_function(&mut self, it: &Function<'a>, flags: ScopeFlags) {
        self.function_depth += 1;
        walk::walk_function(self, it, flags);
        self.function_depth -= 1;
    }

    fn visit_this_expression(&mut self, it: &ThisExpression) {
        if let (0, Some(binding)) = (self.function_depth, self.this_binding) {
            self.edits.replace(it.span.start, it.span.end, binding);
        }
    }

    fn visit_return_statement(&mut self, it: &ReturnStatement<'a>) {
        if let (0, Some(binding), None) = (self.function_depth, self.this_binding, &it.argument) {
            let semicolon = if ends_with_semicolon(self.code, it.span.end) {
                ";"
            } else {
                ""
            };
            self.edits
                .replace(it.span.start, it.span.end, format!("return {binding}{semicolon}"));
            return;
        }
        walk::walk_return_statement(self, it);
    }

    fn visit_call_expression(&mut self, it: &CallExpression<'a>) {
        if self.function_depth > 0 {
            walk::walk_call_expression(self, it);
            return;
        }
        match &it.callee {
            Expression::Super(callee) => {
                if let (Some(binding), Some(paren)) =
                    (self.this_binding, open_paren(self.code, callee.span.end))
                {
                    self.edits.replace(
                        callee.span.start,
                        callee.span.end,
                        format!(
                            "({binding} = babelHelpers.callSuper(this, {}, ",
                            self.class_name
                        ),
                    );
                    self.edits.replace(paren, paren + 1, "[");
                    self.edits.replace(it.span.end - 1, it.span.end, "]))");
                }
                for argument in &it.arguments {
                    self.visit_argument(argument);
                }
            }
            Expression::StaticMemberExpression(member)
                if matches!(member.object, Expression::Super(_)) =>
            {
                let replacement = format!(
                    "babelHelpers.superGet({}, {}, {}).call",
                    self.home,
                    js_string(&member.property.name),
                    self.receiver()
                );
                self.edits
                    .replace(member.span.start, member.span.end, replacement);
                self.insert_receiver(member.span.end, !it.arguments.is_empty());
                for argument in &it.arguments {
                    self.visit_argument(argument);
                }
            }
            Expression::ComputedMemberExpression(member)
                if matches!(member.object, Expression::Super(_)) =>
            {
                self.visit_computed_member_expression(member);
                self.edits.insert(member.span.end, ".call");
                self.insert_receiver(member.span.end, !it.arguments.is_empty());
                for argument in &it.arguments {
                    self.visit_argument(argument);
                }
            }
            _ => walk::walk_call_expression(self, it),
        }
    }

    fn visit_static_member_expression(&mut self, it: &StaticMemberExpression<'a>) {
        if self.function_depth == 0 && matches!(it.object, Expression::Super(_)) {
            let replacement = format!(
                "babelHelpers.superGet({}, {}, {})",
                self.home,
                js_string(&it.property.name),
                self.receiver()
            );
            self.edits.replace(it.span.start, it.span.end, replacement);
            return;
        }
        walk::walk_static_member_expression(self, it);
    }

    fn visit_computed_member_expression(&mut self, it: &ComputedMemberExpression<'a>) {
        if self.function_depth == 0 && matches!(it.object, Expression::Super(_)) {
            let key = it.expression.span();
            self.edits.replace(
                it.span.start,
                key.start,
                format!("babelHelpers.superGet({}, ", self.home),
            );
            self.edits
                .replace(key.end, it.span.end, format!(", {})", self.receiver()));
            self.visit_expression(&it.expression);
            return;
        }
        walk::walk_computed_member_expression(self, it);
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn lower(code: &str) -> String {
        lower_classes(code, &PathBuf::from("test.js"), SourceType::mjs()).unwrap()
    }

    #[test]
    fn test_base_class_becomes_constructor_function() {
        let code = lower("export class Greeter {\n\tconstructor(name) {\n\t\tthis.name = name;\n\t}\n\tgreet() {\n\t\treturn \"hi \" + this.name;\n\t}\n\tstatic create() {\n\t\treturn new Greeter(\"x\");\n\t}\n}\n");
        assert_eq!(
            code,
            "export let Greeter = (function () {\nfunction Greeter(name) {\nbabelHelpers.classCallCheck(this, Greeter);\n\t\tthis.name = name;\n\t}\nreturn babelHelpers.createClass(Greeter, [{ key: \"greet\", value: function () {\n\t\treturn \"hi \" + this.name;\n\t} }], [{ key: \"create\", value: function () {\n\t\treturn new Greeter(\"x\");\n\t} }]);\n})();\n"
        );
    }

    #[test]
    fn test_derived_constructor_calls_super_through_helper() {
        let code = lower("class Loud extends Base {\n\tconstructor(word) {\n\t\tsuper(word, 1);\n\t\tthis.volume = 11;\n\t}\n\tspeak() {\n\t\treturn super.speak().toUpperCase();\n\t}\n}\n");
        assert!(code.contains("let Loud = (function (_super) {"), "got: {code}");
        assert!(code.contains("babelHelpers.inherits(Loud, _super);"), "got: {code}");
        assert!(
            code.contains("(_this = babelHelpers.callSuper(this, Loud, [word, 1]));"),
            "got: {code}"
        );
        assert!(code.contains("_this.volume = 11;"), "got: {code}");
        assert!(code.contains("return _this;"), "got: {code}");
        assert!(
            code.contains("babelHelpers.superGet(Loud.prototype, \"speak\", this).call(this).toUpperCase()"),
            "got: {code}"
        );
        assert!(code.ends_with("})(Base);\n"), "got: {code}");
    }

    #[test]
    fn test_derived_class_without_constructor_forwards_arguments() {
        let code = lower("const Child = class extends Parent {};\n");
        assert!(code.contains("function Child() {"), "got: {code}");
        assert!(
            code.contains("return babelHelpers.callSuper(this, Child, arguments);"),
            "got: {code}"
        );
    }

    #[test]
    fn test_accessors_and_computed_keys() {
        let code = lower("class Box {\n\tget size() { return 1; }\n\tset size(v) {}\n\t[Symbol.iterator]() {}\n}\n");
        assert!(code.contains("{ key: \"size\", get: function () { return 1; } }"), "got: {code}");
        assert!(code.contains("{ key: \"size\", set: function (v) {} }"), "got: {code}");
        assert!(code.contains("{ key: Symbol.iterator, value: function () {} }"), "got: {code}");
    }

    #[test]
    fn test_nested_classes_are_all_lowered() {
        let code = lower("class Outer {\n\tmake() {\n\t\treturn class Inner {};\n\t}\n}\n");
        assert!(!code.contains("class "), "got: {code}");
        assert!(code.contains("function Inner()"), "got: {code}");
        assert!(code.contains("function Outer()"), "got: {code}");
    }

    #[test]
    fn test_default_exported_classes() {
        let named = lower("export default class Plugin {}\n");
        assert!(named.starts_with("let Plugin = (function () {"), "got: {named}");
        assert!(named.contains("export { Plugin as default };"), "got: {named}");

        let anonymous = lower("export default class {}\n");
        assert!(anonymous.starts_with("export default (function () {"), "got: {anonymous}");
        assert!(anonymous.contains("function _default()"), "got: {anonymous}");
    }

    #[test]
    fn test_remaining_fields_are_rejected() {
        let err = lower_classes("class A { x = 1; }", &PathBuf::from("a.js"), SourceType::mjs())
            .unwrap_err();
        assert!(err.to_string().contains("fields are not supported"), "got: {err}");
    }
}
