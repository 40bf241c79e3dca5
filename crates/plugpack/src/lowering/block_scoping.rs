//! Block-scoping lowering
//!
//! Every `let` and `const` becomes `var`. Hoisting a binding out of its
//! block can make it collide with another binding of the enclosing function,
//! or shadow a name that code in that function reads from further out; such
//! bindings are renamed.
//!
//! A binding declared inside a loop and captured by a closure needs a fresh
//! copy per iteration, so the loop body moves into a function called once
//! per iteration with the loop head bindings as arguments:
//!
//! ```text
//! for (let i = 0; i < n; i++) { fns.push(function () { return i; }); }
//! for (var i = 0; i < n; i++) { (function (i) { fns.push(function () { return i; }); }).call(this, i); }
//! ```
//!
//! `break`, `continue` and `return` inside a moved body are forwarded
//! through the call's result. Head bindings the body assigns are copied back
//! after each call. Bodies using `arguments`, `yield`, `await` or `var`, or
//! jumping to a statement outside the loop, stay in place and their
//! bindings are shared between iterations.

use std::{fmt::Write as _, path::Path};

use log::{debug, trace};
use oxc::{
    ast::ast::{
        ArrowFunctionExpression, AssignmentTargetPropertyIdentifier, AwaitExpression,
        BindingIdentifier, BindingProperty, BlockStatement, BreakStatement, CatchClause,
        ContinueStatement, DoWhileStatement, Expression, ForInStatement, ForOfStatement,
        ForStatement, ForStatementInit, ForStatementLeft, Function, FunctionType,
        IdentifierReference, LabelIdentifier, LabeledStatement, ObjectProperty, Program,
        ReturnStatement, Statement, StaticBlock, SwitchStatement, VariableDeclaration,
        VariableDeclarationKind, WhileStatement, YieldExpression,
    },
    ast_visit::{Visit, walk},
    semantic::{Scoping, SemanticBuilder},
    span::{GetSpan, SourceType, Span},
    syntax::{scope::ScopeFlags, symbol::SymbolId},
};
use oxc_allocator::Allocator;
use rustc_hash::{FxHashMap, FxHashSet};

use super::{NameGenerator, ends_with_semicolon, parse};
use crate::{error::BuildResult, source_edit::SourceEdits};

/// Rewrite `let`/`const` in `code` into `var`
pub fn lower_block_scoping(
    code: &str,
    path: &Path,
    source_type: SourceType,
) -> BuildResult<String> {
    let allocator = Allocator::default();
    let program = parse(&allocator, code, path, source_type)?;
    let scoping = SemanticBuilder::new().build(&program).semantic.into_scoping();

    let mut analysis = ScopeAnalysis::new(&scoping);
    analysis.visit_program(&program);
    if analysis.declarations.is_empty() {
        return Ok(code.to_owned());
    }

    let mut names = NameGenerator::for_program(&program);
    let mut edits = SourceEdits::new();
    Plan::new(&analysis, &mut names, path).emit(code, &mut names, &mut edits);
    trace!(
        "Lowered {} lexical declarations in {}",
        analysis.declarations.len(),
        path.display()
    );
    Ok(edits.apply(code))
}

/// Index of a function (or the program) in [`ScopeAnalysis::functions`]
type FunctionId = usize;

#[derive(Debug)]
struct Binding {
    symbol: SymbolId,
    name: String,
    span: Span,
    function: FunctionId,
    /// Value of a shorthand property pattern (`{ name }`)
    shorthand: bool,
}

#[derive(Debug)]
struct Use {
    span: Span,
    symbol: Option<SymbolId>,
    name: String,
    function: FunctionId,
    is_write: bool,
    /// Value of a shorthand property (`{ name }`)
    shorthand: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopKind {
    /// `for (init; test; update)`
    For,
    /// `for (x in y)` / `for (x of y)`
    Iteration,
    /// `while` / `do ... while`
    Condition,
}

#[derive(Debug)]
struct Loop {
    span: Span,
    body: Span,
    body_is_block: bool,
    kind: LoopKind,
    function: FunctionId,
    /// Lexical bindings declared in the loop head
    head: Vec<SymbolId>,
    is_await: bool,
}

#[derive(Debug)]
struct Jump {
    span: Span,
    /// Statement the jump leaves or continues
    target: Option<Span>,
    function: FunctionId,
    is_break: bool,
}

#[derive(Debug)]
struct Return {
    span: Span,
    argument: Option<Span>,
    function: FunctionId,
}

#[derive(Debug)]
struct LexicalDeclaration {
    keyword: Span,
    /// Offsets after `let` declarators that need an explicit `= void 0`
    uninitialized: Vec<u32>,
}

#[derive(Debug)]
enum JumpTarget {
    Loop(Span),
    Switch(Span),
    Label { name: String, body: Span },
}

/// One walk over the program collecting everything the rewrite needs
struct ScopeAnalysis<'s> {
    scoping: &'s Scoping,
    /// Parent of every function; the program is function 0
    functions: Vec<Option<FunctionId>>,
    function_stack: Vec<FunctionId>,
    /// Block nesting inside each function on the stack
    block_depth: Vec<u32>,
    targets: Vec<JumpTarget>,
    saved_targets: Vec<Vec<JumpTarget>>,
    /// Lexical symbols, mapped to whether they are declared inside a block
    lexical: FxHashMap<SymbolId, bool>,
    /// Start offsets of declarations in `for ... in` / `for ... of` heads
    iteration_heads: FxHashSet<u32>,
    /// Start offsets of shorthand property values
    shorthand: FxHashSet<u32>,
    bindings: Vec<Binding>,
    uses: Vec<Use>,
    loops: Vec<Loop>,
    jumps: Vec<Jump>,
    returns: Vec<Return>,
    declarations: Vec<LexicalDeclaration>,
    /// Constructs that cannot move into a per-iteration function
    barriers: Vec<(u32, FunctionId)>,
}

impl<'s> ScopeAnalysis<'s> {
    fn new(scoping: &'s Scoping) -> Self {
        Self {
            scoping,
            functions: Vec::new(),
            function_stack: Vec::new(),
            block_depth: Vec::new(),
            targets: Vec::new(),
            saved_targets: Vec::new(),
            lexical: FxHashMap::default(),
            iteration_heads: FxHashSet::default(),
            shorthand: FxHashSet::default(),
            bindings: Vec::new(),
            uses: Vec::new(),
            loops: Vec::new(),
            jumps: Vec::new(),
            returns: Vec::new(),
            declarations: Vec::new(),
            barriers: Vec::new(),
        }
    }

    fn current(&self) -> FunctionId {
        self.function_stack.last().copied().unwrap_or_default()
    }

    fn enter_function(&mut self) {
        let id = self.functions.len();
        self.functions.push(self.function_stack.last().copied());
        self.function_stack.push(id);
        self.block_depth.push(0);
        self.saved_targets.push(std::mem::take(&mut self.targets));
    }

    fn leave_function(&mut self) {
        self.function_stack.pop();
        self.block_depth.pop();
        self.targets = self.saved_targets.pop().unwrap_or_default();
    }

    fn enter_block(&mut self) {
        if let Some(depth) = self.block_depth.last_mut() {
            *depth += 1;
        }
    }

    fn leave_block(&mut self) {
        if let Some(depth) = self.block_depth.last_mut() {
            *depth -= 1;
        }
    }

    fn in_block(&self) -> bool {
        self.block_depth.last().is_some_and(|depth| *depth > 0)
    }

    fn record_loop(
        &mut self,
        span: Span,
        body: &Statement<'_>,
        kind: LoopKind,
        head: Vec<SymbolId>,
        is_await: bool,
    ) {
        self.loops.push(Loop {
            span,
            body: body.span(),
            body_is_block: matches!(body, Statement::BlockStatement(_)),
            kind,
            function: self.current(),
            head,
            is_await,
        });
    }

    fn jump_target(&self, label: Option<&LabelIdentifier<'_>>, is_break: bool) -> Option<Span> {
        let mut targets = self.targets.iter().rev();
        match label {
            Some(label) => targets.find_map(|target| match target {
                JumpTarget::Label { name, body } if name == label.name.as_str() => Some(*body),
                _ => None,
            }),
            None => targets.find_map(|target| match target {
                JumpTarget::Loop(span) => Some(*span),
                JumpTarget::Switch(span) if is_break => Some(*span),
                _ => None,
            }),
        }
    }

    fn record_jump(&mut self, span: Span, label: Option<&LabelIdentifier<'_>>, is_break: bool) {
        let target = self.jump_target(label, is_break);
        self.jumps.push(Jump {
            span,
            target,
            function: self.current(),
            is_break,
        });
    }
}

fn lexical_symbols(declaration: &VariableDeclaration<'_>) -> Vec<SymbolId> {
    if !matches!(
        declaration.kind,
        VariableDeclarationKind::Let | VariableDeclarationKind::Const
    ) {
        return Vec::new();
    }
    declaration
        .declarations
        .iter()
        .flat_map(|declarator| declarator.id.get_binding_identifiers())
        .filter_map(|id| id.symbol_id.get())
        .collect()
}

impl<'a> Visit<'a> for ScopeAnalysis<'_> {
    fn visit_program(&mut self, it: &Program<'a>) {
        self.enter_function();
        walk::walk_program(self, it);
        self.leave_function();
    }

    fn visit_function(&mut self, it: &Function<'a>, _flags: ScopeFlags) {
        // A declaration's name belongs to the enclosing function
        let declared_outside = it.r#type == FunctionType::FunctionDeclaration;
        if let (true, Some(id)) = (declared_outside, &it.id) {
            self.visit_binding_identifier(id);
        }
        self.enter_function();
        if let (false, Some(id)) = (declared_outside, &it.id) {
            self.visit_binding_identifier(id);
        }
        self.visit_formal_parameters(&it.params);
        if let Some(body) = &it.body {
            self.visit_function_body(body);
        }
        self.leave_function();
    }

    fn visit_arrow_function_expression(&mut self, it: &ArrowFunctionExpression<'a>) {
        self.enter_function();
        walk::walk_arrow_function_expression(self, it);
        self.leave_function();
    }

    fn visit_static_block(&mut self, it: &StaticBlock<'a>) {
        self.enter_function();
        walk::walk_static_block(self, it);
        self.leave_function();
    }

    fn visit_block_statement(&mut self, it: &BlockStatement<'a>) {
        self.enter_block();
        walk::walk_block_statement(self, it);
        self.leave_block();
    }

    fn visit_catch_clause(&mut self, it: &CatchClause<'a>) {
        self.enter_block();
        walk::walk_catch_clause(self, it);
        self.leave_block();
    }

    fn visit_switch_statement(&mut self, it: &SwitchStatement<'a>) {
        self.targets.push(JumpTarget::Switch(it.span));
        self.enter_block();
        walk::walk_switch_statement(self, it);
        self.leave_block();
        self.targets.pop();
    }

    fn visit_labeled_statement(&mut self, it: &LabeledStatement<'a>) {
        self.targets.push(JumpTarget::Label {
            name: it.label.name.to_string(),
            body: it.body.span(),
        });
        walk::walk_labeled_statement(self, it);
        self.targets.pop();
    }

    fn visit_for_statement(&mut self, it: &ForStatement<'a>) {
        let head = match &it.init {
            Some(ForStatementInit::VariableDeclaration(declaration)) => {
                lexical_symbols(declaration)
            }
            _ => Vec::new(),
        };
        self.record_loop(it.span, &it.body, LoopKind::For, head, false);
        self.targets.push(JumpTarget::Loop(it.span));
        self.enter_block();
        walk::walk_for_statement(self, it);
        self.leave_block();
        self.targets.pop();
    }

    fn visit_for_in_statement(&mut self, it: &ForInStatement<'a>) {
        let head = match &it.left {
            ForStatementLeft::VariableDeclaration(declaration) => {
                self.iteration_heads.insert(declaration.span.start);
                lexical_symbols(declaration)
            }
            _ => Vec::new(),
        };
        self.record_loop(it.span, &it.body, LoopKind::Iteration, head, false);
        self.targets.push(JumpTarget::Loop(it.span));
        self.enter_block();
        walk::walk_for_in_statement(self, it);
        self.leave_block();
        self.targets.pop();
    }

    fn visit_for_of_statement(&mut self, it: &ForOfStatement<'a>) {
        let head = match &it.left {
            ForStatementLeft::VariableDeclaration(declaration) => {
                self.iteration_heads.insert(declaration.span.start);
                lexical_symbols(declaration)
            }
            _ => Vec::new(),
        };
        self.record_loop(it.span, &it.body, LoopKind::Iteration, head, it.r#await);
        self.targets.push(JumpTarget::Loop(it.span));
        self.enter_block();
        walk::walk_for_of_statement(self, it);
        self.leave_block();
        self.targets.pop();
    }

    fn visit_while_statement(&mut self, it: &WhileStatement<'a>) {
        self.record_loop(it.span, &it.body, LoopKind::Condition, Vec::new(), false);
        self.targets.push(JumpTarget::Loop(it.span));
        walk::walk_while_statement(self, it);
        self.targets.pop();
    }

    fn visit_do_while_statement(&mut self, it: &DoWhileStatement<'a>) {
        self.record_loop(it.span, &it.body, LoopKind::Condition, Vec::new(), false);
        self.targets.push(JumpTarget::Loop(it.span));
        walk::walk_do_while_statement(self, it);
        self.targets.pop();
    }

    fn visit_break_statement(&mut self, it: &BreakStatement<'a>) {
        self.record_jump(it.span, it.label.as_ref(), true);
    }

    fn visit_continue_statement(&mut self, it: &ContinueStatement<'a>) {
        self.record_jump(it.span, it.label.as_ref(), false);
    }

    fn visit_return_statement(&mut self, it: &ReturnStatement<'a>) {
        self.returns.push(Return {
            span: it.span,
            argument: it.argument.as_ref().map(GetSpan::span),
            function: self.current(),
        });
        walk::walk_return_statement(self, it);
    }

    fn visit_yield_expression(&mut self, it: &YieldExpression<'a>) {
        self.barriers.push((it.span.start, self.current()));
        walk::walk_yield_expression(self, it);
    }

    fn visit_await_expression(&mut self, it: &AwaitExpression<'a>) {
        self.barriers.push((it.span.start, self.current()));
        walk::walk_await_expression(self, it);
    }

    fn visit_variable_declaration(&mut self, it: &VariableDeclaration<'a>) {
        let keyword_len = match it.kind {
            VariableDeclarationKind::Let => 3,
            VariableDeclarationKind::Const => 5,
            VariableDeclarationKind::Var => {
                self.barriers.push((it.span.start, self.current()));
                walk::walk_variable_declaration(self, it);
                return;
            }
            _ => {
                walk::walk_variable_declaration(self, it);
                return;
            }
        };

        let nested = self.in_block();
        let needs_initializer = nested
            && it.kind == VariableDeclarationKind::Let
            && !self.iteration_heads.contains(&it.span.start);
        let mut uninitialized = Vec::new();
        for declarator in &it.declarations {
            for id in declarator.id.get_binding_identifiers() {
                if let Some(symbol) = id.symbol_id.get() {
                    self.lexical.insert(symbol, nested);
                }
            }
            if needs_initializer && declarator.init.is_none() {
                uninitialized.push(declarator.span.end);
            }
        }
        self.declarations.push(LexicalDeclaration {
            keyword: Span::new(it.span.start, it.span.start + keyword_len),
            uninitialized,
        });
        walk::walk_variable_declaration(self, it);
    }

    fn visit_object_property(&mut self, it: &ObjectProperty<'a>) {
        if let (true, Expression::Identifier(value)) = (it.shorthand, &it.value) {
            self.shorthand.insert(value.span.start);
        }
        walk::walk_object_property(self, it);
    }

    fn visit_binding_property(&mut self, it: &BindingProperty<'a>) {
        if it.shorthand {
            for id in it.value.get_binding_identifiers() {
                self.shorthand.insert(id.span.start);
            }
        }
        walk::walk_binding_property(self, it);
    }

    fn visit_assignment_target_property_identifier(
        &mut self,
        it: &AssignmentTargetPropertyIdentifier<'a>,
    ) {
        self.shorthand.insert(it.binding.span.start);
        walk::walk_assignment_target_property_identifier(self, it);
    }

    fn visit_binding_identifier(&mut self, it: &BindingIdentifier<'a>) {
        let Some(symbol) = it.symbol_id.get() else {
            return;
        };
        self.bindings.push(Binding {
            symbol,
            name: it.name.to_string(),
            span: it.span,
            function: self.current(),
            shorthand: self.shorthand.contains(&it.span.start),
        });
    }

    fn visit_identifier_reference(&mut self, it: &IdentifierReference<'a>) {
        let Some(reference_id) = it.reference_id.get() else {
            return;
        };
        let reference = self.scoping.get_reference(reference_id);
        let symbol = reference.symbol_id();
        if symbol.is_none() && it.name.as_str() == "arguments" {
            self.barriers.push((it.span.start, self.current()));
        }
        self.uses.push(Use {
            span: it.span,
            symbol,
            name: it.name.to_string(),
            function: self.current(),
            is_write: reference.is_write(),
            shorthand: self.shorthand.contains(&it.span.start),
        });
    }
}

fn contains(outer: Span, offset: u32) -> bool {
    outer.start <= offset && offset < outer.end
}

/// Renames and loop rewrites decided from a [`ScopeAnalysis`]
struct Plan<'s> {
    analysis: &'s ScopeAnalysis<'s>,
    /// Final name of every renamed lexical symbol
    renames: FxHashMap<SymbolId, String>,
    /// Loops whose body moves into a per-iteration function
    wrapped: Vec<usize>,
    /// Name used outside a loop body for head bindings copied back
    outer_names: FxHashMap<SymbolId, (String, Span)>,
}

impl<'s> Plan<'s> {
    fn new(analysis: &'s ScopeAnalysis<'s>, names: &mut NameGenerator, path: &Path) -> Self {
        let mut plan = Self {
            analysis,
            renames: FxHashMap::default(),
            wrapped: Vec::new(),
            outer_names: FxHashMap::default(),
        };
        plan.rename_hoisted(names);
        plan.choose_wrapped_loops(path);
        plan.name_copied_heads(names);
        plan
    }

    fn is_nested_lexical(&self, symbol: SymbolId) -> bool {
        self.analysis.lexical.get(&symbol).copied().unwrap_or(false)
    }

    /// Rename block bindings whose name is already claimed in the function
    /// they are hoisted into
    fn rename_hoisted(&mut self, names: &mut NameGenerator) {
        let analysis = self.analysis;
        let owners: FxHashMap<SymbolId, FunctionId> = analysis
            .bindings
            .iter()
            .map(|binding| (binding.symbol, binding.function))
            .collect();

        let mut taken: Vec<FxHashSet<&str>> = vec![FxHashSet::default(); analysis.functions.len()];
        for binding in &analysis.bindings {
            if !self.is_nested_lexical(binding.symbol) {
                taken[binding.function].insert(binding.name.as_str());
            }
        }
        // A name read from further out must stay visible in every function
        // between the use and its declaration
        for usage in &analysis.uses {
            let owner = usage.symbol.and_then(|symbol| owners.get(&symbol).copied());
            let mut function = Some(usage.function);
            while let Some(current) = function {
                if Some(current) == owner {
                    break;
                }
                taken[current].insert(usage.name.as_str());
                function = analysis.functions[current];
            }
        }

        let mut candidates: Vec<&Binding> = analysis
            .bindings
            .iter()
            .filter(|binding| self.is_nested_lexical(binding.symbol))
            .collect();
        candidates.sort_by_key(|binding| binding.span.start);
        let mut claimed: Vec<FxHashSet<String>> =
            vec![FxHashSet::default(); analysis.functions.len()];
        for binding in candidates {
            let function = binding.function;
            let final_name = if taken[function].contains(binding.name.as_str())
                || claimed[function].contains(&binding.name)
            {
                names.fresh(&binding.name)
            } else {
                binding.name.clone()
            };
            if final_name != binding.name {
                self.renames.insert(binding.symbol, final_name.clone());
            }
            claimed[function].insert(final_name);
        }
    }

    fn choose_wrapped_loops(&mut self, path: &Path) {
        let analysis = self.analysis;
        let owners: FxHashMap<SymbolId, &Binding> = analysis
            .bindings
            .iter()
            .map(|binding| (binding.symbol, binding))
            .collect();

        let mut wrapped: Vec<usize> = Vec::new();
        for usage in &analysis.uses {
            let Some(binding) = usage.symbol.and_then(|symbol| owners.get(&symbol)) else {
                continue;
            };
            if usage.function == binding.function || !self.is_nested_lexical(binding.symbol) {
                continue;
            }
            let innermost = analysis
                .loops
                .iter()
                .enumerate()
                .filter(|(_, candidate)| {
                    candidate.function == binding.function
                        && contains(candidate.span, binding.span.start)
                })
                .min_by_key(|(_, candidate)| candidate.span.size())
                .map(|(index, _)| index);
            if let Some(index) = innermost {
                if !wrapped.contains(&index) {
                    wrapped.push(index);
                }
            }
        }

        loop {
            let rejected: Vec<usize> = wrapped
                .iter()
                .copied()
                .filter(|index| !self.can_wrap(*index, &wrapped))
                .collect();
            if rejected.is_empty() {
                break;
            }
            for index in rejected {
                debug!(
                    "{}: loop at offset {} keeps one binding for all iterations",
                    path.display(),
                    analysis.loops[index].span.start
                );
                wrapped.retain(|candidate| *candidate != index);
            }
        }
        wrapped.sort_unstable();
        self.wrapped = wrapped;
    }

    /// Innermost loop in `wrapped` whose body holds `offset` of `function`
    fn innermost_wrapped(&self, wrapped: &[usize], offset: u32, function: FunctionId) -> Option<usize> {
        let loops = &self.analysis.loops;
        wrapped
            .iter()
            .copied()
            .filter(|index| loops[*index].function == function && contains(loops[*index].body, offset))
            .min_by_key(|index| loops[*index].body.size())
    }

    fn can_wrap(&self, index: usize, wrapped: &[usize]) -> bool {
        let analysis = self.analysis;
        let candidate = &analysis.loops[index];
        if candidate.is_await {
            return false;
        }
        let inside =
            |offset: u32, function: FunctionId| function == candidate.function && contains(candidate.body, offset);
        if analysis
            .barriers
            .iter()
            .any(|(offset, function)| inside(*offset, *function))
        {
            return false;
        }
        analysis
            .jumps
            .iter()
            .filter(|jump| inside(jump.span.start, jump.function))
            .all(|jump| {
                if self.innermost_wrapped(wrapped, jump.span.start, jump.function) != Some(index) {
                    return true;
                }
                jump.target.is_some_and(|target| {
                    target == candidate.span || contains(candidate.body, target.start)
                })
            })
    }

    /// Head bindings of a wrapped `for` that the body assigns are copied
    /// back after each call, under a new name outside the body
    fn name_copied_heads(&mut self, names: &mut NameGenerator) {
        let analysis = self.analysis;
        for index in self.wrapped.clone() {
            let wrapped = &analysis.loops[index];
            if wrapped.kind != LoopKind::For {
                continue;
            }
            for symbol in &wrapped.head {
                let assigned = analysis.uses.iter().any(|usage| {
                    usage.symbol == Some(*symbol)
                        && usage.is_write
                        && contains(wrapped.body, usage.span.start)
                });
                if assigned {
                    let outer = names.fresh(&self.final_name(*symbol));
                    self.outer_names.insert(*symbol, (outer, wrapped.body));
                }
            }
        }
    }

    fn original_name(&self, symbol: SymbolId) -> String {
        self.analysis
            .bindings
            .iter()
            .find(|binding| binding.symbol == symbol)
            .map(|binding| binding.name.clone())
            .unwrap_or_default()
    }

    fn final_name(&self, symbol: SymbolId) -> String {
        self.renames
            .get(&symbol)
            .cloned()
            .unwrap_or_else(|| self.original_name(symbol))
    }

    /// Name of `symbol` at `offset`, if it differs from the source name
    fn name_at(&self, symbol: SymbolId, offset: u32) -> Option<String> {
        if let Some((outer, body)) = self.outer_names.get(&symbol) {
            if !contains(*body, offset) {
                return Some(outer.clone());
            }
        }
        self.renames.get(&symbol).cloned()
    }

    fn emit(&self, code: &str, names: &mut NameGenerator, edits: &mut SourceEdits) {
        let analysis = self.analysis;

        for declaration in &analysis.declarations {
            edits.replace(declaration.keyword.start, declaration.keyword.end, "var");
            for offset in &declaration.uninitialized {
                edits.insert(*offset, " = void 0");
            }
        }

        for binding in &analysis.bindings {
            if let Some(name) = self.name_at(binding.symbol, binding.span.start) {
                edits.replace(
                    binding.span.start,
                    binding.span.end,
                    renamed(&binding.name, &name, binding.shorthand),
                );
            }
        }
        for usage in &analysis.uses {
            if let Some(name) = usage
                .symbol
                .and_then(|symbol| self.name_at(symbol, usage.span.start))
            {
                edits.replace(
                    usage.span.start,
                    usage.span.end,
                    renamed(&usage.name, &name, usage.shorthand),
                );
            }
        }

        if self.wrapped.is_empty() {
            return;
        }
        self.emit_jumps(code, edits);

        let mut order = self.wrapped.clone();
        order.sort_by_key(|index| std::cmp::Reverse(analysis.loops[*index].span.start));
        for index in order {
            self.emit_wrapped_loop(index, names, edits);
        }
    }

    /// Forward `return`, `break` and `continue` out of moved loop bodies
    fn emit_jumps(&self, code: &str, edits: &mut SourceEdits) {
        let analysis = self.analysis;
        for statement in &analysis.returns {
            if self
                .innermost_wrapped(&self.wrapped, statement.span.start, statement.function)
                .is_none()
            {
                continue;
            }
            match statement.argument {
                Some(argument) => {
                    edits.insert(argument.start, "{ v: ");
                    edits.insert(argument.end, " }");
                }
                None => edits.replace(
                    statement.span.start,
                    statement.span.end,
                    with_semicolon(code, statement.span, "return { v: void 0 }"),
                ),
            }
        }
        for jump in &analysis.jumps {
            let Some(index) = self.innermost_wrapped(&self.wrapped, jump.span.start, jump.function)
            else {
                continue;
            };
            if jump.target != Some(analysis.loops[index].span) {
                continue;
            }
            let replacement = if jump.is_break {
                "return \"break\""
            } else {
                "return"
            };
            edits.replace(
                jump.span.start,
                jump.span.end,
                with_semicolon(code, jump.span, replacement),
            );
        }
    }

    fn emit_wrapped_loop(&self, index: usize, names: &mut NameGenerator, edits: &mut SourceEdits) {
        let analysis = self.analysis;
        let wrapped = &analysis.loops[index];
        let inside = |offset: u32, function: FunctionId| {
            function == wrapped.function && contains(wrapped.body, offset)
        };

        let has_break = analysis.jumps.iter().any(|jump| {
            jump.is_break
                && jump.target == Some(wrapped.span)
                && self.innermost_wrapped(&self.wrapped, jump.span.start, jump.function) == Some(index)
        });
        let has_return = analysis
            .returns
            .iter()
            .any(|statement| inside(statement.span.start, statement.function));
        let is_nested = self.wrapped.iter().any(|other| {
            *other != index
                && analysis.loops[*other].function == wrapped.function
                && contains(analysis.loops[*other].body, wrapped.span.start)
        });

        let parameters: Vec<String> = wrapped.head.iter().map(|s| self.final_name(*s)).collect();
        let arguments: String = wrapped
            .head
            .iter()
            .zip(&parameters)
            .map(|(symbol, parameter)| {
                let argument = self
                    .outer_names
                    .get(symbol)
                    .map_or(parameter.as_str(), |(outer, _)| outer.as_str());
                format!(", {argument}")
            })
            .collect();
        let copies: Vec<String> = wrapped
            .head
            .iter()
            .zip(&parameters)
            .filter_map(|(symbol, parameter)| {
                self.outer_names
                    .get(symbol)
                    .map(|(outer, _)| format!("{outer} = {parameter};"))
            })
            .collect();

        let result = (has_break || has_return).then(|| names.fresh("_ret"));
        let mut prefix = String::from("{ ");
        if let Some(result) = &result {
            let _ = write!(prefix, "var {result} = ");
        }
        let _ = write!(prefix, "(function ({}) {{", parameters.join(", "));
        if !copies.is_empty() {
            prefix.push_str(" try {");
        }

        let mut suffix = String::new();
        if !copies.is_empty() {
            let _ = write!(suffix, " }} finally {{ {} }}", copies.join(" "));
        }
        let _ = write!(suffix, "}}).call(this{arguments});");
        if let Some(result) = &result {
            if has_break {
                let _ = write!(suffix, " if ({result} === \"break\") break;");
            }
            if has_return {
                let value = if is_nested {
                    result.clone()
                } else {
                    format!("{result}.v")
                };
                let _ = write!(suffix, " if (typeof {result} === \"object\") return {value};");
            }
        }
        suffix.push_str(" }");

        let body = wrapped.body;
        if wrapped.body_is_block {
            edits.replace(body.start, body.start + 1, prefix);
            edits.replace(body.end - 1, body.end, suffix);
        } else {
            edits.insert(body.start, prefix);
            edits.insert(body.end, suffix);
        }
    }
}

fn renamed(original: &str, name: &str, shorthand: bool) -> String {
    if shorthand {
        format!("{original}: {name}")
    } else {
        name.to_owned()
    }
}

fn with_semicolon(code: &str, span: Span, statement: &str) -> String {
    if ends_with_semicolon(code, span.end) {
        format!("{statement};")
    } else {
        statement.to_owned()
    }
}
