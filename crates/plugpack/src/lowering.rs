//! Syntax lowering the transform engine does not provide
//!
//! Both passes take printed JavaScript, parse it, consult the semantic model
//! and rewrite spans with [`SourceEdits`](crate::source_edit::SourceEdits):
//! - [`lower_classes`] turns classes into constructor functions wired up
//!   through the `babelHelpers` runtime
//! - [`lower_block_scoping`] turns `let`/`const` into `var`, renaming
//!   bindings that would collide once hoisted and giving closures captured in
//!   loops a fresh binding per iteration
//!
//! Classes run first because the class pass declares `let` bindings.

mod block_scoping;
mod classes;

use std::path::Path;

use oxc::{
    ast::ast::{BindingIdentifier, IdentifierReference, Program},
    ast_visit::Visit,
    parser::Parser,
    span::SourceType,
};
use oxc_allocator::Allocator;
use rustc_hash::FxHashSet;

pub use block_scoping::lower_block_scoping;
pub use classes::lower_classes;

use crate::{error::BuildResult, transform::diagnostics_error};

fn parse<'a>(
    allocator: &'a Allocator,
    code: &'a str,
    path: &Path,
    source_type: SourceType,
) -> BuildResult<Program<'a>> {
    let parsed = Parser::new(allocator, code, source_type).parse();
    if parsed.panicked || !parsed.errors.is_empty() {
        return Err(diagnostics_error(path, "lowering parse", &parsed.errors));
    }
    Ok(parsed.program)
}

/// Hands out identifiers that appear nowhere in a program
#[derive(Debug, Default)]
struct NameGenerator {
    taken: FxHashSet<String>,
}

impl NameGenerator {
    fn for_program(program: &Program<'_>) -> Self {
        let mut generator = Self::default();
        generator.visit_program(program);
        generator
    }

    /// `base` itself when unused, otherwise `base_1`, `base_2`, ...
    fn fresh(&mut self, base: &str) -> String {
        let mut candidate = base.to_owned();
        let mut suffix = 1usize;
        while self.taken.contains(&candidate) {
            candidate = format!("{base}_{suffix}");
            suffix += 1;
        }
        self.taken.insert(candidate.clone());
        candidate
    }
}

impl<'a> Visit<'a> for NameGenerator {
    fn visit_binding_identifier(&mut self, it: &BindingIdentifier<'a>) {
        self.taken.insert(it.name.to_string());
    }

    fn visit_identifier_reference(&mut self, it: &IdentifierReference<'a>) {
        self.taken.insert(it.name.to_string());
    }
}

/// Whether `code[end - 1]` closes the statement with a semicolon
fn ends_with_semicolon(code: &str, end: u32) -> bool {
    code.as_bytes()
        .get((end as usize).wrapping_sub(1))
        .is_some_and(|byte| *byte == b';')
}
