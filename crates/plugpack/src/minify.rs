//! Whole-bundle minification

use std::path::Path;

use log::trace;
use oxc::{
    codegen::{Codegen, CodegenOptions},
    minifier::{Minifier, MinifierOptions},
    parser::Parser,
    span::SourceType,
};

use crate::{error::BuildResult, transform::diagnostics_error};

/// Compress, mangle and compactly print a bundle program.
///
/// `path` names the unit entry for error reporting.
pub fn minify(program: &str, path: &Path) -> BuildResult<String> {
    let allocator = oxc_allocator::Allocator::default();
    let parsed = Parser::new(&allocator, program, SourceType::cjs()).parse();
    if parsed.panicked || !parsed.errors.is_empty() {
        return Err(diagnostics_error(path, "minify", &parsed.errors));
    }
    let mut program = parsed.program;

    let minified = Minifier::new(MinifierOptions::default()).minify(&allocator, &mut program);
    let code = Codegen::new()
        .with_options(CodegenOptions::minify())
        .with_scoping(minified.scoping)
        .build(&program)
        .code;
    trace!("Minified bundle for {} to {} bytes", path.display(), code.len());
    Ok(code)
}
