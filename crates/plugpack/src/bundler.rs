//! Bundling stage
//!
//! [`bundle`] turns a unit's entry module into one self-executing program:
//! 1. Walk the module graph breadth-first from the entry, transforming and
//!    scanning every module and resolving its specifiers in source order
//! 2. Externalized specifiers become closure parameters, numbered by first
//!    appearance
//! 3. Render every module into the module table, add the module runtime and
//!    the `babelHelpers` the lowered modules call
//! 4. Minify the program and wrap it in the closure that receives host globals

use std::{
    collections::VecDeque,
    fs,
    path::{Path, PathBuf},
};

use indexmap::{IndexMap, IndexSet};
use log::{debug, trace};
use serde::Deserialize;

use crate::{
    code_generator::{ImportTarget, render_json, render_module, render_program, wrap_closure},
    dialect::{Dialect, LegacyModule},
    error::{BuildError, BuildResult},
    externals::{ExternalPolicy, GlobalPath},
    helpers,
    minify::minify,
    module_graph::{ModuleGraph, ModuleId},
    module_scan::{scan_module, scan_source_type},
    resolver::{DEFAULT_EXTENSIONS, ModuleResolver},
    transform::{TransformConfig, transform},
    types::ModuleFormat,
    warnings::{BundleWarning, WarningKind, WarningPolicy, WarningSink},
};

/// Settings for one bundling invocation
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BundleOptions {
    /// Browserslist query for the transform stage
    pub targets: String,
    pub minify: bool,
    pub warnings: WarningPolicy,
    /// Extensions tried, in order, for extensionless specifiers
    pub extensions: Vec<String>,
    pub externals: ExternalPolicy,
}

impl Default for BundleOptions {
    fn default() -> Self {
        Self {
            targets: TransformConfig::default().targets,
            minify: true,
            warnings: WarningPolicy::default(),
            extensions: DEFAULT_EXTENSIONS.iter().map(|ext| (*ext).to_owned()).collect(),
            externals: ExternalPolicy::default(),
        }
    }
}

impl BundleOptions {
    fn transform_config(&self) -> TransformConfig {
        TransformConfig {
            targets: self.targets.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BundleOutput {
    pub code: String,
    /// Bundled module paths in id order; the entry comes first
    pub modules: Vec<PathBuf>,
    /// Host globals referenced by the bundle, in parameter order
    pub externals: Vec<GlobalPath>,
    /// Warnings retained by [`WarningPolicy::Collect`]
    pub warnings: Vec<BundleWarning>,
}

/// Bundle the module graph rooted at `entry`
pub fn bundle(entry: &Path, options: &BundleOptions) -> BuildResult<BundleOutput> {
    Bundler::new(options).run(entry)
}

#[derive(Debug)]
struct Bundler<'a> {
    options: &'a BundleOptions,
    transform: TransformConfig,
    resolver: ModuleResolver,
    graph: ModuleGraph,
    /// Global path to closure parameter name
    externals: IndexMap<GlobalPath, String>,
    /// Runtime helpers called by any module, in first-use order
    helpers: IndexSet<String>,
    warnings: WarningSink,
    queue: VecDeque<ModuleId>,
}

impl<'a> Bundler<'a> {
    fn new(options: &'a BundleOptions) -> Self {
        Self {
            options,
            transform: options.transform_config(),
            resolver: ModuleResolver::new(options.extensions.clone()),
            graph: ModuleGraph::new(),
            externals: IndexMap::new(),
            helpers: IndexSet::new(),
            warnings: WarningSink::new(options.warnings),
            queue: VecDeque::new(),
        }
    }

    fn run(mut self, entry: &Path) -> BuildResult<BundleOutput> {
        debug!("Bundling from entry {}", entry.display());
        let entry_path = self
            .resolver
            .resolve_entry(entry)
            .ok_or_else(|| BuildError::Resolution {
                specifier: entry.display().to_string(),
                importer: entry.to_path_buf(),
            })?;
        let (entry_id, _) = self.graph.add_module(entry_path.clone());
        self.queue.push_back(entry_id);

        // Ids are assigned on enqueue, so the queue drains in id order
        let mut rendered = Vec::new();
        while let Some(id) = self.queue.pop_front() {
            rendered.push(self.render(id)?);
        }

        let groups = if self.graph.has_cycles() {
            self.graph.circular_groups()
        } else {
            Vec::new()
        };
        for group in groups {
            let paths: Vec<String> = group
                .iter()
                .filter_map(|id| self.graph.module_path(*id))
                .map(|path| path.display().to_string())
                .collect();
            let first = group
                .first()
                .and_then(|id| self.graph.module_path(*id))
                .map_or_else(|| entry_path.clone(), Path::to_path_buf);
            self.warnings.emit(
                WarningKind::CircularDependency,
                first,
                format!("circular dependency: {}", paths.join(" -> ")),
            );
        }

        let helpers = helpers::render(&self.helpers);
        let program = render_program(&rendered, helpers.as_deref());
        let program = if self.options.minify {
            minify(&program, &entry_path)?
        } else {
            program
        };

        let parameters: Vec<(String, GlobalPath)> = self
            .externals
            .iter()
            .map(|(global, parameter)| (parameter.clone(), global.clone()))
            .collect();
        let code = wrap_closure(&program, &parameters);
        debug!(
            "Bundled {} modules with {} externals ({} bytes)",
            self.graph.len(),
            parameters.len(),
            code.len()
        );

        Ok(BundleOutput {
            code,
            modules: self.graph.modules().map(|node| node.path.clone()).collect(),
            externals: self.externals.into_keys().collect(),
            warnings: self.warnings.into_collected(),
        })
    }

    /// Read, transform and render one module, enqueueing its dependencies
    fn render(&mut self, id: ModuleId) -> BuildResult<String> {
        let Some(path) = self.graph.module_path(id).map(Path::to_path_buf) else {
            return Err(BuildError::transform(
                PathBuf::from(format!("<module {id}>")),
                "module missing from graph",
            ));
        };
        trace!("Processing module {id}: {}", path.display());
        let source = fs::read_to_string(&path).map_err(|source| BuildError::SourceRead {
            path: path.clone(),
            source,
        })?;

        let dialect = Dialect::from_path(&path);
        if dialect == Dialect::Unrecognized && has_extension(&path, "json") {
            serde_json::from_str::<serde_json::Value>(&source)
                .map_err(|e| BuildError::transform(&path, format!("invalid JSON: {e}")))?;
            return Ok(render_json(&source));
        }
        if dialect == Dialect::Inconsistent {
            self.warnings.emit(
                WarningKind::DialectPassthrough,
                &path,
                "module marker combined with component syntax; left untransformed",
            );
        }

        let code = transform(&source, &path, &self.transform)?.unwrap_or(source);
        let is_module = dialect
            .spec()
            .is_none_or(|spec| spec.legacy_module == LegacyModule::Plain);
        let scan = scan_module(&code, &path, scan_source_type(is_module))?;
        for helper in &scan.helpers {
            if !helpers::is_known(helper) {
                return Err(BuildError::transform(
                    &path,
                    format!("unsupported runtime helper `{helper}`"),
                ));
            }
            self.helpers.insert(helper.clone());
        }

        for span in scan.computed_dynamic_imports() {
            self.warnings.emit(
                WarningKind::DynamicImportExpression,
                &path,
                format!(
                    "dynamic import with a computed specifier at offset {} is left as-is",
                    span.start
                ),
            );
        }

        let mut targets = IndexMap::new();
        for specifier in scan.specifiers() {
            let target = self.target(&specifier, &path, id)?;
            targets.insert(specifier, target);
        }

        let format = if scan.has_module_syntax() {
            ModuleFormat::Esm
        } else {
            ModuleFormat::CommonJs
        };
        Ok(render_module(&code, &scan, format, &targets))
    }

    /// Externalize or resolve one specifier of `importer`
    fn target(
        &mut self,
        specifier: &str,
        importer: &Path,
        importer_id: ModuleId,
    ) -> BuildResult<ImportTarget> {
        if let Some(global) = self.options.externals.global_for(specifier) {
            let next = self.externals.len();
            let parameter = self
                .externals
                .entry(global)
                .or_insert_with(|| format!("__ext{next}"))
                .clone();
            trace!("Externalized '{specifier}' as {parameter}");
            return Ok(ImportTarget::External(parameter));
        }

        let resolved = self
            .resolver
            .resolve(specifier, importer)
            .ok_or_else(|| BuildError::Resolution {
                specifier: specifier.to_owned(),
                importer: importer.to_path_buf(),
            })?;
        let (id, is_new) = self.graph.add_module(resolved);
        self.graph.add_dependency(importer_id, id);
        if is_new {
            self.queue.push_back(id);
        }
        Ok(ImportTarget::Module(id))
    }
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension().is_some_and(|ext| ext == extension)
}
