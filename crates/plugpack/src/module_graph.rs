//! Module graph for a single unit's bundle
//!
//! Modules are numbered in the order they are first discovered, starting
//! with the entry at id 0. Ids double as the module's index in the emitted
//! module table, so they are stable for a given set of inputs.

use std::{
    fmt,
    hash::BuildHasherDefault,
    path::{Path, PathBuf},
};

use indexmap::IndexMap;
use log::debug;
use petgraph::{
    algo::{is_cyclic_directed, tarjan_scc},
    graph::{DiGraph, NodeIndex},
};
use rustc_hash::FxHasher;

use crate::types::ModuleKind;

type FxIndexMap<K, V> = IndexMap<K, V, BuildHasherDefault<FxHasher>>;

/// Unique identifier for a module within one bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(u32);

impl ModuleId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    #[inline]
    pub const fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleNode {
    pub id: ModuleId,
    pub path: PathBuf,
    pub kind: ModuleKind,
}

#[derive(Debug, Default)]
pub struct ModuleGraph {
    /// Canonical path to module id, in discovery order
    module_paths: FxIndexMap<PathBuf, ModuleId>,
    nodes: Vec<ModuleNode>,
    /// Edges point from importer to imported module
    graph: DiGraph<ModuleId, ()>,
    node_indices: Vec<NodeIndex>,
}

impl ModuleGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a module, returning its id and whether it was newly added
    pub fn add_module(&mut self, path: PathBuf) -> (ModuleId, bool) {
        if let Some(&existing) = self.module_paths.get(&path) {
            return (existing, false);
        }

        let id = ModuleId::new(self.nodes.len() as u32);
        let kind = ModuleKind::of_path(&path);
        debug!("Registered module {id} ({kind}): {}", path.display());

        let index = self.graph.add_node(id);
        self.node_indices.push(index);
        self.module_paths.insert(path.clone(), id);
        self.nodes.push(ModuleNode { id, path, kind });
        (id, true)
    }

    /// Record that `from` imports `to`
    pub fn add_dependency(&mut self, from: ModuleId, to: ModuleId) {
        let (Some(&from_idx), Some(&to_idx)) = (
            self.node_indices.get(from.index()),
            self.node_indices.get(to.index()),
        ) else {
            return;
        };
        if !self.graph.contains_edge(from_idx, to_idx) {
            self.graph.add_edge(from_idx, to_idx, ());
        }
    }

    pub fn module(&self, id: ModuleId) -> Option<&ModuleNode> {
        self.nodes.get(id.index())
    }

    pub fn module_path(&self, id: ModuleId) -> Option<&Path> {
        self.module(id).map(|node| node.path.as_path())
    }

    /// Modules in id order
    pub fn modules(&self) -> impl Iterator<Item = &ModuleNode> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether any module reaches itself through its imports
    pub fn has_cycles(&self) -> bool {
        is_cyclic_directed(&self.graph)
    }

    /// Groups of modules that import each other, sorted by id
    ///
    /// A module that imports itself forms a group of one.
    pub fn circular_groups(&self) -> Vec<Vec<ModuleId>> {
        let mut groups: Vec<Vec<ModuleId>> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|component| match component.as_slice() {
                [single] => self.graph.contains_edge(*single, *single),
                _ => true,
            })
            .map(|component| {
                let mut ids: Vec<ModuleId> =
                    component.into_iter().map(|index| self.graph[index]).collect();
                ids.sort();
                ids
            })
            .collect();
        groups.sort();
        groups
    }
}
