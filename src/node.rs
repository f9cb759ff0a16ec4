// Copyright 2018-2024 the Deno authors. MIT license.

use std::collections::HashMap;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use deno_error::JsErrorClass;
use indexmap::IndexSet;
use serde::Deserialize;
use serde::Serialize;

use crate::source::ModuleMeta;

/// Identifies one `EnvironmentModuleGraph` for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GraphId(u32);

impl GraphId {
  pub(crate) fn next() -> Self {
    static NEXT_GRAPH_ID: AtomicU32 = AtomicU32::new(0);
    Self(NEXT_GRAPH_ID.fetch_add(1, Ordering::Relaxed))
  }
}

/// A handle to a module node owned by an `EnvironmentModuleGraph`.
///
/// Handles are cheap to copy and compare. Two handles are equal exactly when
/// they refer to the same node of the same graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleRef {
  graph: GraphId,
  index: u32,
}

impl ModuleRef {
  pub(crate) fn new(graph: GraphId, index: usize) -> Self {
    Self {
      graph,
      index: index as u32,
    }
  }

  pub fn graph_id(&self) -> GraphId {
    self.graph
  }

  pub(crate) fn index(&self) -> usize {
    self.index as usize
  }
}

impl fmt::Display for ModuleRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.graph.0, self.index)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ModuleType {
  Js,
  Css,
  /// A module only known through its file, e.g. a watched asset.
  Asset,
}

/// The compiled artifact cached on a module.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformResult {
  pub code: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub map: Option<serde_json::Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub etag: Option<String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub deps: Vec<String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub dynamic_deps: Vec<String>,
}

/// How a module was invalidated since its last successful transform.
#[derive(Debug, Clone)]
pub enum InvalidationState {
  /// Only the import timestamps of the previous result need refreshing.
  Soft(Arc<TransformResult>),
  /// The module must be transformed again.
  Hard,
}

impl PartialEq for InvalidationState {
  fn eq(&self, other: &Self) -> bool {
    match (self, other) {
      (Self::Soft(a), Self::Soft(b)) => Arc::ptr_eq(a, b),
      (Self::Hard, Self::Hard) => true,
      _ => false,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ModuleStatus {
  /// Not compiled yet, or invalidated since.
  Pending,
  Transformed,
  /// The last transform or execution failed.
  Failed,
}

/// A module known to an environment's graph.
///
/// Identity, edges and cached output are maintained by the owning graph.
/// Plugin metadata, recorded errors and HMR acceptance information may be
/// written by collaborators through `EnvironmentModuleGraph::module_mut`.
#[derive(Debug)]
pub struct ModuleNode {
  pub(crate) reference: ModuleRef,
  pub(crate) url: String,
  pub(crate) id: Option<String>,
  pub(crate) file: Option<String>,
  pub(crate) module_type: ModuleType,
  pub(crate) importers: IndexSet<ModuleRef>,
  pub(crate) imported_modules: IndexSet<ModuleRef>,
  pub(crate) accepted_hmr_deps: IndexSet<ModuleRef>,
  pub(crate) static_imported_urls: Option<HashSet<String>>,
  pub(crate) transform_result: Option<Arc<TransformResult>>,
  pub(crate) last_invalidation_timestamp: u64,
  pub(crate) last_hmr_timestamp: u64,
  pub(crate) invalidation_state: Option<InvalidationState>,
  pub accepted_hmr_exports: Option<IndexSet<String>>,
  pub imported_bindings: Option<HashMap<String, IndexSet<String>>>,
  /// `None` until the module's source has been analyzed.
  pub is_self_accepting: Option<bool>,
  pub error: Option<Arc<dyn JsErrorClass>>,
  pub meta: ModuleMeta,
  pub last_hmr_invalidation_received: bool,
}

impl ModuleNode {
  pub(crate) fn new(
    reference: ModuleRef,
    url: String,
    module_type: ModuleType,
    set_is_self_accepting: bool,
  ) -> Self {
    Self {
      reference,
      url,
      id: None,
      file: None,
      module_type,
      importers: Default::default(),
      imported_modules: Default::default(),
      accepted_hmr_deps: Default::default(),
      static_imported_urls: None,
      transform_result: None,
      last_invalidation_timestamp: 0,
      last_hmr_timestamp: 0,
      invalidation_state: None,
      accepted_hmr_exports: None,
      imported_bindings: None,
      is_self_accepting: set_is_self_accepting.then_some(false),
      error: None,
      meta: Default::default(),
      last_hmr_invalidation_received: false,
    }
  }

  pub fn reference(&self) -> ModuleRef {
    self.reference
  }

  pub fn url(&self) -> &str {
    &self.url
  }

  pub fn id(&self) -> Option<&str> {
    self.id.as_deref()
  }

  pub fn file(&self) -> Option<&str> {
    self.file.as_deref()
  }

  pub fn module_type(&self) -> ModuleType {
    self.module_type
  }

  /// Modules importing this module, in the order the edges were added.
  pub fn importers(&self) -> &IndexSet<ModuleRef> {
    &self.importers
  }

  pub fn imported_modules(&self) -> &IndexSet<ModuleRef> {
    &self.imported_modules
  }

  /// Dependencies whose hot updates this module accepts.
  pub fn accepted_hmr_deps(&self) -> &IndexSet<ModuleRef> {
    &self.accepted_hmr_deps
  }

  pub fn static_imported_urls(&self) -> Option<&HashSet<String>> {
    self.static_imported_urls.as_ref()
  }

  pub fn transform_result(&self) -> Option<&Arc<TransformResult>> {
    self.transform_result.as_ref()
  }

  pub fn last_invalidation_timestamp(&self) -> u64 {
    self.last_invalidation_timestamp
  }

  pub fn last_hmr_timestamp(&self) -> u64 {
    self.last_hmr_timestamp
  }

  pub fn invalidation_state(&self) -> Option<&InvalidationState> {
    self.invalidation_state.as_ref()
  }

  pub fn status(&self) -> ModuleStatus {
    if self.error.is_some() {
      ModuleStatus::Failed
    } else if self.transform_result.is_some() {
      ModuleStatus::Transformed
    } else {
      ModuleStatus::Pending
    }
  }
}
