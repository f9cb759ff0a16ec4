// Copyright 2018-2024 the Deno authors. MIT license.

use std::cell::Ref;
use std::cell::RefCell;
use std::cell::RefMut;
use std::collections::HashMap;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;
use std::rc::Weak;
use std::sync::Arc;

use deno_unsync::future::LocalFutureExt;
use deno_unsync::future::SharedLocal;
use futures::future::LocalBoxFuture;
use futures::FutureExt;
use indexmap::IndexMap;
use indexmap::IndexSet;
use serde::ser::SerializeMap;
use serde::ser::SerializeSeq;
use serde::Serialize;
use serde::Serializer;
use thiserror::Error;

use crate::node::GraphId;
use crate::node::InvalidationState;
use crate::node::ModuleNode;
use crate::node::ModuleRef;
use crate::node::ModuleType;
use crate::node::TransformResult;
use crate::source::ModuleMeta;
use crate::source::ModuleResolver;
use crate::source::ResolveError;
use crate::specifier::clean_url;
use crate::specifier::is_direct_css_request;
use crate::specifier::unresolved_url_key;
use crate::specifier::with_resolved_extension;
use crate::specifier::FS_PREFIX;
use crate::timestamp::monotonic_now;
use crate::unified::CombinedModuleRef;

#[derive(Debug, Clone, Error, deno_error::JsError)]
pub enum ModuleGraphError {
  #[class(generic)]
  #[error(
    "Failed to resolve \"{url}\" in the {environment} environment: {source}"
  )]
  Resolution {
    url: String,
    environment: String,
    #[source]
    source: ResolveError,
  },
  #[class(type)]
  #[error("Invalid module url \"{0}\".")]
  InvalidUrl(String),
  #[class("NotFound")]
  #[error("Module {module} does not belong to the {environment} environment.")]
  ModuleNotFound {
    module: ModuleRef,
    environment: String,
  },
  #[class("NotFound")]
  #[error("Module {module} has no node in the {environment} environment.")]
  MissingFacet {
    module: CombinedModuleRef,
    environment: String,
  },
  #[class(generic)]
  #[error("The {environment} module graph was dropped while resolving.")]
  GraphDropped { environment: String },
  #[class("NotFound")]
  #[error("Unknown environment \"{0}\".")]
  UnknownEnvironment(String),
  #[class(type)]
  #[error("Environment \"{0}\" was registered more than once.")]
  DuplicateEnvironment(String),
  #[class(type)]
  #[error("A combined module graph requires at least one environment.")]
  NoEnvironments,
}

/// A request url after resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedUrl {
  /// The url as it will be indexed.
  pub url: String,
  pub resolved_id: String,
  pub meta: Option<ModuleMeta>,
}

/// An import discovered while transforming a module, either still a url or
/// already a node of the same graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ImportedModule {
  Url(String),
  Module(ModuleRef),
}

impl From<&str> for ImportedModule {
  fn from(url: &str) -> Self {
    Self::Url(url.to_string())
  }
}

impl From<String> for ImportedModule {
  fn from(url: String) -> Self {
    Self::Url(url)
  }
}

impl From<ModuleRef> for ImportedModule {
  fn from(module: ModuleRef) -> Self {
    Self::Module(module)
  }
}

/// Fresh information about a module collected during a (re-)transform.
#[derive(Debug, Default, Clone)]
pub struct ModuleInfoUpdate {
  pub imported_modules: Vec<ImportedModule>,
  pub imported_bindings: Option<HashMap<String, IndexSet<String>>>,
  /// Dependencies whose hot updates the module accepts.
  pub accepted_modules: Vec<ImportedModule>,
  pub accepted_exports: Option<IndexSet<String>>,
  pub is_self_accepting: bool,
  pub static_imported_urls: Option<HashSet<String>>,
}

/// The import relationships changed by `update_module_info`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ModuleInfoChanges {
  pub added: IndexSet<ModuleRef>,
  pub removed: IndexSet<ModuleRef>,
  /// Removed dependencies that have no importers left.
  pub no_longer_imported: IndexSet<ModuleRef>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct InvalidateOptions {
  /// Defaults to `monotonic_now()`.
  pub timestamp: Option<u64>,
  pub is_hmr: bool,
  /// Keep the previous transform result so only import timestamps need to
  /// be refreshed.
  pub soft: bool,
}

type EntryFuture = LocalBoxFuture<'static, Result<ModuleRef, ModuleGraphError>>;

enum UnresolvedEntry {
  Settled(ModuleRef),
  Pending {
    generation: u64,
    fut: SharedLocal<EntryFuture>,
  },
}

struct GraphState {
  graph_id: GraphId,
  modules: Vec<ModuleNode>,
  url_to_module: HashMap<String, ModuleRef>,
  id_to_module: IndexMap<String, ModuleRef>,
  file_to_modules: HashMap<String, IndexSet<ModuleRef>>,
  etag_to_module: HashMap<String, ModuleRef>,
  unresolved_url_to_module: HashMap<String, UnresolvedEntry>,
  next_generation: u64,
}

impl GraphState {
  fn new(graph_id: GraphId) -> Self {
    Self {
      graph_id,
      modules: Vec::new(),
      url_to_module: HashMap::new(),
      id_to_module: IndexMap::new(),
      file_to_modules: HashMap::new(),
      etag_to_module: HashMap::new(),
      unresolved_url_to_module: HashMap::new(),
      next_generation: 0,
    }
  }

  fn owns(&self, module: ModuleRef) -> bool {
    module.graph_id() == self.graph_id && module.index() < self.modules.len()
  }

  fn node(&self, module: ModuleRef) -> &ModuleNode {
    &self.modules[module.index()]
  }

  fn node_mut(&mut self, module: ModuleRef) -> &mut ModuleNode {
    &mut self.modules[module.index()]
  }

  fn push_node(&mut self, node: ModuleNode) {
    debug_assert_eq!(node.reference.index(), self.modules.len());
    self.modules.push(node);
  }

  fn next_reference(&self) -> ModuleRef {
    ModuleRef::new(self.graph_id, self.modules.len())
  }

  /// Indexes a resolved url, creating the node for its id if there is none.
  fn ensure_entry(
    &mut self,
    resolved: ResolvedUrl,
    set_is_self_accepting: bool,
  ) -> ModuleRef {
    if let Some(module) = self.id_to_module.get(&resolved.resolved_id).copied()
    {
      // multiple urls may resolve to the same id
      if !self.url_to_module.contains_key(&resolved.url) {
        log::debug!(
          "Aliasing {} to existing module {}",
          resolved.url,
          resolved.resolved_id
        );
        self.url_to_module.insert(resolved.url, module);
      }
      return module;
    }

    let reference = self.next_reference();
    let module_type = if is_direct_css_request(&resolved.url) {
      ModuleType::Css
    } else {
      ModuleType::Js
    };
    let file = clean_url(&resolved.resolved_id).to_string();
    let mut node = ModuleNode::new(
      reference,
      resolved.url.clone(),
      module_type,
      set_is_self_accepting,
    );
    if let Some(meta) = resolved.meta {
      node.meta = meta;
    }
    node.id = Some(resolved.resolved_id.clone());
    node.file = Some(file.clone());
    log::debug!("Created module {} for {}", resolved.resolved_id, resolved.url);

    self.push_node(node);
    self.url_to_module.insert(resolved.url, reference);
    self.id_to_module.insert(resolved.resolved_id, reference);
    self.file_to_modules.entry(file).or_default().insert(reference);
    reference
  }

  fn remove_pending(&mut self, raw_url: &str, generation: u64) {
    let is_same_request = matches!(
      self.unresolved_url_to_module.get(raw_url),
      Some(UnresolvedEntry::Pending { generation: g, .. }) if *g == generation
    );
    if is_same_request {
      self.unresolved_url_to_module.remove(raw_url);
    }
  }

  fn link(&mut self, importer: ModuleRef, imported: ModuleRef) -> bool {
    self.node_mut(importer).imported_modules.insert(imported);
    self.node_mut(imported).importers.insert(importer)
  }

  fn unlink(&mut self, importer: ModuleRef, imported: ModuleRef) -> bool {
    self.node_mut(importer).imported_modules.shift_remove(&imported);
    self.node_mut(imported).importers.shift_remove(&importer)
  }

  fn set_transform_result(
    &mut self,
    module: ModuleRef,
    result: Option<TransformResult>,
  ) {
    let prev_etag = self
      .node(module)
      .transform_result
      .as_ref()
      .and_then(|r| r.etag.clone());
    if let Some(etag) = prev_etag {
      self.remove_etag(&etag, module);
    }
    let result = result.map(Arc::new);
    if let Some(etag) = result.as_ref().and_then(|r| r.etag.clone()) {
      self.etag_to_module.insert(etag, module);
    }
    let node = self.node_mut(module);
    node.transform_result = result;
    node.invalidation_state = None;
  }

  fn remove_etag(&mut self, etag: &str, module: ModuleRef) {
    if self.etag_to_module.get(etag) == Some(&module) {
      self.etag_to_module.remove(etag);
    }
  }

  /// Clears the cached output of `module` and walks its importers, skipping
  /// importers that accept hot updates of the module they came from.
  ///
  /// Returns the number of nodes visited.
  fn invalidate(
    &mut self,
    module: ModuleRef,
    seen: &mut HashSet<ModuleRef>,
    timestamp: u64,
    is_hmr: bool,
    soft: bool,
  ) -> usize {
    let mut visited = 0;
    let mut pending = vec![(module, soft)];
    while let Some((module, soft)) = pending.pop() {
      let node = self.node_mut(module);
      let prev_state = node.invalidation_state.clone();
      if soft {
        if node.invalidation_state.is_none() {
          node.invalidation_state = Some(match &node.transform_result {
            Some(result) => InvalidationState::Soft(result.clone()),
            None => InvalidationState::Hard,
          });
        }
      } else {
        node.invalidation_state = Some(InvalidationState::Hard);
      }
      // a soft then hard invalidation in one pass must still be applied
      if !seen.insert(module) && prev_state == node.invalidation_state {
        continue;
      }
      visited += 1;

      if is_hmr {
        node.last_hmr_timestamp = timestamp;
        node.last_hmr_invalidation_received = false;
      }
      node.last_invalidation_timestamp =
        node.last_invalidation_timestamp.max(timestamp);
      let etag = node
        .transform_result
        .take()
        .and_then(|result| result.etag.clone());
      node.error = None;
      let url = node.url.clone();
      let importers = node.importers.iter().copied().collect::<Vec<_>>();
      if let Some(etag) = etag {
        self.remove_etag(&etag, module);
      }

      // reversed so importers are visited in insertion order
      for importer in importers.into_iter().rev() {
        let importer_node = self.node(importer);
        if importer_node.accepted_hmr_deps.contains(&module) {
          continue;
        }
        let statically_imported = importer_node
          .static_imported_urls
          .as_ref()
          .is_some_and(|urls| urls.contains(&url));
        let soft_importer = (statically_imported || soft)
          && importer_node.module_type == ModuleType::Js;
        pending.push((importer, soft_importer));
      }
    }
    visited
  }
}

/// The module graph of a single environment (ex. the browser or the server).
///
/// All index mutations happen synchronously inside one borrow of the graph
/// state. The only suspension point is the resolver call, which is shared by
/// every concurrent request for the same url. Do not hold the guards returned
/// by `module()` / `module_mut()` across an await.
pub struct EnvironmentModuleGraph {
  id: GraphId,
  environment_name: String,
  resolver: Rc<dyn ModuleResolver>,
  state: Rc<RefCell<GraphState>>,
}

impl fmt::Debug for EnvironmentModuleGraph {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("EnvironmentModuleGraph")
      .field("id", &self.id)
      .field("environment_name", &self.environment_name)
      .field("resolver", &self.resolver)
      .field("modules", &self.len())
      .finish()
  }
}

impl EnvironmentModuleGraph {
  pub fn new(
    environment_name: impl Into<String>,
    resolver: Rc<dyn ModuleResolver>,
  ) -> Self {
    let id = GraphId::next();
    Self {
      id,
      environment_name: environment_name.into(),
      resolver,
      state: Rc::new(RefCell::new(GraphState::new(id))),
    }
  }

  pub fn id(&self) -> GraphId {
    self.id
  }

  pub fn environment_name(&self) -> &str {
    &self.environment_name
  }

  /// Returns `true` if the handle refers to a node of this graph.
  pub fn owns(&self, module: ModuleRef) -> bool {
    self.state.borrow().owns(module)
  }

  pub fn module(&self, module: ModuleRef) -> Option<Ref<'_, ModuleNode>> {
    if module.graph_id() != self.id {
      return None;
    }
    Ref::filter_map(self.state.borrow(), |state| {
      state.modules.get(module.index())
    })
    .ok()
  }

  pub fn module_mut(
    &self,
    module: ModuleRef,
  ) -> Option<RefMut<'_, ModuleNode>> {
    if module.graph_id() != self.id {
      return None;
    }
    RefMut::filter_map(self.state.borrow_mut(), |state| {
      state.modules.get_mut(module.index())
    })
    .ok()
  }

  pub fn len(&self) -> usize {
    self.state.borrow().modules.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// All nodes in creation order.
  pub fn modules(&self) -> Vec<ModuleRef> {
    let state = self.state.borrow();
    state.modules.iter().map(|node| node.reference).collect()
  }

  pub fn get_module_by_id(&self, id: &str) -> Option<ModuleRef> {
    self.state.borrow().id_to_module.get(id).copied()
  }

  pub fn get_modules_by_file(&self, file: &str) -> Option<IndexSet<ModuleRef>> {
    self.state.borrow().file_to_modules.get(file).cloned()
  }

  pub fn get_module_by_etag(&self, etag: &str) -> Option<ModuleRef> {
    self.state.borrow().etag_to_module.get(etag).copied()
  }

  /// Resolves `url` to its canonical id. Does not touch the graph.
  pub async fn resolve_url(
    &self,
    url: &str,
  ) -> Result<ResolvedUrl, ModuleGraphError> {
    resolve_url_with(self.resolver.as_ref(), url)
      .await
      .map_err(|err| ModuleGraphError::Resolution {
        url: url.to_string(),
        environment: self.environment_name.clone(),
        source: err,
      })
  }

  /// Looks up the node for a request url without ever creating one.
  pub async fn get_module_by_url(
    &self,
    raw_url: &str,
  ) -> Result<Option<ModuleRef>, ModuleGraphError> {
    let raw_url = unresolved_url_key(raw_url);
    let pending = {
      let state = self.state.borrow();
      match state.unresolved_url_to_module.get(&raw_url) {
        Some(UnresolvedEntry::Settled(module)) => return Ok(Some(*module)),
        Some(UnresolvedEntry::Pending { fut, .. }) => Some(fut.clone()),
        None => None,
      }
    };
    if let Some(fut) = pending {
      // creation was already requested by `ensure_entry_from_url`
      return fut.await.map(Some);
    }
    let resolved = self.resolve_url(&raw_url).await?;
    let state = self.state.borrow();
    Ok(
      state
        .url_to_module
        .get(&resolved.url)
        .or_else(|| state.id_to_module.get(&resolved.resolved_id))
        .copied(),
    )
  }

  /// Resolves `raw_url` and returns the node for its id, creating it if
  /// needed. Concurrent calls for the same url share one resolution, and urls
  /// resolving to the same id always share one node.
  pub async fn ensure_entry_from_url(
    &self,
    raw_url: &str,
    set_is_self_accepting: bool,
  ) -> Result<ModuleRef, ModuleGraphError> {
    let raw_url = unresolved_url_key(raw_url);
    if raw_url.is_empty() {
      return Err(ModuleGraphError::InvalidUrl(raw_url));
    }
    let fut = {
      let mut state = self.state.borrow_mut();
      let pending = match state.unresolved_url_to_module.get(&raw_url) {
        Some(UnresolvedEntry::Settled(module)) => return Ok(*module),
        Some(UnresolvedEntry::Pending { fut, .. }) => Some(fut.clone()),
        None => None,
      };
      match pending {
        Some(fut) => fut,
        None => {
          let generation = state.next_generation;
          state.next_generation += 1;
          let fut = self.create_entry_future(
            raw_url.clone(),
            generation,
            set_is_self_accepting,
          );
          state.unresolved_url_to_module.insert(
            raw_url,
            UnresolvedEntry::Pending {
              generation,
              fut: fut.clone(),
            },
          );
          fut
        }
      }
    };
    fut.await
  }

  fn create_entry_future(
    &self,
    raw_url: String,
    generation: u64,
    set_is_self_accepting: bool,
  ) -> SharedLocal<EntryFuture> {
    let resolver = self.resolver.clone();
    let state: Weak<RefCell<GraphState>> = Rc::downgrade(&self.state);
    let environment = self.environment_name.clone();
    async move {
      let resolved = resolve_url_with(resolver.as_ref(), &raw_url).await;
      let Some(state) = state.upgrade() else {
        return Err(ModuleGraphError::GraphDropped { environment });
      };
      // no await from here on, so the indexes update atomically
      let mut state = state.borrow_mut();
      match resolved {
        Ok(resolved) => {
          let module = state.ensure_entry(resolved, set_is_self_accepting);
          state
            .unresolved_url_to_module
            .insert(raw_url, UnresolvedEntry::Settled(module));
          Ok(module)
        }
        Err(err) => {
          state.remove_pending(&raw_url, generation);
          Err(ModuleGraphError::Resolution {
            url: raw_url,
            environment,
            source: err,
          })
        }
      }
    }
    .boxed_local()
    .shared_local()
  }

  /// Returns the id-less node standing for a file that is not imported as a
  /// module itself (ex. a watched asset), creating it if needed.
  pub fn create_file_only_entry(&self, file: &str) -> ModuleRef {
    let file = file.replace('\\', "/");
    let url = format!("{}{}", FS_PREFIX, file.trim_start_matches('/'));
    let mut state = self.state.borrow_mut();
    if let Some(existing) = state.file_to_modules.get(&file).and_then(|mods| {
      mods.iter().copied().find(|module| {
        let node = state.node(*module);
        node.url == url || node.id.as_deref() == Some(file.as_str())
      })
    }) {
      return existing;
    }
    let reference = state.next_reference();
    let mut node =
      ModuleNode::new(reference, url, ModuleType::Asset, false);
    node.file = Some(file.clone());
    state.push_node(node);
    state.file_to_modules.entry(file).or_default().insert(reference);
    reference
  }

  /// Records that `importer` imports `module`, on both ends of the edge.
  pub fn add_importer(&self, module: ModuleRef, importer: ModuleRef) -> bool {
    let mut state = self.state.borrow_mut();
    if !state.owns(module) || !state.owns(importer) {
      log::warn!(
        "Ignoring edge {} -> {} outside the {} environment.",
        importer,
        module,
        self.environment_name
      );
      return false;
    }
    state.link(importer, module)
  }

  pub fn remove_importer(
    &self,
    module: ModuleRef,
    importer: ModuleRef,
  ) -> bool {
    let mut state = self.state.borrow_mut();
    if !state.owns(module) || !state.owns(importer) {
      return false;
    }
    state.unlink(importer, module)
  }

  /// Reconciles the imports of `module` with the ones found by its latest
  /// transform. Urls are resolved first, so a resolution failure leaves the
  /// graph untouched.
  pub async fn update_module_info(
    &self,
    module: ModuleRef,
    update: ModuleInfoUpdate,
  ) -> Result<ModuleInfoChanges, ModuleGraphError> {
    if !self.owns(module) {
      return Err(self.module_not_found(module));
    }
    let imported = self.ensure_all(update.imported_modules).await?;
    let accepted = self.ensure_all(update.accepted_modules).await?;

    let mut state = self.state.borrow_mut();
    if let Some(foreign) = imported
      .iter()
      .chain(accepted.iter())
      .find(|module| !state.owns(**module))
    {
      return Err(self.module_not_found(*foreign));
    }

    let next_imports = imported.into_iter().collect::<IndexSet<_>>();
    let prev_imports = std::mem::replace(
      &mut state.node_mut(module).imported_modules,
      next_imports.clone(),
    );
    let mut changes = ModuleInfoChanges::default();
    for dep in &next_imports {
      state.node_mut(*dep).importers.insert(module);
      if !prev_imports.contains(dep) {
        changes.added.insert(*dep);
      }
    }
    for dep in prev_imports {
      if next_imports.contains(&dep) {
        continue;
      }
      let dep_node = state.node_mut(dep);
      dep_node.importers.shift_remove(&module);
      if dep_node.importers.is_empty() {
        changes.no_longer_imported.insert(dep);
      }
      changes.removed.insert(dep);
    }

    let node = state.node_mut(module);
    node.is_self_accepting = Some(update.is_self_accepting);
    node.accepted_hmr_deps = accepted.into_iter().collect();
    node.accepted_hmr_exports = update.accepted_exports;
    node.imported_bindings = update.imported_bindings;
    node.static_imported_urls = update.static_imported_urls;
    Ok(changes)
  }

  async fn ensure_all(
    &self,
    modules: Vec<ImportedModule>,
  ) -> Result<Vec<ModuleRef>, ModuleGraphError> {
    let futures = modules.into_iter().map(|imported| async move {
      match imported {
        ImportedModule::Url(url) => {
          self.ensure_entry_from_url(&url, true).await
        }
        ImportedModule::Module(module) => Ok(module),
      }
    });
    futures::future::try_join_all(futures).await
  }

  /// Stores a new transform result, keeping the etag index in sync.
  pub fn update_module_transform_result(
    &self,
    module: ModuleRef,
    result: Option<TransformResult>,
  ) -> bool {
    let mut state = self.state.borrow_mut();
    if !state.owns(module) {
      log::warn!(
        "Ignoring transform result for {} outside the {} environment.",
        module,
        self.environment_name
      );
      return false;
    }
    state.set_transform_result(module, result);
    true
  }

  /// Stores a transform result only if the module was not invalidated after
  /// `started_at`, the timestamp taken when the transform began.
  pub fn update_module_transform_result_if_fresh(
    &self,
    module: ModuleRef,
    result: TransformResult,
    started_at: u64,
  ) -> bool {
    let mut state = self.state.borrow_mut();
    if !state.owns(module) {
      return false;
    }
    let last_invalidation = state.node(module).last_invalidation_timestamp;
    if started_at <= last_invalidation {
      log::debug!(
        "Discarding stale transform result for {} ({} <= {})",
        state.node(module).url,
        started_at,
        last_invalidation
      );
      return false;
    }
    state.set_transform_result(module, Some(result));
    true
  }

  pub fn invalidate_module(&self, module: ModuleRef) {
    self.invalidate_module_with(
      module,
      &mut HashSet::new(),
      InvalidateOptions::default(),
    )
  }

  /// Clears the cached output and error of `module` and of every importer
  /// that does not accept its hot updates. Nodes and edges are kept.
  ///
  /// `seen` is shared between calls of one invalidation pass so cycles and
  /// repeated visits are cut short.
  pub fn invalidate_module_with(
    &self,
    module: ModuleRef,
    seen: &mut HashSet<ModuleRef>,
    options: InvalidateOptions,
  ) {
    let timestamp = options.timestamp.unwrap_or_else(monotonic_now);
    let mut state = self.state.borrow_mut();
    if !state.owns(module) {
      log::warn!(
        "Ignoring invalidation of {} outside the {} environment.",
        module,
        self.environment_name
      );
      return;
    }
    let visited =
      state.invalidate(module, seen, timestamp, options.is_hmr, options.soft);
    log::debug!(
      "Invalidated {} module(s) from {} in the {} environment",
      visited,
      state.node(module).url,
      self.environment_name
    );
  }

  /// Invalidates every node of the graph in one pass.
  pub fn invalidate_all(&self) {
    let timestamp = monotonic_now();
    let mut seen = HashSet::new();
    let mut state = self.state.borrow_mut();
    for index in 0..state.modules.len() {
      let module = ModuleRef::new(self.id, index);
      state.invalidate(module, &mut seen, timestamp, false, false);
    }
    log::debug!(
      "Invalidated all {} module(s) in the {} environment",
      state.modules.len(),
      self.environment_name
    );
  }

  /// Invalidates every module backed by `file`.
  pub fn on_file_change(&self, file: &str) {
    let Some(modules) = self.get_modules_by_file(file) else {
      return;
    };
    log::debug!("File changed: {} ({} module(s))", file, modules.len());
    let timestamp = monotonic_now();
    let mut seen = HashSet::new();
    let mut state = self.state.borrow_mut();
    for module in modules {
      state.invalidate(module, &mut seen, timestamp, false, false);
    }
  }

  /// Detaches every module backed by `file` from the modules it imports.
  pub fn on_file_delete(&self, file: &str) {
    let Some(modules) = self.get_modules_by_file(file) else {
      return;
    };
    log::debug!("File deleted: {} ({} module(s))", file, modules.len());
    let mut state = self.state.borrow_mut();
    for module in modules {
      let imported =
        std::mem::take(&mut state.node_mut(module).imported_modules);
      for dep in imported {
        state.node_mut(dep).importers.shift_remove(&module);
      }
    }
  }

  fn module_not_found(&self, module: ModuleRef) -> ModuleGraphError {
    ModuleGraphError::ModuleNotFound {
      module,
      environment: self.environment_name.clone(),
    }
  }
}

async fn resolve_url_with(
  resolver: &dyn ModuleResolver,
  url: &str,
) -> Result<ResolvedUrl, ResolveError> {
  let resolved = resolver.resolve_id(url).await?;
  let (resolved_id, meta) = match resolved {
    Some(resolved) if !resolved.id.is_empty() => (resolved.id, resolved.meta),
    Some(resolved) => (url.to_string(), resolved.meta),
    None => (url.to_string(), None),
  };
  Ok(ResolvedUrl {
    url: with_resolved_extension(url, &resolved_id),
    resolved_id,
    meta,
  })
}

impl Serialize for EnvironmentModuleGraph {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: Serializer,
  {
    let state = self.state.borrow();
    let mut map = serializer.serialize_map(Some(2))?;
    map.serialize_entry("environment", &self.environment_name)?;
    map.serialize_entry("modules", &SerializableModules(&state))?;
    map.end()
  }
}

struct SerializableModules<'a>(&'a GraphState);

impl Serialize for SerializableModules<'_> {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: Serializer,
  {
    let mut seq = serializer.serialize_seq(Some(self.0.modules.len()))?;
    for node in &self.0.modules {
      seq.serialize_element(&SerializableModule(self.0, node))?;
    }
    seq.end()
  }
}

struct SerializableModule<'a>(&'a GraphState, &'a ModuleNode);

impl Serialize for SerializableModule<'_> {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: Serializer,
  {
    let (state, node) = (self.0, self.1);
    let urls = |modules: &IndexSet<ModuleRef>| {
      modules
        .iter()
        .map(|module| state.node(*module).url.as_str())
        .collect::<Vec<_>>()
    };
    let mut map = serializer.serialize_map(None)?;
    map.serialize_entry("url", &node.url)?;
    if let Some(id) = &node.id {
      map.serialize_entry("id", id)?;
    }
    if let Some(file) = &node.file {
      map.serialize_entry("file", file)?;
    }
    map.serialize_entry("type", &node.module_type)?;
    map.serialize_entry("status", &node.status())?;
    if !node.importers.is_empty() {
      map.serialize_entry("importers", &urls(&node.importers))?;
    }
    if !node.imported_modules.is_empty() {
      map.serialize_entry("importedModules", &urls(&node.imported_modules))?;
    }
    if let Some(is_self_accepting) = node.is_self_accepting {
      map.serialize_entry("isSelfAccepting", &is_self_accepting)?;
    }
    if node.last_invalidation_timestamp > 0 {
      map.serialize_entry(
        "lastInvalidationTimestamp",
        &node.last_invalidation_timestamp,
      )?;
    }
    if !node.meta.is_empty() {
      map.serialize_entry("meta", &node.meta)?;
    }
    map.end()
  }
}
