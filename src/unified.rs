// Copyright 2018-2024 the Deno authors. MIT license.

use std::cell::RefCell;
use std::collections::HashMap;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use indexmap::IndexSet;
use serde::ser::SerializeMap;
use serde::Serialize;
use serde::Serializer;

use crate::graph::EnvironmentModuleGraph;
use crate::graph::InvalidateOptions;
use crate::graph::ModuleGraphError;
use crate::graph::ModuleInfoChanges;
use crate::graph::ModuleInfoUpdate;
use crate::graph::ResolvedUrl;
use crate::node::ModuleNode;
use crate::node::ModuleRef;
use crate::node::TransformResult;
use crate::timestamp::monotonic_now;

/// The conventional name of the default environment.
pub const BROWSER_ENVIRONMENT: &str = "browser";
/// The conventional name of the server side rendering environment.
pub const SERVER_ENVIRONMENT: &str = "server";

/// A handle to a combined node of a `UnifiedModuleGraph`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CombinedModuleRef(u32);

impl fmt::Display for CombinedModuleRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "combined:{}", self.0)
  }
}

/// One logical module seen through every environment that knows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CombinedModuleNode {
  reference: CombinedModuleRef,
  logical_id: Option<String>,
  /// Environment name to the node of that environment, in environment
  /// priority order.
  facets: IndexMap<String, ModuleRef>,
}

impl CombinedModuleNode {
  pub fn reference(&self) -> CombinedModuleRef {
    self.reference
  }

  /// The shared id of the facets, `None` for file only entries.
  pub fn logical_id(&self) -> Option<&str> {
    self.logical_id.as_deref()
  }

  pub fn facets(&self) -> &IndexMap<String, ModuleRef> {
    &self.facets
  }

  pub fn facet(&self, environment: &str) -> Option<ModuleRef> {
    self.facets.get(environment).copied()
  }

  pub fn browser_module(&self) -> Option<ModuleRef> {
    self.facet(BROWSER_ENVIRONMENT)
  }

  pub fn server_module(&self) -> Option<ModuleRef> {
    self.facet(SERVER_ENVIRONMENT)
  }
}

/// Either kind of node accepted by `UnifiedModuleGraph::invalidate_module`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleHandle {
  Combined(CombinedModuleRef),
  Environment(ModuleRef),
}

impl From<CombinedModuleRef> for ModuleHandle {
  fn from(module: CombinedModuleRef) -> Self {
    Self::Combined(module)
  }
}

impl From<ModuleRef> for ModuleHandle {
  fn from(module: ModuleRef) -> Self {
    Self::Environment(module)
  }
}

/// A set of combined nodes where each logical module appears once, ordered
/// by first appearance across the environment priority list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CombinedModuleSet(IndexSet<CombinedModuleRef>);

impl CombinedModuleSet {
  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn contains(&self, module: CombinedModuleRef) -> bool {
    self.0.contains(&module)
  }

  pub fn get_index(&self, index: usize) -> Option<CombinedModuleRef> {
    self.0.get_index(index).copied()
  }

  pub fn iter(&self) -> impl Iterator<Item = CombinedModuleRef> + '_ {
    self.0.iter().copied()
  }

  fn insert(&mut self, module: CombinedModuleRef) -> bool {
    self.0.insert(module)
  }
}

impl IntoIterator for CombinedModuleSet {
  type Item = CombinedModuleRef;
  type IntoIter = indexmap::set::IntoIter<CombinedModuleRef>;

  fn into_iter(self) -> Self::IntoIter {
    self.0.into_iter()
  }
}

impl<'a> IntoIterator for &'a CombinedModuleSet {
  type Item = &'a CombinedModuleRef;
  type IntoIter = indexmap::set::Iter<'a, CombinedModuleRef>;

  fn into_iter(self) -> Self::IntoIter {
    self.0.iter()
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum LogicalKey {
  Id(String),
  /// Nodes without an id are only ever equal to themselves.
  Module(ModuleRef),
}

#[derive(Debug, Default)]
struct CombinedStore {
  nodes: Vec<CombinedModuleNode>,
  by_key: HashMap<LogicalKey, CombinedModuleRef>,
  /// Every facet ever merged into a combined node. Environments may resolve
  /// one url to different ids, so a facet is not always reachable by key.
  by_module: HashMap<ModuleRef, CombinedModuleRef>,
}

/// Composes several environment graphs into one graph for callers that only
/// know about a single module graph.
///
/// Combined nodes are created lazily and cached by logical identity, so
/// asking twice for the same module returns the same `CombinedModuleRef`.
#[derive(Debug)]
pub struct UnifiedModuleGraph {
  graphs: IndexMap<String, Rc<EnvironmentModuleGraph>>,
  combined: RefCell<CombinedStore>,
}

impl UnifiedModuleGraph {
  /// Creates the unified view. The order of `graphs` is the environment
  /// priority: the first graph is the default environment.
  pub fn new(
    graphs: Vec<Rc<EnvironmentModuleGraph>>,
  ) -> Result<Self, ModuleGraphError> {
    if graphs.is_empty() {
      return Err(ModuleGraphError::NoEnvironments);
    }
    let mut by_name = IndexMap::with_capacity(graphs.len());
    for graph in graphs {
      let name = graph.environment_name().to_string();
      if by_name.contains_key(&name) {
        return Err(ModuleGraphError::DuplicateEnvironment(name));
      }
      by_name.insert(name, graph);
    }
    Ok(Self {
      graphs: by_name,
      combined: Default::default(),
    })
  }

  pub fn environment(
    &self,
    environment: &str,
  ) -> Option<&Rc<EnvironmentModuleGraph>> {
    self.graphs.get(environment)
  }

  pub fn environment_names(&self) -> impl Iterator<Item = &str> {
    self.graphs.keys().map(|name| name.as_str())
  }

  fn default_graph(&self) -> &Rc<EnvironmentModuleGraph> {
    // construction guarantees at least one environment
    &self.graphs[0]
  }

  fn graph_of(
    &self,
    module: ModuleRef,
  ) -> Option<(&String, &Rc<EnvironmentModuleGraph>)> {
    self
      .graphs
      .iter()
      .find(|(_, graph)| graph.id() == module.graph_id())
  }

  fn get_graph(
    &self,
    environment: &str,
  ) -> Result<&Rc<EnvironmentModuleGraph>, ModuleGraphError> {
    self
      .graphs
      .get(environment)
      .ok_or_else(|| {
        ModuleGraphError::UnknownEnvironment(environment.to_string())
      })
  }

  pub fn node(&self, module: CombinedModuleRef) -> Option<CombinedModuleNode> {
    self.combined.borrow().nodes.get(module.0 as usize).cloned()
  }

  pub fn facet(
    &self,
    module: CombinedModuleRef,
    environment: &str,
  ) -> Option<ModuleRef> {
    let store = self.combined.borrow();
    store.nodes.get(module.0 as usize)?.facet(environment)
  }

  pub fn browser_module(&self, module: CombinedModuleRef) -> Option<ModuleRef> {
    self.facet(module, BROWSER_ENVIRONMENT)
  }

  pub fn server_module(&self, module: CombinedModuleRef) -> Option<ModuleRef> {
    self.facet(module, SERVER_ENVIRONMENT)
  }

  /// The url of the highest priority facet.
  pub fn url(&self, module: CombinedModuleRef) -> Option<String> {
    self.read_first_facet(module, |node| Some(node.url().to_string()))
  }

  pub fn file(&self, module: CombinedModuleRef) -> Option<String> {
    self.read_first_facet(module, |node| node.file().map(|f| f.to_string()))
  }

  fn read_first_facet<T>(
    &self,
    module: CombinedModuleRef,
    read: impl FnOnce(&ModuleNode) -> Option<T>,
  ) -> Option<T> {
    let facet = self.node(module)?.facets.values().next().copied()?;
    let (_, graph) = self.graph_of(facet)?;
    let node = graph.module(facet)?;
    read(&node)
  }

  /// Returns the combined node for the given facets, creating it or merging
  /// newly seen facets into the cached node.
  fn combine(
    &self,
    facets: &[(String, ModuleRef)],
  ) -> Option<CombinedModuleRef> {
    let mut logical_id = None;
    for (environment, module) in facets {
      let graph = self.graphs.get(environment)?;
      if let Some(id) = graph.module(*module)?.id() {
        logical_id = Some(id.to_string());
        break;
      }
    }
    let key = match &logical_id {
      Some(id) => LogicalKey::Id(id.clone()),
      None => LogicalKey::Module(facets.first()?.1),
    };

    let mut store = self.combined.borrow_mut();
    let existing = facets
      .iter()
      .find_map(|(_, module)| store.by_module.get(module).copied())
      .or_else(|| store.by_key.get(&key).copied());
    let reference = match existing {
      Some(reference) => {
        store.by_key.entry(key).or_insert(reference);
        reference
      }
      None => {
        let reference = CombinedModuleRef(store.nodes.len() as u32);
        store.nodes.push(CombinedModuleNode {
          reference,
          logical_id,
          facets: IndexMap::new(),
        });
        store.by_key.insert(key, reference);
        reference
      }
    };
    let node = &mut store.nodes[reference.0 as usize];
    let mut merged = std::mem::take(&mut node.facets);
    for (environment, module) in facets {
      merged.insert(environment.clone(), *module);
    }
    node.facets = self
      .graphs
      .keys()
      .filter_map(|name| Some((name.clone(), *merged.get(name)?)))
      .collect();
    for (_, module) in facets {
      store.by_module.insert(*module, reference);
    }
    Some(reference)
  }

  /// The combined node for a node of one of the environments. The other
  /// facets are found through the node's id, or through the combined node
  /// the facet was already merged into.
  pub fn combined_node_for(
    &self,
    module: ModuleRef,
  ) -> Option<CombinedModuleRef> {
    let (environment, graph) = self.graph_of(module)?;
    let id = graph.module(module)?.id().map(|id| id.to_string());
    let facets = match id {
      Some(id) => self.facets_by_id(&id),
      None => vec![(environment.clone(), module)],
    };
    self.combine(&facets)
  }

  fn facets_by_id(&self, id: &str) -> Vec<(String, ModuleRef)> {
    self
      .graphs
      .iter()
      .filter_map(|(name, graph)| {
        graph.get_module_by_id(id).map(|module| (name.clone(), module))
      })
      .collect()
  }

  pub fn get_module_by_id(&self, id: &str) -> Option<CombinedModuleRef> {
    let facets = self.facets_by_id(id);
    if facets.is_empty() {
      return None;
    }
    self.combine(&facets)
  }

  /// Looks the url up in every environment. Never creates nodes.
  pub async fn get_module_by_url(
    &self,
    url: &str,
  ) -> Result<Option<CombinedModuleRef>, ModuleGraphError> {
    let mut facets = Vec::new();
    for (name, graph) in &self.graphs {
      if let Some(module) = graph.get_module_by_url(url).await? {
        facets.push((name.clone(), module));
      }
    }
    if facets.is_empty() {
      return Ok(None);
    }
    Ok(self.combine(&facets))
  }

  /// Resolves `url` in every environment, in priority order, and returns the
  /// combined node of the results.
  pub async fn ensure_entry_from_url(
    &self,
    url: &str,
    set_is_self_accepting: bool,
  ) -> Result<CombinedModuleRef, ModuleGraphError> {
    let modules =
      futures::future::try_join_all(self.graphs.values().map(|graph| {
        graph.ensure_entry_from_url(url, set_is_self_accepting)
      }))
      .await?;
    let facets = self
      .graphs
      .keys()
      .cloned()
      .zip(modules)
      .collect::<Vec<_>>();
    self
      .combine(&facets)
      .ok_or_else(|| ModuleGraphError::InvalidUrl(url.to_string()))
  }

  /// Resolves `url` in a single environment.
  pub async fn ensure_entry_from_url_in(
    &self,
    environment: &str,
    url: &str,
    set_is_self_accepting: bool,
  ) -> Result<CombinedModuleRef, ModuleGraphError> {
    let graph = self.get_graph(environment)?;
    let module = graph.ensure_entry_from_url(url, set_is_self_accepting).await?;
    self
      .combined_node_for(module)
      .ok_or_else(|| ModuleGraphError::InvalidUrl(url.to_string()))
  }

  /// Resolves with the default environment.
  pub async fn resolve_url(
    &self,
    url: &str,
  ) -> Result<ResolvedUrl, ModuleGraphError> {
    self.default_graph().resolve_url(url).await
  }

  pub fn get_modules_by_file(&self, file: &str) -> Option<CombinedModuleSet> {
    let mut found = false;
    let mut set = CombinedModuleSet::default();
    for graph in self.graphs.values() {
      if let Some(modules) = graph.get_modules_by_file(file) {
        found = true;
        for module in modules {
          if let Some(combined) = self.combined_node_for(module) {
            set.insert(combined);
          }
        }
      }
    }
    found.then_some(set)
  }

  /// Etags are looked up in the default environment, the one serving
  /// browser requests.
  pub fn get_module_by_etag(&self, etag: &str) -> Option<CombinedModuleRef> {
    let module = self.default_graph().get_module_by_etag(etag)?;
    self.combined_node_for(module)
  }

  pub fn importers(&self, module: CombinedModuleRef) -> CombinedModuleSet {
    self.union(module, |node| node.importers())
  }

  pub fn imported_modules(
    &self,
    module: CombinedModuleRef,
  ) -> CombinedModuleSet {
    self.union(module, |node| node.imported_modules())
  }

  pub fn accepted_hmr_deps(
    &self,
    module: CombinedModuleRef,
  ) -> CombinedModuleSet {
    self.union(module, |node| node.accepted_hmr_deps())
  }

  /// Merges one edge set of every facet. Each related module is mapped to
  /// its combined node first, so the same logical module reached through
  /// two environments is yielded once, at its first appearance.
  fn union(
    &self,
    module: CombinedModuleRef,
    select: impl Fn(&ModuleNode) -> &IndexSet<ModuleRef>,
  ) -> CombinedModuleSet {
    let mut set = CombinedModuleSet::default();
    let Some(node) = self.node(module) else {
      return set;
    };
    for (environment, facet) in node.facets {
      let Some(graph) = self.graphs.get(&environment) else {
        continue;
      };
      let related = match graph.module(facet) {
        Some(node) => select(&node).iter().copied().collect::<Vec<_>>(),
        None => continue,
      };
      for related in related {
        if let Some(combined) = self.combined_node_for(related) {
          set.insert(combined);
        }
      }
    }
    set
  }

  /// Records `importer` as an importer of `module` in every environment
  /// where both have a facet. Returns `true` if any edge was added.
  pub fn add_importer(
    &self,
    module: CombinedModuleRef,
    importer: CombinedModuleRef,
  ) -> bool {
    let (Some(module), Some(importer)) =
      (self.node(module), self.node(importer))
    else {
      return false;
    };
    let mut added = false;
    for (environment, facet) in &module.facets {
      if let (Some(graph), Some(importer_facet)) =
        (self.graphs.get(environment), importer.facet(environment))
      {
        added |= graph.add_importer(*facet, importer_facet);
      }
    }
    added
  }

  pub async fn update_module_info(
    &self,
    module: CombinedModuleRef,
    environment: &str,
    update: ModuleInfoUpdate,
  ) -> Result<ModuleInfoChanges, ModuleGraphError> {
    let graph = self.get_graph(environment)?;
    let facet = self.facet(module, environment).ok_or_else(|| {
      ModuleGraphError::MissingFacet {
        module,
        environment: environment.to_string(),
      }
    })?;
    graph.update_module_info(facet, update).await
  }

  /// Stores a transform result on the facet of one environment. Returns
  /// `false` when the module has no facet there.
  pub fn update_module_transform_result(
    &self,
    module: CombinedModuleRef,
    environment: &str,
    result: Option<TransformResult>,
  ) -> Result<bool, ModuleGraphError> {
    let graph = self.get_graph(environment)?;
    Ok(match self.facet(module, environment) {
      Some(facet) => graph.update_module_transform_result(facet, result),
      None => false,
    })
  }

  pub fn invalidate_module(&self, module: impl Into<ModuleHandle>) {
    self.invalidate_module_with(
      module,
      &mut HashSet::new(),
      InvalidateOptions::default(),
    )
  }

  /// Invalidates a combined node in every environment it has a facet in, or
  /// an environment node in its own environment.
  pub fn invalidate_module_with(
    &self,
    module: impl Into<ModuleHandle>,
    seen: &mut HashSet<ModuleRef>,
    mut options: InvalidateOptions,
  ) {
    // every facet of one invalidation carries the same timestamp
    options.timestamp.get_or_insert_with(monotonic_now);
    let facets = match module.into() {
      ModuleHandle::Combined(module) => match self.node(module) {
        Some(node) => node.facets.into_values().collect::<Vec<_>>(),
        None => {
          log::warn!("Ignoring invalidation of unknown module {}.", module);
          return;
        }
      },
      ModuleHandle::Environment(module) => vec![module],
    };
    for facet in facets {
      match self.graph_of(facet) {
        Some((_, graph)) => graph.invalidate_module_with(facet, seen, options),
        None => {
          log::warn!("Ignoring invalidation of foreign module {}.", facet)
        }
      }
    }
  }

  pub fn invalidate_all(&self) {
    for graph in self.graphs.values() {
      graph.invalidate_all();
    }
  }

  pub fn on_file_change(&self, file: &str) {
    for graph in self.graphs.values() {
      graph.on_file_change(file);
    }
  }

  pub fn on_file_delete(&self, file: &str) {
    for graph in self.graphs.values() {
      graph.on_file_delete(file);
    }
  }
}

impl Serialize for UnifiedModuleGraph {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: Serializer,
  {
    let mut map = serializer.serialize_map(Some(self.graphs.len()))?;
    for (name, graph) in &self.graphs {
      map.serialize_entry(name, &**graph)?;
    }
    map.end()
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;
  use crate::source::MemoryResolver;

  fn unified() -> (
    UnifiedModuleGraph,
    Rc<EnvironmentModuleGraph>,
    Rc<EnvironmentModuleGraph>,
  ) {
    let browser = Rc::new(EnvironmentModuleGraph::new(
      BROWSER_ENVIRONMENT,
      Rc::new(MemoryResolver::default()),
    ));
    let server = Rc::new(EnvironmentModuleGraph::new(
      SERVER_ENVIRONMENT,
      Rc::new(MemoryResolver::default()),
    ));
    let graph =
      UnifiedModuleGraph::new(vec![browser.clone(), server.clone()]).unwrap();
    (graph, browser, server)
  }

  fn unified_with(
    browser_aliases: Vec<(&str, &str)>,
    server_aliases: Vec<(&str, &str)>,
  ) -> UnifiedModuleGraph {
    let browser = EnvironmentModuleGraph::new(
      BROWSER_ENVIRONMENT,
      Rc::new(MemoryResolver::new(browser_aliases)),
    );
    let server = EnvironmentModuleGraph::new(
      SERVER_ENVIRONMENT,
      Rc::new(MemoryResolver::new(server_aliases)),
    );
    UnifiedModuleGraph::new(vec![Rc::new(browser), Rc::new(server)]).unwrap()
  }

  #[test]
  fn construction_errors() {
    assert!(matches!(
      UnifiedModuleGraph::new(vec![]),
      Err(ModuleGraphError::NoEnvironments)
    ));
    let resolver = Rc::new(MemoryResolver::default());
    let err = UnifiedModuleGraph::new(vec![
      Rc::new(EnvironmentModuleGraph::new("browser", resolver.clone())),
      Rc::new(EnvironmentModuleGraph::new("browser", resolver)),
    ])
    .unwrap_err();
    assert!(matches!(
      err,
      ModuleGraphError::DuplicateEnvironment(name) if name == "browser"
    ));
  }

  #[tokio::test]
  async fn ensure_entry_fans_out_to_all_environments() {
    let (graph, browser, server) = unified();
    let module = graph.ensure_entry_from_url("/a.js", true).await.unwrap();
    let browser_module = browser.get_module_by_id("/a.js").unwrap();
    let server_module = server.get_module_by_id("/a.js").unwrap();
    assert_eq!(graph.browser_module(module), Some(browser_module));
    assert_eq!(graph.server_module(module), Some(server_module));
    assert_eq!(graph.url(module).as_deref(), Some("/a.js"));
    assert_eq!(graph.file(module).as_deref(), Some("/a.js"));

    let again = graph.ensure_entry_from_url("/a.js", true).await.unwrap();
    assert_eq!(module, again);
    assert_eq!(graph.get_module_by_id("/a.js"), Some(module));
    assert_eq!(graph.combined_node_for(server_module), Some(module));
    let names = graph.environment_names().collect::<Vec<_>>();
    assert_eq!(names, vec!["browser", "server"]);
  }

  #[tokio::test]
  async fn combined_node_picks_up_late_facets() {
    let (graph, browser, server) = unified();
    let browser_only = graph
      .ensure_entry_from_url_in(BROWSER_ENVIRONMENT, "/a.js", true)
      .await
      .unwrap();
    assert_eq!(graph.server_module(browser_only), None);
    let server_module =
      server.ensure_entry_from_url("/a.js", true).await.unwrap();
    let both = graph.get_module_by_id("/a.js").unwrap();
    assert_eq!(both, browser_only);
    assert_eq!(graph.server_module(both), Some(server_module));
    assert_eq!(
      graph.browser_module(both),
      browser.get_module_by_id("/a.js")
    );
    let node = graph.node(both).unwrap();
    assert_eq!(node.logical_id(), Some("/a.js"));
    assert_eq!(
      node.facets().keys().collect::<Vec<_>>(),
      vec!["browser", "server"]
    );
  }

  #[tokio::test]
  async fn unknown_environment_is_an_error() {
    let (graph, _, _) = unified();
    let err = graph
      .ensure_entry_from_url_in("edge", "/a.js", true)
      .await
      .unwrap_err();
    assert!(matches!(
      err,
      ModuleGraphError::UnknownEnvironment(name) if name == "edge"
    ));
    assert!(graph.environment("edge").is_none());
  }

  #[tokio::test]
  async fn importers_are_deduplicated_across_environments() {
    let (graph, browser, server) = unified();
    let browser_target =
      browser.ensure_entry_from_url("/t.js", true).await.unwrap();
    let server_target =
      server.ensure_entry_from_url("/t.js", true).await.unwrap();
    // browser: a, b; server: b, c
    for url in ["/a.js", "/b.js"] {
      let importer = browser.ensure_entry_from_url(url, true).await.unwrap();
      browser.add_importer(browser_target, importer);
    }
    for url in ["/b.js", "/c.js"] {
      let importer = server.ensure_entry_from_url(url, true).await.unwrap();
      server.add_importer(server_target, importer);
    }
    let target = graph.get_module_by_id("/t.js").unwrap();
    let importers = graph.importers(target);
    let urls = importers
      .iter()
      .map(|module| graph.url(module).unwrap())
      .collect::<Vec<_>>();
    assert_eq!(urls, vec!["/a.js", "/b.js", "/c.js"]);

    let b = importers.get_index(1).unwrap();
    assert_eq!(graph.browser_module(b), browser.get_module_by_id("/b.js"));
    assert_eq!(graph.server_module(b), server.get_module_by_id("/b.js"));
    let c = importers.get_index(2).unwrap();
    assert_eq!(graph.browser_module(c), None);
  }

  #[tokio::test]
  async fn id_less_importers_are_their_own_identity() {
    let (graph, browser, _) = unified();
    let target = graph.ensure_entry_from_url("/t.js", true).await.unwrap();
    let asset = browser.create_file_only_entry("/root/logo.png");
    let browser_target = graph.browser_module(target).unwrap();
    browser.add_importer(browser_target, asset);
    let importers = graph.importers(target);
    assert_eq!(importers.len(), 1);
    let combined = importers.get_index(0).unwrap();
    assert_eq!(graph.browser_module(combined), Some(asset));
    assert_eq!(graph.node(combined).unwrap().logical_id(), None);
  }

  #[tokio::test]
  async fn add_importer_writes_through_and_does_not_double_count() {
    let (graph, browser, server) = unified();
    let target = graph.ensure_entry_from_url("/t.js", true).await.unwrap();
    let importer = graph.ensure_entry_from_url("/i.js", true).await.unwrap();
    assert!(graph.add_importer(target, importer));
    assert!(!graph.add_importer(target, importer));
    assert_eq!(graph.importers(target).len(), 1);
    assert!(graph.imported_modules(importer).contains(target));
    let browser_target = graph.browser_module(target).unwrap();
    let server_target = graph.server_module(target).unwrap();
    assert_eq!(browser.module(browser_target).unwrap().importers().len(), 1);
    assert_eq!(server.module(server_target).unwrap().importers().len(), 1);
  }

  #[tokio::test]
  async fn invalidating_combined_node_invalidates_all_facets() {
    let (graph, browser, server) = unified();
    let module = graph.ensure_entry_from_url("/a.js", true).await.unwrap();
    for environment in [BROWSER_ENVIRONMENT, SERVER_ENVIRONMENT] {
      assert!(graph
        .update_module_transform_result(
          module,
          environment,
          Some(TransformResult::default()),
        )
        .unwrap());
    }
    graph.invalidate_module(module);
    let browser_node = browser.module(graph.browser_module(module).unwrap());
    assert!(browser_node.unwrap().transform_result().is_none());
    let server_node = server.module(graph.server_module(module).unwrap());
    assert!(server_node.unwrap().transform_result().is_none());
  }

  #[tokio::test]
  async fn invalidating_raw_node_stays_in_its_environment() {
    let (graph, browser, server) = unified();
    let module = graph.ensure_entry_from_url("/a.js", true).await.unwrap();
    let browser_module = graph.browser_module(module).unwrap();
    let server_module = graph.server_module(module).unwrap();
    server.update_module_transform_result(
      server_module,
      Some(TransformResult::default()),
    );
    graph.invalidate_module(browser_module);
    let browser_node = browser.module(browser_module).unwrap();
    assert!(browser_node.last_invalidation_timestamp() > 0);
    let server_node = server.module(server_module).unwrap();
    assert!(server_node.transform_result().is_some());
    assert_eq!(server_node.last_invalidation_timestamp(), 0);
  }

  #[tokio::test]
  async fn file_lookups_merge_environments() {
    let (graph, browser, _) = unified();
    let a = graph.ensure_entry_from_url("/a.js", true).await.unwrap();
    let modules = graph.get_modules_by_file("/a.js").unwrap();
    assert_eq!(modules.into_iter().collect::<Vec<_>>(), vec![a]);
    assert!(graph.get_modules_by_file("/b.js").is_none());

    let browser_module = graph.browser_module(a).unwrap();
    browser.update_module_transform_result(
      browser_module,
      Some(TransformResult {
        etag: Some("W/\"a\"".to_string()),
        ..Default::default()
      }),
    );
    assert_eq!(graph.get_module_by_etag("W/\"a\""), Some(a));

    graph.on_file_change("/a.js");
    assert_eq!(graph.get_module_by_etag("W/\"a\""), None);
  }

  #[tokio::test]
  async fn get_module_by_url_does_not_create() {
    let (graph, browser, server) = unified();
    assert_eq!(graph.get_module_by_url("/a.js").await.unwrap(), None);
    assert!(browser.is_empty());
    assert!(server.is_empty());
    let module = graph.ensure_entry_from_url("/a.js", true).await.unwrap();
    assert_eq!(graph.get_module_by_url("/a.js").await.unwrap(), Some(module));
  }

  #[tokio::test]
  async fn split_ids_share_one_combined_node() {
    let graph = unified_with(
      vec![("/lib.js", "/lib.browser.js")],
      vec![("/lib.js", "/lib.node.js")],
    );
    let main = graph.ensure_entry_from_url("/main.js", true).await.unwrap();
    let lib = graph.ensure_entry_from_url("/lib.js", true).await.unwrap();
    for environment in [BROWSER_ENVIRONMENT, SERVER_ENVIRONMENT] {
      graph
        .update_module_info(
          main,
          environment,
          ModuleInfoUpdate {
            imported_modules: vec!["/lib.js".into()],
            ..Default::default()
          },
        )
        .await
        .unwrap();
    }

    let server_lib = graph.server_module(lib).unwrap();
    assert_eq!(graph.combined_node_for(server_lib), Some(lib));
    assert_eq!(graph.get_module_by_id("/lib.node.js"), Some(lib));
    assert_eq!(graph.get_module_by_id("/lib.browser.js"), Some(lib));
    assert_eq!(
      graph.imported_modules(main).into_iter().collect::<Vec<_>>(),
      vec![lib]
    );
    assert_eq!(
      graph.importers(lib).into_iter().collect::<Vec<_>>(),
      vec![main]
    );
    let node = graph.node(lib).unwrap();
    assert_eq!(node.logical_id(), Some("/lib.browser.js"));
    assert_eq!(node.facets().len(), 2);

    graph.invalidate_module(graph.get_module_by_id("/lib.node.js").unwrap());
    for environment in [BROWSER_ENVIRONMENT, SERVER_ENVIRONMENT] {
      let facet = graph.facet(lib, environment).unwrap();
      let env_graph = graph.environment(environment).unwrap();
      let timestamp =
        env_graph.module(facet).unwrap().last_invalidation_timestamp();
      assert!(timestamp > 0);
    }
  }

  #[tokio::test]
  async fn late_split_facet_joins_the_existing_node() {
    let graph = unified_with(
      vec![("/lib.js", "/lib.browser.js")],
      vec![("/lib.js", "/lib.node.js")],
    );
    let server_only = graph
      .ensure_entry_from_url_in(SERVER_ENVIRONMENT, "/lib.js", true)
      .await
      .unwrap();
    let lib = graph.ensure_entry_from_url("/lib.js", true).await.unwrap();
    assert_eq!(lib, server_only);
    assert!(graph.browser_module(lib).is_some());
    assert_eq!(
      graph.node(lib).unwrap().facets().keys().collect::<Vec<_>>(),
      vec!["browser", "server"]
    );
  }

  #[tokio::test]
  async fn combined_invalidation_uses_one_timestamp() {
    let (graph, browser, server) = unified();
    let module = graph.ensure_entry_from_url("/a.js", true).await.unwrap();
    graph.invalidate_module(module);
    let browser_timestamp = browser
      .module(graph.browser_module(module).unwrap())
      .unwrap()
      .last_invalidation_timestamp();
    let server_timestamp = server
      .module(graph.server_module(module).unwrap())
      .unwrap()
      .last_invalidation_timestamp();
    assert!(browser_timestamp > 0);
    assert_eq!(browser_timestamp, server_timestamp);
  }

  #[tokio::test]
  async fn accepted_deps_through_the_combined_view() {
    let graph = unified_with(
      vec![("/dep", "/dep.js")],
      vec![("/dep", "/dep.js")],
    );
    let main = graph.ensure_entry_from_url("/main.js", true).await.unwrap();
    for environment in [BROWSER_ENVIRONMENT, SERVER_ENVIRONMENT] {
      let changes = graph
        .update_module_info(
          main,
          environment,
          ModuleInfoUpdate {
            imported_modules: vec!["/dep".into()],
            accepted_modules: vec!["/dep".into()],
            ..Default::default()
          },
        )
        .await
        .unwrap();
      assert_eq!(changes.added.len(), 1);
    }

    // the alias and the resolved url find the same node
    let dep = graph.get_module_by_url("/dep").await.unwrap().unwrap();
    assert_eq!(graph.get_module_by_url("/dep.js").await.unwrap(), Some(dep));
    assert_eq!(graph.url(dep).as_deref(), Some("/dep.js"));
    assert_eq!(
      graph.accepted_hmr_deps(main).into_iter().collect::<Vec<_>>(),
      vec![dep]
    );
    assert_eq!(
      graph.imported_modules(main).into_iter().collect::<Vec<_>>(),
      vec![dep]
    );
    assert!(graph.accepted_hmr_deps(dep).is_empty());

    let browser_only = graph
      .ensure_entry_from_url_in(BROWSER_ENVIRONMENT, "/client.js", true)
      .await
      .unwrap();
    let err = graph
      .update_module_info(
        browser_only,
        SERVER_ENVIRONMENT,
        ModuleInfoUpdate::default(),
      )
      .await
      .unwrap_err();
    assert!(matches!(err, ModuleGraphError::MissingFacet { .. }));
  }
}
