// Copyright 2018-2024 the Deno authors. MIT license.

use std::cell::Cell;
use std::collections::HashMap;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use deno_error::JsErrorBox;
use deno_error::JsErrorClass;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

/// Plugin defined metadata attached to a module.
pub type ModuleMeta = serde_json::Map<String, serde_json::Value>;

/// The response expected from a resolver's `.resolve_id()` method.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedId {
  /// The canonical identity of the module. Distinct urls may share one id.
  pub id: String,
  /// Metadata to seed a newly created module with.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub meta: Option<ModuleMeta>,
}

impl ResolvedId {
  pub fn new(id: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      meta: None,
    }
  }
}

#[derive(Debug, Clone, Error, deno_error::JsError)]
pub enum ResolveError {
  #[class(generic)]
  #[error("Could not resolve \"{0}\".")]
  NotFound(String),
  #[class(inherit)]
  #[error(transparent)]
  Other(Arc<dyn JsErrorClass>),
}

impl From<JsErrorBox> for ResolveError {
  fn from(err: JsErrorBox) -> Self {
    Self::Other(Arc::new(err))
  }
}

/// A trait which allows a module graph to map request urls onto stable module
/// identities. Implementations are usually backed by a plugin pipeline.
///
/// The result must be deterministic for a url within one resolution session.
/// Returning `Ok(None)` means the url is its own id.
#[async_trait(?Send)]
pub trait ModuleResolver: fmt::Debug {
  async fn resolve_id(
    &self,
    url: &str,
  ) -> Result<Option<ResolvedId>, ResolveError>;
}

/// A resolver where the answers are provided ahead of time. Urls without an
/// entry resolve to themselves. This is useful for testing.
#[derive(Debug, Default)]
pub struct MemoryResolver {
  aliases: HashMap<String, ResolvedId>,
  failures: HashMap<String, String>,
  missing: HashSet<String>,
  calls: Cell<usize>,
}

impl MemoryResolver {
  pub fn new<S: AsRef<str>>(aliases: Vec<(S, S)>) -> Self {
    let mut resolver = Self::default();
    for (url, id) in aliases {
      resolver.add_alias(url, id);
    }
    resolver
  }

  pub fn add_alias(&mut self, url: impl AsRef<str>, id: impl AsRef<str>) {
    self.aliases.insert(
      url.as_ref().to_string(),
      ResolvedId::new(id.as_ref()),
    );
  }

  pub fn add_resolved(&mut self, url: impl AsRef<str>, resolved: ResolvedId) {
    self.aliases.insert(url.as_ref().to_string(), resolved);
  }

  /// Makes resolving `url` fail with the provided message.
  pub fn add_failure(
    &mut self,
    url: impl AsRef<str>,
    message: impl AsRef<str>,
  ) {
    self
      .failures
      .insert(url.as_ref().to_string(), message.as_ref().to_string());
  }

  pub fn remove_failure(&mut self, url: &str) {
    self.failures.remove(url);
  }

  /// Makes resolving `url` fail as if no plugin could find it.
  pub fn add_missing(&mut self, url: impl AsRef<str>) {
    self.missing.insert(url.as_ref().to_string());
  }

  /// The number of times `resolve_id` was called.
  pub fn calls(&self) -> usize {
    self.calls.get()
  }
}

#[async_trait(?Send)]
impl ModuleResolver for MemoryResolver {
  async fn resolve_id(
    &self,
    url: &str,
  ) -> Result<Option<ResolvedId>, ResolveError> {
    self.calls.set(self.calls.get() + 1);
    if let Some(message) = self.failures.get(url) {
      return Err(JsErrorBox::generic(message.clone()).into());
    }
    if self.missing.contains(url) {
      return Err(ResolveError::NotFound(url.to_string()));
    }
    Ok(self.aliases.get(url).cloned())
  }
}
