// Copyright 2018-2024 the Deno authors. MIT license.

use std::cell::Cell;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HotUpdateType {
  JsUpdate,
  CssUpdate,
}

/// One module to re-fetch on the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HotUpdate {
  #[serde(rename = "type")]
  pub update_type: HotUpdateType,
  /// The url of the module that accepts the update.
  pub path: String,
  /// The url of the module that changed.
  pub accepted_path: String,
  pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HotErrorPayload {
  pub message: String,
  #[serde(default)]
  pub stack: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub plugin: Option<String>,
}

/// A message pushed to connected clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum HotPayload {
  Connected,
  Update {
    updates: Vec<HotUpdate>,
  },
  #[serde(rename_all = "camelCase")]
  FullReload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    triggered_by: Option<String>,
  },
  Prune {
    paths: Vec<String>,
  },
  Error {
    err: HotErrorPayload,
  },
  /// A plugin defined event.
  Custom {
    event: String,
    #[serde(default)]
    data: Value,
  },
}

/// The transport to a single client, ex. a websocket connection.
pub trait HotChannelClient: fmt::Debug {
  fn send(&self, payload: &HotPayload);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u32);

impl fmt::Display for ClientId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "client#{}", self.0)
  }
}

/// The client that sent a custom event, handed to listeners so they can
/// reply to it alone.
#[derive(Debug, Clone)]
pub struct HotClient {
  id: ClientId,
  transport: Rc<dyn HotChannelClient>,
}

impl HotClient {
  pub fn id(&self) -> ClientId {
    self.id
  }

  pub fn send(&self, payload: &HotPayload) {
    self.transport.send(payload);
  }

  pub fn send_custom(&self, event: impl Into<String>, data: Value) {
    self.send(&HotPayload::Custom {
      event: event.into(),
      data,
    });
  }
}

pub type HotListener = Rc<dyn Fn(&Value, &HotClient)>;

/// Pushes hot update messages to every connected client and dispatches
/// custom events sent by clients to the registered listeners.
#[derive(Default)]
pub struct HotChannel {
  clients: RefCell<IndexMap<ClientId, Rc<dyn HotChannelClient>>>,
  listeners: RefCell<HashMap<String, Vec<HotListener>>>,
  next_client_id: Cell<u32>,
}

impl fmt::Debug for HotChannel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut events =
      self.listeners.borrow().keys().cloned().collect::<Vec<_>>();
    events.sort();
    f.debug_struct("HotChannel")
      .field("clients", &self.clients.borrow().keys().collect::<Vec<_>>())
      .field("events", &events)
      .finish()
  }
}

impl HotChannel {
  pub fn new() -> Self {
    Self::default()
  }

  /// Registers a client and greets it with a `connected` message.
  pub fn connect(&self, transport: Rc<dyn HotChannelClient>) -> ClientId {
    let id = ClientId(self.next_client_id.get());
    self.next_client_id.set(id.0 + 1);
    self.clients.borrow_mut().insert(id, transport.clone());
    log::debug!("Hot channel {} connected", id);
    transport.send(&HotPayload::Connected);
    id
  }

  pub fn disconnect(&self, id: ClientId) -> bool {
    let removed = self.clients.borrow_mut().shift_remove(&id).is_some();
    if removed {
      log::debug!("Hot channel {} disconnected", id);
    }
    removed
  }

  pub fn client_count(&self) -> usize {
    self.clients.borrow().len()
  }

  /// Broadcasts to every connected client.
  pub fn send(&self, payload: &HotPayload) {
    // transports may disconnect themselves while sending
    let clients = self.clients.borrow().values().cloned().collect::<Vec<_>>();
    for client in clients {
      client.send(payload);
    }
  }

  pub fn send_custom(&self, event: impl Into<String>, data: Value) {
    self.send(&HotPayload::Custom {
      event: event.into(),
      data,
    });
  }

  /// Listens for a custom event sent by clients.
  pub fn on(
    &self,
    event: impl Into<String>,
    listener: impl Fn(&Value, &HotClient) + 'static,
  ) {
    self
      .listeners
      .borrow_mut()
      .entry(event.into())
      .or_default()
      .push(Rc::new(listener));
  }

  /// Dispatches a custom event received from a client. Returns the number
  /// of listeners that were called.
  pub fn receive(&self, id: ClientId, event: &str, data: &Value) -> usize {
    let Some(transport) = self.clients.borrow().get(&id).cloned() else {
      log::warn!("Ignoring event \"{}\" from unknown {}.", event, id);
      return 0;
    };
    let listeners = match self.listeners.borrow().get(event) {
      Some(listeners) => listeners.clone(),
      None => return 0,
    };
    let client = HotClient { id, transport };
    for listener in &listeners {
      listener(data, &client);
    }
    listeners.len()
  }
}
