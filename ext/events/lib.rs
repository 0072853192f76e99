// Copyright 2018-2026 the jsrt authors. MIT license.

//! The EventEmitter: a name -> ordered-listener-list dispatcher. Every
//! async notification in the runtime (streams, sockets, process events)
//! composes over this.
//!
//! Emitters are single-threaded by construction; cross-thread event
//! delivery is not a thing here. Listeners fire synchronously, in
//! registration order, before `emit` returns.

use std::cell::RefCell;
use std::collections::HashMap;
use std::error::Error;
use std::rc::Rc;

use bytes::Bytes;
use serde_json::Value;

/// One event argument. The narrow set of shapes the native subsystems
/// actually emit.
#[derive(Clone)]
pub enum EventValue {
  Bool(bool),
  Int(i64),
  Str(String),
  Bytes(Bytes),
  Json(Value),
  Error(Rc<dyn Error>),
  Object(Rc<dyn std::any::Any>),
}

impl EventValue {
  pub fn as_bytes(&self) -> Option<&Bytes> {
    match self {
      EventValue::Bytes(bytes) => Some(bytes),
      _ => None,
    }
  }

  pub fn as_str(&self) -> Option<&str> {
    match self {
      EventValue::Str(s) => Some(s),
      _ => None,
    }
  }

  pub fn as_error(&self) -> Option<&Rc<dyn Error>> {
    match self {
      EventValue::Error(err) => Some(err),
      _ => None,
    }
  }
}

impl std::fmt::Debug for EventValue {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      EventValue::Bool(v) => write!(f, "Bool({v})"),
      EventValue::Int(v) => write!(f, "Int({v})"),
      EventValue::Str(v) => write!(f, "Str({v:?})"),
      EventValue::Bytes(v) => write!(f, "Bytes({} bytes)", v.len()),
      EventValue::Json(v) => write!(f, "Json({v})"),
      EventValue::Error(v) => write!(f, "Error({v})"),
      EventValue::Object(_) => write!(f, "Object"),
    }
  }
}

/// What a listener returns; an `Err` is caught by the emitter and routed
/// to the uncaught hook, and the remaining listeners still run.
pub type ListenerResult = Result<(), Rc<dyn Error>>;

type Listener = Box<dyn FnMut(&[EventValue]) -> ListenerResult>;
type UncaughtHook = Rc<dyn Fn(Rc<dyn Error>)>;

/// Identity of a registered listener, used for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Entry {
  id: ListenerId,
  once: bool,
  f: Rc<RefCell<Listener>>,
}

#[derive(Default)]
struct Inner {
  listeners: HashMap<String, Vec<Entry>>,
  next_id: u64,
  uncaught_hook: Option<UncaughtHook>,
}

#[derive(Default)]
pub struct EventEmitter {
  inner: RefCell<Inner>,
}

impl EventEmitter {
  pub fn new() -> Self {
    Self::default()
  }

  /// Installed by the host; receives listener failures and unhandled
  /// `error` events.
  pub fn set_uncaught_hook(&self, hook: UncaughtHook) {
    self.inner.borrow_mut().uncaught_hook = Some(hook);
  }

  pub fn on<F>(&self, name: &str, f: F) -> ListenerId
  where
    F: FnMut(&[EventValue]) -> ListenerResult + 'static,
  {
    self.add(name, Box::new(f), false)
  }

  /// Registers a listener that fires at most once. It is removed before
  /// it is invoked, so re-emitting from inside it cannot loop.
  pub fn once<F>(&self, name: &str, f: F) -> ListenerId
  where
    F: FnMut(&[EventValue]) -> ListenerResult + 'static,
  {
    self.add(name, Box::new(f), true)
  }

  fn add(&self, name: &str, f: Listener, once: bool) -> ListenerId {
    let mut inner = self.inner.borrow_mut();
    inner.next_id += 1;
    let id = ListenerId(inner.next_id);
    inner.listeners.entry(name.to_string()).or_default().push(Entry {
      id,
      once,
      f: Rc::new(RefCell::new(f)),
    });
    id
  }

  /// Removes the first listener with the given identity.
  pub fn off(&self, name: &str, id: ListenerId) {
    let mut inner = self.inner.borrow_mut();
    if let Some(entries) = inner.listeners.get_mut(name) {
      if let Some(pos) = entries.iter().position(|entry| entry.id == id) {
        entries.remove(pos);
      }
      if entries.is_empty() {
        inner.listeners.remove(name);
      }
    }
  }

  pub fn remove_all_listeners(&self, name: Option<&str>) {
    let mut inner = self.inner.borrow_mut();
    match name {
      Some(name) => {
        inner.listeners.remove(name);
      }
      None => inner.listeners.clear(),
    }
  }

  pub fn listener_count(&self, name: &str) -> usize {
    self
      .inner
      .borrow()
      .listeners
      .get(name)
      .map(|entries| entries.len())
      .unwrap_or(0)
  }

  pub fn event_names(&self) -> Vec<String> {
    self.inner.borrow().listeners.keys().cloned().collect()
  }

  /// Dispatches `name` to every registered listener, in registration
  /// order, synchronously. Returns whether any listener was present.
  ///
  /// An `error` event with no listeners is surfaced through the uncaught
  /// hook instead of being silently dropped.
  pub fn emit(&self, name: &str, args: &[EventValue]) -> bool {
    let snapshot: Vec<Rc<RefCell<Listener>>> = {
      let mut inner = self.inner.borrow_mut();
      let Some(entries) = inner.listeners.get_mut(name) else {
        drop(inner);
        if name == "error" {
          self.surface_unhandled(args);
        }
        return false;
      };
      let snapshot = entries.iter().map(|entry| entry.f.clone()).collect();
      entries.retain(|entry| !entry.once);
      if entries.is_empty() {
        inner.listeners.remove(name);
      }
      snapshot
    };

    if snapshot.is_empty() {
      if name == "error" {
        self.surface_unhandled(args);
      }
      return false;
    }

    for listener in snapshot {
      let result = (*listener.borrow_mut())(args);
      if let Err(err) = result {
        log::debug!("listener for {name:?} failed: {err}");
        self.route_uncaught(err);
      }
    }
    true
  }

  fn surface_unhandled(&self, args: &[EventValue]) {
    let err: Rc<dyn Error> = match args.first() {
      Some(EventValue::Error(err)) => err.clone(),
      Some(other) => Rc::new(UnhandledErrorEvent(format!("{other:?}"))),
      None => Rc::new(UnhandledErrorEvent("error".to_string())),
    };
    self.route_uncaught(err);
  }

  fn route_uncaught(&self, err: Rc<dyn Error>) {
    let hook = self.inner.borrow().uncaught_hook.clone();
    match hook {
      Some(hook) => hook(err),
      None => log::error!("unhandled error event: {err}"),
    }
  }
}

/// Stand-in error for `emit("error")` with a non-error payload.
#[derive(Debug)]
pub struct UnhandledErrorEvent(pub String);

impl std::fmt::Display for UnhandledErrorEvent {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "unhandled error event: {}", self.0)
  }
}

impl Error for UnhandledErrorEvent {}

#[cfg(test)]
mod tests {
  use std::cell::RefCell;
  use std::rc::Rc;

  use super::*;

  #[test]
  fn listeners_fire_in_registration_order() {
    let emitter = EventEmitter::new();
    let order = Rc::new(RefCell::new(Vec::new()));
    for tag in ["a", "b", "c"] {
      let order = order.clone();
      emitter.on("tick", move |_| {
        order.borrow_mut().push(tag);
        Ok(())
      });
    }
    assert!(emitter.emit("tick", &[]));
    assert_eq!(*order.borrow(), vec!["a", "b", "c"]);
  }

  #[test]
  fn once_fires_exactly_once_and_is_removed_first() {
    let emitter = EventEmitter::new();
    let count = Rc::new(RefCell::new(0));
    let counter = count.clone();
    emitter.once("tick", move |_| {
      *counter.borrow_mut() += 1;
      Ok(())
    });
    assert_eq!(emitter.listener_count("tick"), 1);
    emitter.emit("tick", &[]);
    emitter.emit("tick", &[]);
    assert_eq!(*count.borrow(), 1);
    assert_eq!(emitter.listener_count("tick"), 0);
  }

  #[test]
  fn off_removes_only_the_identified_listener() {
    let emitter = EventEmitter::new();
    let hits = Rc::new(RefCell::new(Vec::new()));
    let first = {
      let hits = hits.clone();
      emitter.on("tick", move |_| {
        hits.borrow_mut().push(1);
        Ok(())
      })
    };
    {
      let hits = hits.clone();
      emitter.on("tick", move |_| {
        hits.borrow_mut().push(2);
        Ok(())
      });
    }
    emitter.off("tick", first);
    emitter.emit("tick", &[]);
    assert_eq!(*hits.borrow(), vec![2]);
  }

  #[test]
  fn emit_returns_false_without_listeners() {
    let emitter = EventEmitter::new();
    assert!(!emitter.emit("nothing", &[]));
  }

  #[test]
  fn unhandled_error_event_reaches_the_hook() {
    let emitter = EventEmitter::new();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    emitter.set_uncaught_hook(Rc::new(move |err| {
      sink.borrow_mut().push(err.to_string());
    }));
    let err: Rc<dyn std::error::Error> =
      Rc::new(UnhandledErrorEvent("boom".to_string()));
    emitter.emit("error", &[EventValue::Error(err)]);
    assert_eq!(seen.borrow().len(), 1);
    assert!(seen.borrow()[0].contains("boom"));
  }

  #[test]
  fn handled_error_event_does_not_reach_the_hook() {
    let emitter = EventEmitter::new();
    let seen = Rc::new(RefCell::new(0));
    let sink = seen.clone();
    emitter.set_uncaught_hook(Rc::new(move |_| {
      *sink.borrow_mut() += 1;
    }));
    emitter.on("error", |_| Ok(()));
    let err: Rc<dyn std::error::Error> =
      Rc::new(UnhandledErrorEvent("handled".to_string()));
    assert!(emitter.emit("error", &[EventValue::Error(err)]));
    assert_eq!(*seen.borrow(), 0);
  }

  #[test]
  fn failing_listener_does_not_stop_the_rest() {
    let emitter = EventEmitter::new();
    let hits = Rc::new(RefCell::new(0));
    let failures = Rc::new(RefCell::new(0));
    let sink = failures.clone();
    emitter.set_uncaught_hook(Rc::new(move |_| {
      *sink.borrow_mut() += 1;
    }));
    emitter.on("tick", |_| {
      Err(Rc::new(UnhandledErrorEvent("first".to_string())) as Rc<dyn Error>)
    });
    {
      let hits = hits.clone();
      emitter.on("tick", move |_| {
        *hits.borrow_mut() += 1;
        Ok(())
      });
    }
    emitter.emit("tick", &[]);
    assert_eq!(*hits.borrow(), 1);
    assert_eq!(*failures.borrow(), 1);
  }

  #[test]
  fn listener_registered_during_emit_does_not_fire_for_that_emit() {
    let emitter = Rc::new(EventEmitter::new());
    let late = Rc::new(RefCell::new(0));
    {
      let emitter = emitter.clone();
      let late = late.clone();
      emitter.clone().on("tick", move |_| {
        let late = late.clone();
        emitter.on("tick", move |_| {
          *late.borrow_mut() += 1;
          Ok(())
        });
        Ok(())
      });
    }
    emitter.emit("tick", &[]);
    assert_eq!(*late.borrow(), 0);
    emitter.emit("tick", &[]);
    assert_eq!(*late.borrow(), 1);
  }

  #[test]
  fn remove_all_listeners_scoped_and_global() {
    let emitter = EventEmitter::new();
    emitter.on("a", |_| Ok(()));
    emitter.on("b", |_| Ok(()));
    emitter.remove_all_listeners(Some("a"));
    assert_eq!(emitter.listener_count("a"), 0);
    assert_eq!(emitter.listener_count("b"), 1);
    emitter.remove_all_listeners(None);
    assert_eq!(emitter.listener_count("b"), 0);
  }
}
