// Copyright 2018-2026 the jsrt authors. MIT license.

//! The contract the embedded JS engine satisfies. The engine is an
//! external collaborator: a single-threaded value graph with module
//! compilation and promise capabilities. Everything the native
//! subsystems need from it goes through these traits, so the whole
//! substrate can be exercised against [`testing::TestEngine`].

use std::rc::Rc;

use serde_json::Value;

/// Opaque id of a compiled module, owned by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleId(pub u64);

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
  #[error("failed to compile module {url}: {message}")]
  Compile { url: String, message: String },
  #[error("failed to evaluate module {url}: {message}")]
  Eval { url: String, message: String },
  #[error("{0} is not a function")]
  NotAFunction(String),
}

/// One promise, handed out by [`JsEngine::create_promise`]. Settling is
/// idempotent: the first resolve/reject wins.
pub trait PromiseCapability {
  fn resolve(&self, value: Value);
  fn reject(&self, error: Value);
}

pub trait JsEngine {
  /// Compiles `source` as an ES module named by `url`.
  fn compile_module(
    &self,
    url: &str,
    source: &str,
  ) -> Result<ModuleId, EngineError>;

  /// Evaluates `source` as a module named by `url` and returns the
  /// completion value. Used for the CommonJS-wrapper path.
  fn eval_module(&self, url: &str, source: &str)
  -> Result<Value, EngineError>;

  /// Calls a global function with `args` on the current thread.
  fn call_function(
    &self,
    name: &str,
    args: &[Value],
  ) -> Result<Value, EngineError>;

  fn create_promise(&self) -> Rc<dyn PromiseCapability>;
}

/// Deterministic in-memory engine used by the subsystem tests.
pub mod testing {
  use std::cell::RefCell;
  use std::rc::Rc;

  use serde_json::Value;

  use super::EngineError;
  use super::JsEngine;
  use super::ModuleId;
  use super::PromiseCapability;

  #[derive(Debug, Clone, PartialEq)]
  pub enum PromiseState {
    Pending,
    Resolved(Value),
    Rejected(Value),
  }

  pub struct TestPromise {
    state: RefCell<PromiseState>,
  }

  impl TestPromise {
    pub fn state(&self) -> PromiseState {
      self.state.borrow().clone()
    }
  }

  impl PromiseCapability for TestPromise {
    fn resolve(&self, value: Value) {
      let mut state = self.state.borrow_mut();
      if matches!(*state, PromiseState::Pending) {
        *state = PromiseState::Resolved(value);
      }
    }

    fn reject(&self, error: Value) {
      let mut state = self.state.borrow_mut();
      if matches!(*state, PromiseState::Pending) {
        *state = PromiseState::Rejected(error);
      }
    }
  }

  #[derive(Default)]
  pub struct TestEngine {
    compiled: RefCell<Vec<(String, String)>>,
    promises: RefCell<Vec<Rc<TestPromise>>>,
  }

  impl TestEngine {
    pub fn new() -> Self {
      Self::default()
    }

    /// The `(url, source)` pairs compiled so far, in order.
    pub fn compiled_modules(&self) -> Vec<(String, String)> {
      self.compiled.borrow().clone()
    }

    pub fn promises(&self) -> Vec<Rc<TestPromise>> {
      self.promises.borrow().clone()
    }
  }

  impl JsEngine for TestEngine {
    fn compile_module(
      &self,
      url: &str,
      source: &str,
    ) -> Result<ModuleId, EngineError> {
      if source.contains("@syntax-error@") {
        return Err(EngineError::Compile {
          url: url.to_string(),
          message: "unexpected token".to_string(),
        });
      }
      let mut compiled = self.compiled.borrow_mut();
      compiled.push((url.to_string(), source.to_string()));
      Ok(ModuleId(compiled.len() as u64 - 1))
    }

    fn eval_module(
      &self,
      url: &str,
      source: &str,
    ) -> Result<Value, EngineError> {
      self.compile_module(url, source)?;
      Ok(Value::Null)
    }

    fn call_function(
      &self,
      _name: &str,
      _args: &[Value],
    ) -> Result<Value, EngineError> {
      Ok(Value::Null)
    }

    fn create_promise(&self) -> Rc<dyn PromiseCapability> {
      let promise = Rc::new(TestPromise {
        state: RefCell::new(PromiseState::Pending),
      });
      self.promises.borrow_mut().push(promise.clone());
      promise
    }
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::testing::PromiseState;
  use super::testing::TestEngine;
  use super::JsEngine;

  #[test]
  fn promise_settles_once() {
    let engine = TestEngine::new();
    let promise = engine.create_promise();
    promise.resolve(json!(1));
    promise.reject(json!("late"));
    assert_eq!(
      engine.promises()[0].state(),
      PromiseState::Resolved(json!(1))
    );
  }

  #[test]
  fn compile_records_modules() {
    let engine = TestEngine::new();
    engine.compile_module("https://esm.sh/a.js", "export default 1").unwrap();
    let compiled = engine.compiled_modules();
    assert_eq!(compiled.len(), 1);
    assert_eq!(compiled[0].0, "https://esm.sh/a.js");
  }
}
