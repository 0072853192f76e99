// Copyright 2018-2026 the jsrt authors. MIT license.

//! The `setTimeout`/`setInterval` surface over the loop's timers, with
//! JS-style numeric ids and `ref`/`unref`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use jsrt_core::event_loop::Index;
use jsrt_core::event_loop::LoopHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

struct TimerTable {
  next_id: u64,
  active: HashMap<TimerId, Index>,
}

/// One per runtime; maps user-visible timer ids onto loop handles and
/// drops one-shot entries when they fire.
#[derive(Clone)]
pub struct Timers {
  handle: LoopHandle,
  table: Rc<RefCell<TimerTable>>,
}

impl Timers {
  pub fn new(handle: &LoopHandle) -> Self {
    Timers {
      handle: handle.clone(),
      table: Rc::new(RefCell::new(TimerTable {
        next_id: 0,
        active: HashMap::new(),
      })),
    }
  }

  pub fn set_timeout<F>(&self, delay_ms: u64, cb: F) -> TimerId
  where
    F: FnOnce() + 'static,
  {
    let id = self.next_id();
    let table = self.table.clone();
    let mut cb = Some(cb);
    let index = self.handle.timer_start(delay_ms, 0, move |_| {
      table.borrow_mut().active.remove(&id);
      if let Some(cb) = cb.take() {
        cb();
      }
    });
    self.table.borrow_mut().active.insert(id, index);
    id
  }

  pub fn set_interval<F>(&self, period_ms: u64, cb: F) -> TimerId
  where
    F: FnMut() + 'static,
  {
    let id = self.next_id();
    let mut cb = cb;
    // A zero period would spin the loop; clamp like the timer wheel
    // does for intervals.
    let period = period_ms.max(1);
    let index = self.handle.timer_start(period, period, move |_| {
      cb();
    });
    self.table.borrow_mut().active.insert(id, index);
    id
  }

  /// `clearTimeout`/`clearInterval`; unknown and already-fired ids are
  /// ignored.
  pub fn clear(&self, id: TimerId) {
    if let Some(index) = self.table.borrow_mut().active.remove(&id) {
      self.handle.timer_stop(index);
    }
  }

  pub fn ref_timer(&self, id: TimerId, refed: bool) {
    if let Some(&index) = self.table.borrow().active.get(&id) {
      self.handle.ref_handle(index, refed);
    }
  }

  pub fn active_count(&self) -> usize {
    self.table.borrow().active.len()
  }

  fn next_id(&self) -> TimerId {
    let mut table = self.table.borrow_mut();
    table.next_id += 1;
    TimerId(table.next_id)
  }
}
