// Copyright 2018-2026 the jsrt authors. MIT license.

//! `finished` and `pipeline` helpers over the stream core.

use std::cell::Cell;
use std::cell::RefCell;
use std::error::Error;
use std::rc::Rc;

use crate::stream::Stream;

type DoneCallback = Rc<RefCell<dyn FnMut(Option<Rc<dyn Error>>)>>;

fn settle_once(
  stream: &Rc<Stream>,
  events: &[&str],
  done: &Rc<Cell<bool>>,
  cb: &DoneCallback,
) {
  for &event in events {
    let done = done.clone();
    let cb = cb.clone();
    stream.emitter().once(event, move |_| {
      if !done.replace(true) {
        (*cb.borrow_mut())(None);
      }
      Ok(())
    });
  }
  let done = done.clone();
  let cb = cb.clone();
  stream.emitter().once("error", move |args| {
    if !done.replace(true) {
      let err = args.first().and_then(|arg| arg.as_error()).cloned();
      (*cb.borrow_mut())(err);
    }
    Ok(())
  });
}

/// Invokes `cb` exactly once when `stream` reaches end-of-life: its
/// readable side ended, its writable side finished, it closed, or it
/// errored (in which case the error is passed along).
pub fn finished<F>(stream: &Rc<Stream>, cb: F)
where
  F: FnMut(Option<Rc<dyn Error>>) + 'static,
{
  let done = Rc::new(Cell::new(false));
  let cb: DoneCallback = Rc::new(RefCell::new(cb));
  settle_once(stream, &["end", "finish", "close"], &done, &cb);
}

/// Pipes `streams` head-to-tail and reports completion (or the first
/// error from any stage) through `cb`. Returns the tail stream.
pub fn pipeline<F>(streams: &[Rc<Stream>], cb: F) -> Option<Rc<Stream>>
where
  F: FnMut(Option<Rc<dyn Error>>) + 'static,
{
  let (first, rest) = streams.split_first()?;
  let done = Rc::new(Cell::new(false));
  let cb: DoneCallback = Rc::new(RefCell::new(cb));

  // Any stage erroring settles the pipeline.
  for stream in streams {
    let done = done.clone();
    let cb = cb.clone();
    stream.emitter().once("error", move |args| {
      if !done.replace(true) {
        let err = args.first().and_then(|arg| arg.as_error()).cloned();
        (*cb.borrow_mut())(err);
      }
      Ok(())
    });
  }

  let mut tail = first.clone();
  for next in rest {
    tail = tail.pipe(next, true);
  }

  let settle_event = if tail.is_writable() { "finish" } else { "end" };
  tail.emitter().once(settle_event, move |_| {
    if !done.replace(true) {
      (*cb.borrow_mut())(None);
    }
    Ok(())
  });
  Some(tail)
}
