// Copyright 2018-2026 the jsrt authors. MIT license.

//! The stream state machine. One `Stream` composes an optional readable
//! side and an optional writable side over a shared [`EventEmitter`];
//! Readable, Writable, Duplex, Transform and PassThrough are all
//! constructors over this shape.
//!
//! Everything here is a pure state machine: sinks accept chunks
//! synchronously and completion callbacks drain in order, so the crate
//! has no dependency on the event loop.

use std::cell::Cell;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::error::Error;
use std::rc::Rc;
use std::rc::Weak;

use bytes::Bytes;
use jsrt_events::EventEmitter;
use jsrt_events::EventValue;
use jsrt_events::ListenerId;
use serde_json::Value;

use crate::error::StreamError;
use crate::options::StreamOptions;

/// One unit of stream data: bytes, or an arbitrary value in object mode.
#[derive(Debug, Clone)]
pub enum Chunk {
  Bytes(Bytes),
  Value(Value),
}

impl Chunk {
  pub fn from_slice(data: &[u8]) -> Self {
    Chunk::Bytes(Bytes::copy_from_slice(data))
  }

  pub fn from_str(data: &str) -> Self {
    Chunk::Bytes(Bytes::copy_from_slice(data.as_bytes()))
  }

  /// Buffered-length contribution: bytes in byte mode, one per chunk in
  /// object mode.
  pub fn buffered_len(&self) -> usize {
    match self {
      Chunk::Bytes(bytes) => bytes.len(),
      Chunk::Value(_) => 1,
    }
  }

  pub fn as_bytes(&self) -> Option<&Bytes> {
    match self {
      Chunk::Bytes(bytes) => Some(bytes),
      Chunk::Value(_) => None,
    }
  }
}

/// Completion callback for a single `write`.
pub type WriteCompletion = Box<dyn FnOnce(Option<Rc<dyn Error>>)>;

/// The `_write`/`_final` seam: where accepted chunks actually go.
pub trait WriteSink {
  fn write(&mut self, stream: &Stream, chunk: &Chunk)
  -> Result<(), StreamError>;

  /// Runs once after `end()` when every pending chunk has been
  /// accepted, before `finish` is emitted.
  fn finish(&mut self, _stream: &Stream) -> Result<(), StreamError> {
    Ok(())
  }
}

/// A sink that drops everything; the default for bare writables.
pub struct NullSink;

impl WriteSink for NullSink {
  fn write(
    &mut self,
    _stream: &Stream,
    _chunk: &Chunk,
  ) -> Result<(), StreamError> {
    Ok(())
  }
}

struct PipeTarget {
  dest: Rc<Stream>,
  end: bool,
  drain_id: ListenerId,
  error_id: ListenerId,
}

#[derive(Default)]
struct ReadableState {
  buffer: VecDeque<Chunk>,
  buffered: usize,
  flowing: bool,
  /// Explicitly paused via `pause()`; adding a `data` listener must not
  /// restart the flow then.
  paused: bool,
  ended: bool,
  ended_emitted: bool,
  readable_emitted: bool,
  pipes: Vec<PipeTarget>,
}

#[derive(Default)]
struct WritableState {
  queue: VecDeque<(Chunk, Option<WriteCompletion>)>,
  buffered: usize,
  corked: usize,
  ended: bool,
  finished: bool,
  need_drain: bool,
  finish_callbacks: Vec<WriteCompletion>,
}

pub struct Stream {
  weak_self: Weak<Stream>,
  emitter: EventEmitter,
  options: StreamOptions,
  readable: Option<RefCell<ReadableState>>,
  writable: Option<RefCell<WritableState>>,
  sink: RefCell<Option<Box<dyn WriteSink>>>,
  destroyed: Cell<bool>,
  close_emitted: Cell<bool>,
  errored: RefCell<Option<Rc<dyn Error>>>,
}

// Construction.
impl Stream {
  fn new(
    options: StreamOptions,
    readable: bool,
    writable: bool,
    sink: Option<Box<dyn WriteSink>>,
  ) -> Rc<Self> {
    Rc::new_cyclic(|weak_self| Stream {
      weak_self: weak_self.clone(),
      emitter: EventEmitter::new(),
      options,
      readable: readable.then(|| RefCell::new(ReadableState::default())),
      writable: writable.then(|| RefCell::new(WritableState::default())),
      sink: RefCell::new(sink),
      destroyed: Cell::new(false),
      close_emitted: Cell::new(false),
      errored: RefCell::new(None),
    })
  }

  pub fn readable(options: StreamOptions) -> Rc<Self> {
    Self::new(options, true, false, None)
  }

  pub fn writable(
    options: StreamOptions,
    sink: Box<dyn WriteSink>,
  ) -> Rc<Self> {
    Self::new(options, false, true, Some(sink))
  }

  pub fn duplex(options: StreamOptions, sink: Box<dyn WriteSink>) -> Rc<Self> {
    Self::new(options, true, true, Some(sink))
  }

  pub(crate) fn duplex_without_sink(options: StreamOptions) -> Rc<Self> {
    Self::new(options, true, true, None)
  }

  pub(crate) fn install_sink(&self, sink: Box<dyn WriteSink>) {
    *self.sink.borrow_mut() = Some(sink);
  }
}

// Shared surface.
impl Stream {
  pub fn emitter(&self) -> &EventEmitter {
    &self.emitter
  }

  /// A strong handle to this stream (streams always live behind `Rc`).
  fn rc(&self) -> Rc<Stream> {
    self.weak_self.upgrade().expect("stream is alive during its own call")
  }

  pub fn options(&self) -> &StreamOptions {
    &self.options
  }

  pub fn is_readable(&self) -> bool {
    self.readable.is_some() && !self.destroyed.get()
  }

  pub fn is_writable(&self) -> bool {
    self.writable.is_some()
      && !self.destroyed.get()
      && !self.writable.as_ref().unwrap().borrow().ended
  }

  pub fn destroyed(&self) -> bool {
    self.destroyed.get()
  }

  pub fn errored(&self) -> Option<Rc<dyn Error>> {
    self.errored.borrow().clone()
  }

  /// Registers a listener. Adding the first `data` listener switches a
  /// readable that is not explicitly paused into flowing mode.
  pub fn on<F>(&self, name: &str, f: F) -> ListenerId
  where
    F: FnMut(&[EventValue]) -> jsrt_events::ListenerResult + 'static,
  {
    let id = self.emitter.on(name, f);
    if name == "data" {
      self.start_flowing_for_data();
    }
    id
  }

  pub fn once<F>(&self, name: &str, f: F) -> ListenerId
  where
    F: FnMut(&[EventValue]) -> jsrt_events::ListenerResult + 'static,
  {
    let id = self.emitter.once(name, f);
    if name == "data" {
      self.start_flowing_for_data();
    }
    id
  }

  fn start_flowing_for_data(&self) {
    let explicitly_paused = match &self.readable {
      Some(state) => state.borrow().paused,
      None => return,
    };
    if !explicitly_paused {
      self.resume();
    }
  }

  fn total_buffered(&self) -> usize {
    let readable = self
      .readable
      .as_ref()
      .map(|state| state.borrow().buffered)
      .unwrap_or(0);
    let writable = self
      .writable
      .as_ref()
      .map(|state| state.borrow().buffered)
      .unwrap_or(0);
    readable + writable
  }

  /// Destroys the stream, optionally with an error. Pending write
  /// callbacks fire with the error; `error` is emitted (when given),
  /// then `close`.
  pub fn destroy(&self, err: Option<Rc<dyn Error>>) {
    if self.destroyed.get() {
      return;
    }
    self.destroyed.set(true);

    if let Some(err) = &err {
      *self.errored.borrow_mut() = Some(err.clone());
    }

    // Flush pending write callbacks with the failure.
    if let Some(writable) = &self.writable {
      let pending: Vec<Option<WriteCompletion>> = {
        let mut ws = writable.borrow_mut();
        ws.buffered = 0;
        ws.queue.drain(..).map(|(_, cb)| cb).collect()
      };
      let failure: Rc<dyn Error> = match &err {
        Some(err) => err.clone(),
        None => Rc::new(StreamError::Destroyed),
      };
      for cb in pending.into_iter().flatten() {
        cb(Some(failure.clone()));
      }
    }

    self.unpipe_all();

    if let Some(err) = err {
      self.emitter.emit("error", &[EventValue::Error(err)]);
    }
    if self.options.emit_close && !self.close_emitted.get() {
      self.close_emitted.set(true);
      self.emitter.emit("close", &[]);
    }
  }

  fn maybe_emit_close(&self) {
    if !self.options.emit_close || self.close_emitted.get() {
      return;
    }
    let readable_done = match &self.readable {
      Some(state) => state.borrow().ended_emitted,
      None => true,
    };
    let writable_done = match &self.writable {
      Some(state) => state.borrow().finished,
      None => true,
    };
    if readable_done && writable_done {
      self.close_emitted.set(true);
      self.emitter.emit("close", &[]);
      if self.options.auto_destroy {
        self.destroy(None);
      }
    }
  }

  fn maybe_emit_drain(&self) {
    let Some(writable) = &self.writable else {
      return;
    };
    let total = self.total_buffered();
    let should_drain = {
      let mut ws = writable.borrow_mut();
      if ws.need_drain && total == 0 {
        ws.need_drain = false;
        true
      } else {
        false
      }
    };
    if should_drain {
      self.emitter.emit("drain", &[]);
    }
  }
}

// Readable side.
impl Stream {
  fn readable_state(&self) -> Option<&RefCell<ReadableState>> {
    self.readable.as_ref()
  }

  pub fn is_flowing(&self) -> bool {
    self
      .readable_state()
      .map(|state| state.borrow().flowing)
      .unwrap_or(false)
  }

  pub fn is_paused(&self) -> bool {
    self
      .readable_state()
      .map(|state| state.borrow().paused)
      .unwrap_or(false)
  }

  pub fn readable_ended(&self) -> bool {
    self
      .readable_state()
      .map(|state| state.borrow().ended_emitted)
      .unwrap_or(false)
  }

  pub fn readable_length(&self) -> usize {
    self
      .readable_state()
      .map(|state| state.borrow().buffered)
      .unwrap_or(0)
  }

  /// Feeds the readable side. `None` signals EOF. Returns `false` when
  /// the producer should stop until the buffer drains.
  pub fn push(&self, chunk: Option<Chunk>) -> bool {
    let Some(state) = self.readable_state() else {
      return false;
    };
    if self.destroyed.get() {
      return false;
    }

    let Some(chunk) = chunk else {
      let drained = {
        let mut rs = state.borrow_mut();
        if rs.ended {
          return false;
        }
        rs.ended = true;
        rs.buffer.is_empty()
      };
      if drained {
        self.finish_readable();
      }
      return false;
    };

    {
      let rs = state.borrow();
      if rs.ended {
        log::debug!("push after EOF ignored");
        return false;
      }
    }

    let deliver_now = {
      let mut rs = state.borrow_mut();
      if rs.flowing
        && rs.pipes.is_empty()
        && self.emitter.listener_count("data") == 0
      {
        // The last consumer is gone (e.g. a used-up `once` listener):
        // fall back to buffering instead of dropping chunks.
        rs.flowing = false;
      }
      rs.flowing && rs.buffer.is_empty()
    };

    if deliver_now {
      // Flowing chunks never sit in the buffer past the current turn.
      self.deliver(chunk);
    } else {
      let mut rs = state.borrow_mut();
      rs.buffered += chunk.buffered_len();
      rs.buffer.push_back(chunk);
      let announce = !rs.readable_emitted;
      rs.readable_emitted = true;
      drop(rs);
      if announce {
        self.emitter.emit("readable", &[]);
      }
    }

    self.total_buffered() < self.options.high_water_mark
  }

  /// Assembles up to `size` buffered bytes, splitting a chunk when it
  /// straddles the limit. Byte mode only.
  pub fn read_bytes(&self, size: usize) -> Option<Bytes> {
    if self.options.object_mode || size == 0 {
      return None;
    }
    let state = self.readable_state()?;
    let mut assembled = bytes::BytesMut::with_capacity(size);
    {
      let mut rs = state.borrow_mut();
      rs.readable_emitted = false;
      while assembled.len() < size {
        if !matches!(rs.buffer.front(), Some(Chunk::Bytes(_))) {
          break;
        }
        let Some(Chunk::Bytes(mut bytes)) = rs.buffer.pop_front() else {
          break;
        };
        let wanted = size - assembled.len();
        if bytes.len() > wanted {
          assembled.extend_from_slice(&bytes.split_to(wanted));
          rs.buffered -= wanted;
          rs.buffer.push_front(Chunk::Bytes(bytes));
        } else {
          rs.buffered -= bytes.len();
          assembled.extend_from_slice(&bytes);
        }
      }
    }
    if assembled.is_empty() {
      return None;
    }
    let drained_to_end = {
      let rs = state.borrow();
      rs.ended && rs.buffer.is_empty()
    };
    if drained_to_end {
      self.finish_readable();
    }
    self.maybe_emit_drain();
    Some(assembled.freeze())
  }

  /// Takes the next buffered chunk, if any. Resets the `readable`
  /// accumulation cycle.
  pub fn read(&self) -> Option<Chunk> {
    let state = self.readable_state()?;
    let (chunk, now_empty) = {
      let mut rs = state.borrow_mut();
      rs.readable_emitted = false;
      let chunk = rs.buffer.pop_front();
      if let Some(chunk) = &chunk {
        rs.buffered -= chunk.buffered_len();
      }
      let now_empty = rs.buffer.is_empty();
      (chunk, now_empty)
    };
    if now_empty {
      let ended = state.borrow().ended;
      if ended {
        self.finish_readable();
      }
    }
    self.maybe_emit_drain();
    chunk
  }

  pub fn pause(&self) -> Rc<Self> {
    if let Some(state) = self.readable_state() {
      let mut rs = state.borrow_mut();
      rs.flowing = false;
      rs.paused = true;
    }
    self.rc()
  }

  /// Switches to flowing mode and synchronously drains the buffer as
  /// `data` events (and into piped destinations).
  pub fn resume(&self) -> Rc<Self> {
    let Some(state) = self.readable_state() else {
      return self.rc();
    };
    {
      let mut rs = state.borrow_mut();
      rs.paused = false;
      if rs.flowing {
        return self.rc();
      }
      rs.flowing = true;
    }

    loop {
      let chunk = {
        let mut rs = state.borrow_mut();
        if !rs.flowing {
          break;
        }
        if rs.pipes.is_empty() && self.emitter.listener_count("data") == 0 {
          rs.flowing = false;
          break;
        }
        match rs.buffer.pop_front() {
          Some(chunk) => {
            rs.buffered -= chunk.buffered_len();
            chunk
          }
          None => break,
        }
      };
      self.deliver(chunk);
      self.maybe_emit_drain();
    }

    let drained_to_end = {
      let rs = state.borrow();
      rs.ended && rs.buffer.is_empty()
    };
    if drained_to_end {
      self.finish_readable();
    }
    self.maybe_emit_drain();
    self.rc()
  }

  /// Emits a chunk as `data` and forwards it to every piped
  /// destination, pausing on backpressure.
  fn deliver(&self, chunk: Chunk) {
    let payload = self.encode_chunk(&chunk);
    self.emitter.emit("data", &[payload]);

    let targets: Vec<Rc<Stream>> = {
      let Some(state) = self.readable_state() else {
        return;
      };
      state.borrow().pipes.iter().map(|pipe| pipe.dest.clone()).collect()
    };
    for dest in targets {
      match dest.write(chunk.clone(), None) {
        Ok(true) => {}
        Ok(false) => {
          // Destination is saturated; its next drain resumes us.
          if let Some(state) = self.readable_state() {
            state.borrow_mut().flowing = false;
          }
        }
        Err(err) => {
          log::debug!("piped write failed: {err}");
          self.unpipe(&dest);
        }
      }
    }
  }

  fn encode_chunk(&self, chunk: &Chunk) -> EventValue {
    match (chunk, &self.options.encoding) {
      (Chunk::Bytes(bytes), Some(_)) => {
        EventValue::Str(String::from_utf8_lossy(bytes).into_owned())
      }
      (Chunk::Bytes(bytes), None) => EventValue::Bytes(bytes.clone()),
      (Chunk::Value(value), _) => EventValue::Json(value.clone()),
    }
  }

  /// Emits `end` exactly once, once EOF was pushed and the buffer is
  /// fully drained, then propagates end-of-stream.
  fn finish_readable(&self) {
    let Some(state) = self.readable_state() else {
      return;
    };
    {
      let mut rs = state.borrow_mut();
      if rs.ended_emitted || !rs.ended || !rs.buffer.is_empty() {
        return;
      }
      rs.ended_emitted = true;
    }
    self.emitter.emit("end", &[]);

    let ending_pipes: Vec<Rc<Stream>> = {
      let rs = state.borrow();
      rs.pipes
        .iter()
        .filter(|pipe| pipe.end)
        .map(|pipe| pipe.dest.clone())
        .collect()
    };
    for dest in ending_pipes {
      if let Err(err) = dest.end(None, None) {
        log::debug!("piped end failed: {err}");
      }
    }

    // Half-open propagation: a duplex that does not allow half-open
    // finishes its writable side along with the readable one.
    if !self.options.allow_half_open && self.writable.is_some() {
      let already_ended = self.writable.as_ref().unwrap().borrow().ended;
      if !already_ended {
        if let Err(err) = self.end(None, None) {
          log::debug!("half-open close failed: {err}");
        }
      }
    }

    self.maybe_emit_close();
  }
}

// Writable side.
impl Stream {
  fn writable_state(&self) -> Option<&RefCell<WritableState>> {
    self.writable.as_ref()
  }

  pub fn writable_ended(&self) -> bool {
    self
      .writable_state()
      .map(|state| state.borrow().ended)
      .unwrap_or(false)
  }

  pub fn writable_finished(&self) -> bool {
    self
      .writable_state()
      .map(|state| state.borrow().finished)
      .unwrap_or(false)
  }

  pub fn writable_corked(&self) -> usize {
    self
      .writable_state()
      .map(|state| state.borrow().corked)
      .unwrap_or(0)
  }

  pub fn writable_length(&self) -> usize {
    self
      .writable_state()
      .map(|state| state.borrow().buffered)
      .unwrap_or(0)
  }

  /// Accepts a chunk. Returns `Ok(true)` while the buffered length
  /// stays under the high-water mark, `Ok(false)` once the producer
  /// should wait for `drain`.
  pub fn write(
    &self,
    chunk: Chunk,
    cb: Option<WriteCompletion>,
  ) -> Result<bool, StreamError> {
    let Some(state) = self.writable_state() else {
      return Err(StreamError::NotWritable);
    };
    if self.destroyed.get() {
      return Err(StreamError::Destroyed);
    }
    if state.borrow().ended {
      return Err(StreamError::WriteAfterEnd);
    }

    let corked = state.borrow().corked > 0;
    if corked {
      let mut ws = state.borrow_mut();
      ws.buffered += chunk.buffered_len();
      ws.queue.push_back((chunk, cb));
    } else {
      self.accept_chunk(chunk, cb)?;
    }

    let ok = self.total_buffered() < self.options.high_water_mark;
    if !ok {
      if let Some(state) = self.writable_state() {
        state.borrow_mut().need_drain = true;
      }
    }
    Ok(ok)
  }

  /// Hands one chunk to the sink and completes its callback in order.
  fn accept_chunk(
    &self,
    chunk: Chunk,
    cb: Option<WriteCompletion>,
  ) -> Result<(), StreamError> {
    let result = {
      let mut sink = self.sink.borrow_mut();
      match sink.as_mut() {
        Some(sink) => sink.write(self, &chunk),
        None => Ok(()),
      }
    };
    match result {
      Ok(()) => {
        if let Some(cb) = cb {
          cb(None);
        }
        Ok(())
      }
      Err(err) => {
        let shared: Rc<dyn Error> = Rc::new(err.clone());
        if let Some(cb) = cb {
          cb(Some(shared.clone()));
        }
        *self.errored.borrow_mut() = Some(shared.clone());
        self.emitter.emit("error", &[EventValue::Error(shared)]);
        Err(err)
      }
    }
  }

  pub fn cork(&self) {
    if let Some(state) = self.writable_state() {
      state.borrow_mut().corked += 1;
    }
  }

  /// Releases one cork level; at zero the batched chunks flush in
  /// order.
  pub fn uncork(&self) {
    let Some(state) = self.writable_state() else {
      return;
    };
    let release = {
      let mut ws = state.borrow_mut();
      if ws.corked == 0 {
        return;
      }
      ws.corked -= 1;
      ws.corked == 0
    };
    if release {
      self.flush_writable_queue();
    }
  }

  fn flush_writable_queue(&self) {
    let Some(state) = self.writable_state() else {
      return;
    };
    loop {
      let next = {
        let mut ws = state.borrow_mut();
        match ws.queue.pop_front() {
          Some((chunk, cb)) => {
            ws.buffered -= chunk.buffered_len();
            Some((chunk, cb))
          }
          None => None,
        }
      };
      let Some((chunk, cb)) = next else {
        break;
      };
      if self.accept_chunk(chunk, cb).is_err() {
        break;
      }
    }
    self.maybe_emit_drain();

    let ready_to_finish = {
      let ws = state.borrow();
      ws.ended && !ws.finished && ws.queue.is_empty() && ws.corked == 0
    };
    if ready_to_finish {
      self.finish_writable();
    }
  }

  /// Ends the writable side. `finish` fires once all pending chunks are
  /// accepted downstream; `close` follows when `emit_close` is set.
  pub fn end(
    &self,
    chunk: Option<Chunk>,
    cb: Option<WriteCompletion>,
  ) -> Result<(), StreamError> {
    let Some(state) = self.writable_state() else {
      return Err(StreamError::NotWritable);
    };
    if self.destroyed.get() {
      return Err(StreamError::Destroyed);
    }
    if state.borrow().ended {
      if chunk.is_some() {
        return Err(StreamError::WriteAfterEnd);
      }
      if let Some(cb) = cb {
        cb(None);
      }
      return Ok(());
    }

    if let Some(chunk) = chunk {
      self.write(chunk, None)?;
    }

    {
      let mut ws = state.borrow_mut();
      ws.ended = true;
      if let Some(cb) = cb {
        ws.finish_callbacks.push(cb);
      }
    }

    let ready = {
      let ws = state.borrow();
      ws.queue.is_empty() && ws.corked == 0
    };
    if ready {
      self.finish_writable();
    }
    Ok(())
  }

  fn finish_writable(&self) {
    let Some(state) = self.writable_state() else {
      return;
    };
    if state.borrow().finished {
      return;
    }

    // The final hook (e.g. a transform flush) runs before `finish`.
    let final_result = {
      let mut sink = self.sink.borrow_mut();
      match sink.as_mut() {
        Some(sink) => sink.finish(self),
        None => Ok(()),
      }
    };
    if let Err(err) = final_result {
      let shared: Rc<dyn Error> = Rc::new(err);
      *self.errored.borrow_mut() = Some(shared.clone());
      self.emitter.emit("error", &[EventValue::Error(shared)]);
      return;
    }

    let callbacks = {
      let mut ws = state.borrow_mut();
      ws.finished = true;
      std::mem::take(&mut ws.finish_callbacks)
    };
    self.emitter.emit("finish", &[]);
    for cb in callbacks {
      cb(None);
    }
    self.maybe_emit_close();
  }
}

// Piping.
impl Stream {
  /// Connects this readable to `dest`, switching to flowing mode.
  /// Backpressure from `dest` pauses us until its `drain`; our `end`
  /// forwards to `dest.end()` unless `end_on_finish` is false.
  pub fn pipe(
    &self,
    dest: &Rc<Stream>,
    end_on_finish: bool,
  ) -> Rc<Stream> {
    let Some(state) = self.readable_state() else {
      return dest.clone();
    };

    let source = self.weak_self.clone();
    let drain_id = dest.emitter().on("drain", move |_| {
      if let Some(source) = Weak::upgrade(&source) {
        source.resume();
      }
      Ok(())
    });

    let source = self.weak_self.clone();
    let dest_for_error = Rc::downgrade(dest);
    let error_id = dest.emitter().on("error", move |_| {
      if let (Some(source), Some(dest)) =
        (Weak::upgrade(&source), Weak::upgrade(&dest_for_error))
      {
        source.unpipe(&dest);
      }
      Ok(())
    });

    state.borrow_mut().pipes.push(PipeTarget {
      dest: dest.clone(),
      end: end_on_finish,
      drain_id,
      error_id,
    });

    let upstream: Rc<dyn std::any::Any> = self.rc();
    dest.emitter().emit("pipe", &[EventValue::Object(upstream)]);

    self.resume();
    dest.clone()
  }

  /// Detaches `dest`; emits `unpipe` on it.
  pub fn unpipe(&self, dest: &Rc<Stream>) {
    let Some(state) = self.readable_state() else {
      return;
    };
    let removed = {
      let mut rs = state.borrow_mut();
      match rs.pipes.iter().position(|pipe| Rc::ptr_eq(&pipe.dest, dest)) {
        Some(pos) => Some(rs.pipes.remove(pos)),
        None => None,
      }
    };
    if let Some(pipe) = removed {
      pipe.dest.emitter().off("drain", pipe.drain_id);
      pipe.dest.emitter().off("error", pipe.error_id);
      let upstream: Rc<dyn std::any::Any> = self.rc();
      pipe.dest.emitter().emit("unpipe", &[EventValue::Object(upstream)]);
    }
  }

  fn unpipe_all(&self) {
    let Some(state) = self.readable_state() else {
      return;
    };
    let pipes: Vec<Rc<Stream>> = {
      let rs = state.borrow();
      rs.pipes.iter().map(|pipe| pipe.dest.clone()).collect()
    };
    for dest in pipes {
      self.unpipe(&dest);
    }
  }

  pub fn pipe_count(&self) -> usize {
    self
      .readable_state()
      .map(|state| state.borrow().pipes.len())
      .unwrap_or(0)
  }
}
