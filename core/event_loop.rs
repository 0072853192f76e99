// Copyright 2018-2026 the jsrt authors. MIT license.

//! The event loop: a single-threaded cooperative scheduler owning every
//! OS-facing handle. All callbacks run on the loop thread. A tick walks
//! the phases: drain requests, run due timers, poll I/O and worker
//! completions, run idle callbacks, run close callbacks.
//!
//! Handles progress `Active -> Closing -> Closed`; the resource table
//! entry (and any user state hanging off it) is released only in the
//! close phase, after which the close callback fires. Nothing is freed
//! while a callback for it may still be scheduled.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::io;
use std::io::Read;
use std::io::Write;
use std::net::Shutdown;
use std::net::SocketAddr;
use std::os::fd::FromRawFd;
use std::os::fd::RawFd;
use std::rc::Rc;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use mio::net::TcpListener;
use mio::net::TcpStream;
use mio::net::UnixStream;
use mio::Events;
use mio::Interest;
use mio::Poll;
use mio::Registry;
use mio::Token;
use mio::Waker;
use parking_lot::Mutex;
use signal_hook_mio::v1_0::Signals;

use crate::error::SystemError;

/// Identifies a handle in the loop's resource table.
pub type Index = u32;

/// What a worker-pool task hands back to its completion callback.
pub type TaskResult = Result<Box<dyn std::any::Any + Send>, SystemError>;

type TimerCallback = Box<dyn FnMut(&LoopHandle)>;
type TaskFn = Box<dyn FnOnce() -> TaskResult + Send>;
type AfterTaskFn = Box<dyn FnOnce(&LoopHandle, TaskResult)>;
type ConnectCallback =
  Box<dyn FnOnce(&LoopHandle, Index, Result<TcpSocketInfo, SystemError>)>;
type ConnectionCallback =
  Box<dyn FnMut(&LoopHandle, Index, Result<TcpSocketInfo, SystemError>)>;
type WriteCallback =
  Box<dyn FnOnce(&LoopHandle, Index, Result<usize, SystemError>)>;
/// An `Ok` with an empty buffer signals end-of-stream.
type ReadCallback =
  Box<dyn FnMut(&LoopHandle, Index, Result<Vec<u8>, SystemError>)>;
type SignalCallback = Box<dyn FnMut(&LoopHandle, i32)>;
type CloseCallback = Box<dyn FnOnce(&LoopHandle)>;
type IdleCallback = Box<dyn FnOnce(&LoopHandle)>;

/// Addresses of a connected TCP socket.
#[derive(Debug, Clone, Copy)]
pub struct TcpSocketInfo {
  pub index: Index,
  pub local: SocketAddr,
  pub remote: SocketAddr,
}

struct TimerWrap {
  cb: TimerCallback,
  period: Duration,
}

struct TaskWrap {
  after: Option<AfterTaskFn>,
}

struct WriteRequest {
  data: Vec<u8>,
  written: usize,
  cb: Option<WriteCallback>,
}

struct TcpStreamWrap {
  socket: TcpStream,
  on_connect: Option<ConnectCallback>,
  on_read: Option<ReadCallback>,
  reading: bool,
  registered: bool,
  shutdown: bool,
  shutdown_after_drain: bool,
  write_queue: VecDeque<WriteRequest>,
}

struct TcpListenerWrap {
  socket: TcpListener,
  on_connection: ConnectionCallback,
}

struct PipeWrap {
  stream: UnixStream,
  on_read: Option<ReadCallback>,
  registered: bool,
  shutdown: bool,
  shutdown_after_drain: bool,
  write_queue: VecDeque<WriteRequest>,
}

struct SignalWrap {
  signals: Signals,
  signum: i32,
  cb: SignalCallback,
}

struct IdleWrap {
  cb: Option<IdleCallback>,
}

enum Resource {
  Timer(TimerWrap),
  TcpStream(TcpStreamWrap),
  TcpListener(TcpListenerWrap),
  Task(TaskWrap),
  Signal(SignalWrap),
  Pipe(PipeWrap),
  Idle(IdleWrap),
}

struct Slot {
  resource: Resource,
  refed: bool,
  closing: bool,
}

enum Request {
  TimerStart(Index, Duration, TimerWrap),
  TimerStop(Index),
  Spawn(Index, TaskFn, TaskWrap),
  TcpConnect(Index, TcpStreamWrap),
  TcpListen(Index, TcpListenerWrap),
  TcpWrite(Index, Vec<u8>, WriteCallback),
  TcpReadStart(Index, ReadCallback),
  TcpReadStop(Index),
  TcpShutdown(Index),
  TcpSetNoDelay(Index, bool),
  TcpSetKeepAlive(Index, bool, Duration),
  PipeOpen(Index, PipeWrap),
  PipeWrite(Index, Vec<u8>),
  PipeShutdown(Index),
  SignalStart(Index, SignalWrap),
  SignalStop(Index),
  Idle(Index, IdleWrap),
  Close(Index, CloseCallback),
  Ref(Index, bool),
}

enum Completion {
  TaskDone(Index, TaskResult),
}

const WAKER_TOKEN: Token = Token(0);
const READ_CHUNK: usize = 8192;

pub struct EventLoop {
  index: Rc<Cell<Index>>,
  resources: HashMap<Index, Slot>,
  timer_queue: BTreeMap<(Instant, Index), ()>,
  request_rx: mpsc::Receiver<Request>,
  request_tx: Rc<mpsc::Sender<Request>>,
  requests_empty: Rc<Cell<bool>>,
  idle_queue: Vec<Index>,
  close_queue: Vec<(Index, Option<CloseCallback>)>,
  thread_pool: rayon::ThreadPool,
  tasks_in_flight: usize,
  completion_tx: Arc<Mutex<mpsc::Sender<Completion>>>,
  completion_rx: mpsc::Receiver<Completion>,
  poll: Poll,
  registry: Registry,
  waker: Arc<Waker>,
}

impl EventLoop {
  pub fn new(pool_threads: usize) -> io::Result<Self> {
    assert!(pool_threads > 0);

    let (request_tx, request_rx) = mpsc::channel();
    let (completion_tx, completion_rx) = mpsc::channel();

    let thread_pool = rayon::ThreadPoolBuilder::new()
      .num_threads(pool_threads)
      .thread_name(|i| format!("jsrt-worker-{i}"))
      .build()
      .map_err(|err| io::Error::other(err.to_string()))?;

    let poll = Poll::new()?;
    let waker = Waker::new(poll.registry(), WAKER_TOKEN)?;
    let registry = poll.registry().try_clone()?;

    Ok(EventLoop {
      index: Rc::new(Cell::new(1)),
      resources: HashMap::new(),
      timer_queue: BTreeMap::new(),
      request_rx,
      request_tx: Rc::new(request_tx),
      requests_empty: Rc::new(Cell::new(true)),
      idle_queue: Vec::new(),
      close_queue: Vec::new(),
      thread_pool,
      tasks_in_flight: 0,
      completion_tx: Arc::new(Mutex::new(completion_tx)),
      completion_rx,
      poll,
      registry,
      waker: Arc::new(waker),
    })
  }

  pub fn handle(&self) -> LoopHandle {
    LoopHandle {
      index: self.index.clone(),
      requests: self.request_tx.clone(),
      requests_empty: self.requests_empty.clone(),
    }
  }

  /// True while anything keeps the loop alive: a ref'd handle, a queued
  /// request, an in-flight worker task, or a pending idle/close callback.
  pub fn has_pending_events(&self) -> bool {
    self.resources.values().any(|slot| slot.refed && !slot.closing)
      || !self.requests_empty.get()
      || self.tasks_in_flight > 0
      || !self.idle_queue.is_empty()
      || !self.close_queue.is_empty()
  }

  /// Runs ticks until no active handles or requests remain.
  pub fn run(&mut self) {
    while self.has_pending_events() {
      self.tick();
    }
  }

  /// A single pass over all loop phases.
  pub fn tick(&mut self) {
    self.prepare();
    self.run_timers();
    self.run_poll();
    self.run_idle();
    self.run_close();
  }
}

// Loop phases.
impl EventLoop {
  fn prepare(&mut self) {
    while let Ok(request) = self.request_rx.try_recv() {
      match request {
        Request::TimerStart(index, delay, timer) => {
          let due = Instant::now() + delay;
          self.resources.insert(index, Slot::refed(Resource::Timer(timer)));
          self.timer_queue.insert((due, index), ());
        }
        Request::TimerStop(index) => {
          self.resources.remove(&index);
          self.timer_queue.retain(|&(_, i), _| i != index);
        }
        Request::Spawn(index, task, wrap) => self.spawn_task(index, task, wrap),
        Request::TcpConnect(index, mut wrap) => {
          if let Err(err) = self.registry.register(
            &mut wrap.socket,
            Token(index as usize),
            Interest::WRITABLE,
          ) {
            log::error!("tcp connect registration failed: {err}");
          }
          wrap.registered = true;
          self.resources.insert(index, Slot::refed(Resource::TcpStream(wrap)));
        }
        Request::TcpListen(index, mut wrap) => {
          if let Err(err) = self.registry.register(
            &mut wrap.socket,
            Token(index as usize),
            Interest::READABLE,
          ) {
            log::error!("tcp listen registration failed: {err}");
          }
          self
            .resources
            .insert(index, Slot::refed(Resource::TcpListener(wrap)));
        }
        Request::TcpWrite(index, data, cb) => self.tcp_write_req(index, data, cb),
        Request::TcpReadStart(index, cb) => {
          if let Some(Resource::TcpStream(wrap)) = live_resource(&mut self.resources, index) {
            wrap.on_read = Some(cb);
            wrap.reading = true;
            sync_tcp_interest(&self.registry, index, wrap);
          }
        }
        Request::TcpReadStop(index) => {
          if let Some(Resource::TcpStream(wrap)) = live_resource(&mut self.resources, index) {
            wrap.reading = false;
            sync_tcp_interest(&self.registry, index, wrap);
          }
        }
        Request::TcpShutdown(index) => {
          if let Some(Resource::TcpStream(wrap)) = live_resource(&mut self.resources, index) {
            if wrap.write_queue.is_empty() {
              wrap.shutdown = true;
              let _ = wrap.socket.shutdown(Shutdown::Write);
            } else {
              wrap.shutdown_after_drain = true;
            }
          }
        }
        Request::TcpSetNoDelay(index, enable) => {
          if let Some(Resource::TcpStream(wrap)) = live_resource(&mut self.resources, index) {
            if let Err(err) = wrap.socket.set_nodelay(enable) {
              log::debug!("set_nodelay failed: {err}");
            }
          }
        }
        Request::TcpSetKeepAlive(index, enable, delay) => {
          if let Some(Resource::TcpStream(wrap)) = live_resource(&mut self.resources, index) {
            let socket = socket2::SockRef::from(&wrap.socket);
            let result = if enable {
              socket
                .set_tcp_keepalive(&socket2::TcpKeepalive::new().with_time(delay))
            } else {
              socket.set_keepalive(false)
            };
            if let Err(err) = result {
              log::debug!("set_keepalive failed: {err}");
            }
          }
        }
        Request::PipeOpen(index, mut wrap) => {
          if let Err(err) = self.registry.register(
            &mut wrap.stream,
            Token(index as usize),
            Interest::READABLE,
          ) {
            log::error!("pipe registration failed: {err}");
          }
          wrap.registered = true;
          // IPC pipes do not keep the loop alive on their own.
          self.resources.insert(index, Slot::unrefed(Resource::Pipe(wrap)));
        }
        Request::PipeWrite(index, data) => {
          if let Some(Resource::Pipe(wrap)) = live_resource(&mut self.resources, index) {
            if wrap.shutdown || wrap.shutdown_after_drain {
              log::debug!("pipe write after shutdown dropped");
            } else {
              wrap.write_queue.push_back(WriteRequest {
                data,
                written: 0,
                cb: None,
              });
              sync_pipe_interest(&self.registry, index, wrap);
            }
          }
        }
        Request::PipeShutdown(index) => {
          if let Some(Resource::Pipe(wrap)) = live_resource(&mut self.resources, index) {
            if wrap.write_queue.is_empty() {
              wrap.shutdown = true;
              let _ = wrap.stream.shutdown(Shutdown::Write);
            } else {
              wrap.shutdown_after_drain = true;
            }
          }
        }
        Request::SignalStart(index, mut wrap) => {
          if let Err(err) = self.registry.register(
            &mut wrap.signals,
            Token(index as usize),
            Interest::READABLE,
          ) {
            log::error!("signal registration failed: {err}");
          }
          // Signal handles never keep the loop alive.
          self.resources.insert(index, Slot::unrefed(Resource::Signal(wrap)));
        }
        Request::SignalStop(index) => {
          if let Some(Slot { resource: Resource::Signal(wrap), .. }) =
            self.resources.get_mut(&index)
          {
            let _ = self.registry.deregister(&mut wrap.signals);
          }
          self.resources.remove(&index);
        }
        Request::Idle(index, wrap) => {
          self.resources.insert(index, Slot::refed(Resource::Idle(wrap)));
          self.idle_queue.push(index);
        }
        Request::Close(index, cb) => {
          if let Some(slot) = self.resources.get_mut(&index) {
            if !slot.closing {
              slot.closing = true;
              self.close_queue.push((index, Some(cb)));
            }
          } else {
            // Closing an unknown handle still fires the callback.
            self.close_queue.push((index, Some(cb)));
          }
        }
        Request::Ref(index, refed) => {
          if let Some(slot) = self.resources.get_mut(&index) {
            slot.refed = refed;
          }
        }
      }
    }
    self.requests_empty.set(true);
  }

  fn run_timers(&mut self) {
    let now = Instant::now();
    let due: Vec<(Instant, Index)> = self
      .timer_queue
      .range(..=(now, Index::MAX))
      .map(|(&key, _)| key)
      .collect();

    let handle = self.handle();
    for key in due {
      self.timer_queue.remove(&key);
      let (_, index) = key;
      let Some(slot) = self.resources.get_mut(&index) else {
        continue;
      };
      if slot.closing {
        continue;
      }
      let Resource::Timer(timer) = &mut slot.resource else {
        continue;
      };
      (timer.cb)(&handle);

      // The callback may have stopped this very timer.
      match self.resources.get(&index) {
        Some(slot) if !slot.closing => {
          let Resource::Timer(timer) = &slot.resource else {
            continue;
          };
          if timer.period > Duration::ZERO {
            self.timer_queue.insert((Instant::now() + timer.period, index), ());
          } else {
            self.resources.remove(&index);
          }
        }
        _ => {}
      }
    }
    self.prepare();
  }

  fn run_poll(&mut self) {
    let timeout = if self.has_pending_events() {
      if !self.idle_queue.is_empty() || !self.close_queue.is_empty() {
        Some(Duration::ZERO)
      } else {
        self
          .timer_queue
          .keys()
          .next()
          .map(|&(due, _)| due.saturating_duration_since(Instant::now()))
      }
    } else {
      Some(Duration::ZERO)
    };

    let mut events = Events::with_capacity(1024);
    if let Err(err) = self.poll.poll(&mut events, timeout) {
      if err.kind() != io::ErrorKind::Interrupted {
        log::error!("poll failed: {err}");
      }
    }

    for event in events.iter() {
      if event.token() == WAKER_TOKEN {
        continue;
      }
      let index = event.token().0 as Index;
      let readable = event.is_readable() || event.is_read_closed();
      let writable = event.is_writable();
      self.io_event(index, readable, writable);
      self.prepare();
    }

    while let Ok(completion) = self.completion_rx.try_recv() {
      match completion {
        Completion::TaskDone(index, result) => self.task_done(index, result),
      }
      self.prepare();
    }
  }

  fn run_idle(&mut self) {
    let handle = self.handle();
    for index in std::mem::take(&mut self.idle_queue) {
      let Some(slot) = self.resources.remove(&index) else {
        continue;
      };
      if let Resource::Idle(mut wrap) = slot.resource {
        if let Some(cb) = wrap.cb.take() {
          cb(&handle);
        }
      }
    }
    self.prepare();
  }

  fn run_close(&mut self) {
    let handle = self.handle();
    for (index, on_close) in std::mem::take(&mut self.close_queue) {
      if let Some(slot) = self.resources.remove(&index) {
        self.release_resource(index, slot.resource);
      }
      if let Some(cb) = on_close {
        cb(&handle);
      }
    }
    self.prepare();
  }

  fn release_resource(&mut self, index: Index, resource: Resource) {
    match resource {
      Resource::Timer(_) => {
        self.timer_queue.retain(|&(_, i), _| i != index);
      }
      Resource::TcpStream(mut wrap) => {
        if wrap.registered {
          let _ = self.registry.deregister(&mut wrap.socket);
        }
      }
      Resource::TcpListener(mut wrap) => {
        let _ = self.registry.deregister(&mut wrap.socket);
      }
      Resource::Pipe(mut wrap) => {
        if wrap.registered {
          let _ = self.registry.deregister(&mut wrap.stream);
        }
      }
      Resource::Signal(mut wrap) => {
        let _ = self.registry.deregister(&mut wrap.signals);
      }
      Resource::Task(_) | Resource::Idle(_) => {}
    }
  }
}

// I/O readiness dispatch.
impl EventLoop {
  fn io_event(&mut self, index: Index, readable: bool, writable: bool) {
    enum Kind {
      Stream,
      Listener,
      Pipe,
      Signal,
    }

    let handle = self.handle();
    let kind = match live_resource(&mut self.resources, index) {
      Some(Resource::TcpStream(_)) => Kind::Stream,
      Some(Resource::TcpListener(_)) => Kind::Listener,
      Some(Resource::Pipe(_)) => Kind::Pipe,
      Some(Resource::Signal(_)) => Kind::Signal,
      _ => return,
    };
    match kind {
      Kind::Stream => {
        if writable {
          self.tcp_stream_writable(&handle, index);
        }
        if readable {
          self.tcp_stream_readable(&handle, index);
        }
      }
      Kind::Listener => self.tcp_accept(&handle, index),
      Kind::Pipe => {
        if writable {
          self.pipe_writable(index);
        }
        if readable {
          self.pipe_readable(&handle, index);
        }
      }
      Kind::Signal => self.signal_event(&handle, index),
    }
  }

  fn signal_event(&mut self, handle: &LoopHandle, index: Index) {
    let Some(Resource::Signal(wrap)) = live_resource(&mut self.resources, index) else {
      return;
    };
    let pending: Vec<i32> = wrap.signals.pending().collect();
    for signum in pending {
      let Some(Resource::Signal(wrap)) = live_resource(&mut self.resources, index) else {
        break;
      };
      debug_assert_eq!(signum, wrap.signum);
      (wrap.cb)(handle, signum);
    }
  }

  fn tcp_stream_writable(&mut self, handle: &LoopHandle, index: Index) {
    let Some(Resource::TcpStream(wrap)) = live_resource(&mut self.resources, index) else {
      return;
    };

    // A writable event on a connecting socket resolves the connection.
    if let Some(on_connect) = wrap.on_connect.take() {
      let outcome = match wrap.socket.take_error() {
        Ok(Some(err)) | Err(err) => Err(SystemError::from_io("connect", &err)),
        Ok(None) => match (wrap.socket.local_addr(), wrap.socket.peer_addr()) {
          (Ok(local), Ok(remote)) => Ok(TcpSocketInfo { index, local, remote }),
          (Err(err), _) | (_, Err(err)) => {
            Err(SystemError::from_io("connect", &err))
          }
        },
      };
      sync_tcp_interest(&self.registry, index, wrap);
      on_connect(handle, index, outcome);
      return;
    }

    flush_tcp_writes(handle, index, wrap);
    sync_tcp_interest(&self.registry, index, wrap);
  }

  fn tcp_stream_readable(&mut self, handle: &LoopHandle, index: Index) {
    let Some(Resource::TcpStream(wrap)) = live_resource(&mut self.resources, index) else {
      return;
    };
    if !wrap.reading {
      return;
    }

    let (data, eof, error) = drain_readable(&mut wrap.socket);
    let Some(on_read) = wrap.on_read.as_mut() else {
      return;
    };
    if let Some(err) = error {
      on_read(handle, index, Err(SystemError::from_io("read", &err)));
      return;
    }
    if !data.is_empty() {
      on_read(handle, index, Ok(data));
    }
    if eof {
      // Re-borrow: the data callback may have stopped reading or closed.
      if let Some(Resource::TcpStream(wrap)) = live_resource(&mut self.resources, index) {
        if wrap.reading {
          wrap.reading = false;
          sync_tcp_interest(&self.registry, index, wrap);
          if let Some(on_read) = wrap.on_read.as_mut() {
            on_read(handle, index, Ok(Vec::new()));
          }
        }
      }
    }
  }

  fn tcp_accept(&mut self, handle: &LoopHandle, index: Index) {
    loop {
      let Some(Resource::TcpListener(wrap)) = live_resource(&mut self.resources, index) else {
        return;
      };
      match wrap.socket.accept() {
        Ok((socket, remote)) => {
          let peer = self.index.get();
          self.index.set(peer + 1);
          let stream = TcpStreamWrap {
            socket,
            on_connect: None,
            on_read: None,
            reading: false,
            registered: false,
            shutdown: false,
            shutdown_after_drain: false,
            write_queue: VecDeque::new(),
          };
          let local = stream.socket.local_addr();
          self.resources.insert(peer, Slot::refed(Resource::TcpStream(stream)));

          let info = match local {
            Ok(local) => Ok(TcpSocketInfo { index: peer, local, remote }),
            Err(err) => Err(SystemError::from_io("accept", &err)),
          };
          let Some(Resource::TcpListener(wrap)) = live_resource(&mut self.resources, index)
          else {
            return;
          };
          (wrap.on_connection)(handle, peer, info);
        }
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => return,
        Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
        Err(err) => {
          let failure = SystemError::from_io("accept", &err);
          (wrap.on_connection)(handle, index, Err(failure));
          return;
        }
      }
    }
  }

  fn pipe_readable(&mut self, handle: &LoopHandle, index: Index) {
    let Some(Resource::Pipe(wrap)) = live_resource(&mut self.resources, index) else {
      return;
    };
    let (data, eof, error) = drain_readable(&mut wrap.stream);
    let Some(on_read) = wrap.on_read.as_mut() else {
      return;
    };
    if let Some(err) = error {
      on_read(handle, index, Err(SystemError::from_io("read", &err)));
      return;
    }
    if !data.is_empty() {
      on_read(handle, index, Ok(data));
    }
    if eof {
      if let Some(Resource::Pipe(wrap)) = live_resource(&mut self.resources, index) {
        if let Some(on_read) = wrap.on_read.as_mut() {
          on_read(handle, index, Ok(Vec::new()));
        }
        wrap.on_read = None;
      }
    }
  }

  fn pipe_writable(&mut self, index: Index) {
    let Some(Resource::Pipe(wrap)) = live_resource(&mut self.resources, index) else {
      return;
    };
    while let Some(front) = wrap.write_queue.front_mut() {
      match wrap.stream.write(&front.data[front.written..]) {
        Ok(n) => {
          front.written += n;
          if front.written >= front.data.len() {
            wrap.write_queue.pop_front();
          }
        }
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
        Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
        Err(err) => {
          log::debug!("pipe write failed: {err}");
          wrap.write_queue.clear();
          wrap.shutdown = true;
          break;
        }
      }
    }
    if wrap.write_queue.is_empty() && wrap.shutdown_after_drain {
      wrap.shutdown_after_drain = false;
      wrap.shutdown = true;
      let _ = wrap.stream.shutdown(Shutdown::Write);
    }
    sync_pipe_interest(&self.registry, index, wrap);
  }

  fn tcp_write_req(&mut self, index: Index, data: Vec<u8>, cb: WriteCallback) {
    let handle = self.handle();
    let Some(Resource::TcpStream(wrap)) = live_resource(&mut self.resources, index) else {
      cb(&handle, index, Err(SystemError::bad_handle("write")));
      return;
    };
    if wrap.shutdown || wrap.shutdown_after_drain {
      cb(&handle, index, Err(SystemError::shutting_down("write")));
      return;
    }
    wrap.write_queue.push_back(WriteRequest {
      data,
      written: 0,
      cb: Some(cb),
    });
    sync_tcp_interest(&self.registry, index, wrap);
  }

  fn spawn_task(&mut self, index: Index, task: TaskFn, wrap: TaskWrap) {
    self.resources.insert(index, Slot::refed(Resource::Task(wrap)));
    self.tasks_in_flight += 1;

    let completions = self.completion_tx.clone();
    let waker = self.waker.clone();
    self.thread_pool.spawn(move || {
      let result = task();
      let tx = completions.lock();
      if tx.send(Completion::TaskDone(index, result)).is_ok() {
        let _ = waker.wake();
      }
    });
  }

  fn task_done(&mut self, index: Index, result: TaskResult) {
    self.tasks_in_flight -= 1;
    let handle = self.handle();
    let Some(slot) = self.resources.remove(&index) else {
      // Owner closed the handle while the worker ran: drop the result.
      return;
    };
    if let Resource::Task(mut wrap) = slot.resource {
      if let Some(after) = wrap.after.take() {
        after(&handle, result);
      }
    }
  }
}

/// Field-precision lookup so callers can keep using the registry while
/// holding the resource.
fn live_resource(
  resources: &mut HashMap<Index, Slot>,
  index: Index,
) -> Option<&mut Resource> {
  match resources.get_mut(&index) {
    Some(slot) if !slot.closing => Some(&mut slot.resource),
    _ => None,
  }
}

impl Slot {
  fn refed(resource: Resource) -> Self {
    Slot { resource, refed: true, closing: false }
  }

  fn unrefed(resource: Resource) -> Self {
    Slot { resource, refed: false, closing: false }
  }
}

fn tcp_interest(wrap: &TcpStreamWrap) -> Option<Interest> {
  let mut interest = None;
  if wrap.reading {
    interest = Some(Interest::READABLE);
  }
  if wrap.on_connect.is_some() || !wrap.write_queue.is_empty() {
    interest = Some(match interest {
      Some(interest) => interest | Interest::WRITABLE,
      None => Interest::WRITABLE,
    });
  }
  interest
}

fn sync_tcp_interest(
  registry: &Registry,
  index: Index,
  wrap: &mut TcpStreamWrap,
) {
  let token = Token(index as usize);
  let result = match (tcp_interest(wrap), wrap.registered) {
    (Some(interest), true) => {
      registry.reregister(&mut wrap.socket, token, interest)
    }
    (Some(interest), false) => {
      wrap.registered = true;
      registry.register(&mut wrap.socket, token, interest)
    }
    (None, true) => {
      wrap.registered = false;
      registry.deregister(&mut wrap.socket)
    }
    (None, false) => Ok(()),
  };
  if let Err(err) = result {
    log::error!("tcp interest update failed: {err}");
  }
}

fn sync_pipe_interest(registry: &Registry, index: Index, wrap: &mut PipeWrap) {
  let token = Token(index as usize);
  let mut interest = Interest::READABLE;
  if !wrap.write_queue.is_empty() {
    interest = interest.add(Interest::WRITABLE);
  }
  if wrap.registered {
    if let Err(err) = registry.reregister(&mut wrap.stream, token, interest) {
      log::error!("pipe interest update failed: {err}");
    }
  }
}

fn flush_tcp_writes(
  handle: &LoopHandle,
  index: Index,
  wrap: &mut TcpStreamWrap,
) {
  while let Some(front) = wrap.write_queue.front_mut() {
    match wrap.socket.write(&front.data[front.written..]) {
      Ok(n) => {
        front.written += n;
        if front.written >= front.data.len() {
          let request = wrap.write_queue.pop_front().unwrap();
          if let Some(cb) = request.cb {
            cb(handle, index, Ok(request.written));
          }
        }
      }
      Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
      Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
      Err(err) => {
        let request = wrap.write_queue.pop_front().unwrap();
        if let Some(cb) = request.cb {
          cb(handle, index, Err(SystemError::from_io("write", &err)));
        }
        break;
      }
    }
  }
  if wrap.write_queue.is_empty() && wrap.shutdown_after_drain {
    wrap.shutdown_after_drain = false;
    wrap.shutdown = true;
    let _ = wrap.socket.shutdown(Shutdown::Write);
  }
}

/// Reads a nonblocking source dry. Returns the bytes read, whether EOF
/// was seen, and any fatal error.
fn drain_readable<S: Read>(
  source: &mut S,
) -> (Vec<u8>, bool, Option<io::Error>) {
  let mut data = Vec::new();
  let mut chunk = [0u8; READ_CHUNK];
  loop {
    match source.read(&mut chunk) {
      Ok(0) => return (data, true, None),
      Ok(n) => data.extend_from_slice(&chunk[..n]),
      Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
        return (data, false, None);
      }
      Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
      Err(err) => return (data, false, Some(err)),
    }
  }
}

/// A cloneable request side of the loop. Handles are cheap `Rc`s; the
/// loop itself stays single-threaded.
#[derive(Clone)]
pub struct LoopHandle {
  index: Rc<Cell<Index>>,
  requests: Rc<mpsc::Sender<Request>>,
  requests_empty: Rc<Cell<bool>>,
}

impl LoopHandle {
  fn next_index(&self) -> Index {
    let index = self.index.get();
    self.index.set(index + 1);
    index
  }

  fn send(&self, request: Request) {
    if self.requests.send(request).is_ok() {
      self.requests_empty.set(false);
    }
  }

  /// Starts a timer. `period_ms == 0` makes it one-shot.
  pub fn timer_start<F>(&self, delay_ms: u64, period_ms: u64, cb: F) -> Index
  where
    F: FnMut(&LoopHandle) + 'static,
  {
    let index = self.next_index();
    let timer = TimerWrap {
      cb: Box::new(cb),
      period: Duration::from_millis(period_ms),
    };
    self.send(Request::TimerStart(index, Duration::from_millis(delay_ms), timer));
    index
  }

  pub fn timer_stop(&self, index: Index) {
    self.send(Request::TimerStop(index));
  }

  /// Schedules `worker` on the thread pool and `after` back on the loop.
  /// Worker functions must not touch engine state.
  pub fn queue_work<W, A>(&self, worker: W, after: A) -> Index
  where
    W: FnOnce() -> TaskResult + Send + 'static,
    A: FnOnce(&LoopHandle, TaskResult) + 'static,
  {
    let index = self.next_index();
    let wrap = TaskWrap { after: Some(Box::new(after)) };
    self.send(Request::Spawn(index, Box::new(worker), wrap));
    index
  }

  /// Opens a nonblocking TCP connection to `addr`.
  pub fn tcp_connect<F>(
    &self,
    addr: SocketAddr,
    on_connect: F,
  ) -> Result<Index, SystemError>
  where
    F: FnOnce(&LoopHandle, Index, Result<TcpSocketInfo, SystemError>) + 'static,
  {
    let socket = TcpStream::connect(addr)
      .map_err(|err| SystemError::from_io("connect", &err))?;
    let index = self.next_index();
    let wrap = TcpStreamWrap {
      socket,
      on_connect: Some(Box::new(on_connect)),
      on_read: None,
      reading: false,
      registered: false,
      shutdown: false,
      shutdown_after_drain: false,
      write_queue: VecDeque::new(),
    };
    self.send(Request::TcpConnect(index, wrap));
    Ok(index)
  }

  /// Binds `addr` and listens with the given backlog.
  pub fn tcp_listen<F>(
    &self,
    addr: SocketAddr,
    backlog: u32,
    on_connection: F,
  ) -> Result<(Index, SocketAddr), SystemError>
  where
    F: FnMut(&LoopHandle, Index, Result<TcpSocketInfo, SystemError>) + 'static,
  {
    let socket = bind_listener(addr, backlog)
      .map_err(|err| SystemError::from_io("listen", &err))?;
    let local = socket
      .local_addr()
      .map_err(|err| SystemError::from_io("listen", &err))?;
    let index = self.next_index();
    let wrap = TcpListenerWrap {
      socket,
      on_connection: Box::new(on_connection),
    };
    self.send(Request::TcpListen(index, wrap));
    Ok((index, local))
  }

  /// Writes `data` to an open socket. The buffer is owned by the loop
  /// until the completion callback fires.
  pub fn tcp_write<F>(&self, index: Index, data: Vec<u8>, on_write: F)
  where
    F: FnOnce(&LoopHandle, Index, Result<usize, SystemError>) + 'static,
  {
    self.send(Request::TcpWrite(index, data, Box::new(on_write)));
  }

  pub fn tcp_read_start<F>(&self, index: Index, on_read: F)
  where
    F: FnMut(&LoopHandle, Index, Result<Vec<u8>, SystemError>) + 'static,
  {
    self.send(Request::TcpReadStart(index, Box::new(on_read)));
  }

  pub fn tcp_read_stop(&self, index: Index) {
    self.send(Request::TcpReadStop(index));
  }

  pub fn tcp_set_no_delay(&self, index: Index, enable: bool) {
    self.send(Request::TcpSetNoDelay(index, enable));
  }

  pub fn tcp_set_keep_alive(&self, index: Index, enable: bool, delay_ms: u64) {
    self.send(Request::TcpSetKeepAlive(
      index,
      enable,
      Duration::from_millis(delay_ms),
    ));
  }

  /// Closes the write side once pending writes drain. Later writes fail
  /// with "stream shutting down".
  pub fn tcp_shutdown(&self, index: Index) {
    self.send(Request::TcpShutdown(index));
  }

  /// Adopts `fd` as a duplex pipe (the IPC channel). Reading starts
  /// immediately; an empty read signals the peer hung up.
  ///
  /// # Safety-adjacent note
  /// Takes ownership of `fd`; the caller must not use it afterwards.
  pub fn pipe_open<F>(&self, fd: RawFd, on_read: F) -> Result<Index, SystemError>
  where
    F: FnMut(&LoopHandle, Index, Result<Vec<u8>, SystemError>) + 'static,
  {
    let stream = unsafe { std::os::unix::net::UnixStream::from_raw_fd(fd) };
    stream
      .set_nonblocking(true)
      .map_err(|err| SystemError::from_io("pipe", &err))?;
    let stream = UnixStream::from_std(stream);
    let index = self.next_index();
    let wrap = PipeWrap {
      stream,
      on_read: Some(Box::new(on_read)),
      registered: false,
      shutdown: false,
      shutdown_after_drain: false,
      write_queue: VecDeque::new(),
    };
    self.send(Request::PipeOpen(index, wrap));
    Ok(index)
  }

  pub fn pipe_write(&self, index: Index, data: Vec<u8>) {
    self.send(Request::PipeWrite(index, data));
  }

  pub fn pipe_shutdown(&self, index: Index) {
    self.send(Request::PipeShutdown(index));
  }

  /// Watches `signum`. The handle is unref'd: it never keeps the loop
  /// alive by itself.
  pub fn signal_start<F>(
    &self,
    signum: i32,
    cb: F,
  ) -> Result<Index, SystemError>
  where
    F: FnMut(&LoopHandle, i32) + 'static,
  {
    let signals = Signals::new([signum])
      .map_err(|err| SystemError::from_io("signal", &err))?;
    let index = self.next_index();
    let wrap = SignalWrap { signals, signum, cb: Box::new(cb) };
    self.send(Request::SignalStart(index, wrap));
    Ok(index)
  }

  pub fn signal_stop(&self, index: Index) {
    self.send(Request::SignalStop(index));
  }

  /// Runs `cb` once after the next poll phase.
  pub fn idle<F>(&self, cb: F) -> Index
  where
    F: FnOnce(&LoopHandle) + 'static,
  {
    let index = self.next_index();
    self.send(Request::Idle(index, IdleWrap { cb: Some(Box::new(cb)) }));
    index
  }

  /// Asynchronously closes any handle; `on_close` runs on the loop
  /// thread after the handle is fully quiesced.
  pub fn handle_close<F>(&self, index: Index, on_close: F)
  where
    F: FnOnce(&LoopHandle) + 'static,
  {
    self.send(Request::Close(index, Box::new(on_close)));
  }

  /// Toggles whether `index` keeps the loop alive.
  pub fn ref_handle(&self, index: Index, refed: bool) {
    self.send(Request::Ref(index, refed));
  }
}

fn bind_listener(addr: SocketAddr, backlog: u32) -> io::Result<TcpListener> {
  use socket2::Domain;
  use socket2::Protocol;
  use socket2::Socket;
  use socket2::Type;

  let socket =
    Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
  socket.set_reuse_address(true)?;
  socket.bind(&addr.into())?;
  socket.listen(backlog as i32)?;
  socket.set_nonblocking(true)?;
  Ok(TcpListener::from_std(socket.into()))
}

#[cfg(test)]
mod tests {
  use std::cell::RefCell;
  use std::rc::Rc;
  use std::time::Duration;
  use std::time::Instant;

  use super::*;

  fn new_loop() -> EventLoop {
    EventLoop::new(2).unwrap()
  }

  #[test]
  fn one_shot_timer_fires_once() {
    let mut event_loop = new_loop();
    let handle = event_loop.handle();
    let fired = Rc::new(Cell::new(0));
    let counter = fired.clone();
    handle.timer_start(5, 0, move |_| {
      counter.set(counter.get() + 1);
    });
    event_loop.run();
    assert_eq!(fired.get(), 1);
  }

  #[test]
  fn repeating_timer_repeats_until_stopped() {
    let mut event_loop = new_loop();
    let handle = event_loop.handle();
    let fired = Rc::new(Cell::new(0u32));
    let counter = fired.clone();
    let index = Rc::new(Cell::new(0));
    let index_in_cb = index.clone();
    let id = handle.timer_start(1, 1, move |handle| {
      counter.set(counter.get() + 1);
      if counter.get() == 3 {
        handle.timer_stop(index_in_cb.get());
      }
    });
    index.set(id);
    event_loop.run();
    assert_eq!(fired.get(), 3);
  }

  #[test]
  fn queue_work_runs_after_on_loop_thread() {
    let mut event_loop = new_loop();
    let handle = event_loop.handle();
    let result = Rc::new(RefCell::new(None));
    let sink = result.clone();
    handle.queue_work(
      || Ok(Box::new(21u32 * 2) as Box<dyn std::any::Any + Send>),
      move |_, outcome| {
        let value = outcome.unwrap().downcast::<u32>().unwrap();
        *sink.borrow_mut() = Some(*value);
      },
    );
    event_loop.run();
    assert_eq!(*result.borrow(), Some(42));
  }

  #[test]
  fn closed_task_completion_is_dropped() {
    let mut event_loop = new_loop();
    let handle = event_loop.handle();
    let called = Rc::new(Cell::new(false));
    let flag = called.clone();
    let index = handle.queue_work(
      || Ok(Box::new(()) as Box<dyn std::any::Any + Send>),
      move |_, _| flag.set(true),
    );
    handle.handle_close(index, |_| {});
    event_loop.run();
    assert!(!called.get());
  }

  #[test]
  fn close_callback_runs_after_quiesce() {
    let mut event_loop = new_loop();
    let handle = event_loop.handle();
    let order = Rc::new(RefCell::new(Vec::new()));
    let log_a = order.clone();
    let log_b = order.clone();
    let index = handle.timer_start(60_000, 0, |_| {});
    handle.idle(move |_| log_a.borrow_mut().push("idle"));
    handle.handle_close(index, move |_| log_b.borrow_mut().push("close"));
    event_loop.run();
    assert_eq!(*order.borrow(), vec!["idle", "close"]);
  }

  #[test]
  fn unrefed_handles_do_not_keep_the_loop_alive() {
    let mut event_loop = new_loop();
    let handle = event_loop.handle();
    let index = handle.timer_start(60_000, 0, |_| {});
    handle.ref_handle(index, false);
    let start = Instant::now();
    event_loop.run();
    assert!(start.elapsed() < Duration::from_secs(10));
  }

  #[test]
  fn timers_fire_in_deadline_order() {
    let mut event_loop = new_loop();
    let handle = event_loop.handle();
    let order = Rc::new(RefCell::new(Vec::new()));
    for (delay, tag) in [(20, "slow"), (1, "fast"), (10, "middle")] {
      let order = order.clone();
      handle.timer_start(delay, 0, move |_| {
        order.borrow_mut().push(tag);
      });
    }
    event_loop.run();
    assert_eq!(*order.borrow(), vec!["fast", "middle", "slow"]);
  }

  #[test]
  fn pipe_pair_carries_bytes_both_ways() {
    use std::os::fd::IntoRawFd;

    let mut event_loop = new_loop();
    let handle = event_loop.handle();
    let (left_end, right_end) =
      std::os::unix::net::UnixStream::pair().unwrap();

    let seen_left = Rc::new(RefCell::new(Vec::new()));
    let seen_right = Rc::new(RefCell::new(Vec::new()));
    let right_index = Rc::new(Cell::new(0));
    let watchdog = Rc::new(Cell::new(0));

    // Left collects the reply, then tears everything down.
    let sink = seen_left.clone();
    let right_for_left = right_index.clone();
    let watchdog_for_left = watchdog.clone();
    let left = handle
      .pipe_open(left_end.into_raw_fd(), move |handle, index, data| {
        let data = data.unwrap();
        if data.is_empty() {
          handle.handle_close(index, |_| {});
          return;
        }
        sink.borrow_mut().extend_from_slice(&data);
        handle.handle_close(index, |_| {});
        handle.handle_close(right_for_left.get(), |_| {});
        handle.timer_stop(watchdog_for_left.get());
      })
      .unwrap();

    // Right answers every message; the queued reply is flushed before
    // the shutdown takes effect.
    let sink = seen_right.clone();
    let right = handle
      .pipe_open(right_end.into_raw_fd(), move |handle, index, data| {
        let data = data.unwrap();
        if data.is_empty() {
          handle.handle_close(index, |_| {});
          return;
        }
        sink.borrow_mut().extend_from_slice(&data);
        handle.pipe_write(index, b"pong".to_vec());
        handle.pipe_shutdown(index);
      })
      .unwrap();
    right_index.set(right);

    handle.pipe_write(left, b"ping".to_vec());
    // Pipes are unref'd; a watchdog keeps the loop alive until done.
    watchdog.set(handle.timer_start(2_000, 0, |_| {}));

    event_loop.run();
    assert_eq!(&*seen_right.borrow(), b"ping");
    assert_eq!(&*seen_left.borrow(), b"pong");
  }

  #[test]
  fn tcp_echo_roundtrip() {
    let mut event_loop = new_loop();
    let handle = event_loop.handle();
    let received = Rc::new(RefCell::new(Vec::new()));

    // Echo server: read everything, write it back, then close.
    let (server_index, addr) = handle
      .tcp_listen("127.0.0.1:0".parse().unwrap(), 128, |handle, peer, info| {
        info.unwrap();
        handle.tcp_read_start(peer, move |handle, peer, data| {
          let data = data.unwrap();
          if data.is_empty() {
            handle.handle_close(peer, |_| {});
          } else {
            handle.tcp_write(peer, data, |_, _, result| {
              result.unwrap();
            });
          }
        });
      })
      .unwrap();

    let sink = received.clone();
    handle
      .tcp_connect(addr, move |handle, index, info| {
        info.unwrap();
        handle.tcp_write(index, b"ping".to_vec(), |_, _, result| {
          assert_eq!(result.unwrap(), 4);
        });
        handle.tcp_read_start(index, move |handle, index, data| {
          let data = data.unwrap();
          if data.is_empty() {
            handle.handle_close(index, |_| {});
            return;
          }
          sink.borrow_mut().extend_from_slice(&data);
          if sink.borrow().len() >= 4 {
            handle.tcp_shutdown(index);
            handle.handle_close(index, |_| {});
            handle.handle_close(server_index, |_| {});
          }
        });
      })
      .unwrap();

    event_loop.run();
    assert_eq!(&*received.borrow(), b"ping");
  }

  #[test]
  fn write_after_shutdown_fails() {
    let mut event_loop = new_loop();
    let handle = event_loop.handle();
    let error_code = Rc::new(RefCell::new(None));

    let (server_index, addr) = handle
      .tcp_listen("127.0.0.1:0".parse().unwrap(), 128, |handle, peer, info| {
        info.unwrap();
        handle.handle_close(peer, |_| {});
      })
      .unwrap();

    let sink = error_code.clone();
    handle
      .tcp_connect(addr, move |handle, index, info| {
        info.unwrap();
        handle.tcp_shutdown(index);
        handle.tcp_write(index, b"late".to_vec(), move |handle, index, result| {
          *sink.borrow_mut() = Some(result.unwrap_err().message);
          handle.handle_close(index, |_| {});
          handle.handle_close(server_index, |_| {});
        });
      })
      .unwrap();

    event_loop.run();
    assert_eq!(error_code.borrow().as_deref(), Some("stream shutting down"));
  }
}
