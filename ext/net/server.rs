// Copyright 2018-2026 the jsrt authors. MIT license.

//! TCP server lifecycle: `NEW -> LISTENING -> CLOSING -> CLOSED`.
//! Accepted connections surface as CONNECTED [`Socket`]s through the
//! `connection` event (and the typed connection handler).

use std::cell::RefCell;
use std::net::SocketAddr;
use std::rc::Rc;
use std::rc::Weak;

use jsrt_core::error::SystemError;
use jsrt_core::event_loop::Index;
use jsrt_core::event_loop::LoopHandle;
use jsrt_events::EventEmitter;
use jsrt_events::EventValue;

use crate::socket::Socket;

const LISTEN_BACKLOG: u32 = 128;

type ConnectionHandler = Box<dyn FnMut(Socket)>;

struct ServerState {
  tcp: Option<Index>,
  listening: bool,
  destroyed: bool,
  local: Option<SocketAddr>,
  connections: usize,
}

pub(crate) struct ServerInner {
  weak_self: Weak<ServerInner>,
  handle: LoopHandle,
  emitter: EventEmitter,
  state: RefCell<ServerState>,
  on_connection: RefCell<Option<ConnectionHandler>>,
}

#[derive(Clone)]
pub struct Server {
  inner: Rc<ServerInner>,
}

impl Server {
  pub fn new(handle: &LoopHandle) -> Self {
    Server {
      inner: Rc::new_cyclic(|weak_self| ServerInner {
        weak_self: weak_self.clone(),
        handle: handle.clone(),
        emitter: EventEmitter::new(),
        state: RefCell::new(ServerState {
          tcp: None,
          listening: false,
          destroyed: false,
          local: None,
          connections: 0,
        }),
        on_connection: RefCell::new(None),
      }),
    }
  }

  pub fn emitter(&self) -> &EventEmitter {
    &self.inner.emitter
  }

  /// Installs the typed accept handler; accepted sockets also go out as
  /// `connection` events.
  pub fn set_connection_handler<F>(&self, f: F)
  where
    F: FnMut(Socket) + 'static,
  {
    *self.inner.on_connection.borrow_mut() = Some(Box::new(f));
  }

  /// Binds and listens. `listening` is emitted synchronously; the
  /// optional callback is always deferred to the next loop turn via a
  /// zero-delay timer, never invoked from inside this call.
  pub fn listen<F>(
    &self,
    port: u16,
    host: Option<&str>,
    cb: Option<F>,
  ) -> Result<SocketAddr, SystemError>
  where
    F: FnOnce() + 'static,
  {
    let inner = &self.inner;
    {
      let state = inner.state.borrow();
      if state.destroyed {
        return Err(SystemError::bad_handle("listen"));
      }
      if state.listening {
        return Err(SystemError::new(
          "listen",
          "EADDRINUSE",
          "server is already listening",
        ));
      }
    }

    let host = host.unwrap_or("0.0.0.0");
    let addr: SocketAddr =
      format!("{host}:{port}").parse().map_err(|_| {
        SystemError::new("listen", "EINVAL", format!("invalid address: {host}"))
      })?;

    let weak = Rc::downgrade(inner);
    let result = inner.handle.tcp_listen(addr, LISTEN_BACKLOG, {
      move |handle, _, outcome| {
        let Some(inner) = weak.upgrade() else {
          return;
        };
        match outcome {
          Ok(info) => inner.on_accept(handle, &info),
          Err(err) => inner.emit_error(err),
        }
      }
    });

    match result {
      Ok((index, local)) => {
        {
          let mut state = inner.state.borrow_mut();
          state.tcp = Some(index);
          state.listening = true;
          state.local = Some(local);
        }
        inner.emitter.emit("listening", &[]);
        if let Some(cb) = cb {
          let mut cb = Some(cb);
          inner.handle.timer_start(0, 0, move |_| {
            if let Some(cb) = cb.take() {
              cb();
            }
          });
        }
        Ok(local)
      }
      Err(err) => {
        inner.emit_error(err.clone());
        Err(err)
      }
    }
  }

  /// Stops accepting; `close` fires (and the callback runs) once the
  /// listening handle is quiesced.
  pub fn close<F>(&self, cb: Option<F>)
  where
    F: FnOnce() + 'static,
  {
    let inner = &self.inner;
    let tcp = {
      let mut state = inner.state.borrow_mut();
      if state.destroyed {
        return;
      }
      state.destroyed = true;
      state.listening = false;
      state.tcp.take()
    };
    let weak = Rc::downgrade(inner);
    let mut cb = cb.map(|cb| Box::new(cb) as Box<dyn FnOnce()>);
    let finish = move |_: &LoopHandle| {
      if let Some(inner) = weak.upgrade() {
        inner.emitter.emit("close", &[]);
      }
      if let Some(cb) = cb.take() {
        cb();
      }
    };
    match tcp {
      Some(tcp) => inner.handle.handle_close(tcp, finish),
      None => {
        // Nothing to quiesce; still defer to the next turn.
        let mut finish = Some(finish);
        inner.handle.timer_start(0, 0, move |handle| {
          if let Some(mut finish) = finish.take() {
            finish(handle);
          }
        });
      }
    }
  }

  pub fn listening(&self) -> bool {
    self.inner.state.borrow().listening
  }

  pub fn address(&self) -> Option<SocketAddr> {
    self.inner.state.borrow().local
  }

  /// Number of sockets accepted and not yet closed.
  pub fn connections(&self) -> usize {
    self.inner.state.borrow().connections
  }

  pub fn ref_server(&self) {
    if let Some(tcp) = self.inner.state.borrow().tcp {
      self.inner.handle.ref_handle(tcp, true);
    }
  }

  pub fn unref(&self) {
    if let Some(tcp) = self.inner.state.borrow().tcp {
      self.inner.handle.ref_handle(tcp, false);
    }
  }
}

impl ServerInner {
  fn on_accept(
    &self,
    handle: &LoopHandle,
    info: &jsrt_core::event_loop::TcpSocketInfo,
  ) {
    if self.state.borrow().destroyed {
      handle.handle_close(info.index, |_| {});
      return;
    }
    self.state.borrow_mut().connections += 1;
    let socket = Socket::from_accepted(handle, info);

    {
      let weak = self.weak_self.clone();
      socket.emitter().on("close", move |_| {
        if let Some(inner) = weak.upgrade() {
          let mut state = inner.state.borrow_mut();
          state.connections = state.connections.saturating_sub(1);
        }
        Ok(())
      });
    }

    if let Some(handler) = self.on_connection.borrow_mut().as_mut() {
      handler(socket.clone());
    }
    let payload: Rc<dyn std::any::Any> = Rc::new(socket);
    self.emitter.emit("connection", &[EventValue::Object(payload)]);
  }

  fn emit_error(&self, err: SystemError) {
    self
      .emitter
      .emit("error", &[EventValue::Error(Rc::new(err))]);
  }
}

impl Drop for ServerInner {
  fn drop(&mut self) {
    let state = self.state.get_mut();
    if let Some(tcp) = state.tcp.take() {
      self.handle.handle_close(tcp, |_| {});
    }
  }
}
