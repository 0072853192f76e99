// Copyright 2018-2026 the jsrt authors. MIT license.

//! TCP sockets and servers over the event loop, with the EventEmitter
//! surface: `connect`/`ready`/`data`/`end`/`error`/`close` on sockets,
//! `listening`/`connection`/`close` on servers.

mod server;
mod socket;

pub use server::Server;
pub use socket::ReadyState;
pub use socket::Socket;
pub use socket::SocketOptions;

use jsrt_core::event_loop::LoopHandle;

/// `net.connect(port, host)`: a socket already connecting.
pub fn connect(handle: &LoopHandle, port: u16, host: &str) -> Socket {
  let socket = Socket::new(handle, SocketOptions::default());
  socket.connect(port, host);
  socket
}

/// `net.createServer(handler)`.
pub fn create_server<F>(handle: &LoopHandle, on_connection: F) -> Server
where
  F: FnMut(Socket) + 'static,
{
  let server = Server::new(handle);
  server.set_connection_handler(on_connection);
  server
}

#[cfg(test)]
mod tests {
  use std::cell::Cell;
  use std::cell::RefCell;
  use std::rc::Rc;

  use jsrt_core::event_loop::EventLoop;

  use super::*;

  fn new_loop() -> EventLoop {
    EventLoop::new(2).unwrap()
  }

  #[test]
  fn echo_roundtrip_with_event_order() {
    let mut event_loop = new_loop();
    let handle = event_loop.handle();
    let events = Rc::new(RefCell::new(Vec::<String>::new()));
    let received = Rc::new(RefCell::new(Vec::<u8>::new()));

    let server = create_server(&handle, |socket| {
      let peer = socket.clone();
      socket.emitter().on("data", move |args| {
        let data = args[0].as_bytes().unwrap().clone();
        peer.write(&data).unwrap();
        peer.end();
        Ok(())
      });
    });
    let addr = server.listen(0, Some("127.0.0.1"), None::<fn()>).unwrap();

    let client = connect(&handle, addr.port(), "127.0.0.1");
    for event in ["connect", "ready", "end", "close"] {
      let events = events.clone();
      client.emitter().on(event, move |_| {
        events.borrow_mut().push(event.to_string());
        Ok(())
      });
    }
    {
      let events = events.clone();
      let received = received.clone();
      let client_for_data = client.clone();
      let server_for_close = server.clone();
      client.emitter().on("data", move |args| {
        events.borrow_mut().push("data".to_string());
        received
          .borrow_mut()
          .extend_from_slice(args[0].as_bytes().unwrap());
        client_for_data.end();
        server_for_close.close(None::<fn()>);
        Ok(())
      });
    }
    {
      let client = client.clone();
      client.clone().emitter().on("connect", move |_| {
        client.write(b"hello").unwrap();
        Ok(())
      });
    }

    event_loop.run();
    assert_eq!(&*received.borrow(), b"hello");
    assert_eq!(
      &*events.borrow(),
      &["connect", "ready", "data", "end", "close"]
    );
    assert_eq!(client.bytes_read(), 5);
    assert_eq!(client.bytes_written(), 5);
    assert!(!client.inner.state.borrow().had_error);
  }

  #[test]
  fn listen_callback_is_never_synchronous() {
    let mut event_loop = new_loop();
    let handle = event_loop.handle();
    let fired = Rc::new(Cell::new(false));

    let server = create_server(&handle, |_| {});
    let flag = fired.clone();
    let server_for_cb = server.clone();
    server
      .listen(
        0,
        Some("127.0.0.1"),
        Some(move || {
          flag.set(true);
          server_for_cb.close(None::<fn()>);
        }),
      )
      .unwrap();

    // The call site must return before the callback runs.
    assert!(!fired.get());
    event_loop.run();
    assert!(fired.get());
  }

  #[test]
  fn connection_refused_emits_error_then_close() {
    let mut event_loop = new_loop();
    let handle = event_loop.handle();
    let order = Rc::new(RefCell::new(Vec::<String>::new()));

    // Bind a port, then fully close the listener before dialing it.
    let server = create_server(&handle, |_| {});
    let addr = server.listen(0, Some("127.0.0.1"), None::<fn()>).unwrap();
    server.close(None::<fn()>);
    event_loop.run();

    let client = connect(&handle, addr.port(), "127.0.0.1");
    {
      let order = order.clone();
      client.emitter().on("error", move |args| {
        assert!(args[0].as_error().is_some());
        order.borrow_mut().push("error".to_string());
        Ok(())
      });
    }
    {
      let order = order.clone();
      client.emitter().on("close", move |args| {
        // close(true): the socket went down with an error.
        assert!(matches!(args[0], jsrt_events::EventValue::Bool(true)));
        order.borrow_mut().push("close".to_string());
        Ok(())
      });
    }

    event_loop.run();
    assert_eq!(&*order.borrow(), &["error", "close"]);
    assert!(client.destroyed());
  }

  #[test]
  fn dns_failure_surfaces_enotfound() {
    let mut event_loop = new_loop();
    let handle = event_loop.handle();
    let code = Rc::new(RefCell::new(String::new()));

    let client = connect(&handle, 80, "no-such-host.invalid");
    let sink = code.clone();
    client.emitter().on("error", move |args| {
      let err = args[0].as_error().unwrap().to_string();
      *sink.borrow_mut() = err;
      Ok(())
    });

    event_loop.run();
    assert!(code.borrow().contains("getaddrinfo"));
  }

  #[test]
  fn close_count_reaches_zero_after_teardown() {
    let mut event_loop = new_loop();
    let handle = event_loop.handle();

    let server = create_server(&handle, |socket| {
      // Server side holds the socket open until the client acts.
      socket.emitter().on("end", |_| Ok(()));
    });
    let addr = server.listen(0, Some("127.0.0.1"), None::<fn()>).unwrap();

    let client = connect(&handle, addr.port(), "127.0.0.1");
    client.set_timeout(60_000);
    let closed = Rc::new(Cell::new(false));
    {
      let flag = closed.clone();
      let client_for_close = client.clone();
      let server_for_close = server.clone();
      client.emitter().on("close", move |_| {
        // Both the TCP handle and the timeout timer are quiesced.
        assert_eq!(client_for_close.close_count(), 0);
        flag.set(true);
        server_for_close.close(None::<fn()>);
        Ok(())
      });
    }
    {
      let client = client.clone();
      client.clone().emitter().on("connect", move |_| {
        // Two live handles at teardown time: tcp + timer.
        client.destroy();
        Ok(())
      });
    }

    event_loop.run();
    assert!(closed.get());
    assert!(client.destroyed());
    assert_eq!(client.ready_state(), ReadyState::Closed);
  }

  #[test]
  fn socket_timeout_emits_but_does_not_close() {
    let mut event_loop = new_loop();
    let handle = event_loop.handle();
    let timed_out = Rc::new(Cell::new(false));

    let server = create_server(&handle, |_| {});
    let addr = server.listen(0, Some("127.0.0.1"), None::<fn()>).unwrap();

    let client = connect(&handle, addr.port(), "127.0.0.1");
    client.set_timeout(20);
    let flag = timed_out.clone();
    let client_for_timeout = client.clone();
    let server_for_timeout = server.clone();
    client.emitter().on("timeout", move |_| {
      flag.set(true);
      // Still open: timeout does not imply teardown.
      assert!(!client_for_timeout.destroyed());
      client_for_timeout.destroy();
      server_for_timeout.close(None::<fn()>);
      Ok(())
    });

    event_loop.run();
    assert!(timed_out.get());
  }

  #[test]
  fn server_counts_connections() {
    let mut event_loop = new_loop();
    let handle = event_loop.handle();
    let seen = Rc::new(Cell::new(0usize));

    let server = Server::new(&handle);
    {
      let seen = seen.clone();
      server.set_connection_handler(move |socket| {
        seen.set(seen.get() + 1);
        socket.destroy();
      });
    }
    let addr = server.listen(0, Some("127.0.0.1"), None::<fn()>).unwrap();
    assert!(server.listening());
    assert_eq!(server.address().unwrap(), addr);

    let client = connect(&handle, addr.port(), "127.0.0.1");
    let server_for_close = server.clone();
    client.emitter().on("close", move |_| {
      server_for_close.close(None::<fn()>);
      Ok(())
    });
    // The peer destroy closes our side with EOF.
    client.emitter().on("end", |_| Ok(()));

    event_loop.run();
    assert_eq!(seen.get(), 1);
    assert_eq!(server.connections(), 0);
  }
}
