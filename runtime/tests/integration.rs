// Copyright 2018-2026 the jsrt authors. MIT license.

//! Cross-subsystem flows: streams piped through codecs, sockets driven
//! by timers, process events around the loop lifecycle.

use std::cell::Cell;
use std::cell::RefCell;
use std::rc::Rc;

use jsrt_core::engine::testing::TestEngine;
use jsrt_runtime::http_loader::HttpConfig;
use jsrt_runtime::net;
use jsrt_runtime::streams;
use jsrt_runtime::zlib;
use jsrt_runtime::Runtime;
use jsrt_runtime::Timers;

fn new_runtime() -> Runtime {
  let _ = env_logger::builder().is_test(true).try_init();
  let engine = Rc::new(TestEngine::new());
  Runtime::with_config(engine, HttpConfig::default()).unwrap()
}

fn payload(len: usize) -> Vec<u8> {
  (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

#[test]
fn gzip_transform_piped_through_pass_through_roundtrips() {
  let mut runtime = new_runtime();
  let data = payload(200_000);

  // gzip Transform -> PassThrough -> collected sink.
  let gzip = zlib::create_gzip(zlib::ZlibOptions::default()).unwrap();
  let tap = streams::pass_through(streams::StreamOptions::default());
  gzip.pipe(&tap, true);
  let compressed = Rc::new(RefCell::new(Vec::new()));
  {
    let compressed = compressed.clone();
    tap.on("data", move |args| {
      compressed
        .borrow_mut()
        .extend_from_slice(args[0].as_bytes().unwrap());
      Ok(())
    });
  }
  for window in data.chunks(3001) {
    gzip.write(streams::Chunk::from_slice(window), None).unwrap();
  }
  gzip.end(None, None).unwrap();
  assert!(tap.writable_finished());
  assert_eq!(&compressed.borrow()[..2], &[0x1F, 0x8B]);

  // Decompress on the worker pool and rendezvous on the loop.
  let plain = Rc::new(RefCell::new(Vec::new()));
  {
    let handle = runtime.handle();
    let sink = plain.clone();
    let compressed = compressed.borrow().clone();
    zlib::inflate(
      &handle,
      &compressed,
      &zlib::ZlibOptions::default(),
      zlib::Format::Gzip,
      move |result| {
        *sink.borrow_mut() = result.unwrap();
      },
    );
  }
  runtime.run();
  assert_eq!(*plain.borrow(), data);
}

#[test]
fn socket_echo_driven_by_a_timer_reports_exit_code() {
  let mut runtime = new_runtime();
  let handle = runtime.handle();
  let timers = Timers::new(&handle);
  let echoed = Rc::new(RefCell::new(Vec::new()));

  let server = net::create_server(&handle, |socket| {
    let peer = socket.clone();
    socket.emitter().on("data", move |args| {
      peer.write(args[0].as_bytes().unwrap()).unwrap();
      peer.end();
      Ok(())
    });
  });
  let addr = server.listen(0, Some("127.0.0.1"), None::<fn()>).unwrap();

  let client = net::connect(&handle, addr.port(), "127.0.0.1");
  {
    // First write happens a tick later, from the timer surface.
    let client = client.clone();
    timers.set_timeout(5, move || {
      client.write(b"over the loop").unwrap();
    });
  }
  {
    let echoed = echoed.clone();
    let client_for_data = client.clone();
    let server_for_close = server.clone();
    client.emitter().on("data", move |args| {
      echoed
        .borrow_mut()
        .extend_from_slice(args[0].as_bytes().unwrap());
      client_for_data.end();
      server_for_close.close(None::<fn()>);
      Ok(())
    });
  }

  runtime.process().set_exit_code(0);
  let code = runtime.run();
  assert_eq!(code, 0);
  assert_eq!(&*echoed.borrow(), b"over the loop");
  assert_eq!(client.bytes_written(), 13);
  assert_eq!(client.bytes_read(), 13);
}

#[test]
fn exit_event_sees_work_scheduled_from_before_exit() {
  let mut runtime = new_runtime();
  let handle = runtime.handle();
  let order = Rc::new(RefCell::new(Vec::new()));

  {
    let order = order.clone();
    let revived = Cell::new(false);
    runtime
      .process()
      .on("beforeExit", move |_| {
        order.borrow_mut().push("beforeExit");
        if !revived.replace(true) {
          let order = order.clone();
          handle.timer_start(1, 0, move |_| {
            order.borrow_mut().push("late-timer");
          });
        }
        Ok(())
      })
      .unwrap();
  }
  {
    let order = order.clone();
    runtime
      .process()
      .on("exit", move |_| {
        order.borrow_mut().push("exit");
        Ok(())
      })
      .unwrap();
  }

  runtime.run();
  assert_eq!(
    *order.borrow(),
    vec!["beforeExit", "late-timer", "beforeExit", "exit"]
  );
}

#[test]
fn module_loading_and_relative_resolution_end_to_end() {
  let engine = Rc::new(TestEngine::new());
  let runtime =
    Runtime::with_config(engine.clone(), HttpConfig::default()).unwrap();

  // Entry module resolved, preloaded, and compiled from cache.
  let entry = runtime
    .resolve_import("https://esm.sh/app/index.js", "./lib/main.js")
    .unwrap();
  assert_eq!(entry, "https://esm.sh/app/lib/main.js");

  // A loader error for a blocked domain leaves the engine untouched.
  runtime.load_module("https://untrusted.example/x.js").unwrap_err();
  assert!(engine.compiled_modules().is_empty());
}
