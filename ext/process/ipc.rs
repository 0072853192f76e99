// Copyright 2018-2026 the jsrt authors. MIT license.

//! The parent-process control channel: file descriptor 3, framed as a
//! little-endian u32 length followed by UTF-8 JSON. Partial reads are
//! buffered until a full frame is available.

use std::cell::RefCell;
use std::rc::Rc;
use std::rc::Weak;

use jsrt_core::error::SystemError;
use jsrt_core::event_loop::Index;
use jsrt_core::event_loop::LoopHandle;
use jsrt_events::EventEmitter;
use jsrt_events::EventValue;
use serde_json::Value;

pub const IPC_FD: i32 = 3;

/// Encodes one message: 4-byte LE length prefix + JSON payload.
pub fn encode_frame(value: &Value) -> Vec<u8> {
  let payload = value.to_string().into_bytes();
  let mut frame = Vec::with_capacity(4 + payload.len());
  frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
  frame.extend_from_slice(&payload);
  frame
}

/// Incremental frame parser. Feed it whatever the pipe produced; it
/// hands back every completed message.
#[derive(Default)]
pub struct FrameDecoder {
  buffer: Vec<u8>,
  expected: Option<usize>,
}

impl FrameDecoder {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push(&mut self, data: &[u8]) -> Vec<Value> {
    self.buffer.extend_from_slice(data);
    let mut messages = Vec::new();

    loop {
      match self.expected {
        None => {
          if self.buffer.len() < 4 {
            break;
          }
          let header: [u8; 4] = self.buffer[..4].try_into().unwrap();
          self.expected = Some(u32::from_le_bytes(header) as usize);
          self.buffer.drain(..4);
        }
        Some(length) => {
          if self.buffer.len() < length {
            break;
          }
          let payload: Vec<u8> = self.buffer.drain(..length).collect();
          self.expected = None;
          match serde_json::from_slice(&payload) {
            Ok(message) => messages.push(message),
            Err(err) => log::debug!("dropping malformed IPC frame: {err}"),
          }
        }
      }
    }
    messages
  }
}

struct IpcState {
  pipe: Option<Index>,
  connected: bool,
  decoder: FrameDecoder,
}

pub struct IpcInner {
  handle: LoopHandle,
  emitter: Rc<EventEmitter>,
  state: RefCell<IpcState>,
}

/// The child side of the channel. Created at startup when fd 3 exists.
#[derive(Clone)]
pub struct ProcessIpc {
  inner: Rc<IpcInner>,
}

/// True when fd 3 is open and pipe-shaped (i.e. we were forked with an
/// IPC channel).
pub fn has_ipc_channel() -> bool {
  let mut stat: libc::stat = unsafe { std::mem::zeroed() };
  if unsafe { libc::fstat(IPC_FD, &mut stat) } != 0 {
    return false;
  }
  let kind = stat.st_mode & libc::S_IFMT;
  kind == libc::S_IFSOCK || kind == libc::S_IFIFO
}

impl ProcessIpc {
  /// Adopts `fd` as the control pipe and starts reading frames.
  /// Messages emit `message` on the shared process emitter.
  pub fn start_with_fd(
    handle: &LoopHandle,
    emitter: Rc<EventEmitter>,
    fd: i32,
  ) -> Result<Self, SystemError> {
    let inner = Rc::new(IpcInner {
      handle: handle.clone(),
      emitter,
      state: RefCell::new(IpcState {
        pipe: None,
        connected: true,
        decoder: FrameDecoder::new(),
      }),
    });

    let weak = Rc::downgrade(&inner);
    let pipe = handle.pipe_open(fd, move |_, _, result| {
      let Some(inner) = Weak::upgrade(&weak) else {
        return;
      };
      match result {
        Ok(data) if data.is_empty() => inner.on_hangup(),
        Ok(data) => inner.on_bytes(&data),
        Err(err) => {
          log::debug!("IPC read failed: {err}");
          inner.on_hangup();
        }
      }
    })?;
    inner.state.borrow_mut().pipe = Some(pipe);
    Ok(ProcessIpc { inner })
  }

  pub fn connected(&self) -> bool {
    self.inner.state.borrow().connected
  }

  /// `process.send(value)`: frames and writes. Fails with "Channel
  /// closed" once disconnected.
  pub fn send(&self, value: &Value) -> Result<(), SystemError> {
    let state = self.inner.state.borrow();
    if !state.connected {
      return Err(SystemError::new("write", "ERR_IPC_CHANNEL_CLOSED", "Channel closed"));
    }
    let Some(pipe) = state.pipe else {
      return Err(SystemError::bad_handle("write"));
    };
    self.inner.handle.pipe_write(pipe, encode_frame(value));
    Ok(())
  }

  /// `process.disconnect()`: shuts the pipe down and emits
  /// `disconnect`.
  pub fn disconnect(&self) {
    let pipe = {
      let mut state = self.inner.state.borrow_mut();
      if !state.connected {
        return;
      }
      state.connected = false;
      state.pipe.take()
    };
    if let Some(pipe) = pipe {
      self.inner.handle.pipe_shutdown(pipe);
      self.inner.handle.handle_close(pipe, |_| {});
    }
    self.inner.emitter.emit("disconnect", &[]);
  }
}

impl IpcInner {
  fn on_bytes(&self, data: &[u8]) {
    let messages = self.state.borrow_mut().decoder.push(data);
    for message in messages {
      self.emitter.emit("message", &[EventValue::Json(message)]);
    }
  }

  fn on_hangup(&self) {
    let pipe = {
      let mut state = self.state.borrow_mut();
      if !state.connected {
        return;
      }
      state.connected = false;
      state.pipe.take()
    };
    if let Some(pipe) = pipe {
      self.handle.handle_close(pipe, |_| {});
    }
    self.emitter.emit("disconnect", &[]);
  }
}
