// Copyright 2018-2026 the jsrt authors. MIT license.

//! The process subsystem: signal delivery, the fd-3 IPC channel, and
//! process-level event routing.

mod ipc;
mod process;
mod signals;

pub use ipc::encode_frame;
pub use ipc::has_ipc_channel;
pub use ipc::FrameDecoder;
pub use ipc::ProcessIpc;
pub use process::Process;
pub use signals::kill;
pub use signals::kill_raw;
pub use signals::signal_name;
pub use signals::signal_number;
pub use signals::SIGNALS;
