//! GDB remote-serial-protocol stub: wire parsing, typed commands, and the
//! TCP server that lets a source-level debugger stop, inspect,
//! single-step and resume the platform's harts.

mod cmd;
mod proto;
mod server;

pub use cmd::{
    parse_command, BreakpointSpec, BreakpointType, Command, CommandArgs, ThreadId, VContAction,
    TID_ALL, TID_ANY,
};
pub use proto::{
    checksum, decode_payload, decode_runlen, parse_packet, serialize, unescape, Packet, PacketKind,
};
pub use server::{DebugTarget, Disposition, GdbServer, Session, StopReason};
