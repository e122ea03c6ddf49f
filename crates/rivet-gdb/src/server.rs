//! The stub proper: command dispatch against a [`DebugTarget`], and the
//! TCP session that feeds it.
//!
//! A background thread owns the read half of the socket and pushes parsed
//! frames into a queue; the simulation thread drains the queue, so every
//! mutation of ISS state happens synchronously with execution boundaries.

use std::io::{self, Write};
use std::net::{Ipv4Addr, TcpListener, TcpStream};
use std::sync::mpsc;
use std::thread;

use crate::cmd::{parse_command, Command, CommandArgs, ThreadId, TID_ALL, TID_ANY};
use crate::proto::{decode_payload, parse_packet, serialize, Packet, PacketKind};

/// Why a resumed group of harts stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Breakpoint { hart: usize },
    Exited { hart: usize, code: u8 },
}

/// The machine surface the stub drives. Registers are numbered in gdb
/// order: x0..x31, then 32 for pc. Memory addresses are virtual and go
/// through the debug translation path.
pub trait DebugTarget {
    fn num_harts(&self) -> usize;
    fn xlen_bits(&self) -> u32;

    fn read_register(&mut self, hart: usize, reg: usize) -> Option<u64>;
    fn write_register(&mut self, hart: usize, reg: usize, value: u64) -> bool;

    fn read_memory(&mut self, hart: usize, addr: u64, buf: &mut [u8]) -> bool;
    fn write_memory(&mut self, hart: usize, addr: u64, data: &[u8]) -> bool;

    fn insert_breakpoint(&mut self, hart: usize, addr: u64);
    fn remove_breakpoint(&mut self, hart: usize, addr: u64);

    /// Resume the selected harts until the first of them stops, then force
    /// the rest to stop too (idempotently for the next resume).
    fn run_harts(&mut self, harts: &[usize], single_step: bool) -> StopReason;

    /// All harts resume free running, breakpoints cleared.
    fn detach(&mut self);
}

/// What the connection loop should do after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Continue,
    Detach,
    Kill,
}

const TARGET_XML_RV32: &str =
    "<target version=\"1.0\"><architecture>riscv:rv32</architecture></target>";
const TARGET_XML_RV64: &str =
    "<target version=\"1.0\"><architecture>riscv:rv64</architecture></target>";

/// Per-connection command processor, network-free for testability.
pub struct Session<'a, T: DebugTarget> {
    target: &'a mut T,
    /// `Hc`/`Hg` selections, as raw tids (-1 all, 0 any, else 1-based).
    thread_c: i64,
    thread_g: i64,
    /// Hart reported by the last stop reply.
    stopped_hart: usize,
}

fn hex_encode(data: &[u8]) -> String {
    data.iter().map(|b| format!("{b:02x}")).collect()
}

impl<'a, T: DebugTarget> Session<'a, T> {
    pub fn new(target: &'a mut T) -> Self {
        Session {
            target,
            thread_c: TID_ALL,
            thread_g: TID_ANY,
            stopped_hart: 0,
        }
    }

    fn harts_for(&self, tid: i64) -> Vec<usize> {
        match tid {
            TID_ALL => (0..self.target.num_harts()).collect(),
            TID_ANY => vec![0],
            id if id >= 1 && (id as usize) <= self.target.num_harts() => {
                vec![id as usize - 1]
            }
            _ => vec![0],
        }
    }

    fn reg_bytes(&self) -> usize {
        (self.target.xlen_bits() / 8) as usize
    }

    fn encode_reg(&self, value: u64) -> String {
        hex_encode(&value.to_le_bytes()[..self.reg_bytes()])
    }

    fn decode_reg(&self, data: &[u8]) -> Option<u64> {
        if data.len() != self.reg_bytes() {
            return None;
        }
        let mut bytes = [0u8; 8];
        bytes[..data.len()].copy_from_slice(data);
        Some(u64::from_le_bytes(bytes))
    }

    fn stop_reply(&mut self, reason: StopReason) -> String {
        match reason {
            StopReason::Breakpoint { hart } => {
                self.stopped_hart = hart;
                format!("T05thread:p1.{:02x};", hart + 1)
            }
            StopReason::Exited { code, .. } => format!("W{code:02x};process:1"),
        }
    }

    fn resume(&mut self, harts: Vec<usize>, single_step: bool) -> String {
        let reason = self.target.run_harts(&harts, single_step);
        self.stop_reply(reason)
    }

    fn handle_vcont(&mut self, actions: &[crate::cmd::VContAction]) -> String {
        // A step action binds the run to its thread; otherwise continue
        // whatever the action list covers.
        for a in actions {
            if a.action.eq_ignore_ascii_case(&'s') {
                let harts = self.harts_for(a.thread.map_or(self.thread_c, |t| t.tid));
                return self.resume(harts, true);
            }
        }
        let tid = actions
            .iter()
            .find_map(|a| a.thread.map(|t| t.tid))
            .unwrap_or(TID_ALL);
        self.resume(self.harts_for(tid), false)
    }

    fn handle_qxfer(&mut self, rest: &[u8]) -> String {
        // :features:read:<annex>:<offset>,<length>
        let rest = match rest.strip_prefix(b":features:read:") {
            Some(r) => r,
            None => return String::new(),
        };
        let args = match rest.iter().position(|&b| b == b':') {
            Some(i) => &rest[i + 1..],
            None => return "E01".to_string(),
        };
        let text = if self.target.xlen_bits() == 32 {
            TARGET_XML_RV32
        } else {
            TARGET_XML_RV64
        };
        let (offset, len) = match parse_offset_length(args) {
            Some(v) => v,
            None => return "E01".to_string(),
        };
        let bytes = text.as_bytes();
        if offset >= bytes.len() {
            return "l".to_string();
        }
        let end = (offset + len).min(bytes.len());
        let marker = if end == bytes.len() { 'l' } else { 'm' };
        format!(
            "{marker}{}",
            std::str::from_utf8(&bytes[offset..end]).unwrap_or("")
        )
    }

    /// Dispatch one parsed command. Returns the reply payload and what to
    /// do with the connection. Unknown commands get the empty reply.
    pub fn handle(&mut self, command: &Command) -> (String, Disposition) {
        let reply = match (command.name.as_str(), &command.args) {
            ("?", _) => format!("T05thread:p1.{:02x};", self.stopped_hart + 1),

            ("g", _) => {
                let hart = self.harts_for(self.thread_g)[0];
                let mut out = String::new();
                for reg in 0..=32 {
                    match self.target.read_register(hart, reg) {
                        Some(v) => out.push_str(&self.encode_reg(v)),
                        None => return ("E01".into(), Disposition::Continue),
                    }
                }
                out
            }
            ("G", CommandArgs::Rest(rest)) => {
                let hart = self.harts_for(self.thread_g)[0];
                match decode_hex(rest) {
                    Some(bytes) if bytes.len() == 33 * self.reg_bytes() => {
                        for (reg, chunk) in bytes.chunks(self.reg_bytes()).enumerate() {
                            if let Some(value) = self.decode_reg(chunk) {
                                self.target.write_register(hart, reg, value);
                            }
                        }
                        "OK".into()
                    }
                    _ => "E01".into(),
                }
            }

            ("p", CommandArgs::Int(reg)) => {
                let hart = self.harts_for(self.thread_g)[0];
                match self.target.read_register(hart, *reg as usize) {
                    Some(v) => self.encode_reg(v),
                    None => "E01".into(),
                }
            }
            ("P", CommandArgs::RegWrite { reg, data }) => {
                let hart = self.harts_for(self.thread_g)[0];
                match self.decode_reg(data) {
                    Some(v) if self.target.write_register(hart, *reg as usize, v) => "OK".into(),
                    _ => "E01".into(),
                }
            }

            ("m", CommandArgs::Memory { addr, len }) => {
                let hart = self.harts_for(self.thread_g)[0];
                let mut buf = vec![0u8; *len as usize];
                if self.target.read_memory(hart, *addr, &mut buf) {
                    hex_encode(&buf)
                } else {
                    "E01".into()
                }
            }
            ("M", CommandArgs::MemoryWrite { addr, data, .. }) => {
                let hart = self.harts_for(self.thread_g)[0];
                if self.target.write_memory(hart, *addr, data) {
                    "OK".into()
                } else {
                    "E01".into()
                }
            }

            ("c", _) => self.resume(self.harts_for(self.thread_c), false),
            ("s", _) => self.resume(self.harts_for(self.thread_c), true),
            ("vCont", CommandArgs::VCont(actions)) => self.handle_vcont(actions),
            ("vCont?", _) => "vCont;c;C;s;S".into(),

            ("H", CommandArgs::H { op, id }) => {
                match op {
                    'c' => self.thread_c = id.tid,
                    'g' => self.thread_g = id.tid,
                    _ => {}
                }
                "OK".into()
            }
            ("T", CommandArgs::Thread(ThreadId { tid, .. })) => {
                if *tid >= 1 && (*tid as usize) <= self.target.num_harts() {
                    "OK".into()
                } else {
                    "E01".into()
                }
            }

            ("Z", CommandArgs::Breakpoint(spec)) => {
                // Hardware breakpoints and watchpoints alias to software
                // breakpoints in this model.
                for hart in 0..self.target.num_harts() {
                    self.target.insert_breakpoint(hart, spec.addr);
                }
                "OK".into()
            }
            ("z", CommandArgs::Breakpoint(spec)) => {
                for hart in 0..self.target.num_harts() {
                    self.target.remove_breakpoint(hart, spec.addr);
                }
                "OK".into()
            }

            ("qSupported", _) => format!(
                "PacketSize={:x};multiprocess+;swbreak+;vContSupported+;qXfer:features:read+",
                4096
            ),
            ("qAttached", _) => "1".into(),
            ("qC", _) => {
                let hart = self.harts_for(self.thread_g)[0];
                format!("QCp1.{:02x}", hart + 1)
            }
            ("qfThreadInfo", _) => {
                let ids: Vec<String> = (1..=self.target.num_harts())
                    .map(|tid| format!("p1.{tid:02x}"))
                    .collect();
                format!("m{}", ids.join(","))
            }
            ("qsThreadInfo", _) => "l".into(),
            ("qXfer", CommandArgs::Rest(rest)) => self.handle_qxfer(rest),

            ("D", _) => {
                self.target.detach();
                return ("OK".into(), Disposition::Detach);
            }
            ("k", _) => return (String::new(), Disposition::Kill),

            // For any command not supported by the stub, an empty
            // response is returned.
            _ => String::new(),
        };
        (reply, Disposition::Continue)
    }
}

fn decode_hex(data: &[u8]) -> Option<Vec<u8>> {
    if data.len() % 2 != 0 {
        return None;
    }
    data.chunks(2)
        .map(|pair| {
            let hi = char::from(pair[0]).to_digit(16)?;
            let lo = char::from(pair[1]).to_digit(16)?;
            Some((hi << 4 | lo) as u8)
        })
        .collect()
}

fn parse_offset_length(args: &[u8]) -> Option<(usize, usize)> {
    let comma = args.iter().position(|&b| b == b',')?;
    let offset = usize::from_str_radix(std::str::from_utf8(&args[..comma]).ok()?, 16).ok()?;
    let len = usize::from_str_radix(std::str::from_utf8(&args[comma + 1..]).ok()?, 16).ok()?;
    Some((offset, len))
}

/// The TCP front end: accepts one client at a time on loopback.
pub struct GdbServer {
    listener: TcpListener,
}

impl GdbServer {
    pub fn bind(port: u16) -> io::Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port))?;
        tracing::info!(port = listener.local_addr()?.port(), "gdb stub listening");
        Ok(GdbServer { listener })
    }

    pub fn port(&self) -> u16 {
        self.listener.local_addr().map(|a| a.port()).unwrap_or(0)
    }

    /// Serve one debugger connection. Returns when the client detaches,
    /// kills the session, or drops the socket; on detach (and on a dropped
    /// socket) every hart has been released to run freely.
    pub fn serve<T: DebugTarget>(&self, target: &mut T) -> io::Result<Disposition> {
        let (stream, peer) = self.listener.accept()?;
        tracing::info!(%peer, "debugger attached");
        let disposition = self.handle_connection(stream, target)?;
        tracing::info!(%peer, ?disposition, "debugger session ended");
        Ok(disposition)
    }

    fn handle_connection<T: DebugTarget>(
        &self,
        mut stream: TcpStream,
        target: &mut T,
    ) -> io::Result<Disposition> {
        let (tx, rx) = mpsc::channel::<Packet>();
        let mut read_half = stream.try_clone()?;
        // The reader thread only parses frames; all ISS-touching work
        // stays on this thread.
        thread::spawn(move || {
            while let Ok(Some(pkt)) = parse_packet(&mut read_half) {
                if tx.send(pkt).is_err() {
                    break;
                }
            }
        });

        let mut session = Session::new(target);
        let mut prev_reply: Option<Vec<u8>> = None;

        while let Ok(pkt) = rx.recv() {
            match pkt.kind {
                PacketKind::Ack => continue,
                PacketKind::Nack => {
                    if let Some(prev) = &prev_reply {
                        stream.write_all(prev)?;
                    }
                    continue;
                }
                PacketKind::Packet | PacketKind::Notify => {}
            }

            if !pkt.is_valid() {
                stream.write_all(&serialize(PacketKind::Nack, b""))?;
                continue;
            }
            let decoded = match decode_payload(&pkt.data) {
                Some(d) => d,
                None => {
                    stream.write_all(&serialize(PacketKind::Nack, b""))?;
                    continue;
                }
            };
            let command = match parse_command(&decoded) {
                Some(c) => c,
                None => {
                    stream.write_all(&serialize(PacketKind::Nack, b""))?;
                    continue;
                }
            };
            stream.write_all(&serialize(PacketKind::Ack, b""))?;

            tracing::debug!(name = %command.name, "gdb command");
            let (reply, disposition) = session.handle(&command);
            let framed = serialize(PacketKind::Packet, reply.as_bytes());
            stream.write_all(&framed)?;
            prev_reply = Some(framed);

            if disposition != Disposition::Continue {
                return Ok(disposition);
            }
        }
        // Socket closed without detach: release every hart.
        target.detach();
        Ok(Disposition::Detach)
    }
}
