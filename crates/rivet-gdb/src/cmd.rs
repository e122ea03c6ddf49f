//! Second parse stage: a decoded packet payload becomes a typed command.
//!
//! Zero-copy where possible: the parser walks the byte slice once, peeling
//! the command name and the argument shape that name implies.

/// Thread id in the multiprocess `p<pid>.<tid>` form. `-1` addresses all
/// threads, `0` any thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadId {
    pub pid: Option<i64>,
    pub tid: i64,
}

pub const TID_ALL: i64 = -1;
pub const TID_ANY: i64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakpointType {
    Soft,
    Hard,
    WatchWrite,
    WatchRead,
    WatchAccess,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakpointSpec {
    pub ty: BreakpointType,
    pub addr: u64,
    pub kind: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VContAction {
    pub action: char,
    pub thread: Option<ThreadId>,
}

/// Typed argument variants, one per command family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandArgs {
    None,
    Int(u64),
    Memory {
        addr: u64,
        len: u64,
    },
    /// `M addr,len:hexdata` with the data already hex-decoded.
    MemoryWrite {
        addr: u64,
        len: u64,
        data: Vec<u8>,
    },
    /// `P n=r` with the value bytes already hex-decoded (target order).
    RegWrite {
        reg: u64,
        data: Vec<u8>,
    },
    Breakpoint(BreakpointSpec),
    Thread(ThreadId),
    H {
        op: char,
        id: ThreadId,
    },
    VCont(Vec<VContAction>),
    /// Unparsed remainder for commands whose handler digs further
    /// (`qSupported`, `qXfer`, ...).
    Rest(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub name: String,
    pub args: CommandArgs,
}

fn split_at_any<'a>(data: &'a [u8], seps: &[u8]) -> (&'a [u8], &'a [u8]) {
    match data.iter().position(|b| seps.contains(b)) {
        Some(i) => (&data[..i], &data[i..]),
        None => (data, &[][..]),
    }
}

fn parse_hex(data: &[u8]) -> Option<(u64, &[u8])> {
    let mut value: u64 = 0;
    let mut used = 0;
    for &b in data {
        let d = match b {
            b'0'..=b'9' => b - b'0',
            b'a'..=b'f' => b - b'a' + 10,
            b'A'..=b'F' => b - b'A' + 10,
            _ => break,
        };
        value = value.checked_mul(16)?.checked_add(d as u64)?;
        used += 1;
    }
    if used == 0 {
        None
    } else {
        Some((value, &data[used..]))
    }
}

fn decode_hex_bytes(data: &[u8]) -> Option<Vec<u8>> {
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

/// `-1`, `0`, or a big-endian hex id; with an optional `p<pid>.` prefix.
fn parse_thread_id(data: &[u8]) -> Option<(ThreadId, &[u8])> {
    fn parse_id(data: &[u8]) -> Option<(i64, &[u8])> {
        if let Some(rest) = data.strip_prefix(b"-1") {
            return Some((TID_ALL, rest));
        }
        let (v, rest) = parse_hex(data)?;
        Some((v as i64, rest))
    }

    if let Some(rest) = data.strip_prefix(b"p") {
        let (pid, rest) = parse_id(rest)?;
        let rest = rest.strip_prefix(b".")?;
        let (tid, rest) = parse_id(rest)?;
        Some((
            ThreadId {
                pid: Some(pid),
                tid,
            },
            rest,
        ))
    } else {
        let (tid, rest) = parse_id(data)?;
        Some((ThreadId { pid: None, tid }, rest))
    }
}

fn parse_vcont(data: &[u8]) -> Option<CommandArgs> {
    let mut actions = Vec::new();
    let mut rest = data;
    while let Some(r) = rest.strip_prefix(b";") {
        let (&action, r) = r.split_first()?;
        let action = char::from(action);
        if !matches!(action, 'c' | 'C' | 's' | 'S' | 't') {
            return None;
        }
        // C/S carry a signal byte the stub ignores.
        let r = if matches!(action, 'C' | 'S') {
            parse_hex(r).map(|(_, r)| r).unwrap_or(r)
        } else {
            r
        };
        let (thread, r) = match r.strip_prefix(b":") {
            Some(r) => {
                let (id, r) = parse_thread_id(r)?;
                (Some(id), r)
            }
            None => (None, r),
        };
        actions.push(VContAction { action, thread });
        rest = r;
    }
    if actions.is_empty() {
        None
    } else {
        CommandArgs::VCont(actions).into()
    }
}

/// Parse one command payload. `None` means the payload is malformed (the
/// caller nacks); an *unknown but well-formed* command still parses, so
/// the dispatcher can reply with the empty packet.
pub fn parse_command(payload: &[u8]) -> Option<Command> {
    let (&first, rest) = payload.split_first()?;
    let cmd = |name: &str, args| {
        Some(Command {
            name: name.to_string(),
            args,
        })
    };

    match first {
        b'?' => cmd("?", CommandArgs::None),
        b'g' => cmd("g", CommandArgs::None),
        b'G' => cmd("G", CommandArgs::Rest(rest.to_vec())),
        b'D' => cmd("D", CommandArgs::None),
        b'k' => cmd("k", CommandArgs::None),

        b'c' | b's' => {
            let name = if first == b'c' { "c" } else { "s" };
            match parse_hex(rest) {
                Some((addr, _)) => cmd(name, CommandArgs::Int(addr)),
                None if rest.is_empty() => cmd(name, CommandArgs::None),
                None => None,
            }
        }

        b'p' => {
            let (reg, _) = parse_hex(rest)?;
            cmd("p", CommandArgs::Int(reg))
        }
        b'P' => {
            let (reg, r) = parse_hex(rest)?;
            let r = r.strip_prefix(b"=")?;
            let data = decode_hex_bytes(r)?;
            cmd("P", CommandArgs::RegWrite { reg, data })
        }

        b'm' => {
            let (addr, r) = parse_hex(rest)?;
            let r = r.strip_prefix(b",")?;
            let (len, _) = parse_hex(r)?;
            cmd("m", CommandArgs::Memory { addr, len })
        }
        b'M' => {
            let (addr, r) = parse_hex(rest)?;
            let r = r.strip_prefix(b",")?;
            let (len, r) = parse_hex(r)?;
            let r = r.strip_prefix(b":")?;
            let data = decode_hex_bytes(r)?;
            if data.len() as u64 != len {
                return None;
            }
            cmd("M", CommandArgs::MemoryWrite { addr, len, data })
        }

        b'Z' | b'z' => {
            let name = if first == b'Z' { "Z" } else { "z" };
            let (ty, r) = parse_hex(rest)?;
            let ty = match ty {
                0 => BreakpointType::Soft,
                1 => BreakpointType::Hard,
                2 => BreakpointType::WatchWrite,
                3 => BreakpointType::WatchRead,
                4 => BreakpointType::WatchAccess,
                _ => return None,
            };
            let r = r.strip_prefix(b",")?;
            let (addr, r) = parse_hex(r)?;
            let r = r.strip_prefix(b",")?;
            let (kind, _) = parse_hex(r)?;
            cmd(
                name,
                CommandArgs::Breakpoint(BreakpointSpec {
                    ty,
                    addr,
                    kind: kind as u32,
                }),
            )
        }

        b'H' => {
            let (&op, r) = rest.split_first()?;
            let (id, _) = parse_thread_id(r)?;
            cmd(
                "H",
                CommandArgs::H {
                    op: char::from(op),
                    id,
                },
            )
        }
        b'T' => {
            let (id, _) = parse_thread_id(rest)?;
            cmd("T", CommandArgs::Thread(id))
        }

        b'v' | b'q' | b'Q' => {
            let (name, r) = split_at_any(payload, b":;,?");
            let name = String::from_utf8(name.to_vec()).ok()?;
            if name == "vCont" {
                return match r {
                    b"?" => cmd("vCont?", CommandArgs::None),
                    _ => Some(Command {
                        name,
                        args: parse_vcont(r)?,
                    }),
                };
            }
            // Keep the separator-led remainder for the handler.
            let name_with_query = if r.first() == Some(&b'?') {
                format!("{name}?")
            } else {
                name
            };
            Some(Command {
                name: name_with_query,
                args: CommandArgs::Rest(r.to_vec()),
            })
        }

        // Well-formed but unsupported single-letter command: surface the
        // name so the dispatcher can send the empty reply.
        _ => cmd(
            std::str::from_utf8(&payload[..1]).ok()?,
            CommandArgs::Rest(rest.to_vec()),
        ),
    }
}
