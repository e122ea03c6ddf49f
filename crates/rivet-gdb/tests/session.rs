use std::collections::HashSet;

use pretty_assertions::assert_eq;
use rivet_gdb::{parse_command, DebugTarget, Disposition, Session, StopReason};

/// Two-hart fake machine: registers are `hart * 100 + reg`, memory is a
/// flat 64 KiB array, runs always "hit a breakpoint" on the first
/// resumed hart after one step.
struct MockTarget {
    regs: Vec<Vec<u64>>,
    mem: Vec<u8>,
    breakpoints: HashSet<(usize, u64)>,
    runs: Vec<(Vec<usize>, bool)>,
    detached: bool,
}

impl MockTarget {
    fn new() -> Self {
        MockTarget {
            regs: (0..2)
                .map(|h| (0..33).map(|r| (h * 100 + r) as u64).collect())
                .collect(),
            mem: vec![0; 0x10000],
            breakpoints: HashSet::new(),
            runs: Vec::new(),
            detached: false,
        }
    }
}

impl DebugTarget for MockTarget {
    fn num_harts(&self) -> usize {
        2
    }

    fn xlen_bits(&self) -> u32 {
        32
    }

    fn read_register(&mut self, hart: usize, reg: usize) -> Option<u64> {
        self.regs.get(hart)?.get(reg).copied()
    }

    fn write_register(&mut self, hart: usize, reg: usize, value: u64) -> bool {
        match self.regs.get_mut(hart).and_then(|r| r.get_mut(reg)) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    fn read_memory(&mut self, _hart: usize, addr: u64, buf: &mut [u8]) -> bool {
        let off = addr as usize;
        match self.mem.get(off..off + buf.len()) {
            Some(src) => {
                buf.copy_from_slice(src);
                true
            }
            None => false,
        }
    }

    fn write_memory(&mut self, _hart: usize, addr: u64, data: &[u8]) -> bool {
        let off = addr as usize;
        match self.mem.get_mut(off..off + data.len()) {
            Some(dst) => {
                dst.copy_from_slice(data);
                true
            }
            None => false,
        }
    }

    fn insert_breakpoint(&mut self, hart: usize, addr: u64) {
        self.breakpoints.insert((hart, addr));
    }

    fn remove_breakpoint(&mut self, hart: usize, addr: u64) {
        self.breakpoints.remove(&(hart, addr));
    }

    fn run_harts(&mut self, harts: &[usize], single_step: bool) -> StopReason {
        self.runs.push((harts.to_vec(), single_step));
        // Single-step advances the selected hart's pc by one instruction.
        if single_step {
            for &h in harts {
                self.regs[h][32] += 4;
            }
        }
        StopReason::Breakpoint { hart: harts[0] }
    }

    fn detach(&mut self) {
        self.detached = true;
    }
}

fn roundtrip(session: &mut Session<'_, MockTarget>, payload: &[u8]) -> String {
    let cmd = parse_command(payload).expect("well-formed command");
    let (reply, disposition) = session.handle(&cmd);
    assert_eq!(disposition, Disposition::Continue, "for {payload:?}");
    reply
}

#[test]
fn question_mark_reports_initial_stop() {
    let mut target = MockTarget::new();
    let mut session = Session::new(&mut target);
    assert_eq!(roundtrip(&mut session, b"?"), "T05thread:p1.01;");
}

#[test]
fn register_dump_is_hex_little_endian() {
    let mut target = MockTarget::new();
    let mut session = Session::new(&mut target);
    let reply = roundtrip(&mut session, b"g");
    // 33 registers, 4 bytes each, hex-encoded.
    assert_eq!(reply.len(), 33 * 8);
    // x1 of hart 0 is 1.
    assert_eq!(&reply[8..16], "01000000");
}

#[test]
fn single_register_read_and_write() {
    let mut target = MockTarget::new();
    let mut session = Session::new(&mut target);
    assert_eq!(roundtrip(&mut session, b"p20"), "20000000"); // pc = reg 32
    assert_eq!(roundtrip(&mut session, b"P5=78563412"), "OK");
    assert_eq!(target.regs[0][5], 0x1234_5678);
    // Out-of-range register.
    let mut session = Session::new(&mut target);
    assert_eq!(roundtrip(&mut session, b"p40"), "E01");
}

#[test]
fn memory_read_write_round_trip() {
    let mut target = MockTarget::new();
    target.mem[0x1000..0x1004].copy_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
    let mut session = Session::new(&mut target);
    assert_eq!(roundtrip(&mut session, b"m1000,4"), "deadbeef");
    assert_eq!(roundtrip(&mut session, b"M1002,2:cafe"), "OK");
    assert_eq!(roundtrip(&mut session, b"m1000,4"), "deadcafe");
    // Past the end of memory.
    assert_eq!(roundtrip(&mut session, b"mffffff,4"), "E01");
}

#[test]
fn single_step_replies_with_stop_and_advances_pc() {
    let mut target = MockTarget::new();
    let mut session = Session::new(&mut target);
    roundtrip(&mut session, b"Hcp1.1");
    let reply = roundtrip(&mut session, b"s");
    assert_eq!(reply, "T05thread:p1.01;");
    assert_eq!(target.runs, vec![(vec![0], true)]);
    assert_eq!(target.regs[0][32], 32 + 4);
}

#[test]
fn continue_resumes_all_by_default() {
    let mut target = MockTarget::new();
    let mut session = Session::new(&mut target);
    let reply = roundtrip(&mut session, b"c");
    assert_eq!(reply, "T05thread:p1.01;");
    assert_eq!(target.runs, vec![(vec![0, 1], false)]);
}

#[test]
fn vcont_step_binds_to_its_thread() {
    let mut target = MockTarget::new();
    let mut session = Session::new(&mut target);
    roundtrip(&mut session, b"vCont;s:p1.2;c");
    drop(session);
    assert_eq!(target.runs, vec![(vec![1], true)]);

    let mut session = Session::new(&mut target);
    assert_eq!(roundtrip(&mut session, b"vCont?"), "vCont;c;C;s;S");
}

#[test]
fn breakpoints_apply_to_every_hart() {
    let mut target = MockTarget::new();
    let mut session = Session::new(&mut target);
    assert_eq!(roundtrip(&mut session, b"Z0,1008,4"), "OK");
    assert!(target.breakpoints.contains(&(0, 0x1008)));
    assert!(target.breakpoints.contains(&(1, 0x1008)));

    let mut session = Session::new(&mut target);
    assert_eq!(roundtrip(&mut session, b"z0,1008,4"), "OK");
    assert!(target.breakpoints.is_empty());
}

#[test]
fn hardware_breakpoints_alias_to_software() {
    let mut target = MockTarget::new();
    let mut session = Session::new(&mut target);
    assert_eq!(roundtrip(&mut session, b"Z1,2000,4"), "OK");
    assert!(target.breakpoints.contains(&(0, 0x2000)));
}

#[test]
fn thread_queries() {
    let mut target = MockTarget::new();
    let mut session = Session::new(&mut target);
    assert_eq!(roundtrip(&mut session, b"qC"), "QCp1.01");
    assert_eq!(roundtrip(&mut session, b"qfThreadInfo"), "mp1.01,p1.02");
    assert_eq!(roundtrip(&mut session, b"qsThreadInfo"), "l");
    assert_eq!(roundtrip(&mut session, b"qAttached"), "1");
    assert_eq!(roundtrip(&mut session, b"Hgp1.2"), "OK");
    assert_eq!(roundtrip(&mut session, b"p0"), "64000000"); // hart 1, x0 = 100
}

#[test]
fn qsupported_advertises_features() {
    let mut target = MockTarget::new();
    let mut session = Session::new(&mut target);
    let reply = roundtrip(&mut session, b"qSupported:multiprocess+;swbreak+");
    assert!(reply.contains("multiprocess+"));
    assert!(reply.contains("qXfer:features:read+"));
}

#[test]
fn qxfer_serves_target_description() {
    let mut target = MockTarget::new();
    let mut session = Session::new(&mut target);
    let reply = roundtrip(&mut session, b"qXfer:features:read:target.xml:0,1000");
    assert!(reply.starts_with('l'));
    assert!(reply.contains("riscv:rv32"));

    // Chunked read.
    let reply = roundtrip(&mut session, b"qXfer:features:read:target.xml:0,10");
    assert!(reply.starts_with('m'));
    assert_eq!(reply.len(), 1 + 0x10);
}

#[test]
fn unknown_command_gets_empty_reply() {
    let mut target = MockTarget::new();
    let mut session = Session::new(&mut target);
    assert_eq!(roundtrip(&mut session, b"X1000,4:ab"), "");
    assert_eq!(roundtrip(&mut session, b"qRcmd,68656c70"), "");
}

#[test]
fn detach_releases_the_target() {
    let mut target = MockTarget::new();
    let mut session = Session::new(&mut target);
    let cmd = parse_command(b"D").unwrap();
    let (reply, disposition) = session.handle(&cmd);
    assert_eq!(reply, "OK");
    assert_eq!(disposition, Disposition::Detach);
    assert!(target.detached);
}
