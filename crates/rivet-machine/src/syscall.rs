use std::io::{Read, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use rivet_isa::Xlen;
use rivet_mem::Ram;

// riscv-newlib syscall numbers.
const SYS_CLOSE: u64 = 57;
const SYS_LSEEK: u64 = 62;
const SYS_READ: u64 = 63;
const SYS_WRITE: u64 = 64;
const SYS_FSTAT: u64 = 80;
const SYS_EXIT: u64 = 93;
const SYS_GETTIMEOFDAY: u64 = 169;
const SYS_BRK: u64 = 214;
const SYS_TIME: u64 = 1062;

/// Host proxy for the newlib syscall ABI: `a7` carries the number,
/// `a0..a3` the arguments, the result goes back in `a0`.
#[derive(Debug)]
pub struct SyscallHandler {
    xlen: Xlen,
    mem_start: u64,
    /// Current program break and its high-water mark.
    hp: u64,
    max_heap: u64,
    pub shall_exit: bool,
    pub exit_code: i32,
}

impl SyscallHandler {
    pub fn new(xlen: Xlen, mem_start: u64, heap_base: u64) -> Self {
        SyscallHandler {
            xlen,
            mem_start,
            hp: heap_base,
            max_heap: heap_base,
            shall_exit: false,
            exit_code: 0,
        }
    }

    pub fn max_heap_consumption(&self) -> u64 {
        self.max_heap
    }

    fn guest_offset(&self, addr: u64) -> u64 {
        addr.wrapping_sub(self.mem_start)
    }

    /// Execute one intercepted ECALL. Returns the value for `a0`.
    pub fn execute(&mut self, ram: &mut Ram, n: u64, a0: u64, a1: u64, a2: u64, _a3: u64) -> i64 {
        match n {
            SYS_EXIT => {
                self.shall_exit = true;
                self.exit_code = a0 as i32;
                0
            }

            SYS_WRITE => {
                let (fd, addr, len) = (a0, a1, a2 as usize);
                match ram.slice(self.guest_offset(addr), len) {
                    Some(bytes) => {
                        let ok = match fd {
                            1 => std::io::stdout().write_all(bytes).is_ok(),
                            2 => std::io::stderr().write_all(bytes).is_ok(),
                            _ => false,
                        };
                        if ok {
                            len as i64
                        } else {
                            -1
                        }
                    }
                    None => -1,
                }
            }

            SYS_READ => {
                let (fd, addr, len) = (a0, a1, a2 as usize);
                if fd != 0 {
                    return -1;
                }
                let mut buf = vec![0u8; len];
                match std::io::stdin().read(&mut buf) {
                    Ok(n) => {
                        if !ram.write(self.guest_offset(addr), &buf[..n]) {
                            return -1;
                        }
                        n as i64
                    }
                    Err(_) => -1,
                }
            }

            SYS_BRK => {
                if a0 == 0 {
                    // newlib expects the current break back for brk(0).
                    self.hp as i64
                } else {
                    self.hp = a0;
                    if self.hp > self.max_heap {
                        self.max_heap = self.hp;
                    }
                    a0 as i64
                }
            }

            SYS_GETTIMEOFDAY => {
                let now = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default();
                let off = self.guest_offset(a0);
                // struct timeval: two native-width words.
                let ok = match self.xlen {
                    Xlen::Rv32 => {
                        let mut buf = [0u8; 8];
                        buf[..4].copy_from_slice(&(now.as_secs() as u32).to_le_bytes());
                        buf[4..].copy_from_slice(&(now.subsec_micros()).to_le_bytes());
                        ram.write(off, &buf)
                    }
                    Xlen::Rv64 => {
                        let mut buf = [0u8; 16];
                        buf[..8].copy_from_slice(&now.as_secs().to_le_bytes());
                        buf[8..].copy_from_slice(&(now.subsec_micros() as u64).to_le_bytes());
                        ram.write(off, &buf)
                    }
                };
                if ok {
                    0
                } else {
                    -1
                }
            }

            SYS_TIME => SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs() as i64)
                .unwrap_or(-1),

            SYS_FSTAT => {
                // Minimal stat: zero the buffer, report character device
                // for the std streams so newlib treats them as ttys.
                let stat_size = 112usize;
                let mut buf = vec![0u8; stat_size];
                if a0 <= 2 {
                    const S_IFCHR: u32 = 0x2000;
                    buf[16..20].copy_from_slice(&S_IFCHR.to_le_bytes()); // st_mode
                }
                if ram.write(self.guest_offset(a1), &buf) {
                    0
                } else {
                    -1
                }
            }

            SYS_CLOSE => 0,
            SYS_LSEEK => 0,

            _ => {
                tracing::warn!(number = n, "unimplemented syscall");
                -1
            }
        }
    }
}
