//! The machine as seen by the GDB stub: register/memory access over the
//! debug paths, and the multi-hart stop/continue coordination.

use rivet_cpu_core::CoreExecStatus;
use rivet_gdb::{DebugTarget, StopReason};
use rivet_isa::MemAccessType;
use rivet_mem::BusPort;
use rivet_mmu::PAGE_SIZE;

use crate::machine::Machine;

impl Machine {
    /// Put every hart under debugger control. WFI stops parking so a
    /// resumed hart always reaches its stop event.
    pub fn debug_attach(&mut self) {
        for hart in &mut self.harts {
            hart.debug_mode = true;
            hart.set_block_on_wfi(false);
        }
    }

    fn debug_release(&mut self) {
        for hart in &mut self.harts {
            hart.debug_mode = false;
            hart.set_block_on_wfi(true);
            hart.breakpoints.clear();
            if hart.status == CoreExecStatus::HitBreakpoint {
                hart.status = CoreExecStatus::Runnable;
            }
        }
    }

    /// Split a virtual range at page boundaries; translation is per page.
    fn debug_mem_op(
        &mut self,
        hart: usize,
        mut addr: u64,
        mut len: usize,
        write: Option<&[u8]>,
        read_into: Option<&mut [u8]>,
    ) -> bool {
        let mut done = 0usize;
        let mut read_buf = read_into;
        while len > 0 {
            let page_room = (PAGE_SIZE - (addr % PAGE_SIZE)) as usize;
            let n = len.min(page_room);
            let ty = if write.is_some() {
                MemAccessType::Store
            } else {
                MemAccessType::Load
            };
            let paddr = match self.harts[hart].translate_for_debug(&mut self.bus, addr, ty) {
                Ok(p) => p,
                Err(_) => return false,
            };
            let ok = match (&write, &mut read_buf) {
                (Some(data), _) => self
                    .bus
                    .bus_write(hart, paddr, &data[done..done + n], true)
                    .is_ok(),
                (None, Some(buf)) => self.bus.bus_read(paddr, &mut buf[done..done + n], true).is_ok(),
                (None, None) => false,
            };
            if !ok {
                return false;
            }
            addr += n as u64;
            done += n;
            len -= n;
        }
        true
    }
}

impl DebugTarget for Machine {
    fn num_harts(&self) -> usize {
        self.harts.len()
    }

    fn xlen_bits(&self) -> u32 {
        self.harts[0].xlen.bits()
    }

    fn read_register(&mut self, hart: usize, reg: usize) -> Option<u64> {
        let hart = self.harts.get(hart)?;
        match reg {
            0..=31 => Some(hart.regs.read(reg)),
            32 => Some(hart.pc),
            _ => None,
        }
    }

    fn write_register(&mut self, hart: usize, reg: usize, value: u64) -> bool {
        let Some(hart) = self.harts.get_mut(hart) else {
            return false;
        };
        let value = hart.xlen.canonicalize(value);
        match reg {
            0..=31 => {
                hart.regs.write(reg, value);
                true
            }
            32 => {
                hart.pc = value;
                true
            }
            _ => false,
        }
    }

    fn read_memory(&mut self, hart: usize, addr: u64, buf: &mut [u8]) -> bool {
        if hart >= self.harts.len() {
            return false;
        }
        let len = buf.len();
        self.debug_mem_op(hart, addr, len, None, Some(buf))
    }

    fn write_memory(&mut self, hart: usize, addr: u64, data: &[u8]) -> bool {
        if hart >= self.harts.len() {
            return false;
        }
        self.debug_mem_op(hart, addr, data.len(), Some(data), None)
    }

    fn insert_breakpoint(&mut self, hart: usize, addr: u64) {
        if let Some(hart) = self.harts.get_mut(hart) {
            hart.breakpoints.insert(addr);
        }
    }

    fn remove_breakpoint(&mut self, hart: usize, addr: u64) {
        if let Some(hart) = self.harts.get_mut(hart) {
            hart.breakpoints.remove(&addr);
        }
    }

    fn run_harts(&mut self, harts: &[usize], single_step: bool) -> StopReason {
        use rivet_cpu_core::RunExit;

        // Re-arming a stopped hart is idempotent for repeated continues.
        for &i in harts {
            if self.harts[i].status == CoreExecStatus::HitBreakpoint {
                self.harts[i].status = CoreExecStatus::Runnable;
            }
        }

        if single_step {
            let i = harts[0];
            if let Some(exit) = self.harts[i].step(&mut self.bus) {
                if exit == RunExit::Ecall {
                    self.service_ecall(i);
                }
            }
            let now = self.harts[i].keeper.now_ns();
            if now > self.bus.now_ns {
                self.bus.now_ns = now;
            }
            self.pump_devices();
            if self.harts[i].status == CoreExecStatus::Terminated {
                return StopReason::Exited {
                    hart: i,
                    code: self.sys.exit_code as u8,
                };
            }
            return StopReason::Breakpoint { hart: i };
        }

        loop {
            for &i in harts {
                if self.harts[i].status == CoreExecStatus::Terminated {
                    return StopReason::Exited {
                        hart: i,
                        code: self.sys.exit_code as u8,
                    };
                }
                match self.harts[i].run(&mut self.bus) {
                    RunExit::Breakpoint => {
                        self.pump_devices();
                        return StopReason::Breakpoint { hart: i };
                    }
                    RunExit::Terminated => {
                        return StopReason::Exited {
                            hart: i,
                            code: self.sys.exit_code as u8,
                        }
                    }
                    RunExit::Ecall => self.service_ecall(i),
                    RunExit::QuantumSync | RunExit::Wfi => {}
                }
                let now = self.harts[i].keeper.now_ns();
                if now > self.bus.now_ns {
                    self.bus.now_ns = now;
                }
                self.harts[i].keeper.mark_synced();
                self.pump_devices();
            }
        }
    }

    fn detach(&mut self) {
        self.debug_release();
    }
}
