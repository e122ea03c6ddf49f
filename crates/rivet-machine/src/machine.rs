use rivet_cpu_core::{CoreExecStatus, Hart, HartConfig, RunExit};
use rivet_isa::Xlen;
use rivet_mmu::AdUpdatePolicy;
use thiserror::Error;

use crate::bus::{IrqEvent, SystemBus};
use crate::loader::{LoadedImage, LoaderError};
use crate::syscall::SyscallHandler;

#[derive(Debug, Error)]
pub enum MachineError {
    #[error(transparent)]
    Loader(#[from] LoaderError),
    #[error("hart {hart} hit a breakpoint at pc {pc:#x} without a debugger attached")]
    UnexpectedBreakpoint { hart: usize, pc: u64 },
    #[error("all harts parked in WFI with no pending timer deadline")]
    Deadlock,
}

/// Construction parameters; the defaults mirror the platform's stock
/// memory map (RAM at zero, 32 MiB).
#[derive(Debug, Clone)]
pub struct MachineConfig {
    pub mem_start: u64,
    pub mem_size: usize,
    pub num_harts: usize,
    pub num_irq_sources: usize,
    pub e_base: bool,
    pub intercept_syscalls: bool,
    pub trace: bool,
    pub quantum_ns: u64,
    pub entry_point: Option<u64>,
    pub use_instr_dmi: bool,
    pub use_data_dmi: bool,
}

impl Default for MachineConfig {
    fn default() -> Self {
        MachineConfig {
            mem_start: 0,
            mem_size: 32 * 1024 * 1024,
            num_harts: 1,
            num_irq_sources: 64,
            e_base: false,
            intercept_syscalls: true,
            trace: false,
            quantum_ns: rivet_cpu_core::DEFAULT_QUANTUM_NS,
            entry_point: None,
            use_instr_dmi: false,
            use_data_dmi: false,
        }
    }
}

/// The assembled platform: harts, interconnect, syscall proxy and the
/// cooperative driver that schedules them.
pub struct Machine {
    pub harts: Vec<Hart>,
    pub bus: SystemBus,
    pub sys: SyscallHandler,
    pub mem_start: u64,
    pub begin_signature: Option<u64>,
    pub end_signature: Option<u64>,
    global_ns: u64,
}

impl Machine {
    pub fn new(config: &MachineConfig, image: &LoadedImage) -> Result<Self, MachineError> {
        let mut bus = SystemBus::new(
            config.mem_start,
            config.mem_size,
            config.num_harts,
            config.num_irq_sources,
        );
        bus.set_instr_dmi(config.use_instr_dmi);
        bus.set_data_dmi(config.use_data_dmi);

        for rec in &image.records {
            let offset = rec.paddr.wrapping_sub(config.mem_start);
            if !bus.ram.load_data(&rec.data, offset) {
                return Err(LoaderError::SegmentOutOfRange {
                    paddr: rec.paddr,
                    memsz: rec.memsz,
                }
                .into());
            }
            let tail = (rec.memsz - rec.filesz) as usize;
            if tail > 0 && !bus.ram.load_zero(offset + rec.filesz, tail) {
                return Err(LoaderError::SegmentOutOfRange {
                    paddr: rec.paddr,
                    memsz: rec.memsz,
                }
                .into());
            }
        }

        let entry = config.entry_point.unwrap_or(image.entry);
        let sp = (config.mem_start + config.mem_size as u64) & !0xf;
        let hart_config = HartConfig {
            xlen: image.xlen,
            e_base: config.e_base,
            intercept_syscalls: config.intercept_syscalls,
            trace: config.trace,
            quantum_ns: config.quantum_ns,
            ad_policy: AdUpdatePolicy::AutoSet,
        };
        let harts = (0..config.num_harts)
            .map(|id| {
                let mut hart = Hart::new(id, &hart_config);
                hart.init(entry, sp);
                hart
            })
            .collect();

        Ok(Machine {
            harts,
            bus,
            sys: SyscallHandler::new(image.xlen, config.mem_start, image.heap_base),
            mem_start: config.mem_start,
            begin_signature: image.begin_signature,
            end_signature: image.end_signature,
            global_ns: 0,
        })
    }

    pub fn xlen(&self) -> Xlen {
        self.harts[0].xlen
    }

    /// Deliver queued interrupt-line changes to the harts.
    pub(crate) fn apply_irq_events(&mut self) {
        for ev in self.bus.take_irq_events() {
            match ev {
                IrqEvent::Timer { hart, level } => self.harts[hart].trigger_timer_interrupt(level),
                IrqEvent::Software { hart, level } => {
                    self.harts[hart].trigger_software_interrupt(level)
                }
                IrqEvent::External { hart, level } => {
                    self.harts[hart].trigger_external_interrupt(level)
                }
            }
        }
    }

    /// Service an intercepted ECALL on hart `i`.
    pub(crate) fn service_ecall(&mut self, i: usize) {
        use rivet_cpu_core::{REG_A0, REG_A1, REG_A2, REG_A3, REG_A7};
        let regs = &self.harts[i].regs;
        let (n, a0, a1, a2, a3) = (
            regs.read(REG_A7),
            regs.read(REG_A0),
            regs.read(REG_A1),
            regs.read(REG_A2),
            regs.read(REG_A3),
        );
        let ret = self.sys.execute(&mut self.bus.ram, n, a0, a1, a2, a3);
        let xlen = self.harts[i].xlen;
        self.harts[i].regs.write(REG_A0, xlen.canonicalize(ret as u64));

        if self.sys.shall_exit {
            for hart in &mut self.harts {
                hart.status = CoreExecStatus::Terminated;
            }
        }
    }

    fn fold_time(&mut self, i: usize) {
        let now = self.harts[i].keeper.now_ns();
        if now > self.global_ns {
            self.global_ns = now;
        }
        self.harts[i].keeper.mark_synced();
        if self.global_ns > self.bus.now_ns {
            self.bus.now_ns = self.global_ns;
        }
    }

    pub(crate) fn pump_devices(&mut self) {
        self.bus.process_timers();
        self.apply_irq_events();
    }

    /// Free-running driver: round-robin quanta across runnable harts,
    /// fast-forwarding over all-WFI stretches. Returns the guest exit
    /// code on a graceful exit.
    pub fn run(&mut self) -> Result<i32, MachineError> {
        loop {
            for i in 0..self.harts.len() {
                if self.harts[i].status != CoreExecStatus::Runnable {
                    continue;
                }
                let hart_now = self.harts[i].keeper.now_ns();
                if hart_now > self.bus.now_ns {
                    self.bus.now_ns = hart_now;
                }

                match self.harts[i].run(&mut self.bus) {
                    RunExit::QuantumSync | RunExit::Wfi | RunExit::Terminated => {
                        self.fold_time(i)
                    }
                    RunExit::Ecall => {
                        self.fold_time(i);
                        self.service_ecall(i);
                    }
                    RunExit::Breakpoint => {
                        return Err(MachineError::UnexpectedBreakpoint {
                            hart: i,
                            pc: self.harts[i].pc,
                        })
                    }
                }
                self.pump_devices();
            }

            let mut all_done = true;
            let mut all_blocked = true;
            for hart in &self.harts {
                if hart.status == CoreExecStatus::Terminated {
                    continue;
                }
                all_done = false;
                if !hart.in_wfi() {
                    all_blocked = false;
                }
            }
            if all_done {
                return Ok(self.sys.exit_code);
            }
            if all_blocked {
                self.fast_forward()?;
            }
        }
    }

    /// Every runnable hart is parked in WFI: jump simulated time to the
    /// earliest CLINT deadline and let it fire.
    fn fast_forward(&mut self) -> Result<(), MachineError> {
        let next = self
            .bus
            .clint
            .next_deadline_ns()
            .ok_or(MachineError::Deadlock)?;
        if next > self.global_ns {
            self.global_ns = next;
        }
        self.bus.now_ns = self.global_ns;
        for hart in &mut self.harts {
            hart.keeper.advance_to(self.global_ns);
        }
        self.pump_devices();
        Ok(())
    }

    /// Final report, as printed after simulation.
    pub fn show(&self) {
        for hart in &self.harts {
            println!("=== hart {} ===", hart.hart_id);
            hart.show();
        }
        println!(
            "max-heap (c-lib malloc, bytes) = {}",
            self.sys.max_heap_consumption()
        );
    }
}
