use std::collections::HashSet;

use rivet_isa::{
    decode, uses_reg_above_e_limit, ExceptionCause, Instruction, InterruptCode, MemAccessType,
    Opcode, PrivilegeMode, Trap, Xlen, CSR_CYCLE, CSR_CYCLEH, CSR_INSTRET, CSR_INSTRETH,
    CSR_MCYCLE, CSR_MCYCLEH, CSR_MINSTRET, CSR_MINSTRETH, CSR_SATP, CSR_TIME, CSR_TIMEH,
};
use rivet_mem::{BusError, BusPort};
use rivet_mmu::{AdUpdatePolicy, Mmu, PteMemory, TranslationCtx, VmMode};

use crate::csrs::Csrs;
use crate::quantum::{QuantumKeeper, DEFAULT_CYCLE_TIME_NS};
use crate::regs::RegFile;

/// What the interpreter plugs into: the bus transport, plus the one CLINT
/// service a CSR read needs.
pub trait HartBus: BusPort {
    /// Clamp `mtime` forward to the caller's simulated time and return it.
    /// The hart passes its own local clock, which may run ahead of the
    /// globally synced one.
    fn update_and_get_mtime(&mut self, now_ns: u64) -> u64;

    /// Instruction fetch; a separate hook so the platform can satisfy it
    /// from a direct-memory window.
    fn fetch(&mut self, paddr: u64) -> Result<u32, BusError> {
        let mut buf = [0u8; 4];
        self.bus_read(paddr, &mut buf, false)?;
        Ok(u32::from_le_bytes(buf))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreExecStatus {
    Runnable,
    HitBreakpoint,
    Terminated,
}

/// Why control came back from [`Hart::run`]. These are the only suspension
/// points a hart has.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    /// The quantum keeper owes the driver a sync.
    QuantumSync,
    /// Parked in WFI until an interrupt line pokes the hart.
    Wfi,
    /// EBREAK, or a debugger breakpoint on the next pc.
    Breakpoint,
    /// ECALL with syscall interception on; a7/a0..a3 hold the request.
    Ecall,
    Terminated,
}

/// Construction-time configuration of a hart.
#[derive(Debug, Clone)]
pub struct HartConfig {
    pub xlen: Xlen,
    pub e_base: bool,
    pub intercept_syscalls: bool,
    pub trace: bool,
    pub quantum_ns: u64,
    pub ad_policy: AdUpdatePolicy,
}

impl Default for HartConfig {
    fn default() -> Self {
        HartConfig {
            xlen: Xlen::Rv32,
            e_base: false,
            intercept_syscalls: true,
            trace: false,
            quantum_ns: crate::quantum::DEFAULT_QUANTUM_NS,
            ad_policy: AdUpdatePolicy::AutoSet,
        }
    }
}

/// One hardware thread: registers, CSRs, MMU, local clock and the
/// interpreter that advances them.
pub struct Hart {
    pub hart_id: usize,
    pub xlen: Xlen,
    e_base: bool,
    intercept_syscalls: bool,
    trace: bool,

    pub regs: RegFile,
    pub pc: u64,
    pub last_pc: u64,
    pub csrs: Csrs,
    pub prv: PrivilegeMode,
    pub mmu: Mmu,
    pub keeper: QuantumKeeper,

    pub status: CoreExecStatus,
    pub breakpoints: HashSet<u64>,
    pub debug_mode: bool,
    block_on_wfi: bool,
    in_wfi: bool,
    wake_pending: bool,
    pending_ecall: bool,

    cycle_ns: u64,
    mem_access_cycles: u64,
    mul_div_cycles: u64,
    mmu_access_delay_ns: u64,
}

struct PteBus<'a, B: BusPort> {
    bus: &'a mut B,
    hart: usize,
    debug: bool,
}

impl<B: BusPort> PteMemory for PteBus<'_, B> {
    fn load_pte32(&mut self, paddr: u64) -> Option<u32> {
        let mut buf = [0u8; 4];
        self.bus.bus_read(paddr, &mut buf, self.debug).ok()?;
        Some(u32::from_le_bytes(buf))
    }

    fn load_pte64(&mut self, paddr: u64) -> Option<u64> {
        let mut buf = [0u8; 8];
        self.bus.bus_read(paddr, &mut buf, self.debug).ok()?;
        Some(u64::from_le_bytes(buf))
    }

    fn store_pte32(&mut self, paddr: u64, value: u32) -> bool {
        if self.debug {
            return true;
        }
        self.bus
            .bus_write(self.hart, paddr, &value.to_le_bytes(), false)
            .is_ok()
    }
}

impl Hart {
    pub fn new(hart_id: usize, config: &HartConfig) -> Self {
        Hart {
            hart_id,
            xlen: config.xlen,
            e_base: config.e_base,
            intercept_syscalls: config.intercept_syscalls,
            trace: config.trace,
            regs: RegFile::new(),
            pc: 0,
            last_pc: 0,
            csrs: Csrs::new(config.xlen, hart_id as u64, config.e_base),
            prv: PrivilegeMode::Machine,
            mmu: Mmu::new(config.xlen, config.ad_policy),
            keeper: QuantumKeeper::new(config.quantum_ns),
            status: CoreExecStatus::Runnable,
            breakpoints: HashSet::new(),
            debug_mode: false,
            block_on_wfi: true,
            in_wfi: false,
            wake_pending: false,
            pending_ecall: false,
            cycle_ns: DEFAULT_CYCLE_TIME_NS,
            mem_access_cycles: 4,
            mul_div_cycles: 8,
            mmu_access_delay_ns: 3 * DEFAULT_CYCLE_TIME_NS,
        }
    }

    /// Reset vector and initial stack pointer.
    pub fn init(&mut self, entry: u64, sp: u64) {
        self.pc = self.canon(entry);
        self.last_pc = self.pc;
        self.regs.write(crate::regs::REG_SP, self.canon(sp));
    }

    /// Whether WFI actually parks the hart. The GDB stub turns this off so
    /// resumed harts always make progress to their stop events.
    pub fn set_block_on_wfi(&mut self, block: bool) {
        self.block_on_wfi = block;
    }

    pub fn in_wfi(&self) -> bool {
        self.in_wfi
    }

    /// Any interrupt-line edge (either direction) and any debugger resume
    /// pokes the hart out of WFI; the interpreter re-evaluates pending
    /// state itself. Wakes delivered while the hart is running are lost,
    /// like an event notification nobody waits on.
    pub fn notify_wake(&mut self) {
        if self.in_wfi {
            self.wake_pending = true;
        }
    }

    pub fn trigger_external_interrupt(&mut self, level: bool) {
        self.csrs.set_mip_meip(level);
        self.notify_wake();
    }

    pub fn trigger_timer_interrupt(&mut self, level: bool) {
        self.csrs.set_mip_mtip(level);
        self.notify_wake();
    }

    pub fn trigger_software_interrupt(&mut self, level: bool) {
        self.csrs.set_mip_msip(level);
        self.notify_wake();
    }

    pub fn has_pending_enabled_interrupts(&self) -> bool {
        self.csrs.mstatus_mie()
            && ((self.csrs.mie_meie() && self.csrs.mip_meip())
                || (self.csrs.mie_msie() && self.csrs.mip_msip())
                || (self.csrs.mie_mtie() && self.csrs.mip_mtip()))
    }

    /// Run until the next suspension point.
    pub fn run<B: HartBus>(&mut self, bus: &mut B) -> RunExit {
        loop {
            if let Some(exit) = self.step(bus) {
                return exit;
            }
            if self.keeper.need_sync() {
                return RunExit::QuantumSync;
            }
        }
    }

    /// Execute at most one instruction. `None` means the hart retired it
    /// and can keep going.
    pub fn step<B: HartBus>(&mut self, bus: &mut B) -> Option<RunExit> {
        match self.status {
            CoreExecStatus::Terminated => return Some(RunExit::Terminated),
            CoreExecStatus::HitBreakpoint => return Some(RunExit::Breakpoint),
            CoreExecStatus::Runnable => {}
        }
        if self.in_wfi {
            if !self.wake_pending && !self.has_pending_enabled_interrupts() {
                return Some(RunExit::Wfi);
            }
            self.in_wfi = false;
            self.wake_pending = false;
            if self.has_pending_enabled_interrupts() {
                // The WFI completes at the wake: the trap goes first and
                // mepc holds the instruction after the wfi.
                self.switch_to_trap_handler();
                self.keeper.inc(self.cycle_ns);
                return None;
            }
        }

        self.run_step(bus);

        if self.pending_ecall {
            self.pending_ecall = false;
            return Some(RunExit::Ecall);
        }
        if self.in_wfi {
            return Some(RunExit::Wfi);
        }
        match self.status {
            CoreExecStatus::Terminated => Some(RunExit::Terminated),
            CoreExecStatus::HitBreakpoint => Some(RunExit::Breakpoint),
            CoreExecStatus::Runnable => None,
        }
    }

    fn run_step<B: HartBus>(&mut self, bus: &mut B) {
        debug_assert_eq!(self.regs.read(0), 0);
        self.last_pc = self.pc;
        match self.exec_step(bus) {
            Ok(op) => {
                if self.has_pending_enabled_interrupts() {
                    self.switch_to_trap_handler();
                }
                if self.debug_mode && self.breakpoints.contains(&self.pc) {
                    self.status = CoreExecStatus::HitBreakpoint;
                }
                self.performance_and_sync_update(op);
            }
            Err(trap) => {
                self.enter_trap(trap);
                self.keeper.inc(self.cycle_ns);
            }
        }
    }

    /// End-of-run state report.
    pub fn show(&self) {
        println!("simulation time: {} ns", self.keeper.now_ns());
        self.regs.show();
        println!("pc = {:#x}", self.pc);
        println!("num-instr = {}", self.csrs.minstret);
    }

    // -- trap machinery -----------------------------------------------------

    fn trap_context_switch(&mut self) {
        let mie = self.csrs.mstatus_mie();
        self.csrs.set_mstatus_mpie(mie);
        self.csrs.set_mstatus_mie(false);
        self.csrs.set_mstatus_mpp(self.prv);
        self.prv = PrivilegeMode::Machine;
        self.pc = self.csrs.mtvec_base();
    }

    /// Record a synchronous trap and redirect to the handler.
    pub fn enter_trap(&mut self, trap: Trap) {
        tracing::debug!(
            hart = self.hart_id,
            cause = ?trap.cause,
            tval = format_args!("{:#x}", trap.tval),
            pc = format_args!("{:#x}", self.last_pc),
            "guest trap"
        );
        self.csrs.set_mcause_exception(trap.cause);
        self.csrs.mtval = trap.tval;
        self.csrs.mepc = self.last_pc;
        self.trap_context_switch();
    }

    /// Deliver the highest-priority pending enabled interrupt.
    fn switch_to_trap_handler(&mut self) {
        let code = if self.csrs.mie_meie() && self.csrs.mip_meip() {
            InterruptCode::MachineExternal
        } else if self.csrs.mie_msie() && self.csrs.mip_msip() {
            InterruptCode::MachineSoftware
        } else {
            InterruptCode::MachineTimer
        };
        self.csrs.set_mcause_interrupt(code.code());
        self.csrs.mtval = 0;
        // Interrupts resume at the next instruction; traps re-execute.
        self.csrs.mepc = self.pc;
        self.trap_context_switch();
    }

    fn return_from_trap_handler(&mut self) {
        self.pc = self.canon(self.csrs.mepc);
        let mpie = self.csrs.mstatus_mpie();
        self.csrs.set_mstatus_mie(mpie);
        self.csrs.set_mstatus_mpie(true);
        self.prv = self.csrs.mstatus_mpp();
        self.csrs.set_mstatus_mpp(PrivilegeMode::User);
    }

    fn performance_and_sync_update(&mut self, op: Opcode) {
        self.csrs.minstret = self.csrs.minstret.wrapping_add(1);
        let cycles = if op.is_memory_access() {
            self.mem_access_cycles
        } else if op.is_mul_div() {
            self.mul_div_cycles
        } else {
            1
        };
        self.keeper.inc(cycles * self.cycle_ns);
    }

    // -- address helpers ----------------------------------------------------

    #[inline]
    fn canon(&self, v: u64) -> u64 {
        self.xlen.canonicalize(v)
    }

    #[inline]
    fn x(&self, idx: usize) -> u64 {
        self.regs.read(idx)
    }

    #[inline]
    fn set_x(&mut self, idx: usize, v: u64) {
        self.regs.write(idx, self.canon(v));
    }

    /// Effective address arithmetic: wraps at the architectural width and
    /// zero-extends to the physical space on RV32.
    #[inline]
    fn eaddr(&self, base: u64, offset: i64) -> u64 {
        let a = base.wrapping_add(offset as u64);
        match self.xlen {
            Xlen::Rv32 => a as u32 as u64,
            Xlen::Rv64 => a,
        }
    }

    fn translation_ctx(&self) -> TranslationCtx {
        TranslationCtx {
            vm_mode: self.csrs.vm_mode,
            root_ppn: self.csrs.satp_ppn(),
            prv: self.prv,
            mprv: self.csrs.mstatus_mprv(),
            mpp: self.csrs.mstatus_mpp(),
            sum: self.csrs.mstatus_sum(),
            mxr: self.csrs.mstatus_mxr(),
        }
    }

    fn translate<B: HartBus>(
        &mut self,
        bus: &mut B,
        vaddr: u64,
        ty: MemAccessType,
    ) -> Result<u64, Trap> {
        if self.csrs.vm_mode == VmMode::Bare {
            return Ok(vaddr);
        }
        let ctx = self.translation_ctx();
        let effective = if ty != MemAccessType::Fetch && ctx.mprv {
            ctx.mpp
        } else {
            ctx.prv
        };
        if effective == PrivilegeMode::Machine {
            return Ok(vaddr);
        }
        self.keeper.inc(self.mmu_access_delay_ns);
        let mut pte_bus = PteBus {
            bus,
            hart: self.hart_id,
            debug: false,
        };
        self.mmu.translate(vaddr, ty, &ctx, &mut pte_bus)
    }

    /// Debugger-path translation: no TLB fill, no A/D update, no timing.
    pub fn translate_for_debug<B: BusPort>(
        &self,
        bus: &mut B,
        vaddr: u64,
        ty: MemAccessType,
    ) -> Result<u64, Trap> {
        let ctx = self.translation_ctx();
        let mut pte_bus = PteBus {
            bus,
            hart: self.hart_id,
            debug: true,
        };
        self.mmu.translate_dbg(vaddr, ty, &ctx, &mut pte_bus)
    }

    fn load<B: HartBus>(&mut self, bus: &mut B, vaddr: u64, len: usize) -> Result<u64, Trap> {
        let paddr = self.translate(bus, vaddr, MemAccessType::Load)?;
        let mut buf = [0u8; 8];
        bus.bus_read(paddr, &mut buf[..len], false)
            .map_err(|_| Trap::new(ExceptionCause::LoadAccessFault, vaddr))?;
        Ok(u64::from_le_bytes(buf))
    }

    fn store<B: HartBus>(
        &mut self,
        bus: &mut B,
        vaddr: u64,
        len: usize,
        value: u64,
    ) -> Result<(), Trap> {
        let paddr = self.translate(bus, vaddr, MemAccessType::Store)?;
        bus.bus_write(self.hart_id, paddr, &value.to_le_bytes()[..len], false)
            .map_err(|_| Trap::new(ExceptionCause::StoreAmoAccessFault, vaddr))
    }

    // -- shift/arith helpers ------------------------------------------------

    fn sll(&self, v: u64, sh: u32) -> u64 {
        self.canon(v.wrapping_shl(sh))
    }

    fn srl(&self, v: u64, sh: u32) -> u64 {
        match self.xlen {
            Xlen::Rv32 => ((v as u32) >> sh) as i32 as i64 as u64,
            Xlen::Rv64 => v >> sh,
        }
    }

    fn sra(&self, v: u64, sh: u32) -> u64 {
        match self.xlen {
            Xlen::Rv32 => (((v as i32) >> sh) as i64) as u64,
            Xlen::Rv64 => ((v as i64) >> sh) as u64,
        }
    }

    fn reg_shamt(&self, rs2: usize) -> u32 {
        (self.x(rs2) & self.xlen.shamt_mask()) as u32
    }

    // -- CSR access ---------------------------------------------------------

    fn csr_read<B: HartBus>(&mut self, bus: &mut B, addr: u32, raw: u32) -> Result<u64, Trap> {
        let rv32 = self.xlen == Xlen::Rv32;
        let v = match addr {
            CSR_TIME => bus.update_and_get_mtime(self.keeper.now_ns()),
            CSR_TIMEH if rv32 => bus.update_and_get_mtime(self.keeper.now_ns()) >> 32,
            CSR_CYCLE | CSR_MCYCLE => self.keeper.now_ns() / self.cycle_ns,
            CSR_CYCLEH | CSR_MCYCLEH if rv32 => (self.keeper.now_ns() / self.cycle_ns) >> 32,
            CSR_INSTRET | CSR_MINSTRET => self.csrs.minstret,
            CSR_INSTRETH | CSR_MINSTRETH if rv32 => self.csrs.minstret >> 32,
            _ => {
                return self
                    .csrs
                    .read(addr)
                    .ok_or_else(|| Trap::new(ExceptionCause::IllegalInstr, raw as u64))
            }
        };
        Ok(self.canon(v))
    }

    fn csr_write(&mut self, addr: u32, value: u64, raw: u32) -> Result<(), Trap> {
        match addr {
            CSR_MINSTRET => self.csrs.minstret = value,
            // Cycle counts are derived from the quantum keeper; writes are
            // accepted and dropped.
            CSR_MCYCLE => {}
            _ => {
                self.csrs.write(addr, value, raw)?;
            }
        }
        // Any satp write invalidates cached translations, even one whose
        // mode was rejected.
        if addr == CSR_SATP {
            self.mmu.flush_tlb();
        }
        Ok(())
    }

    // -- AMO helpers --------------------------------------------------------

    fn amo_w<B: HartBus>(
        &mut self,
        bus: &mut B,
        instr: Instruction,
        f: impl Fn(i32, i32) -> i32,
    ) -> Result<(), Trap> {
        let vaddr = self.eaddr(self.x(instr.rs1()), 0);
        if vaddr % 4 != 0 {
            return Err(Trap::new(ExceptionCause::StoreAmoAddrMisaligned, vaddr));
        }
        bus.lock(self.hart_id);
        let result = self.amo_w_body(bus, instr, vaddr, f);
        bus.unlock(self.hart_id);
        result
    }

    fn amo_w_body<B: HartBus>(
        &mut self,
        bus: &mut B,
        instr: Instruction,
        vaddr: u64,
        f: impl Fn(i32, i32) -> i32,
    ) -> Result<(), Trap> {
        let paddr = self.translate(bus, vaddr, MemAccessType::Store)?;
        let mut buf = [0u8; 4];
        bus.bus_read(paddr, &mut buf, false)
            .map_err(|_| Trap::new(ExceptionCause::StoreAmoAccessFault, vaddr))?;
        let old = i32::from_le_bytes(buf);
        let new = f(old, self.x(instr.rs2()) as i32);
        bus.bus_write(self.hart_id, paddr, &new.to_le_bytes(), false)
            .map_err(|_| Trap::new(ExceptionCause::StoreAmoAccessFault, vaddr))?;
        self.set_x(instr.rd(), old as i64 as u64);
        Ok(())
    }

    fn amo_d<B: HartBus>(
        &mut self,
        bus: &mut B,
        instr: Instruction,
        f: impl Fn(i64, i64) -> i64,
    ) -> Result<(), Trap> {
        let vaddr = self.eaddr(self.x(instr.rs1()), 0);
        if vaddr % 8 != 0 {
            return Err(Trap::new(ExceptionCause::StoreAmoAddrMisaligned, vaddr));
        }
        bus.lock(self.hart_id);
        let result = self.amo_d_body(bus, instr, vaddr, f);
        bus.unlock(self.hart_id);
        result
    }

    fn amo_d_body<B: HartBus>(
        &mut self,
        bus: &mut B,
        instr: Instruction,
        vaddr: u64,
        f: impl Fn(i64, i64) -> i64,
    ) -> Result<(), Trap> {
        let paddr = self.translate(bus, vaddr, MemAccessType::Store)?;
        let mut buf = [0u8; 8];
        bus.bus_read(paddr, &mut buf, false)
            .map_err(|_| Trap::new(ExceptionCause::StoreAmoAccessFault, vaddr))?;
        let old = i64::from_le_bytes(buf);
        let new = f(old, self.x(instr.rs2()) as i64);
        bus.bus_write(self.hart_id, paddr, &new.to_le_bytes(), false)
            .map_err(|_| Trap::new(ExceptionCause::StoreAmoAccessFault, vaddr))?;
        self.set_x(instr.rd(), old as u64);
        Ok(())
    }

    // -- the interpreter ----------------------------------------------------

    fn exec_step<B: HartBus>(&mut self, bus: &mut B) -> Result<Opcode, Trap> {
        if self.pc % 4 != 0 {
            return Err(Trap::new(ExceptionCause::InstrAddrMisaligned, self.pc));
        }
        let fetch_paddr = self.translate(bus, self.pc, MemAccessType::Fetch)?;
        let word = bus
            .fetch(fetch_paddr)
            .map_err(|_| Trap::new(ExceptionCause::InstrAccessFault, self.pc))?;
        let instr = Instruction(word);
        let op = decode(word, self.xlen);

        if op == Opcode::Undef {
            return Err(Trap::new(ExceptionCause::IllegalInstr, word as u64));
        }
        if self.e_base && uses_reg_above_e_limit(op, instr) {
            return Err(Trap::new(ExceptionCause::IllegalInstr, word as u64));
        }

        self.pc = self.eaddr(self.pc, 4);

        let rd = instr.rd();
        let rs1 = instr.rs1();
        let rs2 = instr.rs2();

        if self.trace {
            tracing::info!(
                target: "rivet::retire",
                hart = self.hart_id,
                pc = format_args!("{:#x}", self.last_pc),
                op = op.mnemonic(),
                rd = RegFile::abi_name(rd),
                rs1 = RegFile::abi_name(rs1),
                rs2 = RegFile::abi_name(rs2),
                raw = format_args!("{word:#010x}"),
            );
        }

        match op {
            Opcode::Addi => self.set_x(rd, self.x(rs1).wrapping_add(instr.imm_i() as u64)),
            Opcode::Slti => {
                self.set_x(rd, ((self.x(rs1) as i64) < instr.imm_i()) as u64);
            }
            Opcode::Sltiu => {
                self.set_x(rd, (self.x(rs1) < instr.imm_i() as u64) as u64);
            }
            Opcode::Xori => self.set_x(rd, self.x(rs1) ^ instr.imm_i() as u64),
            Opcode::Ori => self.set_x(rd, self.x(rs1) | instr.imm_i() as u64),
            Opcode::Andi => self.set_x(rd, self.x(rs1) & instr.imm_i() as u64),

            Opcode::Add => self.set_x(rd, self.x(rs1).wrapping_add(self.x(rs2))),
            Opcode::Sub => self.set_x(rd, self.x(rs1).wrapping_sub(self.x(rs2))),
            Opcode::Sll => self.set_x(rd, self.sll(self.x(rs1), self.reg_shamt(rs2))),
            Opcode::Slt => self.set_x(rd, ((self.x(rs1) as i64) < (self.x(rs2) as i64)) as u64),
            Opcode::Sltu => self.set_x(rd, (self.x(rs1) < self.x(rs2)) as u64),
            Opcode::Xor => self.set_x(rd, self.x(rs1) ^ self.x(rs2)),
            Opcode::Srl => self.set_x(rd, self.srl(self.x(rs1), self.reg_shamt(rs2))),
            Opcode::Sra => self.set_x(rd, self.sra(self.x(rs1), self.reg_shamt(rs2))),
            Opcode::Or => self.set_x(rd, self.x(rs1) | self.x(rs2)),
            Opcode::And => self.set_x(rd, self.x(rs1) & self.x(rs2)),

            Opcode::Slli => self.set_x(rd, self.sll(self.x(rs1), instr.shamt(self.xlen))),
            Opcode::Srli => self.set_x(rd, self.srl(self.x(rs1), instr.shamt(self.xlen))),
            Opcode::Srai => self.set_x(rd, self.sra(self.x(rs1), instr.shamt(self.xlen))),

            Opcode::Lui => self.set_x(rd, instr.imm_u() as u64),
            Opcode::Auipc => self.set_x(rd, self.last_pc.wrapping_add(instr.imm_u() as u64)),

            Opcode::Jal => {
                let target = self.eaddr(self.last_pc, instr.imm_j());
                if target % 4 != 0 {
                    return Err(Trap::new(ExceptionCause::InstrAddrMisaligned, target));
                }
                self.set_x(rd, self.pc);
                self.pc = target;
            }
            Opcode::Jalr => {
                let target = self.eaddr(self.x(rs1), instr.imm_i()) & !1;
                if target % 4 != 0 {
                    return Err(Trap::new(ExceptionCause::InstrAddrMisaligned, target));
                }
                let link = self.pc;
                self.pc = target;
                self.set_x(rd, link);
            }

            Opcode::Beq | Opcode::Bne | Opcode::Blt | Opcode::Bge | Opcode::Bltu | Opcode::Bgeu => {
                let a = self.x(rs1);
                let b = self.x(rs2);
                let taken = match op {
                    Opcode::Beq => a == b,
                    Opcode::Bne => a != b,
                    Opcode::Blt => (a as i64) < (b as i64),
                    Opcode::Bge => (a as i64) >= (b as i64),
                    Opcode::Bltu => a < b,
                    Opcode::Bgeu => a >= b,
                    _ => unreachable!(),
                };
                if taken {
                    let target = self.eaddr(self.last_pc, instr.imm_b());
                    if target % 4 != 0 {
                        return Err(Trap::new(ExceptionCause::InstrAddrMisaligned, target));
                    }
                    self.pc = target;
                }
            }

            Opcode::Lb => {
                let a = self.eaddr(self.x(rs1), instr.imm_i());
                let v = self.load(bus, a, 1)? as u8 as i8 as i64 as u64;
                self.set_x(rd, v);
            }
            Opcode::Lh => {
                let a = self.eaddr(self.x(rs1), instr.imm_i());
                let v = self.load(bus, a, 2)? as u16 as i16 as i64 as u64;
                self.set_x(rd, v);
            }
            Opcode::Lw => {
                let a = self.eaddr(self.x(rs1), instr.imm_i());
                let v = self.load(bus, a, 4)? as u32 as i32 as i64 as u64;
                self.set_x(rd, v);
            }
            Opcode::Lbu => {
                let a = self.eaddr(self.x(rs1), instr.imm_i());
                let v = self.load(bus, a, 1)?;
                self.set_x(rd, v);
            }
            Opcode::Lhu => {
                let a = self.eaddr(self.x(rs1), instr.imm_i());
                let v = self.load(bus, a, 2)?;
                self.set_x(rd, v);
            }
            Opcode::Lwu => {
                let a = self.eaddr(self.x(rs1), instr.imm_i());
                let v = self.load(bus, a, 4)?;
                self.set_x(rd, v);
            }
            Opcode::Ld => {
                let a = self.eaddr(self.x(rs1), instr.imm_i());
                let v = self.load(bus, a, 8)?;
                self.set_x(rd, v);
            }

            Opcode::Sb => {
                let a = self.eaddr(self.x(rs1), instr.imm_s());
                self.store(bus, a, 1, self.x(rs2))?;
            }
            Opcode::Sh => {
                let a = self.eaddr(self.x(rs1), instr.imm_s());
                self.store(bus, a, 2, self.x(rs2))?;
            }
            Opcode::Sw => {
                let a = self.eaddr(self.x(rs1), instr.imm_s());
                self.store(bus, a, 4, self.x(rs2))?;
            }
            Opcode::Sd => {
                let a = self.eaddr(self.x(rs1), instr.imm_s());
                self.store(bus, a, 8, self.x(rs2))?;
            }

            Opcode::Fence => {}

            Opcode::Ecall => {
                if self.intercept_syscalls {
                    self.pending_ecall = true;
                } else {
                    let cause = match self.prv {
                        PrivilegeMode::User => ExceptionCause::EcallFromU,
                        PrivilegeMode::Supervisor => ExceptionCause::EcallFromS,
                        PrivilegeMode::Machine => ExceptionCause::EcallFromM,
                    };
                    return Err(Trap::new(cause, 0));
                }
            }
            Opcode::Ebreak => self.status = CoreExecStatus::HitBreakpoint,

            Opcode::Csrrw => {
                let addr = instr.csr();
                let old = if rd != 0 {
                    Some(self.csr_read(bus, addr, word)?)
                } else {
                    None
                };
                self.csr_write(addr, self.x(rs1), word)?;
                if let Some(v) = old {
                    self.set_x(rd, v);
                }
            }
            Opcode::Csrrs => {
                let addr = instr.csr();
                let old = self.csr_read(bus, addr, word)?;
                if rs1 != 0 {
                    self.csr_write(addr, old | self.x(rs1), word)?;
                }
                self.set_x(rd, old);
            }
            Opcode::Csrrc => {
                let addr = instr.csr();
                let old = self.csr_read(bus, addr, word)?;
                if rs1 != 0 {
                    self.csr_write(addr, old & !self.x(rs1), word)?;
                }
                self.set_x(rd, old);
            }
            Opcode::Csrrwi => {
                let addr = instr.csr();
                let old = if rd != 0 {
                    Some(self.csr_read(bus, addr, word)?)
                } else {
                    None
                };
                self.csr_write(addr, instr.zimm(), word)?;
                if let Some(v) = old {
                    self.set_x(rd, v);
                }
            }
            Opcode::Csrrsi => {
                let addr = instr.csr();
                let old = self.csr_read(bus, addr, word)?;
                if instr.zimm() != 0 {
                    self.csr_write(addr, old | instr.zimm(), word)?;
                }
                self.set_x(rd, old);
            }
            Opcode::Csrrci => {
                let addr = instr.csr();
                let old = self.csr_read(bus, addr, word)?;
                if instr.zimm() != 0 {
                    self.csr_write(addr, old & !instr.zimm(), word)?;
                }
                self.set_x(rd, old);
            }

            Opcode::Mul => self.set_x(rd, self.x(rs1).wrapping_mul(self.x(rs2))),
            Opcode::Mulh => {
                let v = match self.xlen {
                    Xlen::Rv32 => {
                        let a = self.x(rs1) as i32 as i64;
                        let b = self.x(rs2) as i32 as i64;
                        ((a * b) >> 32) as u64
                    }
                    Xlen::Rv64 => {
                        let a = self.x(rs1) as i64 as i128;
                        let b = self.x(rs2) as i64 as i128;
                        ((a * b) >> 64) as u64
                    }
                };
                self.set_x(rd, v);
            }
            Opcode::Mulhu => {
                let v = match self.xlen {
                    Xlen::Rv32 => {
                        let a = self.x(rs1) as u32 as u64;
                        let b = self.x(rs2) as u32 as u64;
                        (a * b) >> 32
                    }
                    Xlen::Rv64 => {
                        let a = self.x(rs1) as u128;
                        let b = self.x(rs2) as u128;
                        ((a * b) >> 64) as u64
                    }
                };
                self.set_x(rd, v);
            }
            Opcode::Mulhsu => {
                let v = match self.xlen {
                    Xlen::Rv32 => {
                        let a = self.x(rs1) as i32 as i64;
                        let b = self.x(rs2) as u32 as i64;
                        ((a * b) >> 32) as u64
                    }
                    Xlen::Rv64 => {
                        let a = self.x(rs1) as i64 as i128;
                        let b = (self.x(rs2) as u128) as i128;
                        ((a * b) >> 64) as u64
                    }
                };
                self.set_x(rd, v);
            }

            Opcode::Div => {
                let v = match self.xlen {
                    Xlen::Rv32 => {
                        let a = self.x(rs1) as i32;
                        let b = self.x(rs2) as i32;
                        if b == 0 {
                            -1i64 as u64
                        } else if a == i32::MIN && b == -1 {
                            a as i64 as u64
                        } else {
                            (a / b) as i64 as u64
                        }
                    }
                    Xlen::Rv64 => {
                        let a = self.x(rs1) as i64;
                        let b = self.x(rs2) as i64;
                        if b == 0 {
                            -1i64 as u64
                        } else if a == i64::MIN && b == -1 {
                            a as u64
                        } else {
                            (a / b) as u64
                        }
                    }
                };
                self.set_x(rd, v);
            }
            Opcode::Divu => {
                let v = match self.xlen {
                    Xlen::Rv32 => {
                        let a = self.x(rs1) as u32;
                        let b = self.x(rs2) as u32;
                        if b == 0 {
                            u64::MAX
                        } else {
                            (a / b) as u64
                        }
                    }
                    Xlen::Rv64 => {
                        let a = self.x(rs1);
                        let b = self.x(rs2);
                        if b == 0 {
                            u64::MAX
                        } else {
                            a / b
                        }
                    }
                };
                self.set_x(rd, v);
            }
            Opcode::Rem => {
                let v = match self.xlen {
                    Xlen::Rv32 => {
                        let a = self.x(rs1) as i32;
                        let b = self.x(rs2) as i32;
                        if b == 0 {
                            a as i64 as u64
                        } else if a == i32::MIN && b == -1 {
                            0
                        } else {
                            (a % b) as i64 as u64
                        }
                    }
                    Xlen::Rv64 => {
                        let a = self.x(rs1) as i64;
                        let b = self.x(rs2) as i64;
                        if b == 0 {
                            a as u64
                        } else if a == i64::MIN && b == -1 {
                            0
                        } else {
                            (a % b) as u64
                        }
                    }
                };
                self.set_x(rd, v);
            }
            Opcode::Remu => {
                let v = match self.xlen {
                    Xlen::Rv32 => {
                        let a = self.x(rs1) as u32;
                        let b = self.x(rs2) as u32;
                        if b == 0 {
                            a as i32 as i64 as u64
                        } else {
                            (a % b) as u64
                        }
                    }
                    Xlen::Rv64 => {
                        let a = self.x(rs1);
                        let b = self.x(rs2);
                        if b == 0 {
                            a
                        } else {
                            a % b
                        }
                    }
                };
                self.set_x(rd, v);
            }

            // RV64 W-suffixed ALU: operate on the low 32 bits, write the
            // sign-extended result.
            Opcode::Addiw => {
                let v = (self.x(rs1) as i32).wrapping_add(instr.imm_i() as i32);
                self.set_x(rd, v as i64 as u64);
            }
            Opcode::Slliw => {
                let v = (self.x(rs1) as u32).wrapping_shl(instr.shamt(Xlen::Rv32));
                self.set_x(rd, v as i32 as i64 as u64);
            }
            Opcode::Srliw => {
                let v = (self.x(rs1) as u32) >> instr.shamt(Xlen::Rv32);
                self.set_x(rd, v as i32 as i64 as u64);
            }
            Opcode::Sraiw => {
                let v = (self.x(rs1) as i32) >> instr.shamt(Xlen::Rv32);
                self.set_x(rd, v as i64 as u64);
            }
            Opcode::Addw => {
                let v = (self.x(rs1) as i32).wrapping_add(self.x(rs2) as i32);
                self.set_x(rd, v as i64 as u64);
            }
            Opcode::Subw => {
                let v = (self.x(rs1) as i32).wrapping_sub(self.x(rs2) as i32);
                self.set_x(rd, v as i64 as u64);
            }
            Opcode::Sllw => {
                let sh = (self.x(rs2) & 0x1f) as u32;
                self.set_x(rd, ((self.x(rs1) as u32) << sh) as i32 as i64 as u64);
            }
            Opcode::Srlw => {
                let sh = (self.x(rs2) & 0x1f) as u32;
                self.set_x(rd, ((self.x(rs1) as u32) >> sh) as i32 as i64 as u64);
            }
            Opcode::Sraw => {
                let sh = (self.x(rs2) & 0x1f) as u32;
                self.set_x(rd, ((self.x(rs1) as i32) >> sh) as i64 as u64);
            }

            Opcode::Mulw => {
                let v = (self.x(rs1) as i32).wrapping_mul(self.x(rs2) as i32);
                self.set_x(rd, v as i64 as u64);
            }
            Opcode::Divw => {
                let a = self.x(rs1) as i32;
                let b = self.x(rs2) as i32;
                let v = if b == 0 {
                    -1i64 as u64
                } else if a == i32::MIN && b == -1 {
                    a as i64 as u64
                } else {
                    (a / b) as i64 as u64
                };
                self.set_x(rd, v);
            }
            Opcode::Divuw => {
                let a = self.x(rs1) as u32;
                let b = self.x(rs2) as u32;
                let v = if b == 0 {
                    -1i64 as u64
                } else {
                    (a / b) as i32 as i64 as u64
                };
                self.set_x(rd, v);
            }
            Opcode::Remw => {
                let a = self.x(rs1) as i32;
                let b = self.x(rs2) as i32;
                let v = if b == 0 {
                    a as i64 as u64
                } else if a == i32::MIN && b == -1 {
                    0
                } else {
                    (a % b) as i64 as u64
                };
                self.set_x(rd, v);
            }
            Opcode::Remuw => {
                let a = self.x(rs1) as u32;
                let b = self.x(rs2) as u32;
                let v = if b == 0 {
                    a as i32 as i64 as u64
                } else {
                    (a % b) as i32 as i64 as u64
                };
                self.set_x(rd, v);
            }

            Opcode::LrW => {
                let vaddr = self.eaddr(self.x(rs1), 0);
                if vaddr % 4 != 0 {
                    return Err(Trap::new(ExceptionCause::LoadAddrMisaligned, vaddr));
                }
                let paddr = self.translate(bus, vaddr, MemAccessType::Load)?;
                let mut buf = [0u8; 4];
                bus.bus_read(paddr, &mut buf, false)
                    .map_err(|_| Trap::new(ExceptionCause::LoadAccessFault, vaddr))?;
                self.set_x(rd, i32::from_le_bytes(buf) as i64 as u64);
                bus.reserve(self.hart_id, paddr, 4);
            }
            Opcode::ScW => {
                let vaddr = self.eaddr(self.x(rs1), 0);
                if vaddr % 4 != 0 {
                    return Err(Trap::new(ExceptionCause::StoreAmoAddrMisaligned, vaddr));
                }
                let paddr = self.translate(bus, vaddr, MemAccessType::Store)?;
                if bus.check_reservation(self.hart_id, paddr, 4) {
                    let val = self.x(rs2) as u32;
                    bus.bus_write(self.hart_id, paddr, &val.to_le_bytes(), false)
                        .map_err(|_| Trap::new(ExceptionCause::StoreAmoAccessFault, vaddr))?;
                    self.set_x(rd, 0);
                } else {
                    self.set_x(rd, 1);
                }
                bus.clear_reservation(self.hart_id);
            }
            Opcode::AmoswapW => self.amo_w(bus, instr, |_, b| b)?,
            Opcode::AmoaddW => self.amo_w(bus, instr, |a, b| a.wrapping_add(b))?,
            Opcode::AmoxorW => self.amo_w(bus, instr, |a, b| a ^ b)?,
            Opcode::AmoandW => self.amo_w(bus, instr, |a, b| a & b)?,
            Opcode::AmoorW => self.amo_w(bus, instr, |a, b| a | b)?,
            Opcode::AmominW => self.amo_w(bus, instr, |a, b| a.min(b))?,
            Opcode::AmomaxW => self.amo_w(bus, instr, |a, b| a.max(b))?,
            Opcode::AmominuW => {
                self.amo_w(bus, instr, |a, b| (a as u32).min(b as u32) as i32)?
            }
            Opcode::AmomaxuW => {
                self.amo_w(bus, instr, |a, b| (a as u32).max(b as u32) as i32)?
            }

            Opcode::LrD => {
                let vaddr = self.eaddr(self.x(rs1), 0);
                if vaddr % 8 != 0 {
                    return Err(Trap::new(ExceptionCause::LoadAddrMisaligned, vaddr));
                }
                let paddr = self.translate(bus, vaddr, MemAccessType::Load)?;
                let mut buf = [0u8; 8];
                bus.bus_read(paddr, &mut buf, false)
                    .map_err(|_| Trap::new(ExceptionCause::LoadAccessFault, vaddr))?;
                self.set_x(rd, u64::from_le_bytes(buf));
                bus.reserve(self.hart_id, paddr, 8);
            }
            Opcode::ScD => {
                let vaddr = self.eaddr(self.x(rs1), 0);
                if vaddr % 8 != 0 {
                    return Err(Trap::new(ExceptionCause::StoreAmoAddrMisaligned, vaddr));
                }
                let paddr = self.translate(bus, vaddr, MemAccessType::Store)?;
                if bus.check_reservation(self.hart_id, paddr, 8) {
                    let val = self.x(rs2);
                    bus.bus_write(self.hart_id, paddr, &val.to_le_bytes(), false)
                        .map_err(|_| Trap::new(ExceptionCause::StoreAmoAccessFault, vaddr))?;
                    self.set_x(rd, 0);
                } else {
                    self.set_x(rd, 1);
                }
                bus.clear_reservation(self.hart_id);
            }
            Opcode::AmoswapD => self.amo_d(bus, instr, |_, b| b)?,
            Opcode::AmoaddD => self.amo_d(bus, instr, |a, b| a.wrapping_add(b))?,
            Opcode::AmoxorD => self.amo_d(bus, instr, |a, b| a ^ b)?,
            Opcode::AmoandD => self.amo_d(bus, instr, |a, b| a & b)?,
            Opcode::AmoorD => self.amo_d(bus, instr, |a, b| a | b)?,
            Opcode::AmominD => self.amo_d(bus, instr, |a, b| a.min(b))?,
            Opcode::AmomaxD => self.amo_d(bus, instr, |a, b| a.max(b))?,
            Opcode::AmominuD => {
                self.amo_d(bus, instr, |a, b| (a as u64).min(b as u64) as i64)?
            }
            Opcode::AmomaxuD => {
                self.amo_d(bus, instr, |a, b| (a as u64).max(b as u64) as i64)?
            }

            Opcode::Wfi => {
                if self.block_on_wfi && !self.has_pending_enabled_interrupts() {
                    self.in_wfi = true;
                    self.wake_pending = false;
                }
            }
            Opcode::SfenceVma => self.mmu.flush_tlb(),
            Opcode::Mret => self.return_from_trap_handler(),
            Opcode::Uret | Opcode::Sret => {
                return Err(Trap::new(ExceptionCause::IllegalInstr, word as u64));
            }

            Opcode::Undef => unreachable!("filtered above"),
        }

        Ok(op)
    }
}
