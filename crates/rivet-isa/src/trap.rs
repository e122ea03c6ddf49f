/// Synchronous exception causes as encoded into `mcause` (interrupt bit
/// clear).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum ExceptionCause {
    InstrAddrMisaligned = 0,
    InstrAccessFault = 1,
    IllegalInstr = 2,
    Breakpoint = 3,
    LoadAddrMisaligned = 4,
    LoadAccessFault = 5,
    StoreAmoAddrMisaligned = 6,
    StoreAmoAccessFault = 7,
    EcallFromU = 8,
    EcallFromS = 9,
    EcallFromM = 11,
    InstrPageFault = 12,
    LoadPageFault = 13,
    StoreAmoPageFault = 15,
}

impl ExceptionCause {
    pub fn code(self) -> u64 {
        self as u64
    }
}

/// Interrupt causes (`mcause` with the interrupt bit set). Delivery
/// priority on simultaneity is External > Software > Timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum InterruptCode {
    MachineSoftware = 3,
    MachineTimer = 7,
    MachineExternal = 11,
}

impl InterruptCode {
    pub fn code(self) -> u64 {
        self as u64
    }
}

/// A guest trap in flight: recorded into `mcause`/`mtval` and redirected to
/// `mtvec` by the hart that raised it. Always local to that hart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trap {
    pub cause: ExceptionCause,
    /// Faulting address or offending instruction word, per cause.
    pub tval: u64,
}

impl Trap {
    pub fn new(cause: ExceptionCause, tval: u64) -> Self {
        Trap { cause, tval }
    }
}
