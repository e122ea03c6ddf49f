use rivet_mem::BusError;

use crate::IrqSink;

/// Size of the PLIC register window.
pub const PLIC_SIZE: u64 = 0x400_0000;

const PRIORITY_BASE: u64 = 0x0;
const ENABLE_BASE: u64 = 0x2000;
const ENABLE_STRIDE: u64 = 0x80;
const CONTEXT_BASE: u64 = 0x20_0000;
const CONTEXT_STRIDE: u64 = 0x1000;

/// Platform-level interrupt controller, FE310 register layout.
///
/// Each source has a gateway: once claimed, further triggers of that source
/// are held off until the handler writes the id back to the complete
/// register.
#[derive(Debug)]
pub struct Plic {
    /// Per source; index 0 exists but is architecturally reserved.
    priority: Vec<u32>,
    pending: Vec<bool>,
    /// Gateway state: source claimed, completion outstanding.
    served: Vec<bool>,
    /// Per hart, bitmap words of 32 sources.
    enable: Vec<Vec<u32>>,
    threshold: Vec<u32>,
}

impl Plic {
    pub fn new(num_harts: usize, num_sources: usize) -> Self {
        let words = num_sources.div_ceil(32);
        Plic {
            priority: vec![0; num_sources + 1],
            pending: vec![false; num_sources + 1],
            served: vec![false; num_sources + 1],
            enable: vec![vec![0; words]; num_harts],
            threshold: vec![0; num_harts],
        }
    }

    fn num_harts(&self) -> usize {
        self.enable.len()
    }

    fn enabled(&self, hart: usize, src: usize) -> bool {
        self.enable[hart]
            .get(src / 32)
            .map(|w| w & (1 << (src % 32)) != 0)
            .unwrap_or(false)
    }

    /// A device edge arrives at the source's gateway.
    pub fn gateway_trigger_interrupt(&mut self, src: usize, sink: &mut impl IrqSink) {
        if src == 0 || src >= self.pending.len() {
            tracing::warn!(src, "interrupt trigger for invalid source");
            return;
        }
        if !self.served[src] {
            self.pending[src] = true;
        }
        self.update_irq_lines(sink);
    }

    /// Highest-priority pending enabled source for this hart (ties go to
    /// the lowest id); 0 when nothing is pending.
    fn best_pending(&self, hart: usize) -> usize {
        let mut best = 0;
        let mut best_prio = 0;
        for src in 1..self.pending.len() {
            if self.pending[src] && self.enabled(hart, src) && self.priority[src] > best_prio {
                best = src;
                best_prio = self.priority[src];
            }
        }
        best
    }

    fn claim(&mut self, hart: usize, sink: &mut impl IrqSink) -> u32 {
        let src = self.best_pending(hart);
        if src != 0 {
            self.pending[src] = false;
            self.served[src] = true;
        }
        self.update_irq_lines(sink);
        src as u32
    }

    fn complete(&mut self, src: usize, sink: &mut impl IrqSink) {
        if src != 0 && src < self.served.len() {
            self.served[src] = false;
        }
        self.update_irq_lines(sink);
    }

    /// Recompute every hart's external interrupt line.
    pub fn update_irq_lines(&mut self, sink: &mut impl IrqSink) {
        for hart in 0..self.num_harts() {
            let level = (1..self.pending.len()).any(|src| {
                self.pending[src]
                    && self.enabled(hart, src)
                    && self.priority[src] > self.threshold[hart]
            });
            sink.external_irq(hart, level);
        }
    }

    fn check_access(offset: u64, len: usize) -> Result<(), BusError> {
        if len != 4 || offset % 4 != 0 {
            return Err(BusError::AddressError { addr: offset });
        }
        Ok(())
    }

    /// Register-window read; 32-bit accesses only. Reading the claim
    /// register claims (debug reads only peek).
    pub fn read(
        &mut self,
        offset: u64,
        buf: &mut [u8],
        debug: bool,
        sink: &mut impl IrqSink,
    ) -> Result<(), BusError> {
        Self::check_access(offset, buf.len())?;
        let value: u32 = if offset >= CONTEXT_BASE {
            let hart = ((offset - CONTEXT_BASE) / CONTEXT_STRIDE) as usize;
            if hart >= self.num_harts() {
                return Err(BusError::AddressError { addr: offset });
            }
            match (offset - CONTEXT_BASE) % CONTEXT_STRIDE {
                0x0 => self.threshold[hart],
                0x4 => {
                    if debug {
                        self.best_pending(hart) as u32
                    } else {
                        self.claim(hart, sink)
                    }
                }
                _ => return Err(BusError::AddressError { addr: offset }),
            }
        } else if offset >= ENABLE_BASE {
            let hart = ((offset - ENABLE_BASE) / ENABLE_STRIDE) as usize;
            let word = ((offset - ENABLE_BASE) % ENABLE_STRIDE / 4) as usize;
            *self
                .enable
                .get(hart)
                .and_then(|words| words.get(word))
                .ok_or(BusError::AddressError { addr: offset })?
        } else {
            let src = (offset / 4) as usize;
            *self
                .priority
                .get(src)
                .ok_or(BusError::AddressError { addr: offset })?
        };
        buf.copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// Register-window write; writing the claim offset completes.
    pub fn write(
        &mut self,
        offset: u64,
        buf: &[u8],
        debug: bool,
        sink: &mut impl IrqSink,
    ) -> Result<(), BusError> {
        Self::check_access(offset, buf.len())?;
        let value = u32::from_le_bytes(buf.try_into().unwrap());
        if offset >= CONTEXT_BASE {
            let hart = ((offset - CONTEXT_BASE) / CONTEXT_STRIDE) as usize;
            if hart >= self.num_harts() {
                return Err(BusError::AddressError { addr: offset });
            }
            match (offset - CONTEXT_BASE) % CONTEXT_STRIDE {
                0x0 => self.threshold[hart] = value,
                0x4 => {
                    if !debug {
                        self.complete(value as usize, sink);
                    }
                    return Ok(());
                }
                _ => return Err(BusError::AddressError { addr: offset }),
            }
        } else if offset >= ENABLE_BASE {
            let hart = ((offset - ENABLE_BASE) / ENABLE_STRIDE) as usize;
            let word = ((offset - ENABLE_BASE) % ENABLE_STRIDE / 4) as usize;
            *self
                .enable
                .get_mut(hart)
                .and_then(|words| words.get_mut(word))
                .ok_or(BusError::AddressError { addr: offset })? = value;
        } else {
            let src = (offset / 4) as usize;
            if src == 0 || src >= self.priority.len() {
                return Err(BusError::AddressError { addr: offset });
            }
            self.priority[src] = value;
        }
        if !debug {
            self.update_irq_lines(sink);
        }
        Ok(())
    }
}
