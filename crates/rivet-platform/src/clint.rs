use rivet_mem::BusError;

use crate::timer_queue::TimerQueue;
use crate::IrqSink;

/// Size of the CLINT register window.
pub const CLINT_SIZE: u64 = 0x10000;

const MSIP_BASE: u64 = 0x0000;
const MTIMECMP_BASE: u64 = 0x4000;
const MTIME_BASE: u64 = 0xBFF8;

const MSIP_MASK: u64 = 0x1; // the upper msip bits are tied to zero

/// mtime counts microseconds; the simulation clock counts nanoseconds.
const MTIME_SCALER_NS: u64 = 1000;

/// Core-local interrupter: one shared `mtime`, one `mtimecmp` and `msip`
/// per hart.
///
/// A hart's timer interrupt is asserted while `mtimecmp > 0` and
/// `mtime >= mtimecmp`; writing `mtimecmp` (re)schedules the comparison.
/// `mtime` never moves backwards, no matter how local quantums skew the
/// observation points.
#[derive(Debug)]
pub struct Clint {
    mtime: u64,
    mtimecmp: Vec<u64>,
    msip: Vec<u64>,
    deadlines: TimerQueue<usize>,
}

impl Clint {
    pub fn new(num_harts: usize) -> Self {
        Clint {
            mtime: 0,
            mtimecmp: vec![0; num_harts],
            msip: vec![0; num_harts],
            deadlines: TimerQueue::new(),
        }
    }

    pub fn num_harts(&self) -> usize {
        self.mtimecmp.len()
    }

    /// Clamp `mtime` forward to the simulation clock and return it.
    pub fn update_and_get_mtime(&mut self, now_ns: u64) -> u64 {
        let now = now_ns / MTIME_SCALER_NS;
        if now > self.mtime {
            self.mtime = now;
        }
        self.mtime
    }

    /// Earliest pending mtimecmp deadline, for the driver's WFI
    /// fast-forward.
    pub fn next_deadline_ns(&self) -> Option<u64> {
        self.deadlines.next_deadline_ns()
    }

    /// Service due deadlines: assert the timer line of every hart whose
    /// comparison now holds, re-arm the ones that are still in the future.
    pub fn process(&mut self, now_ns: u64, sink: &mut impl IrqSink) {
        while let Some(ev) = self.deadlines.pop_due(now_ns) {
            let hart = ev.payload;
            self.update_and_get_mtime(now_ns);
            let cmp = self.mtimecmp[hart];
            if cmp > 0 && self.mtime >= cmp {
                sink.timer_irq(hart, true);
            } else if cmp > 0 {
                // Stale or early: re-arm for the current comparand. The
                // recommended mtimecmp write sequence parks the comparand
                // at all-ones in between, so the product must saturate.
                self.deadlines.push(cmp.saturating_mul(MTIME_SCALER_NS), hart);
            }
        }
    }

    fn locate(&self, offset: u64) -> Option<(u64, u64, usize)> {
        let n = self.num_harts() as u64;
        if offset < MSIP_BASE + 4 * n {
            let hart = (offset - MSIP_BASE) / 4;
            return Some((MSIP_BASE + hart * 4, 4, hart as usize));
        }
        if (MTIMECMP_BASE..MTIMECMP_BASE + 8 * n).contains(&offset) {
            let hart = (offset - MTIMECMP_BASE) / 8;
            return Some((MTIMECMP_BASE + hart * 8, 8, hart as usize));
        }
        if (MTIME_BASE..MTIME_BASE + 8).contains(&offset) {
            return Some((MTIME_BASE, 8, 0));
        }
        None
    }

    fn reg_value(&self, reg_base: u64, hart: usize) -> u64 {
        match reg_base {
            MTIME_BASE => self.mtime,
            b if b >= MTIMECMP_BASE => self.mtimecmp[hart],
            _ => self.msip[hart],
        }
    }

    /// Register-window read. Non-debug reads of `mtime` refresh it from
    /// the simulation clock first.
    pub fn read(
        &mut self,
        offset: u64,
        buf: &mut [u8],
        now_ns: u64,
        debug: bool,
    ) -> Result<(), BusError> {
        let (reg_base, reg_size, hart) = self
            .locate(offset)
            .ok_or(BusError::AddressError { addr: offset })?;
        let off = (offset - reg_base) as usize;
        if off + buf.len() > reg_size as usize {
            return Err(BusError::AddressError { addr: offset });
        }
        if !debug && reg_base == MTIME_BASE {
            self.update_and_get_mtime(now_ns);
        }
        let bytes = self.reg_value(reg_base, hart).to_le_bytes();
        buf.copy_from_slice(&bytes[off..off + buf.len()]);
        Ok(())
    }

    /// Register-window write. `mtime` is read-only in effect: stores to it
    /// are dropped. `mtimecmp` writes evaluate the comparison immediately
    /// and otherwise schedule a deadline; `msip` writes drive the software
    /// interrupt line.
    pub fn write(
        &mut self,
        offset: u64,
        buf: &[u8],
        now_ns: u64,
        debug: bool,
        sink: &mut impl IrqSink,
    ) -> Result<(), BusError> {
        let (reg_base, reg_size, hart) = self
            .locate(offset)
            .ok_or(BusError::AddressError { addr: offset })?;
        let off = (offset - reg_base) as usize;
        if off + buf.len() > reg_size as usize {
            return Err(BusError::AddressError { addr: offset });
        }

        if reg_base == MTIME_BASE {
            tracing::warn!(offset, "dropping write to read-only mtime");
            return Ok(());
        }

        let mut bytes = self.reg_value(reg_base, hart).to_le_bytes();
        bytes[off..off + buf.len()].copy_from_slice(buf);
        let value = u64::from_le_bytes(bytes);

        if reg_base >= MTIMECMP_BASE {
            self.mtimecmp[hart] = value;
            if !debug {
                self.schedule(hart, now_ns, sink);
            }
        } else {
            self.msip[hart] = value & MSIP_MASK;
            if !debug {
                sink.software_irq(hart, self.msip[hart] != 0);
            }
        }
        Ok(())
    }

    fn schedule(&mut self, hart: usize, now_ns: u64, sink: &mut impl IrqSink) {
        let cmp = self.mtimecmp[hart];
        self.update_and_get_mtime(now_ns);

        if cmp == 0 {
            // Zero disables the comparison.
            sink.timer_irq(hart, false);
            return;
        }
        if self.mtime >= cmp {
            sink.timer_irq(hart, true);
        } else {
            sink.timer_irq(hart, false);
            self.deadlines.push(cmp.saturating_mul(MTIME_SCALER_NS), hart);
        }
    }
}
