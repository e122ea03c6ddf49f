//! Interrupt fabric of the platform: the CLINT (per-hart timer and
//! software interrupts, the guest's clock) and the PLIC (external
//! interrupt aggregation), driven by a shared deadline queue.

mod clint;
mod plic;
mod timer_queue;

pub use clint::{Clint, CLINT_SIZE};
pub use plic::{Plic, PLIC_SIZE};
pub use timer_queue::{TimerEvent, TimerQueue};

/// Interrupt lines out of the fabric into the harts. The machine
/// implements this by setting the target hart's `mip` bits and notifying
/// its WFI wake.
pub trait IrqSink {
    fn timer_irq(&mut self, hart: usize, level: bool);
    fn software_irq(&mut self, hart: usize, level: bool);
    fn external_irq(&mut self, hart: usize, level: bool);
}
