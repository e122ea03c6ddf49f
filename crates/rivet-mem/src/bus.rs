use thiserror::Error;

/// Soft failures a bus transaction can report. The interpreter converts
/// them into access-fault traps (or a fatal diagnostic, depending on the
/// run mode); they never panic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("no port decodes physical address {addr:#x}")]
    AddressError { addr: u64 },
    #[error("store to read-only region at {addr:#x}")]
    ReadOnly { addr: u64 },
}

/// One slot of the bus decode table: a closed physical address interval
/// belonging to a single target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMapping {
    pub start: u64,
    pub end: u64,
}

impl PortMapping {
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(end >= start);
        PortMapping { start, end }
    }

    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr <= self.end
    }

    pub fn global_to_local(&self, addr: u64) -> u64 {
        addr - self.start
    }
}

/// The single transport interface between a hart (or the table walker) and
/// the memory system.
///
/// Debug accesses (`debug = true`) are the `transport_dbg` variant: they
/// must not advance time, must not fire interrupts and must not disturb
/// LR/SC reservations. `hart` identifies the writing master so the
/// reservation set can distinguish own stores from foreign ones.
pub trait BusPort {
    fn bus_read(&mut self, paddr: u64, buf: &mut [u8], debug: bool) -> Result<(), BusError>;
    fn bus_write(&mut self, hart: usize, paddr: u64, buf: &[u8], debug: bool)
        -> Result<(), BusError>;

    /// Record an LR reservation, replacing any previous one for this hart.
    fn reserve(&mut self, hart: usize, paddr: u64, len: u64);
    /// True iff the hart still holds an intact reservation covering
    /// exactly this word.
    fn check_reservation(&self, hart: usize, paddr: u64, len: u64) -> bool;
    fn clear_reservation(&mut self, hart: usize);

    /// Bus ownership around a multi-beat atomic sequence. Write-capable
    /// peripherals must not transact while a hart holds the lock.
    fn lock(&mut self, hart: usize);
    fn unlock(&mut self, hart: usize);
}
