#[derive(Debug, Clone, Copy)]
struct Reservation {
    paddr: u64,
    len: u64,
}

/// LR/SC bookkeeping: at most one reservation per hart. Any store by a
/// *different* bus master that overlaps a reserved word kills the
/// reservation; the owning hart's SC then fails.
#[derive(Debug)]
pub struct ReservationSet {
    slots: Vec<Option<Reservation>>,
}

impl ReservationSet {
    pub fn new(num_harts: usize) -> Self {
        ReservationSet {
            slots: vec![None; num_harts],
        }
    }

    pub fn reserve(&mut self, hart: usize, paddr: u64, len: u64) {
        self.slots[hart] = Some(Reservation { paddr, len });
    }

    pub fn clear(&mut self, hart: usize) {
        self.slots[hart] = None;
    }

    pub fn matches(&self, hart: usize, paddr: u64, len: u64) -> bool {
        match self.slots[hart] {
            Some(r) => r.paddr == paddr && r.len == len,
            None => false,
        }
    }

    /// Invalidate every reservation overlapping the written range, except
    /// the writer's own. `writer = None` marks a non-hart master (DMA,
    /// debugger is excluded separately).
    pub fn on_write(&mut self, writer: Option<usize>, paddr: u64, len: u64) {
        let end = paddr.saturating_add(len);
        for (hart, slot) in self.slots.iter_mut().enumerate() {
            if Some(hart) == writer {
                continue;
            }
            if let Some(r) = slot {
                let r_end = r.paddr.saturating_add(r.len);
                if paddr < r_end && r.paddr < end {
                    *slot = None;
                }
            }
        }
    }
}
