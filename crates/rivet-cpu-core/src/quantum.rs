/// Simulated time of one execution cycle.
pub const DEFAULT_CYCLE_TIME_NS: u64 = 10;

/// Default scheduling quantum: how much simulated time a hart may owe the
/// driver before it has to sync.
pub const DEFAULT_QUANTUM_NS: u64 = 10_000;

/// Tracks the hart's local simulated clock and how far it has run ahead of
/// the last synchronization with the driver.
#[derive(Debug, Clone)]
pub struct QuantumKeeper {
    now_ns: u64,
    last_sync_ns: u64,
    quantum_ns: u64,
}

impl QuantumKeeper {
    pub fn new(quantum_ns: u64) -> Self {
        QuantumKeeper {
            now_ns: 0,
            last_sync_ns: 0,
            quantum_ns,
        }
    }

    /// The hart's current simulated time.
    pub fn now_ns(&self) -> u64 {
        self.now_ns
    }

    pub fn inc(&mut self, delta_ns: u64) {
        self.now_ns += delta_ns;
    }

    /// Simulated time accumulated since the last sync.
    pub fn local_offset_ns(&self) -> u64 {
        self.now_ns - self.last_sync_ns
    }

    pub fn need_sync(&self) -> bool {
        self.local_offset_ns() >= self.quantum_ns
    }

    /// The driver folded our local time into the global clock.
    pub fn mark_synced(&mut self) {
        self.last_sync_ns = self.now_ns;
    }

    /// Fast-forward (WFI wake, or a hart lagging the global clock).
    /// Never moves backwards.
    pub fn advance_to(&mut self, global_ns: u64) {
        if global_ns > self.now_ns {
            self.now_ns = global_ns;
            self.last_sync_ns = global_ns;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::QuantumKeeper;

    #[test]
    fn sync_cadence() {
        let mut qk = QuantumKeeper::new(100);
        assert!(!qk.need_sync());

        qk.inc(60);
        assert!(!qk.need_sync());
        qk.inc(40);
        assert!(qk.need_sync());

        qk.mark_synced();
        assert!(!qk.need_sync());
        assert_eq!(qk.now_ns(), 100);
    }

    #[test]
    fn advance_to_is_monotonic() {
        let mut qk = QuantumKeeper::new(100);
        qk.inc(500);
        qk.advance_to(300);
        assert_eq!(qk.now_ns(), 500);
        qk.advance_to(900);
        assert_eq!(qk.now_ns(), 900);
        assert!(!qk.need_sync());
    }
}
