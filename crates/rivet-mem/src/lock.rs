/// Bus ownership marker for multi-beat atomic sequences. A hart takes the
/// lock for the duration of an AMO; peripherals with write access poll
/// [`BusLock::is_locked`] before issuing transactions so they cannot slip a
/// store between the read and write halves of an atomic.
///
/// Scheduling is cooperative, so "waiting" means the peripheral's task
/// retries on its next turn; there is no blocking primitive to park on.
#[derive(Debug, Default)]
pub struct BusLock {
    locked: bool,
    owner: usize,
}

impl BusLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock. Must not be called while another hart holds it; the
    /// cooperative scheduler never interleaves two atomics.
    pub fn lock(&mut self, hart_id: usize) {
        debug_assert!(!self.locked || self.owner == hart_id);
        self.locked = true;
        self.owner = hart_id;
    }

    pub fn unlock(&mut self, hart_id: usize) {
        if self.locked && self.owner == hart_id {
            self.locked = false;
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn is_locked_by(&self, hart_id: usize) -> bool {
        self.locked && self.owner == hart_id
    }
}

#[cfg(test)]
mod tests {
    use super::BusLock;

    #[test]
    fn lock_tracks_owner() {
        let mut lock = BusLock::new();
        assert!(!lock.is_locked());

        lock.lock(1);
        assert!(lock.is_locked());
        assert!(lock.is_locked_by(1));
        assert!(!lock.is_locked_by(0));

        // A non-owner unlock is ignored.
        lock.unlock(0);
        assert!(lock.is_locked());

        lock.unlock(1);
        assert!(!lock.is_locked());
    }
}
