/// Byte-addressable guest RAM. Offsets are local to the RAM port; the bus
/// subtracts the port base before calling in.
pub struct Ram {
    data: Vec<u8>,
}

impl Ram {
    pub fn new(size: usize) -> Self {
        Ram {
            data: vec![0; size],
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn in_range(&self, offset: u64, len: usize) -> bool {
        (offset as usize)
            .checked_add(len)
            .map(|end| end <= self.data.len())
            .unwrap_or(false)
    }

    pub fn read(&self, offset: u64, buf: &mut [u8]) -> bool {
        if !self.in_range(offset, buf.len()) {
            return false;
        }
        let off = offset as usize;
        buf.copy_from_slice(&self.data[off..off + buf.len()]);
        true
    }

    pub fn write(&mut self, offset: u64, buf: &[u8]) -> bool {
        if !self.in_range(offset, buf.len()) {
            return false;
        }
        let off = offset as usize;
        self.data[off..off + buf.len()].copy_from_slice(buf);
        true
    }

    /// Loader interface: copy a program segment into place.
    pub fn load_data(&mut self, src: &[u8], offset: u64) -> bool {
        self.write(offset, src)
    }

    /// Loader interface: zero-fill (the `memsz > filesz` BSS tail).
    pub fn load_zero(&mut self, offset: u64, len: usize) -> bool {
        if !self.in_range(offset, len) {
            return false;
        }
        let off = offset as usize;
        self.data[off..off + len].fill(0);
        true
    }

    /// Borrow a range, e.g. for the signature dump.
    pub fn slice(&self, offset: u64, len: usize) -> Option<&[u8]> {
        if !self.in_range(offset, len) {
            return None;
        }
        let off = offset as usize;
        Some(&self.data[off..off + len])
    }
}

impl std::fmt::Debug for Ram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Ram({} bytes)", self.data.len())
    }
}
