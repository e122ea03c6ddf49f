use std::io::{self, Write};

use rivet_mem::Ram;

/// Dump the compliance signature: memory `[begin, end)`, one 32-bit
/// little-endian word per line as eight lowercase hex digits.
pub fn write_signature(
    out: &mut impl Write,
    ram: &Ram,
    mem_start: u64,
    begin: u64,
    end: u64,
) -> io::Result<()> {
    if end < begin {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "signature end precedes begin",
        ));
    }
    let bytes = ram
        .slice(begin - mem_start, (end - begin) as usize)
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "signature range outside guest memory",
            )
        })?;
    for word in bytes.chunks(4) {
        let mut padded = [0u8; 4];
        padded[..word.len()].copy_from_slice(word);
        writeln!(out, "{:08x}", u32::from_le_bytes(padded))?;
    }
    Ok(())
}
