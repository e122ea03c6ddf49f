use object::elf;
use object::read::elf::{FileHeader, ProgramHeader, Sym};
use object::Endianness;
use rivet_isa::Xlen;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("not an ELF image")]
    NotElf,
    #[error("unsupported ELF class")]
    BadClass,
    #[error("malformed ELF: {0}")]
    Parse(#[from] object::read::Error),
    #[error("segment at {paddr:#x} ({memsz} bytes) does not fit in guest memory")]
    SegmentOutOfRange { paddr: u64, memsz: u64 },
}

/// One PT_LOAD record, exactly as the program headers describe it.
#[derive(Debug, Clone)]
pub struct LoadRecord {
    pub paddr: u64,
    pub vaddr: u64,
    pub filesz: u64,
    pub memsz: u64,
    pub data: Vec<u8>,
}

/// Everything the machine needs from an executable image.
#[derive(Debug)]
pub struct LoadedImage {
    pub xlen: Xlen,
    pub entry: u64,
    /// First free address after the highest loaded segment.
    pub heap_base: u64,
    /// Compliance-signature bounds, when the image carries them.
    pub begin_signature: Option<u64>,
    pub end_signature: Option<u64>,
    pub records: Vec<LoadRecord>,
}

/// Parse a RISC-V ELF executable. The ELF class picks the hart width.
pub fn load_elf(data: &[u8]) -> Result<LoadedImage, LoaderError> {
    if data.len() < 5 || data[..4] != elf::ELFMAG {
        return Err(LoaderError::NotElf);
    }
    match data[4] {
        elf::ELFCLASS32 => parse::<elf::FileHeader32<Endianness>>(data, Xlen::Rv32),
        elf::ELFCLASS64 => parse::<elf::FileHeader64<Endianness>>(data, Xlen::Rv64),
        _ => Err(LoaderError::BadClass),
    }
}

fn parse<Elf>(data: &[u8], xlen: Xlen) -> Result<LoadedImage, LoaderError>
where
    Elf: FileHeader<Endian = Endianness>,
    Elf::Word: Into<u64>,
{
    let header = Elf::parse(data)?;
    let endian = header.endian()?;

    let mut records = Vec::new();
    let mut heap_base = 0u64;
    for ph in header.program_headers(endian, data)? {
        if ph.p_type(endian) != elf::PT_LOAD {
            continue;
        }
        let paddr = ph.p_paddr(endian).into();
        let vaddr = ph.p_vaddr(endian).into();
        let filesz = ph.p_filesz(endian).into();
        let memsz: u64 = ph.p_memsz(endian).into();
        let bytes = ph
            .data(endian, data)
            .map_err(|()| LoaderError::NotElf)?
            .to_vec();
        heap_base = heap_base.max(vaddr + memsz);
        records.push(LoadRecord {
            paddr,
            vaddr,
            filesz,
            memsz,
            data: bytes,
        });
    }

    let mut begin_signature = None;
    let mut end_signature = None;
    let sections = header.sections(endian, data)?;
    let symbols = sections.symbols(endian, data, elf::SHT_SYMTAB)?;
    for sym in symbols.iter() {
        match sym.name(endian, symbols.strings()) {
            Ok(b"begin_signature") => begin_signature = Some(sym.st_value(endian).into()),
            Ok(b"end_signature") => end_signature = Some(sym.st_value(endian).into()),
            _ => {}
        }
    }

    Ok(LoadedImage {
        xlen,
        entry: header.e_entry(endian).into(),
        heap_base,
        begin_signature,
        end_signature,
        records,
    })
}
