//! Test fixture: a word-level assembler for the handful of encodings the
//! scenarios need, and a minimal ELF32 builder for loader-path tests.
#![allow(dead_code)]

pub fn r_type(f7: u32, rs2: u32, rs1: u32, f3: u32, rd: u32, op: u32) -> u32 {
    (f7 << 25) | (rs2 << 20) | (rs1 << 15) | (f3 << 12) | (rd << 7) | op
}

pub fn i_type(imm: i32, rs1: u32, f3: u32, rd: u32, op: u32) -> u32 {
    (((imm as u32) & 0xfff) << 20) | (rs1 << 15) | (f3 << 12) | (rd << 7) | op
}

pub fn s_type(imm: i32, rs2: u32, rs1: u32, f3: u32) -> u32 {
    let imm = imm as u32;
    ((imm >> 5 & 0x7f) << 25) | (rs2 << 20) | (rs1 << 15) | (f3 << 12) | ((imm & 0x1f) << 7) | 0x23
}

pub fn b_type(imm: i32, rs2: u32, rs1: u32, f3: u32) -> u32 {
    let imm = imm as u32;
    ((imm >> 12 & 1) << 31)
        | ((imm >> 5 & 0x3f) << 25)
        | (rs2 << 20)
        | (rs1 << 15)
        | (f3 << 12)
        | ((imm >> 1 & 0xf) << 8)
        | ((imm >> 11 & 1) << 7)
        | 0x63
}

pub fn addi(rd: u32, rs1: u32, imm: i32) -> u32 {
    i_type(imm, rs1, 0b000, rd, 0x13)
}

pub fn lui(rd: u32, imm20: u32) -> u32 {
    (imm20 << 12) | (rd << 7) | 0x37
}

pub fn slli(rd: u32, rs1: u32, sh: u32) -> u32 {
    i_type(sh as i32, rs1, 0b001, rd, 0x13)
}

pub fn lw(rd: u32, rs1: u32, imm: i32) -> u32 {
    i_type(imm, rs1, 0b010, rd, 0x03)
}

pub fn ld(rd: u32, rs1: u32, imm: i32) -> u32 {
    i_type(imm, rs1, 0b011, rd, 0x03)
}

pub fn sw(rs2: u32, rs1: u32, imm: i32) -> u32 {
    s_type(imm, rs2, rs1, 0b010)
}

pub fn beq(rs1: u32, rs2: u32, imm: i32) -> u32 {
    b_type(imm, rs2, rs1, 0b000)
}

pub fn bne(rs1: u32, rs2: u32, imm: i32) -> u32 {
    b_type(imm, rs2, rs1, 0b001)
}

pub fn blt(rs1: u32, rs2: u32, imm: i32) -> u32 {
    b_type(imm, rs2, rs1, 0b100)
}

pub fn jal(rd: u32, imm: i32) -> u32 {
    let imm = imm as u32;
    ((imm >> 20 & 1) << 31)
        | ((imm >> 1 & 0x3ff) << 21)
        | ((imm >> 11 & 1) << 20)
        | ((imm >> 12 & 0xff) << 12)
        | (rd << 7)
        | 0x6f
}

pub fn csrrw(rd: u32, csr: u32, rs1: u32) -> u32 {
    i_type(csr as i32, rs1, 0b001, rd, 0x73)
}

pub fn csrrs(rd: u32, csr: u32, rs1: u32) -> u32 {
    i_type(csr as i32, rs1, 0b010, rd, 0x73)
}

pub fn csrrsi(rd: u32, csr: u32, zimm: u32) -> u32 {
    i_type(csr as i32, zimm, 0b110, rd, 0x73)
}

pub fn lr_w(rd: u32, rs1: u32) -> u32 {
    r_type(0b00010 << 2, 0, rs1, 0b010, rd, 0x2f)
}

pub fn sc_w(rd: u32, rs1: u32, rs2: u32) -> u32 {
    r_type(0b00011 << 2, rs2, rs1, 0b010, rd, 0x2f)
}

pub fn ecall() -> u32 {
    0x0000_0073
}

pub fn wfi() -> u32 {
    0x1050_0073
}

pub fn nop() -> u32 {
    addi(0, 0, 0)
}

pub fn words_to_bytes(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

/// A minimal statically-linked ELF32 for RISC-V: one PT_LOAD segment, no
/// section headers.
pub fn build_elf32(entry: u32, load_addr: u32, payload: &[u8]) -> Vec<u8> {
    const EHSIZE: u32 = 52;
    const PHENTSIZE: u32 = 32;
    let mut out = Vec::new();

    // e_ident
    out.extend_from_slice(&[0x7f, b'E', b'L', b'F', 1, 1, 1, 0]);
    out.extend_from_slice(&[0; 8]);
    out.extend_from_slice(&2u16.to_le_bytes()); // e_type = EXEC
    out.extend_from_slice(&243u16.to_le_bytes()); // e_machine = RISC-V
    out.extend_from_slice(&1u32.to_le_bytes()); // e_version
    out.extend_from_slice(&entry.to_le_bytes());
    out.extend_from_slice(&EHSIZE.to_le_bytes()); // e_phoff
    out.extend_from_slice(&0u32.to_le_bytes()); // e_shoff
    out.extend_from_slice(&0u32.to_le_bytes()); // e_flags
    out.extend_from_slice(&(EHSIZE as u16).to_le_bytes());
    out.extend_from_slice(&(PHENTSIZE as u16).to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // e_phnum
    out.extend_from_slice(&0u16.to_le_bytes()); // e_shentsize
    out.extend_from_slice(&0u16.to_le_bytes()); // e_shnum
    out.extend_from_slice(&0u16.to_le_bytes()); // e_shstrndx

    // One PT_LOAD
    let offset = EHSIZE + PHENTSIZE;
    out.extend_from_slice(&1u32.to_le_bytes()); // p_type
    out.extend_from_slice(&offset.to_le_bytes()); // p_offset
    out.extend_from_slice(&load_addr.to_le_bytes()); // p_vaddr
    out.extend_from_slice(&load_addr.to_le_bytes()); // p_paddr
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes()); // p_filesz
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes()); // p_memsz
    out.extend_from_slice(&7u32.to_le_bytes()); // p_flags = rwx
    out.extend_from_slice(&0x1000u32.to_le_bytes()); // p_align

    out.extend_from_slice(payload);
    out
}
