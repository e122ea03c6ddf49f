//! Virtual-to-physical address translation: the Sv32/Sv39/Sv48 page-table
//! walker and the per-access-type TLB in front of it.

use bitflags::bitflags;
use rivet_isa::{MemAccessType, PrivilegeMode, Trap, Xlen};

pub const PAGE_SHIFT: u32 = 12;
pub const PAGE_SIZE: u64 = 1 << PAGE_SHIFT;
pub const PAGE_MASK: u64 = PAGE_SIZE - 1;

const PTE_PPN_SHIFT: u32 = 10;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PteFlags: u64 {
        const V = 1 << 0;
        const R = 1 << 1;
        const W = 1 << 2;
        const X = 1 << 3;
        const U = 1 << 4;
        const G = 1 << 5;
        const A = 1 << 6;
        const D = 1 << 7;
    }
}

/// Paging scheme selected by `satp.mode`. Unsupported mode values are
/// rejected at the CSR write (WARL), so the walker only ever sees these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmMode {
    Bare,
    Sv32,
    Sv39,
    Sv48,
}

impl VmMode {
    /// Walk geometry: (levels, index bits per level, PTE size in bytes).
    fn geometry(self) -> (i32, u32, u32) {
        match self {
            VmMode::Bare => (0, 0, 0),
            VmMode::Sv32 => (2, 10, 4),
            VmMode::Sv39 => (3, 9, 8),
            VmMode::Sv48 => (4, 9, 8),
        }
    }

    /// Map a raw `satp.mode` field value; `None` for modes the platform
    /// does not implement (the CSR file then preserves the old value).
    pub fn from_satp(mode: u64, xlen: Xlen) -> Option<Self> {
        match (xlen, mode) {
            (_, rivet_isa::SATP_MODE_BARE) => Some(VmMode::Bare),
            (Xlen::Rv32, rivet_isa::SATP_MODE_SV32) => Some(VmMode::Sv32),
            (Xlen::Rv64, rivet_isa::SATP_MODE_SV39) => Some(VmMode::Sv39),
            (Xlen::Rv64, rivet_isa::SATP_MODE_SV48) => Some(VmMode::Sv48),
            _ => None,
        }
    }
}

/// What to do when a leaf PTE is reached with `A` (or `D` on stores)
/// still clear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdUpdatePolicy {
    /// Set the bits in place, atomically with the walk (hardware style).
    #[default]
    AutoSet,
    /// Raise the page fault and let supervisor software set them.
    RaisePageFault,
}

/// Translation-relevant CSR state, snapshotted by the hart per access.
#[derive(Debug, Clone, Copy)]
pub struct TranslationCtx {
    pub vm_mode: VmMode,
    /// Root page-table PPN from `satp.ppn`.
    pub root_ppn: u64,
    pub prv: PrivilegeMode,
    pub mprv: bool,
    pub mpp: PrivilegeMode,
    pub sum: bool,
    pub mxr: bool,
}

/// The walker's private window onto physical memory. PTE fetches go through
/// here rather than the regular data path: they bypass cycle accounting and
/// must not disturb LR/SC reservations.
pub trait PteMemory {
    fn load_pte32(&mut self, paddr: u64) -> Option<u32>;
    fn load_pte64(&mut self, paddr: u64) -> Option<u64>;
    /// Flag updates only touch the low PTE word.
    fn store_pte32(&mut self, paddr: u64, value: u32) -> bool;
}

const TLB_ENTRIES: usize = 256;
const NUM_MODES: usize = 2; // User, Supervisor
const NUM_ACCESS_TYPES: usize = 3; // Fetch, Load, Store

/// `vpn == VACANT` marks an unused slot. No real VPN collides with it:
/// a VPN is at most 52 bits wide.
const VACANT: u64 = u64::MAX;

#[derive(Clone, Copy)]
struct TlbEntry {
    vpn: u64,
    ppn: u64,
}

pub struct Mmu {
    xlen: Xlen,
    ad_policy: AdUpdatePolicy,
    tlb: Box<[[[TlbEntry; TLB_ENTRIES]; NUM_ACCESS_TYPES]; NUM_MODES]>,
}

impl Mmu {
    pub fn new(xlen: Xlen, ad_policy: AdUpdatePolicy) -> Self {
        Mmu {
            xlen,
            ad_policy,
            tlb: Box::new(
                [[[TlbEntry {
                    vpn: VACANT,
                    ppn: 0,
                }; TLB_ENTRIES]; NUM_ACCESS_TYPES]; NUM_MODES],
            ),
        }
    }

    /// Drop every cached translation. Invoked for `SFENCE.VMA` and on any
    /// `satp` write; this model never flushes selectively.
    pub fn flush_tlb(&mut self) {
        for mode in self.tlb.iter_mut() {
            for access in mode.iter_mut() {
                for entry in access.iter_mut() {
                    entry.vpn = VACANT;
                }
            }
        }
    }

    fn effective_mode(ctx: &TranslationCtx, access: MemAccessType) -> PrivilegeMode {
        // MPRV redirects data accesses (never fetches) to the MPP privilege.
        if access != MemAccessType::Fetch && ctx.mprv {
            ctx.mpp
        } else {
            ctx.prv
        }
    }

    /// Translate a virtual address, filling the TLB on success. Returns the
    /// physical address, or the page-fault/access-fault trap to raise.
    pub fn translate(
        &mut self,
        vaddr: u64,
        access: MemAccessType,
        ctx: &TranslationCtx,
        mem: &mut impl PteMemory,
    ) -> Result<u64, Trap> {
        if ctx.vm_mode == VmMode::Bare {
            return Ok(vaddr);
        }
        let mode = Self::effective_mode(ctx, access);
        if mode == PrivilegeMode::Machine {
            return Ok(vaddr);
        }

        let mode_idx = mode as usize; // User = 0, Supervisor = 1
        let type_idx = access as usize;
        let vpn = vaddr >> PAGE_SHIFT;
        let slot = (vpn as usize) % TLB_ENTRIES;
        let entry = &self.tlb[mode_idx][type_idx][slot];
        if entry.vpn == vpn {
            return Ok(entry.ppn | (vaddr & PAGE_MASK));
        }

        let paddr = self.walk(vaddr, access, mode, ctx, mem, false)?;

        self.tlb[mode_idx][type_idx][slot] = TlbEntry {
            vpn,
            ppn: paddr & !PAGE_MASK,
        };
        Ok(paddr)
    }

    /// Debugger-path translation: same walk, but never mutates the TLB and
    /// never writes A/D bits back.
    pub fn translate_dbg(
        &self,
        vaddr: u64,
        access: MemAccessType,
        ctx: &TranslationCtx,
        mem: &mut impl PteMemory,
    ) -> Result<u64, Trap> {
        if ctx.vm_mode == VmMode::Bare {
            return Ok(vaddr);
        }
        let mode = Self::effective_mode(ctx, access);
        if mode == PrivilegeMode::Machine {
            return Ok(vaddr);
        }
        self.walk(vaddr, access, mode, ctx, mem, true)
    }

    /// High-order virtual address bits must replicate the top in-range bit.
    fn vaddr_is_canonical(&self, vaddr: u64, levels: i32, idxbits: u32) -> bool {
        let highbit = idxbits * levels as u32 + PAGE_SHIFT - 1;
        if highbit >= self.xlen.bits() - 1 {
            return true; // Sv32: every 32-bit address is in range
        }
        let ext_mask = (1u64 << (self.xlen.bits() - highbit)) - 1;
        let bits = (vaddr >> highbit) & ext_mask;
        bits == 0 || bits == ext_mask
    }

    fn walk(
        &self,
        vaddr: u64,
        access: MemAccessType,
        mode: PrivilegeMode,
        ctx: &TranslationCtx,
        mem: &mut impl PteMemory,
        debug: bool,
    ) -> Result<u64, Trap> {
        let s_mode = mode == PrivilegeMode::Supervisor;
        let (mut levels, idxbits, ptesize) = ctx.vm_mode.geometry();
        let page_fault = || Trap::new(access.page_fault(), vaddr);

        if !self.vaddr_is_canonical(vaddr, levels, idxbits) {
            levels = 0; // skip the loop, land on the fault below
        }

        let mut base = ctx.root_ppn << PAGE_SHIFT;
        for i in (0..levels).rev() {
            let ptshift = (i as u32) * idxbits;
            let vpn_field = (vaddr >> (PAGE_SHIFT + ptshift)) & ((1 << idxbits) - 1);
            let pte_paddr = base + vpn_field * ptesize as u64;

            let raw = if ptesize == 4 {
                mem.load_pte32(pte_paddr).map(u64::from)
            } else {
                mem.load_pte64(pte_paddr)
            };
            let raw = match raw {
                Some(v) => v,
                // The table itself points outside mapped memory.
                None => return Err(Trap::new(access.access_fault(), vaddr)),
            };

            let pte = PteFlags::from_bits_truncate(raw);
            let ppn = raw >> PTE_PPN_SHIFT;

            if !pte.contains(PteFlags::V) || (pte.contains(PteFlags::W) && !pte.contains(PteFlags::R)) {
                return Err(page_fault());
            }

            if !pte.contains(PteFlags::R) && !pte.contains(PteFlags::X) {
                // Pointer to the next level.
                base = ppn << PAGE_SHIFT;
                continue;
            }

            let permitted = match access {
                MemAccessType::Fetch => pte.contains(PteFlags::X),
                MemAccessType::Load => {
                    pte.contains(PteFlags::R) || (ctx.mxr && pte.contains(PteFlags::X))
                }
                MemAccessType::Store => pte.contains(PteFlags::R) && pte.contains(PteFlags::W),
            };
            if !permitted {
                return Err(page_fault());
            }

            if pte.contains(PteFlags::U) {
                // User page: supervisor may touch data only with SUM, and
                // may never execute from it.
                if s_mode && (access == MemAccessType::Fetch || !ctx.sum) {
                    return Err(page_fault());
                }
            } else if !s_mode {
                return Err(page_fault());
            }

            // Superpage leaves must have the translated PPN bits clear.
            let align_mask = (1u64 << ptshift) - 1;
            if ppn & align_mask != 0 {
                return Err(page_fault());
            }

            let mut want = PteFlags::A;
            if access == MemAccessType::Store {
                want |= PteFlags::D;
            }
            // Debugger probes leave stale flags alone and never fault on them.
            if !pte.contains(want) && !debug {
                match self.ad_policy {
                    AdUpdatePolicy::RaisePageFault => return Err(page_fault()),
                    AdUpdatePolicy::AutoSet => {
                        // Flag bits live in the low word of either PTE size.
                        let updated = (raw | want.bits()) as u32;
                        if !mem.store_pte32(pte_paddr, updated) {
                            return Err(Trap::new(access.access_fault(), vaddr));
                        }
                    }
                }
            }

            let vpn = vaddr >> PAGE_SHIFT;
            let pgoff = vaddr & PAGE_MASK;
            let paddr = (((ppn & !align_mask) | (vpn & align_mask)) << PAGE_SHIFT) | pgoff;
            return Ok(paddr);
        }

        Err(page_fault())
    }
}

impl std::fmt::Debug for Mmu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mmu")
            .field("xlen", &self.xlen)
            .field("ad_policy", &self.ad_policy)
            .finish_non_exhaustive()
    }
}
