use rivet_cpu_core::HartBus;
use rivet_mem::{BusError, BusLock, BusPort, DmiRange, PortMapping, Ram, ReservationSet};
use rivet_platform::{Clint, IrqSink, Plic, CLINT_SIZE, PLIC_SIZE};

/// Default device window bases, following the FE310-flavoured map of the
/// platform.
pub const CLINT_BASE: u64 = 0x0200_0000;
pub const PLIC_BASE: u64 = 0x4000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Ram,
    Clint,
    Plic,
}

/// An interrupt line change recorded by a device, delivered to the harts
/// at the next suspension point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqEvent {
    Timer { hart: usize, level: bool },
    Software { hart: usize, level: bool },
    External { hart: usize, level: bool },
}

/// Scheduler-owned event buffer the devices notify into.
#[derive(Debug, Default)]
struct PendingIrqs(Vec<IrqEvent>);

impl IrqSink for PendingIrqs {
    fn timer_irq(&mut self, hart: usize, level: bool) {
        self.0.push(IrqEvent::Timer { hart, level });
    }

    fn software_irq(&mut self, hart: usize, level: bool) {
        self.0.push(IrqEvent::Software { hart, level });
    }

    fn external_irq(&mut self, hart: usize, level: bool) {
        self.0.push(IrqEvent::External { hart, level });
    }
}

/// The interconnect: routes physical accesses to RAM, CLINT or PLIC, and
/// owns the cross-hart pieces (bus lock, LR/SC reservations, DMI windows,
/// pending interrupt events).
pub struct SystemBus {
    ports: Vec<(PortMapping, Target)>,
    mem_start: u64,
    pub ram: Ram,
    pub clint: Clint,
    pub plic: Plic,
    pub bus_lock: BusLock,
    reservations: ReservationSet,
    instr_dmi: Option<DmiRange>,
    data_dmi: Option<DmiRange>,
    pending_irqs: PendingIrqs,
    /// Simulation time the devices see; refreshed by the driver at
    /// suspension points and by mtime reads mid-quantum.
    pub now_ns: u64,
}

impl SystemBus {
    pub fn new(mem_start: u64, mem_size: usize, num_harts: usize, num_irq_sources: usize) -> Self {
        let ports = vec![
            (
                PortMapping::new(mem_start, mem_start + mem_size as u64 - 1),
                Target::Ram,
            ),
            (
                PortMapping::new(CLINT_BASE, CLINT_BASE + CLINT_SIZE - 1),
                Target::Clint,
            ),
            (
                PortMapping::new(PLIC_BASE, PLIC_BASE + PLIC_SIZE - 1),
                Target::Plic,
            ),
        ];
        SystemBus {
            ports,
            mem_start,
            ram: Ram::new(mem_size),
            clint: Clint::new(num_harts),
            plic: Plic::new(num_harts, num_irq_sources),
            bus_lock: BusLock::new(),
            reservations: ReservationSet::new(num_harts),
            instr_dmi: None,
            data_dmi: None,
            pending_irqs: PendingIrqs::default(),
            now_ns: 0,
        }
    }

    pub fn set_instr_dmi(&mut self, enabled: bool) {
        self.instr_dmi = enabled.then(|| DmiRange::new(self.mem_start, self.ram.size() as u64));
    }

    pub fn set_data_dmi(&mut self, enabled: bool) {
        self.data_dmi = enabled.then(|| DmiRange::new(self.mem_start, self.ram.size() as u64));
    }

    fn decode(&self, paddr: u64) -> Option<(u64, Target)> {
        self.ports
            .iter()
            .find(|(port, _)| port.contains(paddr))
            .map(|(port, target)| (port.global_to_local(paddr), *target))
    }

    /// Drain the interrupt events devices queued since the last call.
    pub fn take_irq_events(&mut self) -> Vec<IrqEvent> {
        std::mem::take(&mut self.pending_irqs.0)
    }

    /// A device edge into the PLIC gateway.
    pub fn plic_trigger(&mut self, src: usize) {
        self.plic.gateway_trigger_interrupt(src, &mut self.pending_irqs);
    }

    /// Service due CLINT deadlines at the bus's current time.
    pub fn process_timers(&mut self) {
        self.clint.process(self.now_ns, &mut self.pending_irqs);
    }
}

impl BusPort for SystemBus {
    fn bus_read(&mut self, paddr: u64, buf: &mut [u8], debug: bool) -> Result<(), BusError> {
        if !debug {
            if let Some(dmi) = self.data_dmi {
                if let Some(off) = dmi.offset_of(paddr, buf.len() as u64) {
                    if self.ram.read(off, buf) {
                        return Ok(());
                    }
                }
            }
        }
        let (local, target) = self
            .decode(paddr)
            .ok_or(BusError::AddressError { addr: paddr })?;
        match target {
            Target::Ram => {
                if self.ram.read(local, buf) {
                    Ok(())
                } else {
                    Err(BusError::AddressError { addr: paddr })
                }
            }
            Target::Clint => self.clint.read(local, buf, self.now_ns, debug),
            Target::Plic => self.plic.read(local, buf, debug, &mut self.pending_irqs),
        }
    }

    fn bus_write(
        &mut self,
        hart: usize,
        paddr: u64,
        buf: &[u8],
        debug: bool,
    ) -> Result<(), BusError> {
        if !debug {
            // Any store by one master kills other masters' overlapping
            // reservations, whatever device it lands on.
            self.reservations.on_write(Some(hart), paddr, buf.len() as u64);
            if let Some(dmi) = self.data_dmi {
                if let Some(off) = dmi.offset_of(paddr, buf.len() as u64) {
                    if self.ram.write(off, buf) {
                        return Ok(());
                    }
                }
            }
        }
        let (local, target) = self
            .decode(paddr)
            .ok_or(BusError::AddressError { addr: paddr })?;
        match target {
            Target::Ram => {
                if self.ram.write(local, buf) {
                    Ok(())
                } else {
                    Err(BusError::AddressError { addr: paddr })
                }
            }
            Target::Clint => {
                self.clint
                    .write(local, buf, self.now_ns, debug, &mut self.pending_irqs)
            }
            Target::Plic => self.plic.write(local, buf, debug, &mut self.pending_irqs),
        }
    }

    fn reserve(&mut self, hart: usize, paddr: u64, len: u64) {
        self.reservations.reserve(hart, paddr, len);
    }

    fn check_reservation(&self, hart: usize, paddr: u64, len: u64) -> bool {
        self.reservations.matches(hart, paddr, len)
    }

    fn clear_reservation(&mut self, hart: usize) {
        self.reservations.clear(hart);
    }

    fn lock(&mut self, hart: usize) {
        self.bus_lock.lock(hart);
    }

    fn unlock(&mut self, hart: usize) {
        self.bus_lock.unlock(hart);
    }
}

impl HartBus for SystemBus {
    fn update_and_get_mtime(&mut self, now_ns: u64) -> u64 {
        if now_ns > self.now_ns {
            self.now_ns = now_ns;
        }
        self.clint.update_and_get_mtime(self.now_ns)
    }

    fn fetch(&mut self, paddr: u64) -> Result<u32, BusError> {
        if let Some(dmi) = self.instr_dmi {
            if let Some(off) = dmi.offset_of(paddr, 4) {
                let mut buf = [0u8; 4];
                if self.ram.read(off, &mut buf) {
                    return Ok(u32::from_le_bytes(buf));
                }
            }
        }
        let mut buf = [0u8; 4];
        self.bus_read(paddr, &mut buf, false)?;
        Ok(u32::from_le_bytes(buf))
    }
}
