use rivet_platform::{IrqSink, Plic};

#[derive(Default)]
struct LineState {
    ext: Vec<(usize, bool)>,
}

impl LineState {
    fn level(&self, hart: usize) -> bool {
        self.ext
            .iter()
            .rev()
            .find(|(h, _)| *h == hart)
            .map(|(_, l)| *l)
            .unwrap_or(false)
    }
}

impl IrqSink for LineState {
    fn timer_irq(&mut self, _: usize, _: bool) {}
    fn software_irq(&mut self, _: usize, _: bool) {}
    fn external_irq(&mut self, hart: usize, level: bool) {
        self.ext.push((hart, level));
    }
}

const ENABLE0: u64 = 0x2000;
const THRESHOLD0: u64 = 0x20_0000;
const CLAIM0: u64 = 0x20_0004;

fn write_u32(plic: &mut Plic, offset: u64, value: u32, sink: &mut LineState) {
    plic.write(offset, &value.to_le_bytes(), false, sink).unwrap();
}

fn read_u32(plic: &mut Plic, offset: u64, sink: &mut LineState) -> u32 {
    let mut buf = [0u8; 4];
    plic.read(offset, &mut buf, false, sink).unwrap();
    u32::from_le_bytes(buf)
}

/// Sources 3 and 7 enabled at priorities 2 and 5.
fn armed_plic(sink: &mut LineState) -> Plic {
    let mut plic = Plic::new(1, 32);
    write_u32(&mut plic, 4 * 3, 2, sink);
    write_u32(&mut plic, 4 * 7, 5, sink);
    write_u32(&mut plic, ENABLE0, (1 << 3) | (1 << 7), sink);
    write_u32(&mut plic, THRESHOLD0, 0, sink);
    plic
}

#[test]
fn trigger_asserts_line_and_claim_returns_source() {
    let mut sink = LineState::default();
    let mut plic = armed_plic(&mut sink);

    plic.gateway_trigger_interrupt(3, &mut sink);
    assert!(sink.level(0));

    let claimed = read_u32(&mut plic, CLAIM0, &mut sink);
    assert_eq!(claimed, 3);
    // Pending cleared by the claim; line drops.
    assert!(!sink.level(0));
}

#[test]
fn claim_prefers_higher_priority_source() {
    let mut sink = LineState::default();
    let mut plic = armed_plic(&mut sink);

    plic.gateway_trigger_interrupt(3, &mut sink);
    plic.gateway_trigger_interrupt(7, &mut sink);

    assert_eq!(read_u32(&mut plic, CLAIM0, &mut sink), 7);
    assert_eq!(read_u32(&mut plic, CLAIM0, &mut sink), 3);
    assert_eq!(read_u32(&mut plic, CLAIM0, &mut sink), 0);
}

#[test]
fn gateway_blocks_retrigger_until_complete() {
    let mut sink = LineState::default();
    let mut plic = armed_plic(&mut sink);

    plic.gateway_trigger_interrupt(3, &mut sink);
    assert_eq!(read_u32(&mut plic, CLAIM0, &mut sink), 3);

    // Retrigger while in service: held off.
    plic.gateway_trigger_interrupt(3, &mut sink);
    assert!(!sink.level(0));
    assert_eq!(read_u32(&mut plic, CLAIM0, &mut sink), 0);

    // Completion reopens the gateway.
    write_u32(&mut plic, CLAIM0, 3, &mut sink);
    plic.gateway_trigger_interrupt(3, &mut sink);
    assert!(sink.level(0));
    assert_eq!(read_u32(&mut plic, CLAIM0, &mut sink), 3);
}

#[test]
fn threshold_masks_low_priority_sources() {
    let mut sink = LineState::default();
    let mut plic = armed_plic(&mut sink);
    write_u32(&mut plic, THRESHOLD0, 4, &mut sink);

    // Priority 2 <= threshold 4: no line.
    plic.gateway_trigger_interrupt(3, &mut sink);
    assert!(!sink.level(0));

    // Priority 5 > 4: line asserts.
    plic.gateway_trigger_interrupt(7, &mut sink);
    assert!(sink.level(0));
}

#[test]
fn disabled_source_does_not_interrupt() {
    let mut sink = LineState::default();
    let mut plic = Plic::new(1, 32);
    write_u32(&mut plic, 4 * 5, 7, &mut sink);
    // enable bit for source 5 left clear

    plic.gateway_trigger_interrupt(5, &mut sink);
    assert!(!sink.level(0));
    assert_eq!(read_u32(&mut plic, CLAIM0, &mut sink), 0);
}

#[test]
fn debug_read_peeks_without_claiming() {
    let mut sink = LineState::default();
    let mut plic = armed_plic(&mut sink);
    plic.gateway_trigger_interrupt(7, &mut sink);

    let mut buf = [0u8; 4];
    plic.read(CLAIM0, &mut buf, true, &mut sink).unwrap();
    assert_eq!(u32::from_le_bytes(buf), 7);
    // Still claimable afterwards.
    assert_eq!(read_u32(&mut plic, CLAIM0, &mut sink), 7);
}

#[test]
fn per_hart_enables_route_independently() {
    let mut sink = LineState::default();
    let mut plic = Plic::new(2, 32);
    write_u32(&mut plic, 4 * 3, 1, &mut sink);
    // Enable source 3 for hart 1 only.
    write_u32(&mut plic, ENABLE0 + 0x80, 1 << 3, &mut sink);

    plic.gateway_trigger_interrupt(3, &mut sink);
    assert!(!sink.level(0));
    assert!(sink.level(1));

    // Hart 1's context block.
    let claim1 = CLAIM0 + 0x1000;
    assert_eq!(read_u32(&mut plic, claim1, &mut sink), 3);
}

#[test]
fn misaligned_or_partial_access_errors() {
    let mut sink = LineState::default();
    let mut plic = Plic::new(1, 32);
    let mut buf = [0u8; 2];
    assert!(plic.read(0x2000, &mut buf, false, &mut sink).is_err());
    let mut buf4 = [0u8; 4];
    assert!(plic.read(0x2002, &mut buf4, false, &mut sink).is_err());
}
