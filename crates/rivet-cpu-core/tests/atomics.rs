mod common;

use common::*;

#[test]
fn lr_sc_succeeds_without_interference() {
    let mut bus = TestBus::new();
    let mut hart = hart32();
    bus.write_u32(0x2000, 41);
    bus.load_prog(
        0x1000,
        &[
            lui(5, 0x2),      // x5 = 0x2000
            lr_w(6, 5),       // x6 = 41, reserve
            addi(6, 6, 1),
            sc_w(7, 5, 6),    // expect success: x7 = 0
        ],
    );
    step_n(&mut hart, &mut bus, 4);
    assert_eq!(hart.regs.read(7), 0);
    assert_eq!(bus.read_u32(0x2000), 42);
}

#[test]
fn sc_fails_after_foreign_store() {
    let mut bus = TestBus::new();
    let mut hart = hart32();
    bus.write_u32(0x2000, 41);
    bus.load_prog(
        0x1000,
        &[lui(5, 0x2), lr_w(6, 5), addi(6, 6, 1), sc_w(7, 5, 6)],
    );
    step_n(&mut hart, &mut bus, 3);

    // Another master stores into the reserved word between LR and SC.
    use rivet_mem::BusPort;
    bus.bus_write(1, 0x2000, &100u32.to_le_bytes(), false).unwrap();

    step_n(&mut hart, &mut bus, 1);
    assert_eq!(hart.regs.read(7), 1);
    assert_eq!(bus.read_u32(0x2000), 100); // SC wrote nothing
}

#[test]
fn sc_without_reservation_fails() {
    let mut bus = TestBus::new();
    let mut hart = hart32();
    bus.write_u32(0x2000, 5);
    bus.load_prog(0x1000, &[lui(5, 0x2), addi(6, 0, 9), sc_w(7, 5, 6)]);
    step_n(&mut hart, &mut bus, 3);
    assert_eq!(hart.regs.read(7), 1);
    assert_eq!(bus.read_u32(0x2000), 5);
}

#[test]
fn sc_to_different_address_fails() {
    let mut bus = TestBus::new();
    let mut hart = hart32();
    bus.load_prog(
        0x1000,
        &[
            lui(5, 0x2),
            lr_w(6, 5),
            lui(8, 0x3),       // different word
            sc_w(7, 8, 6),
        ],
    );
    step_n(&mut hart, &mut bus, 4);
    assert_eq!(hart.regs.read(7), 1);
}

#[test]
fn amoadd_returns_old_and_stores_sum() {
    let mut bus = TestBus::new();
    let mut hart = hart32();
    bus.write_u32(0x2000, 7);
    bus.load_prog(
        0x1000,
        &[lui(5, 0x2), addi(6, 0, 3), amoadd_w(7, 5, 6)],
    );
    step_n(&mut hart, &mut bus, 3);
    assert_eq!(hart.regs.read(7), 7);
    assert_eq!(bus.read_u32(0x2000), 10);
    assert!(!bus.lock.is_locked());
}

#[test]
fn amoswap_exchanges() {
    let mut bus = TestBus::new();
    let mut hart = hart32();
    bus.write_u32(0x2000, 0xdead);
    bus.load_prog(
        0x1000,
        &[lui(5, 0x2), addi(6, 0, 0x77), amoswap_w(7, 5, 6)],
    );
    step_n(&mut hart, &mut bus, 3);
    assert_eq!(hart.regs.read(7), 0xdead);
    assert_eq!(bus.read_u32(0x2000), 0x77);
}

#[test]
fn amomaxu_is_unsigned() {
    let mut bus = TestBus::new();
    let mut hart = hart32();
    bus.write_u32(0x2000, 0xffff_fff0); // huge unsigned, -16 signed
    bus.load_prog(
        0x1000,
        &[lui(5, 0x2), addi(6, 0, 5), amomaxu_w(7, 5, 6)],
    );
    step_n(&mut hart, &mut bus, 3);
    assert_eq!(bus.read_u32(0x2000), 0xffff_fff0);
    assert_eq!(hart.regs.read(7), 0xffff_ffff_ffff_fff0); // old, sign-extended
}

#[test]
fn misaligned_amo_traps() {
    let mut bus = TestBus::new();
    let mut hart = hart32();
    hart.csrs.mtvec = 0x3000;
    bus.load_prog(0x1000, &[addi(5, 0, 0x2002), amoadd_w(7, 5, 6)]);
    step_n(&mut hart, &mut bus, 2);
    assert_eq!(hart.csrs.mcause, 6); // store/AMO address misaligned
    assert_eq!(hart.csrs.mtval, 0x2002);
    assert_eq!(hart.pc, 0x3000);
}

#[test]
fn own_store_preserves_reservation() {
    let mut bus = TestBus::new();
    let mut hart = hart32();
    bus.load_prog(
        0x1000,
        &[
            lui(5, 0x2),
            lr_w(6, 5),
            sw(6, 5, 0x100), // own store elsewhere
            sc_w(7, 5, 6),
        ],
    );
    step_n(&mut hart, &mut bus, 4);
    assert_eq!(hart.regs.read(7), 0);
}
