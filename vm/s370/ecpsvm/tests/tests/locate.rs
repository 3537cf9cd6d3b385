// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use super::common::cp_state;
use super::common::engine;
use super::common::TestMachine;
use ecpsvm::Outcome;

const VINDEX: u32 = 0x3000;
const VBASES: u32 = 0x3100;

/// Virtual device 191 on channel 1, unit 9.
fn virtual_config() -> TestMachine {
    let mut machine = TestMachine::new();
    machine.put_u32(VBASES, 0x3200);
    machine.put_u32(VBASES + 4, 0x3400);
    machine.put_u32(VBASES + 8, 0x3600);
    machine.put_u16(VINDEX + 2, 0x10);
    machine.put_u16(0x3210 + 8 + 0x12, 0x20);
    machine.put_u16(0x3420 + 8 + 2, 0x40);
    machine
}

#[test]
fn scnvu_finds_virtual_blocks() {
    let engine = engine();
    let mut machine = virtual_config();
    let mut state = cp_state();
    state.gps[1] = 0x191;
    state.psw.cc = 3;

    assert_eq!(
        engine
            .scnvu(&mut state, &mut machine, VINDEX, VBASES)
            .unwrap(),
        Outcome::Completed
    );
    assert_eq!(&state.gps[6..=8], [0x3210, 0x3420, 0x3640]);
    assert_eq!(state.psw.cc, 0);
    assert_eq!(state.psw.ia, 0x2000);
}

#[test]
fn scnvu_missing_device_declines() {
    let engine = engine();
    let mut machine = virtual_config();
    machine.put_u16(0x3420 + 8 + 2, 0x8000);
    let mut state = cp_state();
    state.gps[1] = 0x191;
    let before = state.clone();

    assert_eq!(
        engine
            .scnvu(&mut state, &mut machine, VINDEX, VBASES)
            .unwrap(),
        Outcome::Declined
    );
    assert_eq!(state, before);

    // Missing channel.
    machine.put_u16(VINDEX + 2, 0xffff);
    assert_eq!(
        engine
            .scnvu(&mut state, &mut machine, VINDEX, VBASES)
            .unwrap(),
        Outcome::Declined
    );
}

const IOCT: u32 = 0x3800;
const RCU: u32 = 0x3c40;

/// Real device 12B behind a 16-device control unit that is an alternate path
/// of the unit at 0x3d00.
fn real_config() -> TestMachine {
    let mut machine = TestMachine::new();
    machine.put_u32(IOCT, 0x3900);
    machine.put_u32(IOCT + 4, 0x3a00);
    machine.put_u32(IOCT + 8, 0x3c00);
    machine.put_u32(IOCT + 12, 0x3e00);
    machine.put_u16(0x3902, 0);
    // The 8-device slot is empty, the 16-device slot is not.
    machine.put_u16(0x3a20 + 0x0a, 0x8000);
    machine.put_u16(0x3a20 + 0x08, 0x40);
    machine.put_u16(RCU + 0x28 + 0x16, 3);
    machine.put_u8(RCU + 5, 0x40);
    machine.put_u32(RCU + 0x10, 0x3d00);
    machine
}

#[test]
fn scnru_finds_real_blocks() {
    let engine = engine();
    let mut machine = real_config();
    let mut state = cp_state();
    state.gps[15] = 0xffff_ffff;

    assert_eq!(
        engine.scnru(&mut state, &mut machine, 0x12b, IOCT).unwrap(),
        Outcome::Completed
    );
    assert_eq!(&state.gps[6..=8], [0x3a00, 0x3d00, 0x3e18]);
    assert_eq!(state.gps[15], 0);
    assert_eq!(state.psw.cc, 0);
    assert_eq!(state.psw.ia, 0x2000);
}

#[test]
fn scnru_primary_unit() {
    let engine = engine();
    let mut machine = real_config();
    machine.put_u8(RCU + 5, 0);
    let mut state = cp_state();

    assert_eq!(
        engine.scnru(&mut state, &mut machine, 0x12b, IOCT).unwrap(),
        Outcome::Completed
    );
    assert_eq!(state.gps[7], RCU);
}

#[test]
fn scnru_missing_blocks_decline() {
    let engine = engine();
    let mut machine = real_config();
    let mut state = cp_state();
    let before = state.clone();

    machine.put_u16(RCU + 0x28 + 0x16, 0x8000);
    assert_eq!(
        engine.scnru(&mut state, &mut machine, 0x12b, IOCT).unwrap(),
        Outcome::Declined
    );
    assert_eq!(state, before);

    machine.put_u16(RCU + 0x28 + 0x16, 3);
    machine.put_u16(0x3a20 + 0x08, 0x8000);
    assert_eq!(
        engine.scnru(&mut state, &mut machine, 0x12b, IOCT).unwrap(),
        Outcome::Declined
    );
}
