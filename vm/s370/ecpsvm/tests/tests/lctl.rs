// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use super::common::engine;
use super::common::virtual_psw;
use super::common::vm_setup;
use super::common::TestMachine;
use super::common::VMBLOK;
use ecpsvm::layout::vmblok;
use ecpsvm::CpuState;
use ecpsvm::Outcome;

const ECBLOK: u32 = 0x1800;

/// A VM with SET ECMODE ON and virtual CR0 = 0x00800000.
fn extended_vm(machine: &mut TestMachine) -> CpuState {
    let state = vm_setup(machine, &virtual_psw(0x4000));
    machine.put_u8(VMBLOK + vmblok::VMPSTAT, vmblok::VMV370R);
    machine.put_u32(VMBLOK + vmblok::VMECEXT, ECBLOK);
    machine.put_u32(ECBLOK, 0x0080_0000);
    state
}

#[test]
fn loads_cr12_and_cr13_into_real_registers() {
    let engine = engine();
    let mut machine = TestMachine::new();
    let mut state = extended_vm(&mut machine);
    machine.put_u32(0x600, 0xaaaa_0000);
    machine.put_u32(0x604, 0xbbbb_0000);

    assert_eq!(
        engine.lctl(&mut state, &mut machine, 12, 13, 0x600).unwrap(),
        Outcome::Completed
    );
    assert_eq!(state.crs[12], 0xaaaa_0000);
    assert_eq!(state.crs[13], 0xbbbb_0000);
    assert_eq!(machine.u32(ECBLOK + 48), 0xaaaa_0000);
    assert_eq!(machine.u32(ECBLOK + 52), 0xbbbb_0000);
}

#[test]
fn shadow_only_registers() {
    let engine = engine();
    let mut machine = TestMachine::new();
    let mut state = extended_vm(&mut machine);
    let cr6 = state.crs[6];
    machine.put_u32(0x600, 0x1234_5678);

    assert_eq!(
        engine.lctl(&mut state, &mut machine, 6, 6, 0x600).unwrap(),
        Outcome::Completed
    );
    assert_eq!(machine.u32(ECBLOK + 24), 0x1234_5678);
    assert_eq!(state.crs[6], cr6);
}

#[test]
fn cr1_always_declines() {
    let engine = engine();
    let mut machine = TestMachine::new();
    let mut state = extended_vm(&mut machine);
    let before = state.clone();
    let storage = machine.storage.clone();

    assert_eq!(
        engine.lctl(&mut state, &mut machine, 1, 1, 0x600).unwrap(),
        Outcome::Declined
    );
    // A range that includes CR1 declines as a whole.
    assert_eq!(
        engine.lctl(&mut state, &mut machine, 0, 2, 0x600).unwrap(),
        Outcome::Declined
    );
    assert_eq!(state, before);
    assert_eq!(machine.storage, storage);
}

#[test]
fn cr0_high_half_is_fixed() {
    let engine = engine();
    let mut machine = TestMachine::new();
    let mut state = extended_vm(&mut machine);
    machine.put_u32(0x600, 0x0081_0000);
    assert_eq!(
        engine.lctl(&mut state, &mut machine, 0, 0, 0x600).unwrap(),
        Outcome::Declined
    );

    machine.put_u32(0x600, 0x0080_0040);
    assert_eq!(
        engine.lctl(&mut state, &mut machine, 0, 0, 0x600).unwrap(),
        Outcome::Completed
    );
    assert_eq!(machine.u32(ECBLOK), 0x0080_0040);
}

#[test]
fn wrapping_range() {
    let engine = engine();
    let mut machine = TestMachine::new();
    let mut state = extended_vm(&mut machine);
    machine.put_u32(0x600, 0xeeee_eeee);
    machine.put_u32(0x604, 0xffff_ffff);
    machine.put_u32(0x608, 0x0080_0001);

    assert_eq!(
        engine.lctl(&mut state, &mut machine, 14, 0, 0x600).unwrap(),
        Outcome::Completed
    );
    assert_eq!(machine.u32(ECBLOK + 56), 0xeeee_eeee);
    assert_eq!(machine.u32(ECBLOK + 60), 0xffff_ffff);
    assert_eq!(machine.u32(ECBLOK), 0x0080_0001);
}

#[test]
fn basic_mode_vm_loads_only_cr0() {
    let engine = engine();
    let mut machine = TestMachine::new();
    let mut state = vm_setup(&mut machine, &virtual_psw(0x4000));
    machine.put_u32(VMBLOK + vmblok::VMVCR0, 0x0080_0000);
    machine.put_u32(0x600, 0x0080_00ff);

    assert_eq!(
        engine.lctl(&mut state, &mut machine, 2, 2, 0x600).unwrap(),
        Outcome::Declined
    );
    assert_eq!(
        engine.lctl(&mut state, &mut machine, 0, 0, 0x600).unwrap(),
        Outcome::Completed
    );
    assert_eq!(machine.u32(VMBLOK + vmblok::VMVCR0), 0x0080_00ff);
}

#[test]
fn unaligned_operand_declines() {
    let engine = engine();
    let mut machine = TestMachine::new();
    let mut state = extended_vm(&mut machine);
    assert_eq!(
        engine.lctl(&mut state, &mut machine, 12, 12, 0x602).unwrap(),
        Outcome::Declined
    );
}
