// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use super::common::engine;
use super::common::virtual_psw;
use super::common::vm_setup;
use super::common::TestMachine;
use super::common::MICBLOK;
use super::common::VPSW;
use ecpsvm::Outcome;
use s370defs::AssistControl;
use s370defs::Psw;
use s370defs::PswStates;
use s370defs::StorageKey;

#[test]
fn ssm_sets_virtual_system_mask() {
    let engine = engine();
    let mut machine = TestMachine::new();
    let mut state = vm_setup(&mut machine, &virtual_psw(0x4000));
    machine.put_u8(0x500, 0x00);
    let before = state.clone();

    let outcome = engine.ssm(&mut state, &mut machine, 0x500).unwrap();
    assert_eq!(outcome, Outcome::Completed);
    let vpsw = machine.psw(VPSW);
    assert_eq!(vpsw.system_mask, 0);
    // The virtual PSW picks up the real instruction address.
    assert_eq!(vpsw.ia, 0x3004);
    assert_eq!(state, before);
}

#[test]
fn ssm_suppressed_by_virtual_cr0() {
    let engine = engine();
    let mut machine = TestMachine::new();
    let mut state = vm_setup(&mut machine, &virtual_psw(0x4000));
    machine.put_u32(MICBLOK + 4, 0x700);
    machine.put_u32(0x700, 0x4000_0000);
    let storage = machine.storage.clone();

    assert_eq!(
        engine.ssm(&mut state, &mut machine, 0x500).unwrap(),
        Outcome::Declined
    );
    assert_eq!(machine.storage, storage);
}

#[test]
fn ssm_cannot_enable_with_interrupt_pending() {
    let engine = engine();
    let mut machine = TestMachine::new();
    let mut vpsw = virtual_psw(0x4000);
    vpsw.system_mask = 0;
    let mut state = vm_setup(&mut machine, &vpsw);
    machine.put_u32(MICBLOK + 8, 0x8000_0000 | VPSW);
    machine.put_u8(0x500, 0x03);

    assert_eq!(
        engine.ssm(&mut state, &mut machine, 0x500).unwrap(),
        Outcome::Declined
    );
    assert_eq!(machine.psw(VPSW).system_mask, 0);

    // Without the pending flag the same change is fine.
    machine.put_u32(MICBLOK + 8, VPSW);
    assert_eq!(
        engine.ssm(&mut state, &mut machine, 0x500).unwrap(),
        Outcome::Completed
    );
    assert_eq!(machine.psw(VPSW).system_mask, 0x03);
}

#[test]
fn ssm_cannot_touch_dat() {
    let engine = engine();
    let mut machine = TestMachine::new();
    let mut state = vm_setup(&mut machine, &virtual_psw(0x4000));
    machine.put_u8(0x500, 0x07);
    assert_eq!(
        engine.ssm(&mut state, &mut machine, 0x500).unwrap(),
        Outcome::Declined
    );
}

fn svc_new_psw() -> Psw {
    Psw {
        system_mask: 0x00,
        states: PswStates::new()
            .with_extended_control(true)
            .with_key(3),
        cc: 2,
        ia: 0x6000,
        ..Default::default()
    }
}

#[test]
fn svc_reflected_to_virtual_machine() {
    let engine = engine();
    let mut machine = TestMachine::new();
    let mut state = vm_setup(&mut machine, &virtual_psw(0x4000));
    state.psw.cc = 1;
    machine.put_psw(0x60, &svc_new_psw());

    let outcome = engine.svc(&mut state, &mut machine, 0x0c).unwrap();
    assert_eq!(outcome, Outcome::Completed);

    let old = machine.psw(0x20);
    assert!(old.is_ec());
    assert_eq!(old.ia, 0x3004);
    assert_eq!(old.cc, 1);
    assert_eq!(old.system_mask, 0x03);
    assert_eq!(machine.u32(0x88), 0x0002_000c);

    assert_eq!(machine.psw(VPSW), svc_new_psw());
    assert_eq!(state.psw.ia, 0x6000);
    assert_eq!(state.psw.cc, 2);
    assert_eq!(state.psw.key(), 3);
    // The real PSW stays a problem state EC PSW.
    assert!(state.psw.is_problem_state());
    assert_eq!(state.psw.system_mask, 0x03);
}

#[test]
fn svc_bc_mode_carries_code_in_old_psw() {
    let engine = engine();
    let mut machine = TestMachine::new();
    let mut vpsw = virtual_psw(0x4000);
    vpsw.states.set_extended_control(false);
    vpsw.system_mask = 0xff;
    let mut state = vm_setup(&mut machine, &vpsw);
    let mut new = svc_new_psw();
    new.states.set_extended_control(false);
    new.system_mask = 0xff;
    machine.put_psw(0x60, &new);

    assert_eq!(
        engine.svc(&mut state, &mut machine, 0x23).unwrap(),
        Outcome::Completed
    );
    let old = machine.psw(0x20);
    assert_eq!(old.interruption_code, 0x23);
    assert_eq!(old.ia, 0x3004);
    assert_eq!(machine.u32(0x88), 0);
}

#[test]
fn svc_76_always_declines() {
    let engine = engine();
    let mut machine = TestMachine::new();
    let mut state = vm_setup(&mut machine, &virtual_psw(0x4000));
    machine.put_psw(0x60, &svc_new_psw());
    let before = state.clone();
    let storage = machine.storage.clone();

    assert_eq!(
        engine.svc(&mut state, &mut machine, 76).unwrap(),
        Outcome::Declined
    );
    assert_eq!(state, before);
    assert_eq!(machine.storage, storage);
}

#[test]
fn svc_inhibited_by_cr6() {
    let engine = engine();
    let mut machine = TestMachine::new();
    let mut state = vm_setup(&mut machine, &virtual_psw(0x4000));
    state.crs[6] = AssistControl::from(state.crs[6])
        .with_svc_inhibit(true)
        .into();
    machine.put_psw(0x60, &svc_new_psw());
    assert_eq!(
        engine.svc(&mut state, &mut machine, 1).unwrap(),
        Outcome::Declined
    );
}

#[test]
fn lpsw_loads_virtual_psw() {
    let engine = engine();
    let mut machine = TestMachine::new();
    let mut state = vm_setup(&mut machine, &virtual_psw(0x4000));
    let new = Psw {
        system_mask: 0x01,
        states: PswStates::new().with_extended_control(true).with_key(5),
        cc: 3,
        program_mask: 0xa,
        ia: 0x7000,
        ..Default::default()
    };
    machine.put_psw(0x600, &new);

    assert_eq!(
        engine.lpsw(&mut state, &mut machine, 0x600).unwrap(),
        Outcome::Completed
    );
    assert_eq!(machine.psw(VPSW), new);
    assert_eq!(state.psw.ia, 0x7000);
    assert_eq!(state.psw.cc, 3);
    assert_eq!(state.psw.key(), 5);
    assert_eq!(state.psw.program_mask, 0xa);
}

#[test]
fn lpsw_rejections_leave_state_alone() {
    let engine = engine();
    let mut machine = TestMachine::new();
    let mut state = vm_setup(&mut machine, &virtual_psw(0x4000));
    let mut new = virtual_psw(0x7000);
    machine.put_psw(0x600, &new);
    let before = state.clone();
    let storage = machine.storage.clone();

    // Odd operand.
    assert_eq!(
        engine.lpsw(&mut state, &mut machine, 0x601).unwrap(),
        Outcome::Declined
    );
    assert_eq!(state, before);
    assert_eq!(machine.storage, storage);

    // Wait state.
    new.states.set_wait(true);
    machine.put_psw(0x600, &new);
    assert_eq!(
        engine.lpsw(&mut state, &mut machine, 0x600).unwrap(),
        Outcome::Declined
    );

    // Mode change.
    new.states.set_wait(false);
    new.states.set_extended_control(false);
    machine.put_psw(0x600, &new);
    assert_eq!(
        engine.lpsw(&mut state, &mut machine, 0x600).unwrap(),
        Outcome::Declined
    );

    // LPSW not enabled in the MICBLOK.
    machine.put_psw(0x600, &virtual_psw(0x7000));
    machine.put_u8(MICBLOK + 20, 0x08);
    assert_eq!(
        engine.lpsw(&mut state, &mut machine, 0x600).unwrap(),
        Outcome::Declined
    );
    assert_eq!(state, before);
}

#[test]
fn lpsw_through_translation() {
    let engine = engine();
    let mut machine = TestMachine::new();
    let mut state = vm_setup(&mut machine, &virtual_psw(0x4000));
    state.psw.system_mask = 0x07;
    state.crs[1] = machine.map(0x8000, 0x8800, 0x5000, 0x2_0000);
    machine.put_psw(0x2_0100, &virtual_psw(0x7000));

    assert_eq!(
        engine.lpsw(&mut state, &mut machine, 0x5100).unwrap(),
        Outcome::Completed
    );
    assert_eq!(state.psw.ia, 0x7000);

    // Same segment, page not mapped.
    assert_eq!(
        engine.lpsw(&mut state, &mut machine, 0x6100).unwrap(),
        Outcome::Declined
    );
}

#[test]
fn lpsw_fetch_protected() {
    let engine = engine();
    let mut machine = TestMachine::new();
    let mut state = vm_setup(&mut machine, &virtual_psw(0x4000));
    state.psw.states.set_key(3);
    machine.put_psw(0x600, &virtual_psw(0x7000));
    machine.set_key(
        0x600,
        StorageKey::new()
            .with_access_key(5)
            .with_fetch_protect(true),
    );
    assert_eq!(
        engine.lpsw(&mut state, &mut machine, 0x600).unwrap(),
        Outcome::Declined
    );

    // Matching key.
    state.psw.states.set_key(5);
    assert_eq!(
        engine.lpsw(&mut state, &mut machine, 0x600).unwrap(),
        Outcome::Completed
    );
}

#[test]
fn virtual_timer_interrupt_check() {
    let engine = engine();
    let mut machine = TestMachine::new();
    let mut state = vm_setup(&mut machine, &virtual_psw(0x4000));
    assert!(!engine.virtual_timer_interrupt_allowed(&state));

    state.crs[6] = AssistControl::from(state.crs[6])
        .with_virtual_timer(true)
        .into();
    assert!(engine.virtual_timer_interrupt_allowed(&state));

    state.vtimer_pending = true;
    assert!(!engine.virtual_timer_interrupt_allowed(&state));
    state.vtimer_pending = false;

    state.psw.system_mask = 0x02;
    assert!(!engine.virtual_timer_interrupt_allowed(&state));
}

#[test]
fn gate_records_virtual_timer_address() {
    let engine = engine();
    let mut machine = TestMachine::new();
    let mut state = vm_setup(&mut machine, &virtual_psw(0x4000));
    state.crs[6] = AssistControl::from(state.crs[6])
        .with_virtual_timer(true)
        .into();
    machine.put_u32(MICBLOK + 16, 0x1_0050);
    machine.put_u8(0x500, 0x01);

    assert_eq!(
        engine.ssm(&mut state, &mut machine, 0x500).unwrap(),
        Outcome::Completed
    );
    assert_eq!(state.vtimer_address, Some(0x1_0050));
}

#[test]
fn virtual_timer_address_cleared_when_vm_assist_off() {
    let engine = engine();
    let mut machine = TestMachine::new();
    let mut state = vm_setup(&mut machine, &virtual_psw(0x4000));
    state.crs[6] = AssistControl::from(state.crs[6])
        .with_vm_assist(false)
        .into();
    state.vtimer_address = Some(0x1_0050);

    assert_eq!(
        engine.ssm(&mut state, &mut machine, 0x500).unwrap(),
        Outcome::Declined
    );
    assert_eq!(state.vtimer_address, None);
}

#[test]
fn virtual_timer_address_kept_when_assist_declines() {
    let engine = engine();
    let mut machine = TestMachine::new();
    let mut state = vm_setup(&mut machine, &virtual_psw(0x4000));
    state.crs[6] = AssistControl::from(state.crs[6])
        .with_virtual_timer(true)
        .into();
    machine.put_u32(MICBLOK + 16, 0x1_0050);
    // Virtual CR0 suppresses SSM.
    machine.put_u32(MICBLOK + 4, 0x700);
    machine.put_u32(0x700, 0x4000_0000);
    let storage = machine.storage.clone();

    assert_eq!(
        engine.ssm(&mut state, &mut machine, 0x500).unwrap(),
        Outcome::Declined
    );
    assert_eq!(state.vtimer_address, Some(0x1_0050));
    assert_eq!(machine.storage, storage);
}
