// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use super::common::cp_state;
use super::common::engine;
use super::common::TestMachine;
use ecpsvm::layout::cortable;
use ecpsvm::Outcome;
use s370defs::StorageKey;

const LOCK_PARMS: u32 = 0x2400;
const UNLOCK_PARMS: u32 = 0x2500;
const CORE_TABLE: u32 = 0x4_0000;
const PAGE: u32 = 0x3_0000;
const ENTRY: u32 = CORE_TABLE + (PAGE >> 8);

fn core_table() -> TestMachine {
    let mut machine = TestMachine::new();
    machine.put_u32(LOCK_PARMS, CORE_TABLE);
    machine.put_u32(UNLOCK_PARMS, 0x10_0000);
    machine.put_u32(UNLOCK_PARMS + 4, CORE_TABLE);
    machine.put_u8(ENTRY + cortable::ENTRY_FLAGS, cortable::CORFREE);
    machine
}

#[test]
fn lock_and_unlock() {
    let engine = engine();
    let mut machine = core_table();
    let mut state = cp_state();

    for count in 1..=2 {
        assert_eq!(
            engine
                .lckpg(&mut state, &mut machine, LOCK_PARMS, PAGE + 0x123)
                .unwrap(),
            Outcome::Completed
        );
        assert_eq!(machine.u32(ENTRY + cortable::ENTRY_LOCKCOUNT), count);
        assert_eq!(state.psw.ia, 0x2000);
    }
    assert_eq!(
        machine.u8(ENTRY + cortable::ENTRY_FLAGS),
        cortable::CORFREE | cortable::CORLOCK
    );

    assert_eq!(
        engine
            .ulkpg(&mut state, &mut machine, UNLOCK_PARMS, PAGE)
            .unwrap(),
        Outcome::Completed
    );
    assert_eq!(machine.u32(ENTRY + cortable::ENTRY_LOCKCOUNT), 1);
    assert_ne!(machine.u8(ENTRY + cortable::ENTRY_FLAGS) & cortable::CORLOCK, 0);

    assert_eq!(
        engine
            .ulkpg(&mut state, &mut machine, UNLOCK_PARMS, PAGE)
            .unwrap(),
        Outcome::Completed
    );
    assert_eq!(machine.u32(ENTRY + cortable::ENTRY_LOCKCOUNT), 0);
    assert_eq!(machine.u8(ENTRY + cortable::ENTRY_FLAGS), 0);

    let storage = machine.storage.clone();
    assert_eq!(
        engine
            .ulkpg(&mut state, &mut machine, UNLOCK_PARMS, PAGE)
            .unwrap(),
        Outcome::Declined
    );
    assert_eq!(machine.storage, storage);
}

#[test]
fn unlock_beyond_real_storage_declines() {
    let engine = engine();
    let mut machine = core_table();
    machine.put_u32(UNLOCK_PARMS, 0x2_0000);
    machine.put_u8(ENTRY + cortable::ENTRY_FLAGS, cortable::CORLOCK);
    machine.put_u32(ENTRY + cortable::ENTRY_LOCKCOUNT, 1);
    let mut state = cp_state();
    assert_eq!(
        engine
            .ulkpg(&mut state, &mut machine, UNLOCK_PARMS, PAGE)
            .unwrap(),
        Outcome::Declined
    );
    assert_eq!(machine.u32(ENTRY + cortable::ENTRY_LOCKCOUNT), 1);
}

#[test]
fn trbrg_translates_and_branches() {
    let engine = engine();
    let mut machine = core_table();
    let mut state = cp_state();
    state.crs[1] = machine.map(0x8000, 0x8800, 0x5000, PAGE);
    state.gps[1] = 0x5abc;
    state.psw.cc = 3;

    assert_eq!(
        engine
            .trbrg(&mut state, &mut machine, LOCK_PARMS, 0x4400)
            .unwrap(),
        Outcome::Completed
    );
    assert_eq!(state.gps[2], PAGE + 0xabc);
    assert_eq!(state.psw.ia, 0x4400);
    assert_eq!(state.psw.cc, 0);
    // Nothing locked.
    assert_eq!(machine.u32(ENTRY + cortable::ENTRY_LOCKCOUNT), 0);
}

#[test]
fn trbrg_declines_on_fault() {
    let engine = engine();
    let mut machine = core_table();
    let mut state = cp_state();
    state.crs[1] = machine.map(0x8000, 0x8800, 0x5000, PAGE);
    state.gps[1] = 0x6000;
    let before = state.clone();

    assert_eq!(
        engine
            .trbrg(&mut state, &mut machine, LOCK_PARMS, 0x4400)
            .unwrap(),
        Outcome::Declined
    );
    assert_eq!(state, before);
}

#[test]
fn changed_shared_page_declines() {
    let engine = engine();
    let mut machine = core_table();
    let mut state = cp_state();
    state.crs[1] = machine.map(0x8000, 0x8800, 0x5000, PAGE);
    state.gps[1] = 0x5000;
    machine.put_u8(ENTRY + cortable::ENTRY_FLAGS, cortable::CORSHARE);

    assert_eq!(
        engine
            .trbrg(&mut state, &mut machine, LOCK_PARMS, 0x4400)
            .unwrap(),
        Outcome::Completed
    );

    // A change to the second 2K block of the frame counts too.
    machine.set_key(PAGE + 0x800, StorageKey::new().with_change(true));
    assert_eq!(
        engine
            .trlok(&mut state, &mut machine, LOCK_PARMS, 0x4400)
            .unwrap(),
        Outcome::Declined
    );
    assert_eq!(machine.u32(ENTRY + cortable::ENTRY_LOCKCOUNT), 0);
}

#[test]
fn trlok_locks_translated_page() {
    let engine = engine();
    let mut machine = core_table();
    let mut state = cp_state();
    state.crs[1] = machine.map(0x8000, 0x8800, 0x5000, PAGE);
    state.gps[1] = 0x5010;

    assert_eq!(
        engine
            .trlok(&mut state, &mut machine, LOCK_PARMS, 0x4400)
            .unwrap(),
        Outcome::Completed
    );
    assert_eq!(state.gps[2], PAGE + 0x10);
    assert_eq!(state.psw.ia, 0x4400);
    assert_eq!(machine.u32(ENTRY + cortable::ENTRY_LOCKCOUNT), 1);
    assert_eq!(
        machine.u8(ENTRY + cortable::ENTRY_FLAGS),
        cortable::CORFREE | cortable::CORLOCK
    );
}
