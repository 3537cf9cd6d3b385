// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Validation of virtual PSW changes made by the VM assists.

use crate::layout::Micblok;
use s370defs::Psw;
use s370defs::EC_SYSMASK_DAT;
use s370defs::EC_SYSMASK_IO;
use s370defs::EC_SYSMASK_PER;
use s370defs::EC_SYSMASK_RESERVED;
use s370defs::SYSMASK_EXTERNAL;
use thiserror::Error;

/// Why a virtual PSW change must be left to the control program.
#[derive(Debug, Error, Copy, Clone, PartialEq, Eq)]
pub enum TransitionReject {
    #[error("EC/BC mode change")]
    ModeChange,
    #[error("DAT or PER change")]
    TranslationOrPer,
    #[error("interruption enabled while one is pending")]
    EnablesPending,
    #[error("wait state")]
    Wait,
    #[error("reserved system mask bits")]
    ReservedMask,
    #[error("odd instruction address")]
    OddAddress,
}

/// Checks whether the virtual PSW can move from `old` to `new` without the
/// control program's involvement. `pending` is the MICBLOK pending byte.
pub fn check_transition(old: &Psw, new: &Psw, pending: u8) -> Result<(), TransitionReject> {
    if old.is_ec() != new.is_ec() {
        return Err(TransitionReject::ModeChange);
    }
    let ec = new.is_ec();
    let dat_per = EC_SYSMASK_DAT | EC_SYSMASK_PER;
    if ec && (new.system_mask & dat_per) != (old.system_mask & dat_per) {
        return Err(TransitionReject::TranslationOrPer);
    }
    if pending & Micblok::MICPEND != 0 {
        let newly_enabled = !old.system_mask & new.system_mask;
        let classes = if ec {
            EC_SYSMASK_IO | SYSMASK_EXTERNAL
        } else {
            0xff
        };
        if newly_enabled & classes != 0 {
            return Err(TransitionReject::EnablesPending);
        }
    }
    if new.is_wait() {
        return Err(TransitionReject::Wait);
    }
    if ec && new.system_mask & EC_SYSMASK_RESERVED != 0 {
        return Err(TransitionReject::ReservedMask);
    }
    if new.ia & 1 != 0 {
        return Err(TransitionReject::OddAddress);
    }
    Ok(())
}
