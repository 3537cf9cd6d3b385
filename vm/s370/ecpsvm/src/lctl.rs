// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Rules for loading control registers on behalf of a virtual machine.

use crate::layout::Micblok;
use s370defs::Psw;
use s370defs::EC_SYSMASK_IO;
use s370defs::SYSMASK_EXTERNAL;
use thiserror::Error;

#[derive(Debug, Error, Copy, Clone, PartialEq, Eq)]
pub enum LctlReject {
    #[error("CR0 high half changed")]
    Cr0High,
    #[error("CR{0} enables an interruption while one is pending")]
    EnablesPending(usize),
    #[error("CR1 designates the segment table")]
    SegmentTable,
    #[error("CR{0} is a DAS control register")]
    DualAddressSpace(usize),
    #[error("CR8 is the monitor mask")]
    Monitor,
    #[error("CR{0} is a PER control register")]
    Per(usize),
}

/// Control register numbers `r1` through `r3`, wrapping from 15 to 0.
pub fn register_range(r1: usize, r3: usize) -> impl Iterator<Item = usize> + Clone {
    let count = ((r3 + 16 - r1) % 16) + 1;
    (0..count).map(move |i| (r1 + i) % 16)
}

/// Applies `new` values for `range` to the virtual `shadow` registers and the
/// `real` registers. Returns an error, leaving nothing usable, when any
/// register in the range cannot be loaded by the assist.
pub fn apply(
    range: impl Iterator<Item = usize>,
    new: &[u32; 16],
    shadow: &mut [u32; 16],
    real: &mut [u32; 16],
    vpsw: &Psw,
    pending: u8,
) -> Result<(), LctlReject> {
    let pending = pending & Micblok::MICPEND != 0;
    for cr in range {
        let value = new[cr];
        match cr {
            0 => {
                if shadow[0] & 0xffff_0000 != value & 0xffff_0000 {
                    return Err(LctlReject::Cr0High);
                }
                if vpsw.system_mask & SYSMASK_EXTERNAL != 0
                    && pending
                    && !(shadow[0] & 0xffff) & (value & 0xffff) != 0
                {
                    return Err(LctlReject::EnablesPending(0));
                }
                shadow[0] = value;
            }
            1 => return Err(LctlReject::SegmentTable),
            2 => {
                if vpsw.system_mask & EC_SYSMASK_IO != 0 && pending && !shadow[2] & value != 0 {
                    return Err(LctlReject::EnablesPending(2));
                }
                shadow[2] = value;
            }
            3..=5 | 7 => return Err(LctlReject::DualAddressSpace(cr)),
            8 => return Err(LctlReject::Monitor),
            9..=11 => return Err(LctlReject::Per(cr)),
            12 | 13 => {
                shadow[cr] = value;
                real[cr] = value;
            }
            // 6, 14 and 15
            _ => shadow[cr] = value,
        }
    }
    Ok(())
}
