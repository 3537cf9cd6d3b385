// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Control program free storage subpools.
//!
//! A size table starts with the largest request, in doublewords, the subpools
//! serve. The subpool list heads follow at +4, indexed by the byte offset a
//! per-size index table gives. Free blocks are chained through their first
//! word.

use crate::engine::decline;
use crate::engine::Disposition;
use crate::engine::EcpsVm;
use crate::engine::Error;
use crate::engine::InternalError;
use crate::engine::Outcome;
use crate::layout::cortable;
use crate::policy::AddressingPolicy;
use crate::registers::CpuState;
use crate::registry::Assist;
use crate::staged::Staged;
use crate::support::AssistSupport;

/// Free-return list fields.
mod fretl {
    pub const CORTABLE: u32 = 0;
    pub const FREE_DESCRIPTOR: u32 = 4;
    /// Subpool index bytes, indexed by doubleword count.
    pub const SUBPOOL_INDEX: u32 = 11;
}

const SUBPOOL_HEADS: u32 = 4;

/// Returns `block` of `count` doublewords to its subpool. Declines without
/// staging anything when the block cannot be returned here.
pub(crate) fn release<T: AssistSupport, P: AddressingPolicy>(
    s: &mut Staged<T, P>,
    block: u32,
    count: u16,
    size_table: u32,
    fret_list: u32,
) -> Result<(), InternalError<T::Error>> {
    if count == 0 {
        return Err(decline("zero length"));
    }
    let max = s.fetch_u32(size_table)?;
    if u32::from(count) > max {
        return Err(decline("larger than the subpools"));
    }
    let coretab = s.fetch_addr(fret_list + fretl::CORTABLE)?;
    let entry = coretab.wrapping_add((block & P::FRAME_MASK) >> 8);
    let descriptor = s.fetch_u32(entry + cortable::ENTRY_DESCRIPTOR)?;
    if descriptor != s.fetch_u32(fret_list + fretl::FREE_DESCRIPTOR)? {
        return Err(decline("not in the free storage area"));
    }
    if s.fetch_u8(entry + cortable::ENTRY_FLAGS)? != cortable::CORFREE {
        return Err(decline("page not flagged as free storage"));
    }
    let index = s.fetch_u8(fret_list + fretl::SUBPOOL_INDEX + u32::from(count))?;
    let head_addr = size_table + SUBPOOL_HEADS + u32::from(index);
    let head = s.fetch_u32(head_addr)?;
    if head == block {
        return Err(decline("block already heads its subpool"));
    }
    s.store_u32(head_addr, block)?;
    s.store_u32(block, head)?;
    Ok(())
}

impl<P: AddressingPolicy> EcpsVm<P> {
    /// FREEX: takes a block of GR0 doublewords from its subpool into GR1.
    pub fn freex<T: AssistSupport>(
        &self,
        state: &mut CpuState,
        support: T,
        op1: u32,
        op2: u32,
    ) -> Result<Outcome, Error<T::Error>> {
        let (op1, op2) = (op1 & P::ADDRESS_WRAP, op2 & P::ADDRESS_WRAP);
        self.run_cp(Assist::Freex, state, support, |s| {
            let count = s.regs.gps[CpuState::R0];
            if count == 0 {
                return Err(decline("zero length"));
            }
            let max = s.fetch_u32(op1)?;
            if count > max {
                return Err(decline("larger than the subpools"));
            }
            let index = s.fetch_u8(op2.wrapping_add(count))?;
            let head_addr = op1 + SUBPOOL_HEADS + u32::from(index);
            let block = s.fetch_u32(head_addr)?;
            if block == 0 {
                return Err(decline("subpool empty"));
            }
            let next = s.fetch_u32(block)?;
            s.store_u32(head_addr, next)?;
            tracing::trace!(count, block, next, "FREEX");
            s.regs.gps[CpuState::R1] = block;
            s.regs.psw.cc = 0;
            s.return_via_r14();
            Ok(Disposition::Done)
        })
    }

    /// FRETX: returns the block of GR0 doublewords at GR1 to its subpool.
    pub fn fretx<T: AssistSupport>(
        &self,
        state: &mut CpuState,
        support: T,
        op1: u32,
        op2: u32,
    ) -> Result<Outcome, Error<T::Error>> {
        let (op1, op2) = (op1 & P::ADDRESS_WRAP, op2 & P::ADDRESS_WRAP);
        self.run_cp(Assist::Fretx, state, support, |s| {
            let count = s.regs.gps[CpuState::R0] as u16;
            let block = s.regs.gps[CpuState::R1] & P::ADDRESS_WRAP;
            release(s, block, count, op1, op2)?;
            tracing::trace!(count, block, "FRETX");
            s.return_via_r14();
            Ok(Disposition::Done)
        })
    }
}
