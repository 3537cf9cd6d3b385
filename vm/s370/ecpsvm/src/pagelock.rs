// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Page locking and translation through the real storage core table.

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

fn core_table_entry<P: AddressingPolicy>(coretab: u32, page: u32) -> u32 {
    coretab.wrapping_add((page & P::FRAME_MASK) >> 8) & P::ADDRESS_WRAP
}

/// Locks the frame holding `page`. `coretab_ptr` holds the core table address.
fn lock_page<T: AssistSupport, P: AddressingPolicy>(
    s: &mut Staged<T, P>,
    coretab_ptr: u32,
    page: u32,
) -> Result<u32, Error<T::Error>> {
    let coretab = s.fetch_addr(coretab_ptr)?;
    let entry = core_table_entry::<P>(coretab, page);
    let flags = s.fetch_u8(entry + cortable::ENTRY_FLAGS)?;
    let count = if flags & cortable::CORLOCK != 0 {
        s.fetch_u32(entry + cortable::ENTRY_LOCKCOUNT)?.wrapping_add(1)
    } else {
        s.store_u8(entry + cortable::ENTRY_FLAGS, flags | cortable::CORLOCK)?;
        1
    };
    s.store_u32(entry + cortable::ENTRY_LOCKCOUNT, count)?;
    Ok(count)
}

/// Translates `vaddr` and refuses shared pages that have been changed.
fn translate_page<T: AssistSupport, P: AddressingPolicy>(
    s: &mut Staged<T, P>,
    coretab_ptr: u32,
    vaddr: u32,
) -> Result<u32, InternalError<T::Error>> {
    let raddr = match s.load_real_address(vaddr)? {
        Ok(raddr) => raddr,
        Err(fault) => {
            tracing::trace!(vaddr, cc = fault.condition_code(), "LRA failed");
            return Err(decline("translation exception"));
        }
    };
    let coretab = s.fetch_addr(coretab_ptr)?;
    let entry = core_table_entry::<P>(coretab, raddr);
    if s.fetch_u8(entry + cortable::ENTRY_FLAGS)? & cortable::CORSHARE == 0 {
        return Ok(raddr);
    }
    let frame = raddr & P::FRAME_MASK;
    for block in (0..s370defs::PAGE_SIZE).step_by(P::KEY_BLOCK as usize) {
        if s.storage_key(frame + block)?.change() {
            return Err(decline("shared page changed"));
        }
    }
    Ok(raddr)
}

impl<P: AddressingPolicy> EcpsVm<P> {
    /// LCKPG: locks page `op2` in the core table addressed by the word at
    /// `op1`.
    pub fn lckpg<T: AssistSupport>(
        &self,
        state: &mut CpuState,
        support: T,
        op1: u32,
        op2: u32,
    ) -> Result<Outcome, Error<T::Error>> {
        let (op1, op2) = (op1 & P::ADDRESS_WRAP, op2 & P::ADDRESS_WRAP);
        self.run_cp(Assist::Lckpg, state, support, |s| {
            let count = lock_page(s, op1, op2)?;
            tracing::trace!(page = op2, count, "page locked");
            s.regs.psw.cc = 0;
            s.return_via_r14();
            Ok(Disposition::Done)
        })
    }

    /// ULKPG: unlocks page `op2`. `op1` holds the real storage size followed
    /// by the core table address.
    pub fn ulkpg<T: AssistSupport>(
        &self,
        state: &mut CpuState,
        support: T,
        op1: u32,
        op2: u32,
    ) -> Result<Outcome, Error<T::Error>> {
        let (op1, op2) = (op1 & P::ADDRESS_WRAP, op2 & P::ADDRESS_WRAP);
        self.run_cp(Assist::Ulkpg, state, support, |s| {
            let core_size = s.fetch_u32(op1)?;
            let coretab = s.fetch_addr(op1.wrapping_add(4))?;
            if op2.wrapping_add(s370defs::PAGE_SIZE - 1) > core_size {
                return Err(decline("page beyond real storage"));
            }
            let entry = core_table_entry::<P>(coretab, op2);
            let flags = s.fetch_u8(entry + cortable::ENTRY_FLAGS)?;
            if flags & cortable::CORLOCK == 0 {
                return Err(decline("page not locked"));
            }
            let count = s
                .fetch_u32(entry + cortable::ENTRY_LOCKCOUNT)?
                .wrapping_sub(1);
            if count == 0 {
                s.store_u8(
                    entry + cortable::ENTRY_FLAGS,
                    flags & !(cortable::CORLOCK | cortable::CORFREE),
                )?;
            }
            s.store_u32(entry + cortable::ENTRY_LOCKCOUNT, count)?;
            tracing::trace!(page = op2, count, "page unlocked");
            s.return_via_r14();
            Ok(Disposition::Done)
        })
    }

    /// TRBRG: translates the virtual address in GR1 into GR2 and branches to
    /// `op2`.
    pub fn trbrg<T: AssistSupport>(
        &self,
        state: &mut CpuState,
        support: T,
        op1: u32,
        op2: u32,
    ) -> Result<Outcome, Error<T::Error>> {
        let (op1, op2) = (op1 & P::ADDRESS_WRAP, op2 & P::ADDRESS_WRAP);
        self.run_cp(Assist::Trbrg, state, support, |s| {
            let vaddr = s.regs.gps[CpuState::R1];
            let raddr = translate_page(s, op1, vaddr)?;
            s.regs.gps[CpuState::R2] = raddr;
            s.regs.psw.cc = 0;
            s.branch(op2);
            Ok(Disposition::Done)
        })
    }

    /// TRLOK: TRBRG, also locking the translated page.
    pub fn trlok<T: AssistSupport>(
        &self,
        state: &mut CpuState,
        support: T,
        op1: u32,
        op2: u32,
    ) -> Result<Outcome, Error<T::Error>> {
        let (op1, op2) = (op1 & P::ADDRESS_WRAP, op2 & P::ADDRESS_WRAP);
        self.run_cp(Assist::Trlok, state, support, |s| {
            let vaddr = s.regs.gps[CpuState::R1];
            let raddr = translate_page(s, op1, vaddr)?;
            lock_page(s, op1, raddr)?;
            s.regs.gps[CpuState::R2] = raddr;
            s.regs.psw.cc = 0;
            s.branch(op2);
            Ok(Disposition::Done)
        })
    }
}
