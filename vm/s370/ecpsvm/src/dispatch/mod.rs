// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The control program dispatcher assists.
//!
//! DISP0 decides what to do with the user the dispatcher was entered for,
//! DISP1 handles the user being taken off the processor, and DISP2 selects and
//! loads the next virtual machine to run. Each phase either completes through
//! an exit-list entry, declines, or chains to the next phase.

mod disp0;
mod disp1;
mod disp2;

use crate::engine::Disposition;
use crate::engine::EcpsVm;
use crate::engine::Error;
use crate::engine::InternalError;
use crate::engine::Outcome;
use crate::layout::vmblok;
use crate::policy::AddressingPolicy;
use crate::registers::CpuState;
use crate::registry::Assist;
use crate::staged::Staged;
use crate::support::AssistSupport;

/// Longest XINTBLOK chain or in-queue walked before declining.
const CHAIN_LIMIT: usize = 0x10000;

/// Stops charging `vmb`: stores the CPU timer at VMTTIME.
fn charge_stop<T: AssistSupport, P: AddressingPolicy>(
    s: &mut Staged<T, P>,
    vmb: u32,
) -> Result<(), Error<T::Error>> {
    let timer = s.cpu_timer();
    s.store_u64(vmb.wrapping_add(vmblok::VMTTIME), timer as u64)
}

/// Starts charging `vmb`: loads the CPU timer from VMTTIME.
fn charge_start<T: AssistSupport, P: AddressingPolicy>(
    s: &mut Staged<T, P>,
    vmb: u32,
) -> Result<(), Error<T::Error>> {
    set_timer_from(s, vmb.wrapping_add(vmblok::VMTTIME))
}

/// SPT from the doubleword at `addr`.
fn set_timer_from<T: AssistSupport, P: AddressingPolicy>(
    s: &mut Staged<T, P>,
    addr: u32,
) -> Result<(), Error<T::Error>> {
    let value = s.fetch_u64(addr)?;
    s.set_cpu_timer(value as i64);
    Ok(())
}

/// Continues at the address in the exit list entry at `offset`.
fn take_exit<T: AssistSupport, P: AddressingPolicy>(
    s: &mut Staged<T, P>,
    exits: u32,
    offset: u32,
) -> Result<Disposition, InternalError<T::Error>> {
    let target = s.fetch_u32(exits.wrapping_add(offset))?;
    s.branch(target);
    Ok(Disposition::Done)
}

impl<P: AddressingPolicy> EcpsVm<P> {
    /// DISP0: the dispatcher entry for the user in GR11. `op1` is the DISP0
    /// data list and `op2` the exit list.
    pub fn disp0<T: AssistSupport>(
        &self,
        state: &mut CpuState,
        support: T,
        op1: u32,
        op2: u32,
    ) -> Result<Outcome, Error<T::Error>> {
        let (op1, op2) = (op1 & P::ADDRESS_WRAP, op2 & P::ADDRESS_WRAP);
        self.run_cp(Assist::Disp0, state, support, |s| disp0::run(s, op1, op2))
    }

    /// DISP1: takes the user in GR11 off the processor and, unless the
    /// scheduler must run, dispatches the next one.
    pub fn disp1<T: AssistSupport>(
        &self,
        state: &mut CpuState,
        support: T,
        op1: u32,
        op2: u32,
    ) -> Result<Outcome, Error<T::Error>> {
        let (op1, op2) = (op1 & P::ADDRESS_WRAP, op2 & P::ADDRESS_WRAP);
        self.run_cp(Assist::Disp1, state, support, |s| {
            match disp1::run(s, op1, op2)? {
                Disposition::Chain => disp2::run(s, op1, op2),
                disposition => Ok(disposition),
            }
        })
    }

    /// DISP2: runs stacked CP work or dispatches the first runnable user on
    /// the in-queue.
    pub fn disp2<T: AssistSupport>(
        &self,
        state: &mut CpuState,
        support: T,
        op1: u32,
        op2: u32,
    ) -> Result<Outcome, Error<T::Error>> {
        let (op1, op2) = (op1 & P::ADDRESS_WRAP, op2 & P::ADDRESS_WRAP);
        self.run_cp(Assist::Disp2, state, support, |s| disp2::run(s, op1, op2))
    }
}
