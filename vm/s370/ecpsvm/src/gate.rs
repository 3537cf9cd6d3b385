// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Preconditions shared by every assist.

use crate::engine::Error;
use crate::layout::Micblok;
use crate::policy::AddressingPolicy;
use crate::registers::CpuState;
use crate::registry::Assist;
use crate::registry::AssistRegistry;
use crate::staged::Staged;
use crate::support::AssistSupport;
use s370defs::AssistControl;
use s370defs::Psw;

/// Result of an assist gate.
#[derive(Debug)]
pub(crate) enum Gate<C> {
    Proceed(C),
    Decline(&'static str),
    /// The facility is not installed.
    Fault,
}

/// What the VM assist gate learned about the running virtual machine.
#[derive(Debug, Clone)]
pub(crate) struct VmAssistContext {
    pub cr6: AssistControl,
    pub micblok: Micblok,
    /// Real address of the virtual PSW.
    pub vpsw_addr: u32,
    pub vpsw: Psw,
}

impl VmAssistContext {
    pub fn pending(&self) -> u8 {
        self.micblok.pending()
    }
}

pub(crate) fn cp_assist(registry: &AssistRegistry, assist: Assist, state: &CpuState) -> Gate<()> {
    if state.sie_active {
        return Gate::Decline("SIE active");
    }
    if state.psw.is_problem_state() {
        return Gate::Decline("problem state");
    }
    if !registry.is_available() {
        return Gate::Fault;
    }
    if !registry.is_enabled(assist) {
        return Gate::Decline("disabled by command");
    }
    if !state.cr6().cp_assist() {
        return Gate::Decline("CP assist off in CR6");
    }
    registry.record_call(assist);
    Gate::Proceed(())
}

pub(crate) fn vm_assist<T: AssistSupport, P: AddressingPolicy>(
    registry: &AssistRegistry,
    assist: Assist,
    s: &mut Staged<T, P>,
) -> Result<Gate<VmAssistContext>, Error<T::Error>> {
    if s.regs.sie_active {
        return Ok(Gate::Decline("SIE active"));
    }
    if !s.regs.psw.is_problem_state() {
        return Ok(Gate::Decline("no virtual machine running"));
    }
    if !registry.is_available() {
        return Ok(Gate::Decline("ECPS:VM not installed"));
    }
    if !registry.is_enabled(assist) {
        return Ok(Gate::Decline("disabled by command"));
    }
    let cr6 = s.regs.cr6();
    s.regs.vtimer_address = None;
    if !cr6.vm_assist() {
        return Ok(Gate::Decline("VM assist off in CR6"));
    }
    if cr6.virtual_problem_state() {
        return Ok(Gate::Decline("virtual problem state"));
    }
    registry.record_call(assist);

    let micblok_addr = cr6.micblok();
    if micblok_addr & 0x7ff > 0x7e0 {
        return Ok(Gate::Decline("MICBLOK crosses a 2K boundary"));
    }
    let micblok: Micblok = s.fetch_struct(micblok_addr)?;
    let vpsw_addr = micblok.vpsw.get() & P::ADDRESS_WRAP;
    if cr6.virtual_timer() {
        s.regs.vtimer_address = Some(micblok.vtmr.get() & P::ADDRESS_WRAP);
    }
    let vpsw = s.fetch_psw(vpsw_addr)?;
    Ok(Gate::Proceed(VmAssistContext {
        cr6,
        micblok,
        vpsw_addr,
        vpsw,
    }))
}
