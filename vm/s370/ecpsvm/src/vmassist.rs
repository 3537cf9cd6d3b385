// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Assists for privileged instructions issued by a virtual machine.
//!
//! These run while the real engine is in problem state on behalf of a virtual
//! machine in virtual supervisor state. `state.psw.ia` must already address
//! the instruction after the one being assisted.

use crate::engine::decline;
use crate::engine::Disposition;
use crate::engine::EcpsVm;
use crate::engine::Error;
use crate::engine::InternalError;
use crate::engine::Outcome;
use crate::layout::vmblok;
use crate::layout::VCR0_SSM_SUPPRESS;
use crate::lctl;
use crate::policy::AddressingPolicy;
use crate::registers::CpuState;
use crate::registry::Assist;
use crate::staged::Staged;
use crate::support::AssistSupport;
use crate::transition::check_transition;
use s370defs::psa;
use s370defs::Psw;

/// The SVC that always goes to the control program.
const SVC_CP_ONLY: u8 = 76;

fn validate<E>(old: &Psw, new: &Psw, pending: u8) -> Result<(), InternalError<E>> {
    check_transition(old, new, pending).map_err(|reject| {
        tracing::trace!(%reject, ?old, ?new, "virtual PSW transition rejected");
        decline("PSW transition rejected")
    })
}

/// Takes the instruction address, condition code, key and program mask of the
/// new virtual PSW into the real PSW.
fn load_user_fields<T: AssistSupport, P: AddressingPolicy>(s: &mut Staged<T, P>, new: &Psw) {
    s.branch(new.ia);
    s.regs.psw.cc = new.cc;
    s.regs.psw.states.set_key(new.key());
    s.regs.psw.program_mask = new.program_mask;
}

fn fetch_logical_psw<T: AssistSupport, P: AddressingPolicy>(
    s: &mut Staged<T, P>,
    vaddr: u32,
    key: u8,
) -> Result<Psw, InternalError<T::Error>> {
    let mut b = [0; 8];
    s.fetch_logical_with_key(vaddr, &mut b, key)?;
    Ok(Psw::from_bytes(b))
}

impl<P: AddressingPolicy> EcpsVm<P> {
    /// SSM: sets the virtual system mask from the byte at `addr`.
    pub fn ssm<T: AssistSupport>(
        &self,
        state: &mut CpuState,
        support: T,
        addr: u32,
    ) -> Result<Outcome, Error<T::Error>> {
        self.run_vm(Assist::Ssm, state, support, |s, ctx| {
            if ctx.cr6.virtual_problem_state() {
                return Err(decline("virtual problem state"));
            }
            let vcr0 = s.fetch_u32(ctx.micblok.creg.get())?;
            if vcr0 & VCR0_SSM_SUPPRESS != 0 {
                return Err(decline("SSM suppressed by virtual CR0"));
            }
            let mut mask = [0];
            s.fetch_logical(addr, &mut mask)?;

            let mut new = ctx.vpsw;
            new.system_mask = mask[0];
            validate(&ctx.vpsw, &new, ctx.pending())?;
            new.ia = s.regs.psw.ia;
            s.store_psw(ctx.vpsw_addr, &new)?;
            Ok(Disposition::Done)
        })
    }

    /// SVC: presents a supervisor call interruption to the virtual machine.
    pub fn svc<T: AssistSupport>(
        &self,
        state: &mut CpuState,
        support: T,
        code: u8,
    ) -> Result<Outcome, Error<T::Error>> {
        self.run_vm(Assist::Svc, state, support, |s, ctx| {
            if code == SVC_CP_ONLY {
                return Err(decline("SVC 76"));
            }
            if ctx.cr6.svc_inhibit() {
                return Err(decline("SVC assist inhibited"));
            }
            // The virtual PSA is accessed with key 0.
            let new = fetch_logical_psw(s, psa::SVC_NEW_PSW, 0)?;

            let mut old = ctx.vpsw;
            old.ia = s.regs.psw.ia;
            old.cc = s.regs.psw.cc;
            old.states.set_key(s.regs.psw.key());
            old.program_mask = s.regs.psw.program_mask;
            old.interruption_code = code.into();
            validate(&old, &new, ctx.pending())?;

            s.store_logical_with_key(psa::SVC_OLD_PSW, &old.to_bytes(), 0)?;
            if old.is_ec() {
                let code = 0x0002_0000 | u32::from(code);
                s.store_logical_with_key(psa::SVC_INTERRUPTION_CODE, &code.to_be_bytes(), 0)?;
            }
            load_user_fields(s, &new);
            s.store_psw(ctx.vpsw_addr, &new)?;
            Ok(Disposition::Done)
        })
    }

    /// LPSW: loads the virtual PSW from the doubleword at `addr`.
    pub fn lpsw<T: AssistSupport>(
        &self,
        state: &mut CpuState,
        support: T,
        addr: u32,
    ) -> Result<Outcome, Error<T::Error>> {
        self.run_vm(Assist::Lpsw, state, support, |s, ctx| {
            if ctx.cr6.virtual_problem_state() {
                return Err(decline("virtual problem state"));
            }
            if !ctx.micblok.evma().lpsw() {
                return Err(decline("LPSW off in MICEVMA"));
            }
            if addr & 3 != 0 {
                return Err(decline("operand not aligned"));
            }
            let key = s.regs.psw.key();
            let new = fetch_logical_psw(s, addr, key)?;
            validate(&ctx.vpsw, &new, ctx.pending())?;
            load_user_fields(s, &new);
            s.store_psw(ctx.vpsw_addr, &new)?;
            Ok(Disposition::Done)
        })
    }

    /// LCTL: loads virtual control registers `r1` through `r3` from `addr`.
    pub fn lctl<T: AssistSupport>(
        &self,
        state: &mut CpuState,
        support: T,
        r1: usize,
        r3: usize,
        addr: u32,
    ) -> Result<Outcome, Error<T::Error>> {
        let (r1, r3) = (r1 & 0xf, r3 & 0xf);
        self.run_vm(Assist::Lctl, state, support, |s, ctx| {
            if addr & 3 != 0 {
                return Err(decline("operand not aligned"));
            }
            let vmb = ctx.vpsw_addr.wrapping_sub(vmblok::VMPSW) & P::ADDRESS_WRAP;
            let extended = s.fetch_u8(vmb + vmblok::VMPSTAT)? & vmblok::VMV370R != 0;
            if !extended && (r1 != 0 || r3 != 0) {
                return Err(decline("basic mode VM loads other than CR0"));
            }

            let range = lctl::register_range(r1, r3);
            let mut new = [0; 16];
            for (i, cr) in range.clone().enumerate() {
                let mut b = [0; 4];
                s.fetch_logical(addr.wrapping_add(i as u32 * 4), &mut b)?;
                new[cr] = u32::from_be_bytes(b);
            }

            let shadow_addr = if extended {
                s.fetch_addr(vmb + vmblok::VMECEXT)?
            } else {
                vmb + vmblok::VMVCR0
            };
            let mut shadow = [0; 16];
            let loaded = if extended { 16 } else { 1 };
            for (cr, value) in shadow.iter_mut().enumerate().take(loaded) {
                *value = s.fetch_u32(shadow_addr + cr as u32 * 4)?;
            }
            let mut real = s.regs.crs;
            lctl::apply(
                range.clone(),
                &new,
                &mut shadow,
                &mut real,
                &ctx.vpsw,
                ctx.pending(),
            )
            .map_err(|reject| {
                tracing::trace!(%reject, r1, r3, "LCTL rejected");
                decline("control register not loadable")
            })?;

            s.regs.crs = real;
            for cr in range {
                s.store_u32(shadow_addr + cr as u32 * 4, shadow[cr])?;
            }
            Ok(Disposition::Done)
        })
    }

    /// Whether a virtual interval timer interruption can be presented to the
    /// running virtual machine without the control program.
    pub fn virtual_timer_interrupt_allowed(&self, state: &CpuState) -> bool {
        let refusal = if state.vtimer_pending {
            Some("already pending")
        } else if !state.psw.is_problem_state() {
            Some("no virtual machine running")
        } else if !state.psw.external_enabled() {
            Some("external interruptions disabled")
        } else if !state.cr6().virtual_timer() {
            Some("virtual timer assist off")
        } else {
            None
        };
        if self.registry().is_debug(Assist::Vtimer) {
            tracing::debug!(refusal, psw = ?state.psw, "virtual timer interruption check");
        }
        refusal.is_none()
    }
}
