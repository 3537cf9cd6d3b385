// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! DISP0: time accounting for the running user and the choice of what the
//! dispatcher does next with the user in GR11.

use super::charge_start;
use super::charge_stop;
use super::take_exit;
use super::CHAIN_LIMIT;
use crate::engine::decline;
use crate::engine::Disposition;
use crate::engine::Error;
use crate::engine::InternalError;
use crate::layout::disp0;
use crate::layout::ecblok;
use crate::layout::psa;
use crate::layout::vmblok;
use crate::layout::xintblok;
use crate::policy::AddressingPolicy;
use crate::registers::CpuState;
use crate::staged::Staged;
use crate::support::AssistSupport;
use s370defs::BC_SYSMASK_CHANNELS_0_5;
use s370defs::BC_SYSMASK_CHANNELS_6_UP;
use s370defs::EC_SYSMASK_DAT;
use s370defs::EC_SYSMASK_IO;
use std::ops::ControlFlow;

const SIGN: u32 = 0x8000_0000;

/// VMTTIME and VMTMINQ are compared in units of the high five bytes.
const TIME_SLICE_UNITS: u64 = !0xff_ffff;

/// GR4 on the interval timer interruption exit: external interruption code
/// 0x0080 for subclass 0x0080.
const TIMER_XINT_CODE: u32 = 0x0080_0080;

pub(super) fn run<T: AssistSupport, P: AddressingPolicy>(
    s: &mut Staged<T, P>,
    data: u32,
    exits: u32,
) -> Result<Disposition, InternalError<T::Error>> {
    let count = s.fetch_u32(data + disp0::DISPCNT)?.wrapping_add(1);
    let disposition = select(s, data, exits)?;
    s.store_u32(data + disp0::DISPCNT, count)?;
    Ok(disposition)
}

fn exit_for_user<T: AssistSupport, P: AddressingPolicy>(
    s: &mut Staged<T, P>,
    exits: u32,
    offset: u32,
    vmb: u32,
) -> Result<Disposition, InternalError<T::Error>> {
    s.regs.gps[CpuState::R11] = vmb;
    take_exit(s, exits, offset)
}

fn select<T: AssistSupport, P: AddressingPolicy>(
    s: &mut Staged<T, P>,
    data: u32,
    exits: u32,
) -> Result<Disposition, InternalError<T::Error>> {
    let mut vmb = s.regs.gps[CpuState::R11] & P::ADDRESS_WRAP;
    let cpstatus = s.fetch_u8(psa::CPSTATUS)?;
    if cpstatus & psa::CPRUN != 0 {
        vmb = match runtime(s, vmb, data, exits)? {
            ControlFlow::Break(disposition) => return Ok(disposition),
            ControlFlow::Continue(runuser) => runuser,
        };
        // An I/O interruption taken while the user ran with a clean status.
        let dstat = s.fetch_u8(vmb + vmblok::VMDSTAT)?;
        if s.fetch_u8(psa::IOOPSW)? & EC_SYSMASK_DAT != 0 && dstat & vmblok::VMDSP != 0 {
            return exit_for_user(s, exits, disp0::EXIT_CLEAN, vmb);
        }
    } else if cpstatus & psa::CPWAIT != 0 {
        return take_exit(s, exits, disp0::EXIT_CPWAIT_OUT);
    }

    let rstat = s.fetch_u8(vmb + vmblok::VMRSTAT)?;
    if rstat & vmblok::VMCPWAIT != 0 {
        return exit_for_user(s, exits, disp0::EXIT_VMCPWAIT, vmb);
    }
    if s.fetch_u8(vmb + vmblok::VMPEND)? & (vmblok::VMPERPND | vmblok::VMPGPND) != 0 {
        return exit_for_user(s, exits, disp0::EXIT_PER_PAGE, vmb);
    }

    let vpsw = s.fetch_psw(vmb + vmblok::VMPSW)?;
    let pstat = s.fetch_u8(vmb + vmblok::VMPSTAT)?;

    // Reflectable external interruption.
    let mut link = vmb + vmblok::VMPXINT;
    let mut xint = s.fetch_addr(link)?;
    if xint != 0 && vpsw.external_enabled() {
        let mut vcr0 = s.fetch_u32(vmb + vmblok::VMVCR0)?;
        if pstat & vmblok::VMV370R != 0 {
            vcr0 = s.fetch_u32((vcr0 & P::ADDRESS_WRAP) + ecblok::EXTCR0)?;
        }
        let mut walked = 0;
        while xint != 0 {
            walked += 1;
            if walked > CHAIN_LIMIT {
                return Err(decline("XINTBLOK chain does not end"));
            }
            let mask = s.fetch_u16(xint.wrapping_add(xintblok::XINTMASK))? & vcr0 as u16;
            if mask != 0 {
                s.regs.gps[CpuState::R4] = mask.into();
                s.regs.gps[CpuState::R5] = link;
                s.regs.gps[CpuState::R6] = xint;
                return exit_for_user(s, exits, disp0::EXIT_EXTERNAL, vmb);
            }
            link = xint;
            xint = s.fetch_addr(xint.wrapping_add(xintblok::XINTNEXT))?;
        }
    }

    // Reflectable I/O interruption.
    let ioint = s.fetch_u16(vmb + vmblok::VMIOINT)?;
    if ioint != 0 {
        let pending = u32::from(ioint) << 16;
        let estat = s.fetch_u8(vmb + vmblok::VMESTAT)?;
        let (mut mask, extended) = if estat & vmblok::VMEXTCM != 0 {
            (0, vpsw.system_mask & EC_SYSMASK_IO != 0)
        } else {
            (
                u32::from(vpsw.system_mask & BC_SYSMASK_CHANNELS_0_5) << 24,
                pstat & vmblok::VMV370R != 0 && vpsw.system_mask & BC_SYSMASK_CHANNELS_6_UP != 0,
            )
        };
        if extended {
            let ecb = s.fetch_addr(vmb + vmblok::VMECEXT)?;
            mask |= s.fetch_u32(ecb + ecblok::EXTCR2)?;
        }
        let enabled = pending & mask & 0xffff_0000;
        if enabled != 0 {
            s.regs.gps[CpuState::R7] = enabled;
            return exit_for_user(s, exits, disp0::EXIT_IO, vmb);
        }
    }

    let rstat = s.fetch_u8(vmb + vmblok::VMRSTAT)? & !(vmblok::VMPSWAIT | vmblok::VMIDLE);
    if vpsw.is_wait() {
        s.store_u8(vmb + vmblok::VMRSTAT, rstat | vmblok::VMPSWAIT)?;
        return exit_for_user(s, exits, disp0::EXIT_VWAIT, vmb);
    }
    s.store_u8(vmb + vmblok::VMRSTAT, rstat)?;
    exit_for_user(s, exits, disp0::EXIT_DISPATCH, vmb)
}

/// Charges the time since the last dispatch. Continues with the VMBLOK that
/// was running, or breaks with the exit taken.
fn runtime<T: AssistSupport, P: AddressingPolicy>(
    s: &mut Staged<T, P>,
    vmb: u32,
    data: u32,
    exits: u32,
) -> Result<ControlFlow<Disposition, u32>, InternalError<T::Error>> {
    let runuser = s.fetch_addr(psa::RUNUSER)?;
    s.store_u8(psa::CPSTATUS, psa::CPEX | psa::CPSUPER)?;
    charge_stop(s, vmb)?;
    let (vmb, interval) = if vmb != runuser {
        charge_start(s, runuser)?;
        (runuser, s.fetch_u32(psa::QUANTUMR)?)
    } else {
        (vmb, s.fetch_u32(psa::INTTIMER)?)
    };
    tracing::trace!(vmb, interval, "charging run time");

    if interval & SIGN != 0 {
        let dstat = s.fetch_u8(vmb + vmblok::VMDSTAT)?;
        s.store_u8(
            vmb + vmblok::VMDSTAT,
            (dstat & !vmblok::VMDSP) | vmblok::VMTSEND,
        )?;
    }
    let ttime = s.fetch_u64(vmb + vmblok::VMTTIME)?;
    let tminq = s.fetch_u64(vmb + vmblok::VMTMINQ)?;
    if ttime & TIME_SLICE_UNITS <= tminq & TIME_SLICE_UNITS {
        let dstat = s.fetch_u8(vmb + vmblok::VMDSTAT)?;
        s.store_u8(
            vmb + vmblok::VMDSTAT,
            (dstat & !vmblok::VMDSP) | vmblok::VMQSEND,
        )?;
    }
    charge_problem_time(s, vmb)?;

    let previous = s.fetch_u32(psa::QUANTUM)?;
    s.store_u32(psa::QUANTUM, interval)?;

    if s.fetch_u8(vmb + vmblok::VMMCR6)? & vmblok::VMMVTMR != 0 {
        return Ok(ControlFlow::Continue(vmb));
    }
    if s.fetch_u8(vmb + vmblok::VMTLEVEL)? & (vmblok::VMTON | vmblok::VMRON) == 0 {
        return Ok(ControlFlow::Continue(vmb));
    }

    let delta = previous.wrapping_sub(s.fetch_u32(psa::QUANTUMR)?);
    if delta & SIGN != 0 {
        tracing::warn!(vmb, previous, "interval timer went backwards");
        return take_exit(s, exits, disp0::EXIT_BAD_ITIMER).map(ControlFlow::Break);
    }

    let timer_addr = virtual_interval_timer(s, vmb)?;
    let old = s.fetch_u32(timer_addr)?;
    let new = old.wrapping_sub(delta);
    s.store_u32(timer_addr, new)?;
    if (old ^ new) & SIGN != 0 {
        tracing::trace!(vmb, old, new, "virtual interval timer expired");
        let reg9 = s.fetch_u32(data + disp0::XINTREG9)?;
        s.regs.gps[CpuState::R3] = 0;
        s.regs.gps[CpuState::R4] = TIMER_XINT_CODE;
        s.regs.gps[CpuState::R9] = reg9;
        s.regs.gps[CpuState::R11] = vmb;
        s.and_not_u8(vmb + vmblok::VMDSTAT, vmblok::VMDSP)?;
        return take_exit(s, exits, disp0::EXIT_TIMER_XINT).map(ControlFlow::Break);
    }
    Ok(ControlFlow::Continue(vmb))
}

/// Takes the problem state time not yet accounted out of PROBTIME.
fn charge_problem_time<T: AssistSupport, P: AddressingPolicy>(
    s: &mut Staged<T, P>,
    vmb: u32,
) -> Result<(), Error<T::Error>> {
    let outq = s.fetch_u64(vmb + vmblok::VMTMOUTQ)?;
    let start = s.fetch_u64(psa::PROBSTRT)?;
    if outq == start {
        return Ok(());
    }
    let spent = start.wrapping_sub(outq);
    let probtime = s.fetch_u64(psa::PROBTIME)?.wrapping_sub(spent);
    s.store_u64(psa::PROBTIME, probtime)
}

/// Real address of the guest's interval timer at 0x50, or the VMBLOK copy
/// when the guest page is not resident.
fn virtual_interval_timer<T: AssistSupport, P: AddressingPolicy>(
    s: &mut Staged<T, P>,
    vmb: u32,
) -> Result<u32, Error<T::Error>> {
    let cr1 = s.regs.crs[1];
    s.regs.crs[1] = s.fetch_u32(vmb + vmblok::VMSEG)?;
    let translated = s.load_real_address(psa::INTTIMER);
    s.regs.crs[1] = cr1;
    Ok(match translated? {
        Ok(raddr) => raddr,
        Err(fault) => {
            tracing::trace!(vmb, ?fault, "interval timer page not resident");
            vmb + vmblok::VMTIMER
        }
    })
}
