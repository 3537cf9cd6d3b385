// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! DISP2: runs stacked control program work, or loads the first runnable
//! user on the in-queue onto the real processor.

use super::charge_start;
use super::charge_stop;
use super::set_timer_from;
use super::take_exit;
use super::CHAIN_LIMIT;
use crate::alloc;
use crate::engine::decline;
use crate::engine::Disposition;
use crate::engine::Error;
use crate::engine::InternalError;
use crate::layout::cpexblok;
use crate::layout::dispexit;
use crate::layout::displist;
use crate::layout::ecblok;
use crate::layout::psa;
use crate::layout::trqblok;
use crate::layout::vmblok;
use crate::layout::xintblok;
use crate::layout::Micblok;
use crate::policy::AddressingPolicy;
use crate::registers::CpuState;
use crate::staged::Staged;
use crate::support::AssistSupport;
use s370defs::Psw;
use s370defs::PswStates;
use s370defs::EC_SYSMASK_DAT;
use s370defs::EC_SYSMASK_PER;
use s370defs::EC_SYSMASK_IO;
use s370defs::SYSMASK_EXTERNAL;

/// PER control registers in the trace extension.
const TREXT_PER_CRS: u32 = 0x1c;

pub(super) fn run<T: AssistSupport, P: AddressingPolicy>(
    s: &mut Staged<T, P>,
    data: u32,
    exits: u32,
) -> Result<Disposition, InternalError<T::Error>> {
    let vmb = s.regs.gps[CpuState::R11] & P::ADDRESS_WRAP;
    charge_stop(s, vmb)?;
    if s.fetch_u8(psa::XTENDLOCK)? == psa::XTENDLOCKSET {
        return Err(decline("system extend in progress"));
    }
    if s.fetch_u8(psa::APSTAT2)? & psa::CPMCHLK != 0 {
        return Err(decline("machine check recovery in progress"));
    }
    let sysvm = s.fetch_addr(psa::ASYSVM)?;

    let trq = s.fetch_addr(data + displist::TRQQUEUE)?;
    if trq != data {
        return run_trq(s, trq);
    }
    let cpex = s.fetch_addr(data + displist::CPEXQUEUE)?;
    if cpex != data {
        return run_cpex(s, data, exits, cpex);
    }
    if s.fetch_u8(psa::CPSTAT2)? & psa::CPSHRLK != 0 {
        return take_exit(s, exits, dispexit::IDLE);
    }

    let anchor = s.fetch_addr(data + displist::INQUEUE)?;
    let mut vmb = s.fetch_addr(anchor)?;
    let mut walked = 0;
    while vmb != anchor {
        walked += 1;
        if walked > CHAIN_LIMIT {
            return Err(decline("in-queue does not end"));
        }
        if runnable(s, vmb)? {
            return dispatch_user(s, data, exits, vmb, sysvm);
        }
        vmb = s.fetch_addr(vmb + vmblok::VMQFPNT)?;
    }
    tracing::trace!("no runnable user, idle");
    take_exit(s, exits, dispexit::IDLE)
}

fn runnable<T: AssistSupport, P: AddressingPolicy>(
    s: &mut Staged<T, P>,
    vmb: u32,
) -> Result<bool, Error<T::Error>> {
    Ok(!s.fetch_psw(vmb + vmblok::VMPSW)?.is_wait()
        && s.fetch_u8(vmb + vmblok::VMDSTAT)? & vmblok::VMRUN != 0
        && s.fetch_u8(vmb + vmblok::VMRSTAT)? & vmblok::VMCPWAIT == 0)
}

/// Takes a VMBLOK's block off the dispatcher stack and starts charging it.
fn unstack<T: AssistSupport, P: AddressingPolicy>(
    s: &mut Staged<T, P>,
    vmb: u32,
) -> Result<(), Error<T::Error>> {
    let count = s.fetch_u16(vmb + vmblok::VMSTKCNT)?.wrapping_sub(1);
    s.store_u16(vmb + vmblok::VMSTKCNT, count)?;
    charge_start(s, vmb)
}

fn run_trq<T: AssistSupport, P: AddressingPolicy>(
    s: &mut Staged<T, P>,
    trq: u32,
) -> Result<Disposition, InternalError<T::Error>> {
    let fwd = s.fetch_addr(trq + trqblok::TRQBFPNT)?;
    let back = s.fetch_addr(trq + trqblok::TRQBBPNT)?;
    s.store_u32(back + trqblok::TRQBFPNT, fwd)?;
    s.store_u32(fwd + trqblok::TRQBBPNT, back)?;

    let vmb = s.fetch_addr(trq + trqblok::TRQBUSER)?;
    unstack(s, vmb)?;
    s.store_u32(psa::STACKVM, vmb)?;
    let ret = s.fetch_u32(trq + trqblok::TRQBIRA)?;
    tracing::trace!(trq, vmb, ret, "running stacked TRQBLOK");
    s.regs.gps[CpuState::R10] = trq;
    s.regs.gps[CpuState::R11] = vmb;
    s.regs.gps[CpuState::R12] = ret;
    s.branch(ret);
    Ok(Disposition::Done)
}

fn run_cpex<T: AssistSupport, P: AddressingPolicy>(
    s: &mut Staged<T, P>,
    data: u32,
    exits: u32,
    block: u32,
) -> Result<Disposition, InternalError<T::Error>> {
    let fwd = s.fetch_addr(block + cpexblok::CPEXFPNT)?;
    let back = s.fetch_addr(block + cpexblok::CPEXBPNT)?;
    s.store_u32(back + cpexblok::CPEXFPNT, fwd)?;
    s.store_u32(fwd + cpexblok::CPEXBPNT, back)?;

    let mut saved = [0u32; 15];
    for (i, reg) in saved.iter_mut().enumerate() {
        *reg = s.fetch_u32(block + cpexblok::CPEXREGS + i as u32 * 4)?;
    }
    let vmb = saved[CpuState::R11] & P::ADDRESS_WRAP;
    unstack(s, vmb)?;
    let address = s.fetch_u32(block + cpexblok::CPEXADD)?;

    let size_table = s.fetch_addr(data + displist::FRET_MAXSIZE)?;
    let fret_list = s.fetch_addr(data + displist::FRET_LIST)?;
    match alloc::release(s, block, cpexblok::SIZE_DW, size_table, fret_list) {
        Ok(()) => {
            tracing::trace!(block, vmb, address, "running stacked CPEXBLOK");
            s.regs.gps[..15].copy_from_slice(&saved);
            s.regs.gps[CpuState::R15] = address;
            s.branch(address);
            Ok(Disposition::Done)
        }
        Err(InternalError::Decline(reason)) => {
            // The control program returns the block itself and reloads GR12
            // through GR1 from the save area.
            tracing::trace!(block, reason, "CPEXBLOK release left to software");
            s.regs.gps[CpuState::R0] = cpexblok::SIZE_DW.into();
            s.regs.gps[CpuState::R1] = block;
            s.regs.gps[CpuState::R2..=CpuState::R11]
                .copy_from_slice(&saved[CpuState::R2..=CpuState::R11]);
            let save = data + displist::DSPSAVE;
            for (i, value) in [
                saved[CpuState::R12],
                saved[CpuState::R13],
                saved[CpuState::R14],
                address,
                saved[CpuState::R0],
                saved[CpuState::R1],
            ]
            .into_iter()
            .enumerate()
            {
                s.store_u32(save + i as u32 * 4, value)?;
            }
            take_exit(s, exits, dispexit::FRETSLOW)
        }
        Err(err) => Err(err),
    }
}

/// Cached VMBLOK flag bytes, stored back when the user is dispatched.
struct Flags {
    dstat: u8,
    rstat: u8,
    pstat: u8,
    estat: u8,
    ostat: u8,
    pend: u8,
    mcr6: u8,
}

impl Flags {
    fn fetch<T: AssistSupport, P: AddressingPolicy>(
        s: &mut Staged<T, P>,
        vmb: u32,
    ) -> Result<Self, Error<T::Error>> {
        Ok(Self {
            dstat: s.fetch_u8(vmb + vmblok::VMDSTAT)?,
            rstat: s.fetch_u8(vmb + vmblok::VMRSTAT)?,
            pstat: s.fetch_u8(vmb + vmblok::VMPSTAT)?,
            estat: s.fetch_u8(vmb + vmblok::VMESTAT)?,
            ostat: s.fetch_u8(vmb + vmblok::VMOSTAT)?,
            pend: s.fetch_u8(vmb + vmblok::VMPEND)?,
            mcr6: s.fetch_u8(vmb + vmblok::VMMCR6)?,
        })
    }

    fn store<T: AssistSupport, P: AddressingPolicy>(
        &self,
        s: &mut Staged<T, P>,
        vmb: u32,
    ) -> Result<(), Error<T::Error>> {
        s.store_u8(vmb + vmblok::VMDSTAT, self.dstat)?;
        s.store_u8(vmb + vmblok::VMRSTAT, self.rstat)?;
        s.store_u8(vmb + vmblok::VMESTAT, self.estat)?;
        s.store_u8(vmb + vmblok::VMPSTAT, self.pstat)?;
        s.store_u8(vmb + vmblok::VMOSTAT, self.ostat)
    }

    fn extended(&self) -> bool {
        self.pstat & vmblok::VMV370R != 0
    }

    fn ec_mode(&self) -> bool {
        self.estat & vmblok::VMEXTCM != 0
    }
}

fn dispatch_user<T: AssistSupport, P: AddressingPolicy>(
    s: &mut Staged<T, P>,
    data: u32,
    exits: u32,
    vmb: u32,
    sysvm: u32,
) -> Result<Disposition, InternalError<T::Error>> {
    if s.fetch_u8(vmb + vmblok::VMNOECPS)? != 0 {
        s.hand_off(CpuState::R1, vmb);
        s.hand_off(CpuState::R11, sysvm);
        return Err(decline("user not assistable"));
    }

    let runuser = s.fetch_addr(psa::RUNUSER)?;
    let mut quantum = s.fetch_u32(psa::QUANTUM)?;
    if vmb != runuser {
        s.and_not_u8(runuser + vmblok::VMDSTAT, vmblok::VMDSP)?;
        let lastuser = s.fetch_addr(psa::LASTUSER)?;
        if lastuser != sysvm
            && lastuser != vmb
            && s.fetch_u8(lastuser + vmblok::VMOSTAT)? & vmblok::VMSHR != 0
        {
            s.hand_off(CpuState::R10, vmb);
            s.hand_off(CpuState::R11, lastuser);
            return Err(decline("last user ran a shared system"));
        }
    }
    if vmb != runuser || quantum & 0x8000_0000 != 0 {
        quantum = s.fetch_u32(data + displist::QUANTUM)?;
        if s.fetch_u8(vmb + vmblok::VMQLEVEL)? & vmblok::VMCOMP != 0 {
            quantum <<= 2;
        }
    }
    s.store_u32(psa::INTTIMER, quantum)?;
    charge_start(s, vmb)?;
    s.store_u32(psa::LASTUSER, vmb)?;
    s.store_u32(psa::RUNUSER, vmb)?;

    let mut flags = Flags::fetch(s, vmb)?;
    let micblok = s.fetch_addr(vmb + vmblok::VMMCR6)?;
    for i in 0..s.regs.fprs.len() {
        s.regs.fprs[i] = s.fetch_u64(vmb + vmblok::VMFPRS + i as u32 * 8)?;
    }

    let vpsw = s.fetch_psw(vmb + vmblok::VMPSW)?;
    let mut real_psw = Psw {
        system_mask: EC_SYSMASK_DAT | EC_SYSMASK_IO | SYSMASK_EXTERNAL,
        states: PswStates::new()
            .with_extended_control(true)
            .with_machine_check(true)
            .with_problem_state(true)
            .with_key(vpsw.key()),
        interruption_code: 0,
        ilc: 0,
        cc: vpsw.cc,
        program_mask: vpsw.program_mask,
        ia: vpsw.ia,
    };
    let mut cr0 = s.fetch_u32(psa::CPCREG0)?;
    let mut cr1 = s.fetch_u32(vmb + vmblok::VMSEG)?;
    flags.mcr6 &= !(vmblok::VMMSHADT | vmblok::VMMPROB | vmblok::VMMNOSK | vmblok::VMMFE);

    // The virtual CR0 itself for a basic mode VM.
    let ecb = s.fetch_u32(vmb + vmblok::VMECEXT)?;
    let ecb_addr = ecb & P::ADDRESS_WRAP;
    if flags.extended() && flags.ec_mode() {
        if flags.estat & (vmblok::VMINVSEG | vmblok::VMNEWCR0)
            == vmblok::VMINVSEG | vmblok::VMNEWCR0
        {
            tracing::warn!(vmb, estat = flags.estat, "segment tables invalid with new CR0");
            return take_exit(s, exits, dispexit::ABEND);
        }
        if vpsw.system_mask & EC_SYSMASK_DAT != 0 {
            cr0 = s.fetch_u32(ecb_addr + ecblok::EXTSHCR0)?;
            cr1 = s.fetch_u32(ecb_addr + ecblok::EXTSHCR1)?;
            flags.mcr6 |= vmblok::VMMSHADT;
        }
    }
    if flags.estat & (vmblok::VMINVPAG | vmblok::VMSHADT) == vmblok::VMINVPAG | vmblok::VMSHADT {
        return Err(decline("shadow page tables need invalidation"));
    }
    flags.estat &= !vmblok::VMINVPAG;
    flags.dstat |= vmblok::VMDSP;

    if micblok != 0 {
        let mut vip = 0;
        let tracing_mask = vmblok::VMTRSVC | vmblok::VMTRPRV | vmblok::VMTRBRIN;
        if s.fetch_u8(vmb + vmblok::VMTRCTL)? & tracing_mask == 0 {
            flags.mcr6 |= vmblok::VMMFE;
            if flags.ostat & vmblok::VMSHR != 0 {
                flags.mcr6 |= vmblok::VMMNOSK;
            }
            if vpsw.is_problem_state() {
                flags.mcr6 |= vmblok::VMMPROB;
            }
            if interrupt_pending(s, vmb, &flags, ecb)? {
                vip = Micblok::MICPEND;
            }
        }
        s.store_u8(micblok + Micblok::MICVIP, vip)?;
    }

    if flags.extended() {
        for cr in 4..14 {
            s.regs.crs[cr] = s.fetch_u32(ecb_addr + cr as u32 * 4)?;
        }
    }
    s.store_u8(vmb + vmblok::VMMCR6, flags.mcr6)?;
    if s.fetch_u8(vmb + vmblok::VMTRCTL)? & vmblok::VMTRPER != 0 {
        let trext = s.fetch_addr(vmb + vmblok::VMTREXT)?;
        for (i, cr) in (9..12).enumerate() {
            s.regs.crs[cr] = s.fetch_u32(trext + TREXT_PER_CRS + i as u32 * 4)?;
        }
        real_psw.system_mask |= EC_SYSMASK_PER;
    }

    s.regs.crs[6] = s.fetch_u32(vmb + vmblok::VMMCR6)?;
    s.store_u32(psa::STACKVM, 0)?;
    let outq = s.fetch_u64(vmb + vmblok::VMTMOUTQ)?;
    s.store_u64(psa::PROBSTRT, outq)?;
    let interval = s.fetch_u32(psa::INTTIMER)?;
    s.store_u32(psa::QUANTUM, interval)?;
    s.regs.crs[0] = cr0;
    s.regs.crs[1] = cr1;
    s.store_u8(psa::CPSTATUS, psa::CPRUN)?;
    for i in 0..16 {
        s.regs.gps[i] = s.fetch_u32(vmb + vmblok::VMGPRS + i as u32 * 4)?;
    }
    s.store_u8(psa::IOOPSW, 0)?;
    let apstat2 = s.fetch_u8(psa::APSTAT2)?;
    if apstat2 & psa::CPPTLBR != 0 {
        s.store_u8(psa::APSTAT2, apstat2 & !psa::CPPTLBR)?;
        s.request_tlb_purge();
    }
    flags.store(s, vmb)?;
    s.store_psw(vmb + vmblok::VMPSW, &vpsw)?;

    charge_stop(s, vmb)?;
    set_timer_from(s, vmb + vmblok::VMTMOUTQ)?;
    s.store_u32(psa::RUNCR0, cr0)?;
    s.store_u32(psa::RUNCR1, cr1)?;
    s.store_psw(psa::RUNPSW, &real_psw)?;
    s.regs.psw = real_psw;
    s.request_tlb_purge();
    tracing::debug!(vmb, psw = ?real_psw, cr0, cr1, quantum, "dispatching user");
    Ok(Disposition::Chain)
}

/// Whether an interruption is pending that a virtual PSW change made by a VM
/// assist must not enable.
fn interrupt_pending<T: AssistSupport, P: AddressingPolicy>(
    s: &mut Staged<T, P>,
    vmb: u32,
    flags: &Flags,
    ecb: u32,
) -> Result<bool, InternalError<T::Error>> {
    let ioint = s.fetch_u16(vmb + vmblok::VMIOINT)?;
    if ioint != 0 {
        if !flags.ec_mode() {
            return Ok(true);
        }
        let vcr0 = s.fetch_u32(ecb & P::ADDRESS_WRAP)?;
        if u32::from(ioint) << 16 & vcr0 != 0 {
            return Ok(true);
        }
    }
    if flags.ec_mode() && flags.pend & vmblok::VMPGPND != 0 {
        return Ok(true);
    }
    let vcr0 = if flags.extended() {
        s.fetch_u32(ecb & P::ADDRESS_WRAP)?
    } else {
        ecb
    };
    let mut xint = s.fetch_addr(vmb + vmblok::VMPXINT)?;
    let mut walked = 0;
    while xint != 0 {
        walked += 1;
        if walked > CHAIN_LIMIT {
            return Err(decline("XINTBLOK chain does not end"));
        }
        if u32::from(s.fetch_u16(xint.wrapping_add(xintblok::XINTMASK))?) & vcr0 != 0 {
            return Ok(true);
        }
        xint = s.fetch_addr(xint.wrapping_add(xintblok::XINTNEXT))?;
    }
    Ok(false)
}
