// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Device block lookup through the control program's I/O index tables.
//!
//! Index halfwords with the high bit set mark a missing block. A lookup that
//! does not reach a device block declines.

use crate::engine::decline;
use crate::engine::Disposition;
use crate::engine::EcpsVm;
use crate::engine::Error;
use crate::engine::InternalError;
use crate::engine::Outcome;
use crate::policy::AddressingPolicy;
use crate::registers::CpuState;
use crate::registry::Assist;
use crate::staged::Staged;
use crate::support::AssistSupport;

const NO_BLOCK: u16 = 0x8000;

/// Real I/O control table (ARIOCT) fields.
mod arioct {
    pub const CHANNEL_INDEX: u32 = 0;
    pub const CHANNELS: u32 = 4;
    pub const CONTROL_UNITS: u32 = 8;
    pub const DEVICES: u32 = 12;
}

const RCH_UNIT_INDEX: u32 = 0x20;
const RCU_TYPE: u32 = 0x05;
const RCU_ALTERNATE_FLAG: u8 = 0x40;
const RCU_PRIMARY: u32 = 0x10;
const RCU_DEVICE_INDEX: u32 = 0x28;
const VCH_UNIT_INDEX: u32 = 8;
const VCU_DEVICE_INDEX: u32 = 8;

fn index<T: AssistSupport, P: AddressingPolicy>(
    s: &mut Staged<T, P>,
    addr: u32,
    missing: &'static str,
) -> Result<u32, InternalError<T::Error>> {
    let ix = s.fetch_u16(addr)?;
    if ix & NO_BLOCK != 0 {
        return Err(decline(missing));
    }
    Ok(ix.into())
}

fn found<T: AssistSupport, P: AddressingPolicy>(
    s: &mut Staged<T, P>,
    (channel, unit, device): (u32, u32, u32),
) {
    s.regs.gps[CpuState::R6] = channel;
    s.regs.gps[CpuState::R7] = unit;
    s.regs.gps[CpuState::R8] = device;
    s.regs.psw.cc = 0;
    s.return_via_r14();
}

fn scan_virtual<T: AssistSupport, P: AddressingPolicy>(
    s: &mut Staged<T, P>,
    device: u32,
    index_table: u32,
    bases: u32,
) -> Result<(u32, u32, u32), InternalError<T::Error>> {
    let ix = index(
        s,
        index_table.wrapping_add((device & 0xf00) >> 7),
        "no virtual channel block",
    )?;
    let vch = s.fetch_u32(bases)?.wrapping_add(ix);
    let ix = index(
        s,
        vch.wrapping_add(VCH_UNIT_INDEX + ((device & 0xf0) >> 3)),
        "no virtual control unit block",
    )?;
    let vcu = s.fetch_u32(bases.wrapping_add(4))?.wrapping_add(ix);
    let ix = index(
        s,
        vcu.wrapping_add(VCU_DEVICE_INDEX + ((device & 0xf) << 1)),
        "no virtual device block",
    )?;
    let vdev = s.fetch_u32(bases.wrapping_add(8))?.wrapping_add(ix);
    Ok((vch, vcu, vdev))
}

fn scan_real<T: AssistSupport, P: AddressingPolicy>(
    s: &mut Staged<T, P>,
    device: u32,
    ioct: u32,
) -> Result<(u32, u32, u32), InternalError<T::Error>> {
    let table = s.fetch_u32(ioct + arioct::CHANNEL_INDEX)?;
    let ix = index(
        s,
        table.wrapping_add((device & 0xf00) >> 7),
        "no real channel block",
    )?;
    let rch = s.fetch_u32(ioct + arioct::CHANNELS)?.wrapping_add(ix);

    // Units are indexed by device bits 8-12, or 8-11 for 16-device units.
    let unit_index = rch.wrapping_add(RCH_UNIT_INDEX);
    let mut ix = s.fetch_u16(unit_index.wrapping_add((device & 0xf8) >> 2))?;
    if ix & NO_BLOCK != 0 {
        ix = s.fetch_u16(unit_index.wrapping_add((device & 0xf0) >> 2))?;
        if ix & NO_BLOCK != 0 {
            return Err(decline("no real control unit block"));
        }
    }
    let mut rcu = s
        .fetch_u32(ioct + arioct::CONTROL_UNITS)?
        .wrapping_add(ix.into());
    let device_ix = s.fetch_u16(rcu.wrapping_add(RCU_DEVICE_INDEX + ((device & 0xf) << 1)))?;
    if s.fetch_u8(rcu.wrapping_add(RCU_TYPE))? & RCU_ALTERNATE_FLAG != 0 {
        rcu = s.fetch_u32(rcu.wrapping_add(RCU_PRIMARY))?;
    }
    if device_ix & NO_BLOCK != 0 {
        return Err(decline("no real device block"));
    }
    let rdev = s
        .fetch_u32(ioct + arioct::DEVICES)?
        .wrapping_add(u32::from(device_ix) << 3);
    Ok((rch, rcu, rdev))
}

impl<P: AddressingPolicy> EcpsVm<P> {
    /// SCNVU: locates the virtual channel, control unit and device blocks of
    /// the virtual device number in GR1.
    pub fn scnvu<T: AssistSupport>(
        &self,
        state: &mut CpuState,
        support: T,
        op1: u32,
        op2: u32,
    ) -> Result<Outcome, Error<T::Error>> {
        let (op1, op2) = (op1 & P::ADDRESS_WRAP, op2 & P::ADDRESS_WRAP);
        self.run_cp(Assist::Scnvu, state, support, |s| {
            let device = s.regs.gps[CpuState::R1];
            let blocks = scan_virtual(s, device, op1, op2)?;
            tracing::trace!(device, ?blocks, "SCNVU");
            found(s, blocks);
            Ok(Disposition::Done)
        })
    }

    /// SCNRU: locates the real channel, control unit and device blocks of the
    /// real device number `op1`.
    pub fn scnru<T: AssistSupport>(
        &self,
        state: &mut CpuState,
        support: T,
        op1: u32,
        op2: u32,
    ) -> Result<Outcome, Error<T::Error>> {
        let op2 = op2 & P::ADDRESS_WRAP;
        self.run_cp(Assist::Scnru, state, support, |s| {
            let device = op1 & 0xfff;
            let blocks = scan_real(s, device, op2)?;
            tracing::trace!(device, ?blocks, "SCNRU");
            found(s, blocks);
            s.regs.gps[CpuState::R15] = 0;
            Ok(Disposition::Done)
        })
    }
}
