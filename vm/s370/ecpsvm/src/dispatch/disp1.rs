// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! DISP1: the user in GR11 leaves the processor.

use super::take_exit;
use crate::engine::Disposition;
use crate::engine::InternalError;
use crate::layout::dispexit;
use crate::layout::displist;
use crate::layout::psa;
use crate::layout::vmblok;
use crate::policy::AddressingPolicy;
use crate::registers::CpuState;
use crate::staged::Staged;
use crate::support::AssistSupport;

pub(super) fn run<T: AssistSupport, P: AddressingPolicy>(
    s: &mut Staged<T, P>,
    data: u32,
    exits: u32,
) -> Result<Disposition, InternalError<T::Error>> {
    let vmb = s.regs.gps[CpuState::R11] & P::ADDRESS_WRAP;

    // The status word covers VMRSTAT through VMQSTAT.
    let status = s.fetch_u32(vmb + vmblok::VMRSTAT)?;
    let mask = s.fetch_u32(data + displist::SCHMASK)?;
    let compare = s.fetch_u32(data + displist::SCHMON)?;
    if status & mask == compare {
        return Ok(Disposition::Chain);
    }
    if vmb == s.fetch_addr(psa::ASYSVM)? {
        return Ok(Disposition::Chain);
    }

    let ostat = s.fetch_u8(vmb + vmblok::VMOSTAT)?;
    if ostat & vmblok::VMKILL == 0 {
        return take_exit(s, exits, dispexit::SCHEDULE);
    }
    let qstat = s.fetch_u8(vmb + vmblok::VMQSTAT)?;
    if qstat & vmblok::VMCFREAD == 0 && ostat & vmblok::VMCF != 0 {
        return take_exit(s, exits, dispexit::SCHEDULE);
    }
    s.store_u8(vmb + vmblok::VMQSTAT, qstat & !vmblok::VMCFREAD)?;
    s.store_u8(vmb + vmblok::VMOSTAT, ostat & !vmblok::VMKILL)?;

    let rstat = s.fetch_u8(vmb + vmblok::VMRSTAT)?;
    if rstat & vmblok::VMLOGOFF != 0 {
        return Ok(Disposition::Chain);
    }
    tracing::debug!(vmb, "forcing logoff of killed user");
    s.store_u8(vmb + vmblok::VMRSTAT, rstat | vmblok::VMLOGOFF)?;
    take_exit(s, exits, dispexit::USOFF)
}
