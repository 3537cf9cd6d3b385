// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Offsets and flag bits of the control program's storage-resident blocks.

#![expect(missing_docs)] // offsets carry the control block field names

use static_assertions::const_assert;
use static_assertions::const_assert_eq;
use zerocopy::byteorder::big_endian::U32;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

/// Virtual machine block.
pub mod vmblok {
    pub const VMQFPNT: u32 = 0x00;
    pub const VMQBPNT: u32 = 0x04;
    pub const VMPNT: u32 = 0x08;
    /// ECBLOK address for extended VMs, virtual CR0 otherwise.
    pub const VMECEXT: u32 = 0x0c;
    pub const VMVCR0: u32 = VMECEXT;
    pub const VMSEG: u32 = 0x10;
    pub const VMSIZE: u32 = 0x14;
    pub const VMGPRS: u32 = 0x20;
    pub const VMFPRS: u32 = 0x60;
    pub const VMTTIME: u32 = 0x80;
    pub const VMTMINQ: u32 = 0x88;
    pub const VMTMOUTQ: u32 = 0x90;
    pub const VMTIMER: u32 = 0x98;
    pub const VMSTKCNT: u32 = 0x9c;
    pub const VMIOINT: u32 = 0x9e;
    pub const VMPXINT: u32 = 0xa0;
    /// Flag byte followed by the MICBLOK address.
    pub const VMMCR6: u32 = 0xa4;
    pub const VMPSW: u32 = 0xa8;
    pub const VMRSTAT: u32 = 0xb0;
    pub const VMDSTAT: u32 = 0xb1;
    pub const VMOSTAT: u32 = 0xb2;
    pub const VMQSTAT: u32 = 0xb3;
    pub const VMPSTAT: u32 = 0xb4;
    pub const VMESTAT: u32 = 0xb5;
    pub const VMPEND: u32 = 0xb6;
    pub const VMNOECPS: u32 = 0xb7;
    pub const VMTRCTL: u32 = 0xb8;
    pub const VMQLEVEL: u32 = 0xb9;
    pub const VMTLEVEL: u32 = 0xba;
    pub const VMTREXT: u32 = 0xbc;
    pub const SIZE: u32 = 0xc0;

    // VMRSTAT
    pub const VMCPWAIT: u8 = 0x80;
    pub const VMPSWAIT: u8 = 0x40;
    pub const VMIDLE: u8 = 0x20;
    pub const VMLOGON: u8 = 0x10;
    pub const VMLOGOFF: u8 = 0x08;
    pub const VMEXWAIT: u8 = 0x04;

    // VMDSTAT
    pub const VMDSP: u8 = 0x80;
    pub const VMTSEND: u8 = 0x40;
    pub const VMQSEND: u8 = 0x20;
    pub const VMTIO: u8 = 0x10;
    pub const VMRUN: u8 = 0x08;
    pub const VMINQ: u8 = 0x04;
    pub const VMELIG: u8 = 0x02;

    // VMOSTAT
    pub const VMSYSOP: u8 = 0x80;
    pub const VMSHR: u8 = 0x40;
    pub const VMSLEEP: u8 = 0x20;
    pub const VMDISC: u8 = 0x10;
    pub const VMKILL: u8 = 0x04;
    pub const VMCF: u8 = 0x02;

    // VMQSTAT
    pub const VMPRIDSP: u8 = 0x80;
    pub const VMCFREAD: u8 = 0x10;

    // VMPSTAT
    pub const VMISAM: u8 = 0x80;
    /// SET ECMODE ON: the VM has an ECBLOK.
    pub const VMV370R: u8 = 0x40;
    pub const VMREAL: u8 = 0x10;

    // VMESTAT
    pub const VMSHADT: u8 = 0x80;
    pub const VMINVSEG: u8 = 0x20;
    pub const VMINVPAG: u8 = 0x10;
    /// The virtual PSW is in EC mode.
    pub const VMEXTCM: u8 = 0x08;
    pub const VMNEWCR0: u8 = 0x04;

    // VMPEND
    pub const VMPERPND: u8 = 0x40;
    pub const VMPRGPND: u8 = 0x20;
    pub const VMSVCPND: u8 = 0x10;
    pub const VMPGPND: u8 = 0x08;

    // VMTRCTL
    pub const VMTRPER: u8 = 0x80;
    pub const VMTRSVC: u8 = 0x40;
    pub const VMTRPRV: u8 = 0x20;
    pub const VMTRBRIN: u8 = 0x10;

    // VMQLEVEL
    pub const VMQ1: u8 = 0x80;
    pub const VMCOMP: u8 = 0x40;

    // VMTLEVEL
    pub const VMTON: u8 = 0x80;
    pub const VMRON: u8 = 0x40;

    // VMMCR6 flag byte, a copy of the CR6 high byte.
    pub const VMMFE: u8 = s370defs::CR6_VM_ASSIST;
    pub const VMMPROB: u8 = s370defs::CR6_VIRTUAL_PROBLEM;
    pub const VMMNOSK: u8 = s370defs::CR6_ISK_INHIBIT;
    pub const VMMSHADT: u8 = s370defs::CR6_SHADOW_TABLES;
    pub const VMMVTMR: u8 = s370defs::CR6_VIRTUAL_TIMER;
}

/// Control program fields of the prefixed storage area.
pub mod psa {
    pub use s370defs::psa::INTERVAL_TIMER as INTTIMER;
    pub use s370defs::psa::IO_OLD_PSW as IOOPSW;

    pub const RUNPSW: u32 = 0x330;
    pub const RUNUSER: u32 = 0x338;
    pub const LASTUSER: u32 = 0x33c;
    pub const RUNCR0: u32 = 0x340;
    pub const RUNCR1: u32 = 0x344;
    pub const CPSTATUS: u32 = 0x348;
    pub const CPSTAT2: u32 = 0x349;
    pub const XTENDLOCK: u32 = 0x34a;
    pub const APSTAT2: u32 = 0x34b;
    pub const QUANTUM: u32 = 0x34c;
    pub const QUANTUMR: u32 = 0x350;
    pub const STACKVM: u32 = 0x354;
    pub const CPCREG0: u32 = 0x358;
    pub const PROBSTRT: u32 = 0x360;
    pub const PROBTIME: u32 = 0x368;
    pub const ASYSVM: u32 = 0x37c;

    // CPSTATUS
    pub const CPWAIT: u8 = 0x80;
    pub const CPRUN: u8 = 0x40;
    pub const CPEX: u8 = 0x20;
    pub const CPSUPER: u8 = 0x08;

    // CPSTAT2
    pub const CPSHRLK: u8 = 0x08;

    pub const XTENDLOCKSET: u8 = 0xff;

    // APSTAT2
    pub const CPMCHLK: u8 = 0x10;
    pub const CPPTLBR: u8 = 0x04;
}

/// Extended control block of a VM with SET ECMODE ON.
pub mod ecblok {
    /// Virtual CRs 0-15.
    pub const EXTCR0: u32 = 0x00;
    pub const EXTCR2: u32 = 0x08;
    pub const EXTSHCR0: u32 = 0x40;
    pub const EXTSHCR1: u32 = 0x44;
}

/// Pending external interruption block.
pub mod xintblok {
    pub const XINTNEXT: u32 = 0x00;
    /// Interruption subclass mask, tested against virtual CR0.
    pub const XINTMASK: u32 = 0x0a;
}

/// Timer request / I/O block on the dispatcher's stack queue.
pub mod trqblok {
    pub const TRQBFPNT: u32 = 0x08;
    pub const TRQBBPNT: u32 = 0x0c;
    pub const TRQBUSER: u32 = 0x18;
    pub const TRQBIRA: u32 = 0x1c;
}

/// CP execution request block.
pub mod cpexblok {
    pub const CPEXFPNT: u32 = 0x00;
    pub const CPEXBPNT: u32 = 0x04;
    pub const CPEXADD: u32 = 0x0c;
    /// Saved general registers 0-14.
    pub const CPEXREGS: u32 = 0x10;
    /// Size in doublewords, as passed to FRETX.
    pub const SIZE_DW: u16 = 10;
}

/// Real storage core table entry.
pub mod cortable {
    pub const ENTRY_DESCRIPTOR: u32 = 0x00;
    pub const ENTRY_LOCKCOUNT: u32 = 0x04;
    pub const ENTRY_FLAGS: u32 = 0x08;

    pub const CORLOCK: u8 = 0x80;
    pub const CORSHARE: u8 = 0x08;
    pub const CORFREE: u8 = 0x02;
}

/// Data list passed to DISP1 and DISP2.
pub mod displist {
    pub const CPEXQUEUE: u32 = 0;
    pub const TRQQUEUE: u32 = 8;
    pub const QUANTUM: u32 = 16;
    pub const INQUEUE: u32 = 24;
    pub const FRET_MAXSIZE: u32 = 28;
    pub const FRET_LIST: u32 = 32;
    /// Save area for GR12-GR1 on the FRET slow path.
    pub const DSPSAVE: u32 = 40;
    pub const SCHMASK: u32 = 64;
    pub const SCHMON: u32 = 68;
}

/// Exit list offsets for DISP1 and DISP2.
pub mod dispexit {
    pub const USOFF: u32 = 0;
    pub const SCHEDULE: u32 = 4;
    pub const FRETSLOW: u32 = 12;
    pub const IDLE: u32 = 24;
    pub const ABEND: u32 = 28;
}

/// Data list and exit list offsets for DISP0.
pub mod disp0 {
    pub const DISPCNT: u32 = 0;
    pub const XINTREG9: u32 = 4;

    pub const EXIT_DISPATCH: u32 = 0;
    pub const EXIT_CPWAIT_OUT: u32 = 4;
    pub const EXIT_TIMER_XINT: u32 = 8;
    pub const EXIT_VMCPWAIT: u32 = 12;
    pub const EXIT_PER_PAGE: u32 = 16;
    pub const EXIT_EXTERNAL: u32 = 20;
    pub const EXIT_IO: u32 = 24;
    pub const EXIT_VWAIT: u32 = 28;
    pub const EXIT_BAD_ITIMER: u32 = 32;
    pub const EXIT_CLEAN: u32 = 36;
}

/// Micro-assist control block, located by CR6.
#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct Micblok {
    pub rseg: U32,
    pub creg: U32,
    /// Virtual PSW address; the high byte holds the pending-interrupt flag.
    pub vpsw: U32,
    pub work: U32,
    pub vtmr: U32,
    /// Per-instruction enables, `MICEVMA` in the first byte.
    pub acf: [u8; 4],
}

impl Micblok {
    pub const MICVIP: u32 = 8;
    pub const MICPEND: u8 = 0x80;

    /// The pending-interrupt flag byte.
    pub fn pending(&self) -> u8 {
        (self.vpsw.get() >> 24) as u8
    }

    /// The VM assist enables.
    pub fn evma(&self) -> MicEvma {
        MicEvma::from(self.acf[0])
    }
}

/// Virtual CR0 bit suppressing SSM.
pub const VCR0_SSM_SUPPRESS: u32 = 0x4000_0000;

/// Enables for individual virtual machine assists.
#[bitfield_struct::bitfield(u8)]
pub struct MicEvma {
    pub diag: bool,
    pub tch: bool,
    pub stpt: bool,
    pub ssm: bool,
    pub sio: bool,
    pub scsp: bool,
    pub ptlb: bool,
    pub lpsw: bool,
}

const_assert_eq!(size_of::<Micblok>(), 24);
const_assert!(vmblok::VMGPRS + 64 <= vmblok::VMFPRS);
const_assert!(vmblok::VMFPRS + 32 <= vmblok::VMTTIME);
const_assert!(vmblok::VMPSW + 8 <= vmblok::VMRSTAT);
const_assert!(vmblok::VMTREXT + 4 <= vmblok::SIZE);
const_assert!(displist::DSPSAVE + 24 <= displist::SCHMASK);
